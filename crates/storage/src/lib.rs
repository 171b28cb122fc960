use std::{
    collections::BTreeMap,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use shared::protocol::CredentialsUpdate;
use tokio::{fs, sync::Mutex};
use tracing::{debug, info, warn};

pub mod cache;

pub use cache::{CacheSnapshot, ChatSummary, MessageLookup, SessionCache};

const CREDS_FILE: &str = "creds.json";
const CACHE_FILE: &str = "session_store.json";
const TMP_SUFFIX: &str = "tmp";

/// Credential material needed to resume a session without re-pairing.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub credentials: Value,
    pub keys: BTreeMap<String, Value>,
    pub registered: bool,
}

impl Default for Session {
    fn default() -> Self {
        Self {
            credentials: Value::Object(Map::new()),
            keys: BTreeMap::new(),
            registered: false,
        }
    }
}

impl Session {
    pub fn new(credentials: Value, keys: BTreeMap<String, Value>) -> Self {
        let registered = registered_flag(&credentials);
        Self {
            credentials,
            keys,
            registered,
        }
    }

    /// Merges a rotation patch: credential fields are overwritten one level
    /// deep, keys are upserted or removed.
    pub fn apply(&mut self, update: &CredentialsUpdate) {
        match &update.creds {
            Value::Null => {}
            Value::Object(patch) => {
                if !self.credentials.is_object() {
                    self.credentials = Value::Object(Map::new());
                }
                if let Value::Object(current) = &mut self.credentials {
                    for (field, value) in patch {
                        current.insert(field.clone(), value.clone());
                    }
                }
            }
            other => self.credentials = other.clone(),
        }

        for (name, value) in &update.keys {
            match value {
                Some(value) => {
                    self.keys.insert(name.clone(), value.clone());
                }
                None => {
                    self.keys.remove(name);
                }
            }
        }

        self.registered = registered_flag(&self.credentials);
    }
}

fn registered_flag(credentials: &Value) -> bool {
    credentials
        .get("registered")
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    Written,
    SkippedMissingDir,
    SkippedAfterPurge,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Loads the persisted session, or an empty unregistered one.
    async fn load(&self) -> Result<Session>;
    async fn save_credentials(&self, credentials: &Value) -> Result<()>;
    async fn save_keys(&self, keys: &BTreeMap<String, Option<Value>>) -> Result<()>;
    /// Deletes everything persisted for this bot.
    async fn purge(&self) -> Result<()>;
    async fn restore_cache(&self, cache: &SessionCache) -> Result<bool>;
    async fn flush_cache(&self, cache: &SessionCache) -> Result<FlushOutcome>;
}

#[derive(Debug, Serialize, Deserialize)]
struct KeyRecord {
    name: String,
    value: Value,
}

#[derive(Debug, Default)]
struct FlushGate {
    skip_next_flush: bool,
}

/// Session store laid out as `<root>/<bot_name>_sessions/`.
pub struct FileSessionStore {
    dir: PathBuf,
    gate: Mutex<FlushGate>,
}

impl FileSessionStore {
    pub fn new(root: impl AsRef<Path>, bot_name: &str) -> Self {
        Self {
            dir: session_dir_for(root.as_ref(), bot_name),
            gate: Mutex::new(FlushGate::default()),
        }
    }

    pub fn session_dir(&self) -> &Path {
        &self.dir
    }

    fn creds_path(&self) -> PathBuf {
        self.dir.join(CREDS_FILE)
    }

    fn cache_path(&self) -> PathBuf {
        self.dir.join(CACHE_FILE)
    }

    fn key_path(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.json", sanitize_key_name(name)))
    }

    async fn load_keys(&self) -> Result<BTreeMap<String, Value>> {
        let mut keys = BTreeMap::new();
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(keys),
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("failed to list session dir '{}'", self.dir.display())
                })
            }
        };

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
                continue;
            };
            if file_name == CREDS_FILE || file_name == CACHE_FILE || !file_name.ends_with(".json")
            {
                continue;
            }
            let raw = fs::read(&path)
                .await
                .with_context(|| format!("failed to read key file '{}'", path.display()))?;
            match serde_json::from_slice::<KeyRecord>(&raw) {
                Ok(record) => {
                    keys.insert(record.name, record.value);
                }
                Err(err) => {
                    warn!(path = %path.display(), "storage: skipping unreadable key file: {err}");
                }
            }
        }

        Ok(keys)
    }
}

pub fn session_dir_for(root: &Path, bot_name: &str) -> PathBuf {
    root.join(format!("{bot_name}_sessions"))
}

fn sanitize_key_name(name: &str) -> String {
    name.replace('/', "__").replace(':', "-")
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = path.with_extension(format!("json.{TMP_SUFFIX}"));
    fs::write(&tmp, bytes)
        .await
        .with_context(|| format!("failed to write '{}'", tmp.display()))?;
    fs::rename(&tmp, path)
        .await
        .with_context(|| format!("failed to move '{}' into place", path.display()))?;
    Ok(())
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn load(&self) -> Result<Session> {
        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("failed to create session dir '{}'", self.dir.display()))?;

        let credentials = match fs::read(self.creds_path()).await {
            Ok(raw) => serde_json::from_slice(&raw).context("credentials file is not valid JSON")?,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(dir = %self.dir.display(), "storage: no credentials yet, starting empty session");
                Value::Object(Map::new())
            }
            Err(err) => return Err(err).context("failed to read credentials file"),
        };
        let keys = self.load_keys().await?;
        Ok(Session::new(credentials, keys))
    }

    async fn save_credentials(&self, credentials: &Value) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("failed to create session dir '{}'", self.dir.display()))?;
        let bytes = serde_json::to_vec_pretty(credentials)?;
        write_atomic(&self.creds_path(), &bytes).await
    }

    async fn save_keys(&self, keys: &BTreeMap<String, Option<Value>>) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("failed to create session dir '{}'", self.dir.display()))?;

        for (name, value) in keys {
            let path = self.key_path(name);
            match value {
                Some(value) => {
                    let record = KeyRecord {
                        name: name.clone(),
                        value: value.clone(),
                    };
                    write_atomic(&path, &serde_json::to_vec(&record)?).await?;
                }
                None => match fs::remove_file(&path).await {
                    Ok(()) => {}
                    Err(err) if err.kind() == ErrorKind::NotFound => {}
                    Err(err) => {
                        return Err(err).with_context(|| {
                            format!("failed to remove key file '{}'", path.display())
                        })
                    }
                },
            }
        }
        Ok(())
    }

    async fn purge(&self) -> Result<()> {
        let mut gate = self.gate.lock().await;
        match fs::remove_dir_all(&self.dir).await {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                return Err(err).with_context(|| {
                    format!("failed to purge session dir '{}'", self.dir.display())
                })
            }
        }
        gate.skip_next_flush = true;
        info!(dir = %self.dir.display(), "storage: session purged");
        Ok(())
    }

    async fn restore_cache(&self, cache: &SessionCache) -> Result<bool> {
        let raw = match fs::read(self.cache_path()).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(false),
            Err(err) => return Err(err).context("failed to read session cache file"),
        };
        let snapshot: CacheSnapshot =
            serde_json::from_slice(&raw).context("session cache file is not valid JSON")?;
        cache.restore(snapshot).await;
        Ok(true)
    }

    async fn flush_cache(&self, cache: &SessionCache) -> Result<FlushOutcome> {
        let mut gate = self.gate.lock().await;
        if gate.skip_next_flush {
            gate.skip_next_flush = false;
            return Ok(FlushOutcome::SkippedAfterPurge);
        }
        if !fs::try_exists(&self.dir).await.unwrap_or(false) {
            return Ok(FlushOutcome::SkippedMissingDir);
        }
        let snapshot = cache.snapshot().await;
        let bytes = serde_json::to_vec(&snapshot)?;
        write_atomic(&self.cache_path(), &bytes).await?;
        Ok(FlushOutcome::Written)
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
