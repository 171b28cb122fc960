use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::Context;
use provider_core::{BrowserIdentity, ProviderConfig};
use serde::Deserialize;

pub const DEFAULT_SETTINGS_FILE: &str = "bot.toml";

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub bot_name: String,
    pub session_root: PathBuf,
    pub gateway_url: String,
    pub http_bind: String,
    pub gif_playback: bool,
    pub use_pairing_code: bool,
    pub phone_number: Option<String>,
    pub use_cache: bool,
    pub browser: BrowserIdentity,
    pub reconnect_delay_ms: u64,
    pub pairing_timeout_secs: u64,
    pub flush_interval_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        let provider = ProviderConfig::default();
        Self {
            bot_name: provider.bot_name,
            session_root: PathBuf::from("./sessions"),
            gateway_url: "ws://127.0.0.1:8787/ws".into(),
            http_bind: "127.0.0.1:3008".into(),
            gif_playback: provider.gif_playback,
            use_pairing_code: provider.use_pairing_code,
            phone_number: None,
            use_cache: provider.use_cache,
            browser: provider.browser,
            reconnect_delay_ms: 0,
            pairing_timeout_secs: provider.pairing_timeout.as_secs(),
            flush_interval_secs: provider.flush_interval.as_secs(),
        }
    }
}

/// Every key optional; absent keys keep their defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileSettings {
    bot_name: Option<String>,
    session_root: Option<PathBuf>,
    gateway_url: Option<String>,
    http_bind: Option<String>,
    gif_playback: Option<bool>,
    use_pairing_code: Option<bool>,
    phone_number: Option<String>,
    use_cache: Option<bool>,
    browser: Option<[String; 3]>,
    reconnect_delay_ms: Option<u64>,
    pairing_timeout_secs: Option<u64>,
    flush_interval_secs: Option<u64>,
}

impl Settings {
    pub fn provider_config(&self) -> ProviderConfig {
        ProviderConfig {
            bot_name: self.bot_name.clone(),
            session_root: self.session_root.clone(),
            gif_playback: self.gif_playback,
            use_pairing_code: self.use_pairing_code,
            phone_number: self.phone_number.clone(),
            browser: self.browser.clone(),
            use_cache: self.use_cache,
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
            pairing_timeout: Duration::from_secs(self.pairing_timeout_secs),
            flush_interval: Duration::from_secs(self.flush_interval_secs.max(1)),
            ..ProviderConfig::default()
        }
    }

    fn apply_file(&mut self, file: FileSettings) {
        if let Some(v) = file.bot_name {
            self.bot_name = v;
        }
        if let Some(v) = file.session_root {
            self.session_root = v;
        }
        if let Some(v) = file.gateway_url {
            self.gateway_url = v;
        }
        if let Some(v) = file.http_bind {
            self.http_bind = v;
        }
        if let Some(v) = file.gif_playback {
            self.gif_playback = v;
        }
        if let Some(v) = file.use_pairing_code {
            self.use_pairing_code = v;
        }
        if file.phone_number.is_some() {
            self.phone_number = file.phone_number;
        }
        if let Some(v) = file.use_cache {
            self.use_cache = v;
        }
        if let Some([platform, browser, version]) = file.browser {
            self.browser = BrowserIdentity {
                platform,
                browser,
                version,
            };
        }
        if let Some(v) = file.reconnect_delay_ms {
            self.reconnect_delay_ms = v;
        }
        if let Some(v) = file.pairing_timeout_secs {
            self.pairing_timeout_secs = v;
        }
        if let Some(v) = file.flush_interval_secs {
            self.flush_interval_secs = v;
        }
    }

    /// `APP__<KEY>` wins over a plain `<KEY>` variable.
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |key: &str| lookup(&format!("APP__{key}")).or_else(|| lookup(key));

        if let Some(v) = var("BOT_NAME") {
            self.bot_name = v;
        }
        if let Some(v) = var("SESSION_ROOT") {
            self.session_root = PathBuf::from(v);
        }
        if let Some(v) = var("GATEWAY_URL") {
            self.gateway_url = v;
        }
        if let Some(v) = var("HTTP_BIND") {
            self.http_bind = v;
        }
        if let Some(v) = var("PORT") {
            if let Ok(port) = v.parse::<u16>() {
                let host = self
                    .http_bind
                    .rsplit_once(':')
                    .map(|(host, _)| host.to_string())
                    .unwrap_or_else(|| "0.0.0.0".into());
                self.http_bind = format!("{host}:{port}");
            }
        }
        if let Some(v) = var("GIF_PLAYBACK").and_then(|v| parse_flag(&v)) {
            self.gif_playback = v;
        }
        if let Some(v) = var("USE_PAIRING_CODE").and_then(|v| parse_flag(&v)) {
            self.use_pairing_code = v;
        }
        if let Some(v) = var("PHONE_NUMBER") {
            self.phone_number = Some(v);
        }
        if let Some(v) = var("USE_CACHE").and_then(|v| parse_flag(&v)) {
            self.use_cache = v;
        }
        if let Some(v) = var("RECONNECT_DELAY_MS").and_then(|v| v.parse().ok()) {
            self.reconnect_delay_ms = v;
        }
        if let Some(v) = var("PAIRING_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.pairing_timeout_secs = v;
        }
        if let Some(v) = var("FLUSH_INTERVAL_SECS").and_then(|v| v.parse().ok()) {
            self.flush_interval_secs = v;
        }
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Defaults, then the settings file if it exists, then the environment.
pub fn load_settings(path: &Path) -> anyhow::Result<Settings> {
    let mut settings = Settings::default();

    match fs::read_to_string(path) {
        Ok(raw) => {
            let file: FileSettings = toml::from_str(&raw)
                .with_context(|| format!("invalid settings file '{}'", path.display()))?;
            settings.apply_file(file);
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => {
            return Err(err)
                .with_context(|| format!("failed to read settings file '{}'", path.display()))
        }
    }

    settings.apply_env(|key| std::env::var(key).ok());
    Ok(settings)
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
