use std::{
    collections::BTreeMap,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde_json::Value;
use shared::{
    message::{OutboundRequest, SendReceipt},
    protocol::{TransportEvent, WebMessageInfo},
};
use storage::{FlushOutcome, Session, SessionCache, SessionStore};
use tokio::sync::broadcast;

use crate::{
    event_source::EventSource,
    socket::SocketSlot,
    transport::{ConnectOptions, Transport, TransportConnector},
    ProviderEvent,
};

pub struct FakeTransport {
    pub sent: Mutex<Vec<OutboundRequest>>,
    pub pairing_requests: Mutex<Vec<String>>,
    pub closed: AtomicBool,
    pub media: Vec<u8>,
    pub fail_send: Option<String>,
}

impl Default for FakeTransport {
    fn default() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            pairing_requests: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            media: b"media-bytes".to_vec(),
            fail_send: None,
        }
    }
}

impl FakeTransport {
    pub fn sent(&self) -> Vec<OutboundRequest> {
        self.sent.lock().expect("sent lock").clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn send(&self, request: &OutboundRequest) -> Result<SendReceipt> {
        if let Some(err) = &self.fail_send {
            return Err(anyhow!(err.clone()));
        }
        self.sent.lock().expect("sent lock").push(request.clone());
        Ok(SendReceipt {
            message_id: Some(shared::domain::MessageId::new("SENT-1")),
            raw: Value::Null,
        })
    }

    async fn request_pairing_code(&self, phone: &str) -> Result<String> {
        self.pairing_requests
            .lock()
            .expect("pairing lock")
            .push(phone.to_string());
        Ok("ABCD-1234".to_string())
    }

    async fn download_media(&self, _message: &WebMessageInfo) -> Result<Vec<u8>> {
        Ok(self.media.clone())
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Connector that records every attempt and replays `on_connect` into each
/// new event source before returning.
#[derive(Default)]
pub struct FakeConnector {
    pub attempts: AtomicUsize,
    pub fail_with: Option<String>,
    pub on_connect: Vec<TransportEvent>,
    pub options: Mutex<Vec<ConnectOptions>>,
    pub transports: Mutex<Vec<Arc<FakeTransport>>>,
    pub sources: Mutex<Vec<Arc<EventSource>>>,
}

impl FakeConnector {
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn source(&self, index: usize) -> Arc<EventSource> {
        Arc::clone(&self.sources.lock().expect("sources lock")[index])
    }

    pub fn transport(&self, index: usize) -> Arc<FakeTransport> {
        Arc::clone(&self.transports.lock().expect("transports lock")[index])
    }
}

#[async_trait]
impl TransportConnector for FakeConnector {
    async fn connect(
        &self,
        options: ConnectOptions,
        events: Arc<EventSource>,
    ) -> Result<Arc<dyn Transport>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.options.lock().expect("options lock").push(options);
        if let Some(err) = &self.fail_with {
            return Err(anyhow!(err.clone()));
        }
        for event in &self.on_connect {
            events.publish(event.clone());
        }
        let transport = Arc::new(FakeTransport::default());
        self.transports
            .lock()
            .expect("transports lock")
            .push(Arc::clone(&transport));
        self.sources.lock().expect("sources lock").push(events);
        Ok(transport)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    pub session: Mutex<Session>,
    pub purges: AtomicUsize,
    pub credential_saves: AtomicUsize,
    pub flushes: AtomicUsize,
    pub fail_load: Option<String>,
    pub fail_save: Option<String>,
    pub save_delay: Option<Duration>,
}

impl MemoryStore {
    pub fn registered() -> Self {
        let store = Self::default();
        *store.session.lock().expect("session lock") =
            Session::new(serde_json::json!({"registered": true}), BTreeMap::new());
        store
    }

    pub fn purges(&self) -> usize {
        self.purges.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn load(&self) -> Result<Session> {
        if let Some(err) = &self.fail_load {
            return Err(anyhow!(err.clone()));
        }
        Ok(self.session.lock().expect("session lock").clone())
    }

    async fn save_credentials(&self, credentials: &Value) -> Result<()> {
        if let Some(err) = &self.fail_save {
            return Err(anyhow!(err.clone()));
        }
        if let Some(delay) = self.save_delay {
            tokio::time::sleep(delay).await;
        }
        self.credential_saves.fetch_add(1, Ordering::SeqCst);
        let mut session = self.session.lock().expect("session lock");
        *session = Session::new(credentials.clone(), session.keys.clone());
        Ok(())
    }

    async fn save_keys(&self, keys: &BTreeMap<String, Option<Value>>) -> Result<()> {
        if let Some(err) = &self.fail_save {
            return Err(anyhow!(err.clone()));
        }
        let mut session = self.session.lock().expect("session lock");
        for (name, value) in keys {
            match value {
                Some(value) => {
                    session.keys.insert(name.clone(), value.clone());
                }
                None => {
                    session.keys.remove(name);
                }
            }
        }
        Ok(())
    }

    async fn purge(&self) -> Result<()> {
        self.purges.fetch_add(1, Ordering::SeqCst);
        *self.session.lock().expect("session lock") = Session::default();
        Ok(())
    }

    async fn restore_cache(&self, _cache: &SessionCache) -> Result<bool> {
        Ok(false)
    }

    async fn flush_cache(&self, _cache: &SessionCache) -> Result<FlushOutcome> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(FlushOutcome::Written)
    }
}

pub async fn open_slot(transport: Arc<FakeTransport>) -> SocketSlot {
    let slot = SocketSlot::default();
    slot.install(1, transport).await;
    slot.mark_open(1).await;
    slot
}

pub async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {what}");
}

pub async fn next_event(events: &mut broadcast::Receiver<ProviderEvent>) -> ProviderEvent {
    tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("provider event in time")
        .expect("provider event channel open")
}
