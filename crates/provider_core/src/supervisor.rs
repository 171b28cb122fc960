//! Owns the one live socket and drops updates from earlier epochs.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use shared::{
    domain::{ConnectionState, DisconnectReason},
    protocol::{ConnectionUpdate, EventKind, TransportEvent},
};
use storage::{FlushOutcome, MessageLookup, SessionCache, SessionStore};
use tokio::{
    sync::{broadcast, mpsc, Mutex},
    task::JoinHandle,
};
use tracing::{debug, error, info, warn};

use crate::{
    config::ProviderConfig,
    dispatch::MessageDispatcher,
    event_source::{EventSource, Subscription},
    machine::{Action, ConnectionMachine},
    media::MediaRetriever,
    normalizer::EventNormalizer,
    qr::QrArtifactWriter,
    rotation::CredentialRotation,
    socket::SocketSlot,
    transport::{ConnectOptions, Transport, TransportConnector},
    ProviderEvent, MISSING_PHONE_INSTRUCTION,
};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Connecting { epoch: u64 },
    AlreadyActive { epoch: u64 },
    /// Bootstrap or configuration failure; reported through `auth_failure`.
    Failed,
}

type EpochUpdate = (u64, ConnectionUpdate);

struct InboundSubscriptions {
    upserts: Subscription,
    updates: Subscription,
}

#[derive(Default)]
struct Epoch {
    id: u64,
    source: Option<Arc<EventSource>>,
    handlers: Vec<JoinHandle<()>>,
    /// Drained, never aborted: a rotation queued before a close must reach the
    /// store before the next epoch loads the session.
    rotation: Option<JoinHandle<()>>,
    inbound: Option<InboundSubscriptions>,
}

struct Lifecycle {
    machine: ConnectionMachine,
    current: Epoch,
    qr_write: Option<JoinHandle<()>>,
}

struct Inner {
    config: ProviderConfig,
    store: Arc<dyn SessionStore>,
    connector: Arc<dyn TransportConnector>,
    cache: Option<Arc<SessionCache>>,
    socket: SocketSlot,
    events: broadcast::Sender<ProviderEvent>,
    qr: QrArtifactWriter,
    updates_tx: mpsc::UnboundedSender<EpochUpdate>,
    updates_rx: Mutex<Option<mpsc::UnboundedReceiver<EpochUpdate>>>,
    lifecycle: Mutex<Lifecycle>,
    next_epoch: AtomicU64,
    driver: Mutex<Option<JoinHandle<()>>>,
    flusher: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl Supervisor {
    pub fn new(
        config: ProviderConfig,
        store: Arc<dyn SessionStore>,
        connector: Arc<dyn TransportConnector>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        let cache = config
            .use_cache
            .then(|| Arc::new(SessionCache::new(config.cache_messages_per_chat)));
        let machine = ConnectionMachine::new(config.use_pairing_code);
        let qr = QrArtifactWriter::new(&config.session_root, &config.bot_name);
        Self {
            inner: Arc::new(Inner {
                config,
                store,
                connector,
                cache,
                socket: SocketSlot::default(),
                events,
                qr,
                updates_tx,
                updates_rx: Mutex::new(Some(updates_rx)),
                lifecycle: Mutex::new(Lifecycle {
                    machine,
                    current: Epoch::default(),
                    qr_write: None,
                }),
                next_epoch: AtomicU64::new(0),
                driver: Mutex::new(None),
                flusher: Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.inner.config
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ProviderEvent> {
        self.inner.events.subscribe()
    }

    pub fn events(&self) -> broadcast::Sender<ProviderEvent> {
        self.inner.events.clone()
    }

    pub fn socket(&self) -> SocketSlot {
        self.inner.socket.clone()
    }

    pub fn cache(&self) -> Option<Arc<SessionCache>> {
        self.inner.cache.clone()
    }

    pub fn qr_artifact(&self) -> &QrArtifactWriter {
        &self.inner.qr
    }

    pub async fn state(&self) -> ConnectionState {
        self.inner.socket.state().await
    }

    pub fn dispatcher(&self) -> MessageDispatcher {
        MessageDispatcher::new(
            self.socket(),
            self.events(),
            self.inner.config.gif_playback,
        )
    }

    pub fn media(&self) -> MediaRetriever {
        MediaRetriever::new(self.socket())
    }

    /// Launches the driver: restores the cache, connects, then applies
    /// connection updates in arrival order. Calling it twice is a no-op.
    pub async fn spawn(&self) {
        let Some(mut updates) = self.inner.updates_rx.lock().await.take() else {
            debug!("supervisor: driver already running");
            return;
        };

        if let Some(cache) = &self.inner.cache {
            match self.inner.store.restore_cache(cache).await {
                Ok(true) => info!(bot = %self.inner.config.bot_name, "supervisor: session cache restored"),
                Ok(false) => {}
                Err(err) => warn!("supervisor: session cache not restored: {err:#}"),
            }
            *self.inner.flusher.lock().await = Some(self.spawn_flusher(Arc::clone(cache)));
        }

        let supervisor = self.clone();
        let driver = tokio::spawn(async move {
            supervisor.start().await;
            while let Some((epoch, update)) = updates.recv().await {
                supervisor.handle_update(epoch, update).await;
            }
        });
        *self.inner.driver.lock().await = Some(driver);
    }

    /// Opens a connection unless one is already live.
    pub async fn start(&self) -> StartOutcome {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        if lifecycle.current.source.is_some() {
            return StartOutcome::AlreadyActive {
                epoch: lifecycle.current.id,
            };
        }
        self.open(&mut lifecycle).await
    }

    /// Tears down the live socket and its handlers, then connects again.
    pub async fn restart(&self) -> StartOutcome {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        self.teardown(&mut lifecycle, ConnectionState::Connecting)
            .await;
        self.open(&mut lifecycle).await
    }

    /// Stops the driver and flush task and closes the socket. Queued work is
    /// dropped.
    pub async fn shutdown(&self) {
        if let Some(driver) = self.inner.driver.lock().await.take() {
            driver.abort();
            let _ = driver.await;
        }
        if let Some(flusher) = self.inner.flusher.lock().await.take() {
            flusher.abort();
            let _ = flusher.await;
        }
        let mut lifecycle = self.inner.lifecycle.lock().await;
        self.teardown(
            &mut lifecycle,
            ConnectionState::Closed(DisconnectReason::ConnectionClosed),
        )
        .await;
        info!(bot = %self.inner.config.bot_name, "supervisor: shut down");
    }

    fn emit(&self, event: ProviderEvent) {
        debug!(event = event.name(), "supervisor: emitting");
        let _ = self.inner.events.send(event);
    }

    async fn open(&self, lifecycle: &mut Lifecycle) -> StartOutcome {
        let config = &self.inner.config;
        let epoch = self.inner.next_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        lifecycle.machine.reset();
        info!(bot = %config.bot_name, epoch, "supervisor: connecting");

        let session = match self.inner.store.load().await {
            Ok(session) => session,
            Err(err) => {
                error!(bot = %config.bot_name, "supervisor: failed to load session: {err:#}");
                self.emit(ProviderEvent::AuthFailure(vec![format!("{err:#}")]));
                return StartOutcome::Failed;
            }
        };

        let pairing_phone = if config.use_pairing_code && !session.registered {
            match config.pairing_phone() {
                Some(phone) => Some(phone),
                None => {
                    warn!(bot = %config.bot_name, "supervisor: pairing code mode without phone number");
                    self.emit(ProviderEvent::AuthFailure(vec![
                        MISSING_PHONE_INSTRUCTION.to_string()
                    ]));
                    return StartOutcome::Failed;
                }
            }
        } else {
            None
        };

        let source = EventSource::new(epoch);
        let connection = source.subscribe(EventKind::Connection);
        let credentials = source.subscribe(EventKind::Credentials);
        let pairing = pairing_phone
            .as_ref()
            .map(|_| source.subscribe(EventKind::Connection));
        let inbound = InboundSubscriptions {
            upserts: source.subscribe(EventKind::MessagesUpsert),
            updates: source.subscribe(EventKind::MessagesUpdate),
        };

        let mut handlers = vec![self.spawn_forwarder(epoch, connection)];
        let rotation = tokio::spawn(
            CredentialRotation::new(Arc::clone(&self.inner.store), session.clone())
                .run(credentials),
        );

        let options = ConnectOptions {
            bot_name: config.bot_name.clone(),
            epoch,
            credentials: session.credentials,
            keys: session.keys,
            browser: config.browser.clone(),
            pairing_code_mode: config.use_pairing_code,
        };
        let transport = match self
            .inner
            .connector
            .connect(options, Arc::clone(&source))
            .await
        {
            Ok(transport) => transport,
            Err(err) => {
                error!(bot = %config.bot_name, epoch, "supervisor: failed to open socket: {err:#}");
                source.close();
                abort_all(handlers).await;
                let _ = rotation.await;
                self.emit(ProviderEvent::AuthFailure(vec![format!("{err:#}")]));
                return StartOutcome::Failed;
            }
        };
        self.inner
            .socket
            .install(epoch, Arc::clone(&transport))
            .await;

        if let (Some(phone), Some(subscription)) = (pairing_phone, pairing) {
            handlers.push(self.spawn_pairing(phone, subscription, Arc::clone(&transport)));
        }

        lifecycle.current = Epoch {
            id: epoch,
            source: Some(source),
            handlers,
            rotation: Some(rotation),
            inbound: Some(inbound),
        };
        StartOutcome::Connecting { epoch }
    }

    async fn teardown(&self, lifecycle: &mut Lifecycle, next: ConnectionState) {
        let current = std::mem::take(&mut lifecycle.current);
        if let Some(source) = &current.source {
            source.close();
        }
        abort_all(current.handlers).await;
        if let Some(rotation) = current.rotation {
            if let Err(err) = rotation.await {
                warn!(epoch = current.id, "supervisor: credential rotation task failed: {err}");
            }
        }
        if let Some(transport) = self.inner.socket.take(next).await {
            if let Err(err) = transport.close().await {
                warn!(epoch = current.id, "supervisor: socket close failed: {err:#}");
            }
        }
        if current.source.is_some() {
            debug!(epoch = current.id, "supervisor: epoch torn down");
        }
    }

    async fn handle_update(&self, epoch: u64, update: ConnectionUpdate) {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        if epoch != lifecycle.current.id || lifecycle.current.source.is_none() {
            debug!(epoch, current = lifecycle.current.id, "supervisor: ignoring stale update");
            return;
        }

        let actions = lifecycle.machine.on_update(&update);
        for action in actions {
            match action {
                Action::Emit(event) => self.emit(event),
                Action::RenderQr(qr) => {
                    let writer = self.inner.qr.clone();
                    let previous = lifecycle.qr_write.take();
                    lifecycle.qr_write = Some(tokio::spawn(async move {
                        if let Some(previous) = previous {
                            let _ = previous.await;
                        }
                        if let Err(err) = writer.write(&qr).await {
                            warn!("supervisor: QR artifact not written: {err:#}");
                        }
                    }));
                }
                Action::MarkOpen(host) => {
                    info!(epoch, phone = %host.phone, "supervisor: connection open");
                    self.inner.socket.mark_open(epoch).await;
                    self.remove_qr(&mut lifecycle).await;
                }
                Action::AttachNormalizer => {
                    if let Some(inbound) = lifecycle.current.inbound.take() {
                        let handler = self.spawn_normalizer(inbound);
                        lifecycle.current.handlers.push(handler);
                    }
                }
                Action::PurgeSession => {
                    warn!(epoch, bot = %self.inner.config.bot_name, "supervisor: logged out, purging session");
                    self.teardown(&mut lifecycle, ConnectionState::LoggedOut)
                        .await;
                    if let Err(err) = self.inner.store.purge().await {
                        error!("supervisor: session purge failed: {err:#}");
                    }
                    if let Some(cache) = &self.inner.cache {
                        cache.clear().await;
                    }
                    self.remove_qr(&mut lifecycle).await;
                }
                Action::Restart => {
                    let reason = update.disconnect_reason();
                    info!(epoch, status = reason.status_code(), "supervisor: restarting connection");
                    self.teardown(&mut lifecycle, ConnectionState::Closed(reason))
                        .await;
                    if !self.inner.config.reconnect_delay.is_zero() {
                        tokio::time::sleep(self.inner.config.reconnect_delay).await;
                    }
                    self.open(&mut lifecycle).await;
                }
            }
        }
    }

    /// Waits out any in-flight QR write so it cannot recreate the file.
    async fn remove_qr(&self, lifecycle: &mut Lifecycle) {
        if let Some(write) = lifecycle.qr_write.take() {
            let _ = write.await;
        }
        self.inner.qr.remove().await;
    }

    fn spawn_forwarder(&self, epoch: u64, mut subscription: Subscription) -> JoinHandle<()> {
        let updates = self.inner.updates_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                if let TransportEvent::ConnectionUpdate(update) = event {
                    if updates.send((epoch, update)).is_err() {
                        break;
                    }
                }
            }
        })
    }

    fn spawn_pairing(
        &self,
        phone: String,
        mut subscription: Subscription,
        transport: Arc<dyn Transport>,
    ) -> JoinHandle<()> {
        let supervisor = self.clone();
        let timeout = self.inner.config.pairing_timeout;
        tokio::spawn(async move {
            let challenge = async {
                while let Some(event) = subscription.recv().await {
                    if let TransportEvent::ConnectionUpdate(update) = event {
                        if update.qr.is_some() {
                            return true;
                        }
                    }
                }
                false
            };
            match tokio::time::timeout(timeout, challenge).await {
                Ok(true) => match transport.request_pairing_code(&phone).await {
                    Ok(code) => {
                        info!(phone = %phone, "supervisor: pairing code issued");
                        supervisor.emit(ProviderEvent::pairing_code(&phone, code));
                    }
                    Err(err) => {
                        warn!(phone = %phone, "supervisor: pairing code request failed: {err:#}");
                        supervisor.emit(ProviderEvent::AuthFailure(vec![format!("{err:#}")]));
                    }
                },
                Ok(false) => {}
                Err(_) => {
                    warn!(?timeout, "supervisor: no pairing challenge from transport");
                    supervisor.emit(ProviderEvent::AuthFailure(vec![format!(
                        "No pairing challenge received within {}s",
                        timeout.as_secs()
                    )]));
                }
            }
        })
    }

    fn spawn_normalizer(&self, inbound: InboundSubscriptions) -> JoinHandle<()> {
        let supervisor = self.clone();
        let cache = self.inner.cache.clone();
        let lookup = cache
            .clone()
            .map(|cache| cache as Arc<dyn MessageLookup>);
        let normalizer = EventNormalizer::new(lookup);
        let InboundSubscriptions {
            mut upserts,
            mut updates,
        } = inbound;

        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    biased;
                    Some(event) = upserts.recv() => event,
                    Some(event) = updates.recv() => event,
                    else => break,
                };
                for message in normalizer.normalize(&event).await {
                    supervisor.emit(ProviderEvent::Message(message));
                }
                if let Some(cache) = &cache {
                    cache.ingest(&event).await;
                }
            }
        })
    }

    fn spawn_flusher(&self, cache: Arc<SessionCache>) -> JoinHandle<()> {
        let store = Arc::clone(&self.inner.store);
        let period = self.inner.config.flush_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match store.flush_cache(&cache).await {
                    Ok(FlushOutcome::Written) => debug!("supervisor: session cache flushed"),
                    Ok(outcome) => debug!(?outcome, "supervisor: session cache flush skipped"),
                    Err(err) => warn!("supervisor: session cache flush failed: {err:#}"),
                }
            }
        })
    }
}

async fn abort_all(handlers: Vec<JoinHandle<()>>) {
    for handler in &handlers {
        handler.abort();
    }
    for handler in handlers {
        let _ = handler.await;
    }
}

#[cfg(test)]
#[path = "tests/supervisor_tests.rs"]
mod tests;
