use std::{path::PathBuf, sync::Arc};

use chrono::{DateTime, Utc};
use provider_core::{ActionPayload, ProviderEvent};
use serde::Serialize;
use shared::domain::HostIdentity;
use tokio::{
    sync::{broadcast, RwLock},
    task::JoinHandle,
};
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PendingAction {
    pub title: String,
    pub instructions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<ActionPayload>,
}

/// What `/status` reports.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub bot_name: String,
    pub ready: bool,
    pub host: Option<HostIdentity>,
    pub pending_action: Option<PendingAction>,
    pub auth_failure: Option<Vec<String>>,
    pub messages_received: u64,
    pub updated_at: Option<DateTime<Utc>>,
}

impl StatusSnapshot {
    pub fn apply(&mut self, event: &ProviderEvent) {
        match event {
            ProviderEvent::Ready(ready) => {
                self.ready = *ready;
                if *ready {
                    self.pending_action = None;
                    self.auth_failure = None;
                }
            }
            ProviderEvent::Host(host) => self.host = Some(host.clone()),
            ProviderEvent::RequireAction {
                title,
                instructions,
                payload,
            } => {
                self.ready = false;
                self.pending_action = Some(PendingAction {
                    title: title.clone(),
                    instructions: instructions.clone(),
                    payload: payload.clone(),
                });
            }
            ProviderEvent::AuthFailure(instructions) => {
                self.ready = false;
                self.auth_failure = Some(instructions.clone());
            }
            ProviderEvent::Notice { .. } => return,
            ProviderEvent::Message(_) => self.messages_received += 1,
        }
        self.updated_at = Some(Utc::now());
    }
}

#[derive(Clone)]
pub struct AppState {
    status: Arc<RwLock<StatusSnapshot>>,
    qr_path: PathBuf,
    events: broadcast::Sender<ProviderEvent>,
}

impl AppState {
    pub fn new(
        bot_name: impl Into<String>,
        qr_path: impl Into<PathBuf>,
        events: broadcast::Sender<ProviderEvent>,
    ) -> Self {
        Self {
            status: Arc::new(RwLock::new(StatusSnapshot {
                bot_name: bot_name.into(),
                ..StatusSnapshot::default()
            })),
            qr_path: qr_path.into(),
            events,
        }
    }

    pub async fn status(&self) -> StatusSnapshot {
        self.status.read().await.clone()
    }

    pub fn qr_path(&self) -> &PathBuf {
        &self.qr_path
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProviderEvent> {
        self.events.subscribe()
    }

    pub async fn apply(&self, event: &ProviderEvent) {
        self.status.write().await.apply(event);
    }

    /// Folds provider events into the status snapshot until the channel
    /// closes.
    pub fn spawn_listener(&self) -> JoinHandle<()> {
        let state = self.clone();
        let mut events = self.events.subscribe();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(event) => state.apply(&event).await,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "control: status listener lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            info!("control: provider event stream closed");
        })
    }
}
