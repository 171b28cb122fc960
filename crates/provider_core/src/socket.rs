use std::sync::Arc;

use shared::domain::{ConnectionState, DisconnectReason};
use tokio::sync::RwLock;

use crate::{error::DispatchError, transport::Transport};

struct SlotState {
    epoch: u64,
    state: ConnectionState,
    transport: Option<Arc<dyn Transport>>,
}

/// The one socket the supervisor currently owns. Dispatch and media
/// retrieval borrow the transport from here and never hold on to it.
#[derive(Clone)]
pub struct SocketSlot {
    inner: Arc<RwLock<SlotState>>,
}

impl Default for SocketSlot {
    fn default() -> Self {
        Self {
            inner: Arc::new(RwLock::new(SlotState {
                epoch: 0,
                state: ConnectionState::Closed(DisconnectReason::ConnectionClosed),
                transport: None,
            })),
        }
    }
}

impl SocketSlot {
    pub(crate) async fn install(&self, epoch: u64, transport: Arc<dyn Transport>) {
        let mut slot = self.inner.write().await;
        slot.epoch = epoch;
        slot.state = ConnectionState::Connecting;
        slot.transport = Some(transport);
    }

    pub(crate) async fn mark_open(&self, epoch: u64) -> bool {
        let mut slot = self.inner.write().await;
        if slot.epoch != epoch || slot.transport.is_none() {
            return false;
        }
        slot.state = ConnectionState::Open;
        true
    }

    /// Detaches the transport so nothing new is dispatched through it.
    pub(crate) async fn take(&self, next: ConnectionState) -> Option<Arc<dyn Transport>> {
        let mut slot = self.inner.write().await;
        slot.state = next;
        slot.transport.take()
    }

    pub async fn state(&self) -> ConnectionState {
        self.inner.read().await.state
    }

    pub async fn epoch(&self) -> u64 {
        self.inner.read().await.epoch
    }

    pub async fn is_open(&self) -> bool {
        self.state().await.is_open()
    }

    /// Transport of the open connection.
    pub async fn open_transport(&self) -> Result<Arc<dyn Transport>, DispatchError> {
        let slot = self.inner.read().await;
        match (&slot.transport, slot.state) {
            (Some(transport), ConnectionState::Open) => Ok(Arc::clone(transport)),
            _ => Err(DispatchError::NotConnected),
        }
    }
}
