use std::{collections::BTreeMap, sync::Arc};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared::{
    message::{OutboundRequest, SendReceipt},
    protocol::WebMessageInfo,
};

use crate::{config::BrowserIdentity, event_source::EventSource};

/// Everything a connector needs to open one socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectOptions {
    pub bot_name: String,
    pub epoch: u64,
    pub credentials: Value,
    pub keys: BTreeMap<String, Value>,
    pub browser: BrowserIdentity,
    /// When set the transport must not print its own QR; a pairing code is
    /// requested instead.
    pub pairing_code_mode: bool,
}

/// One live protocol socket.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &OutboundRequest) -> Result<SendReceipt>;
    async fn request_pairing_code(&self, phone: &str) -> Result<String>;
    async fn download_media(&self, message: &WebMessageInfo) -> Result<Vec<u8>>;
    async fn close(&self) -> Result<()>;
}

/// Opens sockets. Raw events of the new socket are published into `events`.
#[async_trait]
pub trait TransportConnector: Send + Sync {
    async fn connect(
        &self,
        options: ConnectOptions,
        events: Arc<EventSource>,
    ) -> Result<Arc<dyn Transport>>;
}

pub struct MissingTransportConnector;

#[async_trait]
impl TransportConnector for MissingTransportConnector {
    async fn connect(
        &self,
        options: ConnectOptions,
        _events: Arc<EventSource>,
    ) -> Result<Arc<dyn Transport>> {
        Err(anyhow!(
            "protocol transport is unavailable for bot '{}'",
            options.bot_name
        ))
    }
}
