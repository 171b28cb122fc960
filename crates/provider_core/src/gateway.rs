//! Websocket client for the protocol sidecar.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shared::{
    domain::DisconnectReason,
    message::{OutboundRequest, SendReceipt},
    protocol::{ConnectionPhase, ConnectionUpdate, LastDisconnect, TransportEvent, WebMessageInfo},
};
use tokio::{
    sync::{mpsc, oneshot, Mutex},
    task::JoinHandle,
};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::{
    error::GatewayError,
    event_source::EventSource,
    transport::{ConnectOptions, Transport, TransportConnector},
};

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const CLOSE_ACK_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Request { id: String, op: GatewayOp },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum GatewayOp {
    Open { options: ConnectOptions },
    Send { request: OutboundRequest },
    RequestPairingCode { phone: String },
    Download { message: WebMessageInfo },
    Close,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayFrame {
    Event {
        event: TransportEvent,
    },
    Reply {
        id: String,
        ok: bool,
        #[serde(default)]
        data: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

type PendingReplies = Arc<Mutex<HashMap<String, oneshot::Sender<Result<Value, GatewayError>>>>>;

pub struct GatewayConnector {
    url: Url,
    request_timeout: Duration,
}

impl GatewayConnector {
    pub fn new(url: &str) -> Result<Self, GatewayError> {
        let url = Url::parse(url).map_err(|err| GatewayError::InvalidUrl(format!("{url}: {err}")))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(GatewayError::InvalidUrl(format!(
                "{url}: gateway url must start with ws:// or wss://"
            )));
        }
        Ok(Self {
            url,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        })
    }

}

#[async_trait]
impl TransportConnector for GatewayConnector {
    async fn connect(
        &self,
        options: ConnectOptions,
        events: Arc<EventSource>,
    ) -> Result<Arc<dyn Transport>> {
        let (ws_stream, _) = connect_async(self.url.as_str())
            .await
            .with_context(|| format!("failed to connect gateway websocket: {}", self.url))?;
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        let pending: PendingReplies = Arc::new(Mutex::new(HashMap::new()));
        let closing = Arc::new(AtomicBool::new(false));

        let writer = tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                if let Err(err) = ws_writer.send(message).await {
                    warn!("gateway: websocket send failed: {err}");
                    break;
                }
            }
            let _ = ws_writer.close().await;
        });

        let reader = {
            let pending = Arc::clone(&pending);
            let closing = Arc::clone(&closing);
            let epoch = events.epoch();
            tokio::spawn(async move {
                while let Some(message) = ws_reader.next().await {
                    match message {
                        Ok(Message::Text(text)) => match serde_json::from_str::<GatewayFrame>(&text) {
                            Ok(GatewayFrame::Event { event }) => {
                                events.publish(event);
                            }
                            Ok(GatewayFrame::Reply {
                                id,
                                ok,
                                data,
                                error,
                            }) => {
                                let Some(waiter) = pending.lock().await.remove(&id) else {
                                    debug!(id = %id, "gateway: reply for unknown request");
                                    continue;
                                };
                                let result = if ok {
                                    Ok(data)
                                } else {
                                    Err(GatewayError::Rejected(
                                        error.unwrap_or_else(|| "unspecified error".to_string()),
                                    ))
                                };
                                let _ = waiter.send(result);
                            }
                            Err(err) => warn!(epoch, "gateway: invalid frame: {err}"),
                        },
                        Ok(Message::Close(_)) => break,
                        Ok(_) => {}
                        Err(err) => {
                            warn!(epoch, "gateway: websocket receive failed: {err}");
                            break;
                        }
                    }
                }

                pending.lock().await.clear();
                if !closing.load(Ordering::SeqCst) {
                    info!(epoch, "gateway: socket lost");
                    events.publish(TransportEvent::ConnectionUpdate(ConnectionUpdate {
                        connection: Some(ConnectionPhase::Close),
                        last_disconnect: Some(LastDisconnect {
                            status_code: Some(DisconnectReason::ConnectionClosed.status_code()),
                            message: Some("gateway socket closed".to_string()),
                        }),
                        ..ConnectionUpdate::default()
                    }));
                }
            })
        };

        let transport = Arc::new(GatewayTransport {
            outbound,
            pending,
            closing,
            request_timeout: self.request_timeout,
            tasks: std::sync::Mutex::new(vec![reader, writer]),
        });

        if let Err(err) = transport.request(GatewayOp::Open { options }).await {
            let _ = transport.close().await;
            return Err(err).context("gateway refused to open a session");
        }
        Ok(transport)
    }
}

pub struct GatewayTransport {
    outbound: mpsc::UnboundedSender<Message>,
    pending: PendingReplies,
    closing: Arc<AtomicBool>,
    request_timeout: Duration,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl GatewayTransport {
    async fn request(&self, op: GatewayOp) -> Result<Value, GatewayError> {
        let id = Uuid::new_v4().to_string();
        let frame = ClientFrame::Request { id: id.clone(), op };
        let text = serde_json::to_string(&frame)
            .map_err(|err| GatewayError::UnexpectedReply(err.to_string()))?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);
        if self.outbound.send(Message::Text(text)).is_err() {
            self.pending.lock().await.remove(&id);
            return Err(GatewayError::Closed);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(GatewayError::Closed),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(GatewayError::Timeout(self.request_timeout))
            }
        }
    }
}

#[derive(Deserialize)]
struct PairingCodeReply {
    code: String,
}

#[derive(Deserialize)]
struct DownloadReply {
    data_b64: String,
}

#[async_trait]
impl Transport for GatewayTransport {
    async fn send(&self, request: &OutboundRequest) -> Result<SendReceipt> {
        let data = self
            .request(GatewayOp::Send {
                request: request.clone(),
            })
            .await?;
        Ok(serde_json::from_value::<SendReceipt>(data.clone()).unwrap_or(SendReceipt {
            message_id: None,
            raw: data,
        }))
    }

    async fn request_pairing_code(&self, phone: &str) -> Result<String> {
        let data = self
            .request(GatewayOp::RequestPairingCode {
                phone: phone.to_string(),
            })
            .await?;
        let reply: PairingCodeReply = serde_json::from_value(data)
            .map_err(|err| GatewayError::UnexpectedReply(err.to_string()))?;
        Ok(reply.code)
    }

    async fn download_media(&self, message: &WebMessageInfo) -> Result<Vec<u8>> {
        let data = self
            .request(GatewayOp::Download {
                message: message.clone(),
            })
            .await?;
        let reply: DownloadReply = serde_json::from_value(data)
            .map_err(|err| GatewayError::UnexpectedReply(err.to_string()))?;
        STANDARD
            .decode(reply.data_b64)
            .context("gateway returned invalid base64 media")
    }

    async fn close(&self) -> Result<()> {
        if self.closing.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        match tokio::time::timeout(CLOSE_ACK_TIMEOUT, self.request(GatewayOp::Close)).await {
            Ok(Ok(_)) => {}
            Ok(Err(err)) => debug!("gateway: close request not acknowledged: {err}"),
            Err(_) => debug!("gateway: close request timed out"),
        }
        let _ = self.outbound.send(Message::Close(None));
        let tasks = std::mem::take(
            &mut *self
                .tasks
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner),
        );
        for task in tasks {
            task.abort();
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/gateway_tests.rs"]
mod tests;
