use serde::{Deserialize, Serialize};
use shared::{domain::HostIdentity, message::CanonicalMessage};

pub mod config;
pub mod dispatch;
pub mod error;
pub mod event_source;
pub mod gateway;
pub mod machine;
pub mod media;
pub mod normalizer;
pub mod qr;
pub mod rotation;
mod socket;
pub mod supervisor;
pub mod transcode;
pub mod transport;

pub use config::{BrowserIdentity, ProviderConfig};
pub use dispatch::{MessageDispatcher, SendOptions};
pub use error::{DispatchError, GatewayError, MediaError};
pub use event_source::{EventSource, Subscription};
pub use media::{MediaRetriever, SaveOptions};
pub use socket::SocketSlot;
pub use supervisor::{StartOutcome, Supervisor};
pub use transport::{ConnectOptions, MissingTransportConnector, Transport, TransportConnector};

pub const QR_ACTION_TITLE: &str = "⚡⚡ ACTION REQUIRED ⚡⚡";
pub const MISSING_PHONE_INSTRUCTION: &str = "You must define the phone number in the provider";

/// Notifications the provider publishes to the host application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ProviderEvent {
    Ready(bool),
    Host(HostIdentity),
    RequireAction {
        title: String,
        instructions: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<ActionPayload>,
    },
    AuthFailure(Vec<String>),
    Notice {
        title: String,
        instructions: Vec<String>,
    },
    Message(CanonicalMessage),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ActionPayload {
    Qr(String),
    PairingCode(String),
}

impl ProviderEvent {
    pub fn scan_qr(qr: impl Into<String>) -> Self {
        Self::RequireAction {
            title: QR_ACTION_TITLE.to_string(),
            instructions: vec![
                "You must scan the QR Code".to_string(),
                "Remember that the QR code updates every minute".to_string(),
            ],
            payload: Some(ActionPayload::Qr(qr.into())),
        }
    }

    pub fn pairing_code(phone: &str, code: impl Into<String>) -> Self {
        let code = code.into();
        Self::RequireAction {
            title: QR_ACTION_TITLE.to_string(),
            instructions: vec![
                format!("Accept the WhatsApp notification from {phone} on your phone 👌"),
                format!("The token for linking is: {code}"),
            ],
            payload: Some(ActionPayload::PairingCode(code)),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Ready(_) => "ready",
            Self::Host(_) => "host",
            Self::RequireAction { .. } => "require_action",
            Self::AuthFailure(_) => "auth_failure",
            Self::Notice { .. } => "notice",
            Self::Message(_) => "message",
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support;
