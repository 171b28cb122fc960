use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::{
    domain::{Direction, Jid, MediaClass, MessageId},
    protocol::WebMessageInfo,
};

const PLACEHOLDER_PREFIX: &str = "_event_";

/// Inbound message in the shape handed to the host application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalMessage {
    pub id: MessageId,
    /// Sender in canonical number form (digits only).
    pub remote_id: String,
    pub sender_name: String,
    pub body: String,
    pub direction: Direction,
    pub media_class: MediaClass,
    pub timestamp: i64,
    pub broadcast: bool,
    pub raw: WebMessageInfo,
}

/// Opaque sentinel body substituted for non-text content.
pub fn placeholder_body(class: MediaClass) -> String {
    match placeholder_tag(class) {
        Some(tag) => format!("{PLACEHOLDER_PREFIX}{tag}__{}", Uuid::new_v4()),
        None => String::new(),
    }
}

impl MediaClass {
    /// Recovers the class a placeholder body was generated for.
    pub fn from_placeholder(body: &str) -> Option<Self> {
        let rest = body.strip_prefix(PLACEHOLDER_PREFIX)?;
        let (tag, _) = rest.rsplit_once("__")?;
        [
            Self::Location,
            Self::Video,
            Self::Sticker,
            Self::Image,
            Self::Document,
            Self::Audio,
        ]
        .into_iter()
        .find(|class| placeholder_tag(*class) == Some(tag))
    }
}

fn placeholder_tag(class: MediaClass) -> Option<&'static str> {
    match class {
        MediaClass::Location => Some("location"),
        MediaClass::Video => Some("video"),
        MediaClass::Sticker => Some("sticker"),
        MediaClass::Image => Some("image"),
        MediaClass::Document => Some("document"),
        MediaClass::Audio => Some("voice_note"),
        MediaClass::None | MediaClass::Poll => None,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundRequest {
    pub recipient: Jid,
    pub content: OutboundContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quoted: Option<CanonicalMessage>,
}

impl OutboundRequest {
    pub fn new(recipient: Jid, content: OutboundContent) -> Self {
        Self {
            recipient,
            content,
            quoted: None,
        }
    }

    pub fn quoting(mut self, quoted: Option<CanonicalMessage>) -> Self {
        self.quoted = quoted;
        self
    }

    pub fn kind(&self) -> OutboundKind {
        self.content.kind()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboundKind {
    Text,
    Image,
    Video,
    Audio,
    Document,
    Buttons,
    Poll,
    Location,
    Contact,
    Presence,
    Sticker,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutboundContent {
    Text {
        text: String,
    },
    Image {
        media: MediaPayload,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
    },
    Video {
        media: MediaPayload,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
        gif_playback: bool,
    },
    Audio {
        media: MediaPayload,
        ptt: bool,
    },
    Document {
        media: MediaPayload,
        file_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        caption: Option<String>,
    },
    Buttons {
        text: String,
        buttons: Vec<Button>,
    },
    Poll {
        name: String,
        options: Vec<String>,
        selectable_count: u32,
    },
    Location {
        latitude: f64,
        longitude: f64,
    },
    Contact {
        display_name: String,
        vcard: String,
    },
    Presence {
        presence: Presence,
    },
    Sticker {
        media: MediaPayload,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pack: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        author: Option<String>,
    },
}

impl OutboundContent {
    pub fn kind(&self) -> OutboundKind {
        match self {
            Self::Text { .. } => OutboundKind::Text,
            Self::Image { .. } => OutboundKind::Image,
            Self::Video { .. } => OutboundKind::Video,
            Self::Audio { .. } => OutboundKind::Audio,
            Self::Document { .. } => OutboundKind::Document,
            Self::Buttons { .. } => OutboundKind::Buttons,
            Self::Poll { .. } => OutboundKind::Poll,
            Self::Location { .. } => OutboundKind::Location,
            Self::Contact { .. } => OutboundKind::Contact,
            Self::Presence { .. } => OutboundKind::Presence,
            Self::Sticker { .. } => OutboundKind::Sticker,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaPayload {
    pub source: MediaSource,
    pub mimetype: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MediaSource {
    Url { url: String },
    Inline { data_b64: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Button {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub body: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    Unavailable,
    Available,
    Composing,
    Recording,
    Paused,
}

/// Whatever the transport reports back for a delivered request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SendReceipt {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<MessageId>,
    #[serde(default)]
    pub raw: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_are_distinct_and_recoverable() {
        let classes = [
            MediaClass::Location,
            MediaClass::Video,
            MediaClass::Sticker,
            MediaClass::Image,
            MediaClass::Document,
            MediaClass::Audio,
        ];
        for class in classes {
            let body = placeholder_body(class);
            assert_eq!(MediaClass::from_placeholder(&body), Some(class), "{body}");
        }
        assert_ne!(
            placeholder_body(MediaClass::Image),
            placeholder_body(MediaClass::Image)
        );
    }

    #[test]
    fn plain_text_is_not_a_placeholder() {
        assert_eq!(MediaClass::from_placeholder("hello"), None);
        assert_eq!(MediaClass::from_placeholder("_event_unknown__x"), None);
    }
}
