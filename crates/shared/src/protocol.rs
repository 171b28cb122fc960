//! Raw event model as the protocol sidecar emits it (camelCase JSON).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{DisconnectReason, Jid, MessageId};

pub const EPHEMERAL_SETTING: &str = "EPHEMERAL_SETTING";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum TransportEvent {
    #[serde(rename = "connection.update")]
    ConnectionUpdate(ConnectionUpdate),
    #[serde(rename = "creds.update")]
    CredentialsUpdate(CredentialsUpdate),
    #[serde(rename = "messages.upsert")]
    MessagesUpsert(MessagesUpsert),
    #[serde(rename = "messages.update")]
    MessagesUpdate(Vec<MessageUpdate>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connection,
    Credentials,
    MessagesUpsert,
    MessagesUpdate,
}

impl TransportEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::ConnectionUpdate(_) => EventKind::Connection,
            Self::CredentialsUpdate(_) => EventKind::Credentials,
            Self::MessagesUpsert(_) => EventKind::MessagesUpsert,
            Self::MessagesUpdate(_) => EventKind::MessagesUpdate,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionPhase {
    Connecting,
    Open,
    Close,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<ConnectionPhase>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_disconnect: Option<LastDisconnect>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub me: Option<TransportUser>,
}

impl ConnectionUpdate {
    pub fn disconnect_reason(&self) -> DisconnectReason {
        DisconnectReason::from_status_code(
            self.last_disconnect
                .as_ref()
                .and_then(|last| last.status_code),
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastDisconnect {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportUser {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Rotated credential material. `creds` is a patch merged over the stored
/// credential object; a `null` key value deletes that key file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CredentialsUpdate {
    #[serde(default)]
    pub creds: Value,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub keys: BTreeMap<String, Option<Value>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertType {
    Notify,
    Append,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagesUpsert {
    pub messages: Vec<WebMessageInfo>,
    #[serde(rename = "type")]
    pub kind: UpsertType,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageKey {
    pub remote_jid: Jid,
    #[serde(default)]
    pub from_me: bool,
    pub id: MessageId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant: Option<Jid>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebMessageInfo {
    pub key: MessageKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<MessageContent>,
    #[serde(default)]
    pub message_timestamp: i64,
    #[serde(default)]
    pub broadcast: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub poll_updates: Vec<PollUpdate>,
}

impl WebMessageInfo {
    /// Folds incoming votes in, keeping only the latest vote of each voter.
    pub fn merge_poll_updates(&mut self, incoming: &[PollUpdate]) {
        for vote in incoming {
            match self
                .poll_updates
                .iter_mut()
                .find(|existing| existing.voter == vote.voter)
            {
                Some(existing) if existing.sender_timestamp_ms <= vote.sender_timestamp_ms => {
                    *existing = vote.clone();
                }
                Some(_) => {}
                None => self.poll_updates.push(vote.clone()),
            }
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extended_text_message: Option<ExtendedTextMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_message: Option<MediaMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_message: Option<MediaMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_message: Option<MediaMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_message: Option<MediaMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_with_caption_message: Option<Box<NestedMessage>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sticker_message: Option<MediaMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location_message: Option<LocationMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol_message: Option<ProtocolMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub buttons_response_message: Option<ButtonsResponseMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub list_response_message: Option<ListResponseMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poll_creation_message: Option<PollCreationMessage>,
}

impl MessageContent {
    /// Document sent with a caption arrives wrapped one level deeper.
    pub fn document(&self) -> Option<&MediaMessage> {
        self.document_message.as_ref().or_else(|| {
            self.document_with_caption_message
                .as_ref()
                .and_then(|nested| nested.message.as_ref())
                .and_then(|inner| inner.document_message.as_ref())
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NestedMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<MessageContent>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtendedTextMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mimetype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direct_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_length: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ptt: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gif_playback: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationMessage {
    pub degrees_latitude: f64,
    pub degrees_longitude: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolMessage {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ButtonsResponseMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_button_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_display_text: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListResponseMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollCreationMessage {
    pub name: String,
    #[serde(default)]
    pub options: Vec<PollOption>,
    #[serde(default)]
    pub selectable_options_count: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollOption {
    pub option_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessageUpdate {
    pub key: MessageKey,
    #[serde(default)]
    pub update: MessageUpdateBody,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageUpdateBody {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub poll_updates: Vec<PollUpdate>,
}

/// One decrypted vote. `selected_options` carries base64 SHA-256 digests of
/// the chosen option names; an empty selection retracts the voter's vote.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollUpdate {
    pub voter: Jid,
    #[serde(default)]
    pub selected_options: Vec<String>,
    #[serde(default)]
    pub sender_timestamp_ms: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_tagged_connection_update() {
        let raw = r#"{"event":"connection.update","data":{"connection":"close","lastDisconnect":{"statusCode":401}}}"#;
        let event: TransportEvent = serde_json::from_str(raw).expect("event");
        assert_eq!(event.kind(), EventKind::Connection);
        let TransportEvent::ConnectionUpdate(update) = event else {
            panic!("expected connection update");
        };
        assert_eq!(update.connection, Some(ConnectionPhase::Close));
        assert!(update.disconnect_reason().is_logged_out());
    }

    #[test]
    fn later_vote_replaces_earlier_vote_of_same_voter() {
        let mut poll = WebMessageInfo::default();
        let vote = |voter: &str, option: &str, at: i64| PollUpdate {
            voter: Jid::new(voter),
            selected_options: vec![option.to_string()],
            sender_timestamp_ms: at,
        };
        poll.merge_poll_updates(&[vote("a", "yes", 10), vote("b", "no", 10)]);
        poll.merge_poll_updates(&[vote("a", "no", 20), vote("b", "yes", 5)]);

        assert_eq!(poll.poll_updates.len(), 2);
        assert_eq!(poll.poll_updates[0].selected_options, vec!["no".to_string()]);
        assert_eq!(poll.poll_updates[1].selected_options, vec!["no".to_string()]);
    }

    #[test]
    fn unwraps_document_with_caption() {
        let raw = r#"{"documentWithCaptionMessage":{"message":{"documentMessage":{"mimetype":"application/pdf"}}}}"#;
        let content: MessageContent = serde_json::from_str(raw).expect("content");
        assert_eq!(
            content.document().and_then(|doc| doc.mimetype.as_deref()),
            Some("application/pdf")
        );
    }
}
