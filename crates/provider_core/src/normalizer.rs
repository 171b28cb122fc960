use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use sha2::{Digest, Sha256};
use shared::{
    domain::{Direction, Jid, MediaClass},
    message::{placeholder_body, CanonicalMessage},
    number::{clean_number, is_valid_number, STATUS_BROADCAST},
    protocol::{
        MessageContent, MessageUpdate, MessagesUpsert, PollCreationMessage, PollUpdate,
        TransportEvent, UpsertType, WebMessageInfo, EPHEMERAL_SETTING,
    },
};
use storage::MessageLookup;
use tracing::debug;

type Classifier = fn(&MessageContent) -> bool;

/// First match wins.
const CLASSIFIERS: [(Classifier, MediaClass); 6] = [
    (|c: &MessageContent| c.image_message.is_some(), MediaClass::Image),
    (|c: &MessageContent| c.video_message.is_some(), MediaClass::Video),
    (|c: &MessageContent| c.sticker_message.is_some(), MediaClass::Sticker),
    (|c: &MessageContent| c.document().is_some(), MediaClass::Document),
    (|c: &MessageContent| c.audio_message.is_some(), MediaClass::Audio),
    (|c: &MessageContent| c.location_message.is_some(), MediaClass::Location),
];

pub fn classify(content: &MessageContent) -> MediaClass {
    CLASSIFIERS
        .iter()
        .find(|(matches, _)| matches(content))
        .map(|(_, class)| *class)
        .unwrap_or_default()
}

fn text_body(content: &MessageContent) -> Option<&str> {
    content.conversation.as_deref().or_else(|| {
        content
            .extended_text_message
            .as_ref()
            .and_then(|extended| extended.text.as_deref())
    })
}

fn is_ephemeral_setting(content: &MessageContent) -> bool {
    content
        .protocol_message
        .as_ref()
        .and_then(|protocol| protocol.kind.as_deref())
        == Some(EPHEMERAL_SETTING)
}

/// Base64 SHA-256 of an option name, the form votes reference options by.
pub fn option_digest(option_name: &str) -> String {
    STANDARD.encode(Sha256::digest(option_name.as_bytes()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollTally {
    pub name: String,
    pub voters: Vec<Jid>,
}

/// Counts each voter's latest selection against the poll's options, in the
/// order the poll declares them.
pub fn aggregate_votes(poll: &PollCreationMessage, votes: &[PollUpdate]) -> Vec<PollTally> {
    poll.options
        .iter()
        .map(|option| {
            let digest = option_digest(&option.option_name);
            let voters = votes
                .iter()
                .filter(|vote| vote.selected_options.iter().any(|s| *s == digest))
                .map(|vote| vote.voter.clone())
                .collect();
            PollTally {
                name: option.option_name.clone(),
                voters,
            }
        })
        .collect()
}

#[derive(Default, Clone)]
pub struct EventNormalizer {
    lookup: Option<Arc<dyn MessageLookup>>,
}

impl EventNormalizer {
    pub fn new(lookup: Option<Arc<dyn MessageLookup>>) -> Self {
        Self { lookup }
    }

    pub async fn normalize(&self, event: &TransportEvent) -> Vec<CanonicalMessage> {
        match event {
            TransportEvent::MessagesUpsert(batch) => self.normalize_upsert(batch),
            TransportEvent::MessagesUpdate(updates) => self.normalize_poll_updates(updates).await,
            TransportEvent::ConnectionUpdate(_) | TransportEvent::CredentialsUpdate(_) => {
                Vec::new()
            }
        }
    }

    pub fn normalize_upsert(&self, batch: &MessagesUpsert) -> Vec<CanonicalMessage> {
        if batch.kind != UpsertType::Notify {
            return Vec::new();
        }
        batch
            .messages
            .iter()
            .filter_map(normalize_message)
            .collect()
    }

    pub async fn normalize_poll_updates(&self, updates: &[MessageUpdate]) -> Vec<CanonicalMessage> {
        let mut messages = Vec::new();
        for update in updates {
            let votes = &update.update.poll_updates;
            if votes.is_empty() {
                continue;
            }
            let cached = match &self.lookup {
                Some(lookup) => {
                    lookup
                        .load_message(&update.key.remote_jid, &update.key.id)
                        .await
                }
                None => None,
            };
            let message = match cached {
                Some(original) if poll_of(&original).is_some() => poll_snapshot(original, votes),
                _ => {
                    debug!(
                        chat = %update.key.remote_jid,
                        id = %update.key.id,
                        "normalizer: poll not cached, emitting empty snapshot"
                    );
                    empty_poll_snapshot(update)
                }
            };
            messages.push(message);
        }
        messages
    }
}

fn normalize_message(raw: &WebMessageInfo) -> Option<CanonicalMessage> {
    let content = raw.message.as_ref()?;
    if is_ephemeral_setting(content) {
        return None;
    }

    let media_class = classify(content);
    let mut body = match text_body(content) {
        Some(text) => text.to_string(),
        None => placeholder_body(media_class),
    };

    let sender = raw.key.remote_jid.as_str();
    if sender == STATUS_BROADCAST || raw.key.from_me {
        return None;
    }
    if !is_valid_number(sender) {
        debug!(sender, "normalizer: dropping message from invalid sender");
        return None;
    }

    if let Some(text) = content
        .buttons_response_message
        .as_ref()
        .and_then(|reply| reply.selected_display_text.as_deref())
    {
        body = text.to_string();
    }
    if let Some(title) = content
        .list_response_message
        .as_ref()
        .and_then(|reply| reply.title.as_deref())
    {
        body = title.to_string();
    }

    Some(CanonicalMessage {
        id: raw.key.id.clone(),
        remote_id: clean_number(sender),
        sender_name: raw.push_name.clone().unwrap_or_default(),
        body,
        direction: Direction::Inbound,
        media_class,
        timestamp: raw.message_timestamp,
        broadcast: raw.broadcast,
        raw: raw.clone(),
    })
}

fn poll_of(message: &WebMessageInfo) -> Option<&PollCreationMessage> {
    message.message.as_ref()?.poll_creation_message.as_ref()
}

fn poll_snapshot(mut original: WebMessageInfo, delta: &[PollUpdate]) -> CanonicalMessage {
    original.merge_poll_updates(delta);
    let body = poll_of(&original)
        .map(|poll| aggregate_votes(poll, &original.poll_updates))
        .and_then(|tally| tally.into_iter().find(|option| !option.voters.is_empty()))
        .map(|option| option.name)
        .unwrap_or_default();

    CanonicalMessage {
        id: original.key.id.clone(),
        remote_id: clean_number(original.key.remote_jid.as_str()),
        sender_name: original.push_name.clone().unwrap_or_default(),
        body,
        direction: Direction::Inbound,
        media_class: MediaClass::Poll,
        timestamp: original.message_timestamp,
        broadcast: original.broadcast,
        raw: original,
    }
}

fn empty_poll_snapshot(update: &MessageUpdate) -> CanonicalMessage {
    CanonicalMessage {
        id: update.key.id.clone(),
        remote_id: clean_number(update.key.remote_jid.as_str()),
        sender_name: String::new(),
        body: String::new(),
        direction: Direction::Inbound,
        media_class: MediaClass::Poll,
        timestamp: 0,
        broadcast: false,
        raw: WebMessageInfo {
            key: update.key.clone(),
            poll_updates: update.update.poll_updates.clone(),
            ..WebMessageInfo::default()
        },
    }
}

#[cfg(test)]
#[path = "tests/normalizer_tests.rs"]
mod tests;
