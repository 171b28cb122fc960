use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shared::{
    domain::{Jid, MessageId},
    protocol::{MessageUpdate, MessagesUpsert, TransportEvent, WebMessageInfo},
};
use tokio::sync::RwLock;

pub const DEFAULT_MESSAGES_PER_CHAT: usize = 200;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatSummary {
    pub id: Jid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub last_message_timestamp: i64,
}

/// Serializable view of the cache, persisted as `session_store.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheSnapshot {
    #[serde(default)]
    pub chats: BTreeMap<Jid, ChatSummary>,
    #[serde(default)]
    pub messages: BTreeMap<Jid, Vec<WebMessageInfo>>,
}

/// Source of previously seen messages, used to resolve poll votes back to the
/// poll they belong to.
#[async_trait]
pub trait MessageLookup: Send + Sync {
    async fn load_message(&self, chat: &Jid, id: &MessageId) -> Option<WebMessageInfo>;
}

/// In-memory cache of recent chats and messages fed from the event stream.
pub struct SessionCache {
    state: RwLock<CacheSnapshot>,
    per_chat_limit: usize,
}

impl Default for SessionCache {
    fn default() -> Self {
        Self::new(DEFAULT_MESSAGES_PER_CHAT)
    }
}

impl SessionCache {
    pub fn new(per_chat_limit: usize) -> Self {
        Self {
            state: RwLock::new(CacheSnapshot::default()),
            per_chat_limit: per_chat_limit.max(1),
        }
    }

    pub async fn ingest(&self, event: &TransportEvent) {
        match event {
            TransportEvent::MessagesUpsert(upsert) => self.ingest_upsert(upsert).await,
            TransportEvent::MessagesUpdate(updates) => self.ingest_updates(updates).await,
            TransportEvent::ConnectionUpdate(_) | TransportEvent::CredentialsUpdate(_) => {}
        }
    }

    async fn ingest_upsert(&self, upsert: &MessagesUpsert) {
        let mut state = self.state.write().await;
        for message in &upsert.messages {
            let chat_id = message.key.remote_jid.clone();
            let chat = state
                .chats
                .entry(chat_id.clone())
                .or_insert_with(|| ChatSummary {
                    id: chat_id.clone(),
                    ..ChatSummary::default()
                });
            chat.last_message_timestamp = chat.last_message_timestamp.max(message.message_timestamp);
            if !message.key.from_me && chat.name.is_none() {
                chat.name = message.push_name.clone();
            }

            let messages = state.messages.entry(chat_id).or_default();
            match messages
                .iter_mut()
                .find(|existing| existing.key.id == message.key.id)
            {
                Some(existing) => {
                    let votes = std::mem::take(&mut existing.poll_updates);
                    *existing = message.clone();
                    existing.merge_poll_updates(&votes);
                }
                None => messages.push(message.clone()),
            }
            if messages.len() > self.per_chat_limit {
                let overflow = messages.len() - self.per_chat_limit;
                messages.drain(..overflow);
            }
        }
    }

    async fn ingest_updates(&self, updates: &[MessageUpdate]) {
        let mut state = self.state.write().await;
        for update in updates {
            if update.update.poll_updates.is_empty() {
                continue;
            }
            let Some(messages) = state.messages.get_mut(&update.key.remote_jid) else {
                continue;
            };
            if let Some(poll) = messages
                .iter_mut()
                .find(|message| message.key.id == update.key.id)
            {
                poll.merge_poll_updates(&update.update.poll_updates);
            }
        }
    }

    pub async fn snapshot(&self) -> CacheSnapshot {
        self.state.read().await.clone()
    }

    pub async fn restore(&self, snapshot: CacheSnapshot) {
        *self.state.write().await = snapshot;
    }

    pub async fn clear(&self) {
        *self.state.write().await = CacheSnapshot::default();
    }

    pub async fn message_count(&self) -> usize {
        self.state.read().await.messages.values().map(Vec::len).sum()
    }
}

#[async_trait]
impl MessageLookup for SessionCache {
    async fn load_message(&self, chat: &Jid, id: &MessageId) -> Option<WebMessageInfo> {
        let state = self.state.read().await;
        state
            .messages
            .get(chat)?
            .iter()
            .find(|message| &message.key.id == id)
            .cloned()
    }
}

#[cfg(test)]
#[path = "tests/cache_tests.rs"]
mod tests;
