use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};
use storage::cache::DEFAULT_MESSAGES_PER_CHAT;

/// Client identity announced to the protocol as `[platform, browser, version]`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserIdentity {
    pub platform: String,
    pub browser: String,
    pub version: String,
}

impl Default for BrowserIdentity {
    fn default() -> Self {
        Self {
            platform: "Windows".to_string(),
            browser: "Chrome".to_string(),
            version: "Chrome 114.0.5735.198".to_string(),
        }
    }
}

impl BrowserIdentity {
    pub fn as_triple(&self) -> [&str; 3] {
        [&self.platform, &self.browser, &self.version]
    }
}

#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub bot_name: String,
    pub session_root: PathBuf,
    pub gif_playback: bool,
    pub use_pairing_code: bool,
    pub phone_number: Option<String>,
    pub browser: BrowserIdentity,
    pub use_cache: bool,
    pub cache_messages_per_chat: usize,
    pub reconnect_delay: Duration,
    pub pairing_timeout: Duration,
    pub flush_interval: Duration,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            bot_name: "bot".to_string(),
            session_root: PathBuf::from("."),
            gif_playback: false,
            use_pairing_code: false,
            phone_number: None,
            browser: BrowserIdentity::default(),
            use_cache: true,
            cache_messages_per_chat: DEFAULT_MESSAGES_PER_CHAT,
            reconnect_delay: Duration::ZERO,
            pairing_timeout: Duration::from_secs(60),
            flush_interval: Duration::from_secs(10),
        }
    }
}

impl ProviderConfig {
    pub fn new(bot_name: impl Into<String>) -> Self {
        Self {
            bot_name: bot_name.into(),
            ..Self::default()
        }
    }

    /// Pairing phone number in canonical digits form, if one is configured.
    pub fn pairing_phone(&self) -> Option<String> {
        self.phone_number
            .as_deref()
            .map(shared::number::clean_number)
            .filter(|phone| !phone.is_empty())
    }
}
