use std::path::PathBuf;

use chrono::Utc;
use shared::protocol::WebMessageInfo;
use tokio::fs;
use tracing::info;

use crate::{error::MediaError, socket::SocketSlot};

#[derive(Debug, Clone, Default)]
pub struct SaveOptions {
    /// Target directory; the system temp dir when unset.
    pub path: Option<PathBuf>,
}

/// MIME type of a message's media, looked up in image, video and then
/// document content.
pub fn media_mimetype(envelope: &WebMessageInfo) -> Option<&str> {
    let content = envelope.message.as_ref()?;
    [
        content.image_message.as_ref(),
        content.video_message.as_ref(),
        content.document(),
    ]
    .into_iter()
    .flatten()
    .filter_map(|media| media.mimetype.as_deref())
    .find(|mimetype| !mimetype.trim().is_empty())
}

pub fn extension_for(mimetype: &str) -> String {
    let essence = mimetype
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    let subtype = essence.rsplit('/').next().filter(|subtype| !subtype.is_empty());
    // Known extensions come back sorted, so prefer the one naming the subtype.
    if let Some(exts) = mime_guess::get_mime_extensions_str(&essence) {
        if let Some(ext) = subtype.and_then(|subtype| exts.iter().find(|ext| **ext == subtype)) {
            return (*ext).to_string();
        }
        if let Some(ext) = exts.first() {
            return (*ext).to_string();
        }
    }
    subtype.unwrap_or("bin").to_string()
}

#[derive(Clone)]
pub struct MediaRetriever {
    socket: SocketSlot,
}

impl MediaRetriever {
    pub fn new(socket: SocketSlot) -> Self {
        Self { socket }
    }

    /// Downloads the message's media and writes it as `file-<unix_millis>.<ext>`.
    pub async fn save_file(
        &self,
        envelope: &WebMessageInfo,
        options: &SaveOptions,
    ) -> Result<PathBuf, MediaError> {
        let mimetype = media_mimetype(envelope).ok_or(MediaError::MimeTypeNotFound)?;
        let extension = extension_for(mimetype);

        let transport = self
            .socket
            .open_transport()
            .await
            .map_err(|_| MediaError::NotConnected)?;
        let bytes = transport
            .download_media(envelope)
            .await
            .map_err(MediaError::Download)?;

        let dir = options.path.clone().unwrap_or_else(std::env::temp_dir);
        fs::create_dir_all(&dir).await?;
        let target = dir.join(format!("file-{}.{extension}", Utc::now().timestamp_millis()));
        fs::write(&target, &bytes).await?;

        info!(
            id = %envelope.key.id,
            bytes = bytes.len(),
            path = %target.display(),
            "media: saved inbound file"
        );
        Ok(target)
    }
}

#[cfg(test)]
#[path = "tests/media_tests.rs"]
mod tests;
