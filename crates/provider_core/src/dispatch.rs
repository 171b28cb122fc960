use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{anyhow, Context};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::{header::CONTENT_TYPE, Client};
use shared::{
    domain::Jid,
    message::{
        Button, CanonicalMessage, MediaPayload, MediaSource, OutboundContent, OutboundRequest,
        Presence, SendReceipt,
    },
    number::{clean_number, to_jid},
};
use tokio::{fs, sync::broadcast};
use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use crate::{
    error::DispatchError,
    media::extension_for,
    socket::SocketSlot,
    transcode::{AudioTranscoder, FfmpegTranscoder},
    ProviderEvent,
};

const OCTET_STREAM: &str = "application/octet-stream";
const STICKER_MIMETYPE: &str = "image/webp";

#[derive(Debug, Clone, Default)]
pub struct SendOptions {
    pub buttons: Vec<Button>,
    /// Remote URL or local path of a file to attach.
    pub media: Option<String>,
    pub quoted: Option<CanonicalMessage>,
}

struct LocalMedia {
    path: PathBuf,
    mimetype: String,
    downloaded: bool,
}

impl LocalMedia {
    async fn discard(self) {
        if self.downloaded {
            if let Err(err) = fs::remove_file(&self.path).await {
                debug!(path = %self.path.display(), "dispatch: temp media not removed: {err}");
            }
        }
    }
}

pub struct MessageDispatcher {
    socket: SocketSlot,
    events: broadcast::Sender<ProviderEvent>,
    http: Client,
    transcoder: Arc<dyn AudioTranscoder>,
    gif_playback: bool,
    scratch_dir: PathBuf,
}

impl MessageDispatcher {
    pub fn new(
        socket: SocketSlot,
        events: broadcast::Sender<ProviderEvent>,
        gif_playback: bool,
    ) -> Self {
        Self {
            socket,
            events,
            http: Client::new(),
            transcoder: Arc::new(FfmpegTranscoder::default()),
            gif_playback,
            scratch_dir: std::env::temp_dir(),
        }
    }

    pub fn with_transcoder(mut self, transcoder: Arc<dyn AudioTranscoder>) -> Self {
        self.transcoder = transcoder;
        self
    }

    /// Where downloaded media is staged before sending.
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }

    pub async fn send_message(
        &self,
        recipient: &str,
        text: &str,
        options: SendOptions,
    ) -> Result<SendReceipt, DispatchError> {
        if !options.buttons.is_empty() {
            return self.send_buttons(recipient, text, options.buttons).await;
        }
        if let Some(media) = options.media.as_deref() {
            return self.send_media(recipient, media, text).await;
        }
        self.send_text(recipient, text, options.quoted).await
    }

    pub async fn send_text(
        &self,
        recipient: &str,
        text: &str,
        quoted: Option<CanonicalMessage>,
    ) -> Result<SendReceipt, DispatchError> {
        let request = OutboundRequest::new(
            recipient_jid(recipient)?,
            OutboundContent::Text {
                text: text.to_string(),
            },
        )
        .quoting(quoted);
        self.deliver(request).await
    }

    /// Resolves `media` (URL or local path), detects its type and sends it as
    /// image, video, voice note or document.
    pub async fn send_media(
        &self,
        recipient: &str,
        media: &str,
        caption: &str,
    ) -> Result<SendReceipt, DispatchError> {
        let jid = recipient_jid(recipient)?;
        self.socket.open_transport().await?;

        let local = self.resolve_media(media).await?;
        let result = match local.mimetype.split('/').next().unwrap_or_default() {
            "image" => self.image_request(jid, &local, caption).await,
            "video" => self.video_request(jid, &local, caption).await,
            "audio" => self.audio_request(jid, &local.path).await,
            _ => self.file_request(jid, &local, caption).await,
        };
        local.discard().await;
        self.deliver(result?).await
    }

    pub async fn send_image(
        &self,
        recipient: &str,
        path: &Path,
        caption: &str,
    ) -> Result<SendReceipt, DispatchError> {
        let request = self
            .image_request(recipient_jid(recipient)?, &local_file(path)?, caption)
            .await?;
        self.deliver(request).await
    }

    pub async fn send_video(
        &self,
        recipient: &str,
        path: &Path,
        caption: &str,
    ) -> Result<SendReceipt, DispatchError> {
        let request = self
            .video_request(recipient_jid(recipient)?, &local_file(path)?, caption)
            .await?;
        self.deliver(request).await
    }

    pub async fn send_audio(&self, recipient: &str, path: &Path) -> Result<SendReceipt, DispatchError> {
        let request = self.audio_request(recipient_jid(recipient)?, path).await?;
        self.deliver(request).await
    }

    pub async fn send_file(
        &self,
        recipient: &str,
        path: &Path,
        caption: &str,
    ) -> Result<SendReceipt, DispatchError> {
        let request = self
            .file_request(recipient_jid(recipient)?, &local_file(path)?, caption)
            .await?;
        self.deliver(request).await
    }

    /// Buttons are no longer rendered by the protocol; a deprecation notice is
    /// published and the request is still sent.
    pub async fn send_buttons(
        &self,
        recipient: &str,
        text: &str,
        buttons: Vec<Button>,
    ) -> Result<SendReceipt, DispatchError> {
        let _ = self.events.send(ProviderEvent::Notice {
            title: "DEPRECATED".to_string(),
            instructions: vec![
                "Currently sending buttons is not available with this provider".to_string(),
                "this function is available with Meta or Twilio".to_string(),
            ],
        });
        let request = OutboundRequest::new(
            recipient_jid(recipient)?,
            OutboundContent::Buttons {
                text: text.to_string(),
                buttons,
            },
        );
        self.deliver(request).await
    }

    /// Returns `Ok(None)` without sending when fewer than two options are given.
    pub async fn send_poll(
        &self,
        recipient: &str,
        name: &str,
        options: &[String],
        selectable_count: u32,
    ) -> Result<Option<SendReceipt>, DispatchError> {
        if options.len() < 2 {
            return Ok(None);
        }
        let request = OutboundRequest::new(
            recipient_jid(recipient)?,
            OutboundContent::Poll {
                name: name.to_string(),
                options: options.to_vec(),
                selectable_count: selectable_count.max(1),
            },
        );
        self.deliver(request).await.map(Some)
    }

    pub async fn send_location(
        &self,
        recipient: &str,
        latitude: f64,
        longitude: f64,
    ) -> Result<SendReceipt, DispatchError> {
        let request = OutboundRequest::new(
            recipient_jid(recipient)?,
            OutboundContent::Location {
                latitude,
                longitude,
            },
        );
        self.deliver(request).await
    }

    pub async fn send_contact(
        &self,
        recipient: &str,
        contact_number: &str,
        display_name: &str,
        organization: Option<&str>,
    ) -> Result<SendReceipt, DispatchError> {
        let request = OutboundRequest::new(
            recipient_jid(recipient)?,
            OutboundContent::Contact {
                display_name: display_name.to_string(),
                vcard: build_vcard(display_name, organization, contact_number),
            },
        );
        self.deliver(request).await
    }

    pub async fn send_presence_update(
        &self,
        recipient: &str,
        presence: Presence,
    ) -> Result<SendReceipt, DispatchError> {
        let request = OutboundRequest::new(
            recipient_jid(recipient)?,
            OutboundContent::Presence { presence },
        );
        self.deliver(request).await
    }

    pub async fn send_sticker(
        &self,
        recipient: &str,
        media: &str,
        pack: Option<&str>,
        author: Option<&str>,
    ) -> Result<SendReceipt, DispatchError> {
        let jid = recipient_jid(recipient)?;
        let local = self.resolve_media(media).await?;
        if local.mimetype != STICKER_MIMETYPE {
            let mimetype = local.mimetype.clone();
            local.discard().await;
            return Err(DispatchError::Media(anyhow!(
                "stickers must be {STICKER_MIMETYPE}, got {mimetype}"
            )));
        }
        let payload = inline_payload(&local.path, STICKER_MIMETYPE).await;
        local.discard().await;
        let request = OutboundRequest::new(
            jid,
            OutboundContent::Sticker {
                media: payload?,
                pack: pack.map(str::to_string),
                author: author.map(str::to_string),
            },
        );
        self.deliver(request).await
    }

    async fn deliver(&self, request: OutboundRequest) -> Result<SendReceipt, DispatchError> {
        let transport = self.socket.open_transport().await?;
        let kind = request.kind();
        match transport.send(&request).await {
            Ok(receipt) => {
                debug!(recipient = %request.recipient, ?kind, "dispatch: sent");
                Ok(receipt)
            }
            Err(err) => {
                warn!(recipient = %request.recipient, ?kind, "dispatch: send failed: {err:#}");
                Err(DispatchError::Transport(err))
            }
        }
    }

    async fn image_request(
        &self,
        recipient: Jid,
        media: &LocalMedia,
        caption: &str,
    ) -> Result<OutboundRequest, DispatchError> {
        Ok(OutboundRequest::new(
            recipient,
            OutboundContent::Image {
                media: inline_payload(&media.path, &media.mimetype).await?,
                caption: non_empty(caption),
            },
        ))
    }

    async fn video_request(
        &self,
        recipient: Jid,
        media: &LocalMedia,
        caption: &str,
    ) -> Result<OutboundRequest, DispatchError> {
        Ok(OutboundRequest::new(
            recipient,
            OutboundContent::Video {
                media: inline_payload(&media.path, &media.mimetype).await?,
                caption: non_empty(caption),
                gif_playback: self.gif_playback,
            },
        ))
    }

    async fn audio_request(&self, recipient: Jid, path: &Path) -> Result<OutboundRequest, DispatchError> {
        let voice = self
            .transcoder
            .to_voice_note(path)
            .await
            .map_err(DispatchError::Media)?;
        let payload = inline_payload(&voice.path, &voice.mimetype).await;
        if voice.path != path {
            let _ = fs::remove_file(&voice.path).await;
        }
        Ok(OutboundRequest::new(
            recipient,
            OutboundContent::Audio {
                media: payload?,
                ptt: true,
            },
        ))
    }

    async fn file_request(
        &self,
        recipient: Jid,
        media: &LocalMedia,
        caption: &str,
    ) -> Result<OutboundRequest, DispatchError> {
        let file_name = media
            .path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("file")
            .to_string();
        Ok(OutboundRequest::new(
            recipient,
            OutboundContent::Document {
                media: inline_payload(&media.path, &media.mimetype).await?,
                file_name,
                caption: non_empty(caption),
            },
        ))
    }

    async fn resolve_media(&self, media: &str) -> Result<LocalMedia, DispatchError> {
        if media.starts_with("http://") || media.starts_with("https://") {
            return self
                .download(media)
                .await
                .map_err(DispatchError::Media);
        }
        let path = PathBuf::from(media);
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Err(DispatchError::Media(anyhow!(
                "media file '{}' does not exist",
                path.display()
            )));
        }
        local_file(&path)
    }

    async fn download(&self, media: &str) -> anyhow::Result<LocalMedia> {
        let url = Url::parse(media).with_context(|| format!("invalid media url '{media}'"))?;
        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("failed to fetch '{url}'"))?
            .error_for_status()?;

        let declared = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.split(';').next().unwrap_or_default().trim().to_string())
            .filter(|value| !value.is_empty() && value != OCTET_STREAM);
        let mimetype = declared
            .or_else(|| {
                mime_guess::from_path(url.path())
                    .first()
                    .map(|mime| mime.essence_str().to_string())
            })
            .unwrap_or_else(|| OCTET_STREAM.to_string());

        let bytes = response.bytes().await?;
        let stem = url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|name| !name.is_empty())
            .unwrap_or("media");
        let mut file_name = format!("{}-{stem}", Uuid::new_v4());
        if Path::new(stem).extension().is_none() {
            file_name = format!("{file_name}.{}", extension_for(&mimetype));
        }

        fs::create_dir_all(&self.scratch_dir).await?;
        let path = self.scratch_dir.join(file_name);
        fs::write(&path, &bytes)
            .await
            .with_context(|| format!("failed to stage '{}'", path.display()))?;
        debug!(%url, %mimetype, bytes = bytes.len(), "dispatch: media downloaded");

        Ok(LocalMedia {
            path,
            mimetype,
            downloaded: true,
        })
    }
}

fn local_file(path: &Path) -> Result<LocalMedia, DispatchError> {
    Ok(LocalMedia {
        path: path.to_path_buf(),
        mimetype: mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string(),
        downloaded: false,
    })
}

async fn inline_payload(path: &Path, mimetype: &str) -> Result<MediaPayload, DispatchError> {
    let bytes = fs::read(path)
        .await
        .with_context(|| format!("failed to read '{}'", path.display()))
        .map_err(DispatchError::Media)?;
    Ok(MediaPayload {
        source: MediaSource::Inline {
            data_b64: STANDARD.encode(bytes),
        },
        mimetype: mimetype.to_string(),
    })
}

fn non_empty(text: &str) -> Option<String> {
    (!text.is_empty()).then(|| text.to_string())
}

/// Group addresses pass through; anything else must reduce to a number.
pub fn recipient_jid(recipient: &str) -> Result<Jid, DispatchError> {
    if recipient.ends_with("@g.us") {
        return Ok(Jid::new(recipient));
    }
    let number = clean_number(recipient);
    if number.is_empty() || !number.chars().all(|c| c.is_ascii_digit()) {
        return Err(DispatchError::InvalidRecipient(recipient.to_string()));
    }
    Ok(to_jid(&number))
}

fn escape_vcard_text(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => escaped.push_str("\\\\"),
            '\n' => escaped.push_str("\\n"),
            '\r' => {}
            ',' => escaped.push_str("\\,"),
            ';' => escaped.push_str("\\;"),
            other => escaped.push(other),
        }
    }
    escaped
}

pub fn build_vcard(display_name: &str, organization: Option<&str>, number: &str) -> String {
    let digits: String = number.chars().filter(char::is_ascii_digit).collect();
    format!(
        "BEGIN:VCARD\nVERSION:3.0\nFN:{}\nORG:{};\nTEL;type=CELL;type=VOICE;waid={digits}:+{digits}\nEND:VCARD",
        escape_vcard_text(display_name),
        escape_vcard_text(organization.unwrap_or_default()),
    )
}

#[cfg(test)]
#[path = "tests/dispatch_tests.rs"]
mod tests;
