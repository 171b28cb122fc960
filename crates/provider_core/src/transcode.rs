use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

pub const VOICE_NOTE_MIMETYPE: &str = "audio/ogg; codecs=opus";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodedAudio {
    pub path: PathBuf,
    pub mimetype: String,
}

/// Converts outbound audio into something the protocol plays as a voice note.
#[async_trait]
pub trait AudioTranscoder: Send + Sync {
    async fn to_voice_note(&self, input: &Path) -> Result<TranscodedAudio>;
}

/// Re-encodes with the `ffmpeg` binary into mono Opus in an Ogg container.
pub struct FfmpegTranscoder {
    binary: PathBuf,
}

impl Default for FfmpegTranscoder {
    fn default() -> Self {
        Self::new("ffmpeg")
    }
}

impl FfmpegTranscoder {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl AudioTranscoder for FfmpegTranscoder {
    async fn to_voice_note(&self, input: &Path) -> Result<TranscodedAudio> {
        let output = input.with_extension("voice.ogg");
        let result = Command::new(&self.binary)
            .arg("-y")
            .arg("-i")
            .arg(input)
            .args(["-vn", "-ac", "1", "-c:a", "libopus", "-b:a", "64k"])
            .arg(&output)
            .output()
            .await
            .with_context(|| format!("failed to run '{}'", self.binary.display()))?;

        if !result.status.success() {
            return Err(anyhow!(
                "ffmpeg exited with {}: {}",
                result.status,
                String::from_utf8_lossy(&result.stderr).trim()
            ));
        }
        debug!(input = %input.display(), output = %output.display(), "transcode: voice note ready");
        Ok(TranscodedAudio {
            path: output,
            mimetype: VOICE_NOTE_MIMETYPE.to_string(),
        })
    }
}

/// Sends audio as-is, typed by its file extension.
pub struct PassthroughTranscoder;

#[async_trait]
impl AudioTranscoder for PassthroughTranscoder {
    async fn to_voice_note(&self, input: &Path) -> Result<TranscodedAudio> {
        Ok(TranscodedAudio {
            path: input.to_path_buf(),
            mimetype: mime_guess::from_path(input)
                .first_or_octet_stream()
                .essence_str()
                .to_string(),
        })
    }
}
