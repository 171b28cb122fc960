use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use qrcode::{render::svg, QrCode};
use tokio::fs;
use tracing::info;

/// Writes the latest pairing QR as `<session_root>/<bot_name>.qr.svg`.
#[derive(Debug, Clone)]
pub struct QrArtifactWriter {
    path: PathBuf,
}

impl QrArtifactWriter {
    pub fn new(session_root: impl AsRef<Path>, bot_name: &str) -> Self {
        Self {
            path: session_root.as_ref().join(format!("{bot_name}.qr.svg")),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn write(&self, qr: &str) -> Result<PathBuf> {
        let svg = render_svg(qr)?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create '{}'", parent.display()))?;
        }
        fs::write(&self.path, svg)
            .await
            .with_context(|| format!("failed to write QR artifact '{}'", self.path.display()))?;

        let terminal = render_terminal(qr)?;
        info!(path = %self.path.display(), "qr: scan to link the device\n{terminal}");
        Ok(self.path.clone())
    }

    pub async fn remove(&self) {
        let _ = fs::remove_file(&self.path).await;
    }
}

pub fn render_svg(data: &str) -> Result<String> {
    let code = QrCode::new(data.as_bytes()).context("failed to encode QR payload")?;
    Ok(code
        .render::<svg::Color<'_>>()
        .min_dimensions(256, 256)
        .build())
}

pub fn render_terminal(data: &str) -> Result<String> {
    let code = QrCode::new(data.as_bytes()).context("failed to encode QR payload")?;
    Ok(code
        .render::<char>()
        .quiet_zone(true)
        .module_dimensions(2, 1)
        .build())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_svg_next_to_sessions() {
        let dir = tempfile::tempdir().expect("tempdir");
        let writer = QrArtifactWriter::new(dir.path(), "shop");

        let path = writer.write("2@abcdef,ghijkl,mnopqr").await.expect("write qr");
        assert_eq!(path, dir.path().join("shop.qr.svg"));
        let svg = std::fs::read_to_string(&path).expect("read svg");
        assert!(svg.contains("<svg"));

        writer.remove().await;
        assert!(!path.exists());
    }
}
