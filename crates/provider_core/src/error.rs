use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no open connection to dispatch through")]
    NotConnected,
    #[error("invalid recipient '{0}'")]
    InvalidRecipient(String),
    #[error("failed to prepare media: {0}")]
    Media(#[source] anyhow::Error),
    #[error("transport rejected request: {0}")]
    Transport(#[source] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("MIME type not found")]
    MimeTypeNotFound,
    #[error("no open connection to download through")]
    NotConnected,
    #[error("failed to download media: {0}")]
    Download(#[source] anyhow::Error),
    #[error("failed to write media file: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("invalid gateway url: {0}")]
    InvalidUrl(String),
    #[error("gateway connection closed")]
    Closed,
    #[error("gateway request timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("gateway rejected request: {0}")]
    Rejected(String),
    #[error("unexpected gateway reply: {0}")]
    UnexpectedReply(String),
}
