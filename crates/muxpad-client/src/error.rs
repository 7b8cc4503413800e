use thiserror::Error;

/// Errors surfaced by the connection layer.
#[derive(Debug, Error)]
pub enum LinkError {
    #[error("invalid server url: {0}")]
    InvalidUrl(String),

    #[error("connect failed: {0}")]
    Connect(String),
}

/// Errors surfaced by the upload bridge. These never affect the socket;
/// they end up as inline annotations on the rendering surface.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("upload request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("upload rejected ({status}): {body}")]
    Rejected { status: u16, body: String },
}
