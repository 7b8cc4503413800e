//! Out-of-band image upload.
//!
//! Pasted or dropped images never travel over the session socket. The
//! blob goes to the backend's container-scoped upload endpoint and the
//! returned workspace path is injected into the input stream as if the
//! user had typed it. Uploads are fire-and-forget: concurrent, never
//! retried, and discarded when the socket is gone by the time they finish.

use std::time::Duration;

use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::error::UploadError;

/// An image payload lifted out of a paste or drop event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBlob {
    pub bytes: Vec<u8>,
    pub mime: String,
    pub file_name: String,
}

/// Everything a paste/drop event carried that this layer cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PastePayload {
    pub text: Option<String>,
    pub image: Option<ImageBlob>,
}

/// What to do with a paste/drop event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PasteAction {
    /// Forward the text as typed input.
    Forward(String),
    /// Upload the image and inject the resulting path.
    Upload(ImageBlob),
    /// Nothing usable in the event.
    Ignore,
}

/// Plain text always wins over an image in the same event; an image only
/// uploads when no competing text payload exists.
pub fn classify_paste(payload: PastePayload) -> PasteAction {
    match payload.text.filter(|t| !t.is_empty()) {
        Some(text) => PasteAction::Forward(text),
        None => match payload.image {
            Some(image) => PasteAction::Upload(image),
            None => PasteAction::Ignore,
        },
    }
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    path: String,
}

/// HTTP side of the upload flow, fixed to one container for the lifetime
/// of the link.
#[derive(Debug, Clone)]
pub struct UploadBridge {
    client: reqwest::Client,
    endpoint: Url,
}

impl UploadBridge {
    pub fn new(endpoint: Url) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self { client, endpoint }
    }

    /// Upload one image; resolves to the workspace path the backend
    /// assigned it.
    pub async fn send(&self, blob: ImageBlob) -> Result<String, UploadError> {
        debug!(
            "[upload] {} bytes ({}) to {}",
            blob.bytes.len(),
            blob.mime,
            self.endpoint
        );
        let part = Part::bytes(blob.bytes)
            .file_name(blob.file_name)
            .mime_str(&blob.mime)?;
        let form = Form::new().part("file", part);

        let response = self
            .client
            .post(self.endpoint.clone())
            .multipart(form)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(UploadError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: UploadResponse = response.json().await?;
        Ok(parsed.path)
    }
}
