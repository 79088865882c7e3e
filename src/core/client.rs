//! Side endpoints of the backend service: feedback, the studio mirror, the
//! social media agent and vision-to-code.

use std::fmt;
use std::path::Path;

use futures_util::StreamExt;
use reqwest::multipart::{Form, Part};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::api::{
    FeedbackRequest, SocialRequest, SocialResponse, SocialResults, StudioWriteRequest,
};
use crate::core::api_error::summarize_api_error;
use crate::core::backend::ChunkSink;
use crate::core::message::FeedbackScore;
use crate::utils::url::endpoint_url;
use crate::utils::utf8::Utf8StreamDecoder;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    Request(String),
    Status { status: u16, body: String },
    /// The service answered but reported a failure in its payload.
    Rejected(String),
    Io(String),
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceError::Request(msg) => write!(f, "Request failed: {msg}"),
            ServiceError::Status { status, body } => {
                write!(f, "{}", summarize_api_error(*status, body))
            }
            ServiceError::Rejected(msg) => write!(f, "{msg}"),
            ServiceError::Io(msg) => write!(f, "I/O error: {msg}"),
        }
    }
}

impl std::error::Error for ServiceError {}

impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        ServiceError::Request(err.to_string())
    }
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ServiceError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ServiceError::Status {
        status: status.as_u16(),
        body,
    })
}

pub(crate) fn image_mime(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}

#[derive(Debug, Clone)]
pub struct BackendClient {
    client: reqwest::Client,
    service_url: String,
    studio_url: String,
}

impl BackendClient {
    pub fn new(
        client: reqwest::Client,
        service_url: impl Into<String>,
        studio_url: impl Into<String>,
    ) -> Self {
        Self {
            client,
            service_url: service_url.into(),
            studio_url: studio_url.into(),
        }
    }

    /// Returns whether the service accepted the score.
    pub async fn send_feedback(&self, trace_id: &str, score: FeedbackScore) -> bool {
        let request = FeedbackRequest {
            trace_id,
            score: score.as_u8(),
        };
        let result = self
            .client
            .post(endpoint_url(&self.service_url, "/api/feedback"))
            .json(&request)
            .send()
            .await;
        match result {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                warn!(status = %response.status(), trace_id, "feedback rejected");
                false
            }
            Err(err) => {
                warn!(error = %err, trace_id, "feedback request failed");
                false
            }
        }
    }

    pub async fn mirror_studio(&self, content: &str) -> Result<(), ServiceError> {
        let response = self
            .client
            .post(endpoint_url(&self.studio_url, "/api/studio/write"))
            .json(&StudioWriteRequest { content })
            .send()
            .await?;
        ensure_success(response).await.map(|_| ())
    }

    pub async fn run_social_agent(&self, feature_desc: &str) -> Result<SocialResults, ServiceError> {
        let response = self
            .client
            .post(endpoint_url(&self.service_url, "/api/agents/social"))
            .json(&SocialRequest { feature_desc })
            .send()
            .await?;
        let body: SocialResponse = ensure_success(response)
            .await?
            .json()
            .await
            .map_err(|err| ServiceError::Rejected(format!("Unreadable agent response: {err}")))?;

        if body.status == "success" {
            Ok(body.results.unwrap_or_default())
        } else {
            Err(ServiceError::Rejected(
                body.message
                    .unwrap_or_else(|| format!("Social agent returned status {}", body.status)),
            ))
        }
    }

    /// Uploads an image and streams the generated code back through
    /// `on_chunk`. Returns everything received, including on cancellation.
    pub async fn generate_from_image(
        &self,
        path: &Path,
        on_chunk: &mut ChunkSink<'_>,
        cancel: &CancellationToken,
    ) -> Result<String, ServiceError> {
        let data = tokio::fs::read(path)
            .await
            .map_err(|err| ServiceError::Io(format!("{}: {err}", path.display())))?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        let part = Part::bytes(data)
            .file_name(file_name)
            .mime_str(image_mime(path))?;
        let form = Form::new().part("file", part);

        let response = self
            .client
            .post(endpoint_url(&self.service_url, "/api/vision/generate"))
            .multipart(form)
            .send()
            .await?;
        let mut bytes = ensure_success(response).await?.bytes_stream();

        let mut decoder = Utf8StreamDecoder::new();
        let mut output = String::new();
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("vision generation cancelled");
                    return Ok(output);
                }
                next = bytes.next() => next,
            };
            let text = match next {
                Some(Ok(chunk)) => decoder.decode(&chunk),
                Some(Err(err)) => return Err(err.into()),
                None => break,
            };
            if !text.is_empty() {
                on_chunk(&text);
                output.push_str(&text);
            }
        }
        let tail = decoder.finish();
        if !tail.is_empty() {
            on_chunk(&tail);
            output.push_str(&tail);
        }
        Ok(output)
    }
}
