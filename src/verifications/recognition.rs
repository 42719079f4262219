//! Client for the external face recognition service.
//!
//! The service takes one image as multipart field `image` on `POST /api/upload`
//! and answers `{is_same, confidence, percentage, message}` or `{error}`.

use anyhow::Context;
use axum::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::RecognitionConfig;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RecognitionOutcome {
    pub is_same: bool,
    pub confidence: f64,
    #[serde(default)]
    pub percentage: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

#[async_trait]
pub trait FaceRecognizer: Send + Sync {
    async fn recognize(
        &self,
        image: Bytes,
        filename: &str,
        content_type: &str,
    ) -> anyhow::Result<RecognitionOutcome>;
}

#[derive(Deserialize)]
#[serde(untagged)]
enum UploadResponse {
    Recognized(RecognitionOutcome),
    Failed { error: String },
}

pub struct HttpFaceRecognizer {
    client: reqwest::Client,
    base_url: String,
}

impl HttpFaceRecognizer {
    pub fn new(cfg: &RecognitionConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(cfg.timeout())
            .build()
            .context("build recognition http client")?;
        Ok(Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl FaceRecognizer for HttpFaceRecognizer {
    async fn recognize(
        &self,
        image: Bytes,
        filename: &str,
        content_type: &str,
    ) -> anyhow::Result<RecognitionOutcome> {
        let part = Part::bytes(image.to_vec())
            .file_name(filename.to_string())
            .mime_str(content_type)
            .context("recognition part mime")?;
        let form = Form::new().part("image", part);

        let res = self
            .client
            .post(format!("{}/api/upload", self.base_url))
            .multipart(form)
            .send()
            .await
            .context("recognition request")?;

        let status = res.status();
        let body: UploadResponse = res
            .json()
            .await
            .with_context(|| format!("recognition response ({status})"))?;

        match body {
            UploadResponse::Recognized(outcome) if status.is_success() => {
                debug!(is_same = outcome.is_same, confidence = outcome.confidence, "face recognized");
                Ok(outcome)
            }
            UploadResponse::Recognized(_) => anyhow::bail!("recognition service returned {status}"),
            UploadResponse::Failed { error } => {
                warn!(%status, error = %error, "recognition service refused image");
                anyhow::bail!("recognition service error: {error}")
            }
        }
    }
}
