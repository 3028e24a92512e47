//! Text extraction: image bytes → recognised text via an OCR service.
//!
//! The OCR engine is an external collaborator. [`TextExtractor`] is the seam
//! the controller depends on; [`HttpOcrClient`] speaks the JSON protocol of
//! the OCR gateway:
//!
//! ```text
//! POST <endpoint>   { "image": "<base64>" }
//! 200 OK            { "text": "..." }
//! ```
//!
//! With the `tesseract` feature, `local_ocr::TesseractExtractor` runs the
//! engine in-process instead.
//!
//! One call is one attempt. Retries, if any, belong to the user (a new
//! upload); transport timeouts belong to the `reqwest` client.

use crate::error::ExtractionError;
use crate::pipeline::encode;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// Default Tesseract language for the local engine.
pub const DEFAULT_OCR_LANGUAGE: &str = "eng";

/// Default request-body ceiling (10 MiB), matching the OCR gateway's limit.
pub const DEFAULT_MAX_IMAGE_BYTES: usize = 10 * 1024 * 1024;

/// Capability: recognise the text in an image.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Return the raw recognised text, possibly empty.
    async fn extract_text(&self, image: &[u8]) -> Result<String, ExtractionError>;
}

#[derive(Serialize)]
struct OcrRequest<'a> {
    image: &'a str,
}

#[derive(Debug, Deserialize)]
struct OcrResponse {
    /// The gateway sends `""` when nothing was detected; tolerate absence too.
    #[serde(default)]
    text: String,
}

/// OCR gateway client.
#[derive(Debug, Clone)]
pub struct HttpOcrClient {
    client: reqwest::Client,
    endpoint: String,
    max_image_bytes: usize,
    timeout_secs: u64,
}

impl HttpOcrClient {
    /// Build a client with its own transport timeout.
    pub fn new(
        endpoint: impl Into<String>,
        timeout_secs: u64,
        max_image_bytes: usize,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            max_image_bytes,
            timeout_secs,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl TextExtractor for HttpOcrClient {
    async fn extract_text(&self, image: &[u8]) -> Result<String, ExtractionError> {
        if image.is_empty() {
            return Err(ExtractionError::EmptyImage);
        }

        // Check before encoding so an oversized upload costs nothing.
        let size = encode::encoded_len(image.len());
        if size > self.max_image_bytes {
            return Err(ExtractionError::PayloadTooLarge {
                size,
                limit: self.max_image_bytes,
            });
        }

        let b64 = encode::encode_image(image);
        info!("Sending {} image bytes to OCR at {}", image.len(), self.endpoint);

        let response = self
            .client
            .post(&self.endpoint)
            .json(&OcrRequest { image: &b64 })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ExtractionError::Timeout {
                        secs: self.timeout_secs,
                    }
                } else {
                    ExtractionError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(ExtractionError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                ExtractionError::Timeout {
                    secs: self.timeout_secs,
                }
            } else {
                ExtractionError::Transport(e.to_string())
            }
        })?;
        let parsed: OcrResponse = serde_json::from_slice(&bytes)
            .map_err(|e| ExtractionError::MalformedResponse(e.to_string()))?;

        debug!("OCR returned {} chars", parsed.text.len());
        Ok(parsed.text)
    }
}
