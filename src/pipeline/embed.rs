//! Embedding generation: (model, text) → [`EmbeddingVector`].
//!
//! [`Embedder`] is the seam the controller depends on. [`HttpEmbeddingClient`]
//! talks to a feature-extraction endpoint such as the Hugging Face inference
//! API:
//!
//! ```text
//! POST <endpoint with {model} substituted>
//!      { "model": "<id>", "inputs": "<text>" }
//! 200  [0.1, 0.2, ...]            single embedding
//!  or  [[0.1, 0.2, ...], ...]     batch; the first row is the answer
//! ```
//!
//! Every returned vector is stamped with the id of the model that was asked,
//! so a vector can never be attributed to a different model downstream.

use crate::catalog::EmbeddingModel;
use crate::error::EmbeddingError;
use crate::pipeline::normalize;
use crate::record::EmbeddingVector;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

/// Default Hugging Face feature-extraction endpoint template.
pub const DEFAULT_EMBEDDING_ENDPOINT: &str =
    "https://api-inference.huggingface.co/pipeline/feature-extraction/{model}";

/// Capability: embed a piece of text with a given model.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Implementations must stamp the result with `model.id`.
    async fn embed(&self, model: &EmbeddingModel, text: &str)
        -> Result<EmbeddingVector, EmbeddingError>;
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    inputs: &'a str,
}

/// Either shape the feature-extraction pipeline returns for one input.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FeatureExtractionResponse {
    Single(Vec<f32>),
    Batch(Vec<Vec<f32>>),
}

/// Decode a feature-extraction body into the single embedding it carries.
pub(crate) fn parse_embedding_body(
    model: &EmbeddingModel,
    body: &[u8],
) -> Result<EmbeddingVector, EmbeddingError> {
    let unexpected = |detail: String| EmbeddingError::UnexpectedShape {
        model: model.id.clone(),
        detail,
    };

    let parsed: FeatureExtractionResponse = serde_json::from_slice(body).map_err(|_| {
        let preview: String = String::from_utf8_lossy(body).chars().take(120).collect();
        unexpected(format!("expected a numeric array or array of arrays, got: {preview}"))
    })?;

    let values = match parsed {
        FeatureExtractionResponse::Single(v) => v,
        FeatureExtractionResponse::Batch(rows) => rows
            .into_iter()
            .next()
            .ok_or_else(|| unexpected("batch response contained no rows".to_string()))?,
    };

    if values.is_empty() {
        return Err(unexpected("embedding is empty".to_string()));
    }
    Ok(EmbeddingVector::new(model, values))
}

/// Feature-extraction HTTP client.
#[derive(Clone)]
pub struct HttpEmbeddingClient {
    client: reqwest::Client,
    endpoint_template: String,
    api_key: Option<String>,
    timeout_secs: u64,
}

impl std::fmt::Debug for HttpEmbeddingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpEmbeddingClient")
            .field("endpoint_template", &self.endpoint_template)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl HttpEmbeddingClient {
    /// `endpoint_template` may contain `{model}`, replaced per request.
    pub fn new(
        endpoint_template: impl Into<String>,
        api_key: Option<String>,
        timeout_secs: u64,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint_template: endpoint_template.into(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            timeout_secs,
        })
    }

    /// Resolve the request URL for a model.
    pub fn endpoint_for(&self, model: &EmbeddingModel) -> String {
        self.endpoint_template.replace("{model}", &model.id)
    }

    fn transport_error(&self, e: reqwest::Error) -> EmbeddingError {
        if e.is_timeout() {
            EmbeddingError::Timeout {
                secs: self.timeout_secs,
            }
        } else {
            EmbeddingError::Transport(e.to_string())
        }
    }
}

#[async_trait]
impl Embedder for HttpEmbeddingClient {
    async fn embed(
        &self,
        model: &EmbeddingModel,
        text: &str,
    ) -> Result<EmbeddingVector, EmbeddingError> {
        if normalize::is_sentinel(text) {
            return Err(EmbeddingError::NoText);
        }

        let url = self.endpoint_for(model);
        info!("Embedding {} chars with {}", text.len(), model.id);

        let mut request = self.client.post(&url).json(&EmbeddingRequest {
            model: &model.id,
            inputs: text,
        });
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key.trim());
        }

        let response = request.send().await.map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(EmbeddingError::Status {
                model: model.id.clone(),
                status: status.as_u16(),
                body,
            });
        }

        let body = response.bytes().await.map_err(|e| self.transport_error(e))?;
        let vector = parse_embedding_body(model, &body)?;
        debug!("{} returned {} dimensions", model.id, vector.dimensions());
        Ok(vector)
    }
}
