//! Configuration for the image-to-embedding pipeline.
//!
//! Everything the controller needs from the outside world (collaborator
//! endpoints, credentials, limits and the model catalog) lives in
//! [`PipelineConfig`], built via [`PipelineConfigBuilder`] or loaded from
//! the environment with [`PipelineConfig::from_env`]. The core never
//! computes any of these values itself.

use crate::catalog::ModelCatalog;
use crate::controller::PipelineController;
use crate::error::ConfigError;
use crate::observer::PipelineObserver;
use crate::pipeline::embed::{HttpEmbeddingClient, DEFAULT_EMBEDDING_ENDPOINT};
use crate::pipeline::extract::{
    HttpOcrClient, TextExtractor, DEFAULT_MAX_IMAGE_BYTES, DEFAULT_OCR_LANGUAGE,
};
#[cfg(feature = "tesseract")]
use crate::pipeline::local_ocr::TesseractExtractor;
use crate::pipeline::persist::{HttpRecordStore, JsonlRecordStore, RecordStore};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// Configuration for a [`PipelineController`] backed by HTTP collaborators.
///
/// # Example
/// ```rust
/// use ocr_embed::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .ocr_endpoint("https://ocr.example.com/analyzeImage")
///     .default_model("sentence-transformers/all-mpnet-base-v2")
///     .build()
///     .unwrap();
/// assert_eq!(config.max_image_bytes, 10 * 1024 * 1024);
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// OCR gateway URL. Without one, the controller uses local Tesseract
    /// (`tesseract` feature) or fails to build.
    pub ocr_endpoint: Option<String>,

    /// Tesseract language(s) for local OCR, e.g. `eng+fra`. Default: `eng`.
    pub ocr_language: String,

    /// Directory holding `.traineddata` files for local OCR. Default: the
    /// engine's own lookup.
    pub tessdata_dir: Option<PathBuf>,

    /// Feature-extraction URL; `{model}` is replaced by the model id.
    /// Default: the Hugging Face inference pipeline.
    pub embedding_endpoint: String,

    /// Bearer token for the embedding service.
    pub embedding_api_key: Option<String>,

    /// When set, records are `POST`ed here instead of written to a file.
    pub record_endpoint: Option<String>,

    /// Bearer token for the record endpoint.
    pub record_api_key: Option<String>,

    /// JSON Lines file used when no record endpoint is set.
    /// Default: `ocr_results.jsonl`.
    pub records_path: PathBuf,

    /// Ceiling on the base64-encoded OCR request body. Default: 10 MiB.
    pub max_image_bytes: usize,

    /// OCR transport timeout. Default: 60 s.
    pub ocr_timeout_secs: u64,

    /// Embedding and record-store transport timeout. Default: 30 s.
    pub embedding_timeout_secs: u64,

    /// Selectable models, in display order.
    pub catalog: ModelCatalog,

    /// Initially selected model id. Default: the catalog's first entry.
    pub default_model: Option<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ocr_endpoint: None,
            ocr_language: DEFAULT_OCR_LANGUAGE.to_string(),
            tessdata_dir: None,
            embedding_endpoint: DEFAULT_EMBEDDING_ENDPOINT.to_string(),
            embedding_api_key: None,
            record_endpoint: None,
            record_api_key: None,
            records_path: PathBuf::from("ocr_results.jsonl"),
            max_image_bytes: DEFAULT_MAX_IMAGE_BYTES,
            ocr_timeout_secs: 60,
            embedding_timeout_secs: 30,
            catalog: ModelCatalog::default(),
            default_model: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("ocr_endpoint", &self.ocr_endpoint)
            .field("ocr_language", &self.ocr_language)
            .field("tessdata_dir", &self.tessdata_dir)
            .field("embedding_endpoint", &self.embedding_endpoint)
            .field("embedding_api_key", &self.embedding_api_key.as_ref().map(|_| "<redacted>"))
            .field("record_endpoint", &self.record_endpoint)
            .field("record_api_key", &self.record_api_key.as_ref().map(|_| "<redacted>"))
            .field("records_path", &self.records_path)
            .field("max_image_bytes", &self.max_image_bytes)
            .field("ocr_timeout_secs", &self.ocr_timeout_secs)
            .field("embedding_timeout_secs", &self.embedding_timeout_secs)
            .field("catalog", &self.catalog.ids())
            .field("default_model", &self.default_model)
            .finish()
    }
}

impl PipelineConfig {
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// Reopen a built config for changes; `build()` validates it again.
    pub fn into_builder(self) -> PipelineConfigBuilder {
        PipelineConfigBuilder { config: self }
    }

    /// Load from process environment variables.
    ///
    /// | Variable | Field |
    /// |----------|-------|
    /// | `OCR_ENDPOINT` | `ocr_endpoint` |
    /// | `OCR_LANGUAGE` / `OCR_TESSDATA_DIR` | `ocr_language` / `tessdata_dir` |
    /// | `EMBEDDING_ENDPOINT` | `embedding_endpoint` |
    /// | `HF_API_KEY`, else `HF_TOKEN` | `embedding_api_key` |
    /// | `RECORD_ENDPOINT` / `RECORD_API_KEY` | `record_endpoint` / `record_api_key` |
    /// | `OCR_RECORDS_PATH` | `records_path` |
    /// | `OCR_MAX_IMAGE_BYTES` | `max_image_bytes` |
    /// | `OCR_TIMEOUT_SECS` / `EMBEDDING_TIMEOUT_SECS` | timeouts |
    /// | `EMBEDDING_MODELS` (`id=label;id=label`) | `catalog` |
    /// | `EMBEDDING_MODEL` | `default_model` |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut builder = Self::builder();

        if let Some(v) = get("OCR_ENDPOINT") {
            builder = builder.ocr_endpoint(v);
        }
        if let Some(v) = get("OCR_LANGUAGE") {
            builder = builder.ocr_language(v);
        }
        if let Some(v) = get("OCR_TESSDATA_DIR") {
            builder = builder.tessdata_dir(v);
        }
        if let Some(v) = get("EMBEDDING_ENDPOINT") {
            builder = builder.embedding_endpoint(v);
        }
        if let Some(v) = get("HF_API_KEY").or_else(|| get("HF_TOKEN")) {
            builder = builder.embedding_api_key(v);
        }
        if let Some(v) = get("RECORD_ENDPOINT") {
            builder = builder.record_endpoint(v);
        }
        if let Some(v) = get("RECORD_API_KEY") {
            builder = builder.record_api_key(v);
        }
        if let Some(v) = get("OCR_RECORDS_PATH") {
            builder = builder.records_path(v);
        }
        if let Some(v) = get("OCR_MAX_IMAGE_BYTES") {
            builder = builder.max_image_bytes(parse_number("OCR_MAX_IMAGE_BYTES", &v)?);
        }
        if let Some(v) = get("OCR_TIMEOUT_SECS") {
            builder = builder.ocr_timeout_secs(parse_number("OCR_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = get("EMBEDDING_TIMEOUT_SECS") {
            builder = builder.embedding_timeout_secs(parse_number("EMBEDDING_TIMEOUT_SECS", &v)?);
        }
        if let Some(v) = get("EMBEDDING_MODELS") {
            builder = builder.catalog(ModelCatalog::parse(&v)?);
        }
        if let Some(v) = get("EMBEDDING_MODEL") {
            builder = builder.default_model(v);
        }

        builder.build()
    }

    /// Wire the adapters and the configured store into a controller.
    ///
    /// OCR goes to `ocr_endpoint` when set, otherwise to local Tesseract.
    pub fn into_controller(
        self,
        observer: Option<Arc<dyn PipelineObserver>>,
    ) -> Result<PipelineController, ConfigError> {
        let extractor: Arc<dyn TextExtractor> = match self.ocr_endpoint {
            Some(endpoint) => {
                debug!("Extracting text via OCR gateway {}", endpoint);
                Arc::new(
                    HttpOcrClient::new(endpoint, self.ocr_timeout_secs, self.max_image_bytes)
                        .map_err(|e| ConfigError::HttpClient(e.to_string()))?,
                )
            }
            None => local_extractor(self.tessdata_dir, &self.ocr_language)?,
        };
        let embedder = HttpEmbeddingClient::new(
            self.embedding_endpoint,
            self.embedding_api_key,
            self.embedding_timeout_secs,
        )
        .map_err(|e| ConfigError::HttpClient(e.to_string()))?;

        let store: Arc<dyn RecordStore> = match self.record_endpoint {
            Some(endpoint) => {
                debug!("Persisting records to {}", endpoint);
                Arc::new(
                    HttpRecordStore::new(endpoint, self.record_api_key, self.embedding_timeout_secs)
                        .map_err(|e| ConfigError::HttpClient(e.to_string()))?,
                )
            }
            None => {
                debug!("Persisting records to {}", self.records_path.display());
                Arc::new(JsonlRecordStore::new(self.records_path))
            }
        };

        let mut builder = PipelineController::builder(Arc::new(self.catalog))
            .extractor(extractor)
            .embedder(Arc::new(embedder))
            .store(store);
        if let Some(id) = self.default_model {
            builder = builder.selected_model(id);
        }
        if let Some(observer) = observer {
            builder = builder.observer(observer);
        }
        builder.build()
    }
}

#[cfg(feature = "tesseract")]
fn local_extractor(
    tessdata_dir: Option<PathBuf>,
    language: &str,
) -> Result<Arc<dyn TextExtractor>, ConfigError> {
    let engine = TesseractExtractor::new(tessdata_dir, language)
        .map_err(|e| ConfigError::LocalOcr(e.to_string()))?;
    Ok(Arc::new(engine))
}

#[cfg(not(feature = "tesseract"))]
fn local_extractor(
    _tessdata_dir: Option<PathBuf>,
    _language: &str,
) -> Result<Arc<dyn TextExtractor>, ConfigError> {
    Err(ConfigError::Missing(
        "OCR endpoint (set OCR_ENDPOINT or --ocr-endpoint, or build with the `tesseract` feature)",
    ))
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{key} must be a positive integer, got '{value}'")))
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn ocr_endpoint(mut self, url: impl Into<String>) -> Self {
        self.config.ocr_endpoint = Some(url.into());
        self
    }

    pub fn ocr_language(mut self, language: impl Into<String>) -> Self {
        self.config.ocr_language = language.into();
        self
    }

    pub fn tessdata_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.tessdata_dir = Some(dir.into());
        self
    }

    pub fn embedding_endpoint(mut self, url: impl Into<String>) -> Self {
        self.config.embedding_endpoint = url.into();
        self
    }

    pub fn embedding_api_key(mut self, key: impl Into<String>) -> Self {
        self.config.embedding_api_key = Some(key.into());
        self
    }

    pub fn record_endpoint(mut self, url: impl Into<String>) -> Self {
        self.config.record_endpoint = Some(url.into());
        self
    }

    pub fn record_api_key(mut self, key: impl Into<String>) -> Self {
        self.config.record_api_key = Some(key.into());
        self
    }

    pub fn records_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.records_path = path.into();
        self
    }

    pub fn max_image_bytes(mut self, n: usize) -> Self {
        self.config.max_image_bytes = n;
        self
    }

    pub fn ocr_timeout_secs(mut self, secs: u64) -> Self {
        self.config.ocr_timeout_secs = secs;
        self
    }

    pub fn embedding_timeout_secs(mut self, secs: u64) -> Self {
        self.config.embedding_timeout_secs = secs;
        self
    }

    pub fn catalog(mut self, catalog: ModelCatalog) -> Self {
        self.config.catalog = catalog;
        self
    }

    pub fn default_model(mut self, id: impl Into<String>) -> Self {
        self.config.default_model = Some(id.into());
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, ConfigError> {
        let c = &self.config;
        if c.max_image_bytes == 0 {
            return Err(ConfigError::Invalid("max_image_bytes must be ≥ 1".into()));
        }
        if c.ocr_timeout_secs == 0 || c.embedding_timeout_secs == 0 {
            return Err(ConfigError::Invalid("timeouts must be ≥ 1 second".into()));
        }
        if c.ocr_language.split('+').any(|l| l.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "OCR language must look like 'eng' or 'eng+fra', got '{}'",
                c.ocr_language
            )));
        }
        if c.embedding_endpoint.trim().is_empty() {
            return Err(ConfigError::Missing("embedding endpoint"));
        }
        if let Some(ref url) = c.ocr_endpoint {
            if url.trim().is_empty() {
                return Err(ConfigError::Missing("OCR endpoint"));
            }
        }
        if let Some(ref id) = c.default_model {
            if !c.catalog.contains(id) {
                return Err(ConfigError::UnknownDefaultModel(id.clone()));
            }
        }
        Ok(self.config)
    }
}
