//! Error types for the ocr-embed library.
//!
//! Each external collaborator gets its own error type so a failure can be
//! traced back to the call that produced it:
//!
//! * [`ExtractionError`]: the OCR call failed. Terminal for the run.
//! * [`EmbeddingError`]: the embedding call failed. Terminal for the run,
//!   but the extracted text stays visible.
//! * [`PersistenceError`]: the record append failed. **Never** terminal:
//!   the run stays `Success` and the failure is only logged and reported to
//!   the observer.
//!
//! [`PipelineError`] covers caller mistakes (unknown model id) and
//! [`ConfigError`] covers invalid configuration. None of these are retried
//! by the library; a failed run needs a new upload or model change.

use std::path::PathBuf;
use thiserror::Error;

/// A failed call to the OCR collaborator.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// The caller supplied zero bytes; no request was made.
    #[error("Image payload is empty")]
    EmptyImage,

    /// The encoded request body exceeds the configured ceiling.
    #[error("Image payload is {size} bytes encoded, over the {limit} byte limit")]
    PayloadTooLarge { size: usize, limit: usize },

    /// The OCR service answered with a non-2xx status.
    #[error("OCR service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The request did not complete before the transport timeout.
    #[error("OCR request timed out after {secs}s")]
    Timeout { secs: u64 },

    /// Connection, TLS or other transport failure.
    #[error("OCR request failed: {0}")]
    Transport(String),

    /// The response body was not `{ "text": string }`.
    #[error("OCR response was malformed: {0}")]
    MalformedResponse(String),

    /// The local engine has no `.traineddata` file for a requested language.
    #[error("Tesseract language data not found: {}", .0.display())]
    TessdataNotFound(PathBuf),

    /// The local engine could not be initialised.
    #[error("OCR engine failed to start: {0}")]
    EngineInit(String),

    /// The local engine failed on this image.
    #[error("OCR engine failed: {0}")]
    Engine(String),
}

/// A failed call to the embedding collaborator.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    /// The text was the "no text found" sentinel; embedding it is refused.
    #[error("Refusing to embed placeholder text")]
    NoText,

    /// The embedding service answered with a non-2xx status.
    #[error("Embedding service returned HTTP {status} for model '{model}': {body}")]
    Status {
        model: String,
        status: u16,
        body: String,
    },

    /// The request did not complete before the transport timeout.
    #[error("Embedding request timed out after {secs}s")]
    Timeout { secs: u64 },

    /// Connection, TLS or other transport failure.
    #[error("Embedding request failed: {0}")]
    Transport(String),

    /// The body was neither a numeric array nor an array of numeric arrays.
    #[error("Unexpected embedding response for model '{model}': {detail}")]
    UnexpectedShape { model: String, detail: String },
}

/// A failed append to the record store.
#[derive(Debug, Error)]
pub enum PersistenceError {
    /// Local file store could not be opened or written.
    #[error("Failed to append record to '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The record could not be serialised.
    #[error("Failed to serialise record: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Remote store answered with a non-2xx status.
    #[error("Record store returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// Connection, TLS or timeout failure talking to a remote store.
    #[error("Record store request failed: {0}")]
    Transport(String),

    /// The store refused the write (used by in-process stores).
    #[error("Record store rejected the write: {0}")]
    Rejected(String),
}

/// Errors raised by the controller for invalid caller input.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The requested model id is not in the catalog.
    #[error("Unknown embedding model '{id}'. Known models: {known}")]
    UnknownModel { id: String, known: String },
}

/// Invalid configuration or model catalog.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The catalog has no entries.
    #[error("Model catalog is empty")]
    EmptyCatalog,

    /// Two catalog entries share an id.
    #[error("Duplicate model id '{0}' in catalog")]
    DuplicateModel(String),

    /// A catalog specification string could not be parsed.
    #[error("Invalid model catalog entry '{0}': expected 'id=label'")]
    InvalidCatalogEntry(String),

    /// The configured default model is not in the catalog.
    #[error("Default model '{0}' is not in the catalog")]
    UnknownDefaultModel(String),

    /// A required setting is missing.
    #[error("Missing configuration: {0}")]
    Missing(&'static str),

    /// A setting has an out-of-range or unparsable value.
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    /// An HTTP client could not be constructed.
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(String),

    /// The local OCR engine could not be set up.
    #[error("Failed to set up local OCR: {0}")]
    LocalOcr(String),
}
