//! # ocr-embed
//!
//! Extract text from an image, turn it into an embedding with a selectable
//! model, and append the result to a record store.
//!
//! ## Pipeline Overview
//!
//! ```text
//! image
//!  │
//!  ├─ 1. Extract    OCR gateway: base64 image → raw text
//!  ├─ 2. Normalise  collapse whitespace; "(No text found)" when empty
//!  ├─ 3. Embed      feature-extraction service, tagged with the model id
//!  └─ 4. Persist    append-only record (best effort)
//! ```
//!
//! [`PipelineController`] sequences the steps and exposes the state the
//! user sees (`Idle`, `Loading`, `Success`, `Error`). Switching the model
//! re-runs only the embedding step on the cached text. Every run carries a
//! token, and results from a run that has been superseded by a newer upload
//! or model switch are discarded.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ocr_embed::{PipelineConfig, UploadedImage};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // OCR_ENDPOINT, HF_API_KEY, EMBEDDING_MODELS, ... from the environment
//!     let controller = PipelineConfig::from_env()?.into_controller(None)?;
//!
//!     let image = UploadedImage::new(std::fs::read("receipt.png")?);
//!     controller.upload(image).await;
//!
//!     let snapshot = controller.snapshot();
//!     println!("{}", snapshot.text().unwrap_or_default());
//!     if let Some(embedding) = snapshot.embedding {
//!         println!("{}-d from {}", embedding.dimensions(), embedding.model_id());
//!     }
//!
//!     // Re-embed the same text with another model; no second OCR call.
//!     controller.on_model_changed("sentence-transformers/all-mpnet-base-v2").await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `ocr-embed` binary (clap + anyhow + tracing-subscriber + indicatif) |
//! | `tesseract` | off | Local OCR with the system `libtesseract`, used when no OCR endpoint is set |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! ocr-embed = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod catalog;
pub mod config;
pub mod controller;
pub mod error;
pub mod observer;
pub mod pipeline;
pub mod record;
pub mod stream;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use catalog::{EmbeddingModel, ModelCatalog};
pub use config::{PipelineConfig, PipelineConfigBuilder};
pub use controller::{
    Phase, PersistOutcome, PipelineController, PipelineControllerBuilder, PipelineSnapshot,
    PipelineStatus, RunKind, RunOutcome, GENERIC_ERROR_MESSAGE,
};
pub use error::{ConfigError, EmbeddingError, ExtractionError, PersistenceError, PipelineError};
pub use observer::{NoopObserver, PipelineObserver, SharedObserver};
pub use pipeline::embed::{Embedder, HttpEmbeddingClient};
pub use pipeline::extract::{HttpOcrClient, TextExtractor};
#[cfg(feature = "tesseract")]
pub use pipeline::local_ocr::TesseractExtractor;
pub use pipeline::normalize::{normalize, NO_TEXT_SENTINEL};
pub use pipeline::persist::{HttpRecordStore, JsonlRecordStore, MemoryRecordStore, RecordStore};
pub use record::{EmbeddingVector, ExtractionResult, OcrRecord, UploadedImage};
pub use stream::SnapshotStream;
