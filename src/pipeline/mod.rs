//! Pipeline stages for image-to-embedding processing.
//!
//! Each submodule implements exactly one step. The controller
//! ([`crate::controller::PipelineController`]) sequences them and owns all
//! state; the stages themselves are stateless.
//!
//! ## Data Flow
//!
//! ```text
//! image ──▶ extract ──▶ normalize ──▶ embed ──▶ persist
//! (bytes)   (OCR)       (cleanup)     (model)   (append)
//! ```
//!
//! 1. [`encode`]   : base64 body and `data:` display URI for the upload
//! 2. [`extract`]  : OCR call; the only stage that sees image bytes
//!    (`local_ocr` runs Tesseract in-process with the `tesseract` feature)
//! 3. [`normalize`]: whitespace cleanup and the "no text found" sentinel
//! 4. [`embed`]    : embedding call, stamped with the model id
//! 5. [`persist`]  : append-only record store

pub mod embed;
pub mod encode;
pub mod extract;
#[cfg(feature = "tesseract")]
pub mod local_ocr;
pub mod normalize;
pub mod persist;
