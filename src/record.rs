//! Data model shared by the pipeline stages and the controller.

use crate::catalog::EmbeddingModel;
use crate::pipeline::{encode, normalize};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// An image submitted by the user.
///
/// Owned by the run it started; a new upload replaces it rather than
/// mutating it. Cloning is cheap (the bytes are shared).
#[derive(Clone, PartialEq, Eq)]
pub struct UploadedImage {
    bytes: Arc<[u8]>,
    display_url: String,
}

impl UploadedImage {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        let bytes: Vec<u8> = bytes.into();
        let display_url = encode::data_url(&bytes);
        Self {
            bytes: bytes.into(),
            display_url,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// A `data:` URI suitable for an `<img src>` or terminal image viewer.
    pub fn display_url(&self) -> &str {
        &self.display_url
    }

    pub fn mime_type(&self) -> &'static str {
        encode::sniff_mime(&self.bytes)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for UploadedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadedImage")
            .field("len", &self.bytes.len())
            .field("mime_type", &self.mime_type())
            .finish()
    }
}

/// Recognised text, before and after normalisation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub raw_text: String,
    pub clean_text: String,
}

impl ExtractionResult {
    pub fn from_raw(raw_text: impl Into<String>) -> Self {
        let raw_text = raw_text.into();
        let clean_text = normalize::normalize(&raw_text);
        Self {
            raw_text,
            clean_text,
        }
    }

    /// False when extraction found nothing usable (clean text is the sentinel).
    pub fn has_text(&self) -> bool {
        !normalize::is_sentinel(&self.clean_text)
    }
}

/// A vector together with the id of the model that produced it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingVector {
    model_id: String,
    values: Vec<f32>,
}

impl EmbeddingVector {
    pub fn new(model: &EmbeddingModel, values: Vec<f32>) -> Self {
        Self {
            model_id: model.id.clone(),
            values,
        }
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn dimensions(&self) -> usize {
        self.values.len()
    }

    pub fn is_from(&self, model: &EmbeddingModel) -> bool {
        self.model_id == model.id
    }
}

/// One appended row in the record store. Never updated once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcrRecord {
    pub text: String,
    pub embedding: EmbeddingVector,
    pub model: String,
    pub timestamp: DateTime<Utc>,
}

impl OcrRecord {
    /// Build a record stamped now. `model` is taken from the vector so the
    /// two can never disagree.
    pub fn new(text: impl Into<String>, embedding: EmbeddingVector) -> Self {
        Self {
            text: text.into(),
            model: embedding.model_id.clone(),
            embedding,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::normalize::NO_TEXT_SENTINEL;

    #[test]
    fn extraction_result_normalises() {
        let r = ExtractionResult::from_raw("Hello   world  ");
        assert_eq!(r.raw_text, "Hello   world  ");
        assert_eq!(r.clean_text, "Hello world");
        assert!(r.has_text());
    }

    #[test]
    fn empty_extraction_is_sentinel() {
        let r = ExtractionResult::from_raw(" \n\t ");
        assert_eq!(r.clean_text, NO_TEXT_SENTINEL);
        assert!(!r.has_text());
    }

    #[test]
    fn record_model_follows_vector() {
        let model = EmbeddingModel::new("m-1", "Model one");
        let v = EmbeddingVector::new(&model, vec![0.5, -0.25]);
        let rec = OcrRecord::new("text", v);
        assert_eq!(rec.model, "m-1");
        assert_eq!(rec.embedding.dimensions(), 2);
        assert!(rec.embedding.is_from(&model));
    }

    #[test]
    fn record_serialises_expected_fields() {
        let model = EmbeddingModel::new("m-1", "Model one");
        let rec = OcrRecord::new("abc", EmbeddingVector::new(&model, vec![1.0]));
        let json = serde_json::to_value(&rec).expect("serialise");
        for key in ["text", "embedding", "model", "timestamp"] {
            assert!(json.get(key).is_some(), "missing {key}: {json}");
        }
        assert_eq!(json["embedding"]["model_id"], "m-1");
    }

    #[test]
    fn uploaded_image_debug_hides_bytes() {
        let img = UploadedImage::new(vec![1u8, 2, 3]);
        let dbg = format!("{img:?}");
        assert!(dbg.contains("len: 3"), "got: {dbg}");
        assert!(img.display_url().starts_with("data:"));
    }
}
