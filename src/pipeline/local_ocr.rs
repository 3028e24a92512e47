//! In-process text extraction with Tesseract.
//!
//! Only compiled with the `tesseract` feature, which links the system
//! `libtesseract`. [`crate::PipelineConfig::into_controller`] picks this
//! engine when no OCR gateway endpoint is configured.

use crate::error::ExtractionError;
use crate::pipeline::extract::TextExtractor;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Local Tesseract engine.
///
/// The engine handle is not shared between calls: each extraction builds a
/// fresh one on the blocking pool, so overlapping uploads never contend.
#[derive(Debug, Clone)]
pub struct TesseractExtractor {
    tessdata_dir: Option<PathBuf>,
    language: String,
}

impl TesseractExtractor {
    /// `language` uses Tesseract's `eng+fra` syntax.
    ///
    /// With `tessdata_dir` set, every requested language must have its
    /// `.traineddata` file there. `None` defers to Tesseract's own lookup
    /// (`TESSDATA_PREFIX` or the compiled-in path).
    pub fn new(
        tessdata_dir: Option<PathBuf>,
        language: impl Into<String>,
    ) -> Result<Self, ExtractionError> {
        let language: String = language.into();
        let language = language.trim().to_string();
        if language.is_empty() || language.split('+').any(|l| l.trim().is_empty()) {
            return Err(ExtractionError::EngineInit(format!(
                "invalid OCR language '{language}'"
            )));
        }

        if let Some(ref dir) = tessdata_dir {
            for lang in language.split('+') {
                let data = dir.join(format!("{}.traineddata", lang.trim()));
                if !data.exists() {
                    return Err(ExtractionError::TessdataNotFound(data));
                }
            }
        }

        info!(
            "Local OCR with Tesseract, language {} (tessdata: {})",
            language,
            tessdata_dir
                .as_deref()
                .map(|d| d.display().to_string())
                .unwrap_or_else(|| "default".to_string())
        );
        Ok(Self {
            tessdata_dir,
            language,
        })
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn tessdata_dir(&self) -> Option<&Path> {
        self.tessdata_dir.as_deref()
    }
}

fn recognize(
    tessdata_dir: Option<&Path>,
    language: &str,
    image: &[u8],
) -> Result<String, ExtractionError> {
    let datapath = match tessdata_dir {
        Some(dir) => Some(dir.to_str().ok_or_else(|| {
            ExtractionError::EngineInit("tessdata path is not valid UTF-8".into())
        })?),
        None => None,
    };

    let mut engine = ::tesseract::Tesseract::new(datapath, Some(language))
        .map_err(|e| ExtractionError::EngineInit(format!("{e:?}")))?
        .set_image_from_mem(image)
        .map_err(|e| ExtractionError::Engine(format!("{e:?}")))?;

    engine
        .get_text()
        .map_err(|e| ExtractionError::Engine(format!("{e:?}")))
}

#[async_trait]
impl TextExtractor for TesseractExtractor {
    async fn extract_text(&self, image: &[u8]) -> Result<String, ExtractionError> {
        if image.is_empty() {
            return Err(ExtractionError::EmptyImage);
        }

        let image = image.to_vec();
        let tessdata_dir = self.tessdata_dir.clone();
        let language = self.language.clone();
        let text = tokio::task::spawn_blocking(move || {
            recognize(tessdata_dir.as_deref(), &language, &image)
        })
        .await
        .map_err(|e| ExtractionError::Engine(format!("OCR task failed: {e}")))??;

        debug!("Tesseract returned {} chars", text.len());
        Ok(text)
    }
}
