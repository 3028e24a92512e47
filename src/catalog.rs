//! The fixed, ordered catalog of embedding models a user may select.
//!
//! The catalog is loaded once at startup and shared read-only
//! (`Arc<ModelCatalog>`) by the controller and the CLI. Ids are unique and
//! the first entry is the default selection.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// A selectable embedding model.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmbeddingModel {
    /// Identifier sent to the embedding service, e.g.
    /// `sentence-transformers/all-MiniLM-L6-v2`.
    pub id: String,
    /// Human-readable name for display.
    pub label: String,
}

impl EmbeddingModel {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
        }
    }
}

impl fmt::Display for EmbeddingModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.label, self.id)
    }
}

/// Ordered, validated list of [`EmbeddingModel`]s.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelCatalog {
    models: Vec<EmbeddingModel>,
}

impl ModelCatalog {
    /// Build a catalog, rejecting empty lists and duplicate ids.
    pub fn new(models: Vec<EmbeddingModel>) -> Result<Self, ConfigError> {
        if models.is_empty() {
            return Err(ConfigError::EmptyCatalog);
        }
        let mut seen = HashSet::with_capacity(models.len());
        for m in &models {
            if m.id.trim().is_empty() {
                return Err(ConfigError::InvalidCatalogEntry(m.label.clone()));
            }
            if !seen.insert(m.id.as_str()) {
                return Err(ConfigError::DuplicateModel(m.id.clone()));
            }
        }
        Ok(Self { models })
    }

    /// Parse `id=label;id=label` (a bare `id` uses the id as its label).
    pub fn parse(spec: &str) -> Result<Self, ConfigError> {
        let models = spec
            .split(';')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(|entry| match entry.split_once('=') {
                Some((id, label)) => {
                    let (id, label) = (id.trim(), label.trim());
                    if id.is_empty() {
                        Err(ConfigError::InvalidCatalogEntry(entry.to_string()))
                    } else if label.is_empty() {
                        Ok(EmbeddingModel::new(id, id))
                    } else {
                        Ok(EmbeddingModel::new(id, label))
                    }
                }
                None => Ok(EmbeddingModel::new(entry, entry)),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(models)
    }

    /// The first entry.
    pub fn default_model(&self) -> &EmbeddingModel {
        // `new` guarantees at least one entry.
        &self.models[0]
    }

    pub fn get(&self, id: &str) -> Option<&EmbeddingModel> {
        self.models.iter().find(|m| m.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn models(&self) -> &[EmbeddingModel] {
        &self.models
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Comma-separated ids, for error messages.
    pub fn ids(&self) -> String {
        self.models
            .iter()
            .map(|m| m.id.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl Default for ModelCatalog {
    /// Sentence-transformer models served by the Hugging Face feature-extraction
    /// pipeline. MiniLM leads because it is small and fast.
    fn default() -> Self {
        Self {
            models: vec![
                EmbeddingModel::new("sentence-transformers/all-MiniLM-L6-v2", "MiniLM L6 v2 (384-d)"),
                EmbeddingModel::new("sentence-transformers/all-mpnet-base-v2", "MPNet base v2 (768-d)"),
                EmbeddingModel::new(
                    "sentence-transformers/paraphrase-multilingual-MiniLM-L12-v2",
                    "Multilingual MiniLM L12 v2 (384-d)",
                ),
                EmbeddingModel::new("BAAI/bge-small-en-v1.5", "BGE small en v1.5 (384-d)"),
            ],
        }
    }
}
