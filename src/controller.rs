//! The pipeline state machine and orchestrator.
//!
//! [`PipelineController`] owns the only mutable state in the crate: the
//! current upload, its extraction result and embedding, the selected model,
//! and a coarse status (`Idle`, `Loading`, `Success`, `Error`). Callers
//! drive it with two events:
//!
//! * [`PipelineController::upload`]: full run: extract → normalise →
//!   embed → persist.
//! * [`PipelineController::on_model_changed`]: embedding-only run on the
//!   cached text; extraction is never repeated.
//!
//! ## Run tokens
//!
//! Every run is issued a token from a counter stored in the state. Each step
//! applies its result only if its token is still the current one, so a slow
//! run finishing after a newer upload or model switch is discarded rather
//! than merged. Stale runs also skip any remaining side effects (no embed
//! call, no record append). In-flight calls are not aborted.
//!
//! A model switch while the current upload is still extracting does not
//! restart it: the upload reads the selected model when it reaches the
//! embedding step. A switch after extraction has produced text supersedes
//! whatever run is current and re-embeds.
//!
//! ## State storage
//!
//! The state lives in a [`tokio::sync::watch`] channel: the sender is the
//! single cell every transition mutates, and subscribers see each published
//! snapshot. Mutations are synchronous closures, so no lock is ever held
//! across an `.await`.

use crate::catalog::{EmbeddingModel, ModelCatalog};
use crate::error::{ConfigError, PipelineError};
use crate::observer::{NoopObserver, PipelineObserver};
use crate::pipeline::embed::Embedder;
use crate::pipeline::extract::TextExtractor;
use crate::pipeline::persist::RecordStore;
use crate::record::{EmbeddingVector, ExtractionResult, OcrRecord, UploadedImage};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// The only message shown to the user when a run fails.
pub const GENERIC_ERROR_MESSAGE: &str = "Something went wrong while processing the image.";

/// Sub-phase of a `Loading` run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Extracting,
    Embedding,
}

/// What the presentation layer observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "phase")]
pub enum PipelineStatus {
    #[default]
    Idle,
    Loading(Phase),
    Success,
    Error,
}

impl PipelineStatus {
    pub fn is_loading(&self) -> bool {
        matches!(self, PipelineStatus::Loading(_))
    }
}

impl fmt::Display for PipelineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineStatus::Idle => f.write_str("idle"),
            PipelineStatus::Loading(Phase::Extracting) => f.write_str("loading (extracting)"),
            PipelineStatus::Loading(Phase::Embedding) => f.write_str("loading (embedding)"),
            PipelineStatus::Success => f.write_str("success"),
            PipelineStatus::Error => f.write_str("error"),
        }
    }
}

/// Which event started a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    Upload,
    ModelChange,
}

/// Outcome of the last record append for the current run.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "error")]
pub enum PersistOutcome {
    /// No embedding was produced, so nothing was written.
    #[default]
    NotAttempted,
    Pending,
    Saved,
    Failed(String),
}

/// How a call to `upload` or `on_model_changed` ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The run was current to the end and left the pipeline in this status.
    Completed(PipelineStatus),
    /// A newer run started first; nothing from this run was applied after that.
    Superseded,
    /// The event did not start a run.
    Skipped,
}

/// The controller's working state, as published to subscribers.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineSnapshot {
    /// Token of the current run; 0 before the first run.
    pub token: u64,
    pub status: PipelineStatus,
    #[serde(skip)]
    pub image: Option<UploadedImage>,
    pub extraction: Option<ExtractionResult>,
    pub embedding: Option<EmbeddingVector>,
    pub selected_model: EmbeddingModel,
    /// User-facing message, set only in `Error`.
    pub error_message: Option<String>,
    pub persistence: PersistOutcome,
}

impl PipelineSnapshot {
    fn new(selected_model: EmbeddingModel) -> Self {
        Self {
            token: 0,
            status: PipelineStatus::Idle,
            image: None,
            extraction: None,
            embedding: None,
            selected_model,
            error_message: None,
            persistence: PersistOutcome::NotAttempted,
        }
    }

    /// The clean text to display, if extraction has finished.
    pub fn text(&self) -> Option<&str> {
        self.extraction.as_ref().map(|e| e.clean_text.as_str())
    }
}

struct Inner {
    catalog: Arc<ModelCatalog>,
    extractor: Arc<dyn TextExtractor>,
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn RecordStore>,
    observer: Arc<dyn PipelineObserver>,
    state: watch::Sender<PipelineSnapshot>,
}

/// Orchestrates extraction, embedding and persistence for one user.
///
/// Cloning is cheap and every clone drives the same state, so an upload can
/// be spawned on one task while another task switches the model.
#[derive(Clone)]
pub struct PipelineController {
    inner: Arc<Inner>,
}

impl fmt::Debug for PipelineController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineController")
            .field("catalog", &self.inner.catalog)
            .field("state", &*self.inner.state.borrow())
            .finish()
    }
}

impl PipelineController {
    /// Controller with no observer, starting on the catalog's default model.
    pub fn new(
        catalog: Arc<ModelCatalog>,
        extractor: Arc<dyn TextExtractor>,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn RecordStore>,
    ) -> Self {
        let selected = catalog.default_model().clone();
        Self::assemble(catalog, extractor, embedder, store, Arc::new(NoopObserver), selected)
    }

    pub fn builder(catalog: Arc<ModelCatalog>) -> PipelineControllerBuilder {
        PipelineControllerBuilder {
            catalog,
            extractor: None,
            embedder: None,
            store: None,
            observer: None,
            selected_model: None,
        }
    }

    fn assemble(
        catalog: Arc<ModelCatalog>,
        extractor: Arc<dyn TextExtractor>,
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn RecordStore>,
        observer: Arc<dyn PipelineObserver>,
        selected: EmbeddingModel,
    ) -> Self {
        let (state, _) = watch::channel(PipelineSnapshot::new(selected));
        Self {
            inner: Arc::new(Inner {
                catalog,
                extractor,
                embedder,
                store,
                observer,
                state,
            }),
        }
    }

    // ── Read access ──────────────────────────────────────────────────────

    pub fn snapshot(&self) -> PipelineSnapshot {
        self.inner.state.borrow().clone()
    }

    pub fn status(&self) -> PipelineStatus {
        self.inner.state.borrow().status
    }

    pub fn selected_model(&self) -> EmbeddingModel {
        self.inner.state.borrow().selected_model.clone()
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.inner.catalog
    }

    /// Receiver that sees every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<PipelineSnapshot> {
        self.inner.state.subscribe()
    }

    // ── Events ───────────────────────────────────────────────────────────

    /// Start a full run for a new image, superseding any run in flight.
    pub async fn upload(&self, image: UploadedImage) -> RunOutcome {
        let mut token = 0;
        self.inner.state.send_modify(|s| {
            s.token += 1;
            token = s.token;
            s.image = Some(image.clone());
            s.extraction = None;
            s.embedding = None;
            s.error_message = None;
            s.persistence = PersistOutcome::NotAttempted;
            s.status = PipelineStatus::Loading(Phase::Extracting);
        });
        info!(token, bytes = image.len(), "Upload run started");
        self.inner.observer.on_run_started(token, RunKind::Upload);
        self.inner
            .observer
            .on_status_change(token, PipelineStatus::Loading(Phase::Extracting));

        let raw = match self.inner.extractor.extract_text(image.bytes()).await {
            Ok(raw) => raw,
            Err(e) => return self.fail(token, &e.to_string()),
        };

        let extraction = ExtractionResult::from_raw(raw);
        debug!(
            token,
            raw_len = extraction.raw_text.len(),
            clean_len = extraction.clean_text.len(),
            "Extraction finished"
        );

        // The model is read here, not at upload time, so a switch made
        // while extracting is honoured.
        let mut model = None;
        let next = self.apply(token, |s| {
            s.extraction = Some(extraction.clone());
            if extraction.has_text() {
                model = Some(s.selected_model.clone());
                s.status = PipelineStatus::Loading(Phase::Embedding);
            } else {
                s.status = PipelineStatus::Success;
            }
        });
        if next.is_none() {
            return self.superseded(token);
        }

        match model {
            Some(model) => self.embed_and_persist(token, extraction.clean_text, model).await,
            None => {
                info!(token, "No text found; skipping embedding");
                RunOutcome::Completed(PipelineStatus::Success)
            }
        }
    }

    /// Select a different model and re-embed the cached text.
    ///
    /// Re-selecting the current model is a no-op unless the last run failed.
    /// Without usable extracted text only the selection changes.
    pub async fn on_model_changed(&self, model_id: &str) -> Result<RunOutcome, PipelineError> {
        let model = self
            .inner
            .catalog
            .get(model_id)
            .cloned()
            .ok_or_else(|| PipelineError::UnknownModel {
                id: model_id.to_string(),
                known: self.inner.catalog.ids(),
            })?;

        let mut started: Option<(u64, String)> = None;
        self.inner.state.send_if_modified(|s| {
            let same = s.selected_model == model;
            if same && s.status != PipelineStatus::Error {
                return false;
            }
            s.selected_model = model.clone();

            let text = s
                .extraction
                .as_ref()
                .filter(|e| e.has_text())
                .map(|e| e.clean_text.clone());
            if let Some(text) = text {
                s.token += 1;
                s.embedding = None;
                s.error_message = None;
                s.persistence = PersistOutcome::NotAttempted;
                s.status = PipelineStatus::Loading(Phase::Embedding);
                started = Some((s.token, text));
            }
            !same || started.is_some()
        });

        let Some((token, text)) = started else {
            debug!(model = %model.id, "Model selected; no text to re-embed");
            return Ok(RunOutcome::Skipped);
        };

        info!(token, model = %model.id, "Model change run started");
        self.inner.observer.on_run_started(token, RunKind::ModelChange);
        self.inner
            .observer
            .on_status_change(token, PipelineStatus::Loading(Phase::Embedding));

        Ok(self.embed_and_persist(token, text, model).await)
    }

    // ── Steps ────────────────────────────────────────────────────────────

    async fn embed_and_persist(&self, token: u64, text: String, model: EmbeddingModel) -> RunOutcome {
        let vector = match self.inner.embedder.embed(&model, &text).await {
            Ok(v) => v,
            Err(e) => return self.fail(token, &e.to_string()),
        };
        if !vector.is_from(&model) {
            let detail = format!(
                "embedder returned a vector tagged '{}' for model '{}'",
                vector.model_id(),
                model.id
            );
            return self.fail(token, &detail);
        }

        let applied = self.apply(token, |s| {
            s.embedding = Some(vector.clone());
            s.persistence = PersistOutcome::Pending;
            s.status = PipelineStatus::Success;
        });
        if applied.is_none() {
            return self.superseded(token);
        }
        info!(token, model = %model.id, dimensions = vector.dimensions(), "Embedding applied");

        let record = OcrRecord::new(text, vector);
        let outcome = match self.inner.store.record(&record).await {
            Ok(()) => PersistOutcome::Saved,
            Err(e) => {
                let msg = e.to_string();
                warn!(token, error = %msg, "Failed to persist record");
                self.inner.observer.on_persist_failed(&msg);
                PersistOutcome::Failed(msg)
            }
        };
        // A newer run owns the persistence field now; leave it alone.
        self.apply(token, |s| s.persistence = outcome);

        RunOutcome::Completed(PipelineStatus::Success)
    }

    /// Move the current run to `Error`. No partial embedding is kept.
    fn fail(&self, token: u64, detail: &str) -> RunOutcome {
        let applied = self.apply(token, |s| {
            s.embedding = None;
            s.error_message = Some(GENERIC_ERROR_MESSAGE.to_string());
            s.status = PipelineStatus::Error;
        });
        if applied.is_none() {
            return self.superseded(token);
        }
        warn!(token, error = %detail, "Run failed");
        self.inner.observer.on_run_failed(token, detail);
        RunOutcome::Completed(PipelineStatus::Error)
    }

    fn superseded(&self, token: u64) -> RunOutcome {
        debug!(token, "Discarding result of superseded run");
        self.inner.observer.on_run_superseded(token);
        RunOutcome::Superseded
    }

    /// Mutate the state if `token` is still current and notify the observer
    /// of status changes. Returns the resulting status, or `None` if stale.
    fn apply(&self, token: u64, f: impl FnOnce(&mut PipelineSnapshot)) -> Option<PipelineStatus> {
        let mut result = None;
        let mut status_changed = false;
        self.inner.state.send_if_modified(|s| {
            if s.token != token {
                return false;
            }
            let before = s.status;
            f(s);
            status_changed = s.status != before;
            result = Some(s.status);
            true
        });
        if let (Some(status), true) = (result, status_changed) {
            self.inner.observer.on_status_change(token, status);
        }
        result
    }
}

/// Builder for [`PipelineController`].
pub struct PipelineControllerBuilder {
    catalog: Arc<ModelCatalog>,
    extractor: Option<Arc<dyn TextExtractor>>,
    embedder: Option<Arc<dyn Embedder>>,
    store: Option<Arc<dyn RecordStore>>,
    observer: Option<Arc<dyn PipelineObserver>>,
    selected_model: Option<String>,
}

impl PipelineControllerBuilder {
    pub fn extractor(mut self, extractor: Arc<dyn TextExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn store(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Initial selection; defaults to the catalog's first model.
    pub fn selected_model(mut self, id: impl Into<String>) -> Self {
        self.selected_model = Some(id.into());
        self
    }

    pub fn build(self) -> Result<PipelineController, ConfigError> {
        let extractor = self.extractor.ok_or(ConfigError::Missing("text extractor"))?;
        let embedder = self.embedder.ok_or(ConfigError::Missing("embedder"))?;
        let store = self.store.ok_or(ConfigError::Missing("record store"))?;
        let observer = self.observer.unwrap_or_else(|| Arc::new(NoopObserver));
        let selected = match self.selected_model {
            Some(id) => self
                .catalog
                .get(&id)
                .cloned()
                .ok_or(ConfigError::UnknownDefaultModel(id))?,
            None => self.catalog.default_model().clone(),
        };
        Ok(PipelineController::assemble(
            self.catalog,
            extractor,
            embedder,
            store,
            observer,
            selected,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{EmbeddingError, ExtractionError};
    use crate::pipeline::persist::MemoryRecordStore;
    use async_trait::async_trait;

    struct FixedText(&'static str);

    #[async_trait]
    impl TextExtractor for FixedText {
        async fn extract_text(&self, _image: &[u8]) -> Result<String, ExtractionError> {
            Ok(self.0.to_string())
        }
    }

    struct LengthEmbedder;

    #[async_trait]
    impl Embedder for LengthEmbedder {
        async fn embed(
            &self,
            model: &EmbeddingModel,
            text: &str,
        ) -> Result<EmbeddingVector, EmbeddingError> {
            Ok(EmbeddingVector::new(model, vec![text.len() as f32]))
        }
    }

    struct MislabellingEmbedder;

    #[async_trait]
    impl Embedder for MislabellingEmbedder {
        async fn embed(
            &self,
            _model: &EmbeddingModel,
            _text: &str,
        ) -> Result<EmbeddingVector, EmbeddingError> {
            Ok(EmbeddingVector::new(&EmbeddingModel::new("other", "Other"), vec![1.0]))
        }
    }

    fn controller(embedder: Arc<dyn Embedder>) -> PipelineController {
        PipelineController::new(
            Arc::new(ModelCatalog::default()),
            Arc::new(FixedText("some text")),
            embedder,
            Arc::new(MemoryRecordStore::new()),
        )
    }

    #[test]
    fn starts_idle_on_default_model() {
        let c = controller(Arc::new(LengthEmbedder));
        let snap = c.snapshot();
        assert_eq!(snap.status, PipelineStatus::Idle);
        assert_eq!(snap.token, 0);
        assert_eq!(snap.selected_model, *c.catalog().default_model());
        assert!(snap.text().is_none());
    }

    #[tokio::test]
    async fn upload_reaches_success() {
        let c = controller(Arc::new(LengthEmbedder));
        let outcome = c.upload(UploadedImage::new(vec![1u8, 2, 3])).await;
        assert_eq!(outcome, RunOutcome::Completed(PipelineStatus::Success));
        let snap = c.snapshot();
        assert_eq!(snap.token, 1);
        assert_eq!(snap.text(), Some("some text"));
        assert_eq!(snap.persistence, PersistOutcome::Saved);
    }

    #[tokio::test]
    async fn mislabelled_vector_is_an_error() {
        let c = controller(Arc::new(MislabellingEmbedder));
        let outcome = c.upload(UploadedImage::new(vec![1u8])).await;
        assert_eq!(outcome, RunOutcome::Completed(PipelineStatus::Error));
        assert!(c.snapshot().embedding.is_none());
    }

    #[tokio::test]
    async fn unknown_model_rejected() {
        let c = controller(Arc::new(LengthEmbedder));
        let err = c.on_model_changed("not-a-model").await.unwrap_err();
        assert!(matches!(err, PipelineError::UnknownModel { .. }));
    }

    #[tokio::test]
    async fn reselecting_current_model_after_success_is_noop() {
        let c = controller(Arc::new(LengthEmbedder));
        c.upload(UploadedImage::new(vec![1u8])).await;
        let current = c.selected_model().id;
        let outcome = c.on_model_changed(&current).await.expect("known");
        assert_eq!(outcome, RunOutcome::Skipped);
        assert_eq!(c.snapshot().token, 1);
    }

    #[test]
    fn builder_requires_adapters() {
        let err = PipelineController::builder(Arc::new(ModelCatalog::default()))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::Missing("text extractor")));
    }

    #[test]
    fn builder_validates_selected_model() {
        let err = PipelineController::builder(Arc::new(ModelCatalog::default()))
            .extractor(Arc::new(FixedText("")))
            .embedder(Arc::new(LengthEmbedder))
            .store(Arc::new(MemoryRecordStore::new()))
            .selected_model("missing")
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownDefaultModel(id) if id == "missing"));
    }

    #[test]
    fn status_display() {
        assert_eq!(PipelineStatus::Loading(Phase::Embedding).to_string(), "loading (embedding)");
        assert!(PipelineStatus::Loading(Phase::Extracting).is_loading());
        assert!(!PipelineStatus::Success.is_loading());
    }

    #[test]
    fn snapshot_serialises_without_image() {
        let c = controller(Arc::new(LengthEmbedder));
        let json = serde_json::to_value(c.snapshot()).expect("serialise");
        assert!(json.get("image").is_none());
        assert_eq!(json["status"]["state"], "idle");
    }
}
