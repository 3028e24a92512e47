//! Controller integration tests with scripted fake collaborators.
//!
//! Every fake call pops a `oneshot` receiver from a queue. A reply can be
//! made ready up front, or held back (gated) and released later, which is
//! how these tests interleave uploads and model switches deterministically.

use async_trait::async_trait;
use ocr_embed::{
    EmbeddingError, EmbeddingModel, EmbeddingVector, ExtractionError, MemoryRecordStore,
    ModelCatalog, Phase, PersistOutcome, PersistenceError, PipelineController, PipelineObserver,
    PipelineStatus, RecordStore, RunOutcome, TextExtractor, UploadedImage, GENERIC_ERROR_MESSAGE,
    NO_TEXT_SENTINEL,
};
use ocr_embed::{Embedder, OcrRecord};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

// ── Scripted replies ─────────────────────────────────────────────────────────

struct Script<T> {
    calls: AtomicUsize,
    queue: Mutex<VecDeque<oneshot::Receiver<T>>>,
}

impl<T> Script<T> {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            queue: Mutex::new(VecDeque::new()),
        }
    }

    fn ready(&self, value: T) {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(value);
        self.queue.lock().unwrap().push_back(rx);
    }

    fn gated(&self) -> oneshot::Sender<T> {
        let (tx, rx) = oneshot::channel();
        self.queue.lock().unwrap().push_back(rx);
        tx
    }

    async fn next(&self) -> T {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let rx = self
            .queue
            .lock()
            .unwrap()
            .pop_front()
            .expect("unexpected call: no scripted reply");
        rx.await.expect("gate dropped without a reply")
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

// ── Fakes ────────────────────────────────────────────────────────────────────

struct FakeExtractor {
    script: Script<Result<String, ()>>,
}

#[async_trait]
impl TextExtractor for FakeExtractor {
    async fn extract_text(&self, _image: &[u8]) -> Result<String, ExtractionError> {
        self.script.next().await.map_err(|_| ExtractionError::Status {
            status: 500,
            body: "OCR failed".into(),
        })
    }
}

struct FakeEmbedder {
    script: Script<Result<Vec<f32>, ()>>,
    seen: Mutex<Vec<(String, String)>>,
}

impl FakeEmbedder {
    fn seen(&self) -> Vec<(String, String)> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Embedder for FakeEmbedder {
    async fn embed(
        &self,
        model: &EmbeddingModel,
        text: &str,
    ) -> Result<EmbeddingVector, EmbeddingError> {
        self.seen
            .lock()
            .unwrap()
            .push((model.id.clone(), text.to_string()));
        match self.script.next().await {
            Ok(values) => Ok(EmbeddingVector::new(model, values)),
            Err(()) => Err(EmbeddingError::Status {
                model: model.id.clone(),
                status: 503,
                body: "Model is loading".into(),
            }),
        }
    }
}

struct FailingStore;

#[async_trait]
impl RecordStore for FailingStore {
    async fn record(&self, _entry: &OcrRecord) -> Result<(), PersistenceError> {
        Err(PersistenceError::Rejected("quota exceeded".into()))
    }
}

#[derive(Default)]
struct RecordingObserver {
    statuses: Mutex<Vec<PipelineStatus>>,
    superseded: Mutex<Vec<u64>>,
    persist_failures: AtomicUsize,
}

impl PipelineObserver for RecordingObserver {
    fn on_status_change(&self, _token: u64, status: PipelineStatus) {
        self.statuses.lock().unwrap().push(status);
    }

    fn on_run_superseded(&self, token: u64) {
        self.superseded.lock().unwrap().push(token);
    }

    fn on_persist_failed(&self, _error: &str) {
        self.persist_failures.fetch_add(1, Ordering::SeqCst);
    }
}

// ── Harness ──────────────────────────────────────────────────────────────────

struct Harness {
    controller: PipelineController,
    extractor: Arc<FakeExtractor>,
    embedder: Arc<FakeEmbedder>,
    store: MemoryRecordStore,
    observer: Arc<RecordingObserver>,
}

fn catalog() -> Arc<ModelCatalog> {
    Arc::new(ModelCatalog::parse("model-a=Model A;model-b=Model B;model-c=Model C").unwrap())
}

fn harness_with_store(store: Arc<dyn RecordStore>, memory: MemoryRecordStore) -> Harness {
    let extractor = Arc::new(FakeExtractor {
        script: Script::new(),
    });
    let embedder = Arc::new(FakeEmbedder {
        script: Script::new(),
        seen: Mutex::new(Vec::new()),
    });
    let observer = Arc::new(RecordingObserver::default());
    let controller = PipelineController::builder(catalog())
        .extractor(extractor.clone())
        .embedder(embedder.clone())
        .store(store)
        .observer(observer.clone())
        .build()
        .unwrap();
    Harness {
        controller,
        extractor,
        embedder,
        store: memory,
        observer,
    }
}

fn harness() -> Harness {
    let store = MemoryRecordStore::new();
    harness_with_store(Arc::new(store.clone()), store)
}

fn image(tag: &str) -> UploadedImage {
    UploadedImage::new(tag.as_bytes().to_vec())
}

// ── Single runs ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn upload_normalises_text_and_embeds_with_selected_model() {
    let h = harness();
    h.extractor.script.ready(Ok("Hello   world  ".into()));
    h.embedder.script.ready(Ok(vec![0.1, 0.2, 0.3]));

    let outcome = h.controller.upload(image("a")).await;

    assert_eq!(outcome, RunOutcome::Completed(PipelineStatus::Success));
    let snap = h.controller.snapshot();
    assert_eq!(snap.status, PipelineStatus::Success);
    assert_eq!(snap.text(), Some("Hello world"));
    assert_eq!(snap.extraction.as_ref().unwrap().raw_text, "Hello   world  ");
    let embedding = snap.embedding.expect("embedding");
    assert_eq!(embedding.model_id(), "model-a");
    assert_eq!(embedding.dimensions(), 3);
    assert_eq!(snap.persistence, PersistOutcome::Saved);
    assert!(snap.error_message.is_none());

    assert_eq!(h.embedder.seen(), vec![("model-a".to_string(), "Hello world".to_string())]);
    let records = h.store.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].text, "Hello world");
    assert_eq!(records[0].model, "model-a");
    assert_eq!(records[0].embedding.model_id(), "model-a");
}

#[tokio::test]
async fn status_transitions_in_order() {
    let h = harness();
    h.extractor.script.ready(Ok("text".into()));
    h.embedder.script.ready(Ok(vec![1.0]));

    h.controller.upload(image("a")).await;

    assert_eq!(
        *h.observer.statuses.lock().unwrap(),
        vec![
            PipelineStatus::Loading(Phase::Extracting),
            PipelineStatus::Loading(Phase::Embedding),
            PipelineStatus::Success,
        ]
    );
}

#[tokio::test]
async fn empty_extraction_shows_sentinel_and_skips_embedding() {
    let h = harness();
    h.extractor.script.ready(Ok("  \n\t ".into()));

    let outcome = h.controller.upload(image("blank")).await;

    assert_eq!(outcome, RunOutcome::Completed(PipelineStatus::Success));
    let snap = h.controller.snapshot();
    assert_eq!(snap.text(), Some(NO_TEXT_SENTINEL));
    assert!(snap.embedding.is_none());
    assert_eq!(snap.persistence, PersistOutcome::NotAttempted);
    assert_eq!(h.embedder.script.calls(), 0);
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn extraction_failure_reaches_error_with_generic_message() {
    let h = harness();
    h.extractor.script.ready(Err(()));

    let outcome = h.controller.upload(image("a")).await;

    assert_eq!(outcome, RunOutcome::Completed(PipelineStatus::Error));
    let snap = h.controller.snapshot();
    assert_eq!(snap.status, PipelineStatus::Error);
    assert_eq!(snap.error_message.as_deref(), Some(GENERIC_ERROR_MESSAGE));
    assert!(snap.extraction.is_none());
    assert!(snap.embedding.is_none());
    assert_eq!(h.embedder.script.calls(), 0);
}

#[tokio::test]
async fn embedding_failure_keeps_text_but_no_embedding() {
    let h = harness();
    h.extractor.script.ready(Ok("visible text".into()));
    h.embedder.script.ready(Err(()));

    let outcome = h.controller.upload(image("a")).await;

    assert_eq!(outcome, RunOutcome::Completed(PipelineStatus::Error));
    let snap = h.controller.snapshot();
    assert_eq!(snap.status, PipelineStatus::Error);
    assert!(snap.embedding.is_none());
    assert_eq!(snap.text(), Some("visible text"));
    assert_eq!(snap.error_message.as_deref(), Some(GENERIC_ERROR_MESSAGE));
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn persistence_failure_does_not_revert_success() {
    let h = harness_with_store(Arc::new(FailingStore), MemoryRecordStore::new());
    h.extractor.script.ready(Ok("keep me".into()));
    h.embedder.script.ready(Ok(vec![0.5, 0.5]));

    let outcome = h.controller.upload(image("a")).await;

    assert_eq!(outcome, RunOutcome::Completed(PipelineStatus::Success));
    let snap = h.controller.snapshot();
    assert_eq!(snap.status, PipelineStatus::Success);
    assert_eq!(snap.text(), Some("keep me"));
    assert_eq!(snap.embedding.map(|e| e.dimensions()), Some(2));
    assert!(matches!(snap.persistence, PersistOutcome::Failed(ref e) if e.contains("quota")));
    assert_eq!(h.observer.persist_failures.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn new_upload_clears_previous_results() {
    let h = harness();
    h.extractor.script.ready(Ok("first".into()));
    h.embedder.script.ready(Ok(vec![1.0]));
    h.controller.upload(image("a")).await;

    let gate = h.extractor.script.gated();
    let controller = h.controller.clone();
    let run = tokio::spawn(async move { controller.upload(image("b")).await });

    // Wait until the second run is parked on extraction.
    while h.extractor.script.calls() < 2 {
        tokio::task::yield_now().await;
    }
    let snap = h.controller.snapshot();
    assert_eq!(snap.status, PipelineStatus::Loading(Phase::Extracting));
    assert!(snap.extraction.is_none());
    assert!(snap.embedding.is_none());
    assert_eq!(snap.image.as_ref().map(|i| i.bytes().to_vec()), Some(b"b".to_vec()));

    gate.send(Ok(String::new())).unwrap();
    assert_eq!(run.await.unwrap(), RunOutcome::Completed(PipelineStatus::Success));
}

#[test]
fn upload_stays_pending_until_extraction_replies() {
    let h = harness();
    let gate = h.extractor.script.gated();
    h.embedder.script.ready(Ok(vec![1.0, 2.0]));

    let mut run = tokio_test::task::spawn(h.controller.upload(image("a")));
    tokio_test::assert_pending!(run.poll());
    assert_eq!(
        h.controller.status(),
        PipelineStatus::Loading(Phase::Extracting)
    );
    assert_eq!(h.embedder.script.calls(), 0);

    gate.send(Ok("released".into())).unwrap();
    assert!(run.is_woken());
    let outcome = tokio_test::assert_ready!(run.poll());

    assert_eq!(outcome, RunOutcome::Completed(PipelineStatus::Success));
    assert_eq!(h.controller.snapshot().text(), Some("released"));
    assert_eq!(h.store.len(), 1);
}

// ── Model switches ───────────────────────────────────────────────────────────

#[tokio::test]
async fn model_switch_reembeds_cached_text_without_extraction() {
    let h = harness();
    h.extractor.script.ready(Ok("Invoice 42".into()));
    h.embedder.script.ready(Ok(vec![1.0, 2.0]));
    h.controller.upload(image("a")).await;
    assert_eq!(h.extractor.script.calls(), 1);

    h.embedder.script.ready(Ok(vec![3.0, 4.0, 5.0]));
    let outcome = h.controller.on_model_changed("model-b").await.unwrap();

    assert_eq!(outcome, RunOutcome::Completed(PipelineStatus::Success));
    assert_eq!(h.extractor.script.calls(), 1, "extraction must not repeat");
    let snap = h.controller.snapshot();
    assert_eq!(snap.selected_model.id, "model-b");
    assert_eq!(snap.text(), Some("Invoice 42"));
    let embedding = snap.embedding.expect("embedding");
    assert_eq!(embedding.model_id(), "model-b");
    assert_eq!(embedding.values().to_vec(), vec![3.0f32, 4.0, 5.0]);

    assert_eq!(
        h.embedder.seen(),
        vec![
            ("model-a".to_string(), "Invoice 42".to_string()),
            ("model-b".to_string(), "Invoice 42".to_string()),
        ]
    );
    let models: Vec<String> = h.store.records().into_iter().map(|r| r.model).collect();
    assert_eq!(models, ["model-a", "model-b"]);
}

#[tokio::test]
async fn model_switch_without_text_only_changes_selection() {
    let h = harness();
    h.extractor.script.ready(Ok(String::new()));
    h.controller.upload(image("blank")).await;
    let token_before = h.controller.snapshot().token;

    let outcome = h.controller.on_model_changed("model-c").await.unwrap();

    assert_eq!(outcome, RunOutcome::Skipped);
    let snap = h.controller.snapshot();
    assert_eq!(snap.selected_model.id, "model-c");
    assert_eq!(snap.token, token_before);
    assert_eq!(snap.status, PipelineStatus::Success);
    assert_eq!(snap.text(), Some(NO_TEXT_SENTINEL));
    assert_eq!(h.embedder.script.calls(), 0, "sentinel must never be embedded");
}

#[tokio::test]
async fn model_switch_before_any_upload_is_noop() {
    let h = harness();
    let outcome = h.controller.on_model_changed("model-b").await.unwrap();
    assert_eq!(outcome, RunOutcome::Skipped);
    assert_eq!(h.controller.status(), PipelineStatus::Idle);
    assert_eq!(h.controller.selected_model().id, "model-b");
}

#[tokio::test]
async fn model_switch_retries_after_embedding_error() {
    let h = harness();
    h.extractor.script.ready(Ok("retry me".into()));
    h.embedder.script.ready(Err(()));
    h.controller.upload(image("a")).await;
    assert_eq!(h.controller.status(), PipelineStatus::Error);

    // Re-selecting the same model after an error is allowed as a retry.
    h.embedder.script.ready(Ok(vec![9.0]));
    let outcome = h.controller.on_model_changed("model-a").await.unwrap();

    assert_eq!(outcome, RunOutcome::Completed(PipelineStatus::Success));
    let snap = h.controller.snapshot();
    assert!(snap.error_message.is_none());
    assert_eq!(snap.embedding.map(|e| e.model_id().to_string()), Some("model-a".into()));
    assert_eq!(h.extractor.script.calls(), 1);
}

#[tokio::test]
async fn unknown_model_leaves_state_untouched() {
    let h = harness();
    assert!(h.controller.on_model_changed("model-z").await.is_err());
    assert_eq!(h.controller.selected_model().id, "model-a");
}

// ── Overlapping runs ─────────────────────────────────────────────────────────

#[tokio::test]
async fn upload_b_while_a_extracting_reflects_only_b() {
    let h = harness();
    let gate_a = h.extractor.script.gated();
    let gate_b = h.extractor.script.gated();
    // Only B may reach the embedder.
    h.embedder.script.ready(Ok(vec![7.0, 7.0]));

    let (a, b, ()) = tokio::join!(
        h.controller.upload(image("A")),
        h.controller.upload(image("B")),
        async {
            gate_b.send(Ok("text from B".into())).unwrap();
            tokio::task::yield_now().await;
            gate_a.send(Ok("text from A".into())).unwrap();
        }
    );

    assert_eq!(a, RunOutcome::Superseded);
    assert_eq!(b, RunOutcome::Completed(PipelineStatus::Success));
    let snap = h.controller.snapshot();
    assert_eq!(snap.text(), Some("text from B"));
    assert_eq!(snap.embedding.map(|e| e.values().to_vec()), Some(vec![7.0, 7.0]));
    assert_eq!(h.embedder.seen(), vec![("model-a".to_string(), "text from B".to_string())]);
    let texts: Vec<String> = h.store.records().into_iter().map(|r| r.text).collect();
    assert_eq!(texts, ["text from B"]);
    assert_eq!(*h.observer.superseded.lock().unwrap(), vec![1]);
}

#[tokio::test]
async fn stale_a_resolving_first_is_still_discarded() {
    let h = harness();
    let gate_a = h.extractor.script.gated();
    let gate_b = h.extractor.script.gated();
    h.embedder.script.ready(Ok(vec![2.0]));

    let (a, b, ()) = tokio::join!(
        h.controller.upload(image("A")),
        h.controller.upload(image("B")),
        async {
            gate_a.send(Ok("text from A".into())).unwrap();
            tokio::task::yield_now().await;
            gate_b.send(Ok("text from B".into())).unwrap();
        }
    );

    assert_eq!(a, RunOutcome::Superseded);
    assert_eq!(b, RunOutcome::Completed(PipelineStatus::Success));
    assert_eq!(h.controller.snapshot().text(), Some("text from B"));
    assert_eq!(h.embedder.script.calls(), 1);
}

#[tokio::test]
async fn stale_failure_does_not_flip_newer_success() {
    let h = harness();
    let gate_a = h.extractor.script.gated();
    h.extractor.script.ready(Ok("B wins".into()));
    h.embedder.script.ready(Ok(vec![1.0]));

    let (a, b) = tokio::join!(h.controller.upload(image("A")), async {
        let outcome = h.controller.upload(image("B")).await;
        gate_a.send(Err(())).unwrap();
        outcome
    });

    assert_eq!(a, RunOutcome::Superseded);
    assert_eq!(b, RunOutcome::Completed(PipelineStatus::Success));
    let snap = h.controller.snapshot();
    assert_eq!(snap.status, PipelineStatus::Success);
    assert!(snap.error_message.is_none());
}

#[tokio::test]
async fn model_switch_during_upload_embedding_supersedes_it() {
    let h = harness();
    h.extractor.script.ready(Ok("shared text".into()));
    let gate_upload_embed = h.embedder.script.gated();
    let gate_switch_embed = h.embedder.script.gated();

    let (upload, switch, ()) = tokio::join!(
        h.controller.upload(image("A")),
        async { h.controller.on_model_changed("model-b").await.unwrap() },
        async {
            gate_switch_embed.send(Ok(vec![0.2; 5])).unwrap();
            tokio::task::yield_now().await;
            gate_upload_embed.send(Ok(vec![0.1; 3])).unwrap();
        }
    );

    assert_eq!(upload, RunOutcome::Superseded);
    assert_eq!(switch, RunOutcome::Completed(PipelineStatus::Success));
    assert_eq!(h.extractor.script.calls(), 1);
    let snap = h.controller.snapshot();
    let embedding = snap.embedding.expect("embedding");
    assert_eq!(embedding.model_id(), "model-b");
    assert_eq!(embedding.dimensions(), 5);
    let models: Vec<String> = h.store.records().into_iter().map(|r| r.model).collect();
    assert_eq!(models, ["model-b"], "stale upload must not persist");
}

#[tokio::test]
async fn model_switch_during_extraction_is_picked_up_by_upload() {
    let h = harness();
    let gate_extract = h.extractor.script.gated();
    h.embedder.script.ready(Ok(vec![4.0, 4.0]));

    let (upload, switch, ()) = tokio::join!(
        h.controller.upload(image("A")),
        async { h.controller.on_model_changed("model-c").await.unwrap() },
        async {
            gate_extract.send(Ok("late text".into())).unwrap();
        }
    );

    assert_eq!(switch, RunOutcome::Skipped);
    assert_eq!(upload, RunOutcome::Completed(PipelineStatus::Success));
    let snap = h.controller.snapshot();
    assert_eq!(snap.embedding.map(|e| e.model_id().to_string()), Some("model-c".into()));
    assert_eq!(h.embedder.seen(), vec![("model-c".to_string(), "late text".to_string())]);
}

#[tokio::test]
async fn subscribers_see_final_state() {
    let h = harness();
    let mut rx = h.controller.subscribe();
    h.extractor.script.ready(Ok("watched".into()));
    h.embedder.script.ready(Ok(vec![1.0]));

    h.controller.upload(image("a")).await;

    assert!(rx.has_changed().unwrap());
    let snap = rx.borrow_and_update().clone();
    assert_eq!(snap.status, PipelineStatus::Success);
    assert_eq!(snap.text(), Some("watched"));
}
