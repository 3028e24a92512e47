//! Observer trait for pipeline lifecycle events.
//!
//! Inject an [`Arc<dyn PipelineObserver>`] via
//! [`crate::controller::PipelineControllerBuilder::observer`] to receive
//! events as runs start, change status, fail, or are superseded. This is
//! also the observability sink for persistence failures, which never show
//! up in the pipeline status.
//!
//! For a pull-based view of the same information, subscribe to snapshots
//! with [`crate::controller::PipelineController::subscribe`] instead.
//!
//! # Example
//!
//! ```rust
//! use ocr_embed::PipelineObserver;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! struct FailureCounter(AtomicUsize);
//!
//! impl PipelineObserver for FailureCounter {
//!     fn on_persist_failed(&self, error: &str) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!         eprintln!("record not saved: {error}");
//!     }
//! }
//! ```

use crate::controller::{PipelineStatus, RunKind};
use std::sync::Arc;

/// Called by the controller as runs progress.
///
/// Implementations must be `Send + Sync`: overlapping runs (a new upload
/// while an old one is still waiting on the network) may call in from
/// different tasks. All methods default to no-ops.
pub trait PipelineObserver: Send + Sync {
    /// A run was issued `token` and is now current.
    fn on_run_started(&self, token: u64, kind: RunKind) {
        let _ = (token, kind);
    }

    /// The current run moved to `status`.
    fn on_status_change(&self, token: u64, status: PipelineStatus) {
        let _ = (token, status);
    }

    /// A run finished after a newer one started; its result was dropped.
    fn on_run_superseded(&self, token: u64) {
        let _ = token;
    }

    /// The current run failed. `detail` is the internal error, not the
    /// user-facing message.
    fn on_run_failed(&self, token: u64, detail: &str) {
        let _ = (token, detail);
    }

    /// The record append failed. The run's `Success` stands.
    fn on_persist_failed(&self, error: &str) {
        let _ = error;
    }
}

/// Ignores every event. Used when no observer is configured.
pub struct NoopObserver;

impl PipelineObserver for NoopObserver {}

/// Convenience alias for the type stored by the controller.
pub type SharedObserver = Arc<dyn PipelineObserver>;
