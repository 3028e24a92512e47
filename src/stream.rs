//! Streaming view of pipeline state: one item per published snapshot.
//!
//! The presentation layer can render each item as it arrives instead of
//! polling [`PipelineController::snapshot`]. The stream yields the current
//! snapshot immediately, then every later change. Intermediate snapshots may
//! be skipped if the consumer is slower than the pipeline; the latest one is
//! never lost.

use crate::controller::{PipelineController, PipelineSnapshot};
use futures::{future, StreamExt};
use std::pin::Pin;
use tokio_stream::wrappers::WatchStream;
use tokio_stream::Stream;

/// A boxed stream of pipeline snapshots.
pub type SnapshotStream = Pin<Box<dyn Stream<Item = PipelineSnapshot> + Send>>;

impl PipelineController {
    /// Stream snapshots, starting with the current one.
    ///
    /// The stream ends only when every clone of the controller is dropped.
    pub fn status_stream(&self) -> SnapshotStream {
        Box::pin(WatchStream::new(self.subscribe()))
    }

    /// Wait until no run is loading and return that snapshot.
    ///
    /// Resolves immediately when the pipeline is idle or already settled.
    pub async fn settled(&self) -> PipelineSnapshot {
        let mut settled = self
            .status_stream()
            .filter(|s| future::ready(!s.status.is_loading()));
        match settled.next().await {
            Some(snapshot) => snapshot,
            None => self.snapshot(),
        }
    }
}
