//! # HLS packaging pipeline
//!
//! Wires a [`SegmentSource`] to the two hub branches:
//!
//! ```text
//! source -> hub -+-> index reducer -> index persister -+-> aggregator -> caller
//!                +-> segment persister ----------------+
//! ```
//!
//! Both branches subscribe before generation starts and run as separate tokio
//! tasks. The outcome is delivered exactly once, either to a callback or as the
//! value of [`HlsPackager::run`].

use std::sync::Arc;

use pipeline_common::OnProgress;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::completion::{CompletionAggregator, CompletionCallback, CompletionOutcome};
use crate::hub::BroadcastHub;
use crate::persister::{IndexPersister, SegmentPersister};
use crate::{IndexReducer, PackagerConfig, PackagerError, SegmentSource};

/// Runs one packaging job per call.
#[derive(Clone)]
pub struct HlsPackager {
    config: Arc<PackagerConfig>,
    on_progress: Option<OnProgress>,
}

impl HlsPackager {
    pub fn new(config: PackagerConfig) -> Self {
        Self {
            config: Arc::new(config),
            on_progress: None,
        }
    }

    /// Reports every segment and index file written.
    pub fn with_progress(mut self, on_progress: OnProgress) -> Self {
        self.on_progress = Some(on_progress);
        self
    }

    pub fn config(&self) -> &PackagerConfig {
        &self.config
    }

    /// Packages `source` and resolves to the run's outcome.
    pub async fn run<S: SegmentSource>(&self, source: S) -> CompletionOutcome {
        let (tx, rx) = oneshot::channel();
        self.drive(
            source,
            Box::new(move |outcome| {
                let _ = tx.send(outcome);
            }),
        )
        .await;
        rx.await.unwrap_or_else(|_| {
            CompletionOutcome::Failed(PackagerError::Internal(
                "run ended without an outcome".to_string(),
            ))
        })
    }

    /// Packages `source` on a new task and hands the outcome to `callback`.
    pub fn spawn_with_callback<S, F>(&self, source: S, callback: F) -> JoinHandle<()>
    where
        S: SegmentSource,
        F: FnOnce(CompletionOutcome) + Send + 'static,
    {
        let packager = self.clone();
        tokio::spawn(async move { packager.drive(source, Box::new(callback)).await })
    }

    async fn drive<S: SegmentSource>(&self, mut source: S, callback: CompletionCallback) {
        let aggregator = CompletionAggregator::new(callback);
        info!(config = %self.config, "Starting HLS packaging");

        if let Err(error) = self.config.validate() {
            aggregator.fail(error);
            return;
        }

        let tracks = match source.load_tracks(&self.config).await {
            Ok(tracks) => tracks,
            Err(error) => {
                aggregator.fail(error.into());
                return;
            }
        };

        // Both branches must be registered before the first emission.
        let (hub, mut publisher) = BroadcastHub::new(self.config.channel_size);
        let index_subscription = hub.subscribe();
        let segment_subscription = hub.subscribe();

        let index_branch = {
            let aggregator = Arc::clone(&aggregator);
            let reducer = IndexReducer::new(Arc::clone(&self.config));
            let persister = IndexPersister::new(Arc::clone(&self.config), self.on_progress.clone());
            tokio::spawn(async move {
                let result = match reducer.run(index_subscription).await {
                    Ok(document) => persister.write(document).await,
                    Err(error) => Err(error),
                };
                aggregator.index_finished(result);
            })
        };

        let segment_branch = {
            let aggregator = Arc::clone(&aggregator);
            let persister = SegmentPersister::new(Arc::clone(&self.config), self.on_progress.clone());
            tokio::spawn(async move {
                let result = persister.run(segment_subscription).await;
                aggregator.segments_finished(result);
            })
        };

        match source
            .generate_segments(tracks, &self.config, &mut publisher)
            .await
        {
            Ok(()) => {
                info!(segments = hub.emitted(), "Segment generation finished");
                publisher.complete_success().await;
            }
            Err(error) => {
                warn!(%error, emitted = hub.emitted(), "Segment generation failed");
                publisher.complete_failure(error).await;
            }
        }

        for handle in [index_branch, segment_branch] {
            if let Err(error) = handle.await {
                aggregator.fail(error.into());
            }
        }
    }
}
