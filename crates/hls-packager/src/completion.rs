//! # Completion Aggregator
//!
//! Joins the terminal signals of the two hub branches into one outcome. The
//! state moves out of [`CompletionState::Running`] exactly once: to `Failed` on
//! the first failure from either branch, or to `Succeeded` once both branches
//! have succeeded. The completion callback runs on whichever task makes that
//! transition, after the state lock has been released.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::PackagerError;
use crate::persister::{IndexWriteStats, SegmentWriteStats};

/// The two hub consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Branch {
    /// Segment Persister.
    Segments,
    /// Index Reducer followed by the Index Persister.
    Index,
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Branch::Segments => f.write_str("segments"),
            Branch::Index => f.write_str("index"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionState {
    Running,
    Succeeded,
    Failed,
}

/// What a successful run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    /// Segment files written, initialization segment included.
    pub segments_written: usize,
    /// Bytes written across segment files and the index.
    pub bytes_written: u64,
    /// Seconds of media written.
    pub media_duration: f64,
    pub index_path: PathBuf,
    pub index_entries: usize,
}

impl RunSummary {
    fn new(segments: SegmentWriteStats, index: IndexWriteStats) -> Self {
        Self {
            segments_written: segments.segments_written,
            bytes_written: segments.bytes_written + index.bytes_written,
            media_duration: segments.media_duration,
            index_path: index.path,
            index_entries: index.entries,
        }
    }
}

/// Result of one run, delivered exactly once.
#[derive(Debug, Clone)]
pub enum CompletionOutcome {
    Succeeded(RunSummary),
    Failed(PackagerError),
}

impl CompletionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CompletionOutcome::Succeeded(_))
    }

    pub fn summary(&self) -> Option<&RunSummary> {
        match self {
            CompletionOutcome::Succeeded(summary) => Some(summary),
            CompletionOutcome::Failed(_) => None,
        }
    }

    pub fn error(&self) -> Option<&PackagerError> {
        match self {
            CompletionOutcome::Succeeded(_) => None,
            CompletionOutcome::Failed(error) => Some(error),
        }
    }

    pub fn into_result(self) -> Result<RunSummary, PackagerError> {
        match self {
            CompletionOutcome::Succeeded(summary) => Ok(summary),
            CompletionOutcome::Failed(error) => Err(error),
        }
    }
}

/// Receives the run's outcome. Called once.
pub type CompletionCallback = Box<dyn FnOnce(CompletionOutcome) + Send>;

struct Inner {
    state: CompletionState,
    segments: Option<SegmentWriteStats>,
    index: Option<IndexWriteStats>,
    callback: Option<CompletionCallback>,
}

pub struct CompletionAggregator {
    inner: Mutex<Inner>,
}

impl CompletionAggregator {
    pub fn new(callback: CompletionCallback) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner {
                state: CompletionState::Running,
                segments: None,
                index: None,
                callback: Some(callback),
            }),
        })
    }

    pub fn state(&self) -> CompletionState {
        self.inner.lock().state
    }

    /// Terminal signal of the segment branch.
    pub fn segments_finished(&self, result: Result<SegmentWriteStats, PackagerError>) {
        match result {
            Ok(stats) => self.succeed(|inner| inner.segments = Some(stats)),
            Err(error) => self.fail_branch(Some(Branch::Segments), error),
        }
    }

    /// Terminal signal of the index branch.
    pub fn index_finished(&self, result: Result<IndexWriteStats, PackagerError>) {
        match result {
            Ok(stats) => self.succeed(|inner| inner.index = Some(stats)),
            Err(error) => self.fail_branch(Some(Branch::Index), error),
        }
    }

    /// Failure outside the branches: invalid configuration, track loading, a
    /// branch task that died.
    pub fn fail(&self, error: PackagerError) {
        self.fail_branch(None, error);
    }

    fn succeed(&self, record: impl FnOnce(&mut Inner)) {
        let fire = {
            let mut inner = self.inner.lock();
            if inner.state != CompletionState::Running {
                debug!(state = ?inner.state, "Discarding branch success after completion");
                return;
            }
            record(&mut *inner);
            let summary = match (inner.segments.take(), inner.index.take()) {
                (Some(segments), Some(index)) => RunSummary::new(segments, index),
                (segments, index) => {
                    inner.segments = segments;
                    inner.index = index;
                    return;
                }
            };
            inner.state = CompletionState::Succeeded;
            info!(
                segments = summary.segments_written,
                bytes = summary.bytes_written,
                index = %summary.index_path.display(),
                "Packaging succeeded"
            );
            inner
                .callback
                .take()
                .map(|callback| (callback, CompletionOutcome::Succeeded(summary)))
        };
        if let Some((callback, outcome)) = fire {
            callback(outcome);
        }
    }

    fn fail_branch(&self, branch: Option<Branch>, error: PackagerError) {
        let fire = {
            let mut inner = self.inner.lock();
            if inner.state != CompletionState::Running {
                debug!(
                    branch = ?branch,
                    %error,
                    state = ?inner.state,
                    "Discarding failure after completion"
                );
                return;
            }
            inner.state = CompletionState::Failed;
            match branch {
                Some(branch) => error!(%branch, %error, "Packaging failed"),
                None => error!(%error, "Packaging failed"),
            }
            inner
                .callback
                .take()
                .map(|callback| (callback, CompletionOutcome::Failed(error)))
        };
        if let Some((callback, outcome)) = fire {
            callback(outcome);
        }
    }
}
