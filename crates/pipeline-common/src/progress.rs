use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// A struct to hold progress information.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Progress {
    /// The number of bytes written to the current file.
    pub bytes_written: u64,
    /// The number of bytes written across every file of the run.
    pub total_bytes_written: u64,
    /// The number of items processed (segments, index documents).
    pub items_processed: u64,
    /// The duration of the media written so far.
    pub duration: Option<Duration>,
}

/// An enum to represent different progress events.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    /// Indicates that a new file has been opened for writing.
    FileOpened {
        /// The path to the file that was opened.
        path: PathBuf,
    },
    /// An update on the progress of writing to a file.
    ProgressUpdate {
        /// The path to the file being updated.
        path: PathBuf,
        /// The progress data.
        progress: Progress,
    },
    /// Indicates that a file has been flushed and closed.
    FileClosed {
        /// The path to the file that was closed.
        path: PathBuf,
    },
}

impl ProgressEvent {
    /// The file this event is about.
    pub fn path(&self) -> &Path {
        match self {
            ProgressEvent::FileOpened { path }
            | ProgressEvent::ProgressUpdate { path, .. }
            | ProgressEvent::FileClosed { path } => path,
        }
    }
}

/// A callback function for progress updates.
pub type OnProgress = Arc<dyn Fn(ProgressEvent) + Send + Sync>;

/// Invokes the callback, if any.
pub fn notify(on_progress: Option<&OnProgress>, event: ProgressEvent) {
    if let Some(callback) = on_progress {
        callback(event);
    }
}
