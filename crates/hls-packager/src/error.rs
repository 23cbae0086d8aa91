use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use pipeline_common::TaskError;

/// Failure reported by a [`SegmentSource`](crate::SegmentSource).
///
/// The packager treats it as opaque: it only records that the source failed and why.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    #[error("Track loading failed: {0}")]
    TrackLoading(String),
    #[error("Segment generation failed: {0}")]
    Generation(String),
}

/// Coarse classification of a [`PackagerError`], for callers that branch on kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Source,
    Write,
    ProtocolViolation,
    InvalidConfig,
    Internal,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum PackagerError {
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Write error on {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },

    /// A pipeline contract was broken, e.g. the hub closed a subscription without
    /// a terminal signal.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PackagerError {
    pub fn write(path: impl Into<PathBuf>, source: io::Error) -> Self {
        PackagerError::Write {
            path: path.into(),
            source: Arc::new(source),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            PackagerError::Source(_) => ErrorKind::Source,
            PackagerError::Write { .. } => ErrorKind::Write,
            PackagerError::ProtocolViolation(_) => ErrorKind::ProtocolViolation,
            PackagerError::InvalidConfig(_) => ErrorKind::InvalidConfig,
            PackagerError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn is_source(&self) -> bool {
        self.kind() == ErrorKind::Source
    }

    pub fn is_write(&self) -> bool {
        self.kind() == ErrorKind::Write
    }
}

impl From<TaskError<io::Error>> for PackagerError {
    fn from(err: TaskError<io::Error>) -> Self {
        match err {
            TaskError::Io { path, source } | TaskError::Strategy { path, source } => {
                PackagerError::write(path, source)
            }
            TaskError::Internal(message) => PackagerError::Internal(message),
        }
    }
}

impl From<tokio::task::JoinError> for PackagerError {
    fn from(err: tokio::task::JoinError) -> Self {
        PackagerError::Internal(format!("Writer task failed: {err}"))
    }
}
