//! # Pipeline Common
//!
//! Building blocks shared by the packaging pipeline:
//!
//! - a generic blocking [`WriterTask`] that lays items out on disk through a
//!   [`FormatStrategy`]
//! - [`ProgressEvent`] notifications for files being written
//! - the `init_test_tracing!` macro used by test suites
//!
//! ## License
//!
//! MIT License

pub mod progress;
mod utils;
mod writer_task_common;

pub use progress::{OnProgress, Progress, ProgressEvent};
pub use writer_task_common::{
    FormatStrategy, PostWriteAction, TaskError, WriterConfig, WriterState, WriterTask,
};
