//! HLS packaging library
//!
//! Turns the segments produced by a [`SegmentSource`] into an HLS package: one
//! file per segment plus an M3U8 media playlist listing them.
//!
//! ## Features
//!
//! - Broadcast hub fanning one segment sequence out to independent consumers
//! - Index reduction into an `m3u8-rs` media playlist, with `EXT-X-MAP` for the
//!   initialization segment
//! - Segment and index persistence through `pipeline-common` writer tasks
//! - Exactly-once completion with first-failure semantics
//!
//! ## Component Overview
//!
//! - `hub`: broadcast hub and subscriptions
//! - `index`: index reducer and the finished playlist document
//! - `persister`: segment and index writers
//! - `completion`: completion aggregator and run outcome
//! - `pipeline`: [`HlsPackager`], which wires everything to a source
//!
//! ## Usage
//!
//! ```ignore
//! let config = PackagerConfig::builder()
//!     .source_path("movie.mov")
//!     .output_directory("/tmp/movie-hls")
//!     .segment_file_name_prefix("seg")
//!     .build();
//!
//! let outcome = HlsPackager::new(config).run(source).await;
//! match outcome.into_result() {
//!     Ok(summary) => println!("wrote {} segments", summary.segments_written),
//!     Err(e) => eprintln!("packaging failed: {e}"),
//! }
//! ```

pub mod completion;
mod config;
mod error;
pub mod hub;
pub mod index;
pub mod persister;
pub mod pipeline;
mod segment;
mod source;
pub mod test_utils;

pub use completion::{
    Branch, CompletionAggregator, CompletionCallback, CompletionOutcome, CompletionState,
    RunSummary,
};
pub use config::{PackagerConfig, PackagerConfigBuilder, PlaylistType};
pub use error::{ErrorKind, PackagerError, SourceError};
pub use hub::{BroadcastHub, HubEvent, HubPublisher, Subscription};
pub use index::{IndexDocument, IndexEntry, IndexModel, IndexReducer};
pub use persister::{
    IndexPersister, IndexWriteStats, SegmentPersister, SegmentWriteStats,
};
pub use pipeline::HlsPackager;
pub use segment::{Segment, SegmentKind};
pub use source::SegmentSource;
