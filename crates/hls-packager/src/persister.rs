//! # Segment and index persisters
//!
//! Both writers are [`FormatStrategy`] implementations driven by a
//! [`WriterTask`]. The blocking writer is moved into `spawn_blocking` for each
//! write and put back afterwards; each branch writes sequentially, so the writer
//! never needs a lock.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use pipeline_common::progress::notify;
use pipeline_common::{
    FormatStrategy, OnProgress, PostWriteAction, Progress, ProgressEvent, WriterConfig,
    WriterState, WriterTask,
};
use tokio::task::spawn_blocking;
use tracing::{debug, info};

use crate::hub::{HubEvent, Subscription};
use crate::{IndexDocument, PackagerConfig, PackagerError, Segment};

fn create_file_writer(path: &Path, config: &WriterConfig) -> io::Result<BufWriter<File>> {
    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)?;
    Ok(BufWriter::with_capacity(config.buffer_capacity, file))
}

/// Writes every segment payload to its own file.
pub struct SegmentFileStrategy {
    config: Arc<PackagerConfig>,
    on_progress: Option<OnProgress>,
    media_duration: f64,
}

impl SegmentFileStrategy {
    pub fn new(config: Arc<PackagerConfig>, on_progress: Option<OnProgress>) -> Self {
        Self {
            config,
            on_progress,
            media_duration: 0.0,
        }
    }

    /// Seconds of media written so far.
    pub fn media_duration(&self) -> f64 {
        self.media_duration
    }
}

impl FormatStrategy<Arc<Segment>> for SegmentFileStrategy {
    type Writer = BufWriter<File>;
    type StrategyError = io::Error;

    fn create_writer(&self, path: &Path, config: &WriterConfig) -> io::Result<Self::Writer> {
        create_file_writer(path, config)
    }

    fn write_item(&mut self, writer: &mut Self::Writer, item: &Arc<Segment>) -> io::Result<u64> {
        writer.write_all(item.payload())?;
        Ok(item.size() as u64)
    }

    fn file_path(&self, config: &WriterConfig, item: &Arc<Segment>) -> PathBuf {
        config.base_path.join(item.file_name(&self.config))
    }

    fn on_file_open(
        &mut self,
        _writer: &mut Self::Writer,
        path: &Path,
        _state: &WriterState,
    ) -> io::Result<u64> {
        notify(
            self.on_progress.as_ref(),
            ProgressEvent::FileOpened {
                path: path.to_path_buf(),
            },
        );
        Ok(0)
    }

    fn on_file_close(
        &mut self,
        _writer: &mut Self::Writer,
        path: &Path,
        _state: &WriterState,
    ) -> io::Result<u64> {
        notify(
            self.on_progress.as_ref(),
            ProgressEvent::FileClosed {
                path: path.to_path_buf(),
            },
        );
        Ok(0)
    }

    fn after_item_written(
        &mut self,
        item: &Arc<Segment>,
        _bytes_written: u64,
        state: &WriterState,
    ) -> io::Result<PostWriteAction> {
        self.media_duration += item.duration();
        if let Some(path) = &state.current_file_path {
            notify(
                self.on_progress.as_ref(),
                ProgressEvent::ProgressUpdate {
                    path: path.clone(),
                    progress: Progress {
                        bytes_written: state.bytes_written_current_file,
                        total_bytes_written: state.bytes_written_total,
                        items_processed: state.items_written_total as u64,
                        duration: Some(Duration::from_secs_f64(self.media_duration.max(0.0))),
                    },
                },
            );
        }
        // One segment per file.
        Ok(PostWriteAction::Close)
    }
}

/// What the segment branch wrote.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SegmentWriteStats {
    /// Media and initialization segments written.
    pub segments_written: usize,
    pub bytes_written: u64,
    /// Seconds of media written.
    pub media_duration: f64,
}

/// Segment branch: writes each hub segment to `output_directory/file_name`.
pub struct SegmentPersister {
    // Taken while a write runs on the blocking pool.
    task: Option<WriterTask<Arc<Segment>, SegmentFileStrategy>>,
    stats: SegmentWriteStats,
}

impl SegmentPersister {
    pub fn new(config: Arc<PackagerConfig>, on_progress: Option<OnProgress>) -> Self {
        let writer_config = WriterConfig::new(config.output_directory.clone());
        let strategy = SegmentFileStrategy::new(config, on_progress);
        Self {
            task: Some(WriterTask::new(writer_config, strategy)),
            stats: SegmentWriteStats::default(),
        }
    }

    /// Writes one segment off the async runtime. The file holds exactly the payload.
    pub async fn write_segment(&mut self, segment: Arc<Segment>) -> Result<(), PackagerError> {
        let mut task = self.task.take().ok_or_else(|| {
            PackagerError::Internal("Segment writer is gone after an earlier failure".to_string())
        })?;

        let (task, result) = spawn_blocking(move || {
            let result = task.process_item(segment);
            (task, result)
        })
        .await?;

        let state = task.get_state();
        self.stats.segments_written = state.items_written_total;
        self.stats.bytes_written = state.bytes_written_total;
        self.stats.media_duration = task.strategy().media_duration();
        self.task = Some(task);

        result.map_err(PackagerError::from)
    }

    /// Consumes hub events until the terminal signal or the first write failure.
    ///
    /// On failure the subscription is dropped, so the hub stops feeding this branch.
    pub async fn run(mut self, mut subscription: Subscription) -> Result<SegmentWriteStats, PackagerError> {
        while let Some(event) = subscription.recv().await {
            match event {
                HubEvent::Segment(segment) => {
                    info!(
                        sequence_number = segment.sequence_number(),
                        bytes = segment.size(),
                        "Writing segment"
                    );
                    self.write_segment(segment).await?;
                }
                HubEvent::Finished => {
                    debug!(
                        segments = self.stats.segments_written,
                        bytes = self.stats.bytes_written,
                        "Segment branch finished"
                    );
                    return Ok(self.stats);
                }
                HubEvent::Failed(error) => return Err(error.into()),
            }
        }
        Err(PackagerError::ProtocolViolation(
            "hub closed the segment subscription without a terminal signal".to_string(),
        ))
    }
}

/// Writes the index document as plain text.
pub struct IndexFileStrategy {
    config: Arc<PackagerConfig>,
    on_progress: Option<OnProgress>,
}

impl FormatStrategy<IndexDocument> for IndexFileStrategy {
    type Writer = BufWriter<File>;
    type StrategyError = io::Error;

    fn create_writer(&self, path: &Path, config: &WriterConfig) -> io::Result<Self::Writer> {
        create_file_writer(path, config)
    }

    fn write_item(&mut self, writer: &mut Self::Writer, item: &IndexDocument) -> io::Result<u64> {
        writer.write_all(item.as_str().as_bytes())?;
        Ok(item.as_str().len() as u64)
    }

    fn file_path(&self, config: &WriterConfig, _item: &IndexDocument) -> PathBuf {
        config.base_path.join(&self.config.index_file_name)
    }

    fn on_file_open(
        &mut self,
        _writer: &mut Self::Writer,
        path: &Path,
        _state: &WriterState,
    ) -> io::Result<u64> {
        notify(
            self.on_progress.as_ref(),
            ProgressEvent::FileOpened {
                path: path.to_path_buf(),
            },
        );
        Ok(0)
    }

    fn on_file_close(
        &mut self,
        _writer: &mut Self::Writer,
        path: &Path,
        _state: &WriterState,
    ) -> io::Result<u64> {
        notify(
            self.on_progress.as_ref(),
            ProgressEvent::FileClosed {
                path: path.to_path_buf(),
            },
        );
        Ok(0)
    }

    fn after_item_written(
        &mut self,
        _item: &IndexDocument,
        _bytes_written: u64,
        _state: &WriterState,
    ) -> io::Result<PostWriteAction> {
        Ok(PostWriteAction::Close)
    }
}

/// What the index branch wrote.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexWriteStats {
    pub path: PathBuf,
    pub bytes_written: u64,
    pub entries: usize,
}

/// Index branch tail: writes the finished document to
/// `output_directory/index_file_name`. The write is not atomic.
pub struct IndexPersister {
    config: Arc<PackagerConfig>,
    task: WriterTask<IndexDocument, IndexFileStrategy>,
}

impl IndexPersister {
    pub fn new(config: Arc<PackagerConfig>, on_progress: Option<OnProgress>) -> Self {
        let writer_config = WriterConfig::new(config.output_directory.clone());
        let strategy = IndexFileStrategy {
            config: Arc::clone(&config),
            on_progress,
        };
        Self {
            config,
            task: WriterTask::new(writer_config, strategy),
        }
    }

    pub async fn write(self, document: IndexDocument) -> Result<IndexWriteStats, PackagerError> {
        let IndexPersister { config, mut task } = self;
        let entries = document.entry_count();
        info!(
            index = %config.index_file_name,
            entries,
            bytes = document.as_str().len(),
            "Writing index file"
        );

        let (task, result) = spawn_blocking(move || {
            let result = task.process_item(document);
            (task, result)
        })
        .await?;
        result?;

        Ok(IndexWriteStats {
            path: config.index_path(),
            bytes_written: task.get_state().bytes_written_total,
            entries,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::BroadcastHub;
    use crate::{IndexReducer, SourceError};
    use parking_lot::Mutex;
    use std::fs;
    use tempfile::tempdir;

    fn config_for(dir: &Path) -> Arc<PackagerConfig> {
        Arc::new(
            PackagerConfig::builder()
                .output_directory(dir)
                .segment_file_name_prefix("seg")
                .segment_file_extension("ts")
                .build(),
        )
    }

    #[tokio::test]
    async fn test_segments_land_in_their_own_files() {
        let dir = tempdir().unwrap();
        let config = config_for(dir.path());
        let (hub, mut publisher) = BroadcastHub::new(8);
        let persister = SegmentPersister::new(config, None);
        let branch = tokio::spawn(persister.run(hub.subscribe()));

        publisher.emit(Segment::initialization(&b"init"[..])).await;
        publisher.emit(Segment::media(0, 2.0, &b"first"[..])).await;
        publisher.emit(Segment::media(1, 1.5, &b"second"[..])).await;
        publisher.complete_success().await;

        let stats = branch.await.unwrap().unwrap();
        assert_eq!(stats.segments_written, 3);
        assert_eq!(stats.bytes_written, 15);
        assert_eq!(stats.media_duration, 3.5);

        assert_eq!(fs::read(dir.path().join("seg.mp4")).unwrap(), b"init");
        assert_eq!(fs::read(dir.path().join("seg0.ts")).unwrap(), b"first");
        assert_eq!(fs::read(dir.path().join("seg1.ts")).unwrap(), b"second");
    }

    #[tokio::test]
    async fn test_first_write_error_stops_the_branch() {
        let dir = tempdir().unwrap();
        // A directory squatting on seg1.ts makes its write fail.
        fs::create_dir(dir.path().join("seg1.ts")).unwrap();
        let config = config_for(dir.path());

        let (hub, mut publisher) = BroadcastHub::new(8);
        let branch = tokio::spawn(SegmentPersister::new(config, None).run(hub.subscribe()));

        for n in 0..3 {
            publisher.emit(Segment::media(n, 1.0, vec![n as u8])).await;
        }
        publisher.complete_success().await;

        let err = branch.await.unwrap().unwrap_err();
        assert!(err.is_write());
        assert!(err.to_string().contains("seg1.ts"));
        assert!(dir.path().join("seg0.ts").is_file());
        assert!(!dir.path().join("seg2.ts").exists());
    }

    #[tokio::test]
    async fn test_source_failure_is_the_branch_failure() {
        let dir = tempdir().unwrap();
        let (hub, mut publisher) = BroadcastHub::new(8);
        let branch = tokio::spawn(
            SegmentPersister::new(config_for(dir.path()), None).run(hub.subscribe()),
        );

        publisher.emit(Segment::media(0, 1.0, vec![1u8])).await;
        publisher
            .complete_failure(SourceError::Generation("eof".into()))
            .await;

        let err = branch.await.unwrap().unwrap_err();
        assert!(err.is_source());
        assert!(dir.path().join("seg0.ts").is_file());
    }

    #[tokio::test]
    async fn test_progress_events_follow_each_file() {
        let dir = tempdir().unwrap();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let on_progress: OnProgress = Arc::new(move |event: ProgressEvent| sink.lock().push(event));

        let mut persister = SegmentPersister::new(config_for(dir.path()), Some(on_progress));
        persister
            .write_segment(Arc::new(Segment::media(0, 2.0, &b"abc"[..])))
            .await
            .unwrap();

        let events = events.lock();
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], ProgressEvent::FileOpened { .. }));
        match &events[1] {
            ProgressEvent::ProgressUpdate { progress, .. } => {
                assert_eq!(progress.bytes_written, 3);
                assert_eq!(progress.items_processed, 1);
                assert_eq!(progress.duration, Some(Duration::from_secs(2)));
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(matches!(events[2], ProgressEvent::FileClosed { .. }));
        assert_eq!(events[2].path(), dir.path().join("seg0.ts"));
    }

    #[tokio::test]
    async fn test_index_persister_writes_document_text() {
        let dir = tempdir().unwrap();
        let config = config_for(dir.path());
        let mut reducer = IndexReducer::new(Arc::clone(&config));
        reducer.accept(&Segment::media(0, 2.0, vec![]));
        let document = reducer.finish().unwrap();
        let expected = document.as_str().to_string();

        let stats = IndexPersister::new(Arc::clone(&config), None)
            .write(document)
            .await
            .unwrap();

        assert_eq!(stats.path, dir.path().join("index.m3u8"));
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.bytes_written, expected.len() as u64);
        assert_eq!(fs::read_to_string(stats.path).unwrap(), expected);
    }

    #[tokio::test]
    async fn test_index_persister_reports_unwritable_path() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("missing");
        let config = config_for(&missing);
        let document = IndexReducer::new(Arc::clone(&config)).finish().unwrap();

        let err = IndexPersister::new(config, None)
            .write(document)
            .await
            .unwrap_err();
        assert!(err.is_write());
    }
}
