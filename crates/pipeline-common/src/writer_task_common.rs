use chrono::{DateTime, TimeDelta, Utc};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, trace};

/// Action to take after writing an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostWriteAction {
    /// Keep the current file open for the next item.
    None,
    /// Close the current file. The next item opens a fresh one.
    Close,
}

/// Configuration for the writer task.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Directory every output file is placed in.
    pub base_path: PathBuf,
    /// Capacity of the buffered writer handed to strategies.
    pub buffer_capacity: usize,
}

impl WriterConfig {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            buffer_capacity: 1024 * 1024,
        }
    }
}

/// State of the writer task.
#[derive(Debug, Default)]
pub struct WriterState {
    /// Path of the file currently open, if any.
    pub current_file_path: Option<PathBuf>,
    /// Number of items written to the current file.
    pub items_written_current_file: usize,
    /// Total number of items written across all files.
    pub items_written_total: usize,
    /// Number of bytes written to the current file.
    pub bytes_written_current_file: u64,
    /// Total number of bytes written across all files.
    pub bytes_written_total: u64,
    /// Timestamp when the current file was opened.
    pub current_file_opened_at: Option<DateTime<Utc>>,
    /// How long the most recently closed file stayed open.
    pub last_file_open_duration: Option<TimeDelta>,
    /// Number of files flushed and closed so far.
    pub files_closed: u32,
}

impl WriterState {
    pub fn reset_for_new_file(&mut self, new_path: PathBuf) {
        self.current_file_path = Some(new_path);
        self.items_written_current_file = 0;
        self.bytes_written_current_file = 0;
        self.current_file_opened_at = Some(Utc::now());
    }
}

/// Error type for the writer task. Every file-level failure names the path it hit.
#[derive(Error, Debug)]
pub enum TaskError<StrategyError: std::error::Error + Send + Sync + 'static> {
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Strategy error on {}: {source}", .path.display())]
    Strategy {
        path: PathBuf,
        #[source]
        source: StrategyError,
    },
    #[error("Internal error: {0}")]
    Internal(String),
}

impl<E: std::error::Error + Send + Sync + 'static> TaskError<E> {
    /// The file the failing operation targeted.
    pub fn path(&self) -> Option<&Path> {
        match self {
            TaskError::Io { path, .. } | TaskError::Strategy { path, .. } => Some(path),
            TaskError::Internal(_) => None,
        }
    }
}

/// Trait defining how items of type `D` are laid out on disk.
pub trait FormatStrategy<D>: Send + 'static {
    type Writer: Write;
    type StrategyError: std::error::Error + Send + Sync + 'static;

    /// Creates a new writer for the given path.
    /// This is typically a `BufWriter<File>`.
    fn create_writer(
        &self,
        path: &Path,
        config: &WriterConfig,
    ) -> Result<Self::Writer, Self::StrategyError>;

    /// Writes a single data item to the writer.
    /// Should return the number of bytes written.
    fn write_item(
        &mut self,
        writer: &mut Self::Writer,
        item: &D,
    ) -> Result<u64, Self::StrategyError>;

    /// The file an item belongs to. When it differs from the file currently open,
    /// the open file is closed first.
    fn file_path(&self, config: &WriterConfig, item: &D) -> PathBuf;

    /// Called when a new file is opened, before any items are written.
    fn on_file_open(
        &mut self,
        _writer: &mut Self::Writer,
        _path: &Path,
        _state: &WriterState,
    ) -> Result<u64, Self::StrategyError> {
        Ok(0)
    }

    /// Called when a file is about to be flushed and closed.
    fn on_file_close(
        &mut self,
        _writer: &mut Self::Writer,
        _path: &Path,
        _state: &WriterState,
    ) -> Result<u64, Self::StrategyError> {
        Ok(0)
    }

    /// Called after an item has been successfully written.
    fn after_item_written(
        &mut self,
        _item: &D,
        _bytes_written: u64,
        _state: &WriterState,
    ) -> Result<PostWriteAction, Self::StrategyError> {
        Ok(PostWriteAction::None)
    }

    /// Called if writing an item fails.
    fn on_write_error(&mut self, _error: &Self::StrategyError, _item: &D) {}
}

/// Generic blocking writer task.
///
/// Files are opened lazily: nothing touches the disk until the first item arrives.
/// All calls block, so async callers run them on `spawn_blocking`.
pub struct WriterTask<D, S: FormatStrategy<D>> {
    config: WriterConfig,
    state: WriterState,
    strategy: S,
    writer: Option<S::Writer>,
    _marker: std::marker::PhantomData<fn(D)>,
}

impl<D, S: FormatStrategy<D>> WriterTask<D, S> {
    pub fn new(config: WriterConfig, strategy: S) -> Self {
        Self {
            config,
            state: WriterState::default(),
            strategy,
            writer: None,
            _marker: std::marker::PhantomData,
        }
    }

    fn ensure_writer_open(&mut self, path: &Path) -> Result<(), TaskError<S::StrategyError>> {
        if self.writer.is_some() && self.state.current_file_path.as_deref() != Some(path) {
            debug!(
                "Switching output file: {:?} -> {}",
                self.state.current_file_path,
                path.display()
            );
            self.close()?;
        }
        if self.writer.is_none() {
            self.open_writer(path)?;
        }
        Ok(())
    }

    fn open_writer(&mut self, path: &Path) -> Result<(), TaskError<S::StrategyError>> {
        if self.writer.is_some() {
            return Err(TaskError::Internal(
                "open_writer called while a writer is open".to_string(),
            ));
        }

        debug!("Creating writer for file: {}", path.display());

        let mut new_writer = self
            .strategy
            .create_writer(path, &self.config)
            .map_err(|source| TaskError::Strategy {
                path: path.to_path_buf(),
                source,
            })?;
        self.state.reset_for_new_file(path.to_path_buf());

        let bytes_opened = self
            .strategy
            .on_file_open(&mut new_writer, path, &self.state)
            .map_err(|source| TaskError::Strategy {
                path: path.to_path_buf(),
                source,
            })?;
        self.state.bytes_written_current_file += bytes_opened;
        self.state.bytes_written_total += bytes_opened;

        self.writer = Some(new_writer);
        Ok(())
    }

    pub fn process_item(&mut self, item: D) -> Result<(), TaskError<S::StrategyError>> {
        let path = self.strategy.file_path(&self.config, &item);
        self.ensure_writer_open(&path)?;

        let Some(writer) = self.writer.as_mut() else {
            return Err(TaskError::Internal(
                "Writer not open after ensure_writer_open call".to_string(),
            ));
        };

        match self.strategy.write_item(writer, &item) {
            Ok(bytes_written) => {
                self.state.items_written_current_file += 1;
                self.state.items_written_total += 1;
                self.state.bytes_written_current_file += bytes_written;
                self.state.bytes_written_total += bytes_written;
                trace!(bytes_written, path = %path.display(), "Item written");

                let post_write_action = self
                    .strategy
                    .after_item_written(&item, bytes_written, &self.state)
                    .map_err(|source| TaskError::Strategy {
                        path: path.clone(),
                        source,
                    })?;
                if post_write_action == PostWriteAction::Close {
                    self.close()?;
                }
                Ok(())
            }
            Err(e) => {
                self.strategy.on_write_error(&e, &item);
                // The file may hold a partial item; drop it without the close hooks.
                self.writer = None;
                self.state.current_file_path = None;
                Err(TaskError::Strategy { path, source: e })
            }
        }
    }

    pub fn close(&mut self) -> Result<(), TaskError<S::StrategyError>> {
        if let Some(mut writer) = self.writer.take() {
            if let Some(path) = self.state.current_file_path.clone() {
                let bytes_closed = self
                    .strategy
                    .on_file_close(&mut writer, &path, &self.state)
                    .map_err(|source| TaskError::Strategy {
                        path: path.clone(),
                        source,
                    })?;
                self.state.bytes_written_current_file += bytes_closed;
                self.state.bytes_written_total += bytes_closed;
                writer.flush().map_err(|source| TaskError::Io {
                    path: path.clone(),
                    source,
                })?;
                self.state.files_closed += 1;

                let open_for = self
                    .state
                    .current_file_opened_at
                    .take()
                    .map(|opened_at| Utc::now() - opened_at);
                debug!(
                    path = %path.display(),
                    bytes = self.state.bytes_written_current_file,
                    open_ms = open_for.map(|open_for| open_for.num_milliseconds()),
                    "Closed file"
                );
                self.state.last_file_open_duration = open_for;
            }
        }
        self.state.current_file_path = None;
        Ok(())
    }

    pub fn get_current_file_path(&self) -> Option<&PathBuf> {
        self.state.current_file_path.as_ref()
    }

    pub fn get_state(&self) -> &WriterState {
        &self.state
    }

    /// Returns a reference to the strategy.
    pub fn strategy(&self) -> &S {
        &self.strategy
    }
}
