//! Scripted segment source for tests and benches.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::{HubPublisher, PackagerConfig, Segment, SegmentSource, SourceError};

/// Replays a fixed list of segments, optionally failing at a chosen point.
#[derive(Debug, Clone, Default)]
pub struct ScriptedSource {
    initialization: Option<Bytes>,
    media: Vec<(f64, Bytes)>,
    load_error: Option<SourceError>,
    fail_after: Option<(usize, SourceError)>,
    emit_delay: Option<Duration>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// One media segment per duration; segment `n` carries the payload `"segment-n"`.
    pub fn with_durations(durations: &[f64]) -> Self {
        let mut source = Self::new();
        for (n, duration) in durations.iter().enumerate() {
            source = source.push(*duration, format!("segment-{n}").into_bytes());
        }
        source
    }

    pub fn push(mut self, duration: f64, payload: impl Into<Bytes>) -> Self {
        self.media.push((duration, payload.into()));
        self
    }

    /// Emits an initialization segment ahead of the media segments.
    pub fn with_initialization(mut self, payload: impl Into<Bytes>) -> Self {
        self.initialization = Some(payload.into());
        self
    }

    pub fn failing_to_load(error: SourceError) -> Self {
        Self {
            load_error: Some(error),
            ..Self::default()
        }
    }

    /// Fails generation once `count` media segments have been emitted.
    pub fn fail_after(mut self, count: usize, error: SourceError) -> Self {
        self.fail_after = Some((count, error));
        self
    }

    /// Sleeps before each emission.
    pub fn with_emit_delay(mut self, delay: Duration) -> Self {
        self.emit_delay = Some(delay);
        self
    }

    /// Expected payload of each media segment, in order.
    pub fn payloads(&self) -> impl Iterator<Item = &Bytes> {
        self.media.iter().map(|(_, payload)| payload)
    }

    fn failure_at(&self, emitted: usize) -> Option<SourceError> {
        match &self.fail_after {
            Some((count, error)) if *count == emitted => Some(error.clone()),
            _ => None,
        }
    }
}

#[async_trait]
impl SegmentSource for ScriptedSource {
    type Tracks = Vec<Segment>;

    async fn load_tracks(&mut self, _config: &PackagerConfig) -> Result<Vec<Segment>, SourceError> {
        if let Some(error) = self.load_error.take() {
            return Err(error);
        }
        let initialization = self.initialization.iter().cloned().map(Segment::initialization);
        let media = self
            .media
            .iter()
            .enumerate()
            .map(|(n, (duration, payload))| Segment::media(n as u64, *duration, payload.clone()));
        Ok(initialization.chain(media).collect())
    }

    async fn generate_segments(
        &mut self,
        tracks: Vec<Segment>,
        _config: &PackagerConfig,
        publisher: &mut HubPublisher,
    ) -> Result<(), SourceError> {
        let mut emitted = 0;
        for segment in tracks {
            if !segment.is_initialization() {
                if let Some(error) = self.failure_at(emitted) {
                    return Err(error);
                }
                emitted += 1;
            }
            if let Some(delay) = self.emit_delay {
                tokio::time::sleep(delay).await;
            }
            publisher.emit(segment).await;
        }
        match self.failure_at(emitted) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}
