//! # Index Reducer
//!
//! Folds the hub's segment sequence into an HLS media playlist. Entries keep
//! arrival order; the playlist text is only produced once the producer has
//! finished successfully.

use std::fmt;
use std::sync::Arc;

use m3u8_rs::{Map, MediaPlaylist, MediaSegment};
use tracing::{debug, warn};

use crate::hub::{HubEvent, Subscription};
use crate::{PackagerConfig, PackagerError, Segment, SegmentKind};

/// One playlist entry.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub sequence_number: u64,
    pub duration: f64,
    pub file_name: String,
}

/// Accumulated playlist state. Entries are only ever appended.
#[derive(Debug, Default)]
pub struct IndexModel {
    entries: Vec<IndexEntry>,
    initialization_file_name: Option<String>,
}

impl IndexModel {
    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn initialization_file_name(&self) -> Option<&str> {
        self.initialization_file_name.as_deref()
    }

    /// Longest entry duration in seconds, 0 when empty.
    pub fn max_duration(&self) -> f64 {
        self.entries
            .iter()
            .map(|entry| entry.duration)
            .fold(0.0, f64::max)
    }

    pub fn total_duration(&self) -> f64 {
        self.entries.iter().map(|entry| entry.duration).sum()
    }
}

/// Final playlist text. Never changes once produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDocument {
    text: String,
    entry_count: usize,
}

impl IndexDocument {
    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn entry_count(&self) -> usize {
        self.entry_count
    }
}

impl fmt::Display for IndexDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

pub struct IndexReducer {
    config: Arc<PackagerConfig>,
    model: IndexModel,
}

impl IndexReducer {
    pub fn new(config: Arc<PackagerConfig>) -> Self {
        Self {
            config,
            model: IndexModel::default(),
        }
    }

    pub fn model(&self) -> &IndexModel {
        &self.model
    }

    /// Appends a segment in arrival order. No reordering by sequence number.
    pub fn accept(&mut self, segment: &Segment) {
        match segment.kind() {
            SegmentKind::Initialization => {
                let file_name = segment.file_name(&self.config);
                if self.model.initialization_file_name.is_some() {
                    warn!(%file_name, "Replacing initialization segment reference");
                }
                self.model.initialization_file_name = Some(file_name);
            }
            SegmentKind::Media => {
                if let Some(last) = self.model.entries.last() {
                    if segment.sequence_number() <= last.sequence_number {
                        warn!(
                            previous = last.sequence_number,
                            current = segment.sequence_number(),
                            "Segment arrived out of sequence order, keeping arrival order"
                        );
                    }
                }
                if segment.duration().is_nan() || segment.duration() <= 0.0 {
                    warn!(
                        sequence_number = segment.sequence_number(),
                        duration = segment.duration(),
                        "Segment has no positive duration"
                    );
                }
                self.model.entries.push(IndexEntry {
                    sequence_number: segment.sequence_number(),
                    duration: segment.duration(),
                    file_name: segment.file_name(&self.config),
                });
            }
        }
    }

    /// `EXT-X-TARGETDURATION`: the longest segment rounded up, raised to the
    /// configured floor, and never below one second.
    pub fn target_duration(&self) -> u64 {
        let observed = self.model.max_duration().ceil() as u64;
        let floor = self
            .config
            .target_duration
            .map(|duration| duration.as_secs_f64().ceil() as u64)
            .unwrap_or(0);
        observed.max(floor).max(1)
    }

    /// Serializes the model. Consumes the reducer, so the document is produced once.
    pub fn finish(self) -> Result<IndexDocument, PackagerError> {
        let target_duration = self.target_duration();
        let IndexReducer { config, model } = self;

        let media_sequence = model
            .entries
            .first()
            .map(|entry| entry.sequence_number)
            .unwrap_or(0);

        // EXT-X-MAP outside an I-frame playlist needs version 6.
        let version = if model.initialization_file_name.is_some() {
            config.playlist_version.max(6)
        } else {
            config.playlist_version
        };

        let mut map = model.initialization_file_name.map(|uri| Map {
            uri,
            ..Default::default()
        });
        let segments: Vec<MediaSegment> = model
            .entries
            .iter()
            .map(|entry| MediaSegment {
                uri: entry.file_name.clone(),
                duration: entry.duration as f32,
                // EXT-X-MAP applies to every segment after it.
                map: map.take(),
                ..Default::default()
            })
            .collect();

        let playlist = MediaPlaylist {
            version: Some(version),
            target_duration,
            media_sequence,
            segments,
            // The run is over, so EVENT playlists are closed as well.
            end_list: true,
            playlist_type: Some(config.playlist_type.into()),
            independent_segments: config.independent_segments,
            ..Default::default()
        };

        let mut buffer = Vec::new();
        playlist
            .write_to(&mut buffer)
            .map_err(|e| PackagerError::write(config.index_path(), e))?;
        let text = String::from_utf8(buffer)
            .map_err(|e| PackagerError::Internal(format!("Playlist is not UTF-8: {e}")))?;

        debug!(
            entries = model.entries.len(),
            target_duration, "Index document finalized"
        );

        Ok(IndexDocument {
            text,
            entry_count: model.entries.len(),
        })
    }

    /// Consumes hub events until the terminal signal.
    ///
    /// A successful terminal finalizes the document; a failed one ends the branch
    /// with the same failure and no document.
    pub async fn run(mut self, mut subscription: Subscription) -> Result<IndexDocument, PackagerError> {
        while let Some(event) = subscription.recv().await {
            match event {
                HubEvent::Segment(segment) => self.accept(&segment),
                HubEvent::Finished => return self.finish(),
                HubEvent::Failed(error) => {
                    debug!(
                        accepted = self.model.len(),
                        "Source failed, index will not be produced"
                    );
                    return Err(error.into());
                }
            }
        }
        Err(PackagerError::ProtocolViolation(
            "hub closed the index subscription without a terminal signal".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::BroadcastHub;
    use crate::{PlaylistType, SourceError};
    use m3u8_rs::MediaPlaylistType;
    use std::time::Duration;

    fn config() -> Arc<PackagerConfig> {
        Arc::new(
            PackagerConfig::builder()
                .segment_file_name_prefix("seg")
                .segment_file_extension("m4s")
                .build(),
        )
    }

    fn parse(document: &IndexDocument) -> MediaPlaylist {
        m3u8_rs::parse_media_playlist_res(document.as_str().as_bytes())
            .expect("generated playlist should parse")
    }

    #[test]
    fn test_entries_keep_arrival_order() {
        let mut reducer = IndexReducer::new(config());
        for (n, duration) in [(0, 2.0), (1, 2.0), (2, 1.5)] {
            reducer.accept(&Segment::media(n, duration, vec![0u8; 4]));
        }

        let names: Vec<_> = reducer
            .model()
            .entries()
            .iter()
            .map(|entry| entry.file_name.as_str())
            .collect();
        assert_eq!(names, ["seg0.m4s", "seg1.m4s", "seg2.m4s"]);
        assert_eq!(reducer.model().total_duration(), 5.5);
        assert_eq!(reducer.target_duration(), 2);
    }

    #[test]
    fn test_out_of_order_arrival_is_not_reordered() {
        let mut reducer = IndexReducer::new(config());
        reducer.accept(&Segment::media(5, 1.0, vec![]));
        reducer.accept(&Segment::media(3, 1.0, vec![]));

        let sequence: Vec<_> = reducer
            .model()
            .entries()
            .iter()
            .map(|entry| entry.sequence_number)
            .collect();
        assert_eq!(sequence, [5, 3]);
    }

    #[test]
    fn test_finish_produces_parseable_playlist() {
        let mut reducer = IndexReducer::new(config());
        reducer.accept(&Segment::initialization(vec![1u8; 8]));
        reducer.accept(&Segment::media(0, 6.0, vec![]));
        reducer.accept(&Segment::media(1, 5.5, vec![]));
        reducer.accept(&Segment::media(2, 4.25, vec![]));

        let document = reducer.finish().unwrap();
        assert_eq!(document.entry_count(), 3);
        assert!(document.as_str().starts_with("#EXTM3U"));

        let playlist = parse(&document);
        assert_eq!(playlist.version, Some(7));
        assert_eq!(playlist.target_duration, 6);
        assert_eq!(playlist.media_sequence, 0);
        assert!(playlist.end_list);
        assert!(playlist.independent_segments);
        assert_eq!(playlist.playlist_type, Some(MediaPlaylistType::Vod));

        let uris: Vec<_> = playlist.segments.iter().map(|s| s.uri.as_str()).collect();
        assert_eq!(uris, ["seg0.m4s", "seg1.m4s", "seg2.m4s"]);
        assert_eq!(playlist.segments[2].duration, 4.25);
        assert_eq!(
            playlist.segments[0].map.as_ref().map(|map| map.uri.as_str()),
            Some("seg.mp4")
        );
    }

    #[test]
    fn test_target_duration_rounds_up_and_respects_floor() {
        let mut reducer = IndexReducer::new(config());
        reducer.accept(&Segment::media(0, 2.1, vec![]));
        assert_eq!(reducer.target_duration(), 3);

        let floored = Arc::new(
            PackagerConfig::builder()
                .target_duration(Duration::from_secs(10))
                .playlist_type(PlaylistType::Event)
                .build(),
        );
        let mut reducer = IndexReducer::new(floored);
        reducer.accept(&Segment::media(0, 2.1, vec![]));
        assert_eq!(reducer.target_duration(), 10);

        let playlist = parse(&reducer.finish().unwrap());
        assert_eq!(playlist.playlist_type, Some(MediaPlaylistType::Event));
        assert!(playlist.end_list);
    }

    #[test]
    fn test_initialization_map_raises_old_versions() {
        let old = Arc::new(PackagerConfig::builder().playlist_version(3).build());
        assert!(old.validate().is_ok());

        let mut reducer = IndexReducer::new(Arc::clone(&old));
        reducer.accept(&Segment::initialization(vec![0u8; 4]));
        reducer.accept(&Segment::media(0, 2.0, vec![]));
        let document = reducer.finish().unwrap();
        assert!(document.as_str().contains("#EXT-X-MAP:URI=\"fileSequence.mp4\""));
        assert_eq!(parse(&document).version, Some(6));

        // Without an initialization segment the configured version stands.
        let mut reducer = IndexReducer::new(Arc::clone(&old));
        reducer.accept(&Segment::media(0, 2.0, vec![]));
        assert_eq!(parse(&reducer.finish().unwrap()).version, Some(3));

        let newer = Arc::new(PackagerConfig::builder().playlist_version(7).build());
        let mut reducer = IndexReducer::new(newer);
        reducer.accept(&Segment::initialization(vec![0u8; 4]));
        assert_eq!(parse(&reducer.finish().unwrap()).version, Some(7));
    }

    #[test]
    fn test_empty_model_still_yields_a_playlist() {
        let document = IndexReducer::new(config()).finish().unwrap();
        let playlist = parse(&document);
        assert!(playlist.segments.is_empty());
        assert_eq!(playlist.target_duration, 1);
    }

    #[tokio::test]
    async fn test_run_finishes_on_success() {
        let (hub, mut publisher) = BroadcastHub::new(8);
        let subscription = hub.subscribe();
        publisher.emit(Segment::media(0, 2.0, vec![1u8])).await;
        publisher.emit(Segment::media(1, 1.0, vec![2u8])).await;
        publisher.complete_success().await;

        let document = IndexReducer::new(config()).run(subscription).await.unwrap();
        assert_eq!(document.entry_count(), 2);
    }

    #[tokio::test]
    async fn test_run_propagates_source_failure_without_document() {
        let (hub, mut publisher) = BroadcastHub::new(8);
        let subscription = hub.subscribe();
        publisher.emit(Segment::media(0, 2.0, vec![1u8])).await;
        publisher
            .complete_failure(SourceError::Generation("truncated input".into()))
            .await;

        let err = IndexReducer::new(config()).run(subscription).await.unwrap_err();
        assert!(err.is_source());
    }

    #[tokio::test]
    async fn test_run_reports_closed_hub_as_protocol_violation() {
        let (hub, publisher) = BroadcastHub::new(8);
        let subscription = hub.subscribe();
        drop(publisher);

        let err = IndexReducer::new(config()).run(subscription).await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::ProtocolViolation);
    }
}
