use bytes::Bytes;

use crate::PackagerConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    /// fMP4 header (`ftyp` + `moov`), referenced through `EXT-X-MAP`.
    Initialization,
    /// A media fragment listed in the playlist.
    Media,
}

/// One fragment produced by a segment source. Immutable once created.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    kind: SegmentKind,
    sequence_number: u64,
    duration: f64,
    payload: Bytes,
}

impl Segment {
    /// A media segment. `duration` is in seconds.
    pub fn media(sequence_number: u64, duration: f64, payload: impl Into<Bytes>) -> Self {
        Self {
            kind: SegmentKind::Media,
            sequence_number,
            duration,
            payload: payload.into(),
        }
    }

    pub fn initialization(payload: impl Into<Bytes>) -> Self {
        Self {
            kind: SegmentKind::Initialization,
            sequence_number: 0,
            duration: 0.0,
            payload: payload.into(),
        }
    }

    pub fn kind(&self) -> SegmentKind {
        self.kind
    }

    pub fn is_initialization(&self) -> bool {
        self.kind == SegmentKind::Initialization
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn duration(&self) -> f64 {
        self.duration
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn size(&self) -> usize {
        self.payload.len()
    }

    /// Output file name, derived from the sequence number and the configured prefix.
    pub fn file_name(&self, config: &PackagerConfig) -> String {
        match self.kind {
            SegmentKind::Initialization => config.initialization_file_name(),
            SegmentKind::Media => config.media_file_name(self.sequence_number),
        }
    }
}
