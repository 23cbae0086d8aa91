use async_trait::async_trait;

use crate::{HubPublisher, PackagerConfig, SourceError};

/// Producer of fMP4 segments: demuxes the source asset and muxes fragments.
///
/// The packager calls [`load_tracks`](Self::load_tracks) once and, only after
/// every hub subscriber is registered, [`generate_segments`](Self::generate_segments)
/// once. The returned `Result` becomes the hub's terminal signal, so
/// implementations never complete the publisher themselves.
#[async_trait]
pub trait SegmentSource: Send + 'static {
    /// Loaded track set handed from track loading to generation.
    type Tracks: Send + 'static;

    async fn load_tracks(&mut self, config: &PackagerConfig) -> Result<Self::Tracks, SourceError>;

    /// Emits segments in sequence order through `publisher`.
    ///
    /// [`HubPublisher::emit`] returns `false` once nobody listens; sources may stop
    /// early at that point but are not required to.
    async fn generate_segments(
        &mut self,
        tracks: Self::Tracks,
        config: &PackagerConfig,
        publisher: &mut HubPublisher,
    ) -> Result<(), SourceError>;
}
