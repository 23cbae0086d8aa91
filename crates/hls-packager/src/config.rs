use std::fmt::Display;
use std::path::PathBuf;
use std::time::Duration;

use crate::PackagerError;

/// Value written to `EXT-X-PLAYLIST-TYPE`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PlaylistType {
    #[default]
    Vod,
    Event,
}

impl From<PlaylistType> for m3u8_rs::MediaPlaylistType {
    fn from(value: PlaylistType) -> Self {
        match value {
            PlaylistType::Vod => m3u8_rs::MediaPlaylistType::Vod,
            PlaylistType::Event => m3u8_rs::MediaPlaylistType::Event,
        }
    }
}

/// Configuration of one packaging run. Read-only once the run starts.
#[derive(Debug, Clone)]
pub struct PackagerConfig {
    /// Source asset handed to the segment source.
    pub source_path: PathBuf,

    /// Directory receiving segments and the index. Must exist before the run.
    pub output_directory: PathBuf,

    /// Prefix of every segment file name.
    pub segment_file_name_prefix: String,

    /// Extension of media segment files, without the dot.
    pub segment_file_extension: String,

    /// Zero-padding width of the sequence number in segment file names (0 = none).
    pub sequence_number_width: usize,

    /// Extension of the initialization segment file, without the dot.
    pub initialization_file_extension: String,

    /// File name of the playlist.
    pub index_file_name: String,

    /// Lower bound for `EXT-X-TARGETDURATION`. The longest segment always wins.
    pub target_duration: Option<Duration>,

    /// Value of `EXT-X-VERSION`.
    pub playlist_version: usize,

    pub playlist_type: PlaylistType,

    /// Whether to emit `EXT-X-INDEPENDENT-SEGMENTS`.
    pub independent_segments: bool,

    /// Capacity of each hub subscriber queue.
    pub channel_size: usize,
}

impl Default for PackagerConfig {
    fn default() -> Self {
        Self {
            source_path: PathBuf::new(),
            output_directory: PathBuf::from("hls"),
            segment_file_name_prefix: "fileSequence".to_string(),
            segment_file_extension: "m4s".to_string(),
            sequence_number_width: 0,
            initialization_file_extension: "mp4".to_string(),
            index_file_name: "index.m3u8".to_string(),
            target_duration: None,
            playlist_version: 7,
            playlist_type: PlaylistType::Vod,
            independent_segments: true,
            channel_size: 32,
        }
    }
}

impl Display for PackagerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let target_display = match self.target_duration {
            Some(duration) => format!("{:.2}s", duration.as_secs_f64()),
            None => "auto".to_string(),
        };

        write!(
            f,
            "PackagerConfig {{ source: {}, output: {}, segments: {}*.{}, index: {}, target_duration: {}, version: {}, type: {:?}, channel_size: {} }}",
            self.source_path.display(),
            self.output_directory.display(),
            self.segment_file_name_prefix,
            self.segment_file_extension,
            self.index_file_name,
            target_display,
            self.playlist_version,
            self.playlist_type,
            self.channel_size
        )
    }
}

impl PackagerConfig {
    pub fn new(source_path: impl Into<PathBuf>, output_directory: impl Into<PathBuf>) -> Self {
        Self {
            source_path: source_path.into(),
            output_directory: output_directory.into(),
            ..Self::default()
        }
    }

    pub fn builder() -> PackagerConfigBuilder {
        PackagerConfigBuilder::default()
    }

    /// File name of the media segment with the given sequence number.
    pub fn media_file_name(&self, sequence_number: u64) -> String {
        format!(
            "{}{:0width$}.{}",
            self.segment_file_name_prefix,
            sequence_number,
            self.segment_file_extension,
            width = self.sequence_number_width
        )
    }

    /// File name of the initialization segment, referenced by `EXT-X-MAP`.
    pub fn initialization_file_name(&self) -> String {
        format!(
            "{}.{}",
            self.segment_file_name_prefix, self.initialization_file_extension
        )
    }

    pub fn index_path(&self) -> PathBuf {
        self.output_directory.join(&self.index_file_name)
    }

    /// Rejects configurations that would produce unusable or colliding output.
    pub fn validate(&self) -> Result<(), PackagerError> {
        check_file_component("segment file name prefix", &self.segment_file_name_prefix)?;
        check_file_component("segment file extension", &self.segment_file_extension)?;
        check_file_component(
            "initialization file extension",
            &self.initialization_file_extension,
        )?;
        check_file_component("index file name", &self.index_file_name)?;

        if self.index_file_name == self.initialization_file_name()
            || self.is_media_file_name(&self.index_file_name)
        {
            return Err(PackagerError::InvalidConfig(format!(
                "index file name {} collides with segment file names",
                self.index_file_name
            )));
        }
        // Fractional EXTINF durations need version 3.
        if self.playlist_version < 3 {
            return Err(PackagerError::InvalidConfig(format!(
                "playlist version {} is below 3",
                self.playlist_version
            )));
        }
        if self.channel_size == 0 {
            return Err(PackagerError::InvalidConfig(
                "channel size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    fn is_media_file_name(&self, name: &str) -> bool {
        name.strip_prefix(self.segment_file_name_prefix.as_str())
            .and_then(|rest| rest.strip_suffix(self.segment_file_extension.as_str()))
            .and_then(|rest| rest.strip_suffix('.'))
            .is_some_and(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
    }
}

fn check_file_component(what: &str, value: &str) -> Result<(), PackagerError> {
    if value.is_empty() {
        return Err(PackagerError::InvalidConfig(format!("{what} is empty")));
    }
    if value.contains(['/', '\\']) || value == "." || value == ".." {
        return Err(PackagerError::InvalidConfig(format!(
            "{what} {value:?} is not a plain file name"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Default)]
pub struct PackagerConfigBuilder {
    config: PackagerConfig,
}

impl PackagerConfigBuilder {
    pub fn source_path(mut self, source_path: impl Into<PathBuf>) -> Self {
        self.config.source_path = source_path.into();
        self
    }

    pub fn output_directory(mut self, output_directory: impl Into<PathBuf>) -> Self {
        self.config.output_directory = output_directory.into();
        self
    }

    pub fn segment_file_name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.segment_file_name_prefix = prefix.into();
        self
    }

    pub fn segment_file_extension(mut self, extension: impl Into<String>) -> Self {
        self.config.segment_file_extension = extension.into();
        self
    }

    pub fn sequence_number_width(mut self, width: usize) -> Self {
        self.config.sequence_number_width = width;
        self
    }

    pub fn initialization_file_extension(mut self, extension: impl Into<String>) -> Self {
        self.config.initialization_file_extension = extension.into();
        self
    }

    pub fn index_file_name(mut self, name: impl Into<String>) -> Self {
        self.config.index_file_name = name.into();
        self
    }

    pub fn target_duration(mut self, target_duration: Duration) -> Self {
        self.config.target_duration = Some(target_duration);
        self
    }

    pub fn target_duration_s(mut self, target_duration_s: f64) -> Self {
        // Negative, NaN and overflowing values leave the floor unset.
        if let Ok(target_duration) = Duration::try_from_secs_f64(target_duration_s) {
            if !target_duration.is_zero() {
                self.config.target_duration = Some(target_duration);
            }
        }
        self
    }

    pub fn playlist_version(mut self, version: usize) -> Self {
        self.config.playlist_version = version;
        self
    }

    pub fn playlist_type(mut self, playlist_type: PlaylistType) -> Self {
        self.config.playlist_type = playlist_type;
        self
    }

    pub fn independent_segments(mut self, independent_segments: bool) -> Self {
        self.config.independent_segments = independent_segments;
        self
    }

    pub fn channel_size(mut self, channel_size: usize) -> Self {
        self.config.channel_size = channel_size;
        self
    }

    pub fn build(self) -> PackagerConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    #[test]
    fn test_media_file_names() {
        let config = PackagerConfig::builder()
            .segment_file_name_prefix("seg")
            .segment_file_extension("ts")
            .build();
        assert_eq!(config.media_file_name(0), "seg0.ts");
        assert_eq!(config.media_file_name(12), "seg12.ts");

        let padded = PackagerConfig::builder().sequence_number_width(5).build();
        assert_eq!(padded.media_file_name(42), "fileSequence00042.m4s");
        assert_eq!(padded.initialization_file_name(), "fileSequence.mp4");
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = PackagerConfig::new("movie.mp4", "/tmp/hls");
        assert!(config.validate().is_ok());
        assert_eq!(config.index_path(), PathBuf::from("/tmp/hls/index.m3u8"));
    }

    #[test]
    fn test_rejects_path_separators_and_empty_names() {
        let config = PackagerConfig::builder()
            .segment_file_name_prefix("../seg")
            .build();
        assert_eq!(config.validate().unwrap_err().kind(), ErrorKind::InvalidConfig);

        let config = PackagerConfig::builder().index_file_name("").build();
        assert_eq!(config.validate().unwrap_err().kind(), ErrorKind::InvalidConfig);
    }

    #[test]
    fn test_rejects_index_name_colliding_with_segments() {
        let config = PackagerConfig::builder()
            .segment_file_name_prefix("seg")
            .segment_file_extension("ts")
            .index_file_name("seg3.ts")
            .build();
        assert!(config.validate().is_err());

        let config = PackagerConfig::builder()
            .segment_file_name_prefix("seg")
            .index_file_name("seg.mp4")
            .build();
        assert!(config.validate().is_err());

        // Not a sequence number, so no collision.
        let config = PackagerConfig::builder()
            .segment_file_name_prefix("seg")
            .segment_file_extension("m3u8")
            .index_file_name("seg_index.m3u8")
            .build();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_old_versions_and_empty_channels() {
        assert!(PackagerConfig::builder().playlist_version(2).build().validate().is_err());
        assert!(PackagerConfig::builder().channel_size(0).build().validate().is_err());
    }

    #[test]
    fn test_display_mentions_paths() {
        let config = PackagerConfig::builder()
            .source_path("in.mov")
            .output_directory("out")
            .target_duration_s(6.0)
            .build();
        let display = config.to_string();
        assert!(display.contains("source: in.mov"));
        assert!(display.contains("target_duration: 6.00s"));
    }

    #[test]
    fn test_unrepresentable_target_durations_are_ignored() {
        for seconds in [f64::INFINITY, f64::NAN, -1.0, 0.0, 1e30] {
            let config = PackagerConfig::builder().target_duration_s(seconds).build();
            assert_eq!(config.target_duration, None, "{seconds}");
        }
        let config = PackagerConfig::builder().target_duration_s(2.5).build();
        assert_eq!(config.target_duration, Some(Duration::from_millis(2500)));
    }
}
