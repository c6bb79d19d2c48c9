//! Provider-agnostic track and playlist model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Provider-private bytes carried by a [`Track`]
///
/// Only the provider that created the track knows how to read them; the
/// registry, the codec and the playback engine move them around untouched.
#[derive(Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderState(Vec<u8>);

impl ProviderState {
    /// Empty state, for providers that can re-derive everything from the identifier
    pub fn empty() -> Self {
        Self(Vec::new())
    }

    /// Wrap raw bytes
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// Convenience constructor for textual state
    pub fn from_text(text: &str) -> Self {
        Self(text.as_bytes().to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Read the state back as UTF-8, if it is
    pub fn as_text(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl fmt::Debug for ProviderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProviderState({} bytes)", self.0.len())
    }
}

/// A resolved, playable media record
///
/// `identifier` is scoped to `source_name`: together they point back to the
/// same remote resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    /// Provider-scoped identifier (video id, slug, clip id...)
    pub identifier: String,
    /// Track title
    pub title: String,
    /// Author, uploader or artist
    pub author: String,
    /// Duration in milliseconds, `None` when unknown (live streams)
    pub duration_ms: Option<u64>,
    /// True for live/unbounded streams
    pub is_stream: bool,
    /// Canonical page URL on the platform
    pub uri: Option<String>,
    /// Artwork/cover URL
    pub artwork_url: Option<String>,
    /// Name of the provider that created the track
    pub source_name: String,
    /// Opaque provider state
    pub state: ProviderState,
}

impl Track {
    /// Start building a track for the given provider
    pub fn builder(source_name: impl Into<String>, identifier: impl Into<String>) -> TrackBuilder {
        TrackBuilder::new(source_name, identifier)
    }

    /// Duration as a `Duration`
    pub fn duration(&self) -> Option<Duration> {
        self.duration_ms.map(Duration::from_millis)
    }
}

/// Builder for [`Track`]
#[derive(Debug, Clone)]
pub struct TrackBuilder {
    track: Track,
}

impl TrackBuilder {
    pub fn new(source_name: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            track: Track {
                identifier: identifier.into(),
                title: String::new(),
                author: String::new(),
                duration_ms: None,
                is_stream: false,
                uri: None,
                artwork_url: None,
                source_name: source_name.into(),
                state: ProviderState::empty(),
            },
        }
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.track.title = title.into();
        self
    }

    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.track.author = author.into();
        self
    }

    pub fn duration_ms(mut self, duration_ms: u64) -> Self {
        self.track.duration_ms = Some(duration_ms);
        self
    }

    /// Duration in seconds, as most platform APIs report it
    pub fn duration_secs(mut self, secs: f64) -> Self {
        if secs.is_finite() && secs >= 0.0 {
            self.track.duration_ms = Some((secs * 1000.0).round() as u64);
        }
        self
    }

    pub fn stream(mut self, is_stream: bool) -> Self {
        self.track.is_stream = is_stream;
        self
    }

    pub fn uri(mut self, uri: impl Into<String>) -> Self {
        self.track.uri = Some(uri.into());
        self
    }

    pub fn artwork_url(mut self, url: impl Into<String>) -> Self {
        let url = url.into();
        if !url.is_empty() {
            self.track.artwork_url = Some(url);
        }
        self
    }

    pub fn state(mut self, state: ProviderState) -> Self {
        self.track.state = state;
        self
    }

    pub fn build(self) -> Track {
        self.track
    }
}

/// Ordered collection of tracks coming from a single resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Playlist {
    /// Playlist title
    pub name: String,
    /// Tracks in playback order
    pub tracks: Vec<Track>,
    /// Index of the track the query pointed at, if any
    pub selected: Option<usize>,
}

impl Playlist {
    /// Create a playlist; an out-of-range selection is dropped
    pub fn new(name: impl Into<String>, tracks: Vec<Track>, selected: Option<usize>) -> Self {
        let selected = selected.filter(|&i| i < tracks.len());
        Self {
            name: name.into(),
            tracks,
            selected,
        }
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// The selected track, if any
    pub fn selected_track(&self) -> Option<&Track> {
        self.selected.and_then(|i| self.tracks.get(i))
    }
}

/// Result of a successful resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioItem {
    Track(Track),
    Playlist(Playlist),
}

impl AudioItem {
    /// Returns the track if this item is a single track
    pub fn as_track(&self) -> Option<&Track> {
        match self {
            AudioItem::Track(t) => Some(t),
            AudioItem::Playlist(_) => None,
        }
    }

    /// Returns the playlist if this item is a playlist
    pub fn as_playlist(&self) -> Option<&Playlist> {
        match self {
            AudioItem::Track(_) => None,
            AudioItem::Playlist(p) => Some(p),
        }
    }

    /// Consume the item into its tracks, in playback order
    pub fn into_tracks(self) -> Vec<Track> {
        match self {
            AudioItem::Track(t) => vec![t],
            AudioItem::Playlist(p) => p.tracks,
        }
    }
}

impl From<Track> for AudioItem {
    fn from(track: Track) -> Self {
        AudioItem::Track(track)
    }
}

impl From<Playlist> for AudioItem {
    fn from(playlist: Playlist) -> Self {
        AudioItem::Playlist(playlist)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_duration_secs() {
        let track = Track::builder("clypit", "abc")
            .title("Song")
            .duration_secs(12.345)
            .build();
        assert_eq!(track.duration_ms, Some(12345));
        assert_eq!(track.duration(), Some(Duration::from_millis(12345)));
    }

    #[test]
    fn test_empty_artwork_is_ignored() {
        let track = Track::builder("getyarn", "x").artwork_url("").build();
        assert!(track.artwork_url.is_none());
    }

    #[test]
    fn test_playlist_drops_out_of_range_selection() {
        let tracks = vec![Track::builder("reddit", "a").build()];
        let playlist = Playlist::new("p", tracks.clone(), Some(3));
        assert_eq!(playlist.selected, None);

        let playlist = Playlist::new("p", tracks, Some(0));
        assert_eq!(playlist.selected_track().map(|t| t.identifier.as_str()), Some("a"));
    }

    #[test]
    fn test_provider_state_debug_hides_content() {
        let state = ProviderState::from_text("secret-url");
        assert_eq!(format!("{:?}", state), "ProviderState(10 bytes)");
        assert_eq!(state.as_text(), Some("secret-url"));
    }
}
