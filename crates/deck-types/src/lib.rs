use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Play/pause state of the engine as reported to the UI.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlayState {
    /// A track is loaded and audio is being rendered.
    Playing,
    /// A track is loaded but output is muted and position is frozen.
    Paused,
    /// No track is loaded; the engine is idle.
    NoTrackLoaded,
}

/// Control commands accepted by the engine while a track is loaded.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    /// Toggle between playing and paused.
    PlayPause,
    /// Unload the current track and return to idle.
    Stop,
}

/// Cover art pre-encoded for a kitty-protocol terminal.
///
/// `data` holds the full escape stream; writing it to a supporting
/// terminal displays the image. An empty `data` means no artwork.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtworkImage {
    /// Source image width in pixels (after the square crop).
    pub width: u32,
    /// Source image height in pixels (after the square crop).
    pub height: u32,
    /// Kitty graphics escape stream, ready to print.
    pub data: String,
}

impl ArtworkImage {
    /// Whether there is anything to display.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Tag metadata for the loaded track.
///
/// Absent fields are empty strings; consumers may substitute the file
/// name when `title` is empty.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrackInfo {
    /// Track artist, empty when untagged.
    pub artist: String,
    /// Track title, empty when untagged.
    pub title: String,
    /// Album name, empty when untagged.
    pub album: String,
    /// Encoded cover art, empty when absent or undecodable.
    pub artwork: ArtworkImage,
}

/// Status events pushed from the engine to its consumer.
///
/// These act both as change notifications and as the data carrying the
/// change itself; the engine never waits for acknowledgement.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Status {
    /// Playing position snapshot, emitted once per second while playing.
    ///
    /// Both durations are rounded to whole seconds and always reflect the
    /// track's native sample domain, resampled or not.
    PositionUpdate {
        /// Elapsed time within the track.
        position: Duration,
        /// Total track length, zero when unknown.
        length: Duration,
    },
    /// Play/pause/idle transition, emitted on every state change.
    PlayStateUpdate {
        /// The state just entered.
        state: PlayState,
    },
    /// Metadata of the track that just started (or empty values when the
    /// display should be cleared).
    AudioInfoUpdate {
        /// Tags and artwork for the loaded track.
        info: TrackInfo,
    },
    /// A track-fatal failure; the engine is idle again and keeps serving
    /// requests.
    ErrorUpdate {
        /// Human-readable cause.
        message: String,
    },
}
