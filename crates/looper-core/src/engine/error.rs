//! Loop engine error types

use thiserror::Error;

/// Rejected engine commands
///
/// Every variant leaves the engine state unchanged; callers (buttons,
/// command loop) are responsible for reporting them to the user.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LooperError {
    /// Track index out of range
    #[error("Track {track_id} doesn't exist ({tracks_num} tracks)")]
    TrackNotFound { track_id: usize, tracks_num: usize },

    /// Master loop can only be recorded (and stopped) on the first track
    #[error("Master loop has to be recorded on the first track, got track {track_id}")]
    MasterTrackRequired { track_id: usize },

    /// Overdub requested before the loop length is known
    #[error("Loop length is not determined yet, cannot overdub track {track_id}")]
    NotLooping { track_id: usize },

    /// Playback requested on a track with no content
    #[error("Track {track_id} is empty, nothing to play")]
    PlaybackOnEmptyTrack { track_id: usize },

    /// The last remaining track cannot be removed
    #[error("Cannot remove the last remaining track")]
    LastTrack,

    /// Master recording stopped before a single chunk was captured
    #[error("Master loop is empty, nothing was recorded")]
    EmptyMasterLoop,

    /// The engine was reset or restored while a closed master take was
    /// being prepared
    #[error("Loop changed before the master loop was installed")]
    MasterSuperseded,

    /// Supplied loop content doesn't match the engine's chunk layout
    #[error("Invalid loop content: {0}")]
    InvalidLoop(String),

    /// Session snapshot can't be restored into this engine
    #[error("Invalid session: {0}")]
    InvalidSession(String),
}

/// Result type for engine operations
pub type LooperResult<T> = Result<T, LooperError>;
