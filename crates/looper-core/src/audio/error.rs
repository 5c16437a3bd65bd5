//! Audio backend error types

use thiserror::Error;

/// Errors that can occur during audio operations
#[derive(Error, Debug)]
pub enum AudioError {
    /// No audio devices available
    #[error("No audio devices found")]
    NoDevices,

    /// No device exposes both input and output channels
    #[error("No audio device with both input and output channels")]
    NoDuplexDevice,

    /// Device not found
    #[error("Audio device not found: {0}")]
    DeviceNotFound(String),

    /// Failed to get device configuration
    #[error("Failed to get device config: {0}")]
    ConfigError(String),

    /// Failed to build audio stream
    #[error("Failed to build audio stream: {0}")]
    StreamBuildError(String),

    /// Failed to start/play stream
    #[error("Failed to start audio stream: {0}")]
    StreamPlayError(String),

    /// Sample format doesn't match the configured one
    #[error("Unsupported sample format: {0}")]
    UnsupportedFormat(String),

    /// Audio server process couldn't be launched
    #[error("Failed to start audio server: {0}")]
    ServerStart(String),

    /// Client couldn't connect to the audio server within the retry budget
    #[error("Failed to open audio server client after {attempts} attempts: {reason}")]
    ClientOpen { attempts: usize, reason: String },

    /// No matching port in the server graph
    #[error("Audio port not found: {0}")]
    PortNotFound(String),

    /// Port registration or wiring failed
    #[error("Audio port error: {0}")]
    PortError(String),

    /// Backend not compiled into this build
    #[error("Audio backend unavailable: {0}")]
    BackendUnavailable(&'static str),
}

/// Result type for audio operations
pub type AudioResult<T> = Result<T, AudioError>;
