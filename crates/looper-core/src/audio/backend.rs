//! Unified audio backend
//!
//! Both transports present the same contract to the looper: once per period
//! the callback receives one mono input chunk and fills one mono output
//! chunk of exactly `chunk_size` samples in the configured sample type.
//! - **CPAL**: duplex device stream, available everywhere
//! - **JACK**: port-graph client on Linux (with jack-backend feature)

use super::config::{AudioConfig, BackendType};
use super::error::{AudioError, AudioResult};
use crate::types::Sample;

/// Handle to the active audio backend
///
/// Keeps the streams/client alive. Drop this (or call `close()`) to stop audio.
pub enum AudioBackend {
    /// CPAL duplex stream
    Cpal(super::cpal_backend::CpalBackend),

    /// Native JACK client (Linux with jack-backend feature)
    #[cfg(all(target_os = "linux", feature = "jack-backend"))]
    Jack(super::jack_backend::JackBackend),
}

impl AudioBackend {
    /// Open the configured backend and start calling `callback` every period
    ///
    /// `S` must be the native type of the configured sample format.
    pub fn open<S, F>(config: &AudioConfig, callback: F) -> AudioResult<Self>
    where
        S: Sample,
        F: FnMut(&[S], &mut [S]) + Send + 'static,
    {
        let format = config
            .sample_format()
            .map_err(|e| AudioError::UnsupportedFormat(e.to_string()))?;
        if format != <S as Sample>::FORMAT {
            return Err(AudioError::UnsupportedFormat(format!(
                "configured {} but engine runs {}",
                format,
                <S as Sample>::FORMAT
            )));
        }

        match config.backend {
            BackendType::Cpal => Ok(Self::Cpal(super::cpal_backend::CpalBackend::open(config, callback)?)),

            #[cfg(all(target_os = "linux", feature = "jack-backend"))]
            BackendType::Jack => Ok(Self::Jack(super::jack_backend::JackBackend::open(config, callback)?)),

            #[cfg(not(all(target_os = "linux", feature = "jack-backend")))]
            BackendType::Jack => {
                drop(callback);
                Err(AudioError::BackendUnavailable("jack (built without jack-backend)"))
            }
        }
    }

    /// Stop audio; safe to call more than once
    pub fn close(&mut self) {
        match self {
            Self::Cpal(backend) => backend.close(),
            #[cfg(all(target_os = "linux", feature = "jack-backend"))]
            Self::Jack(backend) => backend.close(),
        }
    }

    /// Get the sample rate of the audio system
    pub fn sample_rate(&self) -> u32 {
        match self {
            Self::Cpal(backend) => backend.sample_rate(),
            #[cfg(all(target_os = "linux", feature = "jack-backend"))]
            Self::Jack(backend) => backend.sample_rate(),
        }
    }

    /// Get the period size in frames
    pub fn buffer_size(&self) -> u32 {
        match self {
            Self::Cpal(backend) => backend.buffer_size(),
            #[cfg(all(target_os = "linux", feature = "jack-backend"))]
            Self::Jack(backend) => backend.buffer_size(),
        }
    }

    /// Get the audio latency in milliseconds (one period)
    pub fn latency_ms(&self) -> f32 {
        (self.buffer_size() as f32 / self.sample_rate() as f32) * 1000.0
    }

    /// Whether the stream or server reported a failure
    pub fn has_failed(&self) -> bool {
        match self {
            Self::Cpal(backend) => backend.has_failed(),
            #[cfg(all(target_os = "linux", feature = "jack-backend"))]
            Self::Jack(backend) => backend.has_failed(),
        }
    }

    /// Short name for log output
    pub fn name(&self) -> &'static str {
        match self {
            Self::Cpal(_) => "cpal",
            #[cfg(all(target_os = "linux", feature = "jack-backend"))]
            Self::Jack(_) => "jack",
        }
    }
}
