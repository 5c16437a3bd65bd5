//! Audio backend configuration
//!
//! Defines the `audio` section of the looper configuration: period layout,
//! sample format, backend selection, device selection for the CPAL duplex
//! stream and server/port settings for the JACK port graph.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::{SampleFormat, UnknownSampleFormat, DEFAULT_CHUNK_SIZE, DEFAULT_SAMPLE_RATE};

/// Maximum period size to pre-allocate on the audio thread (frames)
pub const MAX_BUFFER_SIZE: usize = 8192;

/// Device names picked first during auto-selection
pub const DEFAULT_PREFERRED_DEVICES: [&str; 2] = ["pulse", "default"];

/// Audio transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendType {
    /// Duplex device stream through CPAL
    #[default]
    Cpal,
    /// Client of a JACK server (launched on demand)
    Jack,
}

/// Bounded exponential backoff for opening the JACK client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// First wait (seconds)
    pub initial_delay_s: f64,
    /// Growth factor between waits
    pub factor: f64,
    /// Cap for a single wait (seconds)
    pub max_delay_s: f64,
    /// Give up once the total wait would exceed this (seconds)
    pub max_time_s: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay_s: 0.2,
            factor: 2.0,
            max_delay_s: 2.0,
            max_time_s: 10.0,
        }
    }
}

impl RetryPolicy {
    /// Waits between consecutive attempts, in order
    pub fn delays(&self) -> Vec<Duration> {
        let mut delays = Vec::new();
        let mut delay = self.initial_delay_s.max(0.0);
        let mut total = 0.0;
        while delay > 0.0 && total + delay <= self.max_time_s {
            delays.push(Duration::from_secs_f64(delay));
            total += delay;
            delay = (delay * self.factor.max(1.0)).min(self.max_delay_s);
        }
        delays
    }
}

/// JACK server and port settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JackConfig {
    /// Launch `jackd` before connecting; when false an already running
    /// server is expected
    pub start_server: bool,
    /// Server executable
    pub server_path: PathBuf,
    /// ALSA capture device handed to the server
    pub alsa_capture_device: String,
    /// ALSA playback device handed to the server
    pub alsa_playback_device: String,
    /// Client name registered with the server
    pub client_name: String,
    /// Capture port to wire into the looper (default: last physical capture port)
    pub capture_port: Option<String>,
    /// Playback ports to feed (default: every physical playback port)
    pub playback_ports: Vec<String>,
    /// Client open retries while the server starts up
    pub retry: RetryPolicy,
}

impl Default for JackConfig {
    fn default() -> Self {
        Self {
            start_server: true,
            server_path: PathBuf::from("/usr/bin/jackd"),
            alsa_capture_device: "hw:0".to_string(),
            alsa_playback_device: "hw:0".to_string(),
            client_name: "looper".to_string(),
            capture_port: None,
            playback_ports: Vec::new(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Configuration for the audio backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Transport used to exchange periods with the hardware
    pub backend: BackendType,

    /// Sampling rate (Hz)
    pub sampling_rate: u32,

    /// Frames per period; every chunk in the engine has this length
    pub chunk_size: usize,

    /// Sample encoding identifier (`int16`, `int32`, `float32`),
    /// validated at startup with `sample_format()`
    pub sample_format: String,

    /// Input device index (None = auto-select)
    pub in_device: Option<usize>,

    /// Output device index (None = auto-select)
    pub out_device: Option<usize>,

    /// Device names preferred by auto-selection, in order
    pub preferred_devices: Vec<String>,

    /// JACK port-graph settings
    pub jack: JackConfig,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            backend: BackendType::default(),
            sampling_rate: DEFAULT_SAMPLE_RATE,
            chunk_size: DEFAULT_CHUNK_SIZE,
            sample_format: SampleFormat::default().name().to_string(),
            in_device: None,
            out_device: None,
            preferred_devices: DEFAULT_PREFERRED_DEVICES.iter().map(|s| s.to_string()).collect(),
            jack: JackConfig::default(),
        }
    }
}

impl AudioConfig {
    /// Parse the configured sample format
    pub fn sample_format(&self) -> Result<SampleFormat, UnknownSampleFormat> {
        self.sample_format.parse()
    }

    /// Duration of one period in seconds
    pub fn chunk_length_s(&self) -> f64 {
        self.chunk_size as f64 / self.sampling_rate as f64
    }

    /// One-way period latency in milliseconds
    pub fn latency_ms(&self) -> f32 {
        (self.chunk_length_s() * 1000.0) as f32
    }

    /// Set the backend type
    pub fn with_backend(mut self, backend: BackendType) -> Self {
        self.backend = backend;
        self
    }

    /// Set explicit device indices
    pub fn with_devices(mut self, in_device: usize, out_device: usize) -> Self {
        self.in_device = Some(in_device);
        self.out_device = Some(out_device);
        self
    }
}
