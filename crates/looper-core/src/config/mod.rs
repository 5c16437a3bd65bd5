//! Looper configuration
//!
//! One YAML file with a section per concern:
//!
//! ```yaml
//! audio:
//!   backend: jack
//!   sampling_rate: 48000
//!   chunk_size: 256
//!   sample_format: int16
//! looper:
//!   tracks_num: 4
//!   max_loop_duration_s: 60
//! metronome:
//!   bpm: 100
//! recorder:
//!   max_gain_db: 12
//! ```
//!
//! Every section and field falls back to its default when absent.
//!
//! # Usage
//!
//! ```ignore
//! use looper_core::config::{load_looper_config, save_config};
//!
//! let (config, path) = load_looper_config(None)?;
//! save_config(&config, &path)?;
//! ```

mod io;
mod paths;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::audio::AudioConfig;
use crate::engine::EngineSettings;

pub use io::{load_config, save_config};
pub use paths::{
    default_config_dir, default_config_path, default_data_path, resolve_config_path,
    CONFIG_FILE_ENV, LOCAL_CONFIG_FILE,
};

/// Track layout and levels of the loop engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// Tracks created on reset
    pub tracks_num: usize,
    /// Leading tracks bound to hardware buttons
    pub tracks_gpio_num: usize,
    /// Longest master take (seconds)
    pub max_loop_duration_s: f64,
    /// Initial input gain (dB)
    pub input_volume: f64,
    /// Initial output gain (dB)
    pub output_volume: f64,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            tracks_num: 8,
            tracks_gpio_num: 3,
            max_loop_duration_s: 120.0,
            input_volume: 0.0,
            output_volume: 0.0,
        }
    }
}

/// Click track generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetronomeConfig {
    /// Attenuation applied to the clicks (dB)
    pub volume_db: f64,
    /// WAV sample for the first beat of a bar (synthesized when unset)
    pub high_click: Option<PathBuf>,
    /// WAV sample for the other beats (synthesized when unset)
    pub low_click: Option<PathBuf>,
    pub bpm: f64,
    pub beats_per_bar: usize,
    pub bars: usize,
}

impl Default for MetronomeConfig {
    fn default() -> Self {
        Self {
            volume_db: -6.0,
            high_click: None,
            low_click: None,
            bpm: 120.0,
            beats_per_bar: 4,
            bars: 1,
        }
    }
}

/// Output recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Where WAV files are written
    pub output_dir: PathBuf,
    /// Normalize recordings to full scale when stopping
    pub normalize: bool,
    /// Upper bound for the normalization gain (dB)
    pub max_gain_db: f64,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            output_dir: default_data_path("recordings"),
            normalize: true,
            max_gain_db: 20.0,
        }
    }
}

/// Session snapshots
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionsConfig {
    /// Where session files are written
    pub dir: PathBuf,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            dir: default_data_path("sessions"),
        }
    }
}

/// Complete looper configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LooperConfig {
    pub audio: AudioConfig,
    pub looper: LoopConfig,
    pub metronome: MetronomeConfig,
    pub recorder: RecorderConfig,
    pub sessions: SessionsConfig,
}

impl LooperConfig {
    /// Engine settings derived from the audio and looper sections
    pub fn engine_settings(&self) -> EngineSettings {
        let mut settings = EngineSettings::new(self.audio.chunk_size, self.audio.sampling_rate);
        settings.tracks_num = self.looper.tracks_num;
        settings.tracks_gpio_num = self.looper.tracks_gpio_num;
        settings.input_volume = self.looper.input_volume;
        settings.output_volume = self.looper.output_volume;
        settings.set_max_loop_duration(self.looper.max_loop_duration_s);
        settings
    }

    /// Reject values the engine can't run with
    pub fn validate(&self) -> Result<()> {
        self.audio
            .sample_format()
            .context("Invalid audio.sample_format")?;
        if self.audio.chunk_size == 0 {
            anyhow::bail!("audio.chunk_size must be positive");
        }
        if self.audio.sampling_rate == 0 {
            anyhow::bail!("audio.sampling_rate must be positive");
        }
        if self.looper.tracks_num == 0 {
            anyhow::bail!("looper.tracks_num must be at least 1");
        }
        if self.looper.max_loop_duration_s <= 0.0 {
            anyhow::bail!("looper.max_loop_duration_s must be positive");
        }
        if self.metronome.bpm <= 0.0 || self.metronome.beats_per_bar == 0 {
            anyhow::bail!("metronome.bpm and metronome.beats_per_bar must be positive");
        }
        Ok(())
    }
}

/// Resolve, load and validate the looper configuration
///
/// Returns the config together with the path it was resolved from.
pub fn load_looper_config(explicit: Option<&Path>) -> Result<(LooperConfig, PathBuf)> {
    let path = resolve_config_path(explicit);
    let config: LooperConfig = load_config(&path)?;
    config.validate()?;
    Ok((config, path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::BackendType;

    #[test]
    fn test_defaults_are_valid() {
        assert!(LooperConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_sections() {
        let yaml = "audio:\n  backend: jack\n  chunk_size: 256\nlooper:\n  tracks_num: 4\n";
        let config: LooperConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.audio.backend, BackendType::Jack);
        assert_eq!(config.looper.tracks_num, 4);
        assert_eq!(config.looper.tracks_gpio_num, 3);
        assert_eq!(config.metronome, MetronomeConfig::default());
    }

    #[test]
    fn test_engine_settings() {
        let mut config = LooperConfig::default();
        config.audio.chunk_size = 1000;
        config.audio.sampling_rate = 10000;
        config.looper.tracks_num = 2;
        config.looper.max_loop_duration_s = 5.0;
        config.looper.input_volume = -3.0;

        let settings = config.engine_settings();
        assert_eq!(settings.chunk_size, 1000);
        assert_eq!(settings.tracks_num, 2);
        assert_eq!(settings.max_loop_chunks, 50);
        assert_eq!(settings.input_volume, -3.0);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = LooperConfig::default();
        config.audio.sample_format = "int24".to_string();
        assert!(config.validate().is_err());

        let mut config = LooperConfig::default();
        config.looper.tracks_num = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("looper.yaml");
        let mut config = LooperConfig::default();
        config.metronome.bpm = 90.0;
        save_config(&config, &path).unwrap();

        let (loaded, from) = load_looper_config(Some(&path)).unwrap();
        assert_eq!(from, path);
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("looper.yaml");
        std::fs::write(&path, "audio:\n  sample_format: pcm\n").unwrap();
        assert!(load_looper_config(Some(&path)).is_err());
    }
}
