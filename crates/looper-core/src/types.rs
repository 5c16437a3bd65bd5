//! Common types for the looper
//!
//! This module contains the fundamental audio types shared by the engine,
//! the audio backends and the external collaborators: the configured
//! sample format, the `Sample` trait implemented by each native sample type,
//! and the fixed-length `Chunk` exchanged once per audio period.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default sampling rate (Hz)
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

/// Default number of frames per period
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Loudness floor reported for silence or empty input (dBFS)
pub const SILENCE_DBFS: f64 = -100.0;

/// Sample encoding used for every chunk buffer in the engine
///
/// Chosen once at configuration time. The names match the identifiers
/// accepted in the YAML config (`int16`, `int32`, `float32`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    #[default]
    Int16,
    Int32,
    Float32,
}

impl SampleFormat {
    pub const ALL: [SampleFormat; 3] = [SampleFormat::Int16, SampleFormat::Int32, SampleFormat::Float32];

    /// Byte width of one sample
    pub fn bytes(&self) -> usize {
        match self {
            SampleFormat::Int16 => 2,
            SampleFormat::Int32 => 4,
            SampleFormat::Float32 => 4,
        }
    }

    /// Bit depth of one sample
    pub fn bits(&self) -> u16 {
        (self.bytes() * 8) as u16
    }

    /// Full-scale amplitude in native units
    pub fn full_scale(&self) -> f64 {
        match self {
            SampleFormat::Int16 => 32767.0,
            SampleFormat::Int32 => 2147483647.0,
            SampleFormat::Float32 => 1.0,
        }
    }

    /// Whether the native type is a float
    pub fn is_float(&self) -> bool {
        matches!(self, SampleFormat::Float32)
    }

    pub fn name(&self) -> &'static str {
        match self {
            SampleFormat::Int16 => "int16",
            SampleFormat::Int32 => "int32",
            SampleFormat::Float32 => "float32",
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An unrecognized sample format identifier in the configuration
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown sample format: {0} (expected int16, int32 or float32)")]
pub struct UnknownSampleFormat(pub String);

impl FromStr for SampleFormat {
    type Err = UnknownSampleFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SampleFormat::ALL
            .into_iter()
            .find(|format| format.name() == s)
            .ok_or_else(|| UnknownSampleFormat(s.to_string()))
    }
}

/// Native numeric type of a sample format
///
/// The engine, DSP and backends are generic over this trait; the runner
/// picks the concrete type once at startup from the configured format.
pub trait Sample:
    Copy
    + Default
    + PartialEq
    + PartialOrd
    + fmt::Debug
    + Send
    + Sync
    + Serialize
    + DeserializeOwned
    + cpal::SizedSample
    + hound::Sample
    + 'static
{
    /// Format this native type belongs to
    const FORMAT: SampleFormat;

    /// Digital silence
    const SILENCE: Self;

    fn to_f64(self) -> f64;

    /// Cast back from a computed value, truncating toward zero and
    /// saturating at the type's limits
    fn from_f64(value: f64) -> Self;

    /// Additive mix of two samples (saturating for integer types)
    fn mix(self, other: Self) -> Self;

    /// Inverse of `mix` (saturating for integer types)
    fn unmix(self, other: Self) -> Self;

    /// Convert to a float in [-1, 1] relative to full scale
    #[inline]
    fn to_normalized(self) -> f32 {
        (self.to_f64() / <Self as Sample>::FORMAT.full_scale()) as f32
    }

    /// Convert from a float in [-1, 1] relative to full scale
    #[inline]
    fn from_normalized(value: f32) -> Self {
        Self::from_f64(value as f64 * <Self as Sample>::FORMAT.full_scale())
    }
}

impl Sample for i16 {
    const FORMAT: SampleFormat = SampleFormat::Int16;
    const SILENCE: Self = 0;

    #[inline]
    fn to_f64(self) -> f64 {
        self as f64
    }

    #[inline]
    fn from_f64(value: f64) -> Self {
        value as i16
    }

    #[inline]
    fn mix(self, other: Self) -> Self {
        self.saturating_add(other)
    }

    #[inline]
    fn unmix(self, other: Self) -> Self {
        self.saturating_sub(other)
    }
}

impl Sample for i32 {
    const FORMAT: SampleFormat = SampleFormat::Int32;
    const SILENCE: Self = 0;

    #[inline]
    fn to_f64(self) -> f64 {
        self as f64
    }

    #[inline]
    fn from_f64(value: f64) -> Self {
        value as i32
    }

    #[inline]
    fn mix(self, other: Self) -> Self {
        self.saturating_add(other)
    }

    #[inline]
    fn unmix(self, other: Self) -> Self {
        self.saturating_sub(other)
    }
}

impl Sample for f32 {
    const FORMAT: SampleFormat = SampleFormat::Float32;
    const SILENCE: Self = 0.0;

    #[inline]
    fn to_f64(self) -> f64 {
        self as f64
    }

    #[inline]
    fn from_f64(value: f64) -> Self {
        value as f32
    }

    #[inline]
    fn mix(self, other: Self) -> Self {
        self + other
    }

    #[inline]
    fn unmix(self, other: Self) -> Self {
        self - other
    }

    #[inline]
    fn to_normalized(self) -> f32 {
        self
    }

    #[inline]
    fn from_normalized(value: f32) -> Self {
        value
    }
}

/// One audio period worth of mono samples
///
/// A chunk is created with `chunk_size` samples and never resized; the
/// slice API (via `Deref`) allows in-place edits but no length changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Chunk<S>(Vec<S>);

impl<S: Sample> Chunk<S> {
    /// Create a chunk filled with silence
    pub fn silence(len: usize) -> Self {
        Self(vec![S::SILENCE; len])
    }

    /// Create a chunk by copying samples
    pub fn from_slice(samples: &[S]) -> Self {
        Self(samples.to_vec())
    }

    /// Overwrite this chunk with samples of the same length
    ///
    /// Panics if the lengths differ.
    #[inline]
    pub fn copy_from(&mut self, samples: &[S]) {
        self.0.copy_from_slice(samples);
    }

    /// Reset every sample to silence
    #[inline]
    pub fn fill_silence(&mut self) {
        self.0.fill(S::SILENCE);
    }

    pub fn as_slice(&self) -> &[S] {
        &self.0
    }

    pub fn as_mut_slice(&mut self) -> &mut [S] {
        &mut self.0
    }

    pub fn into_vec(self) -> Vec<S> {
        self.0
    }
}

impl<S> From<Vec<S>> for Chunk<S> {
    fn from(samples: Vec<S>) -> Self {
        Self(samples)
    }
}

impl<S> Deref for Chunk<S> {
    type Target = [S];

    fn deref(&self) -> &[S] {
        &self.0
    }
}

impl<S> DerefMut for Chunk<S> {
    fn deref_mut(&mut self) -> &mut [S] {
        &mut self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_attributes() {
        assert_eq!(SampleFormat::Int16.bytes(), 2);
        assert_eq!(SampleFormat::Int32.bytes(), 4);
        assert_eq!(SampleFormat::Float32.bytes(), 4);
        assert_eq!(SampleFormat::Int16.full_scale(), 32767.0);
        assert_eq!(SampleFormat::Int32.full_scale(), 2147483647.0);
        assert_eq!(SampleFormat::Float32.full_scale(), 1.0);
        assert_eq!(SampleFormat::Int32.bits(), 32);
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("int16".parse::<SampleFormat>(), Ok(SampleFormat::Int16));
        assert_eq!("float32".parse::<SampleFormat>(), Ok(SampleFormat::Float32));
        assert!("int24".parse::<SampleFormat>().is_err());
    }

    #[test]
    fn test_format_yaml_names() {
        let yaml = serde_yaml::to_string(&SampleFormat::Int32).unwrap();
        assert_eq!(yaml.trim(), "int32");
        let parsed: SampleFormat = serde_yaml::from_str("float32").unwrap();
        assert_eq!(parsed, SampleFormat::Float32);
    }

    #[test]
    fn test_native_type_matches_format() {
        assert_eq!(<i16 as Sample>::FORMAT, SampleFormat::Int16);
        assert_eq!(<i32 as Sample>::FORMAT, SampleFormat::Int32);
        assert_eq!(<f32 as Sample>::FORMAT, SampleFormat::Float32);
    }

    #[test]
    fn test_integer_cast_saturates() {
        assert_eq!(i16::from_f64(40000.0), i16::MAX);
        assert_eq!(i16::from_f64(-40000.0), i16::MIN);
        assert_eq!(i16::from_f64(12.9), 12);
        assert_eq!(i16::MAX.mix(10), i16::MAX);
    }

    #[test]
    fn test_normalized_conversion() {
        assert_eq!(i16::from_normalized(1.0), 32767);
        assert_eq!(i16::from_normalized(-0.5), -16383);
        assert!((32767i16.to_normalized() - 1.0).abs() < 1e-6);
        assert_eq!(f32::from_normalized(0.25), 0.25);
    }

    #[test]
    fn test_chunk_silence() {
        let chunk = Chunk::<i32>::silence(16);
        assert_eq!(chunk.len(), 16);
        assert!(chunk.iter().all(|&s| s == 0));
    }
}
