//! Signal processor - chunk-level DSP primitives for the loop engine
//!
//! Everything here operates on whole chunks of `chunk_size` samples:
//! - Linear fade ramps (removes clicks at loop and overdub seams)
//! - Test tone / silence generation
//! - Root-power decibel gain
//! - RMS loudness in dBFS (floored at -100 dBFS, never -inf or NaN)
//! - DC-bias estimation and correction
//!
//! Gains and ramps are computed in `f64` and cast back to the native type,
//! truncating toward zero and saturating for integer formats.

use std::borrow::Borrow;
use std::marker::PhantomData;

use crate::types::{Chunk, Sample, SILENCE_DBFS};

/// Convert a root-power decibel value to a linear amplitude factor
#[inline]
pub fn db_to_gain(volume_db: f64) -> f64 {
    10.0_f64.powf(volume_db / 20.0)
}

/// Convert an RMS value relative to full scale into dBFS
///
/// The √2 factor makes a full-scale sine (RMS = amplitude/√2) read 0 dBFS.
fn rms_to_dbfs(rms: f64) -> f64 {
    if rms <= 0.0 || !rms.is_finite() {
        return SILENCE_DBFS;
    }
    (20.0 * (rms * std::f64::consts::SQRT_2).log10()).max(SILENCE_DBFS)
}

/// Evenly spaced values from `start` to `end` inclusive
fn linspace(start: f64, end: f64, len: usize) -> Vec<f64> {
    match len {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (len - 1) as f64;
            (0..len).map(|i| start + step * i as f64).collect()
        }
    }
}

/// Chunk-level signal processor for one sample type
///
/// Stateless apart from the precomputed fade ramps, so a single instance
/// can be shared by every track of the engine.
#[derive(Debug, Clone)]
pub struct SignalProcessor<S> {
    chunk_size: usize,
    sampling_rate: u32,
    upramp: Vec<f64>,
    downramp: Vec<f64>,
    _sample: PhantomData<S>,
}

impl<S: Sample> SignalProcessor<S> {
    pub fn new(chunk_size: usize, sampling_rate: u32) -> Self {
        Self {
            chunk_size,
            sampling_rate,
            upramp: linspace(0.0, 1.0, chunk_size),
            downramp: linspace(1.0, 0.0, chunk_size),
            _sample: PhantomData,
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn sampling_rate(&self) -> u32 {
        self.sampling_rate
    }

    /// Duration of one chunk in seconds
    pub fn chunk_length_s(&self) -> f64 {
        self.chunk_size as f64 / self.sampling_rate as f64
    }

    /// Full-scale amplitude of the native type
    pub fn full_scale(&self) -> f64 {
        <S as Sample>::FORMAT.full_scale()
    }

    /// Multiply a chunk in place by a 0→1 linear ramp
    pub fn fade_in(&self, buffer: &mut [S]) {
        for (sample, gain) in buffer.iter_mut().zip(&self.upramp) {
            *sample = S::from_f64(sample.to_f64() * gain);
        }
    }

    /// Multiply a chunk in place by a 1→0 linear ramp
    pub fn fade_out(&self, buffer: &mut [S]) {
        for (sample, gain) in buffer.iter_mut().zip(&self.downramp) {
            *sample = S::from_f64(sample.to_f64() * gain);
        }
    }

    /// Generate one chunk of a sine tone
    ///
    /// `amplitude` is in native units (e.g. 32767 for full-scale int16).
    pub fn sine(&self, frequency: f64, amplitude: f64) -> Chunk<S> {
        let step = 2.0 * std::f64::consts::PI * frequency / self.sampling_rate as f64;
        let samples: Vec<S> = (0..self.chunk_size)
            .map(|i| S::from_f64((step * i as f64).sin() * amplitude))
            .collect();
        Chunk::from(samples)
    }

    /// Generate one chunk of silence
    pub fn silence(&self) -> Chunk<S> {
        Chunk::silence(self.chunk_size)
    }

    /// Return a copy of `chunk` amplified by `volume_db` root-power decibels
    pub fn amplify(&self, chunk: &[S], volume_db: f64) -> Chunk<S> {
        let mut out = Chunk::from_slice(chunk);
        self.amplify_in_place(&mut out, volume_db);
        out
    }

    /// Amplify a buffer in place by `volume_db` root-power decibels
    pub fn amplify_in_place(&self, buffer: &mut [S], volume_db: f64) {
        if volume_db == 0.0 {
            return;
        }
        let gain = db_to_gain(volume_db);
        for sample in buffer.iter_mut() {
            *sample = S::from_f64(sample.to_f64() * gain);
        }
    }

    /// Add `src` amplified by `volume_db` into `dst` (no allocation)
    pub fn amplify_into(&self, dst: &mut [S], src: &[S], volume_db: f64) {
        if volume_db == 0.0 {
            self.mix_into(dst, src);
            return;
        }
        let gain = db_to_gain(volume_db);
        for (out, &sample) in dst.iter_mut().zip(src) {
            *out = out.mix(S::from_f64(sample.to_f64() * gain));
        }
    }

    /// Add `src` into `dst` sample-wise (unity mix)
    #[inline]
    pub fn mix_into(&self, dst: &mut [S], src: &[S]) {
        for (out, &sample) in dst.iter_mut().zip(src) {
            *out = out.mix(sample);
        }
    }

    /// Subtract `src` from `dst` sample-wise
    #[inline]
    pub fn unmix_from(&self, dst: &mut [S], src: &[S]) {
        for (out, &sample) in dst.iter_mut().zip(src) {
            *out = out.unmix(sample);
        }
    }

    /// Mean of squared normalized samples, `None` for an empty chunk
    fn mean_square(&self, chunk: &[S]) -> Option<f64> {
        if chunk.is_empty() {
            return None;
        }
        let full_scale = self.full_scale();
        let sum: f64 = chunk
            .iter()
            .map(|s| {
                let x = s.to_f64() / full_scale;
                x * x
            })
            .sum();
        Some(sum / chunk.len() as f64)
    }

    /// Loudness of one chunk in dBFS
    pub fn compute_chunk_loudness(&self, chunk: &[S]) -> f64 {
        match self.mean_square(chunk) {
            Some(ms) => rms_to_dbfs(ms.sqrt()),
            None => SILENCE_DBFS,
        }
    }

    /// Loudness of a chunk sequence in dBFS (mean of per-chunk mean squares)
    ///
    /// Accepts owned or shared (`Arc`) chunks.
    pub fn compute_loudness<C: Borrow<Chunk<S>>>(&self, chunks: &[C]) -> f64 {
        let means: Vec<f64> = chunks
            .iter()
            .filter_map(|c| self.mean_square(Borrow::<Chunk<S>>::borrow(c)))
            .collect();
        if means.is_empty() {
            return SILENCE_DBFS;
        }
        let mean = means.iter().sum::<f64>() / means.len() as f64;
        rms_to_dbfs(mean.sqrt())
    }

    /// Mean sample value across all chunks (DC offset in native units)
    pub fn calculate_baseline_bias(&self, chunks: &[Chunk<S>]) -> f64 {
        let count: usize = chunks.iter().map(|c| c.len()).sum();
        if count == 0 {
            return 0.0;
        }
        let sum: f64 = chunks.iter().flat_map(|c| c.iter()).map(|s| s.to_f64()).sum();
        sum / count as f64
    }

    /// Add a constant (native units) to every sample of every chunk
    pub fn move_by_offset(&self, chunks: &mut [Chunk<S>], offset: f64) {
        for chunk in chunks.iter_mut() {
            self.add_offset(chunk, offset);
        }
    }

    /// Add a constant (native units) to every sample of one buffer
    ///
    /// Integer formats round the offset to the nearest step first.
    #[inline]
    pub fn add_offset(&self, buffer: &mut [S], offset: f64) {
        let offset = if <S as Sample>::FORMAT.is_float() { offset } else { offset.round() };
        if offset == 0.0 {
            return;
        }
        for sample in buffer.iter_mut() {
            *sample = S::from_f64(sample.to_f64() + offset);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHUNK: usize = 1024;
    const RATE: u32 = 44100;

    fn full_scale_sine<S: Sample>() -> Chunk<S> {
        let dsp = SignalProcessor::<S>::new(CHUNK, RATE);
        dsp.sine(440.0, <S as Sample>::FORMAT.full_scale())
    }

    #[test]
    fn test_db_to_gain() {
        assert_eq!(db_to_gain(0.0), 1.0);
        assert!((db_to_gain(20.0) - 10.0).abs() < 1e-9);
        assert!((db_to_gain(-6.0) - 0.501).abs() < 0.001);
    }

    #[test]
    fn test_fades_shape_a_loop() {
        let dsp = SignalProcessor::<i16>::new(CHUNK, RATE);
        let mut chunks = vec![Chunk::from(vec![10000i16; CHUNK]); 3];
        dsp.fade_in(&mut chunks[0]);
        dsp.fade_out(&mut chunks[2]);

        assert_eq!(chunks[0][0], 0);
        assert_eq!(chunks[2][CHUNK - 1], 0);
        // midpoint of the loop stays at the original amplitude
        assert_eq!(chunks[1][CHUNK / 2], 10000);
        assert_eq!(chunks[0][CHUNK - 1], 10000);
        assert_eq!(chunks[2][0], 10000);

        assert!(chunks[0].windows(2).all(|w| w[0] <= w[1]));
        assert!(chunks[2].windows(2).all(|w| w[0] >= w[1]));
    }

    #[test]
    fn test_fade_in_then_out_on_one_chunk() {
        let dsp = SignalProcessor::<f32>::new(CHUNK, RATE);
        let mut chunk = Chunk::from(vec![1.0f32; CHUNK]);
        dsp.fade_in(&mut chunk);
        dsp.fade_out(&mut chunk);
        assert!(chunk[0].abs() < 1e-6);
        assert!(chunk[CHUNK - 1].abs() < 1e-6);
        // x * (1 - x) peaks at a quarter of the amplitude
        assert!((chunk[CHUNK / 2] - 0.25).abs() < 0.01);
    }

    #[test]
    fn test_silence_loudness_is_floored() {
        let dsp = SignalProcessor::<i16>::new(CHUNK, RATE);
        assert_eq!(dsp.compute_loudness::<Chunk<i16>>(&[]), -100.0);
        assert_eq!(dsp.compute_loudness(&[dsp.silence(), dsp.silence()]), -100.0);
        assert_eq!(dsp.compute_chunk_loudness(&dsp.silence()), -100.0);
        assert_eq!(dsp.compute_chunk_loudness(&[]), -100.0);
    }

    #[test]
    fn test_full_scale_sine_reads_zero_dbfs_in_every_format() {
        fn check<S: Sample>() {
            let dsp = SignalProcessor::<S>::new(CHUNK, RATE);
            let sine = full_scale_sine::<S>();
            let amplified = dsp.amplify(&sine, 0.0);
            let loudness = dsp.compute_chunk_loudness(&amplified);
            assert!(loudness.abs() < 0.1, "{:?}: {} dBFS", <S as Sample>::FORMAT, loudness);
            let seq = dsp.compute_loudness(&[amplified.clone(), amplified]);
            assert!((seq - loudness).abs() < 1e-9);
        }
        check::<i16>();
        check::<i32>();
        check::<f32>();
    }

    #[test]
    fn test_amplify_changes_loudness_by_db() {
        let dsp = SignalProcessor::<f32>::new(CHUNK, RATE);
        let sine = full_scale_sine::<f32>();
        let quiet = dsp.amplify(&sine, -12.0);
        let delta = dsp.compute_chunk_loudness(&sine) - dsp.compute_chunk_loudness(&quiet);
        assert!((delta - 12.0).abs() < 0.01);
    }

    #[test]
    fn test_amplify_into_adds() {
        let dsp = SignalProcessor::<i16>::new(4, RATE);
        let mut dst = [100i16, 100, 100, 100];
        dsp.amplify_into(&mut dst, &[10, 20, 30, 40], 0.0);
        assert_eq!(dst, [110, 120, 130, 140]);
        dsp.amplify_into(&mut dst, &[100, 100, 100, 100], 20.0);
        for (out, expected) in dst.iter().zip([1110i16, 1120, 1130, 1140]) {
            assert!((out - expected).abs() <= 1);
        }
    }

    #[test]
    fn test_bias_estimation_and_correction() {
        let dsp = SignalProcessor::<i16>::new(4, RATE);
        let mut chunks = vec![
            Chunk::from(vec![110i16, 90, 110, 90]),
            Chunk::from(vec![120i16, 80, 100, 100]),
        ];
        let bias = dsp.calculate_baseline_bias(&chunks);
        assert!((bias - 100.0).abs() < 1e-9);

        dsp.move_by_offset(&mut chunks, -bias);
        assert_eq!(chunks[0].as_slice(), &[10, -10, 10, -10]);
        assert_eq!(dsp.calculate_baseline_bias(&chunks), 0.0);
        assert_eq!(dsp.calculate_baseline_bias(&[]), 0.0);
    }

    #[test]
    fn test_sine_starts_at_zero() {
        let dsp = SignalProcessor::<i32>::new(CHUNK, RATE);
        let sine = dsp.sine(1000.0, 1000.0);
        assert_eq!(sine.len(), CHUNK);
        assert_eq!(sine[0], 0);
        assert!(sine.iter().any(|&s| s > 900));
    }
}
