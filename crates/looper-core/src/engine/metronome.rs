//! Metronome - click loops that can stand in for a recorded master
//!
//! A bar is `floor(60 / bpm * beats / chunk_length)` chunks long; the first
//! beat gets the high click, the others the low one. Clicks are synthesized
//! decaying tones unless WAV files are configured, in which case they are
//! loaded once when the metronome is created.

use std::path::Path;

use anyhow::{bail, Context, Result};

use crate::config::MetronomeConfig;
use crate::dsp::SignalProcessor;
use crate::types::{Chunk, Sample};

const CLICK_DURATION_S: f64 = 0.03;
const CLICK_DECAY_S: f64 = 0.008;
const HIGH_CLICK_HZ: f64 = 1760.0;
const LOW_CLICK_HZ: f64 = 880.0;

/// Click track generator
pub struct Metronome<S> {
    dsp: SignalProcessor<S>,
    /// Attenuation applied to generated loops (dB)
    volume_db: f64,
    high_click: Vec<S>,
    low_click: Vec<S>,
}

impl<S: Sample> Metronome<S> {
    pub fn new(chunk_size: usize, sampling_rate: u32, config: &MetronomeConfig) -> Result<Self> {
        let high_click = match &config.high_click {
            Some(path) => load_click(path, sampling_rate)?,
            None => synthesize_click(sampling_rate, HIGH_CLICK_HZ, 0.8),
        };
        let low_click = match &config.low_click {
            Some(path) => load_click(path, sampling_rate)?,
            None => synthesize_click(sampling_rate, LOW_CLICK_HZ, 0.6),
        };
        Ok(Self {
            dsp: SignalProcessor::new(chunk_size, sampling_rate),
            volume_db: config.volume_db,
            high_click,
            low_click,
        })
    }

    /// Generate `bars` bars of `beats` clicks at `bpm`
    ///
    /// Returns no chunks when the bar is shorter than one chunk.
    pub fn generate_beat(&self, bpm: f64, beats: usize, bars: usize) -> Vec<Chunk<S>> {
        if bpm <= 0.0 || beats == 0 {
            return Vec::new();
        }
        let chunk_size = self.dsp.chunk_size();
        let beat_period_s = 60.0 / bpm;
        let chunks_num = (beat_period_s * beats as f64 / self.dsp.chunk_length_s()) as usize;
        let samples_per_beat = (beat_period_s * self.dsp.sampling_rate() as f64) as usize;

        let mut bar = vec![S::SILENCE; chunks_num * chunk_size];
        for beat in 0..beats {
            let click = if beat == 0 { &self.high_click } else { &self.low_click };
            add_at_offset(&mut bar, click, beat * samples_per_beat);
        }
        self.dsp.amplify_in_place(&mut bar, self.volume_db);

        let bar: Vec<Chunk<S>> = bar.chunks_exact(chunk_size).map(Chunk::from_slice).collect();
        (0..bars).flat_map(|_| bar.iter().cloned()).collect()
    }
}

fn add_at_offset<S: Sample>(track: &mut [S], sound: &[S], offset: usize) {
    if let Some(target) = track.get_mut(offset..) {
        for (out, &sample) in target.iter_mut().zip(sound) {
            *out = out.mix(sample);
        }
    }
}

/// Exponentially decaying sine burst
fn synthesize_click<S: Sample>(sampling_rate: u32, frequency: f64, amplitude: f64) -> Vec<S> {
    let rate = sampling_rate as f64;
    let len = (CLICK_DURATION_S * rate) as usize;
    (0..len)
        .map(|i| {
            let t = i as f64 / rate;
            let value = (2.0 * std::f64::consts::PI * frequency * t).sin() * (-t / CLICK_DECAY_S).exp();
            S::from_normalized((value * amplitude) as f32)
        })
        .collect()
}

/// Load the first channel of a WAV file recorded at the engine's rate
fn load_click<S: Sample>(path: &Path, sampling_rate: u32) -> Result<Vec<S>> {
    let mut reader = hound::WavReader::open(path)
        .with_context(|| format!("Failed to open click sample {:?}", path))?;
    let spec = reader.spec();
    if spec.sample_rate != sampling_rate {
        bail!(
            "Click sample {:?} is {} Hz, engine runs at {} Hz",
            path,
            spec.sample_rate,
            sampling_rate
        );
    }
    let channels = spec.channels.max(1) as usize;
    let normalized: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<Result<_, _>>()
            .with_context(|| format!("Failed to decode {:?}", path))?,
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<Result<_, _>>()
                .with_context(|| format!("Failed to decode {:?}", path))?
        }
    };
    Ok(normalized.into_iter().step_by(channels).map(S::from_normalized).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metronome(volume_db: f64) -> Metronome<i16> {
        let config = MetronomeConfig { volume_db, ..Default::default() };
        Metronome::new(1024, 44100, &config).unwrap()
    }

    fn peak(chunks: &[Chunk<i16>]) -> i16 {
        chunks.iter().flat_map(|c| c.iter()).map(|s| s.saturating_abs()).max().unwrap_or(0)
    }

    #[test]
    fn test_chunk_count() {
        let metronome = metronome(0.0);
        // 0.5 s per beat, 4 beats, 1024/44100 s per chunk → 86 chunks per bar
        assert_eq!(metronome.generate_beat(120.0, 4, 1).len(), 86);
        assert_eq!(metronome.generate_beat(120.0, 4, 2).len(), 172);
        assert!(metronome.generate_beat(0.0, 4, 1).is_empty());
    }

    #[test]
    fn test_clicks_on_beats() {
        let metronome = metronome(0.0);
        let chunks = metronome.generate_beat(120.0, 4, 1);
        let samples: Vec<i16> = chunks.iter().flat_map(|c| c.iter().copied()).collect();
        let samples_per_beat = 22050;
        let energy = |start: usize| samples[start..start + 500].iter().map(|s| s.unsigned_abs() as u64).sum::<u64>();
        assert!(energy(0) > 0);
        assert!(energy(samples_per_beat) > 0);
        // Silence between clicks
        assert_eq!(energy(samples_per_beat / 2), 0);
        // High click is louder than the low one
        assert!(energy(0) > energy(samples_per_beat));
    }

    #[test]
    fn test_volume_attenuation() {
        let loud = peak(&metronome(0.0).generate_beat(100.0, 3, 1));
        let quiet = peak(&metronome(-6.0).generate_beat(100.0, 3, 1));
        let ratio = quiet as f64 / loud as f64;
        assert!((ratio - 0.501).abs() < 0.01);
    }

    #[test]
    fn test_load_click_from_wav() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("click.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 44100,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for _ in 0..10 {
            writer.write_sample(16384i16).unwrap();
            writer.write_sample(-1i16).unwrap();
        }
        writer.finalize().unwrap();

        let click: Vec<i16> = load_click(&path, 44100).unwrap();
        assert_eq!(click.len(), 10);
        assert!(click.iter().all(|&s| (s - 16383).abs() <= 1));

        assert!(load_click::<i16>(&path, 48000).is_err());
    }
}
