//! Output recorder
//!
//! Captures the final output of every period into a mono WAV file.
//!
//! ```text
//! ┌──────────────────┐  push()   ┌─────────────────────┐  pop()  ┌──────────────────┐
//! │  RecorderSink    │──────────►│  Sample Ring        │────────►│  Writer Thread   │
//! │  (audio thread)  │           │  (lock-free SPSC)   │         │  (hound WAV)     │
//! └──────────────────┘           └─────────────────────┘         └────────▲─────────┘
//!                                                                         │ commands
//!                                                               ┌─────────┴────────┐
//!                                                               │  OutputRecorder  │
//!                                                               └──────────────────┘
//! ```
//!
//! The sink never blocks: samples that don't fit the ring are dropped and
//! counted. On stop the file can be peak-normalized, capped by the
//! configured maximum gain.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};

use crate::config::RecorderConfig;
use crate::engine::OutputSink;
use crate::session::{list_files_with_extension, timestamp_name};
use crate::types::Sample;

/// How often the writer drains the ring while recording
const DRAIN_INTERVAL: Duration = Duration::from_millis(20);

/// Seconds of audio the ring can hold before the sink drops samples
const RING_SECONDS: usize = 2;

/// Gains below this are not worth rewriting the file for (dB)
const MIN_NORMALIZE_GAIN_DB: f64 = 0.01;

/// Recorder state as seen by the control side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecorderPhase {
    Idle,
    Recording,
    /// Finishing or normalizing a file
    Busy,
}

/// A completed recording
#[derive(Debug, Clone, PartialEq)]
pub struct Recording {
    pub path: PathBuf,
    pub frames: u64,
    pub duration_s: f64,
    /// Normalization gain applied to the file (dB)
    pub gain_db: f64,
}

/// Realtime side: attach to the engine with `Looper::attach_sink`
pub struct RecorderSink<S> {
    producer: rtrb::Producer<S>,
    recording: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
}

impl<S: Sample> OutputSink<S> for RecorderSink<S> {
    fn transmit(&mut self, chunk: &[S]) {
        if !self.recording.load(Ordering::Relaxed) {
            return;
        }
        for (written, &sample) in chunk.iter().enumerate() {
            if self.producer.push(sample).is_err() {
                self.dropped
                    .fetch_add((chunk.len() - written) as u64, Ordering::Relaxed);
                break;
            }
        }
    }
}

enum WriterCommand {
    Start {
        path: PathBuf,
        reply: Sender<Result<()>>,
    },
    Stop {
        reply: Sender<Result<FinishedFile>>,
    },
    Shutdown,
}

/// What the writer reports when a file is closed
struct FinishedFile {
    path: PathBuf,
    frames: u64,
    peak: f64,
}

/// File being written by the writer thread
struct ActiveFile<S: Sample> {
    path: PathBuf,
    writer: hound::WavWriter<std::io::BufWriter<std::fs::File>>,
    frames: u64,
    peak: f64,
    _marker: std::marker::PhantomData<S>,
}

impl<S: Sample> ActiveFile<S> {
    fn drain(&mut self, consumer: &mut rtrb::Consumer<S>, written: &AtomicU64) -> Result<()> {
        while let Ok(sample) = consumer.pop() {
            self.writer
                .write_sample(sample)
                .with_context(|| format!("Failed to write to {:?}", self.path))?;
            self.peak = self.peak.max(sample.to_f64().abs());
            self.frames += 1;
        }
        written.store(self.frames, Ordering::Relaxed);
        Ok(())
    }

    fn finish(self) -> Result<FinishedFile> {
        self.writer
            .finalize()
            .with_context(|| format!("Failed to finalize {:?}", self.path))?;
        Ok(FinishedFile {
            path: self.path,
            frames: self.frames,
            peak: self.peak,
        })
    }
}

/// WAV layout for the engine's sample type
pub fn wav_spec<S: Sample>(sampling_rate: u32) -> hound::WavSpec {
    hound::WavSpec {
        channels: 1,
        sample_rate: sampling_rate,
        bits_per_sample: <S as Sample>::FORMAT.bits(),
        sample_format: if <S as Sample>::FORMAT.is_float() {
            hound::SampleFormat::Float
        } else {
            hound::SampleFormat::Int
        },
    }
}

fn writer_loop<S: Sample>(
    mut consumer: rtrb::Consumer<S>,
    commands: Receiver<WriterCommand>,
    spec: hound::WavSpec,
    written: Arc<AtomicU64>,
) {
    let mut active: Option<ActiveFile<S>> = None;

    loop {
        match commands.recv_timeout(DRAIN_INTERVAL) {
            Ok(WriterCommand::Start { path, reply }) => {
                // Leftovers from a previous take
                while consumer.pop().is_ok() {}
                written.store(0, Ordering::Relaxed);
                let result = match hound::WavWriter::create(&path, spec) {
                    Ok(writer) => {
                        active = Some(ActiveFile {
                            path,
                            writer,
                            frames: 0,
                            peak: 0.0,
                            _marker: std::marker::PhantomData,
                        });
                        Ok(())
                    }
                    Err(e) => Err(anyhow!("Failed to create {:?}: {}", path, e)),
                };
                let _ = reply.send(result);
            }
            Ok(WriterCommand::Stop { reply }) => {
                let result = match active.take() {
                    Some(mut file) => file.drain(&mut consumer, &written).and_then(|_| file.finish()),
                    None => Err(anyhow!("No recording in progress")),
                };
                let _ = reply.send(result);
            }
            Ok(WriterCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(mut file) = active.take() {
                    let result = file.drain(&mut consumer, &written).and_then(|_| file.finish());
                    match result {
                        Ok(done) => log::info!("Recording {:?} closed on shutdown", done.path),
                        Err(e) => log::error!("Recording lost on shutdown: {:#}", e),
                    }
                }
                break;
            }
            Err(RecvTimeoutError::Timeout) => {}
        }

        if let Some(file) = active.as_mut() {
            if let Err(e) = file.drain(&mut consumer, &written) {
                log::error!("Recording aborted: {:#}", e);
                active = None;
            }
        }
    }
}

/// Normalization gain that brings `peak` to full scale, capped at `max_gain_db`
pub fn normalization_gain_db(peak: f64, full_scale: f64, max_gain_db: f64) -> f64 {
    if peak <= 0.0 {
        return 0.0;
    }
    let peak_dbfs = 20.0 * (peak / full_scale).log10();
    (-peak_dbfs).min(max_gain_db).max(0.0)
}

/// Rewrite a WAV file with a gain applied
fn apply_gain<S: Sample>(path: &Path, gain_db: f64) -> Result<()> {
    let gain = 10f64.powf(gain_db / 20.0);
    let reader = hound::WavReader::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    let spec = reader.spec();
    let samples = reader
        .into_samples::<S>()
        .collect::<Result<Vec<S>, _>>()
        .with_context(|| format!("Failed to read {:?}", path))?;

    let tmp = path.with_extension("wav.tmp");
    let mut writer = hound::WavWriter::create(&tmp, spec).with_context(|| format!("Failed to create {:?}", tmp))?;
    for sample in samples {
        writer.write_sample(S::from_f64(sample.to_f64() * gain))?;
    }
    writer.finalize().with_context(|| format!("Failed to finalize {:?}", tmp))?;
    std::fs::rename(&tmp, path).with_context(|| format!("Failed to replace {:?}", path))?;
    Ok(())
}

/// Control side of the recorder
pub struct OutputRecorder<S: Sample> {
    config: RecorderConfig,
    sampling_rate: u32,
    phase: RecorderPhase,
    recording: Arc<AtomicBool>,
    dropped: Arc<AtomicU64>,
    written: Arc<AtomicU64>,
    commands: Sender<WriterCommand>,
    writer: Option<JoinHandle<()>>,
    _marker: std::marker::PhantomData<S>,
}

impl<S: Sample> OutputRecorder<S> {
    /// Create the recorder and its sink, starting the writer thread
    pub fn new(config: &RecorderConfig, sampling_rate: u32, chunk_size: usize) -> Result<(Self, RecorderSink<S>)> {
        let capacity = (sampling_rate as usize * RING_SECONDS).max(chunk_size * 4);
        let (producer, consumer) = rtrb::RingBuffer::new(capacity);
        let (commands, command_rx) = channel::unbounded();
        let recording = Arc::new(AtomicBool::new(false));
        let dropped = Arc::new(AtomicU64::new(0));
        let written = Arc::new(AtomicU64::new(0));

        let spec = wav_spec::<S>(sampling_rate);
        let writer = {
            let written = written.clone();
            thread::Builder::new()
                .name("recorder-writer".to_string())
                .spawn(move || writer_loop(consumer, command_rx, spec, written))
                .context("Failed to spawn recorder writer thread")?
        };

        let sink = RecorderSink {
            producer,
            recording: recording.clone(),
            dropped: dropped.clone(),
        };
        let recorder = Self {
            config: config.clone(),
            sampling_rate,
            phase: RecorderPhase::Idle,
            recording,
            dropped,
            written,
            commands,
            writer: Some(writer),
            _marker: std::marker::PhantomData,
        };
        Ok((recorder, sink))
    }

    pub fn phase(&self) -> RecorderPhase {
        self.phase
    }

    /// Start a new file named by the local timestamp
    pub fn start_saving(&mut self) -> Result<PathBuf> {
        if self.phase != RecorderPhase::Idle {
            return Err(anyhow!("Recorder is {:?}", self.phase));
        }
        std::fs::create_dir_all(&self.config.output_dir)
            .with_context(|| format!("Failed to create recordings directory: {:?}", self.config.output_dir))?;
        let path = self.config.output_dir.join(format!("{}.wav", timestamp_name()));

        let (reply, response) = channel::bounded(1);
        self.send(WriterCommand::Start { path: path.clone(), reply })?;
        response
            .recv()
            .map_err(|_| anyhow!("Recorder writer thread stopped"))??;

        self.dropped.store(0, Ordering::Relaxed);
        self.recording.store(true, Ordering::Relaxed);
        self.phase = RecorderPhase::Recording;
        log::info!("Recording output to {:?}", path);
        Ok(path)
    }

    /// Close the current file, normalizing it when configured
    pub fn stop_saving(&mut self) -> Result<Recording> {
        if self.phase != RecorderPhase::Recording {
            return Err(anyhow!("Recorder is {:?}", self.phase));
        }
        self.recording.store(false, Ordering::Relaxed);
        self.phase = RecorderPhase::Busy;
        let result = self.finish();
        self.phase = RecorderPhase::Idle;
        result
    }

    fn finish(&mut self) -> Result<Recording> {
        let (reply, response) = channel::bounded(1);
        self.send(WriterCommand::Stop { reply })?;
        let finished = response
            .recv()
            .map_err(|_| anyhow!("Recorder writer thread stopped"))??;

        let dropped = self.dropped.load(Ordering::Relaxed);
        if dropped > 0 {
            log::warn!("Recorder dropped {} samples (writer too slow)", dropped);
        }

        let mut gain_db = 0.0;
        if self.config.normalize {
            gain_db = normalization_gain_db(finished.peak, <S as Sample>::FORMAT.full_scale(), self.config.max_gain_db);
            if gain_db > MIN_NORMALIZE_GAIN_DB {
                apply_gain::<S>(&finished.path, gain_db)?;
            } else {
                gain_db = 0.0;
            }
        }

        let recording = Recording {
            duration_s: finished.frames as f64 / self.sampling_rate as f64,
            path: finished.path,
            frames: finished.frames,
            gain_db,
        };
        log::info!(
            "Saved recording {:?} ({:.1}s, {:+.1}dB)",
            recording.path,
            recording.duration_s,
            recording.gain_db
        );
        Ok(recording)
    }

    /// Start or stop; returns the finished recording when stopping
    pub fn toggle_saving(&mut self) -> Result<Option<Recording>> {
        match self.phase {
            RecorderPhase::Idle => self.start_saving().map(|_| None),
            RecorderPhase::Recording => self.stop_saving().map(Some),
            RecorderPhase::Busy => Err(anyhow!("Recorder is busy")),
        }
    }

    /// Seconds written to the current (or last) file
    pub fn recorded_duration(&self) -> f64 {
        self.written.load(Ordering::Relaxed) as f64 / self.sampling_rate as f64
    }

    /// WAV files in the output directory, sorted
    pub fn list_recordings(&self) -> Result<Vec<String>> {
        list_files_with_extension(&self.config.output_dir, "wav")
    }

    fn send(&self, command: WriterCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| anyhow!("Recorder writer thread stopped"))
    }
}

impl<S: Sample> Drop for OutputRecorder<S> {
    fn drop(&mut self) {
        self.recording.store(false, Ordering::Relaxed);
        let _ = self.commands.send(WriterCommand::Shutdown);
        if let Some(writer) = self.writer.take() {
            let _ = writer.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHUNK: usize = 16;
    const RATE: u32 = 1600;

    fn recorder<S: Sample>(dir: &Path, normalize: bool) -> (OutputRecorder<S>, RecorderSink<S>) {
        let config = RecorderConfig {
            output_dir: dir.to_path_buf(),
            normalize,
            max_gain_db: 12.0,
        };
        OutputRecorder::new(&config, RATE, CHUNK).unwrap()
    }

    #[test]
    fn test_sink_ignored_while_idle() {
        let dir = tempfile::tempdir().unwrap();
        let (mut recorder, mut sink) = recorder::<i16>(dir.path(), false);
        sink.transmit(&[100; CHUNK]);

        recorder.start_saving().unwrap();
        sink.transmit(&[200; CHUNK]);
        let recording = recorder.stop_saving().unwrap();
        assert_eq!(recording.frames, CHUNK as u64);

        let samples: Vec<i16> = hound::WavReader::open(&recording.path)
            .unwrap()
            .into_samples()
            .map(|s| s.unwrap())
            .collect();
        assert_eq!(samples, vec![200; CHUNK]);
    }

    #[test]
    fn test_recording_written_and_listed() {
        let dir = tempfile::tempdir().unwrap();
        let (mut recorder, mut sink) = recorder::<f32>(dir.path(), false);
        assert_eq!(recorder.toggle_saving().unwrap(), None);
        assert_eq!(recorder.phase(), RecorderPhase::Recording);
        for _ in 0..10 {
            sink.transmit(&[0.25; CHUNK]);
        }
        let recording = recorder.toggle_saving().unwrap().unwrap();
        assert_eq!(recorder.phase(), RecorderPhase::Idle);
        assert!((recording.duration_s - 0.1).abs() < 1e-9);
        assert!((recorder.recorded_duration() - 0.1).abs() < 1e-9);

        let reader = hound::WavReader::open(&recording.path).unwrap();
        assert_eq!(reader.spec().sample_format, hound::SampleFormat::Float);
        assert_eq!(reader.spec().sample_rate, RATE);

        let name = recording.path.file_name().unwrap().to_string_lossy().into_owned();
        assert_eq!(recorder.list_recordings().unwrap(), vec![name]);
    }

    #[test]
    fn test_normalization_capped() {
        let dir = tempfile::tempdir().unwrap();
        let (mut recorder, mut sink) = recorder::<i16>(dir.path(), true);
        recorder.start_saving().unwrap();
        // -20 dBFS peak, gain capped at 12 dB
        sink.transmit(&[3277; CHUNK]);
        let recording = recorder.stop_saving().unwrap();
        assert!((recording.gain_db - 12.0).abs() < 1e-9);

        let peak = hound::WavReader::open(&recording.path)
            .unwrap()
            .into_samples::<i16>()
            .map(|s| s.unwrap())
            .max()
            .unwrap();
        assert!((peak as f64 - 3277.0 * 10f64.powf(0.6)).abs() < 2.0);
    }

    #[test]
    fn test_normalization_gain() {
        assert_eq!(normalization_gain_db(0.0, 1.0, 20.0), 0.0);
        assert!((normalization_gain_db(0.5, 1.0, 20.0) - 6.0206).abs() < 1e-3);
        assert_eq!(normalization_gain_db(0.001, 1.0, 20.0), 20.0);
        assert_eq!(normalization_gain_db(1.0, 1.0, 20.0), 0.0);
    }

    #[test]
    fn test_stop_without_start_fails() {
        let dir = tempfile::tempdir().unwrap();
        let (mut recorder, _sink) = recorder::<i16>(dir.path(), false);
        assert!(recorder.stop_saving().is_err());
        assert_eq!(recorder.phase(), RecorderPhase::Idle);
    }

    #[test]
    fn test_full_ring_counts_drops() {
        let (producer, _consumer) = rtrb::RingBuffer::new(4);
        let dropped = Arc::new(AtomicU64::new(0));
        let mut sink = RecorderSink {
            producer,
            recording: Arc::new(AtomicBool::new(true)),
            dropped: dropped.clone(),
        };
        sink.transmit(&[1i16; 6]);
        assert_eq!(dropped.load(Ordering::Relaxed), 2);
    }
}
