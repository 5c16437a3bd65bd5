//! CPAL duplex stream backend
//!
//! CPAL has no bidirectional stream, so the duplex period is assembled from
//! two streams joined by a lock-free ring buffer:
//!
//! ```text
//! ┌──────────────────┐   push()   ┌─────────────────────┐   pop()   ┌──────────────────────┐
//! │  Input Stream    │───────────►│  Capture Ring       │──────────►│  Output Stream       │
//! │  (first channel) │            │  (lock-free SPSC)   │           │  chunk_size frames → │
//! └──────────────────┘            └─────────────────────┘           │  period callback →   │
//!                                                                   │  all device channels │
//!                                                                   └──────────────────────┘
//! ```
//!
//! The output stream runs the period callback whenever a full period of
//! input is available; if it isn't, the missing frames are played as
//! silence.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{BufferSize as CpalBufferSize, Stream, StreamConfig};

use super::config::{AudioConfig, MAX_BUFFER_SIZE};
use super::device::{device_at, enumerate_devices, resolve_devices};
use super::error::{AudioError, AudioResult};
use crate::types::Sample;

/// Periods of input the capture ring can hold
const CAPTURE_RING_PERIODS: usize = 8;

/// CPAL-specific audio handle
///
/// Keeps both streams alive until `close()` or drop.
pub struct CpalBackend {
    input_stream: Option<Stream>,
    output_stream: Option<Stream>,
    sample_rate: u32,
    buffer_size: u32,
    /// Set by the stream error callbacks
    failed: Arc<AtomicBool>,
}

impl CpalBackend {
    /// Open the duplex stream and start calling `callback` once per period
    pub fn open<S, F>(config: &AudioConfig, callback: F) -> AudioResult<Self>
    where
        S: Sample,
        F: FnMut(&[S], &mut [S]) + Send + 'static,
    {
        let chunk_size = config.chunk_size;
        if chunk_size == 0 || chunk_size > MAX_BUFFER_SIZE {
            return Err(AudioError::ConfigError(format!(
                "chunk size {} outside 1..={}",
                chunk_size, MAX_BUFFER_SIZE
            )));
        }

        let host = cpal::default_host();
        let devices = enumerate_devices(&host)?;
        let (in_index, out_index) = resolve_devices(config, &devices)?;
        let input_device = device_at(&host, in_index)?;
        let output_device = device_at(&host, out_index)?;

        log::info!(
            "Input device: {}",
            input_device.name().unwrap_or_else(|_| "Unknown".to_string())
        );
        log::info!(
            "Output device: {}",
            output_device.name().unwrap_or_else(|_| "Unknown".to_string())
        );

        let input_channels = input_device
            .default_input_config()
            .map_err(|e| AudioError::ConfigError(e.to_string()))?
            .channels();
        let output_channels = output_device
            .default_output_config()
            .map_err(|e| AudioError::ConfigError(e.to_string()))?
            .channels();

        let stream_config = |channels: u16| StreamConfig {
            channels,
            sample_rate: cpal::SampleRate(config.sampling_rate),
            buffer_size: CpalBufferSize::Fixed(chunk_size as u32),
        };

        log::info!(
            "Audio config: {} in / {} out channels, {}Hz, {} frames (~{:.1}ms latency), {}",
            input_channels,
            output_channels,
            config.sampling_rate,
            chunk_size,
            config.latency_ms(),
            <S as Sample>::FORMAT
        );

        let (producer, consumer) = rtrb::RingBuffer::<S>::new(chunk_size * CAPTURE_RING_PERIODS);
        let failed = Arc::new(AtomicBool::new(false));

        let input_stream = build_input_stream(
            &input_device,
            &stream_config(input_channels),
            producer,
            failed.clone(),
        )?;
        let state = DuplexState::new(callback, consumer, chunk_size);
        let output_stream = build_output_stream(
            &output_device,
            &stream_config(output_channels),
            state,
            failed.clone(),
        )?;

        // Streams are dropped (closed) on any error below
        input_stream
            .play()
            .map_err(|e| AudioError::StreamPlayError(format!("Input: {}", e)))?;
        output_stream
            .play()
            .map_err(|e| AudioError::StreamPlayError(format!("Output: {}", e)))?;

        log::info!("Audio duplex stream started");

        Ok(Self {
            input_stream: Some(input_stream),
            output_stream: Some(output_stream),
            sample_rate: config.sampling_rate,
            buffer_size: chunk_size as u32,
            failed,
        })
    }

    /// Stop both streams; safe to call repeatedly or after a stream failure
    pub fn close(&mut self) {
        let mut closed = false;
        for stream in [self.output_stream.take(), self.input_stream.take()].into_iter().flatten() {
            if let Err(e) = stream.pause() {
                log::debug!("Pausing audio stream failed: {}", e);
            }
            drop(stream);
            closed = true;
        }
        if closed {
            log::info!("Audio duplex stream closed");
        }
    }

    /// Get the sample rate of the audio system
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Get the period size in frames
    pub fn buffer_size(&self) -> u32 {
        self.buffer_size
    }

    /// Whether a stream reported an error
    pub fn has_failed(&self) -> bool {
        self.failed.load(Ordering::Relaxed)
    }
}

impl Drop for CpalBackend {
    fn drop(&mut self) {
        self.close();
    }
}

/// State owned by the output stream callback
struct DuplexState<S, F> {
    callback: F,
    capture: rtrb::Consumer<S>,
    chunk_size: usize,
    /// Pre-allocated period buffers
    input: Vec<S>,
    output: Vec<S>,
    /// Processed frames not yet handed to the device
    pending: VecDeque<S>,
}

impl<S: Sample, F: FnMut(&[S], &mut [S])> DuplexState<S, F> {
    fn new(callback: F, capture: rtrb::Consumer<S>, chunk_size: usize) -> Self {
        Self {
            callback,
            capture,
            chunk_size,
            input: vec![S::SILENCE; chunk_size],
            output: vec![S::SILENCE; chunk_size],
            pending: VecDeque::with_capacity(chunk_size + MAX_BUFFER_SIZE),
        }
    }

    /// Run periods until `frames` output frames are pending or input runs dry
    fn fill(&mut self, frames: usize) {
        while self.pending.len() < frames && self.capture.slots() >= self.chunk_size {
            for sample in self.input.iter_mut() {
                *sample = self.capture.pop().unwrap_or(S::SILENCE);
            }
            (self.callback)(&self.input, &mut self.output);
            self.pending.extend(self.output.iter().copied());
        }
    }

    /// Write mono frames to an interleaved device buffer
    fn write(&mut self, data: &mut [S], channels: usize) {
        let frames = data.len() / channels.max(1);
        self.fill(frames);
        for frame in data.chunks_mut(channels.max(1)) {
            let sample = self.pending.pop_front().unwrap_or(S::SILENCE);
            frame.fill(sample);
        }
    }
}

/// Build the input stream pushing the first channel into the capture ring
fn build_input_stream<S: Sample>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut producer: rtrb::Producer<S>,
    failed: Arc<AtomicBool>,
) -> AudioResult<Stream> {
    let channels = config.channels.max(1) as usize;
    device
        .build_input_stream(
            config,
            move |data: &[S], _info: &cpal::InputCallbackInfo| {
                for frame in data.chunks(channels) {
                    // Full ring: the output side stalled, drop the rest
                    if producer.push(frame[0]).is_err() {
                        break;
                    }
                }
            },
            move |err| {
                log::error!("Input audio stream error: {}", err);
                failed.store(true, Ordering::Relaxed);
            },
            None,
        )
        .map_err(|e| AudioError::StreamBuildError(e.to_string()))
}

/// Build the output stream that drives the period callback
fn build_output_stream<S, F>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut state: DuplexState<S, F>,
    failed: Arc<AtomicBool>,
) -> AudioResult<Stream>
where
    S: Sample,
    F: FnMut(&[S], &mut [S]) + Send + 'static,
{
    let channels = config.channels.max(1) as usize;
    device
        .build_output_stream(
            config,
            move |data: &mut [S], _info: &cpal::OutputCallbackInfo| {
                state.write(data, channels);
            },
            move |err| {
                log::error!("Output audio stream error: {}", err);
                failed.store(true, Ordering::Relaxed);
            },
            None,
        )
        .map_err(|e| AudioError::StreamBuildError(e.to_string()))
}
