//! Round-trip latency probe
//!
//! Plays silence for a few periods, then a single full-scale sine chunk, and
//! captures the input from the tone period onwards. The first captured
//! sample above half full scale marks the arrival of the tone. Wire the
//! output to the input (or hold a microphone to a speaker) while probing.

use rtrb::{Consumer, Producer, RingBuffer};

use crate::dsp::SignalProcessor;
use crate::types::{Chunk, Sample};

/// Default number of silent periods before the tone
pub const DEFAULT_ARMING_PERIODS: usize = 4;

/// Default number of captured periods
pub const DEFAULT_CAPTURE_PERIODS: usize = 10;

/// Measured round-trip latency
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencyReport {
    pub samples: usize,
    pub milliseconds: f64,
    /// Latency rounded up to whole periods
    pub chunks: usize,
}

impl LatencyReport {
    pub fn from_samples(samples: usize, chunk_size: usize, sampling_rate: u32) -> Self {
        Self {
            samples,
            milliseconds: 1000.0 * samples as f64 / sampling_rate as f64,
            chunks: samples.div_ceil(chunk_size.max(1)),
        }
    }
}

/// Audio-thread side of the probe; use `process` as the period callback
pub struct LatencyProbe<S> {
    tone: Chunk<S>,
    producer: Producer<S>,
    arming_periods: usize,
    capture_periods: usize,
    elapsed: usize,
}

/// Control-thread side of the probe, receiving the captured input
pub struct LatencyCapture<S> {
    consumer: Consumer<S>,
    expected: usize,
    chunk_size: usize,
    sampling_rate: u32,
}

impl<S: Sample> LatencyProbe<S> {
    pub fn new(
        dsp: &SignalProcessor<S>,
        arming_periods: usize,
        capture_periods: usize,
    ) -> (Self, LatencyCapture<S>) {
        let expected = capture_periods * dsp.chunk_size();
        let (producer, consumer) = RingBuffer::new(expected.max(1));
        let probe = Self {
            tone: dsp.sine(440.0, dsp.full_scale()),
            producer,
            arming_periods,
            capture_periods,
            elapsed: 0,
        };
        let capture = LatencyCapture {
            consumer,
            expected,
            chunk_size: dsp.chunk_size(),
            sampling_rate: dsp.sampling_rate(),
        };
        (probe, capture)
    }

    /// One period of the probe
    pub fn process(&mut self, input: &[S], output: &mut [S]) {
        let period = self.elapsed;
        self.elapsed = self.elapsed.saturating_add(1);

        if period == self.arming_periods && output.len() == self.tone.len() {
            output.copy_from_slice(&self.tone);
        } else {
            output.fill(S::SILENCE);
        }

        if period >= self.arming_periods && period < self.arming_periods + self.capture_periods {
            for &sample in input {
                if self.producer.push(sample).is_err() {
                    break;
                }
            }
        }
    }
}

impl<S: Sample> LatencyCapture<S> {
    /// Whether every capture period has been delivered
    pub fn is_complete(&self) -> bool {
        self.consumer.slots() >= self.expected
    }

    /// Drain the captured samples and locate the tone onset
    pub fn analyze(mut self) -> Option<LatencyReport> {
        let mut recorded = Vec::with_capacity(self.expected);
        while let Ok(sample) = self.consumer.pop() {
            recorded.push(sample);
        }
        let threshold = <S as Sample>::FORMAT.full_scale() / 2.0;
        find_onset(&recorded, threshold)
            .map(|samples| LatencyReport::from_samples(samples, self.chunk_size, self.sampling_rate))
    }
}

/// Index of the first sample whose magnitude exceeds `threshold`
pub fn find_onset<S: Sample>(recorded: &[S], threshold: f64) -> Option<usize> {
    recorded.iter().position(|s| s.to_f64().abs() > threshold)
}
