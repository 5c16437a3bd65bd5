//! Loop content built outside the engine lock
//!
//! Closing the master take, installing a generated loop and restoring a
//! session all need freshly allocated track content. Under the lock the
//! engine only fixes the loop length (`ClosedTake`) and later swaps the
//! prepared content in; copying and allocation happen on the control thread
//! in between, while the audio thread keeps processing periods.

use std::sync::Arc;

use crate::dsp::SignalProcessor;
use crate::session::SessionSnapshot;
use crate::types::{Chunk, Sample};

use super::error::{LooperError, LooperResult};
use super::looper::EngineSettings;
use super::track::{silent_chunks, LoopChunks, Track};

/// Flat capture buffer for the master take
///
/// Sized once for the longest allowed loop so the audio thread only copies.
/// Closing the take lends the buffer out; it comes back with the installed
/// loop.
pub(crate) struct MasterTake<S> {
    buffer: Vec<S>,
    chunk_size: usize,
    max_chunks: usize,
    chunks: usize,
}

impl<S: Sample> MasterTake<S> {
    pub(crate) fn new(chunk_size: usize, max_chunks: usize) -> Self {
        Self {
            buffer: vec![S::SILENCE; chunk_size * max_chunks],
            chunk_size,
            max_chunks,
            chunks: 0,
        }
    }

    /// Chunks captured so far
    pub(crate) fn chunks(&self) -> usize {
        self.chunks
    }

    pub(crate) fn capacity(&self) -> usize {
        self.max_chunks
    }

    #[inline]
    pub(crate) fn push(&mut self, chunk: &[S]) {
        let start = self.chunks * self.chunk_size;
        if let Some(dst) = self.buffer.get_mut(start..start + self.chunk_size) {
            dst.copy_from_slice(chunk);
            self.chunks += 1;
        }
    }

    /// Hand out the captured samples and the number of chunks they hold
    pub(crate) fn close(&mut self) -> (Vec<S>, usize) {
        let chunks = std::mem::replace(&mut self.chunks, 0);
        (std::mem::take(&mut self.buffer), chunks)
    }

    /// Take a lent buffer back; returns it if a new one was allocated
    /// meanwhile
    pub(crate) fn restore_buffer(&mut self, buffer: Vec<S>) -> Option<Vec<S>> {
        if self.buffer.is_empty() && buffer.len() == self.chunk_size * self.max_chunks {
            self.buffer = buffer;
            None
        } else {
            Some(buffer)
        }
    }

    /// Allocate a buffer if the current one is still lent out
    pub(crate) fn ensure_buffer(&mut self) {
        if self.buffer.is_empty() {
            self.buffer = vec![S::SILENCE; self.chunk_size * self.max_chunks];
        }
    }

    pub(crate) fn clear(&mut self) {
        self.chunks = 0;
    }
}

/// A master take whose length is already fixed in the engine
pub struct ClosedTake<S: Sample> {
    buffer: Vec<S>,
    chunks: usize,
    tracks_num: usize,
    dsp: Arc<SignalProcessor<S>>,
}

impl<S: Sample> ClosedTake<S> {
    pub(crate) fn new(buffer: Vec<S>, chunks: usize, tracks_num: usize, dsp: Arc<SignalProcessor<S>>) -> Self {
        Self {
            buffer,
            chunks,
            tracks_num,
            dsp,
        }
    }

    /// Loop length in chunks
    pub fn len(&self) -> usize {
        self.chunks
    }

    pub fn is_empty(&self) -> bool {
        self.chunks == 0
    }

    /// Split the take into chunks, remove its DC bias and build silent
    /// content for every other track
    pub fn prepare(self) -> PreparedLoop<S> {
        let chunk_size = self.dsp.chunk_size();
        let recorded = self.buffer.get(..self.chunks * chunk_size).unwrap_or(&[]);
        let mut chunks: Vec<Chunk<S>> = recorded.chunks_exact(chunk_size).map(Chunk::from_slice).collect();

        let bias = self.dsp.calculate_baseline_bias(&chunks);
        self.dsp.move_by_offset(&mut chunks, -bias);
        let loudness = self.dsp.compute_loudness(&chunks);

        PreparedLoop::build(chunks, bias, loudness, self.tracks_num, &self.dsp, Some(self.buffer))
    }
}

/// Master content plus silent content for the other tracks, ready to swap in
pub struct PreparedLoop<S> {
    pub(crate) master: LoopChunks<S>,
    pub(crate) silent: Vec<LoopChunks<S>>,
    /// DC offset removed from the take, in native units
    pub(crate) bias: f64,
    pub(crate) loudness: f64,
    pub(crate) buffer: Option<Vec<S>>,
}

impl<S: Sample> PreparedLoop<S> {
    fn build(
        mut chunks: Vec<Chunk<S>>,
        bias: f64,
        loudness: f64,
        tracks_num: usize,
        dsp: &SignalProcessor<S>,
        buffer: Option<Vec<S>>,
    ) -> Self {
        let length = chunks.len();
        if let Some(first) = chunks.first_mut() {
            dsp.fade_in(first);
        }
        if let Some(last) = chunks.last_mut() {
            dsp.fade_out(last);
        }
        Self {
            master: chunks.into_iter().map(Arc::new).collect(),
            silent: (1..tracks_num).map(|_| silent_chunks(dsp.chunk_size(), length)).collect(),
            bias,
            loudness,
            buffer,
        }
    }

    /// Generated loop (metronome) with no bias correction
    ///
    /// Rejects empty content, chunks of the wrong size and loops longer than
    /// the engine's maximum loop length.
    pub fn generated(
        chunks: Vec<Chunk<S>>,
        settings: &EngineSettings,
        dsp: &SignalProcessor<S>,
    ) -> LooperResult<Self> {
        if chunks.is_empty() {
            return Err(LooperError::InvalidLoop("no chunks".to_string()));
        }
        if chunks.len() > settings.max_loop_chunks {
            return Err(LooperError::InvalidLoop(format!(
                "{} chunks, the maximum loop length is {}",
                chunks.len(),
                settings.max_loop_chunks
            )));
        }
        if let Some(bad) = chunks.iter().find(|c| c.len() != settings.chunk_size) {
            return Err(LooperError::InvalidLoop(format!(
                "chunk of {} samples, expected {}",
                bad.len(),
                settings.chunk_size
            )));
        }
        let loudness = dsp.compute_loudness(&chunks);
        Ok(Self::build(chunks, 0.0, loudness, settings.tracks_num, dsp, None))
    }

    /// Loop length in chunks
    pub fn len(&self) -> usize {
        self.master.len()
    }

    pub fn is_empty(&self) -> bool {
        self.master.is_empty()
    }
}

/// Validated session content, rebuilt as stopped tracks
pub struct PreparedSession<S: Sample> {
    pub(crate) tracks: Vec<Track<S>>,
    pub(crate) loop_length: usize,
    pub(crate) input_volume: f64,
    pub(crate) output_volume: f64,
}

impl<S: Sample> PreparedSession<S> {
    pub fn new(
        snapshot: SessionSnapshot<S>,
        settings: &EngineSettings,
        dsp: &Arc<SignalProcessor<S>>,
    ) -> LooperResult<Self> {
        let invalid = |msg: String| Err(LooperError::InvalidSession(msg));
        if snapshot.sample_format != <S as Sample>::FORMAT {
            return invalid(format!(
                "saved as {}, engine runs {}",
                snapshot.sample_format,
                <S as Sample>::FORMAT
            ));
        }
        if snapshot.chunk_size != settings.chunk_size {
            return invalid(format!(
                "chunk size {} doesn't match {}",
                snapshot.chunk_size, settings.chunk_size
            ));
        }
        if snapshot.loop_length == 0 || snapshot.tracks.is_empty() {
            return invalid("session has no loop".to_string());
        }
        for track in &snapshot.tracks {
            if track.chunks.len() != snapshot.loop_length
                || track.chunks.iter().any(|c| c.len() != snapshot.chunk_size)
            {
                return invalid(format!("track '{}' doesn't match the loop length", track.name));
            }
        }

        let gpio = settings.tracks_gpio_num;
        let tracks = snapshot
            .tracks
            .into_iter()
            .enumerate()
            .map(|(index, track)| Track::from_snapshot(index, index < gpio, track, dsp.clone()))
            .collect();
        Ok(Self {
            tracks,
            loop_length: snapshot.loop_length,
            input_volume: snapshot.input_volume,
            output_volume: snapshot.output_volume,
        })
    }
}

/// Content swapped out of the engine
///
/// Holding it keeps the memory alive; callers drop it after releasing the
/// engine lock.
pub struct Retired<S: Sample> {
    content: Vec<LoopChunks<S>>,
    tracks: Vec<Track<S>>,
    buffer: Option<Vec<S>>,
}

impl<S: Sample> Retired<S> {
    pub(crate) fn new() -> Self {
        Self {
            content: Vec::new(),
            tracks: Vec::new(),
            buffer: None,
        }
    }

    pub(crate) fn tracks(tracks: Vec<Track<S>>) -> Self {
        Self { tracks, ..Self::new() }
    }

    pub(crate) fn push_content(&mut self, content: LoopChunks<S>) {
        if !content.is_empty() {
            self.content.push(content);
        }
    }

    pub(crate) fn set_buffer(&mut self, buffer: Option<Vec<S>>) {
        if buffer.is_some() {
            self.buffer = buffer;
        }
    }

    pub(crate) fn absorb(&mut self, other: Retired<S>) {
        self.content.extend(other.content);
        self.tracks.extend(other.tracks);
        self.set_buffer(other.buffer);
    }

    /// Whether nothing was swapped out
    pub fn is_empty(&self) -> bool {
        self.content.is_empty() && self.tracks.is_empty() && self.buffer.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHUNK: usize = 4;

    fn settings() -> EngineSettings {
        let mut settings = EngineSettings::new(CHUNK, 400);
        settings.tracks_num = 3;
        settings.max_loop_chunks = 8;
        settings
    }

    fn dsp() -> Arc<SignalProcessor<i16>> {
        Arc::new(SignalProcessor::new(CHUNK, 400))
    }

    #[test]
    fn test_master_take_lends_buffer() {
        let mut take = MasterTake::<i16>::new(CHUNK, 3);
        take.push(&[1, 2, 3, 4]);
        take.push(&[5, 6, 7, 8]);
        let (buffer, chunks) = take.close();
        assert_eq!(chunks, 2);
        assert_eq!(&buffer[..8], &[1, 2, 3, 4, 5, 6, 7, 8]);

        // Without a buffer nothing is captured
        take.push(&[1, 1, 1, 1]);
        assert_eq!(take.chunks(), 0);

        assert!(take.restore_buffer(buffer).is_none());
        take.push(&[1, 1, 1, 1]);
        assert_eq!(take.chunks(), 1);
    }

    #[test]
    fn test_restore_buffer_after_reallocation() {
        let mut take = MasterTake::<i16>::new(CHUNK, 3);
        let (buffer, _) = take.close();
        take.ensure_buffer();
        assert_eq!(take.restore_buffer(buffer).map(|b| b.len()), Some(CHUNK * 3));
    }

    #[test]
    fn test_prepare_removes_bias_and_fades() {
        let buffer: Vec<i16> = (0..3 * CHUNK).map(|i| if i % 2 == 0 { 1100 } else { -900 }).collect();
        let take = ClosedTake::new(buffer, 3, 3, dsp());
        let prepared = take.prepare();

        assert_eq!(prepared.len(), 3);
        assert_eq!(prepared.bias, 100.0);
        assert_eq!(prepared.master[1].as_slice(), &[1000, -1000, 1000, -1000]);
        assert_eq!(prepared.master[0][0], 0);
        assert_eq!(prepared.master[2][CHUNK - 1], 0);
        assert_eq!(prepared.silent.len(), 2);
        assert!(prepared.silent.iter().all(|c| c.len() == 3));
        assert!(prepared.buffer.is_some());
    }

    #[test]
    fn test_generated_loop_limits() {
        let settings = settings();
        let dsp = dsp();
        let chunk = || Chunk::from(vec![10i16; CHUNK]);

        assert!(PreparedLoop::generated(Vec::new(), &settings, &dsp).is_err());
        assert!(PreparedLoop::generated(vec![Chunk::silence(CHUNK + 1)], &settings, &dsp).is_err());
        assert!(matches!(
            PreparedLoop::generated(vec![chunk(); 9], &settings, &dsp),
            Err(LooperError::InvalidLoop(_))
        ));

        let prepared = PreparedLoop::generated(vec![chunk(); 8], &settings, &dsp).unwrap();
        assert_eq!(prepared.len(), 8);
        assert_eq!(prepared.bias, 0.0);
        assert!(prepared.buffer.is_none());
    }

    #[test]
    fn test_retired_collects_swapped_content() {
        let mut retired = Retired::<i16>::new();
        assert!(retired.is_empty());
        retired.push_content(Vec::new());
        assert!(retired.is_empty());
        retired.push_content(silent_chunks(CHUNK, 2));
        retired.absorb(Retired::new());
        assert!(!retired.is_empty());
    }
}
