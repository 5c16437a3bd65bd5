//! Loop track - one layer of the loop
//!
//! A track holds exactly one chunk per loop position once the loop length is
//! known. Overdubs are mixed into the stored chunks in place; the most
//! recently written input chunk is kept aside so the tail of an overdub can
//! be faded out (remove the raw chunk, re-add it faded) when recording stops.
//!
//! Stored chunks are reference counted. A session snapshot shares them with
//! the track instead of copying, and a write to a chunk that a snapshot
//! still holds copies that one chunk first (`Arc::make_mut`).

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::dsp::SignalProcessor;
use crate::types::{Chunk, Sample, SILENCE_DBFS};

/// Map a loop position shifted by `shift` back into `0..loop_length`
///
/// Wraps in both directions, e.g. `(0, -1, 10)` → 9.
#[inline]
pub fn shift_loop_position(position: usize, shift: isize, loop_length: usize) -> usize {
    if loop_length == 0 {
        return 0;
    }
    (position as isize + shift).rem_euclid(loop_length as isize) as usize
}

/// Loop content: one shared chunk per loop position
pub type LoopChunks<S> = Vec<Arc<Chunk<S>>>;

/// `length` freshly allocated silent chunks
pub fn silent_chunks<S: Sample>(chunk_size: usize, length: usize) -> LoopChunks<S> {
    (0..length).map(|_| Arc::new(Chunk::silence(chunk_size))).collect()
}

fn default_name(index: usize) -> String {
    format!("Track {}", index + 1)
}

/// The input chunk most recently mixed into the loop
///
/// The buffer is allocated with the track content so overdubbing never
/// allocates on the audio thread.
#[derive(Debug, Clone)]
struct RecordedChunk<S> {
    index: Option<usize>,
    chunk: Chunk<S>,
}

impl<S: Sample> RecordedChunk<S> {
    fn new(chunk_size: usize) -> Self {
        Self { index: None, chunk: Chunk::silence(chunk_size) }
    }
}

/// Serializable content of a track, stored in session snapshots
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "S: Sample")]
pub struct TrackSnapshot<S> {
    pub name: String,
    pub volume: f64,
    pub empty: bool,
    pub chunks: LoopChunks<S>,
}

/// One layer of the loop
#[derive(Debug, Clone)]
pub struct Track<S> {
    index: usize,
    name: String,
    has_gpio: bool,
    recording: bool,
    playing: bool,
    empty: bool,
    /// Playback gain in dB
    volume: f64,
    loop_chunks: LoopChunks<S>,
    /// Position where the current overdub started
    recording_from: Option<usize>,
    last_recorded: RecordedChunk<S>,
    dsp: Arc<SignalProcessor<S>>,
}

impl<S: Sample> Track<S> {
    /// Create an empty track with no content (loop length unknown)
    pub fn new(index: usize, has_gpio: bool, dsp: Arc<SignalProcessor<S>>) -> Self {
        let chunk_size = dsp.chunk_size();
        Self {
            index,
            name: default_name(index),
            has_gpio,
            recording: false,
            playing: false,
            empty: true,
            volume: 0.0,
            loop_chunks: Vec::new(),
            recording_from: None,
            last_recorded: RecordedChunk::new(chunk_size),
            dsp,
        }
    }

    /// Rebuild a track from a session snapshot (stopped, not recording)
    pub fn from_snapshot(
        index: usize,
        has_gpio: bool,
        snapshot: TrackSnapshot<S>,
        dsp: Arc<SignalProcessor<S>>,
    ) -> Self {
        let mut track = Self::new(index, has_gpio, dsp);
        track.name = snapshot.name;
        track.volume = snapshot.volume;
        track.empty = snapshot.empty;
        track.loop_chunks = snapshot.chunks;
        track
    }

    /// Persistent part of the track; the chunks are shared, not copied
    pub fn snapshot(&self) -> TrackSnapshot<S> {
        TrackSnapshot {
            name: self.name.clone(),
            volume: self.volume,
            empty: self.empty,
            chunks: self.loop_chunks.clone(),
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Content
    // ─────────────────────────────────────────────────────────────

    /// Fill with `length` silent chunks and mark empty
    pub fn set_empty(&mut self, length: usize) {
        let chunks = silent_chunks(self.dsp.chunk_size(), length);
        self.set_empty_content(chunks);
    }

    /// Take pre-built silent chunks as content and mark empty
    ///
    /// Returns the previous content so the caller decides where it is freed.
    pub fn set_empty_content(&mut self, chunks: LoopChunks<S>) -> LoopChunks<S> {
        let previous = std::mem::replace(&mut self.loop_chunks, chunks);
        self.empty = true;
        self.recording = false;
        self.playing = false;
        self.recording_from = None;
        self.last_recorded.index = None;
        previous
    }

    /// Replace the content with the given chunks
    ///
    /// With `fade`, the first chunk is faded in and the last faded out so the
    /// loop seam doesn't click.
    pub fn set_track(&mut self, mut chunks: Vec<Chunk<S>>, fade: bool) {
        if fade {
            if let Some(first) = chunks.first_mut() {
                self.dsp.fade_in(first);
            }
            if let Some(last) = chunks.last_mut() {
                self.dsp.fade_out(last);
            }
        }
        self.set_content(chunks.into_iter().map(Arc::new).collect());
    }

    /// Take finished chunks as content; returns the previous content
    pub fn set_content(&mut self, chunks: LoopChunks<S>) -> LoopChunks<S> {
        let previous = std::mem::replace(&mut self.loop_chunks, chunks);
        self.empty = false;
        self.recording_from = None;
        self.last_recorded.index = None;
        previous
    }

    /// Clear content back to silence, keeping the loop length
    pub fn clear(&mut self) {
        for chunk in self.loop_chunks.iter_mut() {
            Arc::make_mut(chunk).fill_silence();
        }
        self.recording = false;
        self.playing = false;
        self.empty = true;
        self.recording_from = None;
        self.last_recorded.index = None;
    }

    // ─────────────────────────────────────────────────────────────
    // Recording
    // ─────────────────────────────────────────────────────────────

    /// Begin an overdub at `position`
    pub fn start_recording(&mut self, position: usize) {
        self.recording = true;
        self.recording_from = Some(position);
        self.last_recorded.index = None;
    }

    /// Mix one input chunk into the loop at `position`
    ///
    /// The chunk at the onset position is faded in. Once the overdub has
    /// covered the whole loop (reached the chunk before the onset), the
    /// track switches to playback automatically.
    pub fn overdub(&mut self, input: &[S], position: usize) {
        let length = self.loop_chunks.len();
        if !self.recording || position >= length || input.len() != self.last_recorded.chunk.len() {
            return;
        }

        self.last_recorded.chunk.copy_from(input);
        if self.recording_from == Some(position) {
            self.dsp.fade_in(&mut self.last_recorded.chunk);
        }
        let stored = Arc::make_mut(&mut self.loop_chunks[position]);
        self.dsp.mix_into(stored, &self.last_recorded.chunk);
        self.last_recorded.index = Some(position);
        self.empty = false;

        if let Some(from) = self.recording_from {
            if position == shift_loop_position(from, -1, length) {
                self.playing = true;
                self.recording_from = None;
            }
        }
    }

    /// Replace the last recorded chunk with its faded-out version
    fn fade_out_tail(&mut self) {
        let Some(index) = self.last_recorded.index.take() else {
            return;
        };
        if let Some(stored) = self.loop_chunks.get_mut(index) {
            let stored = Arc::make_mut(stored);
            self.dsp.unmix_from(stored, &self.last_recorded.chunk);
            self.dsp.fade_out(&mut self.last_recorded.chunk);
            self.dsp.mix_into(stored, &self.last_recorded.chunk);
        }
    }

    /// Stop the overdub, fade its tail and start playing
    pub fn stop_recording(&mut self) {
        self.fade_out_tail();
        self.recording = false;
        self.recording_from = None;
        self.playing = !self.empty;
    }

    /// Stop the overdub and fade its tail without touching playback
    ///
    /// Used when another track takes over recording.
    pub fn finish_recording_tail(&mut self) {
        self.fade_out_tail();
        self.recording = false;
        self.recording_from = None;
    }

    // ─────────────────────────────────────────────────────────────
    // Playback
    // ─────────────────────────────────────────────────────────────

    /// Flip playback; refused (returns `false`) for an empty track
    pub fn toggle_play(&mut self) -> bool {
        if self.empty {
            return false;
        }
        self.playing = !self.playing;
        true
    }

    pub fn set_playing(&mut self, playing: bool) {
        self.playing = playing && !self.empty;
    }

    /// Playback chunk at `position`, amplified by the track volume
    pub fn current_playback(&self, position: usize) -> Chunk<S> {
        match self.loop_chunks.get(position) {
            Some(chunk) => self.dsp.amplify(chunk, self.volume),
            None => self.dsp.silence(),
        }
    }

    /// Mix the playback chunk at `position` into `output` (no allocation)
    #[inline]
    pub fn add_playback_into(&self, position: usize, output: &mut [S]) {
        if let Some(chunk) = self.loop_chunks.get(position) {
            self.dsp.amplify_into(output, chunk, self.volume);
        }
    }

    /// Loudness of the track content in dBFS
    pub fn compute_loudness(&self) -> f64 {
        if self.empty {
            return SILENCE_DBFS;
        }
        self.dsp.compute_loudness(&self.loop_chunks)
    }

    // ─────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────

    pub fn index(&self) -> usize {
        self.index
    }

    /// Renumber the track; a default name follows the new index
    pub(crate) fn set_index(&mut self, index: usize) {
        if self.name == default_name(self.index) {
            self.name = default_name(index);
        }
        self.index = index;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn has_gpio(&self) -> bool {
        self.has_gpio
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn is_empty(&self) -> bool {
        self.empty
    }

    pub fn volume(&self) -> f64 {
        self.volume
    }

    pub fn set_volume(&mut self, volume_db: f64) {
        self.volume = volume_db;
    }

    pub fn recording_from(&self) -> Option<usize> {
        self.recording_from
    }

    /// Number of chunks (the loop length once known)
    pub fn len(&self) -> usize {
        self.loop_chunks.len()
    }

    pub fn chunks(&self) -> &[Arc<Chunk<S>>] {
        &self.loop_chunks
    }
}
