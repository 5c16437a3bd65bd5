//! Loop engine state machine
//!
//! `Looper` owns the phase, the ordered tracks, the shared loop position and
//! the input/output controls. It has no locking of its own: `LooperHandle`
//! wraps it in the engine lock and exposes it to the audio and control
//! threads.
//!
//! ```text
//!            toggle_record(0)           toggle_record(0)
//!   Void ───────────────────▶ RecordingMaster ──────────────▶ Loop
//!    ▲                                                         │
//!    └──────── every track empty (reset_track, remove_track) ◀──┘
//! ```
//!
//! Closing the master take is split in two for the handle: `press_record`
//! fixes the loop length and returns the `ClosedTake`, and `install_loop`
//! swaps in the content prepared from it outside the lock. The loop
//! position runs from the moment of the press in between.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::dsp::SignalProcessor;
use crate::session::SessionSnapshot;
use crate::types::{Chunk, Sample, DEFAULT_CHUNK_SIZE, DEFAULT_SAMPLE_RATE};

use super::atomics::{LooperAtomics, STATUS_TRACKS};
use super::error::{LooperError, LooperResult};
use super::prepare::{ClosedTake, MasterTake, PreparedLoop, PreparedSession, Retired};
use super::track::{shift_loop_position, Track};
use super::OutputSink;

/// Engine phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum LoopPhase {
    /// No loop yet, input passes through to the output
    #[default]
    Void = 0,
    /// Track 0 captures the chunks that fix the loop length
    RecordingMaster = 1,
    /// Loop length is fixed, tracks play and overdub against it
    Loop = 2,
}

impl LoopPhase {
    pub fn from_u8(value: u8) -> Self {
        match value {
            1 => LoopPhase::RecordingMaster,
            2 => LoopPhase::Loop,
            _ => LoopPhase::Void,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            LoopPhase::Void => "void",
            LoopPhase::RecordingMaster => "recording master",
            LoopPhase::Loop => "loop",
        }
    }
}

/// Static engine parameters
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub chunk_size: usize,
    pub sampling_rate: u32,
    /// Tracks created by `reset()`
    pub tracks_num: usize,
    /// The first `tracks_gpio_num` tracks are hardware-controllable
    pub tracks_gpio_num: usize,
    /// Master recording stops growing after this many chunks
    pub max_loop_chunks: usize,
    /// Initial input gain (dB)
    pub input_volume: f64,
    /// Initial output gain (dB)
    pub output_volume: f64,
}

impl EngineSettings {
    /// Settings for the given period layout with default track setup
    pub fn new(chunk_size: usize, sampling_rate: u32) -> Self {
        let mut settings = Self {
            chunk_size,
            sampling_rate,
            tracks_num: 8,
            tracks_gpio_num: 3,
            max_loop_chunks: 0,
            input_volume: 0.0,
            output_volume: 0.0,
        };
        settings.set_max_loop_duration(120.0);
        settings
    }

    /// Convert a maximum loop duration in seconds into a chunk count
    pub fn set_max_loop_duration(&mut self, seconds: f64) {
        let chunk_length_s = self.chunk_size as f64 / self.sampling_rate as f64;
        self.max_loop_chunks = (seconds / chunk_length_s).ceil().max(1.0) as usize;
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE, DEFAULT_SAMPLE_RATE)
    }
}

/// Multi-track loop engine
pub struct Looper<S: Sample> {
    settings: EngineSettings,
    dsp: Arc<SignalProcessor<S>>,
    phase: LoopPhase,
    current_position: usize,
    loop_length: usize,
    master: MasterTake<S>,
    /// Loop length fixed by a closed take whose content isn't installed yet
    awaiting_master: bool,
    tracks: Vec<Track<S>>,
    main_track: usize,
    input_volume: f64,
    output_volume: f64,
    input_muted: bool,
    output_muted: bool,
    /// DC correction added to the input, as a fraction of full scale
    baseline_bias: f64,
    /// Conditioned input of the current period
    input_buffer: Chunk<S>,
    sink: Option<Box<dyn OutputSink<S>>>,
}

impl<S: Sample> Looper<S> {
    pub fn new(mut settings: EngineSettings) -> Self {
        settings.tracks_num = settings.tracks_num.max(1);
        let dsp = Arc::new(SignalProcessor::new(settings.chunk_size, settings.sampling_rate));
        let mut looper = Self {
            master: MasterTake::new(settings.chunk_size, settings.max_loop_chunks),
            awaiting_master: false,
            input_buffer: Chunk::silence(settings.chunk_size),
            input_volume: settings.input_volume,
            output_volume: settings.output_volume,
            settings,
            dsp,
            phase: LoopPhase::Void,
            current_position: 0,
            loop_length: 0,
            tracks: Vec::new(),
            main_track: 0,
            input_muted: false,
            output_muted: false,
            baseline_bias: 0.0,
            sink: None,
        };
        drop(looper.reset());
        looper
    }

    /// Attach the sink that receives every final output chunk
    pub fn attach_sink(&mut self, sink: Box<dyn OutputSink<S>>) {
        self.sink = Some(sink);
    }

    pub fn detach_sink(&mut self) -> Option<Box<dyn OutputSink<S>>> {
        self.sink.take()
    }

    // ─────────────────────────────────────────────────────────────
    // Per-period processing
    // ─────────────────────────────────────────────────────────────

    /// Process one period: condition the input, record/mix by phase, apply
    /// the output controls and forward the result to the sink
    ///
    /// Never allocates, logs or blocks. Buffers of the wrong length produce
    /// silence.
    pub fn process(&mut self, input: &[S], output: &mut [S]) {
        let chunk_size = self.settings.chunk_size;
        if input.len() != chunk_size || output.len() != chunk_size {
            output.fill(S::SILENCE);
            return;
        }

        if self.input_muted {
            self.input_buffer.fill_silence();
        } else {
            self.input_buffer.copy_from(input);
            self.dsp.add_offset(&mut self.input_buffer, self.baseline_bias * self.dsp.full_scale());
            self.dsp.amplify_in_place(&mut self.input_buffer, self.input_volume);
        }

        output.copy_from_slice(&self.input_buffer);
        match self.phase {
            LoopPhase::Void => {}
            LoopPhase::RecordingMaster => self.master.push(&self.input_buffer),
            LoopPhase::Loop => {
                let position = self.current_position;
                for track in self.tracks.iter().filter(|t| t.is_playing()) {
                    track.add_playback_into(position, output);
                }
                if let Some(track) = self.tracks.iter_mut().find(|t| t.is_recording()) {
                    track.overdub(&self.input_buffer, position);
                }
                self.current_position = shift_loop_position(position, 1, self.loop_length);
            }
        }

        if self.output_muted {
            output.fill(S::SILENCE);
        } else {
            self.dsp.amplify_in_place(output, self.output_volume);
        }

        if let Some(sink) = self.sink.as_mut() {
            sink.transmit(output);
        }
    }

    // ─────────────────────────────────────────────────────────────
    // Recording control
    // ─────────────────────────────────────────────────────────────

    fn check_track(&self, track_id: usize) -> LooperResult<()> {
        if track_id < self.tracks.len() {
            Ok(())
        } else {
            Err(LooperError::TrackNotFound { track_id, tracks_num: self.tracks.len() })
        }
    }

    /// Record button of a track
    ///
    /// Before the loop exists only track 0 is accepted: the first press
    /// starts the master take, the second one closes it. In Loop phase any
    /// track (track 0 included) toggles an overdub.
    pub fn toggle_record(&mut self, track_id: usize) -> LooperResult<()> {
        if let Some(take) = self.press_record(track_id)? {
            self.install_loop(take.prepare())?;
        }
        Ok(())
    }

    /// Record button without the master install step
    ///
    /// Closing the master take returns it; the caller prepares it and hands
    /// the result to `install_loop`.
    pub fn press_record(&mut self, track_id: usize) -> LooperResult<Option<ClosedTake<S>>> {
        self.check_track(track_id)?;
        match self.phase {
            LoopPhase::Void if track_id == 0 => {
                self.start_recording_master();
                Ok(None)
            }
            LoopPhase::RecordingMaster if track_id == 0 => self.close_master_take().map(Some),
            LoopPhase::Void | LoopPhase::RecordingMaster => {
                Err(LooperError::MasterTrackRequired { track_id })
            }
            LoopPhase::Loop => {
                if self.tracks[track_id].is_recording() {
                    self.stop_recording(track_id)?;
                } else {
                    self.start_recording(track_id)?;
                }
                Ok(None)
            }
        }
    }

    fn start_recording_master(&mut self) {
        self.master.ensure_buffer();
        self.master.clear();
        self.current_position = 0;
        self.phase = LoopPhase::RecordingMaster;
        log::info!("Recording master loop");
    }

    /// Fix the loop length at the captured chunks and enter Loop phase
    ///
    /// Tracks stay silent until the prepared content is installed.
    fn close_master_take(&mut self) -> LooperResult<ClosedTake<S>> {
        if self.master.chunks() == 0 {
            drop(self.reset());
            return Err(LooperError::EmptyMasterLoop);
        }
        let (buffer, chunks) = self.master.close();
        self.loop_length = chunks;
        self.current_position = 0;
        self.phase = LoopPhase::Loop;
        self.awaiting_master = true;
        Ok(ClosedTake::new(buffer, chunks, self.tracks.len(), self.dsp.clone()))
    }

    /// Swap prepared content in: the master on track 0, silence elsewhere
    ///
    /// Only valid right after `press_record` closed a take of the same
    /// length (or from `install_generated`). The loop position isn't touched.
    pub fn install_loop(&mut self, prepared: PreparedLoop<S>) -> LooperResult<Retired<S>> {
        let PreparedLoop { master, silent, bias, loudness, buffer } = prepared;
        let mut retired = Retired::new();
        if let Some(buffer) = buffer {
            retired.set_buffer(self.master.restore_buffer(buffer));
        }
        if !self.awaiting_master || self.phase != LoopPhase::Loop || master.len() != self.loop_length {
            return Err(LooperError::MasterSuperseded);
        }

        let length = master.len();
        let mut silent = silent.into_iter();
        if let Some((first, others)) = self.tracks.split_first_mut() {
            retired.push_content(first.set_content(master));
            first.set_playing(true);
            for track in others {
                // Added while the take was being prepared
                if track.is_empty() && track.len() == length {
                    continue;
                }
                match silent.next() {
                    Some(chunks) => retired.push_content(track.set_empty_content(chunks)),
                    None => track.set_empty(length),
                }
            }
        }
        silent.for_each(|chunks| retired.push_content(chunks));

        self.baseline_bias -= bias / self.dsp.full_scale();
        self.awaiting_master = false;
        if loudness > 0.0 {
            log::warn!("Master loop is clipping ({:.1} dBFS)", loudness);
        }
        log::info!(
            "Master loop installed: {} chunks ({:.2}s), {:.1} dBFS, bias correction {:.6}",
            length,
            self.loop_duration(),
            loudness,
            self.baseline_bias
        );
        Ok(retired)
    }

    /// Start an overdub; any other recording track is finished first
    pub fn start_recording(&mut self, track_id: usize) -> LooperResult<()> {
        self.check_track(track_id)?;
        if self.phase != LoopPhase::Loop || self.awaiting_master {
            return Err(LooperError::NotLooping { track_id });
        }
        for (index, track) in self.tracks.iter_mut().enumerate() {
            if index != track_id && track.is_recording() {
                track.finish_recording_tail();
            }
        }
        let position = self.current_position;
        self.tracks[track_id].start_recording(position);
        log::info!("Overdub on track {} from chunk {}", track_id, position);
        Ok(())
    }

    pub fn stop_recording(&mut self, track_id: usize) -> LooperResult<()> {
        self.check_track(track_id)?;
        self.tracks[track_id].stop_recording();
        log::info!("Overdub on track {} stopped", track_id);
        Ok(())
    }

    /// Install a generated loop (metronome) as the master
    ///
    /// Clears every track first. No bias correction is applied to generated
    /// content, and loops longer than `max_loop_chunks` are rejected.
    pub fn install_master(&mut self, chunks: Vec<Chunk<S>>) -> LooperResult<()> {
        let prepared = PreparedLoop::generated(chunks, &self.settings, &self.dsp)?;
        self.install_generated(prepared).map(drop)
    }

    /// Reset, then install a loop prepared by `PreparedLoop::generated`
    pub fn install_generated(&mut self, prepared: PreparedLoop<S>) -> LooperResult<Retired<S>> {
        if prepared.is_empty() || prepared.len() > self.settings.max_loop_chunks {
            return Err(LooperError::InvalidLoop(format!("{} chunks", prepared.len())));
        }
        let mut retired = self.reset();
        self.loop_length = prepared.len();
        self.current_position = 0;
        self.phase = LoopPhase::Loop;
        self.awaiting_master = true;
        retired.absorb(self.install_loop(prepared)?);
        Ok(retired)
    }

    /// Record button of the footswitch-bound track
    pub fn on_footswitch_press(&mut self) -> LooperResult<()> {
        self.toggle_record(self.main_track)
    }

    // ─────────────────────────────────────────────────────────────
    // Track management
    // ─────────────────────────────────────────────────────────────

    pub fn toggle_play(&mut self, track_id: usize) -> LooperResult<()> {
        self.check_track(track_id)?;
        if self.tracks[track_id].toggle_play() {
            Ok(())
        } else {
            Err(LooperError::PlaybackOnEmptyTrack { track_id })
        }
    }

    /// Clear one track; clearing the last non-empty track resets the engine
    pub fn reset_track(&mut self, track_id: usize) -> LooperResult<()> {
        self.check_track(track_id)?;
        self.tracks[track_id].clear();
        self.reset_if_silent();
        Ok(())
    }

    /// Back to Void once no track has content left
    ///
    /// During the master take every track is empty, so clearing a track
    /// cancels the take.
    fn reset_if_silent(&mut self) {
        if self.phase != LoopPhase::Void
            && !self.awaiting_master
            && self.tracks.iter().all(|t| t.is_empty())
        {
            drop(self.reset());
        }
    }

    /// Tear down to Void with a fresh set of silent tracks
    ///
    /// Returns the previous tracks.
    pub fn reset(&mut self) -> Retired<S> {
        let gpio = self.settings.tracks_gpio_num;
        let tracks = (0..self.settings.tracks_num)
            .map(|index| Track::new(index, index < gpio, self.dsp.clone()))
            .collect();
        let previous = std::mem::replace(&mut self.tracks, tracks);
        self.phase = LoopPhase::Void;
        self.current_position = 0;
        self.loop_length = 0;
        self.awaiting_master = false;
        self.master.clear();
        if self.main_track >= self.tracks.len() {
            self.main_track = 0;
        }
        log::info!("Looper reset ({} tracks)", self.tracks.len());
        Retired::tracks(previous)
    }

    /// Append a track, sized to the loop when looping; returns its index
    pub fn add_track(&mut self) -> usize {
        let index = self.tracks.len();
        let mut track = Track::new(index, index < self.settings.tracks_gpio_num, self.dsp.clone());
        if self.phase == LoopPhase::Loop {
            track.set_empty(self.loop_length);
        }
        self.tracks.push(track);
        self.settings.tracks_num = self.tracks.len();
        index
    }

    /// Remove a track and renumber the rest; the last track can't be removed
    pub fn remove_track(&mut self, track_id: usize) -> LooperResult<()> {
        self.check_track(track_id)?;
        if self.tracks.len() == 1 {
            return Err(LooperError::LastTrack);
        }
        self.tracks.remove(track_id);
        for (index, track) in self.tracks.iter_mut().enumerate() {
            track.set_index(index);
        }
        self.settings.tracks_num = self.tracks.len();
        if self.main_track > track_id {
            self.main_track -= 1;
        }
        self.main_track = self.main_track.min(self.tracks.len() - 1);
        if self.phase == LoopPhase::Loop {
            self.reset_if_silent();
        }
        Ok(())
    }

    pub fn set_main_track(&mut self, track_id: usize) -> LooperResult<()> {
        self.check_track(track_id)?;
        self.main_track = track_id;
        Ok(())
    }

    /// Bind the footswitch to the next track (wrapping); returns it
    pub fn cycle_main_track(&mut self) -> usize {
        self.main_track = (self.main_track + 1) % self.tracks.len();
        self.main_track
    }

    pub fn set_track_volume(&mut self, track_id: usize, volume_db: f64) -> LooperResult<()> {
        self.check_track(track_id)?;
        self.tracks[track_id].set_volume(volume_db);
        Ok(())
    }

    pub fn track_loudness(&self, track_id: usize) -> LooperResult<f64> {
        self.check_track(track_id)?;
        Ok(self.tracks[track_id].compute_loudness())
    }

    // ─────────────────────────────────────────────────────────────
    // Input / output controls
    // ─────────────────────────────────────────────────────────────

    pub fn set_input_volume(&mut self, volume_db: f64) {
        self.input_volume = volume_db;
    }

    pub fn set_output_volume(&mut self, volume_db: f64) {
        self.output_volume = volume_db;
    }

    /// Returns the new mute state
    pub fn toggle_input_mute(&mut self) -> bool {
        self.input_muted = !self.input_muted;
        self.input_muted
    }

    /// Returns the new mute state
    pub fn toggle_output_mute(&mut self) -> bool {
        self.output_muted = !self.output_muted;
        self.output_muted
    }

    /// DC correction as a fraction of full scale
    pub fn baseline_bias(&self) -> f64 {
        self.baseline_bias
    }

    pub fn set_baseline_bias(&mut self, bias: f64) {
        self.baseline_bias = bias;
    }

    // ─────────────────────────────────────────────────────────────
    // Sessions
    // ─────────────────────────────────────────────────────────────

    /// Loop content for saving; only a running loop can be saved
    ///
    /// Track chunks are shared with the snapshot, so this is cheap enough
    /// to run under the engine lock.
    pub fn snapshot_session(&self, name: &str) -> LooperResult<SessionSnapshot<S>> {
        if self.phase != LoopPhase::Loop || self.awaiting_master {
            return Err(LooperError::InvalidSession("no loop to save".to_string()));
        }
        Ok(SessionSnapshot {
            name: name.to_string(),
            sample_format: <S as Sample>::FORMAT,
            chunk_size: self.settings.chunk_size,
            sampling_rate: self.settings.sampling_rate,
            input_volume: self.input_volume,
            output_volume: self.output_volume,
            loop_length: self.loop_length,
            tracks: self.tracks.iter().map(|t| t.snapshot()).collect(),
        })
    }

    /// Replace the engine state with a saved loop (Loop phase, all stopped)
    pub fn restore_session(&mut self, snapshot: SessionSnapshot<S>) -> LooperResult<Retired<S>> {
        let prepared = PreparedSession::new(snapshot, &self.settings, &self.dsp)?;
        Ok(self.install_session(prepared))
    }

    /// Swap in validated session content; returns the previous tracks
    pub fn install_session(&mut self, prepared: PreparedSession<S>) -> Retired<S> {
        let previous = std::mem::replace(&mut self.tracks, prepared.tracks);
        self.settings.tracks_num = self.tracks.len();
        self.input_volume = prepared.input_volume;
        self.output_volume = prepared.output_volume;
        self.loop_length = prepared.loop_length;
        self.current_position = 0;
        self.master.clear();
        self.awaiting_master = false;
        self.phase = LoopPhase::Loop;
        self.main_track = self.main_track.min(self.tracks.len().saturating_sub(1));
        Retired::tracks(previous)
    }

    // ─────────────────────────────────────────────────────────────
    // Status
    // ─────────────────────────────────────────────────────────────

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn dsp(&self) -> &SignalProcessor<S> {
        &self.dsp
    }

    /// Shared signal processor, for content prepared outside the lock
    pub fn shared_dsp(&self) -> Arc<SignalProcessor<S>> {
        self.dsp.clone()
    }

    pub fn phase(&self) -> LoopPhase {
        self.phase
    }

    pub fn current_position(&self) -> usize {
        self.current_position
    }

    /// Loop length in chunks (0 before the master take is closed)
    pub fn loop_length(&self) -> usize {
        self.loop_length
    }

    /// Chunks captured by the running master take
    pub fn master_chunks(&self) -> usize {
        self.master.chunks()
    }

    /// Loop duration in seconds
    pub fn loop_duration(&self) -> f64 {
        self.loop_length as f64 * self.dsp.chunk_length_s()
    }

    /// Progress through the loop (or through the master take) in [0, 1)
    pub fn relative_progress(&self) -> f64 {
        match self.phase {
            LoopPhase::Void => 0.0,
            LoopPhase::RecordingMaster => {
                self.master.chunks() as f64 / self.master.capacity().max(1) as f64
            }
            LoopPhase::Loop => self.current_position as f64 / self.loop_length.max(1) as f64,
        }
    }

    pub fn tracks(&self) -> &[Track<S>] {
        &self.tracks
    }

    pub fn track(&self, track_id: usize) -> Option<&Track<S>> {
        self.tracks.get(track_id)
    }

    pub fn tracks_num(&self) -> usize {
        self.tracks.len()
    }

    /// Track 0 counts as recording during the master take
    pub fn is_recording(&self, track_id: usize) -> bool {
        if self.phase == LoopPhase::RecordingMaster && track_id == 0 {
            return true;
        }
        self.tracks.get(track_id).is_some_and(|t| t.is_recording())
    }

    pub fn main_track(&self) -> usize {
        self.main_track
    }

    pub fn input_volume(&self) -> f64 {
        self.input_volume
    }

    pub fn output_volume(&self) -> f64 {
        self.output_volume
    }

    pub fn is_input_muted(&self) -> bool {
        self.input_muted
    }

    pub fn is_output_muted(&self) -> bool {
        self.output_muted
    }

    /// Publish a status summary for lock-free readers
    pub fn publish(&self, atomics: &LooperAtomics) {
        let length = match self.phase {
            LoopPhase::RecordingMaster => self.master.chunks(),
            _ => self.loop_length,
        };
        let mut recording = 0u64;
        let mut playing = 0u64;
        for index in 0..self.tracks.len().min(STATUS_TRACKS) {
            if self.is_recording(index) {
                recording |= 1 << index;
            }
            if self.tracks[index].is_playing() {
                playing |= 1 << index;
            }
        }
        atomics.phase.store(self.phase as u8, Ordering::Relaxed);
        atomics.position.store(self.current_position, Ordering::Relaxed);
        atomics.loop_length.store(length, Ordering::Relaxed);
        atomics.tracks_num.store(self.tracks.len(), Ordering::Relaxed);
        atomics.main_track.store(self.main_track, Ordering::Relaxed);
        atomics.recording_mask.store(recording, Ordering::Relaxed);
        atomics.playing_mask.store(playing, Ordering::Relaxed);
        atomics.input_muted.store(self.input_muted, Ordering::Relaxed);
        atomics.output_muted.store(self.output_muted, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    const CHUNK: usize = 16;
    const RATE: u32 = 1600;

    fn settings() -> EngineSettings {
        let mut settings = EngineSettings::new(CHUNK, RATE);
        settings.tracks_num = 3;
        settings.tracks_gpio_num = 2;
        settings
    }

    fn looper() -> Looper<i16> {
        Looper::new(settings())
    }

    fn constant(value: i16) -> Vec<i16> {
        vec![value; CHUNK]
    }

    fn run(looper: &mut Looper<i16>, input: &[i16], periods: usize) -> Vec<i16> {
        let mut output = vec![0i16; CHUNK];
        for _ in 0..periods {
            looper.process(input, &mut output);
        }
        output
    }

    /// Alternating signal with zero mean, so bias correction leaves it as is
    fn zero_mean(amplitude: i16) -> Vec<i16> {
        (0..CHUNK).map(|i| if i % 2 == 0 { amplitude } else { -amplitude }).collect()
    }

    fn looping(length: usize) -> Looper<i16> {
        let mut looper = looper();
        looper.toggle_record(0).unwrap();
        run(&mut looper, &zero_mean(1000), length);
        looper.toggle_record(0).unwrap();
        looper
    }

    #[test]
    fn test_initial_state() {
        let looper = looper();
        assert_eq!(looper.phase(), LoopPhase::Void);
        assert_eq!(looper.tracks_num(), 3);
        assert!(looper.tracks()[1].has_gpio());
        assert!(!looper.tracks()[2].has_gpio());
        assert_eq!(looper.relative_progress(), 0.0);
    }

    #[test]
    fn test_void_passes_input_through() {
        let mut looper = looper();
        let output = run(&mut looper, &constant(300), 1);
        assert_eq!(output, constant(300));
    }

    #[test]
    fn test_master_recording_transitions() {
        let mut looper = looper();
        looper.toggle_record(0).unwrap();
        assert_eq!(looper.phase(), LoopPhase::RecordingMaster);
        assert!(looper.is_recording(0));

        let output = run(&mut looper, &zero_mean(1000), 5);
        assert_eq!(output, zero_mean(1000));
        assert_eq!(looper.master_chunks(), 5);

        looper.toggle_record(0).unwrap();
        assert_eq!(looper.phase(), LoopPhase::Loop);
        assert_eq!(looper.loop_length(), 5);
        assert_eq!(looper.current_position(), 0);
        assert!(looper.tracks()[0].is_playing());
        assert!(!looper.tracks()[0].is_empty());
        assert!(looper.tracks()[1].is_empty());
        assert_eq!(looper.tracks()[2].len(), 5);
    }

    #[test]
    fn test_non_master_track_rejected_before_loop() {
        let mut looper = looper();
        assert_eq!(
            looper.toggle_record(1),
            Err(LooperError::MasterTrackRequired { track_id: 1 })
        );
        assert_eq!(looper.phase(), LoopPhase::Void);

        looper.toggle_record(0).unwrap();
        assert!(looper.toggle_record(2).is_err());
        assert_eq!(looper.phase(), LoopPhase::RecordingMaster);
    }

    #[test]
    fn test_unknown_track_rejected() {
        let mut looper = looper();
        assert_eq!(
            looper.toggle_record(7),
            Err(LooperError::TrackNotFound { track_id: 7, tracks_num: 3 })
        );
    }

    #[test]
    fn test_empty_master_returns_to_void() {
        let mut looper = looper();
        looper.toggle_record(0).unwrap();
        assert_eq!(looper.toggle_record(0), Err(LooperError::EmptyMasterLoop));
        assert_eq!(looper.phase(), LoopPhase::Void);
    }

    #[test]
    fn test_master_capped_at_max_chunks() {
        let mut settings = settings();
        settings.max_loop_chunks = 4;
        let mut looper = Looper::<i16>::new(settings);
        looper.toggle_record(0).unwrap();
        run(&mut looper, &zero_mean(10), 10);
        assert_eq!(looper.master_chunks(), 4);
        looper.toggle_record(0).unwrap();
        assert_eq!(looper.loop_length(), 4);
    }

    #[test]
    fn test_loop_position_wraps() {
        let mut looper = looping(3);
        run(&mut looper, &constant(0), 4);
        assert_eq!(looper.current_position(), 1);
        assert!((looper.relative_progress() - 1.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_mixing_two_tracks_unity() {
        let mut looper = looping(2);
        let a: Vec<i16> = (0..CHUNK as i16).collect();
        let b: Vec<i16> = (0..CHUNK as i16).map(|i| 100 - i * 3).collect();
        looper.tracks[0].set_track(vec![Chunk::from(a.clone()); 2], false);
        looper.tracks[1].set_track(vec![Chunk::from(b.clone()); 2], false);
        looper.tracks[1].set_playing(true);
        looper.toggle_input_mute();

        let output = run(&mut looper, &constant(5000), 1);
        let expected: Vec<i16> = a.iter().zip(&b).map(|(x, y)| x + y).collect();
        assert_eq!(output, expected);
    }

    #[test]
    fn test_overdub_cycle_makes_track_playable() {
        let mut looper = looping(4);
        looper.toggle_record(1).unwrap();
        assert!(looper.is_recording(1));
        run(&mut looper, &zero_mean(200), 4);
        let track = &looper.tracks()[1];
        assert!(track.is_playing());
        assert!(!track.is_empty());
        looper.toggle_record(1).unwrap();
        assert!(!looper.is_recording(1));
    }

    #[test]
    fn test_single_recording_track() {
        let mut looper = looping(4);
        looper.toggle_record(1).unwrap();
        run(&mut looper, &zero_mean(200), 1);
        looper.toggle_record(2).unwrap();
        assert!(!looper.is_recording(1));
        assert!(looper.is_recording(2));
        // Taking over recording doesn't start playback of the interrupted track
        assert!(!looper.tracks()[1].is_playing());
    }

    #[test]
    fn test_master_track_overdubs_in_loop() {
        let mut looper = looping(2);
        looper.toggle_record(0).unwrap();
        assert!(looper.tracks()[0].is_recording());
        assert_eq!(looper.phase(), LoopPhase::Loop);
    }

    #[test]
    fn test_toggle_play_on_empty_track() {
        let mut looper = looping(2);
        assert_eq!(
            looper.toggle_play(1),
            Err(LooperError::PlaybackOnEmptyTrack { track_id: 1 })
        );
        looper.toggle_play(0).unwrap();
        assert!(!looper.tracks()[0].is_playing());
    }

    #[test]
    fn test_remove_track_rules() {
        let mut settings = settings();
        settings.tracks_num = 1;
        let mut single = Looper::<i16>::new(settings);
        assert_eq!(single.remove_track(0), Err(LooperError::LastTrack));
        assert_eq!(single.tracks_num(), 1);

        let mut looper = looper();
        looper.set_main_track(2).unwrap();
        looper.remove_track(1).unwrap();
        assert_eq!(looper.tracks_num(), 2);
        let indices: Vec<usize> = looper.tracks().iter().map(|t| t.index()).collect();
        assert_eq!(indices, vec![0, 1]);
        assert_eq!(looper.tracks()[1].name(), "Track 2");
        assert_eq!(looper.main_track(), 1);
    }

    #[test]
    fn test_remove_last_content_track_returns_to_void() {
        let mut looper = looping(4);
        looper.remove_track(0).unwrap();
        assert_eq!(looper.phase(), LoopPhase::Void);
        assert_eq!(looper.loop_length(), 0);
        assert_eq!(looper.tracks_num(), 2);

        // With content left on another track the loop keeps running
        let mut looper = looping(4);
        looper.toggle_record(1).unwrap();
        run(&mut looper, &zero_mean(200), 4);
        looper.remove_track(0).unwrap();
        assert_eq!(looper.phase(), LoopPhase::Loop);
        assert!(!looper.tracks()[0].is_empty());
    }

    #[test]
    fn test_remove_track_during_master_take_keeps_recording() {
        let mut looper = looper();
        looper.toggle_record(0).unwrap();
        looper.remove_track(2).unwrap();
        assert_eq!(looper.phase(), LoopPhase::RecordingMaster);
    }

    #[test]
    fn test_add_track_sized_to_loop() {
        let mut looper = looping(3);
        let index = looper.add_track();
        assert_eq!(index, 3);
        assert_eq!(looper.tracks()[3].len(), 3);
        assert_eq!(looper.settings().tracks_num, 4);
        looper.reset();
        assert_eq!(looper.tracks_num(), 4);
    }

    #[test]
    fn test_reset_last_track_returns_to_void() {
        let mut looper = looping(3);
        looper.reset_track(0).unwrap();
        assert_eq!(looper.phase(), LoopPhase::Void);
        assert_eq!(looper.loop_length(), 0);
    }

    #[test]
    fn test_reset_track_keeps_loop_with_content_left() {
        let mut looper = looping(3);
        looper.toggle_record(1).unwrap();
        run(&mut looper, &zero_mean(200), 3);
        looper.reset_track(0).unwrap();
        assert_eq!(looper.phase(), LoopPhase::Loop);
        assert!(looper.tracks()[0].is_empty());
    }

    #[test]
    fn test_footswitch_routes_to_main_track() {
        let mut looper = looper();
        looper.on_footswitch_press().unwrap();
        assert_eq!(looper.phase(), LoopPhase::RecordingMaster);
        assert_eq!(looper.cycle_main_track(), 1);
        assert!(looper.on_footswitch_press().is_err());
        assert_eq!(looper.cycle_main_track(), 2);
        assert_eq!(looper.cycle_main_track(), 0);
    }

    #[test]
    fn test_output_controls() {
        let mut looper = looper();
        looper.set_output_volume(-6.0);
        let output = run(&mut looper, &constant(1000), 1);
        assert!((output[0] - 501).abs() <= 1);

        looper.toggle_output_mute();
        let output = run(&mut looper, &constant(1000), 1);
        assert_eq!(output, constant(0));
    }

    #[test]
    fn test_master_bias_correction() {
        let mut looper = looper();
        let biased: Vec<i16> = zero_mean(1000).iter().map(|s| s + 100).collect();
        looper.toggle_record(0).unwrap();
        run(&mut looper, &biased, 4);
        looper.toggle_record(0).unwrap();

        assert!((looper.baseline_bias() + 100.0 / 32767.0).abs() < 1e-9);
        // Middle chunks are no longer offset
        assert_eq!(looper.tracks()[0].chunks()[1].as_slice(), zero_mean(1000).as_slice());
        // The corrected input is offset-free too
        looper.tracks[0].clear();
        let output = run(&mut looper, &constant(100), 1);
        assert_eq!(output, constant(0));
    }

    #[test]
    fn test_install_master() {
        let mut looper = looper();
        assert!(looper.install_master(Vec::new()).is_err());
        assert!(looper.install_master(vec![Chunk::silence(CHUNK + 1)]).is_err());

        looper.install_master(vec![Chunk::from(constant(10)); 6]).unwrap();
        assert_eq!(looper.phase(), LoopPhase::Loop);
        assert_eq!(looper.current_position(), 0);
        assert_eq!(looper.loop_length(), 6);
        assert!(looper.tracks()[0].is_playing());
        assert_eq!(looper.baseline_bias(), 0.0);
    }

    #[test]
    fn test_install_master_respects_max_loop_length() {
        let mut settings = settings();
        settings.max_loop_chunks = 4;
        let mut looper = Looper::<i16>::new(settings);
        assert!(matches!(
            looper.install_master(vec![Chunk::from(constant(10)); 50]),
            Err(LooperError::InvalidLoop(_))
        ));
        assert_eq!(looper.phase(), LoopPhase::Void);

        looper.install_master(vec![Chunk::from(constant(10)); 4]).unwrap();
        assert_eq!(looper.loop_length(), 4);
    }

    #[test]
    fn test_session_round_trip() {
        let mut looper = looping(3);
        looper.set_input_volume(-2.0);
        looper.set_track_volume(0, -4.0).unwrap();
        let snapshot = looper.snapshot_session("take").unwrap();

        let mut restored = Looper::<i16>::new(settings());
        restored.restore_session(snapshot).unwrap();
        assert_eq!(restored.phase(), LoopPhase::Loop);
        assert_eq!(restored.loop_length(), 3);
        assert_eq!(restored.input_volume(), -2.0);
        assert_eq!(restored.tracks()[0].volume(), -4.0);
        assert_eq!(restored.tracks()[0].chunks(), looper.tracks()[0].chunks());
        assert!(restored.tracks().iter().all(|t| !t.is_playing()));
    }

    #[test]
    fn test_restore_rejects_mismatched_session() {
        let looper = looping(3);
        let mut snapshot = looper.snapshot_session("take").unwrap();
        snapshot.tracks[1].chunks.pop();

        let mut target = self::looper();
        assert!(matches!(
            target.restore_session(snapshot),
            Err(LooperError::InvalidSession(_))
        ));
        assert_eq!(target.phase(), LoopPhase::Void);

        assert!(Looper::<i16>::new(settings()).snapshot_session("x").is_err());
    }

    struct CollectSink(Arc<Mutex<Vec<i16>>>);

    impl OutputSink<i16> for CollectSink {
        fn transmit(&mut self, chunk: &[i16]) {
            self.0.lock().unwrap().extend_from_slice(chunk);
        }
    }

    #[test]
    fn test_sink_receives_final_output() {
        let collected = Arc::new(Mutex::new(Vec::new()));
        let mut looper = looper();
        looper.attach_sink(Box::new(CollectSink(collected.clone())));
        looper.toggle_output_mute();
        run(&mut looper, &constant(700), 2);
        let samples = collected.lock().unwrap();
        assert_eq!(samples.len(), 2 * CHUNK);
        assert!(samples.iter().all(|&s| s == 0));
    }

    #[test]
    fn test_publish_status() {
        let atomics = LooperAtomics::new();
        let mut looper = looper();
        looper.toggle_record(0).unwrap();
        run(&mut looper, &zero_mean(10), 2);
        looper.publish(&atomics);
        assert_eq!(atomics.phase(), LoopPhase::RecordingMaster);
        assert_eq!(atomics.loop_length(), 2);
        assert!(atomics.is_recording(0));
    }
}
