//! Lock-free engine status for UI and logging threads
//!
//! The audio thread publishes a summary of the engine after every period;
//! status pollers read it without touching the engine lock.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};

use super::looper::LoopPhase;

/// Track bitmasks cover this many tracks; higher indices read as idle
pub const STATUS_TRACKS: usize = 64;

/// Atomic engine state for lock-free reads
pub struct LooperAtomics {
    /// Loop phase: 0=Void, 1=RecordingMaster, 2=Loop
    pub phase: AtomicU8,
    /// Current loop position (chunk index)
    pub position: AtomicUsize,
    /// Loop length in chunks (recorded chunks while recording the master)
    pub loop_length: AtomicUsize,
    /// Number of tracks
    pub tracks_num: AtomicUsize,
    /// Track the footswitch is bound to
    pub main_track: AtomicUsize,
    /// Bit n set when track n is recording
    pub recording_mask: AtomicU64,
    /// Bit n set when track n is playing
    pub playing_mask: AtomicU64,
    pub input_muted: AtomicBool,
    pub output_muted: AtomicBool,
    /// Periods processed since start
    pub periods: AtomicU64,
    /// Periods replaced by silence after an engine fault
    pub faults: AtomicU64,
}

impl LooperAtomics {
    pub fn new() -> Self {
        Self {
            phase: AtomicU8::new(LoopPhase::Void as u8),
            position: AtomicUsize::new(0),
            loop_length: AtomicUsize::new(0),
            tracks_num: AtomicUsize::new(0),
            main_track: AtomicUsize::new(0),
            recording_mask: AtomicU64::new(0),
            playing_mask: AtomicU64::new(0),
            input_muted: AtomicBool::new(false),
            output_muted: AtomicBool::new(false),
            periods: AtomicU64::new(0),
            faults: AtomicU64::new(0),
        }
    }

    /// Current loop phase (lock-free)
    #[inline]
    pub fn phase(&self) -> LoopPhase {
        LoopPhase::from_u8(self.phase.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn position(&self) -> usize {
        self.position.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn loop_length(&self) -> usize {
        self.loop_length.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn tracks_num(&self) -> usize {
        self.tracks_num.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn main_track(&self) -> usize {
        self.main_track.load(Ordering::Relaxed)
    }

    /// Check if a track is recording (lock-free)
    #[inline]
    pub fn is_recording(&self, track_id: usize) -> bool {
        track_id < STATUS_TRACKS && self.recording_mask.load(Ordering::Relaxed) & (1 << track_id) != 0
    }

    /// Check if a track is playing (lock-free)
    #[inline]
    pub fn is_playing(&self, track_id: usize) -> bool {
        track_id < STATUS_TRACKS && self.playing_mask.load(Ordering::Relaxed) & (1 << track_id) != 0
    }

    #[inline]
    pub fn periods(&self) -> u64 {
        self.periods.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn faults(&self) -> u64 {
        self.faults.load(Ordering::Relaxed)
    }

    /// Count one period that was replaced by silence
    #[inline]
    pub fn record_fault(&self) {
        self.faults.fetch_add(1, Ordering::Relaxed);
    }
}

impl Default for LooperAtomics {
    fn default() -> Self {
        Self::new()
    }
}
