//! Shared engine handle
//!
//! The engine lives behind a single mutex. The audio thread takes it once
//! per period in `process_period`; control threads (command loop, session
//! manager, metronome) take it for each operation. After every mutation the
//! handle publishes a status summary into `LooperAtomics` so pollers never
//! need the lock.
//!
//! Operations that replace loop content (closing the master take, installing
//! a generated loop, restoring a session) build the new content between two
//! short lock sections, and the content they replace is freed after the
//! lock is released.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::session::SessionSnapshot;
use crate::types::{Chunk, Sample};

use super::atomics::LooperAtomics;
use super::error::LooperResult;
use super::looper::Looper;
use super::prepare::{ClosedTake, PreparedLoop, PreparedSession};

/// Thread-safe handle to the loop engine
#[derive(Clone)]
pub struct LooperHandle<S: Sample> {
    engine: Arc<Mutex<Looper<S>>>,
    atomics: Arc<LooperAtomics>,
}

impl<S: Sample> LooperHandle<S> {
    pub fn new(looper: Looper<S>) -> Self {
        let atomics = Arc::new(LooperAtomics::new());
        looper.publish(&atomics);
        Self {
            engine: Arc::new(Mutex::new(looper)),
            atomics,
        }
    }

    /// Take the engine lock, recovering it if a period panicked while
    /// holding it
    fn lock(&self) -> MutexGuard<'_, Looper<S>> {
        self.engine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run a mutation under the lock and publish the resulting status
    pub fn with<R>(&self, f: impl FnOnce(&mut Looper<S>) -> R) -> R {
        let mut looper = self.lock();
        let result = f(&mut looper);
        looper.publish(&self.atomics);
        result
    }

    /// Read engine state under the lock
    pub fn read<R>(&self, f: impl FnOnce(&Looper<S>) -> R) -> R {
        f(&self.lock())
    }

    /// Lock-free status
    pub fn atomics(&self) -> &Arc<LooperAtomics> {
        &self.atomics
    }

    // ─────────────────────────────────────────────────────────────
    // Realtime entry point
    // ─────────────────────────────────────────────────────────────

    /// Process one audio period
    ///
    /// A panic inside the engine never crosses this boundary: the period is
    /// replaced by silence and counted in `LooperAtomics::faults`.
    pub fn process_period(&self, input: &[S], output: &mut [S]) {
        let result = catch_unwind(AssertUnwindSafe(|| {
            let mut looper = self.lock();
            looper.process(input, output);
            looper.publish(&self.atomics);
        }));
        if result.is_err() {
            output.fill(S::SILENCE);
            self.atomics.record_fault();
        }
        self.atomics.periods.fetch_add(1, Ordering::Relaxed);
    }

    /// Period callback for an audio backend
    pub fn period_callback(&self) -> impl FnMut(&[S], &mut [S]) + Send + 'static {
        let handle = self.clone();
        move |input: &[S], output: &mut [S]| handle.process_period(input, output)
    }

    // ─────────────────────────────────────────────────────────────
    // Control operations
    // ─────────────────────────────────────────────────────────────

    /// Run a record press; a closed master take is prepared outside the
    /// lock and installed in a second lock section
    fn press(
        &self,
        press: impl FnOnce(&mut Looper<S>) -> LooperResult<Option<ClosedTake<S>>>,
    ) -> LooperResult<()> {
        let Some(take) = self.with(press)? else {
            return Ok(());
        };
        let prepared = take.prepare();
        let retired = self.with(|l| l.install_loop(prepared))?;
        drop(retired);
        Ok(())
    }

    pub fn toggle_record(&self, track_id: usize) -> LooperResult<()> {
        self.press(|l| l.press_record(track_id))
    }

    pub fn toggle_play(&self, track_id: usize) -> LooperResult<()> {
        self.with(|l| l.toggle_play(track_id))
    }

    pub fn reset_track(&self, track_id: usize) -> LooperResult<()> {
        self.with(|l| l.reset_track(track_id))
    }

    pub fn on_footswitch_press(&self) -> LooperResult<()> {
        self.press(|l| {
            let track_id = l.main_track();
            l.press_record(track_id)
        })
    }

    pub fn reset(&self) {
        drop(self.with(|l| l.reset()));
    }

    pub fn add_track(&self) -> usize {
        self.with(|l| l.add_track())
    }

    pub fn remove_track(&self, track_id: usize) -> LooperResult<()> {
        self.with(|l| l.remove_track(track_id))
    }

    /// Install a generated master loop, validated and prepared outside the
    /// lock
    pub fn install_master(&self, chunks: Vec<Chunk<S>>) -> LooperResult<()> {
        let (settings, dsp) = self.read(|l| (l.settings().clone(), l.shared_dsp()));
        let prepared = PreparedLoop::generated(chunks, &settings, &dsp)?;
        let retired = self.with(|l| l.install_generated(prepared))?;
        drop(retired);
        Ok(())
    }

    /// Snapshot for saving; shares the track chunks, encoding is up to the
    /// caller
    pub fn snapshot_session(&self, name: &str) -> LooperResult<SessionSnapshot<S>> {
        self.read(|l| l.snapshot_session(name))
    }

    pub fn restore_session(&self, snapshot: SessionSnapshot<S>) -> LooperResult<()> {
        let (settings, dsp) = self.read(|l| (l.settings().clone(), l.shared_dsp()));
        let prepared = PreparedSession::new(snapshot, &settings, &dsp)?;
        let retired = self.with(|l| l.install_session(prepared));
        drop(retired);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dsp::SignalProcessor;
    use crate::engine::{EngineSettings, LoopPhase, LooperError, OutputSink};

    struct PanickingSink;

    impl OutputSink<i16> for PanickingSink {
        fn transmit(&mut self, _chunk: &[i16]) {
            panic!("sink failure");
        }
    }

    fn small_handle() -> LooperHandle<i16> {
        let mut settings = EngineSettings::new(32, 8000);
        settings.tracks_num = 2;
        LooperHandle::new(Looper::new(settings))
    }

    #[test]
    fn test_end_to_end_master_and_overdub() {
        let settings = EngineSettings::new(1024, 48000);
        let chunk_length_s: f64 = 1024.0 / 48000.0;
        let handle = LooperHandle::<i16>::new(Looper::new(settings));
        let dsp = SignalProcessor::<i16>::new(1024, 48000);
        let input = dsp.sine(440.0, 8000.0);
        let mut output = vec![0i16; 1024];

        let master_periods = (2.0 / chunk_length_s).ceil() as usize;
        assert_eq!(master_periods, 94);

        handle.toggle_record(0).unwrap();
        for _ in 0..master_periods {
            handle.process_period(&input, &mut output);
        }
        handle.toggle_record(0).unwrap();

        let (phase, duration, length) = handle.read(|l| (l.phase(), l.loop_duration(), l.loop_length()));
        assert_eq!(phase, LoopPhase::Loop);
        assert_eq!(length, 94);
        assert!((duration - 2.0).abs() <= chunk_length_s);

        handle.toggle_record(1).unwrap();
        for _ in 0..length {
            handle.process_period(&input, &mut output);
        }
        handle.toggle_record(1).unwrap();

        let (playing, empty, recording) = handle.read(|l| {
            let track = &l.tracks()[1];
            (track.is_playing(), track.is_empty(), track.is_recording())
        });
        assert!(playing);
        assert!(!empty);
        assert!(!recording);
        assert!(handle.atomics().is_playing(1));
        assert_eq!(handle.atomics().periods(), 2 * 94);
    }

    #[test]
    fn test_status_published_after_control_ops() {
        let handle = small_handle();
        handle.toggle_record(0).unwrap();
        assert_eq!(handle.atomics().phase(), LoopPhase::RecordingMaster);
        assert!(handle.atomics().is_recording(0));

        assert!(handle.toggle_record(1).is_err());
        assert_eq!(handle.atomics().phase(), LoopPhase::RecordingMaster);

        handle.add_track();
        assert_eq!(handle.atomics().tracks_num(), 3);
    }

    #[test]
    fn test_panicking_period_outputs_silence() {
        let handle = small_handle();
        handle.with(|l| l.attach_sink(Box::new(PanickingSink)));

        let mut output = vec![1i16; 32];
        handle.process_period(&[500i16; 32], &mut output);
        assert!(output.iter().all(|&s| s == 0));
        assert_eq!(handle.atomics().faults(), 1);

        // The poisoned lock is recovered and the engine keeps working
        handle.with(|l| l.detach_sink());
        handle.process_period(&[500i16; 32], &mut output);
        assert_eq!(output, vec![500i16; 32]);
        assert_eq!(handle.atomics().faults(), 1);
    }

    #[test]
    fn test_master_close_keeps_time_while_preparing() {
        let handle = small_handle();
        let mut output = vec![0i16; 32];
        handle.toggle_record(0).unwrap();
        for _ in 0..4 {
            handle.process_period(&[100i16; 32], &mut output);
        }

        let take = handle.with(|l| l.press_record(0)).unwrap().unwrap();
        assert_eq!(take.len(), 4);
        assert_eq!(handle.atomics().phase(), LoopPhase::Loop);
        assert!(handle.with(|l| l.start_recording(1)).is_err());

        // Periods processed before the content arrives advance the loop
        handle.process_period(&[7i16; 32], &mut output);
        assert_eq!(output, vec![7i16; 32]);
        let prepared = take.prepare();
        let retired = handle.with(|l| l.install_loop(prepared)).unwrap();
        drop(retired);

        let (position, playing, length) = handle.read(|l| {
            (l.current_position(), l.tracks()[0].is_playing(), l.tracks()[1].len())
        });
        assert_eq!(position, 1);
        assert!(playing);
        assert_eq!(length, 4);
    }

    #[test]
    fn test_install_refused_after_reset() {
        let handle = small_handle();
        let mut output = vec![0i16; 32];
        handle.toggle_record(0).unwrap();
        handle.process_period(&[100i16; 32], &mut output);
        let take = handle.with(|l| l.press_record(0)).unwrap().unwrap();

        handle.reset();
        let result = handle.with(|l| l.install_loop(take.prepare()).map(drop));
        assert_eq!(result, Err(LooperError::MasterSuperseded));
        assert_eq!(handle.atomics().phase(), LoopPhase::Void);

        // The lent capture buffer came back: a new take records again
        handle.toggle_record(0).unwrap();
        handle.process_period(&[100i16; 32], &mut output);
        assert_eq!(handle.read(|l| l.master_chunks()), 1);
    }

    #[test]
    fn test_session_snapshot_shares_chunks() {
        let handle = small_handle();
        let mut output = vec![0i16; 32];
        handle.toggle_record(0).unwrap();
        for _ in 0..3 {
            handle.process_period(&[100i16; 32], &mut output);
        }
        handle.toggle_record(0).unwrap();

        let snapshot = handle.snapshot_session("take").unwrap();
        handle.read(|l| {
            for (saved, track) in snapshot.tracks.iter().zip(l.tracks()) {
                assert!(saved.chunks.iter().zip(track.chunks()).all(|(a, b)| Arc::ptr_eq(a, b)));
            }
        });
    }

    #[test]
    fn test_period_callback_drives_engine() {
        let handle = small_handle();
        let mut callback = handle.period_callback();
        let mut output = vec![0i16; 32];
        handle.toggle_record(0).unwrap();
        callback(&[100i16; 32], &mut output);
        callback(&[100i16; 32], &mut output);
        assert_eq!(handle.atomics().loop_length(), 2);
    }
}
