//! Status reporting
//!
//! The poller only reads `LooperAtomics`, never the engine lock, so it can
//! run at any rate without disturbing the audio thread.

use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use looper_core::engine::{LoopPhase, LooperAtomics, LooperHandle};
use looper_core::Sample;

/// Poll interval for the status thread
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Snapshot of what the poller reports on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Observed {
    phase: LoopPhase,
    loop_length: usize,
    faults: u64,
}

impl Observed {
    fn read(atomics: &LooperAtomics) -> Self {
        Self {
            phase: atomics.phase(),
            loop_length: atomics.loop_length(),
            faults: atomics.faults(),
        }
    }
}

/// Log the differences between two observations
fn report(previous: &Observed, current: &Observed, chunk_length_s: f64) {
    if current.phase != previous.phase {
        match current.phase {
            LoopPhase::Loop => log::info!(
                "Looping: {} chunks ({:.2}s)",
                current.loop_length,
                current.loop_length as f64 * chunk_length_s
            ),
            phase => log::info!("Phase: {}", phase.name()),
        }
    }
    if current.faults > previous.faults {
        log::error!(
            "Audio thread fault: {} period(s) replaced by silence ({} total)",
            current.faults - previous.faults,
            current.faults
        );
    }
}

/// Background thread logging phase changes and realtime faults
pub struct StatusPoller {
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl StatusPoller {
    pub fn start(atomics: Arc<LooperAtomics>, chunk_length_s: f64) -> std::io::Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let thread = {
            let running = running.clone();
            thread::Builder::new()
                .name("status-poller".to_string())
                .spawn(move || {
                    let mut previous = Observed::read(&atomics);
                    while running.load(Ordering::Relaxed) {
                        thread::sleep(POLL_INTERVAL);
                        let current = Observed::read(&atomics);
                        report(&previous, &current, chunk_length_s);
                        previous = current;
                    }
                })?
        };
        Ok(Self {
            running,
            thread: Some(thread),
        })
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for StatusPoller {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Multi-line summary of the engine for the `status` command
pub fn describe<S: Sample>(handle: &LooperHandle<S>) -> String {
    handle.read(|looper| {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{} | loop {:.2}s ({} chunks) | {:.0}% | in {:+.1}dB{} | out {:+.1}dB{}",
            looper.phase().name(),
            looper.loop_duration(),
            looper.loop_length(),
            looper.relative_progress() * 100.0,
            looper.input_volume(),
            if looper.is_input_muted() { " (muted)" } else { "" },
            looper.output_volume(),
            if looper.is_output_muted() { " (muted)" } else { "" },
        );
        for track in looper.tracks() {
            let state = if looper.is_recording(track.index()) {
                "REC"
            } else if track.is_playing() {
                "PLAY"
            } else if track.is_empty() {
                "empty"
            } else {
                "stopped"
            };
            let _ = writeln!(
                out,
                "{} {:>2} {:<12} {:<8} {:+.1}dB",
                if track.index() == looper.main_track() { '*' } else { ' ' },
                track.index(),
                track.name(),
                state,
                track.volume(),
            );
        }
        out.trim_end().to_string()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use looper_core::engine::{EngineSettings, Looper};

    #[test]
    fn test_describe_lists_tracks() {
        let mut settings = EngineSettings::new(16, 1600);
        settings.tracks_num = 2;
        let handle = LooperHandle::new(Looper::<i16>::new(settings));
        handle.toggle_record(0).unwrap();

        let text = describe(&handle);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with('*'));
        assert!(lines[1].contains("REC"));
        assert!(lines[2].contains("empty"));
    }

    #[test]
    fn test_observed_tracks_faults() {
        let atomics = LooperAtomics::new();
        let before = Observed::read(&atomics);
        atomics.record_fault();
        let after = Observed::read(&atomics);
        assert_eq!(after.faults, before.faults + 1);
        assert_eq!(after.phase, LoopPhase::Void);
    }
}
