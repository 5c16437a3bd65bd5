//! Loop engine
//!
//! - `track`: one layer of the loop with overdub bookkeeping
//! - `looper`: the phase state machine and per-period processing
//! - `prepare`: loop content built outside the engine lock
//! - `handle`: the engine lock shared by the audio and control threads
//! - `atomics`: lock-free status for pollers
//! - `metronome`: generated click loops usable as a master
//! - `latency`: round-trip latency probe

mod atomics;
mod error;
mod handle;
pub mod latency;
mod looper;
pub mod metronome;
mod prepare;
mod track;

pub use atomics::{LooperAtomics, STATUS_TRACKS};
pub use error::{LooperError, LooperResult};
pub use handle::LooperHandle;
pub use latency::{LatencyProbe, LatencyReport};
pub use looper::{EngineSettings, LoopPhase, Looper};
pub use metronome::Metronome;
pub use prepare::{ClosedTake, PreparedLoop, PreparedSession, Retired};
pub use track::{shift_loop_position, silent_chunks, LoopChunks, Track, TrackSnapshot};

/// Receiver of every final output chunk (e.g. the output recorder)
///
/// Called on the audio thread with the engine lock held: implementations
/// must not block, allocate or log.
pub trait OutputSink<S>: Send {
    fn transmit(&mut self, chunk: &[S]);
}
