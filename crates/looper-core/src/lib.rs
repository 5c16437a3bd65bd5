//! Looper Core - Multi-track live audio looper engine and its collaborators

pub mod audio;
pub mod config;
pub mod types;
pub mod dsp;
pub mod engine;
pub mod recorder;
pub mod session;

pub use types::*;
