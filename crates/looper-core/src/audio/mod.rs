//! Audio transport for the looper
//!
//! Exchanges one mono period with the hardware per callback:
//! - **CPAL**: duplex device stream on any platform
//! - **JACK**: port-graph client on Linux, optionally launching `jackd`
//!
//! # Example Usage
//!
//! ```ignore
//! use looper_core::audio::{AudioBackend, AudioConfig};
//!
//! let config = AudioConfig::default();
//! let mut backend = AudioBackend::open::<i16, _>(&config, handle.period_callback())?;
//! // ... run ...
//! backend.close();
//! ```

mod backend;
mod config;
mod cpal_backend;
mod device;
mod error;

#[cfg(all(target_os = "linux", feature = "jack-backend"))]
mod jack_backend;

// Re-export public API
pub use config::{
    AudioConfig, BackendType, JackConfig, RetryPolicy, DEFAULT_PREFERRED_DEVICES, MAX_BUFFER_SIZE,
};

pub use backend::AudioBackend;

pub use device::{list_devices, resolve_devices, select_duplex_device, DeviceInfo};

#[cfg(all(target_os = "linux", feature = "jack-backend"))]
pub use jack_backend::{server_args, JackServer};

pub use error::{AudioError, AudioResult};
