//! Native JACK audio backend for Linux
//!
//! Optionally launches `jackd` on an ALSA device, connects a client with
//! one mono input and one mono output port, and wires them to the physical
//! capture and playback ports of the graph.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐  spawn   ┌─────────────────────┐
//! │   JackServer     │─────────►│  jackd (ALSA)       │◄─── watcher thread
//! └──────────────────┘          └──────────┬──────────┘     (logs exit)
//!                                          │ process()
//!                                          ▼
//! ┌──────────────────┐  f32 ↔ S  ┌─────────────────────┐
//! │  looper:input    │──────────►│  Period callback    │──► looper:output
//! └──────────────────┘           │  (pre-allocated)    │
//!                                └─────────────────────┘
//! ```
//!
//! JACK ports always carry normalized `f32`; the processor converts to and
//! from the engine's sample type in pre-allocated buffers.

use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use jack::{AudioIn, AudioOut, Client, ClientOptions, Control, Port, PortFlags, PortSpec, ProcessScope};

use super::config::{AudioConfig, JackConfig, RetryPolicy, MAX_BUFFER_SIZE};
use super::error::{AudioError, AudioResult};
use crate::types::Sample;

/// JACK port names registered by the looper client
const INPUT_PORT: &str = "input";
const OUTPUT_PORT: &str = "output";

/// Poll interval of the server watcher thread
const WATCH_INTERVAL: Duration = Duration::from_millis(200);

/// Period callback on normalized samples
type PeriodFn = Box<dyn FnMut(&[f32], &mut [f32]) + Send>;

// ═══════════════════════════════════════════════════════════════════════════════
// Server Process
// ═══════════════════════════════════════════════════════════════════════════════

/// A `jackd` child process owned by the looper
///
/// The process is killed on `terminate()` or drop. An unexpected exit is
/// logged by the watcher thread and reported through `has_exited()`.
pub struct JackServer {
    child: Arc<Mutex<Child>>,
    stopping: Arc<AtomicBool>,
    exited: Arc<AtomicBool>,
    watcher: Option<JoinHandle<()>>,
}

/// Command-line arguments for `jackd` on an ALSA device
pub fn server_args(config: &JackConfig, chunk_size: usize, sampling_rate: u32) -> Vec<String> {
    vec![
        "-ndefault".to_string(),
        "--realtime".to_string(),
        "-d".to_string(),
        "alsa".to_string(),
        "--capture".to_string(),
        config.alsa_capture_device.clone(),
        "--playback".to_string(),
        config.alsa_playback_device.clone(),
        "--period".to_string(),
        chunk_size.to_string(),
        "--rate".to_string(),
        sampling_rate.to_string(),
    ]
}

/// Forward a child output stream to the debug log
fn spawn_log_reader<R: Read + Send + 'static>(stream: R, label: &'static str) {
    let spawned = thread::Builder::new()
        .name(format!("jackd-{}", label))
        .spawn(move || {
            for line in BufReader::new(stream).lines().map_while(Result::ok) {
                log::debug!("jackd {}: {}", label, line);
            }
        });
    if let Err(e) = spawned {
        log::warn!("Could not spawn jackd {} reader: {}", label, e);
    }
}

impl JackServer {
    /// Launch the server and start watching it
    pub fn start(config: &JackConfig, chunk_size: usize, sampling_rate: u32) -> AudioResult<Self> {
        let args = server_args(config, chunk_size, sampling_rate);
        log::info!("Starting JACK server: {} {}", config.server_path.display(), args.join(" "));

        let mut child = Command::new(&config.server_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| AudioError::ServerStart(format!("{}: {}", config.server_path.display(), e)))?;

        if let Some(stdout) = child.stdout.take() {
            spawn_log_reader(stdout, "stdout");
        }
        if let Some(stderr) = child.stderr.take() {
            spawn_log_reader(stderr, "stderr");
        }

        let child = Arc::new(Mutex::new(child));
        let stopping = Arc::new(AtomicBool::new(false));
        let exited = Arc::new(AtomicBool::new(false));

        let watcher = {
            let child = child.clone();
            let stopping = stopping.clone();
            let exited = exited.clone();
            thread::Builder::new()
                .name("jackd-watcher".to_string())
                .spawn(move || loop {
                    if stopping.load(Ordering::Relaxed) {
                        break;
                    }
                    let status = match child.lock() {
                        Ok(mut child) => child.try_wait(),
                        Err(_) => break,
                    };
                    match status {
                        Ok(Some(status)) => {
                            exited.store(true, Ordering::Relaxed);
                            if !stopping.load(Ordering::Relaxed) {
                                if status.success() {
                                    log::warn!("JACK server exited");
                                } else {
                                    log::error!("JACK server exited unexpectedly: {}", status);
                                }
                            }
                            break;
                        }
                        Ok(None) => thread::sleep(WATCH_INTERVAL),
                        Err(e) => {
                            log::warn!("Could not poll JACK server: {}", e);
                            break;
                        }
                    }
                })
                .map_err(|e| AudioError::ServerStart(e.to_string()))?
        };

        Ok(Self {
            child,
            stopping,
            exited,
            watcher: Some(watcher),
        })
    }

    /// Whether the server process is gone
    pub fn has_exited(&self) -> bool {
        self.exited.load(Ordering::Relaxed)
    }

    /// Kill the server and wait for it; idempotent
    pub fn terminate(&mut self) {
        if self.stopping.swap(true, Ordering::Relaxed) {
            return;
        }
        if let Some(watcher) = self.watcher.take() {
            let _ = watcher.join();
        }
        let mut child = match self.child.lock() {
            Ok(child) => child,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Ok(None) = child.try_wait() {
            if let Err(e) = child.kill() {
                log::warn!("Could not stop JACK server: {}", e);
            }
        }
        let _ = child.wait();
        self.exited.store(true, Ordering::Relaxed);
        log::info!("JACK server stopped");
    }
}

impl Drop for JackServer {
    fn drop(&mut self) {
        self.terminate();
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Client
// ═══════════════════════════════════════════════════════════════════════════════

/// JACK process handler
///
/// Owns the period callback exclusively; nothing here allocates.
struct JackProcessor {
    input: Port<AudioIn>,
    output: Port<AudioOut>,
    chunk_size: usize,
    callback: PeriodFn,
}

impl jack::ProcessHandler for JackProcessor {
    fn process(&mut self, _client: &Client, ps: &ProcessScope) -> Control {
        let input = self.input.as_slice(ps);
        let output = self.output.as_mut_slice(ps);

        // Engine chunks have a fixed length
        if input.len() != self.chunk_size {
            output.fill(0.0);
            return Control::Continue;
        }

        (self.callback)(input, output);
        Control::Continue
    }

    fn buffer_size(&mut self, _client: &Client, size: jack::Frames) -> Control {
        if size as usize != self.chunk_size {
            log::error!(
                "JACK buffer size changed to {} frames, looper expects {}; output muted",
                size,
                self.chunk_size
            );
        }
        Control::Continue
    }
}

/// JACK notification handler
struct JackNotifications;

impl jack::NotificationHandler for JackNotifications {
    fn sample_rate(&mut self, _client: &Client, srate: jack::Frames) -> Control {
        log::info!("JACK sample rate changed to: {}", srate);
        Control::Continue
    }

    fn xrun(&mut self, _client: &Client) -> Control {
        log::warn!("JACK xrun detected");
        Control::Continue
    }
}

/// Open a client, retrying with backoff while the server comes up
fn open_client(name: &str, retry: &RetryPolicy) -> AudioResult<Client> {
    let delays = retry.delays();
    let mut attempts = 0;
    let mut last_error = String::new();

    for delay in delays.iter().map(Some).chain(std::iter::once(None)) {
        attempts += 1;
        match Client::new(name, ClientOptions::NO_START_SERVER) {
            Ok((client, _status)) => return Ok(client),
            Err(e) => {
                last_error = e.to_string();
                log::debug!("JACK client attempt {} failed: {}", attempts, e);
            }
        }
        if let Some(delay) = delay {
            thread::sleep(*delay);
        }
    }

    Err(AudioError::ClientOpen {
        attempts,
        reason: last_error,
    })
}

/// Pick the capture port feeding the looper input
fn select_capture_port(configured: Option<&str>, physical: &[String]) -> AudioResult<String> {
    match configured {
        Some(name) => physical
            .iter()
            .find(|port| port.as_str() == name)
            .cloned()
            .ok_or_else(|| AudioError::PortNotFound(name.to_string())),
        None => physical
            .last()
            .cloned()
            .ok_or_else(|| AudioError::PortNotFound("physical capture port".to_string())),
    }
}

/// Pick the playback ports fed by the looper output
fn select_playback_ports(configured: &[String], physical: &[String]) -> AudioResult<Vec<String>> {
    if configured.is_empty() {
        if physical.is_empty() {
            return Err(AudioError::PortNotFound("physical playback port".to_string()));
        }
        return Ok(physical.to_vec());
    }
    configured
        .iter()
        .map(|name| {
            physical
                .iter()
                .find(|port| *port == name)
                .cloned()
                .ok_or_else(|| AudioError::PortNotFound(name.clone()))
        })
        .collect()
}

/// JACK-specific audio handle
///
/// Keeps the client active (and the server running, when it was started
/// here) until `close()` or drop.
pub struct JackBackend {
    client: Option<jack::AsyncClient<JackNotifications, JackProcessor>>,
    server: Option<JackServer>,
    sample_rate: u32,
    buffer_size: u32,
}

impl JackBackend {
    /// Start (or attach to) the server and run `callback` once per period
    pub fn open<S, F>(config: &AudioConfig, mut callback: F) -> AudioResult<Self>
    where
        S: Sample,
        F: FnMut(&[S], &mut [S]) + Send + 'static,
    {
        let jack_config = &config.jack;
        let mut server = if jack_config.start_server {
            Some(JackServer::start(jack_config, config.chunk_size, config.sampling_rate)?)
        } else {
            None
        };

        let client = match open_client(&jack_config.client_name, &jack_config.retry) {
            Ok(client) => client,
            Err(e) => {
                if let Some(server) = server.as_mut() {
                    server.terminate();
                }
                return Err(e);
            }
        };
        let client_name = client.name().to_string();
        let sample_rate = client.sample_rate() as u32;
        let buffer_size = client.buffer_size();

        log::info!(
            "JACK client '{}' created (sample rate: {}Hz, buffer: {} frames, latency: {:.1}ms)",
            client_name,
            sample_rate,
            buffer_size,
            (buffer_size as f32 / sample_rate as f32) * 1000.0
        );

        if buffer_size as usize != config.chunk_size {
            return Err(AudioError::ConfigError(format!(
                "JACK buffer size {} differs from chunk size {}",
                buffer_size, config.chunk_size
            )));
        }
        if sample_rate != config.sampling_rate {
            return Err(AudioError::ConfigError(format!(
                "JACK sample rate {} differs from configured {}",
                sample_rate, config.sampling_rate
            )));
        }

        let input = client
            .register_port(INPUT_PORT, AudioIn::default())
            .map_err(|e| AudioError::PortError(format!("Failed to register port: {}", e)))?;
        let output = client
            .register_port(OUTPUT_PORT, AudioOut::default())
            .map_err(|e| AudioError::PortError(format!("Failed to register port: {}", e)))?;
        let input_name = input.name().map_err(|e| AudioError::PortError(e.to_string()))?;
        let output_name = output.name().map_err(|e| AudioError::PortError(e.to_string()))?;

        // Physical capture ports are graph outputs, playback ports graph inputs
        let audio_spec = AudioIn::default();
        let audio_type = audio_spec.jack_port_type();
        let capture_ports = client.ports(None, Some(audio_type), PortFlags::IS_OUTPUT | PortFlags::IS_PHYSICAL);
        let playback_ports = client.ports(None, Some(audio_type), PortFlags::IS_INPUT | PortFlags::IS_PHYSICAL);
        let capture = select_capture_port(jack_config.capture_port.as_deref(), &capture_ports)?;
        let playback = select_playback_ports(&jack_config.playback_ports, &playback_ports)?;

        let mut input_buffer = vec![S::SILENCE; MAX_BUFFER_SIZE];
        let mut output_buffer = vec![S::SILENCE; MAX_BUFFER_SIZE];
        let convert = move |input: &[f32], output: &mut [f32]| {
            let n = input.len().min(output.len()).min(MAX_BUFFER_SIZE);
            for (dst, &src) in input_buffer[..n].iter_mut().zip(input) {
                *dst = S::from_normalized(src);
            }
            callback(&input_buffer[..n], &mut output_buffer[..n]);
            for (dst, src) in output.iter_mut().zip(&output_buffer[..n]) {
                *dst = src.to_normalized();
            }
        };

        let processor = JackProcessor {
            input,
            output,
            chunk_size: config.chunk_size,
            callback: Box::new(convert),
        };

        let async_client = client
            .activate_async(JackNotifications, processor)
            .map_err(|e| AudioError::ConfigError(format!("Failed to activate JACK client: {}", e)))?;

        log::info!("JACK client activated");

        let graph = async_client.as_client();
        graph
            .connect_ports_by_name(&capture, &input_name)
            .map_err(|e| AudioError::PortError(format!("{} -> {}: {}", capture, input_name, e)))?;
        log::info!("Connected {} to {}", capture, input_name);
        for port in &playback {
            graph
                .connect_ports_by_name(&output_name, port)
                .map_err(|e| AudioError::PortError(format!("{} -> {}: {}", output_name, port, e)))?;
            log::info!("Connected {} to {}", output_name, port);
        }

        Ok(Self {
            client: Some(async_client),
            server: server.take(),
            sample_rate,
            buffer_size,
        })
    }

    /// Deactivate the client and stop the server; idempotent
    pub fn close(&mut self) {
        if let Some(client) = self.client.take() {
            match client.deactivate() {
                Ok(_) => log::info!("JACK client deactivated"),
                Err(e) => log::warn!("Could not deactivate JACK client: {}", e),
            }
        }
        if let Some(mut server) = self.server.take() {
            server.terminate();
        }
    }

    /// Get the sample rate of the audio system
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Get the actual buffer size in frames
    pub fn buffer_size(&self) -> u32 {
        self.buffer_size
    }

    /// Whether the server started for this client has exited
    pub fn has_failed(&self) -> bool {
        self.server.as_ref().is_some_and(JackServer::has_exited)
    }
}

impl Drop for JackBackend {
    fn drop(&mut self) {
        self.close();
    }
}
