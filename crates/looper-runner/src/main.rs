//! Looper - multi-track live audio looper
//!
//! Opens the configured audio backend with the loop engine as its period
//! callback and reads control commands from stdin.
//!
//! # Usage
//!
//! ```bash
//! looper                          # run with the resolved config file
//! looper --config my.yaml         # run with an explicit config file
//! looper --list-devices           # print audio devices and exit
//! looper --measure-latency        # measure round-trip latency and exit
//! ```
//!
//! The config file is resolved from `--config`, `CONFIG_FILE`,
//! `./default.config.yaml`, then `~/.config/looper/config.yaml`.

mod commands;
mod status;

use std::io::BufRead;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;

use looper_core::audio::{list_devices, AudioBackend};
use looper_core::config::{load_looper_config, LooperConfig};
use looper_core::dsp::SignalProcessor;
use looper_core::engine::latency::{DEFAULT_ARMING_PERIODS, DEFAULT_CAPTURE_PERIODS};
use looper_core::engine::{LatencyProbe, LatencyReport, Looper, LooperHandle, Metronome};
use looper_core::recorder::OutputRecorder;
use looper_core::session::SessionManager;
use looper_core::{Sample, SampleFormat};

use commands::{Command, Controls, Flow, HELP};
use status::StatusPoller;

#[derive(Parser)]
#[command(name = "looper")]
#[command(author, version, about = "Multi-track live audio looper")]
struct Args {
    /// Config file (overrides CONFIG_FILE and the default locations)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// List audio devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Measure round-trip latency (loop the output back into the input) and exit
    #[arg(long)]
    measure_latency: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logger - set RUST_LOG=debug for verbose output
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    if args.list_devices {
        for device in list_devices()? {
            let duplex = if device.is_duplex() { " (duplex)" } else { "" };
            println!("{}{}", device, duplex);
        }
        return Ok(());
    }

    let (config, path) = load_looper_config(args.config.as_deref())?;
    log::info!("looper starting up (config: {:?})", path);

    match config.audio.sample_format()? {
        SampleFormat::Int16 => run::<i16>(&config, &args),
        SampleFormat::Int32 => run::<i32>(&config, &args),
        SampleFormat::Float32 => run::<f32>(&config, &args),
    }
}

fn run<S: Sample>(config: &LooperConfig, args: &Args) -> Result<()> {
    if args.measure_latency {
        let report = measure_latency::<S>(config)?;
        println!(
            "Round-trip latency: {} samples, {:.2} ms ({} chunks)",
            report.samples, report.milliseconds, report.chunks
        );
        return Ok(());
    }
    run_looper::<S>(config)
}

fn run_looper<S: Sample>(config: &LooperConfig) -> Result<()> {
    let audio = &config.audio;
    let settings = config.engine_settings();
    let (recorder, sink) = OutputRecorder::<S>::new(&config.recorder, audio.sampling_rate, audio.chunk_size)?;
    let metronome = Metronome::<S>::new(audio.chunk_size, audio.sampling_rate, &config.metronome)
        .context("Failed to prepare metronome clicks")?;

    let mut looper = Looper::<S>::new(settings);
    looper.attach_sink(Box::new(sink));
    let handle = LooperHandle::new(looper);

    let mut backend = AudioBackend::open::<S, _>(audio, handle.period_callback())
        .context("Failed to open audio backend")?;
    log::info!(
        "Audio running on {} ({}Hz, {} frames, {:.1}ms)",
        backend.name(),
        backend.sample_rate(),
        backend.buffer_size(),
        backend.latency_ms()
    );

    let mut poller = StatusPoller::start(handle.atomics().clone(), audio.chunk_length_s())
        .context("Failed to start status poller")?;

    let mut controls = Controls {
        handle: handle.clone(),
        recorder,
        sessions: SessionManager::new(handle.clone(), config.sessions.dir.clone()),
        metronome,
        bpm: config.metronome.bpm,
        beats_per_bar: config.metronome.beats_per_bar,
        bars: config.metronome.bars,
    };

    println!("{}", HELP);
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line.context("Failed to read stdin")?;
        if backend.has_failed() {
            log::error!("Audio backend failed; stopping");
            break;
        }
        let command = match line.parse::<Command>() {
            Ok(command) => command,
            Err(e) => {
                println!("{}", e);
                continue;
            }
        };
        match controls.execute(command) {
            Ok(Flow::Continue) => {}
            Ok(Flow::Quit) => break,
            Err(e) => log::warn!("{:#}", e),
        }
    }

    backend.close();
    poller.stop();
    log::info!("looper stopped");
    Ok(())
}

fn measure_latency<S: Sample>(config: &LooperConfig) -> Result<LatencyReport> {
    let audio = &config.audio;
    let dsp = SignalProcessor::<S>::new(audio.chunk_size, audio.sampling_rate);
    let (mut probe, capture) = LatencyProbe::new(&dsp, DEFAULT_ARMING_PERIODS, DEFAULT_CAPTURE_PERIODS);

    let mut backend = AudioBackend::open::<S, _>(audio, move |input: &[S], output: &mut [S]| {
        probe.process(input, output)
    })
    .context("Failed to open audio backend")?;

    let periods = (DEFAULT_ARMING_PERIODS + DEFAULT_CAPTURE_PERIODS) as f64;
    let deadline = Instant::now() + Duration::from_secs_f64(periods * audio.chunk_length_s() + 5.0);
    while !capture.is_complete() {
        if Instant::now() > deadline || backend.has_failed() {
            backend.close();
            anyhow::bail!("Latency capture did not complete");
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    backend.close();

    capture
        .analyze()
        .context("No tone detected on the input; is the output looped back?")
}
