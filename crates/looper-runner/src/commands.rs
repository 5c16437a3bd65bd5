//! Keyboard commands
//!
//! One command per line on stdin stands in for the hardware buttons and the
//! remote-control surface. Track numbers are zero-based like the engine's
//! track ids.

use std::str::FromStr;

use anyhow::Result;
use thiserror::Error;

use looper_core::engine::{LoopPhase, LooperHandle, Metronome};
use looper_core::recorder::OutputRecorder;
use looper_core::session::SessionManager;
use looper_core::Sample;

use crate::status;

/// A parsed command line
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Start/stop recording on a track (`rec N`, or just `N`)
    Record(usize),
    /// Footswitch: record on the main track (empty line or `f`)
    Footswitch,
    Play(usize),
    ResetTrack(usize),
    /// Clear everything back to an empty engine
    Reset,
    AddTrack,
    RemoveTrack(usize),
    /// Select the footswitch track, or cycle when no track is given
    MainTrack(Option<usize>),
    TrackVolume(usize, f64),
    InputVolume(f64),
    OutputVolume(f64),
    MuteInput,
    MuteOutput,
    /// Baseline bias as a fraction of full scale
    Bias(f64),
    /// Install a generated click loop as the master
    Metronome,
    /// Start/stop the output recording
    Recorder,
    Recordings,
    Save(Option<String>),
    Restore(String),
    Sessions,
    Status,
    Help,
    Quit,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseCommandError {
    #[error("Unknown command '{0}' (type 'help')")]
    Unknown(String),
    #[error("'{0}' needs {1}")]
    MissingArgument(&'static str, &'static str),
    #[error("Invalid number '{0}'")]
    InvalidNumber(String),
}

pub const HELP: &str = "\
commands (track ids start at 0):
  <enter> | f            footswitch (record on main track)
  N | rec N              toggle recording on track N
  play N                 toggle playback on track N
  clear N                reset track N
  reset                  reset the whole looper
  add | remove N         add a track / remove track N
  main [N]               set (or cycle) the footswitch track
  vol N DB               track volume
  in DB | out DB         input / output volume
  mute in | mute out     toggle input / output mute
  bias F                 baseline bias (fraction of full scale)
  metronome              install a click loop as master
  record | recordings    toggle output recording / list files
  save [NAME]            save the loop as a session
  load FILE | sessions   restore a session / list sessions
  status | help | quit";

fn parse_index(word: Option<&str>, command: &'static str) -> Result<usize, ParseCommandError> {
    let word = word.ok_or(ParseCommandError::MissingArgument(command, "a track number"))?;
    word.parse()
        .map_err(|_| ParseCommandError::InvalidNumber(word.to_string()))
}

fn parse_value(word: Option<&str>, command: &'static str) -> Result<f64, ParseCommandError> {
    let word = word.ok_or(ParseCommandError::MissingArgument(command, "a value"))?;
    word.parse()
        .map_err(|_| ParseCommandError::InvalidNumber(word.to_string()))
}

impl FromStr for Command {
    type Err = ParseCommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let Some(head) = words.next() else {
            return Ok(Command::Footswitch);
        };
        let head = head.to_lowercase();

        if let Ok(track) = head.parse::<usize>() {
            return Ok(Command::Record(track));
        }

        let command = match head.as_str() {
            "f" | "footswitch" => Command::Footswitch,
            "rec" => Command::Record(parse_index(words.next(), "rec")?),
            "play" | "p" => Command::Play(parse_index(words.next(), "play")?),
            "clear" => Command::ResetTrack(parse_index(words.next(), "clear")?),
            "reset" => Command::Reset,
            "add" => Command::AddTrack,
            "remove" => Command::RemoveTrack(parse_index(words.next(), "remove")?),
            "main" => Command::MainTrack(words.next().map(|w| parse_index(Some(w), "main")).transpose()?),
            "vol" => {
                let track = parse_index(words.next(), "vol")?;
                Command::TrackVolume(track, parse_value(words.next(), "vol")?)
            }
            "in" => Command::InputVolume(parse_value(words.next(), "in")?),
            "out" => Command::OutputVolume(parse_value(words.next(), "out")?),
            "mute" => match words.next() {
                Some("in") => Command::MuteInput,
                Some("out") => Command::MuteOutput,
                _ => return Err(ParseCommandError::MissingArgument("mute", "'in' or 'out'")),
            },
            "bias" => Command::Bias(parse_value(words.next(), "bias")?),
            "metronome" | "click" => Command::Metronome,
            "record" => Command::Recorder,
            "recordings" => Command::Recordings,
            "save" => Command::Save(words.next().map(str::to_string)),
            "load" => Command::Restore(
                words
                    .next()
                    .ok_or(ParseCommandError::MissingArgument("load", "a session file"))?
                    .to_string(),
            ),
            "sessions" => Command::Sessions,
            "status" | "s" => Command::Status,
            "help" | "h" | "?" => Command::Help,
            "quit" | "q" | "exit" => Command::Quit,
            _ => return Err(ParseCommandError::Unknown(head)),
        };
        Ok(command)
    }
}

/// Everything a command can act on
pub struct Controls<S: Sample> {
    pub handle: LooperHandle<S>,
    pub recorder: OutputRecorder<S>,
    pub sessions: SessionManager<S>,
    pub metronome: Metronome<S>,
    pub bpm: f64,
    pub beats_per_bar: usize,
    pub bars: usize,
}

/// Whether the command loop should keep running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

impl<S: Sample> Controls<S> {
    /// Run one command
    ///
    /// Engine refusals (e.g. playing an empty track) come back as errors for
    /// the caller to report; none of them stop the looper.
    pub fn execute(&mut self, command: Command) -> Result<Flow> {
        let handle = &self.handle;
        match command {
            Command::Record(track) => handle.toggle_record(track)?,
            Command::Footswitch => handle.on_footswitch_press()?,
            Command::Play(track) => handle.toggle_play(track)?,
            Command::ResetTrack(track) => handle.reset_track(track)?,
            Command::Reset => handle.reset(),
            Command::AddTrack => {
                let track = handle.add_track();
                println!("added track {}", track);
            }
            Command::RemoveTrack(track) => handle.remove_track(track)?,
            Command::MainTrack(Some(track)) => handle.with(|l| l.set_main_track(track))?,
            Command::MainTrack(None) => {
                let track = handle.with(|l| l.cycle_main_track());
                println!("main track {}", track);
            }
            Command::TrackVolume(track, volume) => handle.with(|l| l.set_track_volume(track, volume))?,
            Command::InputVolume(volume) => handle.with(|l| l.set_input_volume(volume)),
            Command::OutputVolume(volume) => handle.with(|l| l.set_output_volume(volume)),
            Command::MuteInput => {
                let muted = handle.with(|l| l.toggle_input_mute());
                println!("input {}", if muted { "muted" } else { "unmuted" });
            }
            Command::MuteOutput => {
                let muted = handle.with(|l| l.toggle_output_mute());
                println!("output {}", if muted { "muted" } else { "unmuted" });
            }
            Command::Bias(bias) => handle.with(|l| l.set_baseline_bias(bias)),
            Command::Metronome => {
                if handle.read(|l| l.phase()) != LoopPhase::Void {
                    log::warn!("Metronome loop replaces every track; reset first");
                    return Ok(Flow::Continue);
                }
                // Generated outside the engine lock
                let chunks = self.metronome.generate_beat(self.bpm, self.beats_per_bar, self.bars);
                handle.install_master(chunks)?;
            }
            Command::Recorder => {
                if let Some(recording) = self.recorder.toggle_saving()? {
                    println!("saved {}", recording.path.display());
                }
            }
            Command::Recordings => {
                for name in self.recorder.list_recordings()? {
                    println!("  {}", name);
                }
            }
            Command::Save(name) => {
                let path = self.sessions.save_session(name.as_deref())?;
                println!("saved {}", path.display());
            }
            Command::Restore(file) => self.sessions.restore_session(&file)?,
            Command::Sessions => {
                for name in self.sessions.list_sessions()? {
                    println!("  {}", name);
                }
            }
            Command::Status => println!("{}", status::describe(handle)),
            Command::Help => println!("{}", HELP),
            Command::Quit => return Ok(Flow::Quit),
        }
        Ok(Flow::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> Result<Command, ParseCommandError> {
        line.parse()
    }

    #[test]
    fn test_track_shortcuts() {
        assert_eq!(parse(""), Ok(Command::Footswitch));
        assert_eq!(parse("   "), Ok(Command::Footswitch));
        assert_eq!(parse("2"), Ok(Command::Record(2)));
        assert_eq!(parse("rec 1"), Ok(Command::Record(1)));
        assert_eq!(parse("PLAY 3"), Ok(Command::Play(3)));
        assert_eq!(parse("clear 0"), Ok(Command::ResetTrack(0)));
    }

    #[test]
    fn test_arguments() {
        assert_eq!(parse("vol 1 -6.5"), Ok(Command::TrackVolume(1, -6.5)));
        assert_eq!(parse("in 3"), Ok(Command::InputVolume(3.0)));
        assert_eq!(parse("bias -0.001"), Ok(Command::Bias(-0.001)));
        assert_eq!(parse("main"), Ok(Command::MainTrack(None)));
        assert_eq!(parse("main 2"), Ok(Command::MainTrack(Some(2))));
        assert_eq!(parse("mute out"), Ok(Command::MuteOutput));
        assert_eq!(parse("save"), Ok(Command::Save(None)));
        assert_eq!(parse("save jam"), Ok(Command::Save(Some("jam".to_string()))));
        assert_eq!(parse("load jam.session"), Ok(Command::Restore("jam.session".to_string())));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(parse("dance"), Err(ParseCommandError::Unknown("dance".to_string())));
        assert!(matches!(parse("play"), Err(ParseCommandError::MissingArgument("play", _))));
        assert_eq!(parse("play x"), Err(ParseCommandError::InvalidNumber("x".to_string())));
        assert!(matches!(parse("mute"), Err(ParseCommandError::MissingArgument(..))));
        assert!(parse("vol 1").is_err());
        assert!(parse("load").is_err());
    }
}
