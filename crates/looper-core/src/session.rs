//! Session persistence
//!
//! A session is the loop content of every track plus the engine levels,
//! saved as one bincode file per session. The engine lock is only held to
//! take a snapshot that shares the track chunks (`snapshot_session`) or to
//! swap validated tracks back in (`restore_session`); encoding, decoding and
//! file I/O happen outside it.

use std::path::{Component, Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::{LooperHandle, TrackSnapshot};
use crate::types::{Sample, SampleFormat};

/// File extension of saved sessions
pub const SESSION_EXTENSION: &str = "session";

/// Timestamp format for default session and recording names
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H%M%S";

/// Saved engine state
///
/// Field order matters: `SessionHeader` decodes the leading fields of the
/// same encoding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound = "S: Sample")]
pub struct SessionSnapshot<S> {
    pub name: String,
    pub sample_format: SampleFormat,
    pub chunk_size: usize,
    pub sampling_rate: u32,
    pub input_volume: f64,
    pub output_volume: f64,
    pub loop_length: usize,
    pub tracks: Vec<TrackSnapshot<S>>,
}

/// Leading fields of an encoded `SessionSnapshot`, readable without
/// knowing its sample type
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SessionHeader {
    pub name: String,
    pub sample_format: SampleFormat,
    pub chunk_size: usize,
    pub sampling_rate: u32,
}

/// Session manager failures that callers may want to match on
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("Another session operation is in progress")]
    Busy,

    #[error("Session file not found: {0:?}")]
    NotFound(PathBuf),

    #[error("Invalid session file name '{0}' (plain file names only)")]
    InvalidName(String),

    #[error("Session was saved as {found}, engine runs {expected}")]
    FormatMismatch {
        expected: SampleFormat,
        found: SampleFormat,
    },
}

/// Clears the busy flag when an operation ends
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self, SessionError> {
        if flag.swap(true, Ordering::AcqRel) {
            return Err(SessionError::Busy);
        }
        Ok(Self(flag))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Keep session names usable as file names
fn sanitize_name(name: &str) -> String {
    let cleaned: String = name
        .trim()
        .chars()
        .map(|c| if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') { c } else { '_' })
        .collect();
    cleaned.trim_matches('.').to_string()
}

/// Local timestamp used when no name is given
pub fn timestamp_name() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Encode a snapshot
pub fn encode_session<S: Sample>(snapshot: &SessionSnapshot<S>) -> Result<Vec<u8>> {
    bincode::serialize(snapshot).context("Failed to encode session")
}

/// Decode a snapshot, checking its sample format first
pub fn decode_session<S: Sample>(bytes: &[u8]) -> Result<SessionSnapshot<S>> {
    let header: SessionHeader = bincode::deserialize(bytes).context("Failed to decode session header")?;
    if header.sample_format != <S as Sample>::FORMAT {
        return Err(SessionError::FormatMismatch {
            expected: <S as Sample>::FORMAT,
            found: header.sample_format,
        }
        .into());
    }
    bincode::deserialize(bytes).context("Failed to decode session")
}

/// Saves and restores engine sessions in a directory
pub struct SessionManager<S: Sample> {
    handle: LooperHandle<S>,
    dir: PathBuf,
    busy: Arc<AtomicBool>,
}

impl<S: Sample> SessionManager<S> {
    pub fn new(handle: LooperHandle<S>, dir: impl Into<PathBuf>) -> Self {
        Self {
            handle,
            dir: dir.into(),
            busy: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Whether a save or restore is running
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Save the running loop; the name defaults to the local timestamp
    ///
    /// Returns the written file.
    pub fn save_session(&self, name: Option<&str>) -> Result<PathBuf> {
        let _busy = BusyGuard::acquire(&self.busy)?;

        let name = name.map(sanitize_name).filter(|n| !n.is_empty()).unwrap_or_else(timestamp_name);
        let snapshot = self.handle.snapshot_session(&name)?;
        let bytes = encode_session(&snapshot)?;

        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create session directory: {:?}", self.dir))?;
        let path = self.dir.join(format!("{}.{}", name, SESSION_EXTENSION));
        std::fs::write(&path, bytes).with_context(|| format!("Failed to write session: {:?}", path))?;

        log::info!(
            "Saved session '{}' ({} tracks, {} chunks) to {:?}",
            name,
            snapshot.tracks.len(),
            snapshot.loop_length,
            path
        );
        Ok(path)
    }

    /// Restore a saved session by file name (extension optional)
    ///
    /// All tracks are stopped after the restore.
    pub fn restore_session(&self, filename: &str) -> Result<()> {
        let _busy = BusyGuard::acquire(&self.busy)?;

        let path = self.session_path(filename)?;
        if !path.is_file() {
            return Err(SessionError::NotFound(path).into());
        }
        let bytes = std::fs::read(&path).with_context(|| format!("Failed to read session: {:?}", path))?;
        let snapshot = decode_session::<S>(&bytes)?;
        let name = snapshot.name.clone();

        self.handle.restore_session(snapshot)?;
        log::info!("Restored session '{}' from {:?}", name, path);
        Ok(())
    }

    /// Saved session file names, sorted
    pub fn list_sessions(&self) -> Result<Vec<String>> {
        list_files_with_extension(&self.dir, SESSION_EXTENSION)
    }

    /// Path of a session file inside the session directory
    ///
    /// Only a bare file name is accepted; separators, `..` and absolute
    /// paths are rejected.
    fn session_path(&self, filename: &str) -> Result<PathBuf, SessionError> {
        let mut components = Path::new(filename).components();
        let name = match (components.next(), components.next()) {
            (Some(Component::Normal(name)), None) => name,
            _ => return Err(SessionError::InvalidName(filename.to_string())),
        };
        let path = self.dir.join(name);
        if path.extension().is_some_and(|ext| ext == SESSION_EXTENSION) {
            Ok(path)
        } else {
            Ok(self.dir.join(format!("{}.{}", name.to_string_lossy(), SESSION_EXTENSION)))
        }
    }
}

/// File names in `dir` with the given extension, sorted; a missing
/// directory has none
pub(crate) fn list_files_with_extension(dir: &Path, extension: &str) -> Result<Vec<String>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to list {:?}", dir))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == extension))
        .filter_map(|path| path.file_name().map(|n| n.to_string_lossy().into_owned()))
        .collect();
    names.sort();
    Ok(names)
}
