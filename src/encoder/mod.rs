//! # Encoder Process Contract
//!
//! The queue never transcodes anything itself: every run, metadata probe and
//! version check is an external encoder process. This module defines the
//! contract the service relies on and two implementations of it.
//!
//! ## Core Components
//!
//! - **[`Encoder`]**: Factory that spawns one process per [`EncoderCommand`]
//! - **[`EncoderControl`]**: Commands accepted by a live process (pause, resume, exit, kill)
//! - **[`EncoderEvent`]**: Everything a process reports back, tagged with an [`EventOrigin`]
//! - **[`FfmpegEncoder`]**: `tokio::process` implementation that parses ffmpeg's stderr
//! - **[`MockEncoder`]**: Scripted implementation for tests
//!
//! ## Event Flow
//!
//! ```text
//! Encoder::spawn(command, events)
//!        ↓
//!   process output ──parse──> EncoderEvent
//!        ↓
//!   EncoderEvents::emit ──channel──> service loop
//! ```
//!
//! Events are delivered asynchronously through a channel; a process never
//! calls back into the service directly.

use crate::env;
use crate::task::TaskId;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::debug;

/// Scripted encoder used by tests.
pub mod mock;

/// Line parser for ffmpeg's textual output.
pub mod parser;

/// Process-backed encoder.
pub mod process;

pub use mock::{ControlCall, MockEncoder, MockSession};
pub use parser::OutputParser;
pub use process::FfmpegEncoder;

/// What an encoder process is spawned for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncoderMode {
    /// A full transcode run
    Transcode,
    /// Read input metadata only
    Probe,
    /// Report the encoder version
    Version,
}

/// Command to spawn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncoderCommand {
    pub program: PathBuf,
    pub mode: EncoderMode,
    pub args: Vec<String>,
}

impl EncoderCommand {
    pub fn new(program: impl Into<PathBuf>, mode: EncoderMode, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            mode,
            args,
        }
    }

    /// Shell-escaped command line, for logs
    pub fn command_line(&self) -> String {
        let program = self.program.to_string_lossy();
        std::iter::once(shell_escape::escape(program))
            .chain(self.args.iter().map(|a| shell_escape::escape(a.as_str().into())))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// One progress report of a running transcode
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EncoderProgress {
    pub frame: f64,
    pub fps: f64,
    pub q: f64,
    /// Output size in kB
    pub size: f64,
    /// Encoded media time in seconds
    pub time: f64,
    /// kbps
    pub bitrate: f64,
    pub speed: f64,
}

/// Input properties reported by a probe
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProbeMetadata {
    pub format: Option<String>,
    /// Seconds
    pub duration: Option<f64>,
    pub vcodec: Option<String>,
    pub vresolution: Option<String>,
    /// kbps
    pub vbitrate: Option<f64>,
    pub vframerate: Option<f64>,
    pub acodec: Option<String>,
    /// kbps
    pub abitrate: Option<f64>,
}

impl ProbeMetadata {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Events reported by an encoder process
#[derive(Debug, Clone, PartialEq)]
pub enum EncoderEvent {
    /// A chunk of textual output
    Data(String),
    /// Version string, `None` when the binary could not report one
    Version(Option<String>),
    Metadata(ProbeMetadata),
    Status(EncoderProgress),
    Warning(String),
    /// Fatal errors with the collected diagnostic lines
    Critical(Vec<String>),
    /// The run completed successfully
    Finished,
    /// The process exited without being asked to and without a diagnosis
    Escaped,
    /// A requested `exit` or `force_kill` has completed
    Exited,
}

impl EncoderEvent {
    /// Whether the process is gone after this event
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EncoderEvent::Critical(_)
                | EncoderEvent::Finished
                | EncoderEvent::Escaped
                | EncoderEvent::Exited
        )
    }
}

/// Which process an event came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOrigin {
    /// A transcode run; `generation` distinguishes successive runs of one task
    Session { task_id: TaskId, generation: u64 },
    /// The input probe of a task
    Probe { task_id: TaskId },
    /// The encoder version check
    Version,
}

/// An event together with its origin
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderMessage {
    pub origin: EventOrigin,
    pub event: EncoderEvent,
}

/// Sending half handed to a spawned process
#[derive(Debug, Clone)]
pub struct EncoderEvents {
    origin: EventOrigin,
    tx: mpsc::UnboundedSender<EncoderMessage>,
}

impl EncoderEvents {
    pub fn new(origin: EventOrigin, tx: mpsc::UnboundedSender<EncoderMessage>) -> Self {
        Self { origin, tx }
    }

    pub fn origin(&self) -> EventOrigin {
        self.origin
    }

    pub fn emit(&self, event: EncoderEvent) {
        let message = EncoderMessage {
            origin: self.origin,
            event,
        };
        if self.tx.send(message).is_err() {
            debug!("Encoder event dropped, service is gone ({:?})", self.origin);
        }
    }
}

/// Errors from spawning or commanding an encoder process
#[derive(Debug, thiserror::Error)]
pub enum EncoderError {
    #[error("Failed to spawn {program:?}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Encoder process is not running")]
    NotRunning,

    #[error("Failed to signal encoder process: {0}")]
    Signal(String),

    #[error("Operation not supported on this platform: {0}")]
    Unsupported(&'static str),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Spawns encoder processes
pub trait Encoder: Send + Sync {
    fn spawn(
        &self,
        command: EncoderCommand,
        events: EncoderEvents,
    ) -> Result<Box<dyn EncoderControl>, EncoderError>;
}

/// Commands accepted by a live encoder process.
///
/// `exit` and `force_kill` return immediately; completion is reported later
/// as [`EncoderEvent::Exited`].
pub trait EncoderControl: Send {
    fn pause(&mut self) -> Result<(), EncoderError>;
    fn resume(&mut self) -> Result<(), EncoderError>;
    /// Ask the process to finish gracefully
    fn exit(&mut self) -> Result<(), EncoderError>;
    /// Terminate immediately
    fn force_kill(&mut self) -> Result<(), EncoderError>;
}

/// Locate the encoder binary.
///
/// An explicit path wins. Otherwise look next to the running executable, in
/// the current directory, in `/usr/local/bin` on macOS and finally on `PATH`.
/// Falls back to the bare binary name.
pub fn locate_binary(configured: Option<&Path>) -> PathBuf {
    if let Some(path) = configured {
        return path.to_path_buf();
    }

    let mut candidates = Vec::new();
    if let Some(dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf))
    {
        candidates.push(dir.join(env::encoder::BINARY_NAME));
    }
    if let Ok(cwd) = std::env::current_dir() {
        candidates.push(cwd.join(env::encoder::BINARY_NAME));
    }
    if cfg!(target_os = "macos") {
        candidates.push(PathBuf::from(env::encoder::MACOS_SYSTEM_PATH));
    }

    for candidate in candidates {
        debug!("Checking for encoder binary: {:?}", candidate);
        if candidate.is_file() {
            return candidate;
        }
    }

    which::which(env::encoder::BINARY_NAME)
        .unwrap_or_else(|_| PathBuf::from(env::encoder::BINARY_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_line_escapes_arguments() {
        let command = EncoderCommand::new(
            "/usr/bin/ffmpeg",
            EncoderMode::Transcode,
            vec!["-i".to_string(), "my movie.mkv".to_string()],
        );
        assert_eq!(command.command_line(), "/usr/bin/ffmpeg -i 'my movie.mkv'");
    }

    #[test]
    fn test_terminal_events() {
        assert!(EncoderEvent::Finished.is_terminal());
        assert!(EncoderEvent::Escaped.is_terminal());
        assert!(EncoderEvent::Exited.is_terminal());
        assert!(EncoderEvent::Critical(vec![]).is_terminal());
        assert!(!EncoderEvent::Data("x".into()).is_terminal());
        assert!(!EncoderEvent::Status(EncoderProgress::default()).is_terminal());
    }

    #[test]
    fn test_locate_binary_prefers_configured_path() {
        let path = locate_binary(Some(Path::new("/opt/custom/ffmpeg")));
        assert_eq!(path, PathBuf::from("/opt/custom/ffmpeg"));
    }

    #[tokio::test]
    async fn test_events_carry_origin() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let events = EncoderEvents::new(EventOrigin::Probe { task_id: 3 }, tx);
        events.emit(EncoderEvent::Finished);

        let message = rx.recv().await.unwrap();
        assert_eq!(message.origin, EventOrigin::Probe { task_id: 3 });
        assert_eq!(message.event, EncoderEvent::Finished);
    }
}
