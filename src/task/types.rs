use super::ledger::ProgressLedger;
use super::params::OutputParams;
use super::session::EncoderSession;
use crate::encoder::{EncoderControl, ProbeMetadata};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a queued task. Allocated in ascending order, never reused.
pub type TaskId = u32;

/// Wire value addressing the template task
pub const TEMPLATE_WIRE_ID: i64 = -1;

/// Either a real task or the template task holding baseline settings.
///
/// On the wire the template is addressed as `-1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "i64", try_from = "i64")]
pub enum TaskRef {
    Template,
    Task(TaskId),
}

impl From<TaskId> for TaskRef {
    fn from(id: TaskId) -> Self {
        TaskRef::Task(id)
    }
}

impl From<TaskRef> for i64 {
    fn from(task: TaskRef) -> Self {
        match task {
            TaskRef::Template => TEMPLATE_WIRE_ID,
            TaskRef::Task(id) => i64::from(id),
        }
    }
}

impl TryFrom<i64> for TaskRef {
    type Error = String;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        if value == TEMPLATE_WIRE_ID {
            return Ok(TaskRef::Template);
        }
        TaskId::try_from(value)
            .map(TaskRef::Task)
            .map_err(|_| format!("invalid task id: {}", value))
    }
}

impl fmt::Display for TaskRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskRef::Template => write!(f, "template"),
            TaskRef::Task(id) => write!(f, "{}", id),
        }
    }
}

/// Lifecycle status of a task
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Remote task waiting for its upload to be merged
    Initializing,
    Idle,
    /// Waiting for a free slot in the running queue
    IdleQueued,
    Running,
    Paused,
    /// Paused, to be resumed when a slot frees up
    PausedQueued,
    /// Waiting for the encoder to exit
    Stopping,
    Finished,
    Error,
    Deleted,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Initializing => "initializing",
            TaskStatus::Idle => "idle",
            TaskStatus::IdleQueued => "idle_queued",
            TaskStatus::Running => "running",
            TaskStatus::Paused => "paused",
            TaskStatus::PausedQueued => "paused_queued",
            TaskStatus::Stopping => "stopping",
            TaskStatus::Finished => "finished",
            TaskStatus::Error => "error",
            TaskStatus::Deleted => "deleted",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// User-initiated lifecycle commands checked against their expected sources.
///
/// Reset picks its effect from the current status instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Start,
    Pause,
    Resume,
    Delete,
}

impl Transition {
    /// Statuses this command is expected from. Other sources are logged
    /// as inconsistencies but the command still runs.
    pub fn legal_sources(self) -> &'static [TaskStatus] {
        use TaskStatus::*;
        match self {
            Transition::Start => &[Idle, IdleQueued, Error],
            Transition::Pause => &[Running, PausedQueued],
            Transition::Resume => &[Paused, PausedQueued],
            Transition::Delete => &[Initializing, Idle, IdleQueued, Finished, Error],
        }
    }

    pub fn is_legal_from(self, status: TaskStatus) -> bool {
        self.legal_sources().contains(&status)
    }

    pub fn name(self) -> &'static str {
        match self {
            Transition::Start => "start",
            Transition::Pause => "pause",
            Transition::Resume => "resume",
            Transition::Delete => "delete",
        }
    }
}

/// Properties of the input, filled once by the metadata probe
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InputMetadata {
    pub format: String,
    /// Seconds, `-1` when unknown
    pub duration: f64,
    pub vcodec: String,
    pub acodec: String,
    pub vresolution: String,
    pub vframerate: f64,
    pub vbitrate: f64,
    pub abitrate: f64,
    #[serde(skip)]
    populated: bool,
}

impl Default for InputMetadata {
    fn default() -> Self {
        Self {
            format: "-".to_string(),
            duration: -1.0,
            vcodec: "-".to_string(),
            acodec: "-".to_string(),
            vresolution: "-".to_string(),
            vframerate: -1.0,
            vbitrate: -1.0,
            abitrate: -1.0,
            populated: false,
        }
    }
}

impl InputMetadata {
    pub fn is_populated(&self) -> bool {
        self.populated
    }

    /// Fill from probe output. Only the first call has any effect.
    pub fn populate(&mut self, metadata: &ProbeMetadata) -> bool {
        if self.populated {
            return false;
        }
        let text = |value: &Option<String>| value.clone().unwrap_or_else(|| "-".to_string());
        let number = |value: Option<f64>| value.unwrap_or(-1.0);

        self.format = text(&metadata.format);
        self.duration = number(metadata.duration);
        self.vcodec = text(&metadata.vcodec);
        self.acodec = text(&metadata.acodec);
        self.vresolution = text(&metadata.vresolution);
        self.vframerate = number(metadata.vframerate);
        self.vbitrate = number(metadata.vbitrate);
        self.abitrate = number(metadata.abitrate);
        self.populated = true;
        true
    }
}

/// One transcode job
pub struct Task {
    pub file_base_name: String,
    pub before: InputMetadata,
    pub after: OutputParams,
    pub command_arguments: Vec<String>,
    pub status: TaskStatus,
    pub progress: ProgressLedger,
    pub cmd_text: String,
    pub error_info: Vec<String>,
    /// Local: absolute output path, set when a run starts.
    /// Remote: generated file name, set at creation and on parameter changes.
    pub output_path: String,
    remote: bool,
    pub(crate) session: Option<EncoderSession>,
    pub(crate) probe: Option<Box<dyn EncoderControl>>,
}

impl Task {
    pub fn new(file_base_name: impl Into<String>, after: OutputParams) -> Self {
        let remote = after.primary_input().is_none();
        Self {
            file_base_name: file_base_name.into(),
            before: InputMetadata::default(),
            after,
            command_arguments: Vec::new(),
            status: if remote {
                TaskStatus::Initializing
            } else {
                TaskStatus::Idle
            },
            progress: ProgressLedger::default(),
            cmd_text: String::new(),
            error_info: Vec::new(),
            output_path: String::new(),
            remote,
            session: None,
            probe: None,
        }
    }

    /// Whether the input arrives by upload. Fixed at creation.
    pub fn is_remote(&self) -> bool {
        self.remote
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    pub fn session(&self) -> Option<&EncoderSession> {
        self.session.as_ref()
    }

    /// Append encoder output; a newline separates chunks
    pub fn append_cmd_text(&mut self, content: &str) {
        if content.is_empty() {
            return;
        }
        if !self.cmd_text.is_empty() && !self.cmd_text.ends_with('\n') {
            self.cmd_text.push('\n');
        }
        self.cmd_text.push_str(content);
    }

    pub fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            file_base_name: self.file_base_name.clone(),
            before: self.before.clone(),
            after: self.after.clone(),
            command_arguments: self.command_arguments.clone(),
            status: self.status,
            progress: self.progress.clone(),
            cmd_text: self.cmd_text.clone(),
            error_info: self.error_info.clone(),
            output_path: self.output_path.clone(),
            remote_task: self.remote,
        }
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("file_base_name", &self.file_base_name)
            .field("status", &self.status)
            .field("remote", &self.remote)
            .field("output_path", &self.output_path)
            .field("session", &self.session)
            .field("probing", &self.probe.is_some())
            .finish()
    }
}

/// Serializable view of a task, as sent to clients
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TaskSnapshot {
    pub file_base_name: String,
    pub before: InputMetadata,
    pub after: OutputParams,
    #[serde(rename = "paraArray")]
    pub command_arguments: Vec<String>,
    pub status: TaskStatus,
    #[serde(rename = "progressLog")]
    pub progress: ProgressLedger,
    #[serde(rename = "cmdData")]
    pub cmd_text: String,
    pub error_info: Vec<String>,
    #[serde(rename = "outputFile")]
    pub output_path: String,
    pub remote_task: bool,
}
