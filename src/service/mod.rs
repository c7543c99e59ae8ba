//! # Transcode Service
//!
//! Owns every task's status and drives the encoder processes behind them.
//!
//! ## Core Components
//!
//! - **[`TranscodeService`]**: The task state machine, queue admission and
//!   encoder event handling. All transitions take `&mut self` and run to
//!   completion before the next one starts.
//! - **[`ServiceCommand`]**: Calls issued by transports, decoded from
//!   `{function, args}` invocations
//! - **[`ServiceHandle`]**: Cloneable front door to a service running on its
//!   own tokio task
//!
//! ## Inputs
//!
//! ```text
//! ServiceCommand ──────────┐
//! EncoderMessage ──────────┼──> TranscodeService ──> EventBus ──> handlers
//! deferred work (timers,   │          │
//!   chunk merges) ─────────┘          └──> Encoder (spawn / pause / exit / kill)
//! ```
//!
//! Encoder processes report asynchronously. A session's exit callback is
//! modeled as a pending [`ExitAction`] that runs when the process reports its
//! terminal event, so nothing ever blocks inside a transition.

use crate::clock::{Clock, SystemClock};
use crate::config::ServiceConfig;
use crate::encoder::{
    self, Encoder, EncoderCommand, EncoderEvent, EncoderEvents, EncoderMessage, EncoderMode,
    EncoderProgress, EventOrigin, ProbeMetadata,
};
use crate::event::{EventBus, ServiceEvent, ServiceEventHandler};
use crate::notification::{Notification, NotificationId, NotificationLevel, NotificationLog};
use crate::task::{
    self, EncoderSession, ExitAction, OutputParams, QueueScheduler, QueueSignal, Task, TaskId,
    TaskRef, TaskRegistry, TaskStatus, Transition, WorkingStatus,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

pub mod actor;
pub mod command;
pub mod upload;

pub use actor::ServiceHandle;
pub use command::{ServiceCommand, ServiceError};

/// Work the service schedules for itself
#[derive(Debug)]
pub(crate) enum InternalMessage {
    /// Delete a task whose input could not be probed
    DeleteTask(TaskId),
    /// Uploaded chunks have been concatenated
    ChunksMerged {
        task_id: TaskId,
        result: Result<PathBuf, String>,
    },
}

/// Whether a failed start should refill the queue itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StartOrigin {
    User,
    Admission,
}

pub struct TranscodeService {
    config: ServiceConfig,
    registry: TaskRegistry,
    scheduler: QueueScheduler,
    notifications: NotificationLog,
    events: EventBus,
    encoder: Arc<dyn Encoder>,
    clock: Arc<dyn Clock>,
    encoder_path: PathBuf,
    encoder_version: Option<String>,
    encoder_tx: mpsc::UnboundedSender<EncoderMessage>,
    encoder_rx: mpsc::UnboundedReceiver<EncoderMessage>,
    internal_tx: mpsc::UnboundedSender<InternalMessage>,
    internal_rx: mpsc::UnboundedReceiver<InternalMessage>,
    next_generation: u64,
}

impl TranscodeService {
    pub fn new(config: ServiceConfig, encoder: Arc<dyn Encoder>) -> Self {
        let (encoder_tx, encoder_rx) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let encoder_path = encoder::locate_binary(config.encoder.path.as_deref());
        let scheduler = QueueScheduler::new(config.concurrency_limit());

        Self {
            config,
            registry: TaskRegistry::new(),
            scheduler,
            notifications: NotificationLog::new(),
            events: EventBus::new(),
            encoder,
            clock: Arc::new(SystemClock),
            encoder_path,
            encoder_version: None,
            encoder_tx,
            encoder_rx,
            internal_tx,
            internal_rx,
            next_generation: 0,
        }
    }

    /// Replace the wall clock
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn add_event_handler(&mut self, handler: Box<dyn ServiceEventHandler>) {
        self.events.add_handler(handler);
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.registry.get(id)
    }

    pub fn task_ids(&self) -> Vec<TaskId> {
        self.registry.ids()
    }

    pub fn notifications(&self) -> &NotificationLog {
        &self.notifications
    }

    pub fn working_status(&self) -> WorkingStatus {
        self.scheduler.status()
    }

    pub fn encoder_path(&self) -> &Path {
        &self.encoder_path
    }

    pub fn encoder_version(&self) -> Option<&str> {
        self.encoder_version.as_deref()
    }

    // ------------------------------------------------------------------
    // Encoder setup
    // ------------------------------------------------------------------

    /// Locate the encoder and ask it for its version
    pub fn init_encoder(&mut self) {
        self.encoder_path = encoder::locate_binary(self.config.encoder.path.as_deref());
        info!("Using encoder at {:?}", self.encoder_path);

        let command = EncoderCommand::new(
            self.encoder_path.clone(),
            EncoderMode::Version,
            vec!["-version".to_string()],
        );
        let events = EncoderEvents::new(EventOrigin::Version, self.encoder_tx.clone());
        if let Err(e) = self.encoder.spawn(command, events) {
            warn!("Encoder version check failed: {}", e);
            self.record_version(None);
        }
    }

    pub fn emit_encoder_version(&self) {
        self.emit(ServiceEvent::FfmpegVersion {
            content: self.encoder_version.clone().unwrap_or_default(),
        });
    }

    fn record_version(&mut self, version: Option<String>) {
        self.encoder_version = Some(version.unwrap_or_default());
        self.emit_encoder_version();
    }

    // ------------------------------------------------------------------
    // Task creation
    // ------------------------------------------------------------------

    /// Add a task. Local inputs start `idle` and are probed in the
    /// background; remote ones wait in `initializing` for their upload.
    pub fn task_add(&mut self, name: &str, params: OutputParams) -> TaskId {
        let mut task = Task::new(name, params);
        let input = task.after.primary_input().map(str::to_string);

        match &input {
            Some(_) => {
                let output = task::local_output_path(&task.after);
                task.command_arguments = task::command_arguments(&task.after, &output);
            }
            None => {
                let base = task::generate_remote_base(self.now_millis());
                task.output_path = task::remote_output_name(&task.after, &base);
                task.command_arguments =
                    task::command_arguments(&task.after, &task.output_path);
            }
        }

        let id = self.registry.add(task);
        info!(
            "[task {}] added: {} ({})",
            id,
            name,
            if input.is_some() { "local" } else { "remote" }
        );

        if let Some(path) = input {
            self.probe_input(id, &path);
        }
        self.emit_task_list();
        id
    }

    fn probe_input(&mut self, id: TaskId, path: &str) {
        info!("[task {}] reading input metadata", id);
        let command = EncoderCommand::new(
            self.encoder_path.clone(),
            EncoderMode::Probe,
            vec!["-hide_banner".to_string(), "-i".to_string(), path.to_string()],
        );
        let events =
            EncoderEvents::new(EventOrigin::Probe { task_id: id }, self.encoder_tx.clone());

        match self.encoder.spawn(command, events) {
            Ok(control) => {
                if let Some(task) = self.registry.get_mut(id) {
                    task.probe = Some(control);
                }
            }
            Err(e) => self.probe_failed(id, path, &e.to_string()),
        }
    }

    fn probe_failed(&mut self, id: TaskId, path: &str, reason: &str) {
        warn!("[task {}] input probe failed: {}", id, reason);
        self.notify(
            TaskRef::Task(id),
            format!("{}: {}", path, reason),
            NotificationLevel::Warning,
        );

        let grace = self.config.probe_failure_grace();
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            let _ = tx.send(InternalMessage::DeleteTask(id));
        });
    }

    /// Attach uploaded chunks to a remote task
    pub fn merge_uploaded(&mut self, id: TaskId, hashes: &[String]) {
        let Some(task) = self.registry.get(id) else {
            // Deleted before its upload finished
            debug!("[task {}] upload merged for a removed task", id);
            return;
        };
        let upload_dir = self.config.storage.upload_dir.clone();

        match hashes {
            [] => {
                error!("[task {}] merge: no uploaded chunks", id);
            }
            [hash] => {
                let path = crate::env::upload_chunk_path(&upload_dir, hash);
                self.finish_upload(id, path);
            }
            _ => {
                let dest = upload_dir.join(&task.file_base_name);
                let hashes = hashes.to_vec();
                let tx = self.internal_tx.clone();
                info!("[task {}] merging {} uploaded chunks", id, hashes.len());
                tokio::task::spawn_blocking(move || {
                    let result = upload::merge_chunks(&upload_dir, &hashes, &dest)
                        .map_err(|e| e.to_string());
                    let _ = tx.send(InternalMessage::ChunksMerged {
                        task_id: id,
                        result,
                    });
                });
            }
        }
    }

    fn finish_upload(&mut self, id: TaskId, input: PathBuf) {
        let input = input.to_string_lossy().into_owned();
        let Some(task) = self.registry.get_mut(id) else {
            return;
        };
        task.after.set_primary_input(input.clone());
        task.status = TaskStatus::Idle;
        task.command_arguments = task::command_arguments(&task.after, &task.output_path);
        let name = task.file_base_name.clone();

        info!("[task {}] upload complete", id);
        self.probe_input(id, &input);
        self.notify(
            TaskRef::Task(id),
            format!("Input of task \"{}\" uploaded", name),
            NotificationLevel::Info,
        );
        self.emit_task_update(TaskRef::Task(id));
    }

    // ------------------------------------------------------------------
    // Task transitions
    // ------------------------------------------------------------------

    fn check_transition(&self, id: TaskId, transition: Transition) -> Option<TaskStatus> {
        let Some(task) = self.registry.get(id) else {
            error!("[task {}] {}: no such task", id, transition.name());
            return None;
        };
        if transition.is_legal_from(task.status) {
            info!("[task {}] {}", id, transition.name());
        } else {
            warn!(
                "[task {}] {}: not expected from {}, applying anyway",
                id,
                transition.name(),
                task.status
            );
        }
        Some(task.status)
    }

    /// Remove a task. A live process is killed first.
    pub fn task_delete(&mut self, id: TaskId) {
        if self.check_transition(id, Transition::Delete).is_none() {
            return;
        }
        let Some(mut task) = self.registry.remove(id) else {
            return;
        };
        task.status = TaskStatus::Deleted;

        let had_session = match task.session.take() {
            Some(mut session) => {
                if let Err(e) = session.force_kill(ExitAction::ClearAfterKill) {
                    warn!("[task {}] failed to kill encoder: {}", id, e);
                }
                true
            }
            None => false,
        };
        if let Some(mut probe) = task.probe.take()
            && let Err(e) = probe.force_kill()
        {
            debug!("[task {}] failed to kill probe: {}", id, e);
        }

        self.emit_task_list();
        if had_session {
            self.queue_assign();
        }
    }

    pub fn task_start(&mut self, id: TaskId) {
        self.start_task(id, StartOrigin::User);
    }

    fn start_task(&mut self, id: TaskId, origin: StartOrigin) {
        if self.check_transition(id, Transition::Start).is_none() {
            return;
        }
        let now = self.clock.now_secs();
        let policy = self.config.policy.clone();
        let download_dir = self.config.storage.download_dir.clone();
        let generation = self.next_generation;
        self.next_generation += 1;

        let Some(task) = self.registry.get_mut(id) else {
            return;
        };
        if let Some(mut stale) = task.session.take() {
            warn!("[task {}] replacing a live encoder session", id);
            if let Err(e) = stale.force_kill(ExitAction::ClearAfterKill) {
                warn!("[task {}] failed to kill previous encoder: {}", id, e);
            }
        }
        task.status = TaskStatus::Running;
        task.progress.start(now);
        task.error_info.clear();

        let mut clamped = None;
        if policy.is_restricted() && task.after.video.ratecontrol.is_bitrate() {
            clamped = policy.clamp_rate_value(task.after.video.ratevalue);
            if let Some(value) = clamped {
                task.after.video.ratevalue = value;
            }
        }

        let output = if task.is_remote() {
            download_dir
                .join(&task.output_path)
                .to_string_lossy()
                .into_owned()
        } else {
            task.output_path = task::local_output_path(&task.after);
            task.output_path.clone()
        };
        let args = task::command_arguments(&task.after, &output);
        let name = task.file_base_name.clone();

        self.emit(ServiceEvent::ProgressUpdate {
            task_id: TaskRef::Task(id),
            time: now,
            status: None,
        });
        self.set_cmd_text(TaskRef::Task(id), "", false);
        if clamped.is_some() {
            warn!("[task {}] video bitrate limited by the current tier", id);
            self.notify(
                TaskRef::Task(id),
                format!(
                    "Video bitrate of task \"{}\" was limited: ABR/CBR supports {} kbps to {} kbps at this tier",
                    name,
                    task::video_bitrate_kbps(policy.rate_value_min),
                    task::video_bitrate_kbps(policy.rate_value_max)
                ),
                NotificationLevel::Warning,
            );
        }

        let command = EncoderCommand::new(self.encoder_path.clone(), EncoderMode::Transcode, args);
        debug!("[task {}] {}", id, command.command_line());
        let events = EncoderEvents::new(
            EventOrigin::Session {
                task_id: id,
                generation,
            },
            self.encoder_tx.clone(),
        );

        match self.encoder.spawn(command, events) {
            Ok(control) => {
                if let Some(task) = self.registry.get_mut(id) {
                    task.session = Some(EncoderSession::new(generation, control));
                }
            }
            Err(e) => {
                error!("[task {}] failed to start encoder: {}", id, e);
                if let Some(task) = self.registry.get_mut(id) {
                    task.status = TaskStatus::Error;
                    task.error_info.push(e.to_string());
                }
                self.notify(
                    TaskRef::Task(id),
                    format!("Task \"{}\" could not start: {}", name, e),
                    NotificationLevel::Error,
                );
                self.emit_task_update(TaskRef::Task(id));
                if origin == StartOrigin::User {
                    self.queue_assign();
                }
                return;
            }
        }

        self.emit_task_update(TaskRef::Task(id));
        self.mark_queue_started();
    }

    pub fn task_pause(&mut self, id: TaskId) {
        let Some(task) = self.registry.get(id) else {
            error!("[task {}] pause: no such task", id);
            return;
        };
        if !task.has_session() {
            error!("[task {}] pause: no encoder running, ignored", id);
            return;
        }
        let Some(previous) = self.check_transition(id, Transition::Pause) else {
            return;
        };
        let now = self.clock.now_secs();
        let Some(task) = self.registry.get_mut(id) else {
            return;
        };
        task.status = TaskStatus::Paused;
        if let Some(session) = task.session.as_mut()
            && let Err(e) = session.pause()
        {
            warn!("[task {}] failed to pause encoder: {}", id, e);
        }
        // Only a running interval adds to elapsed
        if previous == TaskStatus::Running {
            task.progress.pause(now);
        }

        self.emit_task_update(TaskRef::Task(id));
        self.queue_assign();
    }

    pub fn task_resume(&mut self, id: TaskId) {
        let Some(task) = self.registry.get(id) else {
            error!("[task {}] resume: no such task", id);
            return;
        };
        if !task.has_session() {
            error!("[task {}] resume: no encoder running, ignored", id);
            return;
        }
        let Some(previous) = self.check_transition(id, Transition::Resume) else {
            return;
        };
        let now = self.clock.now_secs();
        let Some(task) = self.registry.get_mut(id) else {
            return;
        };
        task.status = TaskStatus::Running;
        if previous != TaskStatus::Running {
            task.progress.resume(now);
        }
        if let Some(session) = task.session.as_mut()
            && let Err(e) = session.resume()
        {
            warn!("[task {}] failed to resume encoder: {}", id, e);
        }

        self.emit_task_update(TaskRef::Task(id));
        self.mark_queue_started();
    }

    /// Stop gracefully, or force when already stopping, or just go back to idle
    pub fn task_reset(&mut self, id: TaskId) {
        let Some(task) = self.registry.get_mut(id) else {
            error!("[task {}] reset: no such task", id);
            return;
        };

        match task.status {
            TaskStatus::Paused | TaskStatus::PausedQueued | TaskStatus::Running => {
                info!("[task {}] reset: stopping gracefully", id);
                task.status = TaskStatus::Stopping;
                self.request_exit(id, ExitAction::ResetToIdle, false);
            }
            TaskStatus::Stopping => {
                info!("[task {}] reset: killing encoder", id);
                task.status = TaskStatus::Idle;
                self.request_exit(id, ExitAction::ClearAfterKill, true);
            }
            TaskStatus::IdleQueued | TaskStatus::Finished | TaskStatus::Error => {
                info!("[task {}] reset to idle", id);
                task.status = TaskStatus::Idle;
                self.queue_assign();
            }
            status => {
                error!("[task {}] reset: not possible from {}, ignored", id, status);
            }
        }
        self.emit_task_update(TaskRef::Task(id));
    }

    /// Stop a task that hit the duration ceiling; it ends up in `error`
    pub fn trial_limit_stop(&mut self, id: TaskId, by_frontend: bool) {
        let Some(task) = self.registry.get_mut(id) else {
            error!("[task {}] duration limit stop: no such task", id);
            return;
        };
        task.status = TaskStatus::Stopping;
        let name = task.file_base_name.clone();
        let ceiling = self.config.policy.duration_ceiling_secs;

        warn!(
            "[task {}] duration limit reached ({})",
            id,
            if by_frontend { "frontend" } else { "backend" }
        );
        self.notify(
            TaskRef::Task(id),
            format!(
                "Task \"{}\" reached the duration limit ({}): this tier supports up to {} of media and {} of processing time",
                name,
                if by_frontend { "frontend" } else { "backend" },
                format_clock(ceiling),
                format_clock(ceiling)
            ),
            NotificationLevel::Error,
        );
        self.emit_task_update(TaskRef::Task(id));
        self.request_exit(id, ExitAction::FailWithError, false);
    }

    /// Ask the session to exit (or kill it); `action` runs once it is gone.
    /// Without a session, or if the request fails, `action` runs right away.
    fn request_exit(&mut self, id: TaskId, action: ExitAction, force: bool) {
        let Some(task) = self.registry.get_mut(id) else {
            return;
        };
        let result = match task.session.as_mut() {
            Some(session) if force => session.force_kill(action),
            Some(session) => session.exit(action),
            None => {
                warn!("[task {}] no encoder session to stop", id);
                self.complete_exit(id, action);
                return;
            }
        };
        if let Err(e) = result {
            warn!("[task {}] failed to stop encoder: {}", id, e);
            self.complete_exit(id, action);
        }
    }

    fn complete_exit(&mut self, id: TaskId, action: ExitAction) {
        let Some(task) = self.registry.get_mut(id) else {
            return;
        };
        task.session = None;
        match action {
            ExitAction::ResetToIdle => task.status = TaskStatus::Idle,
            ExitAction::FailWithError => task.status = TaskStatus::Error,
            ExitAction::ClearAfterKill => {}
        }
        debug!("[task {}] encoder exited, now {}", id, task.status);
        self.emit_task_update(TaskRef::Task(id));
        self.queue_assign();
    }

    // ------------------------------------------------------------------
    // Queue
    // ------------------------------------------------------------------

    /// Queue every idle and paused task and fill the free slots
    pub fn queue_start(&mut self) {
        info!("Queue started");
        self.scheduler.set_status(WorkingStatus::Running);
        self.scheduler.enqueue_all(&mut self.registry);

        if self.queue_assign() > 0 {
            self.emit_working_status(QueueSignal::Start);
        }
        for id in self
            .registry
            .ids_with_status(&[TaskStatus::IdleQueued, TaskStatus::PausedQueued])
        {
            self.emit_task_update(TaskRef::Task(id));
        }
    }

    /// Pause running tasks and take waiting ones off the queue
    pub fn queue_pause(&mut self) {
        info!("Queue paused");
        if self.scheduler.is_running() {
            self.emit_working_status(QueueSignal::Pause);
        }
        self.scheduler.set_status(WorkingStatus::Idle);

        for id in self.registry.ids() {
            let status = self.registry.get(id).map(|t| t.status);
            match status {
                Some(TaskStatus::Running | TaskStatus::PausedQueued) => self.task_pause(id),
                Some(TaskStatus::IdleQueued) => self.task_reset(id),
                _ => {}
            }
        }
    }

    /// Admission pass; returns the number of running tasks afterwards
    fn queue_assign(&mut self) -> usize {
        if !self.scheduler.is_running() {
            return 0;
        }

        let mut running = self.registry.count_with_status(TaskStatus::Running);
        let candidates = self.scheduler.candidates(&self.registry);
        for admission in candidates {
            if !self.scheduler.has_capacity(running) {
                break;
            }
            let id = admission.task_id();
            match admission {
                task::Admission::Start(_) => self.start_task(id, StartOrigin::Admission),
                task::Admission::Resume(_) => self.task_resume(id),
            }
            if self.registry.get(id).map(|t| t.status) == Some(TaskStatus::Running) {
                running += 1;
            }
        }

        if running == 0 {
            info!("Queue finished");
            self.scheduler.set_status(WorkingStatus::Idle);
            self.emit_working_status(QueueSignal::Stop);
        }
        running
    }

    fn mark_queue_started(&mut self) {
        if !self.scheduler.is_running() {
            self.scheduler.set_status(WorkingStatus::Running);
            self.emit_working_status(QueueSignal::Start);
        }
    }

    // ------------------------------------------------------------------
    // Parameters, command text, notifications
    // ------------------------------------------------------------------

    /// Replace output settings, keeping each task's input files
    pub fn set_parameters(&mut self, ids: &[TaskRef], params: &OutputParams) {
        let now_millis = self.now_millis();
        for &id in ids {
            let Some(task) = self.registry.resolve_mut(id) else {
                error!("[task {}] set parameters: no such task", id);
                continue;
            };
            task.after = params.merged_into(&task.after);
            if task.is_remote() {
                let base = task::generate_remote_base(now_millis);
                task.output_path = task::remote_output_name(&task.after, &base);
                task.command_arguments =
                    task::command_arguments(&task.after, &task.output_path);
            } else {
                let output = task::local_output_path(&task.after);
                task.command_arguments = task::command_arguments(&task.after, &output);
            }
            self.emit_task_update(id);
        }
    }

    /// Append to or replace a task's command text
    pub fn set_cmd_text(&mut self, id: TaskRef, content: &str, append: bool) {
        let Some(task) = self.registry.resolve_mut(id) else {
            return;
        };
        if append {
            task.append_cmd_text(content);
        } else {
            task.cmd_text = content.to_string();
        }
        self.emit(ServiceEvent::CmdUpdate {
            task_id: id,
            content: content.to_string(),
            append,
        });
    }

    fn notify(&mut self, task_id: TaskRef, content: String, level: NotificationLevel) {
        let notification = Notification {
            time: self.clock.now().timestamp_millis(),
            task_id,
            content,
            level,
        };
        let id = self.notifications.push(notification.clone());
        self.emit(ServiceEvent::NotificationUpdate {
            notification_id: id,
            notification: Some(notification),
        });
    }

    pub fn delete_notification(&mut self, id: NotificationId) {
        if self.notifications.delete(id).is_none() {
            debug!("Notification {} already gone", id);
        }
        self.emit(ServiceEvent::NotificationUpdate {
            notification_id: id,
            notification: None,
        });
    }

    // ------------------------------------------------------------------
    // Encoder events
    // ------------------------------------------------------------------

    pub fn handle_encoder_message(&mut self, message: EncoderMessage) {
        match message.origin {
            EventOrigin::Version => self.on_version_event(message.event),
            EventOrigin::Probe { task_id } => self.on_probe_event(task_id, message.event),
            EventOrigin::Session {
                task_id,
                generation,
            } => self.on_session_event(task_id, generation, message.event),
        }
    }

    fn on_version_event(&mut self, event: EncoderEvent) {
        match event {
            EncoderEvent::Data(text) => self.set_cmd_text(TaskRef::Template, &text, true),
            EncoderEvent::Version(version) => self.record_version(version),
            _ => {}
        }
    }

    fn on_probe_event(&mut self, id: TaskId, event: EncoderEvent) {
        if !self.registry.contains(id) {
            return;
        }
        match event {
            EncoderEvent::Data(text) => self.set_cmd_text(TaskRef::Task(id), &text, true),
            EncoderEvent::Metadata(metadata) => self.on_metadata(id, &metadata),
            EncoderEvent::Critical(errors) => {
                let path = self
                    .registry
                    .get_mut(id)
                    .and_then(|task| {
                        task.probe = None;
                        task.after.primary_input().map(str::to_string)
                    })
                    .unwrap_or_default();
                self.probe_failed(id, &path, &errors.concat());
            }
            event if event.is_terminal() => {
                if let Some(task) = self.registry.get_mut(id) {
                    task.probe = None;
                }
            }
            _ => {}
        }
    }

    fn on_metadata(&mut self, id: TaskId, metadata: &ProbeMetadata) {
        let Some(task) = self.registry.get_mut(id) else {
            return;
        };
        if task.before.populate(metadata) {
            debug!("[task {}] input metadata: {:?}", id, task.before);
            self.emit_task_update(TaskRef::Task(id));
        }
    }

    fn on_session_event(&mut self, id: TaskId, generation: u64, event: EncoderEvent) {
        let Some(session) = self.registry.get(id).and_then(|t| t.session()) else {
            debug!("[task {}] event from a finished encoder dropped", id);
            return;
        };
        if session.generation() != generation {
            debug!("[task {}] event from a replaced encoder dropped", id);
            return;
        }
        let pending = session.pending_exit();

        match event {
            EncoderEvent::Data(text) => self.set_cmd_text(TaskRef::Task(id), &text, true),
            EncoderEvent::Status(progress) if pending.is_none() => self.on_progress(id, progress),
            EncoderEvent::Warning(text) => {
                let name = self.task_name(id);
                self.notify(
                    TaskRef::Task(id),
                    format!("{}: {}", name, text),
                    NotificationLevel::Warning,
                );
            }
            event if event.is_terminal() => match pending {
                Some(action) => self.complete_exit(id, action),
                None => self.on_terminal(id, event),
            },
            _ => {}
        }
    }

    fn on_progress(&mut self, id: TaskId, progress: EncoderProgress) {
        let now = self.clock.now_secs();
        let policy = &self.config.policy;
        let Some(task) = self.registry.get_mut(id) else {
            return;
        };
        if task.status != TaskStatus::Running {
            debug!("[task {}] progress while {} dropped", id, task.status);
            return;
        }
        let time = task.progress.record(now, &progress);

        if policy.is_restricted() {
            let media = task.progress.latest_media_time().unwrap_or_default();
            let running = task.progress.running_secs(now);
            if policy.exceeds_ceiling(media, running) {
                self.trial_limit_stop(id, false);
                return;
            }
        }

        self.emit(ServiceEvent::ProgressUpdate {
            task_id: TaskRef::Task(id),
            time,
            status: Some(progress),
        });
    }

    fn on_terminal(&mut self, id: TaskId, event: EncoderEvent) {
        let now = self.clock.now_secs();
        let Some(task) = self.registry.get_mut(id) else {
            return;
        };
        task.session = None;
        let name = task.file_base_name.clone();

        let (content, level) = match event {
            EncoderEvent::Finished => {
                info!("[task {}] finished: {}", id, name);
                if task.status == TaskStatus::Running {
                    task.progress.finish(now);
                }
                task.status = TaskStatus::Finished;
                (
                    format!("Task \"{}\" finished", name),
                    NotificationLevel::Ok,
                )
            }
            EncoderEvent::Critical(errors) => {
                error!("[task {}] failed: {}", id, name);
                task.status = TaskStatus::Error;
                let detail = errors.concat();
                task.error_info.extend(errors);
                (
                    format!(
                        "Task \"{}\" failed. {} See the command output for details.",
                        name, detail
                    ),
                    NotificationLevel::Error,
                )
            }
            _ => {
                error!("[task {}] encoder exited unexpectedly: {}", id, name);
                task.status = TaskStatus::Error;
                (
                    format!(
                        "Task \"{}\" stopped unexpectedly. See the command output for details.",
                        name
                    ),
                    NotificationLevel::Error,
                )
            }
        };

        self.notify(TaskRef::Task(id), content, level);
        self.emit_task_update(TaskRef::Task(id));
        self.queue_assign();
    }

    // ------------------------------------------------------------------
    // Internal work and event draining
    // ------------------------------------------------------------------

    pub(crate) fn handle_internal(&mut self, message: InternalMessage) {
        match message {
            InternalMessage::DeleteTask(id) => {
                if self.registry.contains(id) {
                    self.task_delete(id);
                }
            }
            InternalMessage::ChunksMerged { task_id, result } => {
                if !self.registry.contains(task_id) {
                    return;
                }
                match result {
                    Ok(path) => self.finish_upload(task_id, path),
                    Err(e) => {
                        error!("[task {}] merging uploaded chunks failed: {}", task_id, e);
                        let name = self.task_name(task_id);
                        self.notify(
                            TaskRef::Task(task_id),
                            format!("{}: failed to merge uploaded file: {}", name, e),
                            NotificationLevel::Error,
                        );
                    }
                }
            }
        }
    }

    /// Handle everything already queued on the internal channels without
    /// waiting; returns how many messages were processed
    pub fn process_pending_events(&mut self) -> usize {
        let mut processed = 0;
        loop {
            if let Ok(message) = self.encoder_rx.try_recv() {
                self.handle_encoder_message(message);
            } else if let Ok(message) = self.internal_rx.try_recv() {
                self.handle_internal(message);
            } else {
                return processed;
            }
            processed += 1;
        }
    }

    /// Kill every live encoder process
    pub fn shutdown(&mut self) {
        for id in self.registry.ids() {
            let Some(task) = self.registry.get_mut(id) else {
                continue;
            };
            if let Some(session) = task.session.as_mut()
                && let Err(e) = session.force_kill(ExitAction::ClearAfterKill)
            {
                warn!("[task {}] failed to kill encoder on shutdown: {}", id, e);
            }
            if let Some(mut probe) = task.probe.take() {
                let _ = probe.force_kill();
            }
        }
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn emit(&self, event: ServiceEvent) {
        self.events.emit(event);
    }

    fn emit_task_list(&self) {
        self.emit(ServiceEvent::TasklistUpdate {
            content: self.registry.ids(),
        });
    }

    fn emit_task_update(&self, id: TaskRef) {
        if let Some(task) = self.registry.resolve(id) {
            self.emit(ServiceEvent::TaskUpdate {
                task_id: id,
                task: Box::new(task.snapshot()),
            });
        }
    }

    fn emit_working_status(&self, value: QueueSignal) {
        self.emit(ServiceEvent::WorkingStatusUpdate { value });
    }

    fn task_name(&self, id: TaskId) -> String {
        self.registry
            .get(id)
            .map(|t| t.file_base_name.clone())
            .unwrap_or_default()
    }

    fn now_millis(&self) -> i64 {
        self.clock.now().timestamp_millis()
    }
}

impl std::fmt::Debug for TranscodeService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TranscodeService")
            .field("tasks", &self.registry.len())
            .field("working_status", &self.scheduler.status())
            .field("encoder_path", &self.encoder_path)
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}

/// Seconds as `m:ss`
fn format_clock(secs: f64) -> String {
    let total = secs.max(0.0).round() as u64;
    format!("{}:{:02}", total / 60, total % 60)
}
