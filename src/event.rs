//! Service events and their fan-out.
//!
//! Every state change the service applies produces exactly one
//! [`ServiceEvent`]. The [`EventBus`] hands it to each registered handler,
//! synchronously and in registration order.

use crate::encoder::EncoderProgress;
use crate::notification::{Notification, NotificationId};
use crate::task::{QueueSignal, TaskId, TaskRef, TaskSnapshot};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, error, info};

/// Events pushed to clients, serialized as `{"event": name, "payload": {...}}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "payload",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum ServiceEvent {
    /// Encoder version, empty when unavailable
    FfmpegVersion { content: String },
    WorkingStatusUpdate { value: QueueSignal },
    /// Current task ids, template excluded
    TasklistUpdate { content: Vec<TaskId> },
    TaskUpdate {
        task_id: TaskRef,
        task: Box<TaskSnapshot>,
    },
    /// Command text; `append` tells an increment from a replacement
    CmdUpdate {
        task_id: TaskRef,
        content: String,
        append: bool,
    },
    /// A progress sample; no status means the ledger was cleared
    ProgressUpdate {
        task_id: TaskRef,
        time: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<EncoderProgress>,
    },
    /// A new notification; none means it was deleted
    NotificationUpdate {
        notification_id: NotificationId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        notification: Option<Notification>,
    },
}

impl ServiceEvent {
    /// Wire name of the event
    pub fn name(&self) -> &'static str {
        match self {
            ServiceEvent::FfmpegVersion { .. } => "ffmpegVersion",
            ServiceEvent::WorkingStatusUpdate { .. } => "workingStatusUpdate",
            ServiceEvent::TasklistUpdate { .. } => "tasklistUpdate",
            ServiceEvent::TaskUpdate { .. } => "taskUpdate",
            ServiceEvent::CmdUpdate { .. } => "cmdUpdate",
            ServiceEvent::ProgressUpdate { .. } => "progressUpdate",
            ServiceEvent::NotificationUpdate { .. } => "notificationUpdate",
        }
    }
}

/// Receives every service event
pub trait ServiceEventHandler: Send {
    fn handle_event(&self, event: &ServiceEvent) -> Result<()>;
}

/// Ordered list of handlers
#[derive(Default)]
pub struct EventBus {
    handlers: Vec<Box<dyn ServiceEventHandler>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_handler(&mut self, handler: Box<dyn ServiceEventHandler>) {
        self.handlers.push(handler);
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.len()
    }

    /// Deliver to every handler; a failing handler does not stop the others
    pub fn emit(&self, event: ServiceEvent) {
        for handler in &self.handlers {
            if let Err(e) = handler.handle_event(&event) {
                error!("Event handler error ({}): {}", event.name(), e);
            }
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

/// Logs every event
pub struct LoggingEventHandler;

impl ServiceEventHandler for LoggingEventHandler {
    fn handle_event(&self, event: &ServiceEvent) -> Result<()> {
        match event {
            ServiceEvent::FfmpegVersion { content } => {
                info!("Encoder version: {:?}", content);
            }
            ServiceEvent::WorkingStatusUpdate { value } => {
                info!("Queue status: {:?}", value);
            }
            ServiceEvent::TasklistUpdate { content } => {
                info!("Task list: {:?}", content);
            }
            ServiceEvent::TaskUpdate { task_id, task } => {
                info!("[task {}] status: {}", task_id, task.status);
            }
            ServiceEvent::CmdUpdate { task_id, content, .. } => {
                debug!("[task {}] {}", task_id, content);
            }
            ServiceEvent::ProgressUpdate {
                task_id,
                time,
                status,
            } => match status {
                Some(status) => debug!(
                    "[task {}] progress at {:.1}s: media time {:.1}s, frame {}",
                    task_id, time, status.time, status.frame
                ),
                None => debug!("[task {}] progress cleared", task_id),
            },
            ServiceEvent::NotificationUpdate {
                notification_id,
                notification,
            } => match notification {
                Some(n) => info!(
                    "Notification {} [task {}] ({:?}): {}",
                    notification_id, n.task_id, n.level, n.content
                ),
                None => info!("Notification {} deleted", notification_id),
            },
        }
        Ok(())
    }
}

/// Forwards events to a broadcast channel for transports
pub struct ChannelEventHandler {
    tx: broadcast::Sender<ServiceEvent>,
}

impl ChannelEventHandler {
    pub fn new(tx: broadcast::Sender<ServiceEvent>) -> Self {
        Self { tx }
    }

    /// Handler with a fresh channel of the given capacity, plus its first receiver
    pub fn channel(capacity: usize) -> (Self, broadcast::Receiver<ServiceEvent>) {
        let (tx, rx) = broadcast::channel(capacity);
        (Self { tx }, rx)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServiceEvent> {
        self.tx.subscribe()
    }
}

impl ServiceEventHandler for ChannelEventHandler {
    fn handle_event(&self, event: &ServiceEvent) -> Result<()> {
        // No subscribers is not an error
        let _ = self.tx.send(event.clone());
        Ok(())
    }
}
