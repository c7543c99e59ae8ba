use super::registry::TaskRegistry;
use super::types::{TaskId, TaskStatus};
use serde::{Deserialize, Serialize};

/// Whether the queue is processing tasks
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkingStatus {
    #[default]
    Idle,
    Running,
}

/// Queue state change reported to clients.
///
/// `Stop` and `Pause` are both a transition to idle; clients need to know
/// which one happened.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QueueSignal {
    Start,
    Stop,
    Pause,
}

/// How a queued task gets a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Start(TaskId),
    Resume(TaskId),
}

impl Admission {
    pub fn task_id(&self) -> TaskId {
        match self {
            Admission::Start(id) | Admission::Resume(id) => *id,
        }
    }
}

/// Greedy, id-ordered admission under a fixed concurrency limit
#[derive(Debug, Clone)]
pub struct QueueScheduler {
    status: WorkingStatus,
    limit: usize,
}

impl QueueScheduler {
    pub fn new(limit: usize) -> Self {
        Self {
            status: WorkingStatus::Idle,
            limit: limit.max(1),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn status(&self) -> WorkingStatus {
        self.status
    }

    pub fn is_running(&self) -> bool {
        self.status == WorkingStatus::Running
    }

    pub fn set_status(&mut self, status: WorkingStatus) {
        self.status = status;
    }

    pub fn has_capacity(&self, running: usize) -> bool {
        running < self.limit
    }

    /// Queued tasks in admission order
    pub fn candidates(&self, registry: &TaskRegistry) -> Vec<Admission> {
        registry
            .iter()
            .filter_map(|(id, task)| match task.status {
                TaskStatus::IdleQueued => Some(Admission::Start(id)),
                TaskStatus::PausedQueued => Some(Admission::Resume(id)),
                _ => None,
            })
            .collect()
    }

    /// Move idle and paused tasks into their queued states; returns the ids touched
    pub fn enqueue_all(&self, registry: &mut TaskRegistry) -> Vec<TaskId> {
        let mut touched = Vec::new();
        for id in registry.ids() {
            let Some(task) = registry.get_mut(id) else {
                continue;
            };
            task.status = match task.status {
                TaskStatus::Idle => TaskStatus::IdleQueued,
                TaskStatus::Paused => TaskStatus::PausedQueued,
                _ => continue,
            };
            touched.push(id);
        }
        touched
    }
}
