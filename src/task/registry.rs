use super::params::OutputParams;
use super::types::{Task, TaskId, TaskRef, TaskStatus};
use std::collections::BTreeMap;

/// Sparse id-to-task map plus the template task.
///
/// Ids are handed out in ascending order and never reused, so iteration order
/// is creation order. The template task is kept apart and never listed.
#[derive(Debug)]
pub struct TaskRegistry {
    tasks: BTreeMap<TaskId, Task>,
    template: Task,
    next_id: TaskId,
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskRegistry {
    pub fn new() -> Self {
        let mut template = Task::new("", OutputParams::default());
        template.status = TaskStatus::Idle;
        Self {
            tasks: BTreeMap::new(),
            template,
            next_id: 0,
        }
    }

    /// Store a task under the next free id
    pub fn add(&mut self, task: Task) -> TaskId {
        let id = self.next_id;
        self.next_id += 1;
        self.tasks.insert(id, task);
        id
    }

    pub fn get(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(&id)
    }

    pub fn get_mut(&mut self, id: TaskId) -> Option<&mut Task> {
        self.tasks.get_mut(&id)
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.tasks.contains_key(&id)
    }

    pub fn remove(&mut self, id: TaskId) -> Option<Task> {
        self.tasks.remove(&id)
    }

    pub fn resolve(&self, task: TaskRef) -> Option<&Task> {
        match task {
            TaskRef::Template => Some(&self.template),
            TaskRef::Task(id) => self.get(id),
        }
    }

    pub fn resolve_mut(&mut self, task: TaskRef) -> Option<&mut Task> {
        match task {
            TaskRef::Template => Some(&mut self.template),
            TaskRef::Task(id) => self.get_mut(id),
        }
    }

    pub fn template(&self) -> &Task {
        &self.template
    }

    pub fn template_mut(&mut self) -> &mut Task {
        &mut self.template
    }

    /// Task ids in ascending order, template excluded
    pub fn ids(&self) -> Vec<TaskId> {
        self.tasks.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TaskId, &Task)> {
        self.tasks.iter().map(|(id, task)| (*id, task))
    }

    pub fn count_with_status(&self, status: TaskStatus) -> usize {
        self.tasks.values().filter(|t| t.status == status).count()
    }

    /// Ids of tasks whose status is one of `statuses`, ascending
    pub fn ids_with_status(&self, statuses: &[TaskStatus]) -> Vec<TaskId> {
        self.iter()
            .filter(|(_, task)| statuses.contains(&task.status))
            .map(|(id, _)| id)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}
