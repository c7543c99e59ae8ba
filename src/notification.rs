//! User-visible notifications.

use crate::task::TaskRef;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub type NotificationId = u64;

/// Severity, sent as its numeric value
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum NotificationLevel {
    Info = 0,
    Ok = 1,
    Warning = 2,
    Error = 3,
}

impl Serialize for NotificationLevel {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

impl<'de> Deserialize<'de> for NotificationLevel {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match u8::deserialize(deserializer)? {
            0 => Ok(NotificationLevel::Info),
            1 => Ok(NotificationLevel::Ok),
            2 => Ok(NotificationLevel::Warning),
            3 => Ok(NotificationLevel::Error),
            other => Err(serde::de::Error::custom(format!(
                "invalid notification level: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    /// Unix time in milliseconds
    pub time: i64,
    pub task_id: TaskRef,
    pub content: String,
    pub level: NotificationLevel,
}

/// Append-only numbered log. Deleted ids are never handed out again.
#[derive(Debug, Default)]
pub struct NotificationLog {
    entries: BTreeMap<NotificationId, Notification>,
    next_id: NotificationId,
}

impl NotificationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, notification: Notification) -> NotificationId {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.insert(id, notification);
        id
    }

    /// Returns the removed entry, if any
    pub fn delete(&mut self, id: NotificationId) -> Option<Notification> {
        self.entries.remove(&id)
    }

    pub fn get(&self, id: NotificationId) -> Option<&Notification> {
        self.entries.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = (NotificationId, &Notification)> {
        self.entries.iter().map(|(id, n)| (*id, n))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Id the next push will get
    pub fn next_id(&self) -> NotificationId {
        self.next_id
    }
}
