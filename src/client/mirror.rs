//! Local copy of the tasks table, kept in step with the change feed.
//!
//! Rows are keyed by id and always presented newest first, so applying a
//! change twice, or applying a change that a refetch already reflected,
//! leaves the mirror in the same state.

use serde_json::Value;
use std::collections::HashMap;

use super::error::ClientError;
use super::feed::{ChangeKind, RawChange};
use crate::database::models::Task;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskChange {
    Inserted(Task),
    Updated(Task),
    Deleted { id: i64 },
}

impl TaskChange {
    pub fn from_raw(raw: RawChange) -> Result<Self, ClientError> {
        match raw.event {
            ChangeKind::Insert => Ok(TaskChange::Inserted(decode_row(raw.new)?)),
            ChangeKind::Update => Ok(TaskChange::Updated(decode_row(raw.new)?)),
            ChangeKind::Delete => {
                let id = raw
                    .old
                    .as_ref()
                    .and_then(|old| old.get("id"))
                    .and_then(Value::as_i64)
                    .ok_or_else(|| ClientError::DataAccess("DELETE change without old.id".to_string()))?;
                Ok(TaskChange::Deleted { id })
            }
        }
    }
}

fn decode_row(row: Option<Value>) -> Result<Task, ClientError> {
    let row = row.ok_or_else(|| ClientError::DataAccess("change without new row".to_string()))?;
    serde_json::from_value(row).map_err(|e| ClientError::DataAccess(format!("malformed task row: {}", e)))
}

#[derive(Debug, Default, Clone)]
pub struct TaskMirror {
    rows: HashMap<i64, Task>,
}

impl TaskMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole mirror with a fresh listing.
    pub fn replace_all(&mut self, tasks: Vec<Task>) {
        self.rows = tasks.into_iter().map(|t| (t.id, t)).collect();
    }

    pub fn apply(&mut self, change: TaskChange) {
        match change {
            TaskChange::Inserted(task) => {
                self.rows.insert(task.id, task);
            }
            TaskChange::Updated(task) => {
                // An update for a row we never saw (or already deleted) is dropped
                if let Some(row) = self.rows.get_mut(&task.id) {
                    *row = task;
                }
            }
            TaskChange::Deleted { id } => {
                self.rows.remove(&id);
            }
        }
    }

    /// Rows ordered by `created_at` descending, ties broken by id descending.
    pub fn tasks(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.rows.values().cloned().collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        tasks
    }

    pub fn get(&self, id: i64) -> Option<&Task> {
        self.rows.get(&id)
    }

    pub fn contains(&self, id: i64) -> bool {
        self.rows.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn clear(&mut self) {
        self.rows.clear();
    }
}
