//! Process-lifetime task storage for the terminal menu.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Local};
use tracing::debug;

use crate::error::ValidationError;
use crate::tasks::model::{validate_description, validate_title};

/// A task held by the terminal menu. Single user, so no owner.
#[derive(Debug, Clone, PartialEq)]
pub struct MenuTask {
    pub id: u64,
    pub title: String,
    pub description: String,
    pub completed: bool,
    pub created_at: DateTime<Local>,
    pub updated_at: DateTime<Local>,
}

struct Inner {
    tasks: BTreeMap<u64, MenuTask>,
    next_id: u64,
}

/// In-memory task map with a monotonically increasing id counter.
///
/// Ids start at 1 and are never reused, even after deletes.
pub struct InMemoryStorage {
    inner: Mutex<Inner>,
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                tasks: BTreeMap::new(),
                next_id: 1,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Validate and store a new task.
    pub fn add(&self, title: &str, description: &str) -> Result<MenuTask, ValidationError> {
        let title = validate_title(title)?;
        let description = validate_description(description)?;

        let mut inner = self.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        let now = Local::now();
        let task = MenuTask {
            id,
            title,
            description,
            completed: false,
            created_at: now,
            updated_at: now,
        };
        inner.tasks.insert(id, task.clone());
        debug!(id, "Menu task added");
        Ok(task)
    }

    pub fn get(&self, id: u64) -> Option<MenuTask> {
        self.lock().tasks.get(&id).cloned()
    }

    /// All tasks, newest first. Equal timestamps fall back to id descending.
    pub fn get_all(&self) -> Vec<MenuTask> {
        let mut tasks: Vec<MenuTask> = self.lock().tasks.values().cloned().collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        tasks
    }

    /// Replace the given fields and refresh `updated_at`.
    ///
    /// Returns `Ok(None)` when no task has this id.
    pub fn update(
        &self,
        id: u64,
        title: Option<&str>,
        description: Option<&str>,
    ) -> Result<Option<MenuTask>, ValidationError> {
        let title = title.map(validate_title).transpose()?;
        let description = description.map(validate_description).transpose()?;

        let mut inner = self.lock();
        let Some(task) = inner.tasks.get_mut(&id) else {
            return Ok(None);
        };
        if let Some(title) = title {
            task.title = title;
        }
        if let Some(description) = description {
            task.description = description;
        }
        task.updated_at = Local::now();
        Ok(Some(task.clone()))
    }

    /// Remove a task, returning it.
    pub fn delete(&self, id: u64) -> Option<MenuTask> {
        let removed = self.lock().tasks.remove(&id);
        if removed.is_some() {
            debug!(id, "Menu task deleted");
        }
        removed
    }

    pub fn mark_complete(&self, id: u64) -> Option<MenuTask> {
        let mut inner = self.lock();
        let task = inner.tasks.get_mut(&id)?;
        task.completed = true;
        task.updated_at = Local::now();
        Some(task.clone())
    }

    pub fn len(&self) -> usize {
        self.lock().tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().tasks.is_empty()
    }
}
