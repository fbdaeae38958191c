//! Task data model: the entity, priority, and validated create and update inputs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::tags::model::Tag;

/// Maximum title length in characters (after trimming).
pub const TITLE_MAX_LENGTH: usize = 200;

/// Maximum description length in characters (after trimming).
pub const DESCRIPTION_MAX_LENGTH: usize = 1000;

/// How urgent a task is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[serde(alias = "LOW", alias = "Low")]
    Low,
    #[default]
    #[serde(alias = "MEDIUM", alias = "Medium")]
    Medium,
    #[serde(alias = "HIGH", alias = "High")]
    High,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Priority {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            _ => Err(format!("Unknown priority: {}", s)),
        }
    }
}

/// A task owned by exactly one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    /// Owner of this task.
    pub user_id: String,
    pub title: String,
    pub description: String,
    pub completed: bool,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// The owner's tags associated with this task, ordered by name.
    #[serde(default)]
    pub tags: Vec<Tag>,
}

/// Trim a title and check it is non-blank and within bounds.
pub fn validate_title(raw: &str) -> Result<String, ValidationError> {
    let title = raw.trim();
    if title.is_empty() {
        return Err(ValidationError::new("title", "Title cannot be empty"));
    }
    if title.chars().count() > TITLE_MAX_LENGTH {
        return Err(ValidationError::new(
            "title",
            format!("Title must be {TITLE_MAX_LENGTH} characters or less"),
        ));
    }
    Ok(title.to_string())
}

/// Trim a description and check it is within bounds. Empty is allowed.
pub fn validate_description(raw: &str) -> Result<String, ValidationError> {
    let description = raw.trim();
    if description.chars().count() > DESCRIPTION_MAX_LENGTH {
        return Err(ValidationError::new(
            "description",
            format!("Description must be {DESCRIPTION_MAX_LENGTH} characters or less"),
        ));
    }
    Ok(description.to_string())
}

/// A validated task ready to be inserted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTask {
    title: String,
    description: String,
    priority: Priority,
    tag_ids: Option<Vec<i64>>,
}

impl NewTask {
    pub fn new(title: &str) -> Result<Self, ValidationError> {
        Ok(Self {
            title: validate_title(title)?,
            description: String::new(),
            priority: Priority::default(),
            tag_ids: None,
        })
    }

    /// Builder: set description.
    pub fn with_description(mut self, description: &str) -> Result<Self, ValidationError> {
        self.description = validate_description(description)?;
        Ok(self)
    }

    /// Builder: set priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Builder: tags to associate on creation.
    pub fn with_tags(mut self, tag_ids: Vec<i64>) -> Self {
        self.tag_ids = Some(tag_ids);
        self
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn tag_ids(&self) -> Option<&[i64]> {
        self.tag_ids.as_deref()
    }
}

/// A validated partial update. Unset fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskPatch {
    title: Option<String>,
    description: Option<String>,
    priority: Option<Priority>,
    completed: Option<bool>,
    tag_ids: Option<Vec<i64>>,
}

impl TaskPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(mut self, title: &str) -> Result<Self, ValidationError> {
        self.title = Some(validate_title(title)?);
        Ok(self)
    }

    pub fn description(mut self, description: &str) -> Result<Self, ValidationError> {
        self.description = Some(validate_description(description)?);
        Ok(self)
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn completed(mut self, completed: bool) -> Self {
        self.completed = Some(completed);
        self
    }

    /// Replace the task's tag associations with these ids.
    pub fn tags(mut self, tag_ids: Vec<i64>) -> Self {
        self.tag_ids = Some(tag_ids);
        self
    }

    pub fn new_title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn new_description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn new_priority(&self) -> Option<Priority> {
        self.priority
    }

    pub fn new_completed(&self) -> Option<bool> {
        self.completed
    }

    pub fn new_tag_ids(&self) -> Option<&[i64]> {
        self.tag_ids.as_deref()
    }
}

/// JSON body for `POST /api/v1/tasks`.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateTaskRequest {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub tag_ids: Option<Vec<i64>>,
}

impl TryFrom<CreateTaskRequest> for NewTask {
    type Error = ValidationError;

    fn try_from(req: CreateTaskRequest) -> Result<Self, Self::Error> {
        let mut task = NewTask::new(&req.title)?
            .with_description(req.description.as_deref().unwrap_or(""))?
            .with_priority(req.priority.unwrap_or_default());
        if let Some(ids) = req.tag_ids {
            task = task.with_tags(ids);
        }
        Ok(task)
    }
}

/// JSON body for `PUT /api/v1/tasks/{id}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateTaskRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub completed: Option<bool>,
    #[serde(default)]
    pub tag_ids: Option<Vec<i64>>,
}

impl TryFrom<UpdateTaskRequest> for TaskPatch {
    type Error = ValidationError;

    fn try_from(req: UpdateTaskRequest) -> Result<Self, Self::Error> {
        let mut patch = TaskPatch::new();
        if let Some(t) = req.title {
            patch = patch.title(&t)?;
        }
        if let Some(d) = req.description {
            patch = patch.description(&d)?;
        }
        if let Some(p) = req.priority {
            patch = patch.priority(p);
        }
        if let Some(c) = req.completed {
            patch = patch.completed(c);
        }
        if let Some(ids) = req.tag_ids {
            patch = patch.tags(ids);
        }
        Ok(patch)
    }
}
