//! Task listing parameters: filters, sort order, and pagination.
//!
//! Raw query-string values arrive as [`ListTasksParams`] and are validated
//! into a [`TaskQuery`]. The SQL fragments built here are always owner-scoped
//! and end in a total order, so paging over a stable data set never skips
//! or repeats a row.

use libsql::Value;
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::tasks::model::{Priority, Task};

pub const DEFAULT_PAGE: u32 = 1;
pub const DEFAULT_PER_PAGE: u32 = 20;
pub const MAX_PER_PAGE: u32 = 100;

/// Column a task listing is ordered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    #[default]
    CreatedAt,
    UpdatedAt,
    Title,
    Priority,
}

impl std::fmt::Display for SortKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CreatedAt => write!(f, "created_at"),
            Self::UpdatedAt => write!(f, "updated_at"),
            Self::Title => write!(f, "title"),
            Self::Priority => write!(f, "priority"),
        }
    }
}

impl std::str::FromStr for SortKey {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "created_at" => Ok(Self::CreatedAt),
            "updated_at" => Ok(Self::UpdatedAt),
            "title" => Ok(Self::Title),
            "priority" => Ok(Self::Priority),
            _ => Err(format!("Unknown sort field: {}", s)),
        }
    }
}

impl SortKey {
    /// SQL expression for this key. Never built from user text.
    fn order_expr(&self) -> &'static str {
        match self {
            Self::CreatedAt => "created_at",
            Self::UpdatedAt => "updated_at",
            Self::Title => "title COLLATE NOCASE",
            Self::Priority => {
                "CASE priority WHEN 'low' THEN 0 WHEN 'medium' THEN 1 ELSE 2 END"
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl std::fmt::Display for SortOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Asc => write!(f, "asc"),
            Self::Desc => write!(f, "desc"),
        }
    }
}

impl std::str::FromStr for SortOrder {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" => Ok(Self::Asc),
            "desc" => Ok(Self::Desc),
            _ => Err(format!("Unknown sort order: {}", s)),
        }
    }
}

/// A validated 1-indexed page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    page: u32,
    per_page: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            page: DEFAULT_PAGE,
            per_page: DEFAULT_PER_PAGE,
        }
    }
}

impl Pagination {
    pub fn new(page: u32, per_page: u32) -> Result<Self, ValidationError> {
        if page < 1 {
            return Err(ValidationError::new("page", "Page must be 1 or greater"));
        }
        if !(1..=MAX_PER_PAGE).contains(&per_page) {
            return Err(ValidationError::new(
                "per_page",
                format!("per_page must be between 1 and {MAX_PER_PAGE}"),
            ));
        }
        Ok(Self { page, per_page })
    }

    /// Validate optional raw values, falling back to the defaults.
    pub fn from_parts(page: Option<u32>, per_page: Option<u32>) -> Result<Self, ValidationError> {
        Self::new(
            page.unwrap_or(DEFAULT_PAGE),
            per_page.unwrap_or(DEFAULT_PER_PAGE),
        )
    }

    pub fn page(&self) -> u32 {
        self.page
    }

    pub fn per_page(&self) -> u32 {
        self.per_page
    }

    pub fn limit(&self) -> i64 {
        i64::from(self.per_page)
    }

    pub fn offset(&self) -> i64 {
        i64::from(self.page - 1) * i64::from(self.per_page)
    }
}

/// Conjunctive task filters. Empty lists mean "no constraint".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskFilter {
    pub completed: Option<bool>,
    /// Task matches if its priority is any of these.
    pub priorities: Vec<Priority>,
    /// Task matches if any of these tags is associated.
    pub tag_ids: Vec<i64>,
    /// Case-insensitive substring of title or description.
    pub search: Option<String>,
}

/// Everything `list_tasks` needs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskQuery {
    pub filter: TaskFilter,
    pub sort_by: SortKey,
    pub sort_order: SortOrder,
    pub pagination: Pagination,
}

/// Raw query string of `GET /api/v1/tasks`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListTasksParams {
    pub completed: Option<bool>,
    /// Comma-separated priorities.
    pub priority: Option<String>,
    /// Comma-separated tag ids.
    pub tag_id: Option<String>,
    pub search: Option<String>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

impl TryFrom<ListTasksParams> for TaskQuery {
    type Error = ValidationError;

    fn try_from(params: ListTasksParams) -> Result<Self, Self::Error> {
        let priorities = split_list(params.priority.as_deref())
            .map(|p| p.parse::<Priority>().map_err(|e| ValidationError::new("priority", e)))
            .collect::<Result<Vec<_>, _>>()?;

        let tag_ids = split_list(params.tag_id.as_deref())
            .map(|id| {
                id.parse::<i64>()
                    .map_err(|_| ValidationError::new("tag_id", format!("Invalid tag id: {id}")))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let sort_by = match params.sort_by.as_deref() {
            None | Some("") => SortKey::default(),
            Some(raw) => raw.parse().map_err(|e| ValidationError::new("sort_by", e))?,
        };
        let sort_order = match params.sort_order.as_deref() {
            None | Some("") => SortOrder::default(),
            Some(raw) => raw.parse().map_err(|e| ValidationError::new("sort_order", e))?,
        };

        let search = params
            .search
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        Ok(Self {
            filter: TaskFilter {
                completed: params.completed,
                priorities,
                tag_ids,
                search,
            },
            sort_by,
            sort_order,
            pagination: Pagination::from_parts(params.page, params.per_page)?,
        })
    }
}

fn split_list(raw: Option<&str>) -> impl Iterator<Item = &str> {
    raw.unwrap_or("")
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// One page of an owner's tasks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskPage {
    pub tasks: Vec<Task>,
    /// All matching tasks, ignoring pagination.
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
}

/// Escape `LIKE` wildcards so the text matches literally (`ESCAPE '\'`).
pub(crate) fn escape_like(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// `WHERE` clause and positional params for an owner's filtered tasks.
///
/// The owner predicate is always the first condition.
pub(crate) fn where_clause(owner: &str, filter: &TaskFilter) -> (String, Vec<Value>) {
    let mut conditions = vec!["user_id = ?".to_string()];
    let mut params = vec![Value::Text(owner.to_string())];

    if let Some(completed) = filter.completed {
        conditions.push("completed = ?".to_string());
        params.push(Value::Integer(i64::from(completed)));
    }

    if !filter.priorities.is_empty() {
        conditions.push(format!("priority IN ({})", placeholders(filter.priorities.len())));
        params.extend(
            filter
                .priorities
                .iter()
                .map(|p| Value::Text(p.as_str().to_string())),
        );
    }

    if !filter.tag_ids.is_empty() {
        conditions.push(format!(
            "EXISTS (SELECT 1 FROM task_tags tt WHERE tt.task_id = tasks.id AND tt.tag_id IN ({}))",
            placeholders(filter.tag_ids.len())
        ));
        params.extend(filter.tag_ids.iter().map(|id| Value::Integer(*id)));
    }

    if let Some(search) = &filter.search {
        let pattern = format!("%{}%", escape_like(search));
        conditions.push("(title LIKE ? ESCAPE '\\' OR description LIKE ? ESCAPE '\\')".to_string());
        params.push(Value::Text(pattern.clone()));
        params.push(Value::Text(pattern));
    }

    (format!("WHERE {}", conditions.join(" AND ")), params)
}

/// `ORDER BY` clause with id ascending as the final tie-breaker.
pub(crate) fn order_by_clause(sort_by: SortKey, sort_order: SortOrder) -> String {
    let direction = match sort_order {
        SortOrder::Asc => "ASC",
        SortOrder::Desc => "DESC",
    };
    format!("ORDER BY {} {direction}, id ASC", sort_by.order_expr())
}

pub(crate) fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}
