//! `Database` trait: the single async interface for all persistence.
//!
//! Every method that reads or mutates a task or tag takes the owner's id and
//! locates rows by `(id, user_id)`. A row owned by someone else is reported
//! exactly like a missing one.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::accounts::model::{Email, NewUser, User};
use crate::error::DatabaseError;
use crate::tags::model::{Tag, TagName, TagPage};
use crate::tasks::model::{NewTask, Task, TaskPatch};
use crate::tasks::query::{Pagination, TaskPage, TaskQuery};

/// Backend-agnostic database trait covering accounts, tasks and tags.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn init_schema(&self) -> Result<(), DatabaseError>;

    /// Liveness check (`SELECT 1`).
    async fn ping(&self) -> Result<(), DatabaseError>;

    // ── Tasks ───────────────────────────────────────────────────────

    /// Insert a task for `owner`, associating any requested tags.
    async fn create_task(&self, owner: &str, task: &NewTask) -> Result<Task, DatabaseError>;

    async fn get_task(&self, owner: &str, id: i64) -> Result<Task, DatabaseError>;

    /// Filtered, sorted, paginated listing of `owner`'s tasks.
    async fn list_tasks(&self, owner: &str, query: &TaskQuery) -> Result<TaskPage, DatabaseError>;

    /// Apply a partial update and refresh `updated_at`.
    async fn update_task(
        &self,
        owner: &str,
        id: i64,
        patch: &TaskPatch,
    ) -> Result<Task, DatabaseError>;

    /// Delete a task and its tag associations. Tags themselves survive.
    async fn delete_task(&self, owner: &str, id: i64) -> Result<(), DatabaseError>;

    /// Flip `completed`.
    async fn toggle_complete(&self, owner: &str, id: i64) -> Result<Task, DatabaseError>;

    // ── Tags ────────────────────────────────────────────────────────

    /// Return `owner`'s tag with this name, creating it if absent.
    async fn get_or_create_tag(&self, owner: &str, name: &TagName) -> Result<Tag, DatabaseError>;

    async fn get_tag(&self, owner: &str, id: i64) -> Result<Tag, DatabaseError>;

    /// `owner`'s tags ordered by name, optionally filtered by substring.
    async fn list_tags(
        &self,
        owner: &str,
        search: Option<&str>,
        pagination: Pagination,
    ) -> Result<TagPage, DatabaseError>;

    /// Names of `owner`'s tags starting with `prefix`.
    async fn autocomplete_tags(
        &self,
        owner: &str,
        prefix: &str,
        limit: u32,
    ) -> Result<Vec<String>, DatabaseError>;

    /// Delete a tag and its associations. Tasks survive.
    async fn delete_tag(&self, owner: &str, id: i64) -> Result<(), DatabaseError>;

    /// Replace the tag set of `owner`'s task. Ids that do not name one of
    /// `owner`'s tags are skipped; an empty slice clears all associations.
    async fn replace_associations(
        &self,
        owner: &str,
        task_id: i64,
        tag_ids: &[i64],
    ) -> Result<(), DatabaseError>;

    // ── Accounts ────────────────────────────────────────────────────

    /// Register a user. A taken email is a `Constraint` error.
    async fn create_user(
        &self,
        user: &NewUser,
        password_hash: &str,
    ) -> Result<User, DatabaseError>;

    /// The user with this email and their stored password hash.
    async fn find_user_credentials(
        &self,
        email: &Email,
    ) -> Result<Option<(User, String)>, DatabaseError>;

    async fn get_user(&self, id: &str) -> Result<User, DatabaseError>;

    /// Refuse a token id until `expires_at`. Entries already past their
    /// expiry are pruned on the way.
    async fn revoke_token(
        &self,
        token_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError>;

    async fn is_token_revoked(&self, token_id: &str) -> Result<bool, DatabaseError>;
}
