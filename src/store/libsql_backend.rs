//! libSQL backend: async `Database` trait implementation.
//!
//! Supports local file and in-memory databases. All requests share one
//! connection, and a transaction on it is visible to every statement issued
//! on it. Write units therefore hold `lock` exclusively for their whole
//! transaction, and read units hold it shared for their whole statement
//! sequence, so a reader never observes a half-applied write.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, Value, params, params::Params};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::accounts::model::{Email, NewUser, User};
use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::traits::Database;
use crate::tags::model::{Tag, TagName, TagPage};
use crate::tasks::model::{NewTask, Task, TaskPatch};
use crate::tasks::query::{self, Pagination, TaskPage, TaskQuery, escape_like, placeholders};

/// libSQL database backend.
pub struct LibSqlBackend {
    /// Held so the connection's database outlives every request.
    _db: Arc<LibSqlDatabase>,
    conn: Connection,
    lock: RwLock<()>,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db)?;
        backend.init_schema().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let backend = Self::from_database(db)?;
        backend.init_schema().await?;
        Ok(backend)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            _db: Arc::new(db),
            conn,
            lock: RwLock::new(()),
        })
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Fixed-width RFC 3339 so lexical order matches chronological order.
fn timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::Serialization(format!("bad timestamp {s:?}: {e}")))
}

/// Column list for task SELECT queries.
const TASK_COLUMNS: &str =
    "id, user_id, title, description, completed, priority, created_at, updated_at";

fn row_to_task(row: &libsql::Row) -> Result<Task, DatabaseError> {
    let col = |e: libsql::Error| DatabaseError::Query(format!("task row: {e}"));
    let priority: String = row.get(5).map_err(col)?;
    let created_at: String = row.get(6).map_err(col)?;
    let updated_at: String = row.get(7).map_err(col)?;
    let completed: i64 = row.get(4).map_err(col)?;

    Ok(Task {
        id: row.get(0).map_err(col)?,
        user_id: row.get(1).map_err(col)?,
        title: row.get(2).map_err(col)?,
        description: row.get(3).map_err(col)?,
        completed: completed != 0,
        priority: priority.parse().map_err(DatabaseError::Serialization)?,
        created_at: parse_datetime(&created_at)?,
        updated_at: parse_datetime(&updated_at)?,
        tags: Vec::new(),
    })
}

const TAG_COLUMNS: &str = "id, user_id, name, created_at";

/// Map a tag row starting at column `offset`.
fn row_to_tag(row: &libsql::Row, offset: i32) -> Result<Tag, DatabaseError> {
    let col = |e: libsql::Error| DatabaseError::Query(format!("tag row: {e}"));
    let created_at: String = row.get(offset + 3).map_err(col)?;
    Ok(Tag {
        id: row.get(offset).map_err(col)?,
        user_id: row.get(offset + 1).map_err(col)?,
        name: row.get(offset + 2).map_err(col)?,
        created_at: parse_datetime(&created_at)?,
    })
}

async fn count(conn: &Connection, sql: &str, values: Vec<Value>) -> Result<u64, DatabaseError> {
    let mut rows = conn
        .query(sql, Params::Positional(values))
        .await
        .map_err(|e| DatabaseError::Query(format!("count: {e}")))?;
    let row = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Query(format!("count row: {e}")))?;
    let n: i64 = match row {
        Some(row) => row
            .get(0)
            .map_err(|e| DatabaseError::Query(format!("count value: {e}")))?,
        None => 0,
    };
    Ok(u64::try_from(n).unwrap_or(0))
}

async fn owns_task(conn: &Connection, owner: &str, task_id: i64) -> Result<bool, DatabaseError> {
    let mut rows = conn
        .query(
            "SELECT 1 FROM tasks WHERE id = ?1 AND user_id = ?2",
            params![task_id, owner],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("owns_task: {e}")))?;
    let row = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Query(format!("owns_task row: {e}")))?;
    Ok(row.is_some())
}

/// Owner-scoped association replacement. Caller supplies the transaction.
async fn replace_associations_in(
    conn: &Connection,
    owner: &str,
    task_id: i64,
    tag_ids: &[i64],
) -> Result<(), DatabaseError> {
    if !owns_task(conn, owner, task_id).await? {
        return Err(DatabaseError::not_found("task", task_id));
    }

    conn.execute("DELETE FROM task_tags WHERE task_id = ?1", params![task_id])
        .await
        .map_err(|e| DatabaseError::Query(format!("clear_associations: {e}")))?;

    let unique: BTreeSet<i64> = tag_ids.iter().copied().collect();
    if unique.is_empty() {
        return Ok(());
    }

    let sql = format!(
        "INSERT OR IGNORE INTO task_tags (task_id, tag_id)
         SELECT ?, id FROM tags WHERE user_id = ? AND id IN ({})",
        placeholders(unique.len())
    );
    let mut values = vec![Value::Integer(task_id), Value::Text(owner.to_string())];
    values.extend(unique.iter().map(|id| Value::Integer(*id)));

    let inserted = conn
        .execute(&sql, Params::Positional(values))
        .await
        .map_err(|e| DatabaseError::Query(format!("insert_associations: {e}")))?;

    let skipped = unique.len() as u64 - inserted.min(unique.len() as u64);
    if skipped > 0 {
        debug!(task_id, skipped, "Skipped unknown or foreign tag ids");
    }
    Ok(())
}

/// Load `owner`'s tags for each of `task_ids`, ordered by name.
async fn load_tags(
    conn: &Connection,
    owner: &str,
    task_ids: &[i64],
) -> Result<HashMap<i64, Vec<Tag>>, DatabaseError> {
    let mut by_task: HashMap<i64, Vec<Tag>> = HashMap::new();
    if task_ids.is_empty() {
        return Ok(by_task);
    }

    let sql = format!(
        "SELECT tt.task_id, t.id, t.user_id, t.name, t.created_at
         FROM task_tags tt JOIN tags t ON t.id = tt.tag_id
         WHERE t.user_id = ? AND tt.task_id IN ({})
         ORDER BY t.name ASC",
        placeholders(task_ids.len())
    );
    let mut values = vec![Value::Text(owner.to_string())];
    values.extend(task_ids.iter().map(|id| Value::Integer(*id)));

    let mut rows = conn
        .query(&sql, Params::Positional(values))
        .await
        .map_err(|e| DatabaseError::Query(format!("load_tags: {e}")))?;

    while let Some(row) = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Query(format!("load_tags row: {e}")))?
    {
        let task_id: i64 = row
            .get(0)
            .map_err(|e| DatabaseError::Query(format!("load_tags task_id: {e}")))?;
        by_task.entry(task_id).or_default().push(row_to_tag(&row, 1)?);
    }
    Ok(by_task)
}

fn opt_text(s: Option<&str>) -> Value {
    match s {
        Some(s) => Value::Text(s.to_string()),
        None => Value::Null,
    }
}

const USER_COLUMNS: &str = "id, email, name, created_at";

fn row_to_user(row: &libsql::Row) -> Result<User, DatabaseError> {
    let col = |e: libsql::Error| DatabaseError::Query(format!("user row: {e}"));
    let created_at: String = row.get(3).map_err(col)?;
    Ok(User {
        id: row.get(0).map_err(col)?,
        email: row.get(1).map_err(col)?,
        name: row.get(2).map_err(col)?,
        created_at: parse_datetime(&created_at)?,
    })
}

fn begin_err(e: libsql::Error) -> DatabaseError {
    DatabaseError::Query(format!("begin transaction: {e}"))
}

fn commit_err(e: libsql::Error) -> DatabaseError {
    DatabaseError::Query(format!("commit: {e}"))
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn init_schema(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    async fn ping(&self) -> Result<(), DatabaseError> {
        let _guard = self.lock.read().await;
        let mut rows = self
            .conn()
            .query("SELECT 1", ())
            .await
            .map_err(|e| DatabaseError::Pool(format!("ping: {e}")))?;
        rows.next()
            .await
            .map_err(|e| DatabaseError::Pool(format!("ping row: {e}")))?;
        Ok(())
    }

    // ── Tasks ───────────────────────────────────────────────────────

    async fn create_task(&self, owner: &str, task: &NewTask) -> Result<Task, DatabaseError> {
        let id = {
            let _guard = self.lock.write().await;
            let tx = self.conn().transaction().await.map_err(begin_err)?;
            let now = timestamp(Utc::now());

            tx.execute(
                "INSERT INTO tasks (user_id, title, description, completed, priority, created_at, updated_at)
                 VALUES (?1, ?2, ?3, 0, ?4, ?5, ?5)",
                params![owner, task.title(), task.description(), task.priority().as_str(), now],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("create_task: {e}")))?;
            let id = tx.last_insert_rowid();

            if let Some(tag_ids) = task.tag_ids() {
                replace_associations_in(&tx, owner, id, tag_ids).await?;
            }
            tx.commit().await.map_err(commit_err)?;
            id
        };

        debug!(id, owner, "Task created");
        self.get_task(owner, id).await
    }

    async fn get_task(&self, owner: &str, id: i64) -> Result<Task, DatabaseError> {
        let _guard = self.lock.read().await;
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?1 AND user_id = ?2"),
                params![id, owner],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_task: {e}")))?;

        let row = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("get_task row: {e}")))?
            .ok_or_else(|| DatabaseError::not_found("task", id))?;
        let mut task = row_to_task(&row)?;
        drop(rows);

        task.tags = load_tags(conn, owner, &[id])
            .await?
            .remove(&id)
            .unwrap_or_default();
        Ok(task)
    }

    async fn list_tasks(&self, owner: &str, query: &TaskQuery) -> Result<TaskPage, DatabaseError> {
        let _guard = self.lock.read().await;
        let conn = self.conn();
        let (where_sql, values) = query::where_clause(owner, &query.filter);

        let total = count(
            conn,
            &format!("SELECT COUNT(*) FROM tasks {where_sql}"),
            values.clone(),
        )
        .await?;

        let sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks {where_sql} {} LIMIT ? OFFSET ?",
            query::order_by_clause(query.sort_by, query.sort_order)
        );
        let mut page_values = values;
        page_values.push(Value::Integer(query.pagination.limit()));
        page_values.push(Value::Integer(query.pagination.offset()));

        let mut rows = conn
            .query(&sql, Params::Positional(page_values))
            .await
            .map_err(|e| DatabaseError::Query(format!("list_tasks: {e}")))?;

        let mut tasks = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_tasks row: {e}")))?
        {
            tasks.push(row_to_task(&row)?);
        }
        drop(rows);

        let ids: Vec<i64> = tasks.iter().map(|t| t.id).collect();
        let mut tags = load_tags(conn, owner, &ids).await?;
        for task in &mut tasks {
            task.tags = tags.remove(&task.id).unwrap_or_default();
        }

        Ok(TaskPage {
            tasks,
            total,
            page: query.pagination.page(),
            per_page: query.pagination.per_page(),
        })
    }

    async fn update_task(
        &self,
        owner: &str,
        id: i64,
        patch: &TaskPatch,
    ) -> Result<Task, DatabaseError> {
        {
            let _guard = self.lock.write().await;
            let tx = self.conn().transaction().await.map_err(begin_err)?;

            let mut sets = vec!["updated_at = ?"];
            let mut values = vec![Value::Text(timestamp(Utc::now()))];
            if let Some(title) = patch.new_title() {
                sets.push("title = ?");
                values.push(Value::Text(title.to_string()));
            }
            if let Some(description) = patch.new_description() {
                sets.push("description = ?");
                values.push(Value::Text(description.to_string()));
            }
            if let Some(priority) = patch.new_priority() {
                sets.push("priority = ?");
                values.push(Value::Text(priority.as_str().to_string()));
            }
            if let Some(completed) = patch.new_completed() {
                sets.push("completed = ?");
                values.push(Value::Integer(i64::from(completed)));
            }
            values.push(Value::Integer(id));
            values.push(Value::Text(owner.to_string()));

            let sql = format!(
                "UPDATE tasks SET {} WHERE id = ? AND user_id = ?",
                sets.join(", ")
            );
            let changed = tx
                .execute(&sql, Params::Positional(values))
                .await
                .map_err(|e| DatabaseError::Query(format!("update_task: {e}")))?;
            if changed == 0 {
                return Err(DatabaseError::not_found("task", id));
            }

            if let Some(tag_ids) = patch.new_tag_ids() {
                replace_associations_in(&tx, owner, id, tag_ids).await?;
            }
            tx.commit().await.map_err(commit_err)?;
        }

        debug!(id, owner, "Task updated");
        self.get_task(owner, id).await
    }

    async fn delete_task(&self, owner: &str, id: i64) -> Result<(), DatabaseError> {
        let _guard = self.lock.write().await;
        let tx = self.conn().transaction().await.map_err(begin_err)?;

        if !owns_task(&tx, owner, id).await? {
            return Err(DatabaseError::not_found("task", id));
        }
        tx.execute("DELETE FROM task_tags WHERE task_id = ?1", params![id])
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_task associations: {e}")))?;
        tx.execute(
            "DELETE FROM tasks WHERE id = ?1 AND user_id = ?2",
            params![id, owner],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("delete_task: {e}")))?;
        tx.commit().await.map_err(commit_err)?;

        debug!(id, owner, "Task deleted");
        Ok(())
    }

    async fn toggle_complete(&self, owner: &str, id: i64) -> Result<Task, DatabaseError> {
        {
            let _guard = self.lock.write().await;
            let changed = self
                .conn()
                .execute(
                    "UPDATE tasks SET completed = 1 - completed, updated_at = ?1
                     WHERE id = ?2 AND user_id = ?3",
                    params![timestamp(Utc::now()), id, owner],
                )
                .await
                .map_err(|e| DatabaseError::Query(format!("toggle_complete: {e}")))?;
            if changed == 0 {
                return Err(DatabaseError::not_found("task", id));
            }
        }
        self.get_task(owner, id).await
    }

    // ── Tags ────────────────────────────────────────────────────────

    async fn get_or_create_tag(&self, owner: &str, name: &TagName) -> Result<Tag, DatabaseError> {
        let conn = self.conn();
        {
            let _guard = self.lock.write().await;
            let inserted = conn
                .execute(
                    "INSERT INTO tags (user_id, name, created_at) VALUES (?1, ?2, ?3)
                     ON CONFLICT (user_id, name) DO NOTHING",
                    params![owner, name.as_str(), timestamp(Utc::now())],
                )
                .await
                .map_err(|e| DatabaseError::Query(format!("get_or_create_tag: {e}")))?;
            if inserted > 0 {
                debug!(owner, name = %name, "Tag created");
            }
        }

        let _guard = self.lock.read().await;
        let mut rows = conn
            .query(
                &format!("SELECT {TAG_COLUMNS} FROM tags WHERE user_id = ?1 AND name = ?2"),
                params![owner, name.as_str()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_or_create_tag select: {e}")))?;
        let row = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("get_or_create_tag row: {e}")))?
            .ok_or_else(|| DatabaseError::not_found("tag", name))?;
        row_to_tag(&row, 0)
    }

    async fn get_tag(&self, owner: &str, id: i64) -> Result<Tag, DatabaseError> {
        let _guard = self.lock.read().await;
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {TAG_COLUMNS} FROM tags WHERE id = ?1 AND user_id = ?2"),
                params![id, owner],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_tag: {e}")))?;
        let row = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("get_tag row: {e}")))?
            .ok_or_else(|| DatabaseError::not_found("tag", id))?;
        row_to_tag(&row, 0)
    }

    async fn list_tags(
        &self,
        owner: &str,
        search: Option<&str>,
        pagination: Pagination,
    ) -> Result<TagPage, DatabaseError> {
        let _guard = self.lock.read().await;
        let conn = self.conn();
        let mut where_sql = "WHERE user_id = ?".to_string();
        let mut values = vec![Value::Text(owner.to_string())];
        if let Some(search) = search.map(|s| s.trim().to_lowercase()).filter(|s| !s.is_empty()) {
            where_sql.push_str(" AND name LIKE ? ESCAPE '\\'");
            values.push(Value::Text(format!("%{}%", escape_like(&search))));
        }

        let total = count(
            conn,
            &format!("SELECT COUNT(*) FROM tags {where_sql}"),
            values.clone(),
        )
        .await?;

        values.push(Value::Integer(pagination.limit()));
        values.push(Value::Integer(pagination.offset()));
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {TAG_COLUMNS} FROM tags {where_sql} ORDER BY name ASC, id ASC LIMIT ? OFFSET ?"
                ),
                Params::Positional(values),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_tags: {e}")))?;

        let mut tags = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_tags row: {e}")))?
        {
            tags.push(row_to_tag(&row, 0)?);
        }

        Ok(TagPage {
            tags,
            total,
            page: pagination.page(),
            per_page: pagination.per_page(),
        })
    }

    async fn autocomplete_tags(
        &self,
        owner: &str,
        prefix: &str,
        limit: u32,
    ) -> Result<Vec<String>, DatabaseError> {
        let prefix = prefix.trim().to_lowercase();
        if prefix.is_empty() {
            return Ok(Vec::new());
        }

        let _guard = self.lock.read().await;
        let mut rows = self
            .conn()
            .query(
                "SELECT name FROM tags WHERE user_id = ?1 AND name LIKE ?2 ESCAPE '\\'
                 ORDER BY name ASC LIMIT ?3",
                params![owner, format!("{}%", escape_like(&prefix)), i64::from(limit)],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("autocomplete_tags: {e}")))?;

        let mut names = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("autocomplete_tags row: {e}")))?
        {
            names.push(
                row.get(0)
                    .map_err(|e| DatabaseError::Query(format!("autocomplete_tags name: {e}")))?,
            );
        }
        Ok(names)
    }

    async fn delete_tag(&self, owner: &str, id: i64) -> Result<(), DatabaseError> {
        let _guard = self.lock.write().await;
        let tx = self.conn().transaction().await.map_err(begin_err)?;

        tx.execute(
            "DELETE FROM task_tags WHERE tag_id IN (SELECT id FROM tags WHERE id = ?1 AND user_id = ?2)",
            params![id, owner],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("delete_tag associations: {e}")))?;
        let deleted = tx
            .execute(
                "DELETE FROM tags WHERE id = ?1 AND user_id = ?2",
                params![id, owner],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_tag: {e}")))?;
        if deleted == 0 {
            return Err(DatabaseError::not_found("tag", id));
        }
        tx.commit().await.map_err(commit_err)?;

        debug!(id, owner, "Tag deleted");
        Ok(())
    }

    async fn replace_associations(
        &self,
        owner: &str,
        task_id: i64,
        tag_ids: &[i64],
    ) -> Result<(), DatabaseError> {
        let _guard = self.lock.write().await;
        let tx = self.conn().transaction().await.map_err(begin_err)?;
        replace_associations_in(&tx, owner, task_id, tag_ids).await?;
        tx.commit().await.map_err(commit_err)?;
        Ok(())
    }

    // ── Accounts ────────────────────────────────────────────────────

    async fn create_user(
        &self,
        user: &NewUser,
        password_hash: &str,
    ) -> Result<User, DatabaseError> {
        let id = uuid::Uuid::new_v4().to_string();
        {
            let _guard = self.lock.write().await;
            let inserted = self
                .conn()
                .execute(
                    "INSERT INTO users (id, email, name, password_hash, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT (email) DO NOTHING",
                    params![
                        id.as_str(),
                        user.email.as_str(),
                        opt_text(user.name.as_deref()),
                        password_hash,
                        timestamp(Utc::now())
                    ],
                )
                .await
                .map_err(|e| DatabaseError::Query(format!("create_user: {e}")))?;
            if inserted == 0 {
                return Err(DatabaseError::Constraint("email already registered".into()));
            }
        }

        info!(user_id = %id, "User registered");
        self.get_user(&id).await
    }

    async fn find_user_credentials(
        &self,
        email: &Email,
    ) -> Result<Option<(User, String)>, DatabaseError> {
        let _guard = self.lock.read().await;
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {USER_COLUMNS}, password_hash FROM users WHERE email = ?1"),
                params![email.as_str()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("find_user_credentials: {e}")))?;
        let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("find_user_credentials row: {e}")))?
        else {
            return Ok(None);
        };
        let hash: String = row
            .get(4)
            .map_err(|e| DatabaseError::Query(format!("find_user_credentials hash: {e}")))?;
        Ok(Some((row_to_user(&row)?, hash)))
    }

    async fn get_user(&self, id: &str) -> Result<User, DatabaseError> {
        let _guard = self.lock.read().await;
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_user: {e}")))?;
        let row = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("get_user row: {e}")))?
            .ok_or_else(|| DatabaseError::not_found("user", id))?;
        row_to_user(&row)
    }

    async fn revoke_token(
        &self,
        token_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let _guard = self.lock.write().await;
        let tx = self.conn().transaction().await.map_err(begin_err)?;
        let pruned = tx
            .execute(
                "DELETE FROM revoked_tokens WHERE expires_at <= ?1",
                params![timestamp(Utc::now())],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("prune_revoked: {e}")))?;
        tx.execute(
            "INSERT INTO revoked_tokens (token_id, expires_at) VALUES (?1, ?2)
             ON CONFLICT (token_id) DO NOTHING",
            params![token_id, timestamp(expires_at)],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("revoke_token: {e}")))?;
        tx.commit().await.map_err(commit_err)?;

        debug!(token_id, pruned, "Token revoked");
        Ok(())
    }

    async fn is_token_revoked(&self, token_id: &str) -> Result<bool, DatabaseError> {
        let _guard = self.lock.read().await;
        let mut rows = self
            .conn()
            .query(
                "SELECT 1 FROM revoked_tokens WHERE token_id = ?1",
                params![token_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("is_token_revoked: {e}")))?;
        let row = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("is_token_revoked row: {e}")))?;
        Ok(row.is_some())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use super::*;
    use crate::tasks::model::Priority;
    use crate::tasks::query::{SortKey, SortOrder, TaskFilter};

    async fn test_db() -> LibSqlBackend {
        LibSqlBackend::new_memory().await.unwrap()
    }

    async fn add(db: &LibSqlBackend, owner: &str, title: &str) -> Task {
        db.create_task(owner, &NewTask::new(title).unwrap())
            .await
            .unwrap()
    }

    async fn tag(db: &LibSqlBackend, owner: &str, name: &str) -> Tag {
        db.get_or_create_tag(owner, &TagName::parse(name).unwrap())
            .await
            .unwrap()
    }

    fn is_not_found<T: std::fmt::Debug>(r: Result<T, DatabaseError>) -> bool {
        matches!(r, Err(DatabaseError::NotFound { .. }))
    }

    fn page(page: u32, per_page: u32) -> TaskQuery {
        TaskQuery {
            pagination: Pagination::new(page, per_page).unwrap(),
            ..Default::default()
        }
    }

    // ── Tasks ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn create_and_get_task() {
        let db = test_db().await;
        let new = NewTask::new("  Write report ")
            .unwrap()
            .with_description("quarterly")
            .unwrap()
            .with_priority(Priority::High);
        let task = db.create_task("alice", &new).await.unwrap();

        assert_eq!(task.title, "Write report");
        assert_eq!(task.description, "quarterly");
        assert_eq!(task.priority, Priority::High);
        assert!(!task.completed);
        assert_eq!(task.user_id, "alice");
        assert!(task.updated_at >= task.created_at);
        assert!(task.tags.is_empty());

        let fetched = db.get_task("alice", task.id).await.unwrap();
        assert_eq!(fetched, task);
    }

    #[tokio::test]
    async fn ids_are_monotonic() {
        let db = test_db().await;
        let a = add(&db, "alice", "one").await;
        let b = add(&db, "bob", "two").await;
        assert!(b.id > a.id);
    }

    #[tokio::test]
    async fn other_owner_sees_not_found() {
        let db = test_db().await;
        let task = add(&db, "alice", "private").await;

        assert!(is_not_found(db.get_task("bob", task.id).await));
        let patch = TaskPatch::new().title("hijacked").unwrap();
        assert!(is_not_found(db.update_task("bob", task.id, &patch).await));
        assert!(is_not_found(db.toggle_complete("bob", task.id).await));
        assert!(is_not_found(db.delete_task("bob", task.id).await));

        let untouched = db.get_task("alice", task.id).await.unwrap();
        assert_eq!(untouched.title, "private");
        assert!(!untouched.completed);

        let listed = db.list_tasks("bob", &TaskQuery::default()).await.unwrap();
        assert_eq!(listed.total, 0);
        assert!(listed.tasks.is_empty());
    }

    #[tokio::test]
    async fn update_changes_only_given_fields() {
        let db = test_db().await;
        let task = add(&db, "alice", "draft").await;

        let patch = TaskPatch::new().priority(Priority::Low).completed(true);
        let updated = db.update_task("alice", task.id, &patch).await.unwrap();
        assert_eq!(updated.title, "draft");
        assert_eq!(updated.priority, Priority::Low);
        assert!(updated.completed);
        assert!(updated.updated_at >= task.updated_at);
        assert_eq!(updated.created_at, task.created_at);
    }

    #[tokio::test]
    async fn toggle_flips_completed() {
        let db = test_db().await;
        let task = add(&db, "alice", "flip").await;
        assert!(db.toggle_complete("alice", task.id).await.unwrap().completed);
        assert!(!db.toggle_complete("alice", task.id).await.unwrap().completed);
    }

    #[tokio::test]
    async fn delete_removes_task_but_keeps_tags() {
        let db = test_db().await;
        let work = tag(&db, "alice", "work").await;
        let task = db
            .create_task("alice", &NewTask::new("tagged").unwrap().with_tags(vec![work.id]))
            .await
            .unwrap();
        assert_eq!(task.tags, vec![work.clone()]);

        db.delete_task("alice", task.id).await.unwrap();
        assert!(is_not_found(db.get_task("alice", task.id).await));
        assert!(is_not_found(db.delete_task("alice", task.id).await));
        assert_eq!(db.get_tag("alice", work.id).await.unwrap(), work);
    }

    // ── Listing ─────────────────────────────────────────────────────

    #[tokio::test]
    async fn empty_listing() {
        let db = test_db().await;
        let page = db.list_tasks("alice", &TaskQuery::default()).await.unwrap();
        assert!(page.tasks.is_empty());
        assert_eq!(page.total, 0);
        assert_eq!(page.page, 1);
        assert_eq!(page.per_page, 20);
    }

    #[tokio::test]
    async fn pagination_over_25_tasks() {
        let db = test_db().await;
        for i in 0..25 {
            add(&db, "alice", &format!("task {i}")).await;
        }

        let first = db.list_tasks("alice", &page(1, 20)).await.unwrap();
        assert_eq!(first.tasks.len(), 20);
        assert_eq!(first.total, 25);

        let second = db.list_tasks("alice", &page(2, 20)).await.unwrap();
        assert_eq!(second.tasks.len(), 5);
        assert_eq!(second.total, 25);

        let third = db.list_tasks("alice", &page(3, 20)).await.unwrap();
        assert!(third.tasks.is_empty());
        assert_eq!(third.total, 25);

        // No task appears on two pages.
        let mut seen: Vec<i64> = first.tasks.iter().chain(&second.tasks).map(|t| t.id).collect();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), 25);
    }

    #[tokio::test]
    async fn equal_sort_keys_keep_insertion_order() {
        let db = test_db().await;
        let t1 = add(&db, "alice", "T1").await;
        let t2 = add(&db, "alice", "T2").await;
        let t3 = add(&db, "alice", "T3").await;

        let query = TaskQuery {
            sort_by: SortKey::Priority,
            sort_order: SortOrder::Asc,
            ..Default::default()
        };
        let ids: Vec<i64> = db
            .list_tasks("alice", &query)
            .await
            .unwrap()
            .tasks
            .iter()
            .map(|t| t.id)
            .collect();
        assert_eq!(ids, vec![t1.id, t2.id, t3.id]);
    }

    #[tokio::test]
    async fn priority_sort_uses_rank() {
        let db = test_db().await;
        for (title, priority) in [("a", Priority::High), ("b", Priority::Low), ("c", Priority::Medium)] {
            db.create_task("alice", &NewTask::new(title).unwrap().with_priority(priority))
                .await
                .unwrap();
        }
        let query = TaskQuery {
            sort_by: SortKey::Priority,
            sort_order: SortOrder::Desc,
            ..Default::default()
        };
        let priorities: Vec<Priority> = db
            .list_tasks("alice", &query)
            .await
            .unwrap()
            .tasks
            .iter()
            .map(|t| t.priority)
            .collect();
        assert_eq!(priorities, vec![Priority::High, Priority::Medium, Priority::Low]);
    }

    #[tokio::test]
    async fn title_sort_ignores_case() {
        let db = test_db().await;
        for title in ["banana", "Apple", "cherry"] {
            add(&db, "alice", title).await;
        }
        let query = TaskQuery {
            sort_by: SortKey::Title,
            sort_order: SortOrder::Asc,
            ..Default::default()
        };
        let titles: Vec<String> = db
            .list_tasks("alice", &query)
            .await
            .unwrap()
            .tasks
            .into_iter()
            .map(|t| t.title)
            .collect();
        assert_eq!(titles, vec!["Apple", "banana", "cherry"]);
    }

    #[tokio::test]
    async fn filters_compose() {
        let db = test_db().await;
        let urgent = db
            .create_task("alice", &NewTask::new("Pay rent").unwrap().with_priority(Priority::High))
            .await
            .unwrap();
        db.create_task("alice", &NewTask::new("Pay later").unwrap().with_priority(Priority::Low))
            .await
            .unwrap();
        let done = add(&db, "alice", "Pay bills").await;
        db.toggle_complete("alice", done.id).await.unwrap();

        let query = TaskQuery {
            filter: TaskFilter {
                completed: Some(false),
                priorities: vec![Priority::High, Priority::Medium],
                search: Some("pay".into()),
                ..Default::default()
            },
            ..Default::default()
        };
        let page = db.list_tasks("alice", &query).await.unwrap();
        assert_eq!(page.total, 1);
        assert_eq!(page.tasks[0].id, urgent.id);
    }

    #[tokio::test]
    async fn search_matches_wildcards_literally() {
        let db = test_db().await;
        add(&db, "alice", "100% done").await;
        add(&db, "alice", "1000 things").await;
        db.create_task(
            "alice",
            &NewTask::new("other").unwrap().with_description("snake_case").unwrap(),
        )
        .await
        .unwrap();
        add(&db, "alice", "snakeXcase").await;

        let search = |s: &str| TaskQuery {
            filter: TaskFilter {
                search: Some(s.into()),
                ..Default::default()
            },
            ..Default::default()
        };
        let percent = db.list_tasks("alice", &search("100%")).await.unwrap();
        assert_eq!(percent.total, 1);
        assert_eq!(percent.tasks[0].title, "100% done");

        let underscore = db.list_tasks("alice", &search("SNAKE_")).await.unwrap();
        assert_eq!(underscore.total, 1);
        assert_eq!(underscore.tasks[0].title, "other");
    }

    #[tokio::test]
    async fn tag_filter_matches_any() {
        let db = test_db().await;
        let work = tag(&db, "alice", "work").await;
        let home = tag(&db, "alice", "home").await;
        let errands = tag(&db, "alice", "errands").await;

        db.create_task("alice", &NewTask::new("a").unwrap().with_tags(vec![work.id]))
            .await
            .unwrap();
        db.create_task("alice", &NewTask::new("b").unwrap().with_tags(vec![home.id, work.id]))
            .await
            .unwrap();
        db.create_task("alice", &NewTask::new("c").unwrap().with_tags(vec![errands.id]))
            .await
            .unwrap();

        let query = TaskQuery {
            filter: TaskFilter {
                tag_ids: vec![work.id, home.id],
                ..Default::default()
            },
            ..Default::default()
        };
        let page = db.list_tasks("alice", &query).await.unwrap();
        assert_eq!(page.total, 2);
        let b = page.tasks.iter().find(|t| t.title == "b").unwrap();
        let names: Vec<&str> = b.tags.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["home", "work"]);
    }

    // ── Tags ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn tag_upsert_is_idempotent() {
        let db = test_db().await;
        let first = tag(&db, "alice", "Work").await;
        let second = tag(&db, "alice", " work ").await;
        assert_eq!(first.id, second.id);
        assert_eq!(second.name, "work");

        let bobs = tag(&db, "bob", "work").await;
        assert_ne!(bobs.id, first.id);
    }

    #[tokio::test]
    async fn concurrent_upserts_return_one_tag() {
        let db = Arc::new(test_db().await);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let db = Arc::clone(&db);
                tokio::spawn(async move {
                    db.get_or_create_tag("alice", &TagName::parse("shared").unwrap())
                        .await
                        .unwrap()
                        .id
                })
            })
            .collect();
        let mut ids = Vec::new();
        for h in handles {
            ids.push(h.await.unwrap());
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
    }

    #[tokio::test]
    async fn replace_associations_clears_and_skips_foreign() {
        let db = test_db().await;
        let mine = tag(&db, "alice", "mine").await;
        let theirs = tag(&db, "bob", "theirs").await;
        let task = add(&db, "alice", "task").await;

        db.replace_associations("alice", task.id, &[mine.id, theirs.id, 9999, mine.id])
            .await
            .unwrap();
        let tags = db.get_task("alice", task.id).await.unwrap().tags;
        assert_eq!(tags, vec![mine]);

        db.replace_associations("alice", task.id, &[]).await.unwrap();
        assert!(db.get_task("alice", task.id).await.unwrap().tags.is_empty());
    }

    #[tokio::test]
    async fn cannot_associate_onto_foreign_task() {
        let db = test_db().await;
        let task = add(&db, "alice", "task").await;
        let bobs = tag(&db, "bob", "x").await;
        assert!(is_not_found(
            db.replace_associations("bob", task.id, &[bobs.id]).await
        ));
    }

    #[tokio::test]
    async fn update_with_tags_replaces_set() {
        let db = test_db().await;
        let a = tag(&db, "alice", "a").await;
        let b = tag(&db, "alice", "b").await;
        let task = db
            .create_task("alice", &NewTask::new("t").unwrap().with_tags(vec![a.id]))
            .await
            .unwrap();

        let updated = db
            .update_task("alice", task.id, &TaskPatch::new().tags(vec![b.id]))
            .await
            .unwrap();
        assert_eq!(updated.tags, vec![b]);
    }

    #[tokio::test]
    async fn delete_tag_keeps_tasks() {
        let db = test_db().await;
        let work = tag(&db, "alice", "work").await;
        let task = db
            .create_task("alice", &NewTask::new("t").unwrap().with_tags(vec![work.id]))
            .await
            .unwrap();

        assert!(is_not_found(db.delete_tag("bob", work.id).await));
        db.delete_tag("alice", work.id).await.unwrap();
        assert!(is_not_found(db.get_tag("alice", work.id).await));

        let survivor = db.get_task("alice", task.id).await.unwrap();
        assert!(survivor.tags.is_empty());
    }

    #[tokio::test]
    async fn list_and_autocomplete_tags() {
        let db = test_db().await;
        for name in ["work", "workout", "home", "w_x"] {
            tag(&db, "alice", name).await;
        }
        tag(&db, "bob", "workshop").await;

        let all = db
            .list_tags("alice", None, Pagination::default())
            .await
            .unwrap();
        let names: Vec<&str> = all.tags.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["home", "w_x", "work", "workout"]);
        assert_eq!(all.total, 4);

        let filtered = db
            .list_tags("alice", Some("OUT"), Pagination::default())
            .await
            .unwrap();
        assert_eq!(filtered.total, 1);

        let suggestions = db.autocomplete_tags("alice", " Wo", 10).await.unwrap();
        assert_eq!(suggestions, vec!["work", "workout"]);
        let limited = db.autocomplete_tags("alice", "w", 1).await.unwrap();
        assert_eq!(limited, vec!["w_x"]);
        let literal = db.autocomplete_tags("alice", "w_", 10).await.unwrap();
        assert_eq!(literal, vec!["w_x"]);
        assert!(db.autocomplete_tags("alice", "  ", 10).await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn readers_never_see_partial_tag_replacement() {
        let db = Arc::new(test_db().await);
        let id = add(&db, "alice", "busy").await.id;
        let a = tag(&db, "alice", "a").await.id;
        let b = tag(&db, "alice", "b").await.id;
        db.replace_associations("alice", id, &[a, b]).await.unwrap();

        let done = Arc::new(AtomicBool::new(false));
        let writer = {
            let db = Arc::clone(&db);
            let done = Arc::clone(&done);
            tokio::spawn(async move {
                for _ in 0..300 {
                    db.replace_associations("alice", id, &[a, b]).await.unwrap();
                }
                done.store(true, Ordering::SeqCst);
            })
        };

        let readers: Vec<_> = (0..3)
            .map(|i| {
                let db = Arc::clone(&db);
                let done = Arc::clone(&done);
                tokio::spawn(async move {
                    let mut partial = 0usize;
                    while !done.load(Ordering::SeqCst) {
                        let tags = if i == 0 {
                            db.list_tasks("alice", &TaskQuery::default())
                                .await
                                .unwrap()
                                .tasks
                                .remove(0)
                                .tags
                        } else {
                            db.get_task("alice", id).await.unwrap().tags
                        };
                        if tags.len() != 2 {
                            partial += 1;
                        }
                    }
                    partial
                })
            })
            .collect();

        writer.await.unwrap();
        for reader in readers {
            assert_eq!(reader.await.unwrap(), 0);
        }
    }

    // ── Accounts ────────────────────────────────────────────────────

    fn new_user(email: &str) -> NewUser {
        NewUser {
            email: Email::parse(email).unwrap(),
            name: Some("Ada".into()),
        }
    }

    #[tokio::test]
    async fn create_and_find_user() {
        let db = test_db().await;
        let user = db.create_user(&new_user("Ada@Example.com"), "hash-1").await.unwrap();
        assert_eq!(user.email, "ada@example.com");
        assert_eq!(user.name.as_deref(), Some("Ada"));
        assert!(!user.id.is_empty());

        let (found, hash) = db
            .find_user_credentials(&Email::parse("ada@example.com").unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found, user);
        assert_eq!(hash, "hash-1");
        assert_eq!(db.get_user(&user.id).await.unwrap(), user);

        let missing = db
            .find_user_credentials(&Email::parse("nobody@example.com").unwrap())
            .await
            .unwrap();
        assert!(missing.is_none());
        assert!(is_not_found(db.get_user("no-such-id").await));
    }

    #[tokio::test]
    async fn duplicate_email_is_constraint() {
        let db = test_db().await;
        db.create_user(&new_user("ada@example.com"), "h").await.unwrap();
        let err = db
            .create_user(&new_user("ADA@example.com"), "h")
            .await
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Constraint(_)));
    }

    #[tokio::test]
    async fn revoked_tokens_are_remembered_and_pruned() {
        let db = test_db().await;
        assert!(!db.is_token_revoked("t1").await.unwrap());

        db.revoke_token("stale", Utc::now() - chrono::Duration::minutes(1))
            .await
            .unwrap();
        db.revoke_token("t1", Utc::now() + chrono::Duration::hours(1))
            .await
            .unwrap();
        db.revoke_token("t1", Utc::now() + chrono::Duration::hours(1))
            .await
            .unwrap();

        assert!(db.is_token_revoked("t1").await.unwrap());
        assert!(!db.is_token_revoked("stale").await.unwrap());
    }

    // ── Files ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn local_file_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("taskflow.db");

        let id = {
            let db = LibSqlBackend::new_local(&path).await.unwrap();
            add(&db, "alice", "persisted").await.id
        };

        let db = LibSqlBackend::new_local(&path).await.unwrap();
        assert_eq!(db.get_task("alice", id).await.unwrap().title, "persisted");
        db.ping().await.unwrap();
    }
}
