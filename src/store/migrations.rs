//! Schema migrations for the libSQL backend, tracked in `schema_version`.

use libsql::Connection;

use crate::error::DatabaseError;

struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// Append only.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial_schema",
        sql: r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                completed INTEGER NOT NULL DEFAULT 0,
                priority TEXT NOT NULL DEFAULT 'medium',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_tasks_user ON tasks(user_id);
            CREATE INDEX IF NOT EXISTS idx_tasks_user_completed ON tasks(user_id, completed);
            CREATE INDEX IF NOT EXISTS idx_tasks_user_created ON tasks(user_id, created_at);

            CREATE TABLE IF NOT EXISTS tags (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                user_id TEXT NOT NULL,
                name TEXT NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE (user_id, name)
            );

            CREATE TABLE IF NOT EXISTS task_tags (
                task_id INTEGER NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
                tag_id INTEGER NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
                PRIMARY KEY (task_id, tag_id)
            );
            CREATE INDEX IF NOT EXISTS idx_task_tags_tag ON task_tags(tag_id);
        "#,
    },
    Migration {
        version: 2,
        name: "accounts",
        sql: r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                name TEXT,
                password_hash TEXT NOT NULL,
                created_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS revoked_tokens (
                token_id TEXT PRIMARY KEY,
                expires_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_revoked_tokens_expiry ON revoked_tokens(expires_at);
        "#,
    },
];

/// Bring the schema up to the latest version.
///
/// Each pending step runs together with its `schema_version` row in one
/// transaction, so a failed step leaves the previous version intact.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("schema_version table: {e}")))?;

    let applied = current_version(conn).await?;
    let pending = MIGRATIONS.iter().filter(|m| m.version > applied);

    for step in pending {
        tracing::info!(version = step.version, name = step.name, "Applying migration");
        apply(conn, step).await.map_err(|e| {
            DatabaseError::Migration(format!("V{} {}: {e}", step.version, step.name))
        })?;
    }

    Ok(())
}

async fn apply(conn: &Connection, step: &Migration) -> Result<(), libsql::Error> {
    let tx = conn.transaction().await?;
    tx.execute_batch(step.sql).await?;
    tx.execute(
        "INSERT INTO schema_version (version, name) VALUES (?1, ?2)",
        libsql::params![step.version, step.name],
    )
    .await?;
    tx.commit().await
}

/// Highest applied version, 0 on a fresh database.
async fn current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let read = async {
        let mut rows = conn
            .query("SELECT COALESCE(MAX(version), 0) FROM schema_version", ())
            .await?;
        match rows.next().await? {
            Some(row) => row.get::<i64>(0),
            None => Ok(0),
        }
    };
    read.await
        .map_err(|e| DatabaseError::Migration(format!("read schema version: {e}")))
}
