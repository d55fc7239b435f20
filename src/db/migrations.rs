//! Database lifecycle and schema migrations.

use crate::error::DatabaseError;
use crate::{Error, Result};
use sqlx::SqliteConnection;
use sqlx::sqlite::SqlitePool;
use std::path::Path;

use super::{Database, begin_immediate, commit, rollback};

impl Database {
    /// Create a new database connection
    ///
    /// Creates the database file if it doesn't exist and runs migrations.
    pub async fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "Failed to create database directory: {}",
                    e
                )))
            })?;
        }

        use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
        use std::str::FromStr;

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "Failed to parse database path: {}",
                    e
                )))
            })?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(10));

        let pool = SqlitePool::connect_with(options).await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to connect to database: {}",
                e
            )))
        })?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Close the connection pool
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Apply every migration newer than the recorded schema version
    async fn run_migrations(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to acquire connection: {}",
                e
            )))
        })?;
        let conn: &mut SqliteConnection = &mut conn;

        execute_ddl(
            conn,
            "schema_version table",
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at INTEGER NOT NULL
            )",
        )
        .await?;

        let applied: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM schema_version")
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::MigrationFailed(format!(
                    "Failed to query schema version: {}",
                    e
                )))
            })?;

        for (version, statements) in MIGRATIONS {
            if *version > applied {
                apply_migration(conn, *version, statements).await?;
            }
        }

        Ok(())
    }
}

/// `(version, statements)` in ascending version order
const MIGRATIONS: &[(i64, &[(&str, &str)])] = &[(1, V1)];

/// Anime registry, episode task store and runtime state
///
/// The anime CHECK backs the query-text / feed-URL exclusivity. The partial
/// unique index allows at most one locked task per (anime, episode) slot.
const V1: &[(&str, &str)] = &[
    (
        "anime table",
        "CREATE TABLE anime (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            season INTEGER NOT NULL,
            storage_directory TEXT NOT NULL,
            source TEXT NOT NULL,
            query_text TEXT,
            feed_url TEXT,
            known_episodes TEXT NOT NULL DEFAULT '[]',
            newest_publish_time INTEGER NOT NULL DEFAULT 0,
            auto_update INTEGER NOT NULL DEFAULT 1,
            locked INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            CHECK ((query_text IS NULL) <> (feed_url IS NULL))
        )",
    ),
    (
        "anime update index",
        "CREATE INDEX idx_anime_update ON anime(auto_update, locked)",
    ),
    (
        "episode_tasks table",
        "CREATE TABLE episode_tasks (
            sequence_id INTEGER PRIMARY KEY AUTOINCREMENT,
            anime_id TEXT NOT NULL REFERENCES anime(id) ON DELETE CASCADE,
            episode_number INTEGER NOT NULL,
            content_hash TEXT NOT NULL,
            staged_file TEXT,
            magnet TEXT,
            destination_path TEXT NOT NULL,
            publish_time INTEGER NOT NULL,
            locked INTEGER NOT NULL DEFAULT 0,
            completed INTEGER NOT NULL DEFAULT 0,
            succeeded INTEGER NOT NULL DEFAULT 0,
            created_at INTEGER NOT NULL,
            completed_at INTEGER,
            CHECK ((staged_file IS NULL) <> (magnet IS NULL))
        )",
    ),
    (
        "pending task index",
        "CREATE INDEX idx_episode_tasks_pending ON episode_tasks(completed, sequence_id)",
    ),
    (
        "task slot index",
        "CREATE INDEX idx_episode_tasks_anime ON episode_tasks(anime_id, episode_number)",
    ),
    (
        "in-flight slot index",
        "CREATE UNIQUE INDEX idx_episode_tasks_in_flight
            ON episode_tasks(anime_id, episode_number) WHERE locked = 1",
    ),
    (
        "runtime_state table",
        "CREATE TABLE runtime_state (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        )",
    ),
];

/// Apply one migration and record it, all or nothing
async fn apply_migration(
    conn: &mut SqliteConnection,
    version: i64,
    statements: &[(&str, &str)],
) -> Result<()> {
    tracing::info!(version, "Applying database migration");

    begin_immediate(conn).await?;
    let result = async {
        for (what, sql) in statements {
            execute_ddl(conn, what, sql).await?;
        }
        sqlx::query("INSERT INTO schema_version (version, applied_at) VALUES (?, ?)")
            .bind(version)
            .bind(chrono::Utc::now().timestamp())
            .execute(&mut *conn)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::MigrationFailed(format!(
                    "Failed to record migration v{}: {}",
                    version, e
                )))
            })?;
        Ok::<_, Error>(())
    }
    .await;

    match result {
        Ok(()) => {
            commit(conn, "migration").await?;
            tracing::info!(version, "Database migration complete");
            Ok(())
        }
        Err(e) => {
            rollback(conn).await;
            Err(e)
        }
    }
}

async fn execute_ddl(conn: &mut SqliteConnection, what: &str, sql: &str) -> Result<()> {
    sqlx::query(sql).execute(&mut *conn).await.map_err(|e| {
        Error::Database(DatabaseError::MigrationFailed(format!(
            "Failed to create {}: {}",
            what, e
        )))
    })?;
    Ok(())
}
