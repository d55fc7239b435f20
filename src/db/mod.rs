//! Database layer for autoanime
//!
//! Handles SQLite persistence for the anime registry and the episode task store.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`] - Database lifecycle, schema migrations
//! - [`anime`] - Anime registry CRUD and the anime claim protocol
//! - [`episode_tasks`] - Episode task queue and the deduplicating claim
//! - [`reconcile`] - Write-back of delivery outcomes
//! - [`state`] - Runtime state (shutdown tracking)
//!
//! ## Lock flags
//!
//! Ownership of an anime or task by an update cycle is the persistent `locked`
//! column, not an in-memory lock. Every claim is one `BEGIN IMMEDIATE` transaction
//! that selects the unlocked rows and marks them in the same critical section, so
//! two cycles (even in different processes sharing the file) can never both
//! claim a row.

use crate::error::DatabaseError;
use crate::types::{AnimeEntry, AnimeId, AnimeSource, EpisodeTask, Subscription, TaskId};
use crate::{Error, Result};
use sqlx::{FromRow, SqliteConnection, sqlite::SqlitePool};
use std::collections::BTreeSet;
use std::path::PathBuf;

mod anime;
mod episode_tasks;
mod migrations;
mod reconcile;
mod state;

pub use episode_tasks::ClaimedTasks;
pub use reconcile::FinalizeSummary;

/// New anime to be inserted into the registry
#[derive(Debug, Clone)]
pub struct NewAnime {
    /// Content-derived id
    pub id: AnimeId,
    /// Series name
    pub name: String,
    /// Season number
    pub season: u32,
    /// Directory episodes are copied into
    pub storage_directory: PathBuf,
    /// Feed backend
    pub source: AnimeSource,
    /// Search text or feed URL
    pub subscription: Subscription,
    /// Included in scheduled auto-update cycles
    pub auto_update: bool,
}

/// Validated change to an existing anime
///
/// `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct AnimeUpdate {
    /// New feed backend
    pub source: Option<AnimeSource>,
    /// New subscription
    pub subscription: Option<Subscription>,
    /// New auto-update flag
    pub auto_update: Option<bool>,
    /// Replacement for the known episode set
    pub known_episode_numbers: Option<BTreeSet<u32>>,
}

/// Anime record from database
#[derive(Debug, Clone, FromRow)]
pub struct AnimeRow {
    /// Content-derived id
    pub id: String,
    /// Series name
    pub name: String,
    /// Season number
    pub season: i64,
    /// Directory episodes are copied into
    pub storage_directory: String,
    /// Feed backend name (see [`AnimeSource::as_str`])
    pub source: String,
    /// Search text (exclusive with `feed_url`)
    pub query_text: Option<String>,
    /// Direct feed URL (exclusive with `query_text`)
    pub feed_url: Option<String>,
    /// Known episode numbers as a JSON array
    pub known_episodes: String,
    /// Newest delivered publish time (unix seconds)
    pub newest_publish_time: i64,
    /// Included in scheduled auto-update cycles
    pub auto_update: bool,
    /// Owned by an in-flight update cycle
    pub locked: bool,
}

impl TryFrom<AnimeRow> for AnimeEntry {
    type Error = Error;

    fn try_from(row: AnimeRow) -> Result<Self> {
        let source: AnimeSource = row.source.parse().map_err(|_| {
            Error::Database(DatabaseError::CorruptRow(format!(
                "anime {} has unknown source '{}'",
                row.id, row.source
            )))
        })?;

        let subscription =
            Subscription::from_parts(row.query_text.as_deref(), row.feed_url.as_deref())
                .map_err(|e| {
                    Error::Database(DatabaseError::CorruptRow(format!(
                        "anime {} has an invalid subscription: {}",
                        row.id, e
                    )))
                })?;

        let known_episode_numbers: BTreeSet<u32> = serde_json::from_str(&row.known_episodes)
            .map_err(|e| {
                Error::Database(DatabaseError::CorruptRow(format!(
                    "anime {} has unreadable episode list: {}",
                    row.id, e
                )))
            })?;

        Ok(AnimeEntry {
            id: AnimeId(row.id),
            name: row.name,
            season: row.season as u32,
            storage_directory: PathBuf::from(row.storage_directory),
            source,
            subscription,
            known_episode_numbers,
            newest_publish_time: row.newest_publish_time,
            auto_update: row.auto_update,
            locked: row.locked,
        })
    }
}

/// New episode task to be inserted into the task store
#[derive(Debug, Clone, PartialEq)]
pub struct NewEpisodeTask {
    /// Owning anime
    pub anime_id: AnimeId,
    /// Episode number within the season
    pub episode_number: u32,
    /// BitTorrent info-hash (lowercase hex)
    pub content_hash: String,
    /// Locally staged `.torrent` file
    pub staged_file: Option<PathBuf>,
    /// Magnet link
    pub magnet: Option<String>,
    /// Library path without extension
    pub destination_path: PathBuf,
    /// Publish time of the feed item (unix seconds)
    pub publish_time: i64,
}

/// Episode task record from database
#[derive(Debug, Clone, FromRow)]
pub struct EpisodeTaskRow {
    /// Arrival order
    pub sequence_id: i64,
    /// Owning anime
    pub anime_id: String,
    /// Episode number within the season
    pub episode_number: i64,
    /// BitTorrent info-hash (lowercase hex)
    pub content_hash: String,
    /// Locally staged `.torrent` file
    pub staged_file: Option<String>,
    /// Magnet link
    pub magnet: Option<String>,
    /// Library path without extension
    pub destination_path: String,
    /// Publish time of the feed item (unix seconds)
    pub publish_time: i64,
    /// Owned by an in-flight delivery
    pub locked: bool,
    /// Terminal
    pub completed: bool,
    /// Delivered successfully
    pub succeeded: bool,
}

impl From<EpisodeTaskRow> for EpisodeTask {
    fn from(row: EpisodeTaskRow) -> Self {
        EpisodeTask {
            sequence_id: TaskId(row.sequence_id),
            anime_id: AnimeId(row.anime_id),
            episode_number: row.episode_number as u32,
            content_hash: row.content_hash,
            staged_file: row.staged_file.map(PathBuf::from),
            magnet: row.magnet,
            destination_path: PathBuf::from(row.destination_path),
            publish_time: row.publish_time,
            locked: row.locked,
            completed: row.completed,
            succeeded: row.succeeded,
        }
    }
}

/// Database handle for autoanime
pub struct Database {
    pool: SqlitePool,
}

/// Start a write transaction that takes the database write lock immediately
///
/// A deferred `BEGIN` would let two claimers read the same unlocked rows and
/// only conflict on the later write.
pub(crate) async fn begin_immediate(conn: &mut SqliteConnection) -> Result<()> {
    sqlx::query("BEGIN IMMEDIATE")
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to begin transaction: {}",
                e
            )))
        })?;
    Ok(())
}

pub(crate) async fn commit(conn: &mut SqliteConnection, what: &str) -> Result<()> {
    sqlx::query("COMMIT")
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to commit {}: {}",
                what, e
            )))
        })?;
    Ok(())
}

pub(crate) async fn rollback(conn: &mut SqliteConnection) {
    if let Err(e) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
        tracing::warn!(error = %e, "Rollback failed");
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;
