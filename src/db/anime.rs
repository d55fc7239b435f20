//! Anime registry CRUD and the anime claim protocol.

use crate::error::{DatabaseError, LibraryError};
use crate::types::{AnimeEntry, AnimeId};
use crate::{Error, Result};
use sqlx::SqliteConnection;
use std::path::PathBuf;

use super::{AnimeRow, AnimeUpdate, Database, NewAnime, begin_immediate, commit, rollback};

pub(super) const ANIME_COLUMNS: &str = r#"
    id, name, season, storage_directory, source, query_text, feed_url,
    known_episodes, newest_publish_time, auto_update, locked
"#;

impl Database {
    /// Insert a new anime
    ///
    /// Fails with [`LibraryError::AlreadyExists`] if an anime with the same id
    /// (same name and season) is already tracked.
    pub async fn insert_anime(&self, anime: &NewAnime) -> Result<()> {
        let now = chrono::Utc::now().timestamp();

        let result = sqlx::query(
            r#"
            INSERT INTO anime (
                id, name, season, storage_directory, source, query_text, feed_url,
                known_episodes, newest_publish_time, auto_update, locked, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, '[]', 0, ?, 0, ?)
            "#,
        )
        .bind(&anime.id)
        .bind(&anime.name)
        .bind(anime.season as i64)
        .bind(anime.storage_directory.to_string_lossy().into_owned())
        .bind(anime.source.as_str())
        .bind(anime.subscription.query_text())
        .bind(anime.subscription.direct_url())
        .bind(anime.auto_update)
        .bind(now)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(Error::Library(LibraryError::AlreadyExists {
                    id: anime.id.to_string(),
                }))
            }
            Err(e) => Err(Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to insert anime: {}",
                e
            )))),
        }
    }

    /// Get an anime by id
    pub async fn get_anime(&self, id: &AnimeId) -> Result<Option<AnimeEntry>> {
        let query = format!("SELECT {} FROM anime WHERE id = ?", ANIME_COLUMNS);
        let row = sqlx::query_as::<_, AnimeRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to get anime: {}",
                    e
                )))
            })?;

        row.map(AnimeEntry::try_from).transpose()
    }

    /// List all anime, ordered by name and season
    pub async fn list_anime(&self) -> Result<Vec<AnimeEntry>> {
        let query = format!(
            "SELECT {} FROM anime ORDER BY name ASC, season ASC",
            ANIME_COLUMNS
        );
        let rows = sqlx::query_as::<_, AnimeRow>(&query)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to list anime: {}",
                    e
                )))
            })?;

        rows.into_iter().map(AnimeEntry::try_from).collect()
    }

    /// List anime whose name contains `fragment`
    pub async fn search_anime_by_name(&self, fragment: &str) -> Result<Vec<AnimeEntry>> {
        let query = format!(
            "SELECT {} FROM anime WHERE instr(name, ?) > 0 ORDER BY name ASC, season ASC",
            ANIME_COLUMNS
        );
        let rows = sqlx::query_as::<_, AnimeRow>(&query)
            .bind(fragment)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to search anime: {}",
                    e
                )))
            })?;

        rows.into_iter().map(AnimeEntry::try_from).collect()
    }

    /// Claim anime for an update cycle
    ///
    /// Selects unlocked anime and locks them in one transaction. With
    /// `auto_update_only`, only anime with `auto_update` set whose newest
    /// publication is more than `min_refresh_secs` older than `now` are eligible.
    /// Rows already locked by another cycle are simply not returned.
    pub async fn claim_anime_for_update(
        &self,
        auto_update_only: bool,
        now: i64,
        min_refresh_secs: i64,
    ) -> Result<Vec<AnimeEntry>> {
        let mut conn = self.pool.acquire().await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to acquire connection: {}",
                e
            )))
        })?;
        let conn: &mut SqliteConnection = &mut conn;

        begin_immediate(conn).await?;

        let result = async {
            let query = format!(
                r#"
                SELECT {} FROM anime
                WHERE locked = 0
                  AND (? = 0 OR (auto_update = 1 AND ? - newest_publish_time > ?))
                ORDER BY name ASC, season ASC
                "#,
                ANIME_COLUMNS
            );
            let rows = sqlx::query_as::<_, AnimeRow>(&query)
                .bind(auto_update_only)
                .bind(now)
                .bind(min_refresh_secs)
                .fetch_all(&mut *conn)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to select anime for update: {}",
                        e
                    )))
                })?;

            let mut claimed = Vec::with_capacity(rows.len());
            for row in rows {
                let mut entry = AnimeEntry::try_from(row)?;
                set_anime_locked(conn, &entry.id, true).await?;
                entry.locked = true;
                claimed.push(entry);
            }
            Ok::<_, Error>(claimed)
        }
        .await;

        match result {
            Ok(claimed) => {
                commit(conn, "anime claim").await?;
                Ok(claimed)
            }
            Err(e) => {
                rollback(conn).await;
                Err(e)
            }
        }
    }

    /// Unlock the given anime
    pub async fn release_anime(&self, ids: &[AnimeId]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let mut conn = self.pool.acquire().await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to acquire connection: {}",
                e
            )))
        })?;
        let conn: &mut SqliteConnection = &mut conn;

        begin_immediate(conn).await?;
        let result = async {
            for id in ids {
                set_anime_locked(conn, id, false).await?;
            }
            Ok::<(), Error>(())
        }
        .await;

        match result {
            Ok(()) => commit(conn, "anime release").await,
            Err(e) => {
                rollback(conn).await;
                Err(e)
            }
        }
    }

    /// Lock a single anime for a change operation
    ///
    /// Returns `Ok(false)` if it is already locked and
    /// [`LibraryError::NotFound`] if it does not exist.
    pub async fn try_lock_anime(&self, id: &AnimeId) -> Result<bool> {
        let result = sqlx::query("UPDATE anime SET locked = 1 WHERE id = ? AND locked = 0")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to lock anime: {}",
                    e
                )))
            })?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }

        if self.anime_exists(id).await? {
            Ok(false)
        } else {
            Err(Error::Library(LibraryError::NotFound { id: id.to_string() }))
        }
    }

    /// Apply a validated change to an anime
    ///
    /// Does not touch the lock flag; callers hold the lock while changing.
    pub async fn update_anime(&self, id: &AnimeId, update: &AnimeUpdate) -> Result<AnimeEntry> {
        let mut entry = self
            .get_anime(id)
            .await?
            .ok_or_else(|| Error::Library(LibraryError::NotFound { id: id.to_string() }))?;

        if let Some(source) = update.source {
            entry.source = source;
        }
        if let Some(subscription) = &update.subscription {
            entry.subscription = subscription.clone();
        }
        if let Some(auto_update) = update.auto_update {
            entry.auto_update = auto_update;
        }
        if let Some(episodes) = &update.known_episode_numbers {
            entry.known_episode_numbers = episodes.clone();
        }

        let known_episodes = serde_json::to_string(&entry.known_episode_numbers)?;

        sqlx::query(
            r#"
            UPDATE anime
            SET source = ?, query_text = ?, feed_url = ?, auto_update = ?, known_episodes = ?
            WHERE id = ?
            "#,
        )
        .bind(entry.source.as_str())
        .bind(entry.subscription.query_text())
        .bind(entry.subscription.direct_url())
        .bind(entry.auto_update)
        .bind(known_episodes)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to update anime: {}",
                e
            )))
        })?;

        Ok(entry)
    }

    /// Delete an unlocked anime and its episode tasks
    ///
    /// Returns the staged `.torrent` files of the deleted tasks so the caller
    /// can remove them. Fails with [`LibraryError::Locked`] while an update
    /// cycle owns the anime.
    pub async fn delete_anime(&self, id: &AnimeId) -> Result<Vec<PathBuf>> {
        let mut conn = self.pool.acquire().await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to acquire connection: {}",
                e
            )))
        })?;
        let conn: &mut SqliteConnection = &mut conn;

        begin_immediate(conn).await?;
        let result = async {
            let locked: Option<bool> = sqlx::query_scalar("SELECT locked FROM anime WHERE id = ?")
                .bind(id)
                .fetch_optional(&mut *conn)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to read anime lock: {}",
                        e
                    )))
                })?;

            match locked {
                None => {
                    return Err(Error::Library(LibraryError::NotFound { id: id.to_string() }));
                }
                Some(true) => {
                    return Err(Error::Library(LibraryError::Locked { id: id.to_string() }));
                }
                Some(false) => {}
            }

            let staged: Vec<String> = sqlx::query_scalar(
                "SELECT staged_file FROM episode_tasks WHERE anime_id = ? AND staged_file IS NOT NULL",
            )
            .bind(id)
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to list staged files: {}",
                    e
                )))
            })?;

            sqlx::query("DELETE FROM anime WHERE id = ?")
                .bind(id)
                .execute(&mut *conn)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to delete anime: {}",
                        e
                    )))
                })?;

            Ok::<_, Error>(staged.into_iter().map(PathBuf::from).collect())
        }
        .await;

        match result {
            Ok(staged) => {
                commit(conn, "anime delete").await?;
                Ok(staged)
            }
            Err(e) => {
                rollback(conn).await;
                Err(e)
            }
        }
    }

    /// Unlock every anime (startup recovery)
    ///
    /// Returns the number of rows that were locked.
    pub async fn release_all_anime_locks(&self) -> Result<u64> {
        let result = sqlx::query("UPDATE anime SET locked = 0 WHERE locked = 1")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to release anime locks: {}",
                    e
                )))
            })?;

        Ok(result.rows_affected())
    }

    async fn anime_exists(&self, id: &AnimeId) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM anime WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to check anime existence: {}",
                    e
                )))
            })?;

        Ok(count > 0)
    }
}

pub(super) async fn set_anime_locked(
    conn: &mut SqliteConnection,
    id: &AnimeId,
    locked: bool,
) -> Result<()> {
    sqlx::query("UPDATE anime SET locked = ? WHERE id = ?")
        .bind(locked)
        .bind(id)
        .execute(&mut *conn)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to set anime lock: {}",
                e
            )))
        })?;
    Ok(())
}
