//! Episode task queue: insertion, the deduplicating claim, queries and housekeeping.

use crate::dedup;
use crate::error::DatabaseError;
use crate::types::{AnimeId, EpisodeTask, TaskId};
use crate::{Error, Result};
use sqlx::SqliteConnection;
use std::collections::BTreeSet;

use super::anime::set_anime_locked;
use super::{Database, EpisodeTaskRow, NewEpisodeTask, begin_immediate, commit, rollback};

pub(super) const TASK_COLUMNS: &str = r#"
    sequence_id, anime_id, episode_number, content_hash, staged_file, magnet,
    destination_path, publish_time, locked, completed, succeeded
"#;

/// Outcome of [`Database::claim_runnable_tasks`]
#[derive(Debug, Default, Clone)]
pub struct ClaimedTasks {
    /// Tasks now locked by the caller, in arrival order
    pub runnable: Vec<EpisodeTask>,
    /// Tasks completed without delivery because a newer task took their slot
    pub superseded: Vec<EpisodeTask>,
    /// Unlocked anime locked by this claim because they own runnable tasks;
    /// the caller now owns them alongside the anime it passed in
    pub adopted: Vec<AnimeId>,
}

impl Database {
    /// Insert new episode tasks in one transaction
    ///
    /// Sequence ids are assigned in slice order.
    pub async fn insert_episode_tasks(&self, tasks: &[NewEpisodeTask]) -> Result<Vec<TaskId>> {
        if tasks.is_empty() {
            return Ok(Vec::new());
        }

        let mut conn = self.pool.acquire().await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to acquire connection: {}",
                e
            )))
        })?;
        let conn: &mut SqliteConnection = &mut conn;
        let now = chrono::Utc::now().timestamp();

        begin_immediate(conn).await?;
        let result = async {
            let mut ids = Vec::with_capacity(tasks.len());
            for task in tasks {
                let result = sqlx::query(
                    r#"
                    INSERT INTO episode_tasks (
                        anime_id, episode_number, content_hash, staged_file, magnet,
                        destination_path, publish_time, locked, completed, succeeded, created_at
                    ) VALUES (?, ?, ?, ?, ?, ?, ?, 0, 0, 0, ?)
                    "#,
                )
                .bind(&task.anime_id)
                .bind(task.episode_number as i64)
                .bind(&task.content_hash)
                .bind(
                    task.staged_file
                        .as_ref()
                        .map(|p| p.to_string_lossy().into_owned()),
                )
                .bind(&task.magnet)
                .bind(task.destination_path.to_string_lossy().into_owned())
                .bind(task.publish_time)
                .bind(now)
                .execute(&mut *conn)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to insert episode task: {}",
                        e
                    )))
                })?;
                ids.push(TaskId(result.last_insert_rowid()));
            }
            Ok::<_, Error>(ids)
        }
        .await;

        match result {
            Ok(ids) => {
                commit(conn, "episode task insert").await?;
                Ok(ids)
            }
            Err(e) => {
                rollback(conn).await;
                Err(e)
            }
        }
    }

    /// Select and claim the runnable episode tasks
    ///
    /// Scans every uncompleted task in arrival order, marks superseded tasks
    /// completed (unsuccessful) and locks the runnable ones, all in one
    /// transaction. See [`crate::dedup`] for the selection rules.
    ///
    /// `owned` is the set of anime the caller has already locked. Tasks of
    /// anime locked by anyone else are not considered at all. An unlocked
    /// anime that owns a runnable task is locked in the same transaction and
    /// reported in [`ClaimedTasks::adopted`].
    pub async fn claim_runnable_tasks(&self, owned: &[AnimeId]) -> Result<ClaimedTasks> {
        let mut conn = self.pool.acquire().await.map_err(|e| {
            Error::Database(DatabaseError::ConnectionFailed(format!(
                "Failed to acquire connection: {}",
                e
            )))
        })?;
        let conn: &mut SqliteConnection = &mut conn;
        let now = chrono::Utc::now().timestamp();
        let owned: BTreeSet<&AnimeId> = owned.iter().collect();

        begin_immediate(conn).await?;
        let result = async {
            let locked_elsewhere: BTreeSet<AnimeId> =
                sqlx::query_scalar::<_, AnimeId>("SELECT id FROM anime WHERE locked = 1")
                    .fetch_all(&mut *conn)
                    .await
                    .map_err(|e| {
                        Error::Database(DatabaseError::QueryFailed(format!(
                            "Failed to read anime locks: {}",
                            e
                        )))
                    })?
                    .into_iter()
                    .filter(|id| !owned.contains(id))
                    .collect();

            let query = format!(
                "SELECT {} FROM episode_tasks WHERE completed = 0 ORDER BY sequence_id ASC",
                TASK_COLUMNS
            );
            let pending: Vec<EpisodeTask> = sqlx::query_as::<_, EpisodeTaskRow>(&query)
                .fetch_all(&mut *conn)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to read pending episode tasks: {}",
                        e
                    )))
                })?
                .into_iter()
                .map(EpisodeTask::from)
                .filter(|task| !locked_elsewhere.contains(&task.anime_id))
                .collect();

            let selection = dedup::select_runnable(&pending);

            for task in &selection.superseded {
                sqlx::query(
                    r#"
                    UPDATE episode_tasks
                    SET completed = 1, succeeded = 0, locked = 0, completed_at = ?
                    WHERE sequence_id = ?
                    "#,
                )
                .bind(now)
                .bind(task.sequence_id)
                .execute(&mut *conn)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to supersede episode task: {}",
                        e
                    )))
                })?;
            }

            for task in &selection.runnable {
                sqlx::query("UPDATE episode_tasks SET locked = 1 WHERE sequence_id = ?")
                    .bind(task.sequence_id)
                    .execute(&mut *conn)
                    .await
                    .map_err(|e| {
                        Error::Database(DatabaseError::QueryFailed(format!(
                            "Failed to lock episode task: {}",
                            e
                        )))
                    })?;
            }

            let adopted: BTreeSet<AnimeId> = selection
                .runnable
                .iter()
                .filter(|task| !owned.contains(&task.anime_id))
                .map(|task| task.anime_id.clone())
                .collect();
            for anime_id in &adopted {
                set_anime_locked(conn, anime_id, true).await?;
            }

            let runnable = selection
                .runnable
                .into_iter()
                .map(|mut task| {
                    task.locked = true;
                    task
                })
                .collect();
            let superseded = selection
                .superseded
                .into_iter()
                .map(|mut task| {
                    task.completed = true;
                    task
                })
                .collect();

            Ok::<_, Error>(ClaimedTasks {
                runnable,
                superseded,
                adopted: adopted.into_iter().collect(),
            })
        }
        .await;

        match result {
            Ok(claimed) => {
                commit(conn, "episode task claim").await?;
                Ok(claimed)
            }
            Err(e) => {
                rollback(conn).await;
                Err(e)
            }
        }
    }

    /// Get an episode task by sequence id
    pub async fn get_episode_task(&self, id: TaskId) -> Result<Option<EpisodeTask>> {
        let query = format!(
            "SELECT {} FROM episode_tasks WHERE sequence_id = ?",
            TASK_COLUMNS
        );
        let row = sqlx::query_as::<_, EpisodeTaskRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to get episode task: {}",
                    e
                )))
            })?;

        Ok(row.map(EpisodeTask::from))
    }

    /// List episode tasks in arrival order
    ///
    /// `None` disables the corresponding filter.
    pub async fn list_episode_tasks(
        &self,
        completed: Option<bool>,
        locked: Option<bool>,
    ) -> Result<Vec<EpisodeTask>> {
        let query = format!(
            r#"
            SELECT {} FROM episode_tasks
            WHERE (? IS NULL OR completed = ?)
              AND (? IS NULL OR locked = ?)
            ORDER BY sequence_id ASC
            "#,
            TASK_COLUMNS
        );
        let rows = sqlx::query_as::<_, EpisodeTaskRow>(&query)
            .bind(completed)
            .bind(completed)
            .bind(locked)
            .bind(locked)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to list episode tasks: {}",
                    e
                )))
            })?;

        Ok(rows.into_iter().map(EpisodeTask::from).collect())
    }

    /// Unlock every episode task (startup recovery)
    ///
    /// Returns the number of rows that were locked.
    pub async fn release_all_task_locks(&self) -> Result<u64> {
        let result = sqlx::query("UPDATE episode_tasks SET locked = 0 WHERE locked = 1")
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to release episode task locks: {}",
                    e
                )))
            })?;

        Ok(result.rows_affected())
    }

    /// Delete completed tasks beyond the newest `capacity`
    ///
    /// Returns the number of deleted rows.
    pub async fn purge_completed_tasks(&self, capacity: u32) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM episode_tasks
            WHERE completed = 1
              AND sequence_id NOT IN (
                  SELECT sequence_id FROM episode_tasks
                  WHERE completed = 1
                  ORDER BY sequence_id DESC
                  LIMIT ?
              )
            "#,
        )
        .bind(capacity as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to purge completed episode tasks: {}",
                e
            )))
        })?;

        Ok(result.rows_affected())
    }
}
