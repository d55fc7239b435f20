//! Write-back of delivery outcomes.

use crate::error::DatabaseError;
use crate::types::{AnimeId, EpisodeTask, TaskId};
use crate::{Error, Result};
use sqlx::SqliteConnection;
use std::collections::{BTreeMap, BTreeSet};

use super::{Database, EpisodeTaskRow, begin_immediate, commit, rollback};
use super::episode_tasks::TASK_COLUMNS;

/// What [`Database::finalize_delivery`] changed
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FinalizeSummary {
    /// Finalized tasks, with their new flags
    pub tasks: Vec<EpisodeTask>,
    /// Episodes appended per anime
    pub delivered: BTreeMap<AnimeId, BTreeSet<u32>>,
    /// Anime unlocked by this call (the caller's claimed set)
    pub released: BTreeSet<AnimeId>,
}

impl Database {
    /// Commit delivery outcomes and release the cycle's locks
    ///
    /// In one transaction:
    /// - every task in `succeeded` / `failed` becomes completed and unlocked,
    ///   with `succeeded` set accordingly (a failed delivery is terminal);
    /// - the episode numbers of successful tasks are merged into their anime's
    ///   known set and the anime's newest publish time is raised;
    /// - every anime in `claimed_anime` is unlocked whether or not anything
    ///   was delivered. No other anime is unlocked: a lock held by another
    ///   cycle or by a change in progress is left alone.
    pub async fn finalize_delivery(
        &self,
        succeeded: &[TaskId],
        failed: &[TaskId],
        claimed_anime: &[AnimeId],
    ) -> Result<FinalizeSummary> {
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
            let mut summary = FinalizeSummary::default();
            let mut newest: BTreeMap<AnimeId, i64> = BTreeMap::new();

            let outcomes = succeeded
                .iter()
                .map(|id| (*id, true))
                .chain(failed.iter().map(|id| (*id, false)));

            for (id, success) in outcomes {
                let Some(mut task) = finalize_task(conn, id, success, now).await? else {
                    tracing::warn!(task_id = id.0, "Finalized task no longer exists");
                    continue;
                };
                task.completed = true;
                task.succeeded = success;
                task.locked = false;

                if success {
                    summary
                        .delivered
                        .entry(task.anime_id.clone())
                        .or_default()
                        .insert(task.episode_number);
                    let watermark = newest.entry(task.anime_id.clone()).or_insert(i64::MIN);
                    *watermark = (*watermark).max(task.publish_time);
                }
                summary.tasks.push(task);
            }

            summary.released.extend(claimed_anime.iter().cloned());

            let touched: BTreeSet<&AnimeId> = summary
                .released
                .iter()
                .chain(summary.delivered.keys())
                .collect();
            for anime_id in touched {
                let episodes = summary.delivered.get(anime_id);
                let publish_time = newest.get(anime_id).copied();
                let release = summary.released.contains(anime_id);
                record_and_release(conn, anime_id, episodes, publish_time, release).await?;
            }

            Ok::<_, Error>(summary)
        }
        .await;

        match result {
            Ok(summary) => {
                commit(conn, "delivery finalization").await?;
                Ok(summary)
            }
            Err(e) => {
                rollback(conn).await;
                Err(e)
            }
        }
    }
}

async fn finalize_task(
    conn: &mut SqliteConnection,
    id: TaskId,
    success: bool,
    now: i64,
) -> Result<Option<EpisodeTask>> {
    sqlx::query(
        r#"
        UPDATE episode_tasks
        SET completed = 1, succeeded = ?, locked = 0, completed_at = ?
        WHERE sequence_id = ?
        "#,
    )
    .bind(success)
    .bind(now)
    .bind(id)
    .execute(&mut *conn)
    .await
    .map_err(|e| {
        Error::Database(DatabaseError::QueryFailed(format!(
            "Failed to finalize episode task: {}",
            e
        )))
    })?;

    let query = format!(
        "SELECT {} FROM episode_tasks WHERE sequence_id = ?",
        TASK_COLUMNS
    );
    let row = sqlx::query_as::<_, EpisodeTaskRow>(&query)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to read finalized episode task: {}",
                e
            )))
        })?;

    Ok(row.map(EpisodeTask::from))
}

async fn record_and_release(
    conn: &mut SqliteConnection,
    anime_id: &AnimeId,
    episodes: Option<&BTreeSet<u32>>,
    publish_time: Option<i64>,
    release: bool,
) -> Result<()> {
    let current: Option<(String, i64)> = sqlx::query_as(
        "SELECT known_episodes, newest_publish_time FROM anime WHERE id = ?",
    )
    .bind(anime_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| {
        Error::Database(DatabaseError::QueryFailed(format!(
            "Failed to read anime episodes: {}",
            e
        )))
    })?;

    // Deleted while the cycle ran; nothing to release.
    let Some((known_json, newest_publish_time)) = current else {
        return Ok(());
    };

    let mut known: BTreeSet<u32> = serde_json::from_str(&known_json).map_err(|e| {
        Error::Database(DatabaseError::CorruptRow(format!(
            "anime {} has unreadable episode list: {}",
            anime_id, e
        )))
    })?;
    if let Some(episodes) = episodes {
        known.extend(episodes.iter().copied());
    }
    let newest_publish_time =
        publish_time.map_or(newest_publish_time, |t| t.max(newest_publish_time));

    sqlx::query(
        r#"
        UPDATE anime
        SET known_episodes = ?, newest_publish_time = ?,
            locked = CASE WHEN ? THEN 0 ELSE locked END
        WHERE id = ?
        "#,
    )
    .bind(serde_json::to_string(&known)?)
    .bind(newest_publish_time)
    .bind(release)
    .bind(anime_id)
    .execute(&mut *conn)
    .await
    .map_err(|e| {
        Error::Database(DatabaseError::QueryFailed(format!(
            "Failed to record delivered episodes: {}",
            e
        )))
    })?;

    Ok(())
}
