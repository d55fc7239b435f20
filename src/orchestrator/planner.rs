//! Update planning: claim eligible anime, read their feeds and queue every
//! newly published episode as an episode task.

use crate::db::NewEpisodeTask;
use crate::error::{Error, Result};
use crate::types::{AnimeEntry, AnimeId, Event, FeedItem};
use futures::future::join_all;
use std::collections::BTreeSet;

use super::Orchestrator;
use super::library::remove_staged_files;

/// Outcome of [`Orchestrator::plan_cycle`]
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PlanReport {
    /// Anime that produced tasks; they stay locked until reconciliation
    pub anime_ids: Vec<AnimeId>,
    /// Number of episode tasks inserted
    pub task_count: usize,
}

impl PlanReport {
    /// Number of anime that produced new tasks
    pub fn anime_count(&self) -> usize {
        self.anime_ids.len()
    }
}

impl Orchestrator {
    /// Claim eligible anime and queue their new episodes
    ///
    /// With `auto_update_only`, only anime with auto-update enabled whose newest
    /// delivered episode is older than the minimum refresh interval are
    /// considered; otherwise every unlocked anime is. A feed that cannot be
    /// fetched or parsed yields no tasks for its anime, and a single item whose
    /// locator cannot be resolved is skipped. Claimed anime without new tasks
    /// are released before returning.
    pub async fn plan_cycle(&self, auto_update_only: bool) -> Result<PlanReport> {
        if !self.is_accepting() {
            return Err(Error::ShuttingDown);
        }

        let now = chrono::Utc::now().timestamp();
        let min_refresh = self.config.update.min_refresh_interval.as_secs() as i64;
        let claimed = self
            .db
            .claim_anime_for_update(auto_update_only, now, min_refresh)
            .await?;

        if claimed.is_empty() {
            tracing::debug!(auto_update_only, "No anime eligible for update");
            return Ok(PlanReport::default());
        }
        tracing::info!(count = claimed.len(), auto_update_only, "Claimed anime for update");

        // Feeds are fetched concurrently; items of one anime stay in publish order
        let planned: Vec<Vec<NewEpisodeTask>> =
            join_all(claimed.iter().map(|anime| self.plan_anime(anime))).await;

        let mut report = PlanReport::default();
        let mut idle = Vec::new();
        let mut tasks = Vec::new();
        for (anime, anime_tasks) in claimed.iter().zip(planned) {
            if anime_tasks.is_empty() {
                idle.push(anime.id.clone());
            } else {
                report.anime_ids.push(anime.id.clone());
                tasks.extend(anime_tasks);
            }
        }

        if let Err(e) = self.db.insert_episode_tasks(&tasks).await {
            tracing::error!(error = %e, "Failed to queue episode tasks, releasing claimed anime");
            remove_staged_files(tasks.iter().filter_map(|t| t.staged_file.as_ref())).await;
            let all: Vec<AnimeId> = claimed.into_iter().map(|a| a.id).collect();
            if let Err(release_err) = self.db.release_anime(&all).await {
                tracing::error!(error = %release_err, "Failed to release claimed anime");
            }
            return Err(e);
        }
        report.task_count = tasks.len();

        self.db.release_anime(&idle).await?;

        tracing::info!(
            anime = report.anime_count(),
            tasks = report.task_count,
            released = idle.len(),
            "Planned update cycle"
        );
        self.emit_event(Event::TasksPlanned {
            anime_count: report.anime_count(),
            task_count: report.task_count,
        });

        Ok(report)
    }

    /// Read one anime's feed and build tasks for its undelivered episodes
    async fn plan_anime(&self, anime: &AnimeEntry) -> Vec<NewEpisodeTask> {
        let url = match anime.subscription.feed_url(anime.source) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(anime_id = %anime.id, error = %e, "Anime has no usable feed");
                return Vec::new();
            }
        };

        let items = match self.collaborators.feed.fetch(anime.source, &url).await {
            Ok(items) => items,
            Err(e) => {
                tracing::warn!(anime_id = %anime.id, url = %url, error = %e, "Failed to read feed");
                return Vec::new();
            }
        };

        let mut fresh = new_episodes(items, &anime.known_episode_numbers);
        // Newer releases of the same episode must get higher sequence ids
        fresh.sort_by_key(|(_, item)| item.publish_time);

        let mut tasks = Vec::with_capacity(fresh.len());
        for (episode, item) in fresh {
            match self.collaborators.resolver.resolve(&item.locator).await {
                Ok(resolved) => tasks.push(NewEpisodeTask {
                    anime_id: anime.id.clone(),
                    episode_number: episode,
                    content_hash: resolved.content_hash,
                    staged_file: resolved.staged_file,
                    magnet: resolved.magnet,
                    destination_path: anime.episode_destination(episode),
                    publish_time: item.publish_time,
                }),
                Err(e) => {
                    tracing::warn!(
                        anime_id = %anime.id,
                        title = %item.title,
                        error = %e,
                        "Skipping feed item with unusable locator"
                    );
                }
            }
        }

        tracing::debug!(anime_id = %anime.id, tasks = tasks.len(), "Planned anime");
        tasks
    }
}

/// Feed items naming a known, not yet delivered episode
fn new_episodes(items: Vec<FeedItem>, known: &BTreeSet<u32>) -> Vec<(u32, FeedItem)> {
    items
        .into_iter()
        .filter_map(|item| {
            let episode = item.episode.known()?;
            (!known.contains(&episode)).then_some((episode, item))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EpisodeNumber;

    fn item(title: &str, episode: EpisodeNumber, publish_time: i64) -> FeedItem {
        FeedItem {
            title: title.to_string(),
            episode,
            publish_time,
            locator: format!("magnet:?xt=urn:btih:{:040x}", publish_time),
        }
    }

    #[test]
    fn unknown_and_delivered_episodes_are_discarded() {
        let items = vec![
            item("batch", EpisodeNumber::Unknown, 1),
            item("ep1", EpisodeNumber::Known(1), 2),
            item("ep2", EpisodeNumber::Known(2), 3),
            item("ep2 v2", EpisodeNumber::Known(2), 4),
        ];
        let known: BTreeSet<u32> = [1].into_iter().collect();

        let fresh = new_episodes(items, &known);

        let titles: Vec<&str> = fresh.iter().map(|(_, i)| i.title.as_str()).collect();
        assert_eq!(titles, vec!["ep2", "ep2 v2"]);
    }
}
