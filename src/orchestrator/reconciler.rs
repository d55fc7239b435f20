//! Writing delivery outcomes back and releasing the cycle's locks.

use crate::db::FinalizeSummary;
use crate::error::Result;
use crate::types::{AnimeId, Event, TaskId};

use super::Orchestrator;
use super::library::remove_staged_files;

impl Orchestrator {
    /// Commit delivery outcomes, release locks and refresh the media server
    ///
    /// Every anime in `claimed_anime` (the anime the cycle owns) is released
    /// whether or not anything was delivered; no other lock is touched.
    /// Staged `.torrent` files of finalized tasks are no longer needed and are
    /// removed. A failing media server refresh is logged and reported as an
    /// event; the delivery itself is not rolled back.
    pub async fn finalize(
        &self,
        succeeded: &[TaskId],
        failed: &[TaskId],
        claimed_anime: &[AnimeId],
    ) -> Result<FinalizeSummary> {
        let summary = self
            .db
            .finalize_delivery(succeeded, failed, claimed_anime)
            .await?;

        for task in &summary.tasks {
            self.emit_event(Event::TaskFinalized {
                id: task.sequence_id,
                succeeded: task.succeeded,
            });
        }
        for (anime_id, episodes) in &summary.delivered {
            tracing::info!(anime_id = %anime_id, episodes = ?episodes, "Recorded delivered episodes");
        }

        remove_staged_files(summary.tasks.iter().filter_map(|t| t.staged_file.as_ref())).await;

        if let Err(e) = self.collaborators.media_server.refresh().await {
            tracing::warn!(error = %e, "Media server refresh failed");
            self.emit_event(Event::LibraryRefreshFailed {
                error: e.to_string(),
            });
        }

        tracing::debug!(
            finalized = summary.tasks.len(),
            released = summary.released.len(),
            "Reconciled delivery"
        );
        Ok(summary)
    }
}
