//! Runnable task selection.

use crate::db::ClaimedTasks;
use crate::error::Result;
use crate::types::{AnimeId, Event};

use super::Orchestrator;
use super::library::remove_staged_files;

impl Orchestrator {
    /// Claim the runnable episode tasks
    ///
    /// Older queued tasks for a slot are superseded and their staged files
    /// deleted before the batch is returned, so no copy worker ever sees a
    /// superseded task. Slots with an in-flight delivery are left alone.
    ///
    /// `owned` is the set of anime the calling cycle holds. Tasks of anime
    /// locked by another cycle, or by a change in progress, are skipped.
    /// Unlocked anime with runnable tasks are locked and returned in
    /// [`ClaimedTasks::adopted`]; the caller must release them when it
    /// reconciles.
    pub async fn select_runnable_tasks(&self, owned: &[AnimeId]) -> Result<ClaimedTasks> {
        let claimed = self.db.claim_runnable_tasks(owned).await?;

        if !claimed.superseded.is_empty() {
            remove_staged_files(
                claimed
                    .superseded
                    .iter()
                    .filter_map(|t| t.staged_file.as_ref()),
            )
            .await;

            let ids: Vec<_> = claimed.superseded.iter().map(|t| t.sequence_id).collect();
            tracing::info!(count = ids.len(), "Superseded older episode tasks");
            self.emit_event(Event::TasksSuperseded { ids });
        }

        tracing::debug!(
            runnable = claimed.runnable.len(),
            adopted = claimed.adopted.len(),
            "Selected runnable tasks"
        );
        Ok(claimed)
    }
}
