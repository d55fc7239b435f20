//! Startup recovery and shutdown coordination.

use crate::config::Config;
use crate::db::Database;
use crate::error::Result;
use crate::types::Event;
use std::sync::atomic::Ordering;

use super::Orchestrator;

/// Bring the stores back to a consistent state after a restart
///
/// No update cycle survives the process, so every lock still set belongs to a
/// dead cycle and is released. Tasks released this way are picked up again by
/// the next cycle's deduplicating claim.
pub(super) async fn recover(db: &Database, config: &Config) -> Result<()> {
    if db.was_unclean_shutdown().await? {
        tracing::warn!("Previous run did not shut down cleanly, recovering");
    }

    let anime = db.release_all_anime_locks().await?;
    let tasks = db.release_all_task_locks().await?;
    if anime > 0 || tasks > 0 {
        tracing::info!(anime, tasks, "Released locks left by a previous run");
    }

    let purged = db
        .purge_completed_tasks(config.update.history_capacity)
        .await?;
    if purged > 0 {
        tracing::debug!(purged, "Purged old completed episode tasks");
    }

    Ok(())
}

impl Orchestrator {
    /// Shut the orchestrator down
    ///
    /// Stops accepting new cycles, stops the scheduler and marks the shutdown
    /// as clean. A cycle already running is not interrupted; its locks are
    /// released by the next startup if the process exits first.
    ///
    /// # Errors
    ///
    /// Returns an error if the clean-shutdown marker cannot be written.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating shutdown");

        self.run_state.accepting_new.store(false, Ordering::SeqCst);
        self.run_state.shutdown_token.cancel();

        self.db.set_clean_shutdown().await?;
        self.emit_event(Event::Shutdown);

        tracing::info!("Shutdown complete");
        Ok(())
    }
}
