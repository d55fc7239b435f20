//! The full update cycle: plan → select → deliver → reconcile.

use crate::error::{Error, Result};
use crate::types::Event;
use serde::{Deserialize, Serialize};

use super::Orchestrator;

/// Summary of one update cycle
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    /// Anime whose feeds produced new tasks
    pub anime_planned: usize,
    /// Episode tasks queued by the planner
    pub tasks_planned: usize,
    /// Tasks handed to the delivery pipeline
    pub tasks_delivering: usize,
    /// Episodes copied into the library
    pub delivered: usize,
    /// Tasks that failed in this cycle
    pub failed: usize,
    /// Whether the delivery deadline expired
    pub timed_out: bool,
}

impl Orchestrator {
    /// Run one update cycle to completion
    ///
    /// The deduplicating claim runs even when the planner queued nothing, so
    /// tasks left runnable by an interrupted cycle are picked up. Only anime
    /// this cycle owns are ever released. When nothing is runnable the
    /// pipeline is skipped and the claimed anime are released.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ShuttingDown`] after shutdown, or the storage error that
    /// aborted the cycle. Collaborator failures never fail the cycle; they show
    /// up as failed tasks.
    pub async fn run_update_cycle(&self, auto_update_only: bool) -> Result<CycleReport> {
        if !self.is_accepting() {
            return Err(Error::ShuttingDown);
        }
        self.emit_event(Event::CycleStarted { auto_update_only });

        let plan = self.plan_cycle(auto_update_only).await?;
        let mut report = CycleReport {
            anime_planned: plan.anime_count(),
            tasks_planned: plan.task_count,
            ..Default::default()
        };

        let claimed = match self.select_runnable_tasks(&plan.anime_ids).await {
            Ok(claimed) => claimed,
            Err(e) => {
                tracing::error!(error = %e, "Failed to select runnable tasks");
                if let Err(release_err) = self.db.release_anime(&plan.anime_ids).await {
                    tracing::error!(error = %release_err, "Failed to release claimed anime");
                }
                return Err(e);
            }
        };

        // The cycle now owns its planned anime plus those adopted for leftover tasks
        let mut owned = plan.anime_ids;
        owned.extend(claimed.adopted);
        let runnable = claimed.runnable;

        if runnable.is_empty() {
            self.db.release_anime(&owned).await?;
            tracing::info!(auto_update_only, "Update cycle found nothing to deliver");
            self.emit_event(Event::CycleFinished {
                succeeded: 0,
                failed: 0,
            });
            return Ok(report);
        }
        report.tasks_delivering = runnable.len();

        let delivery = self.run_delivery(runnable).await;
        report.delivered = delivery.succeeded.len();
        report.failed = delivery.failed.len();
        report.timed_out = delivery.timed_out;

        self.finalize(&delivery.succeeded, &delivery.failed, &owned)
            .await?;

        tracing::info!(
            auto_update_only,
            delivered = report.delivered,
            failed = report.failed,
            timed_out = report.timed_out,
            "Update cycle finished"
        );
        self.emit_event(Event::CycleFinished {
            succeeded: report.delivered,
            failed: report.failed,
        });

        Ok(report)
    }

    /// Start a manual update of every unlocked anime in the background
    ///
    /// Returns immediately; the cycle's outcome is logged and reported through
    /// events. The auto-update scheduler restarts its interval.
    pub fn trigger_manual_update(&self) -> Result<tokio::task::JoinHandle<Result<CycleReport>>> {
        if !self.is_accepting() {
            return Err(Error::ShuttingDown);
        }

        self.run_state.postpone_scheduler.notify_one();

        let orchestrator = self.clone();
        Ok(tokio::spawn(async move {
            let result = orchestrator.run_update_cycle(false).await;
            if let Err(e) = &result {
                tracing::error!(error = %e, "Manual update cycle failed");
            }
            result
        }))
    }
}
