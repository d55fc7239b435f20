//! Periodic auto-update cycles
//!
//! The scheduler sleeps for `auto_update_interval`, then runs an update cycle
//! restricted to anime with auto-update enabled. A manual update restarts the
//! interval. Shutdown cancels the sleep.
//!
//! # Example
//!
//! ```no_run
//! use autoanime::{Orchestrator, config::Config};
//! use autoanime::orchestrator::UpdateScheduler;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut config = Config::default();
//! config.update.run_scheduler = false;
//! let orchestrator = Orchestrator::new(config).await?;
//!
//! // Run scheduler (returns on shutdown)
//! tokio::spawn(UpdateScheduler::new(orchestrator.clone()).run());
//! # Ok(())
//! # }
//! ```

use tracing::{debug, error, info};

use super::Orchestrator;

/// Background loop running auto-update cycles
pub struct UpdateScheduler {
    /// Orchestrator whose cycles are run and whose shutdown ends the loop
    orchestrator: Orchestrator,
}

impl UpdateScheduler {
    /// Creates a new update scheduler
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self { orchestrator }
    }

    /// Run until the orchestrator shuts down
    pub async fn run(self) {
        let run_state = self.orchestrator.run_state.clone();
        let interval = self.orchestrator.config.update.auto_update_interval;

        loop {
            tokio::select! {
                _ = run_state.shutdown_token.cancelled() => break,
                _ = run_state.postpone_scheduler.notified() => {
                    debug!("Manual update requested, restarting auto-update interval");
                    continue;
                }
                _ = tokio::time::sleep(interval) => {}
            }

            if !self.orchestrator.is_accepting() {
                break;
            }

            match self.orchestrator.run_update_cycle(true).await {
                Ok(report) => debug!(
                    delivered = report.delivered,
                    failed = report.failed,
                    "Scheduled update cycle complete"
                ),
                Err(e) => error!(error = %e, "Scheduled update cycle failed"),
            }
        }

        info!("Auto-update scheduler stopped");
    }
}
