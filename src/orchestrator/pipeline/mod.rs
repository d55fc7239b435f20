//! Delivery pipeline: submit a batch of claimed tasks to the torrent engine,
//! watch the transfers finish and copy the results into the library.
//!
//! One run owns a `DeliveryContext`. The download monitor is the only writer
//! of download progress; each copy worker is the only writer of its own task's
//! copy progress. Monitor and workers run under a single deadline
//! (`delivery_timeout`); whatever was copied when it expires is the outcome.

mod context;
mod copy;

use crate::error::DeliveryError;
use crate::types::{DeliveryState, EpisodeTask, Event, TaskId};
use context::DeliveryContext;
use copy::copy_artifact;
use futures::future::join_all;
use std::collections::BTreeSet;
use std::path::PathBuf;
use tracing::{debug, info, warn};

use super::Orchestrator;

/// Outcome of one delivery pipeline run
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DeliveryReport {
    /// Tasks copied into the library
    pub succeeded: Vec<TaskId>,
    /// Tasks not delivered in this run
    pub failed: Vec<TaskId>,
    /// Whether the delivery deadline expired before every task finished
    pub timed_out: bool,
}

impl Orchestrator {
    /// Deliver a batch of claimed episode tasks
    ///
    /// Never fails as a whole: a rejected submission, a transfer that never
    /// finishes and a failed copy all show up as failed tasks in the report.
    /// The caller reconciles the report.
    pub async fn run_delivery(&self, tasks: Vec<EpisodeTask>) -> DeliveryReport {
        if tasks.is_empty() {
            return DeliveryReport::default();
        }

        let ids: Vec<TaskId> = tasks.iter().map(|t| t.sequence_id).collect();
        self.emit_event(Event::DeliveryStarted { ids: ids.clone() });

        let magnets: Vec<String> = tasks.iter().filter_map(|t| t.magnet.clone()).collect();
        let files: Vec<PathBuf> = tasks.iter().filter_map(|t| t.staged_file.clone()).collect();

        if let Err(e) = self.collaborators.torrent.submit(&magnets, &files).await {
            let err = DeliveryError::SubmissionFailed {
                count: tasks.len(),
                reason: e.to_string(),
            };
            warn!(error = %err, "Torrent engine rejected the batch");
            self.emit_event(Event::SubmissionFailed {
                error: err.to_string(),
            });
            return DeliveryReport {
                succeeded: Vec::new(),
                failed: ids,
                timed_out: false,
            };
        }
        info!(
            tasks = tasks.len(),
            magnets = magnets.len(),
            files = files.len(),
            "Submitted batch to torrent engine"
        );

        let ctx = DeliveryContext::new(&tasks);
        let deadline = self.config.update.delivery_timeout;

        let work = async {
            let workers = join_all(tasks.iter().map(|task| self.copy_worker(&ctx, task)));
            tokio::join!(self.monitor_downloads(&ctx), workers);
        };
        let timed_out = tokio::time::timeout(deadline, work).await.is_err();

        let (succeeded, failed) = ctx.outcome().await;

        if timed_out {
            let downloading = ctx.unfinished_downloads().await;
            warn!(
                timeout = ?deadline,
                pending = failed.len(),
                downloading,
                "Delivery timed out, keeping partial results"
            );
            self.emit_event(Event::DeliveryTimedOut {
                pending: failed.iter().copied().collect(),
            });
        }

        if self.config.update.remove_finished_transfers {
            self.remove_finished_transfers(&tasks, &succeeded).await;
        }

        info!(
            succeeded = succeeded.len(),
            failed = failed.len(),
            timed_out,
            "Delivery finished"
        );

        DeliveryReport {
            succeeded: succeeded.into_iter().collect(),
            failed: failed.into_iter().collect(),
            timed_out,
        }
    }

    /// Poll the engine until every hash of the batch has finished
    async fn monitor_downloads(&self, ctx: &DeliveryContext) {
        let interval = self.config.update.poll_interval;

        loop {
            let outstanding = ctx.outstanding_hashes().await;
            if outstanding.is_empty() {
                return;
            }

            match self.collaborators.torrent.poll(&outstanding).await {
                Ok(statuses) => {
                    for status in statuses {
                        if !status.is_complete() {
                            ctx.mark_downloading(&status.hash).await;
                            continue;
                        }
                        for id in ctx.mark_downloaded(&status.hash, status.content_path).await {
                            debug!(task_id = id.0, hash = %status.hash, "Transfer finished");
                            self.emit_event(Event::TaskDownloaded { id });
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Failed to poll torrent engine");
                }
            }

            tokio::time::sleep(interval).await;
        }
    }

    /// Wait for one task's transfer, then copy it into the library
    async fn copy_worker(&self, ctx: &DeliveryContext, task: &EpisodeTask) {
        let interval = self.config.update.poll_interval;

        let source = loop {
            if let Some(path) = ctx.retrieved_path(&task.content_hash).await {
                break path;
            }
            tokio::time::sleep(interval).await;
        };

        ctx.set_copy_state(task.sequence_id, DeliveryState::Copying)
            .await;

        match copy_artifact(&source, &task.destination_path).await {
            Ok(path) => {
                info!(
                    task_id = task.sequence_id.0,
                    anime_id = %task.anime_id,
                    episode = task.episode_number,
                    path = %path.display(),
                    "Episode copied into library"
                );
                ctx.set_copy_state(task.sequence_id, DeliveryState::Copied)
                    .await;
                self.emit_event(Event::TaskCopied {
                    id: task.sequence_id,
                    path,
                });
            }
            Err(e) => {
                warn!(task_id = task.sequence_id.0, error = %e, "Failed to copy episode");
                ctx.set_copy_state(task.sequence_id, DeliveryState::Failed)
                    .await;
            }
        }
    }

    /// Drop delivered transfers from the engine (downloaded files are kept)
    async fn remove_finished_transfers(&self, tasks: &[EpisodeTask], succeeded: &BTreeSet<TaskId>) {
        let hashes: BTreeSet<String> = tasks
            .iter()
            .filter(|t| succeeded.contains(&t.sequence_id))
            .map(|t| t.content_hash.clone())
            .collect();
        if hashes.is_empty() {
            return;
        }

        let hashes: Vec<String> = hashes.into_iter().collect();
        if let Err(e) = self.collaborators.torrent.remove(&hashes).await {
            warn!(error = %e, "Failed to remove finished transfers from torrent engine");
        }
    }
}
