//! Per-cycle delivery progress.

use crate::types::{DeliveryState, EpisodeTask, TaskId};
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use tokio::sync::Mutex;

/// Progress of one pipeline run
///
/// Download progress is written only by the download monitor; each task's
/// copy progress is written only by that task's copy worker.
pub(crate) struct DeliveryContext {
    /// Outstanding hash → tasks waiting on it
    hashes: HashMap<String, Vec<TaskId>>,
    download: Mutex<DownloadProgress>,
    copy: Mutex<HashMap<TaskId, DeliveryState>>,
}

#[derive(Default)]
struct DownloadProgress {
    /// Finished hash → path the engine wrote the content to
    retrieved: HashMap<String, PathBuf>,
    states: HashMap<TaskId, DeliveryState>,
}

impl DeliveryContext {
    pub(crate) fn new(tasks: &[EpisodeTask]) -> Self {
        let mut hashes: HashMap<String, Vec<TaskId>> = HashMap::new();
        let mut download = DownloadProgress::default();
        let mut copy = HashMap::new();

        for task in tasks {
            hashes
                .entry(task.content_hash.clone())
                .or_default()
                .push(task.sequence_id);
            download
                .states
                .insert(task.sequence_id, DeliveryState::Submitted);
            copy.insert(task.sequence_id, DeliveryState::Queued);
        }

        Self {
            hashes,
            download: Mutex::new(download),
            copy: Mutex::new(copy),
        }
    }

    /// Hashes the monitor still has to poll
    pub(crate) async fn outstanding_hashes(&self) -> Vec<String> {
        let download = self.download.lock().await;
        self.hashes
            .keys()
            .filter(|hash| !download.retrieved.contains_key(*hash))
            .cloned()
            .collect()
    }

    /// Record a transfer in progress on the engine
    pub(crate) async fn mark_downloading(&self, hash: &str) {
        let mut download = self.download.lock().await;
        for id in self.hashes.get(hash).into_iter().flatten() {
            download.states.insert(*id, DeliveryState::Downloading);
        }
    }

    /// Record a finished transfer; returns the tasks it unblocks
    pub(crate) async fn mark_downloaded(&self, hash: &str, path: PathBuf) -> Vec<TaskId> {
        let mut download = self.download.lock().await;
        if download.retrieved.contains_key(hash) {
            return Vec::new();
        }
        download.retrieved.insert(hash.to_string(), path);

        let ids = self.hashes.get(hash).cloned().unwrap_or_default();
        for id in &ids {
            download.states.insert(*id, DeliveryState::Downloaded);
        }
        ids
    }

    /// Where the engine put `hash`, once it is finished
    pub(crate) async fn retrieved_path(&self, hash: &str) -> Option<PathBuf> {
        self.download.lock().await.retrieved.get(hash).cloned()
    }

    /// Number of tasks whose transfer has not finished on the engine
    pub(crate) async fn unfinished_downloads(&self) -> usize {
        self.download
            .lock()
            .await
            .states
            .values()
            .filter(|state| !matches!(state, DeliveryState::Downloaded))
            .count()
    }

    pub(crate) async fn set_copy_state(&self, id: TaskId, state: DeliveryState) {
        self.copy.lock().await.insert(id, state);
    }

    /// Split the run's tasks into delivered and not delivered
    pub(crate) async fn outcome(&self) -> (BTreeSet<TaskId>, BTreeSet<TaskId>) {
        let copy = self.copy.lock().await;
        let mut succeeded = BTreeSet::new();
        let mut failed = BTreeSet::new();
        for (id, state) in copy.iter() {
            if state.is_success() {
                succeeded.insert(*id);
            } else {
                failed.insert(*id);
            }
        }
        (succeeded, failed)
    }
}
