//! Episode task deduplication
//!
//! Selects the runnable subset of queued episode tasks. Tasks are keyed by
//! their delivery slot `(anime_id, episode_number)`, never by transfer content
//! hash: two different releases of the same episode compete for one slot.
//!
//! The input must be every not-yet-completed task in ascending `sequence_id`
//! (arrival) order. A single pass then applies:
//!
//! - **suspension**: a locked task means a delivery for that slot is in flight;
//!   every other task for the slot is left untouched until it finishes.
//! - **supersession**: of several queued tasks for a free slot only the newest
//!   one runs; the older ones are completed without delivery.
//!
//! [`select_runnable`] is pure; the storage layer runs it inside the claim
//! transaction (see [`Database::claim_runnable_tasks`](crate::Database::claim_runnable_tasks)).

use crate::types::{AnimeId, EpisodeTask};
use std::collections::{HashMap, HashSet};

/// Result of one deduplication pass
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Selection {
    /// Tasks to claim and deliver, in arrival order
    pub runnable: Vec<EpisodeTask>,
    /// Older queued tasks replaced by a newer task for the same slot
    pub superseded: Vec<EpisodeTask>,
}

type SlotKey = (AnimeId, u32);

/// Run the selection pass over arrival-ordered, uncompleted tasks
pub fn select_runnable(tasks: &[EpisodeTask]) -> Selection {
    let mut current: HashMap<SlotKey, &EpisodeTask> = HashMap::new();
    let mut suspended: HashSet<SlotKey> = HashSet::new();
    let mut superseded = Vec::new();

    for task in tasks {
        let key = (task.anime_id.clone(), task.episode_number);

        if task.locked {
            suspended.insert(key);
            continue;
        }
        if suspended.contains(&key) {
            continue;
        }
        if let Some(older) = current.insert(key, task) {
            superseded.push(older.clone());
        }
    }

    let mut runnable: Vec<EpisodeTask> = current
        .into_iter()
        .filter(|(key, _)| !suspended.contains(key))
        .map(|(_, task)| task.clone())
        .collect();
    runnable.sort_by_key(|task| task.sequence_id);

    Selection {
        runnable,
        superseded,
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TaskId;
    use std::path::PathBuf;

    fn task(seq: i64, anime: &str, episode: u32, locked: bool) -> EpisodeTask {
        EpisodeTask {
            sequence_id: TaskId(seq),
            anime_id: AnimeId::from(anime),
            episode_number: episode,
            content_hash: format!("{:040x}", seq),
            staged_file: None,
            magnet: Some(format!("magnet:?xt=urn:btih:{:040x}", seq)),
            destination_path: PathBuf::from(format!("/lib/{}/S01E{:02}", anime, episode)),
            publish_time: seq * 100,
            locked,
            completed: false,
            succeeded: false,
        }
    }

    fn ids(tasks: &[EpisodeTask]) -> Vec<i64> {
        tasks.iter().map(|t| t.sequence_id.0).collect()
    }

    #[test]
    fn newest_queued_task_supersedes_older_ones() {
        let tasks = vec![task(1, "a", 5, false), task(2, "a", 5, false), task(3, "a", 5, false)];

        let selection = select_runnable(&tasks);

        assert_eq!(ids(&selection.runnable), vec![3]);
        assert_eq!(ids(&selection.superseded), vec![1, 2]);
    }

    #[test]
    fn in_flight_task_suspends_later_tasks_for_the_slot() {
        let tasks = vec![task(1, "a", 5, true), task(2, "a", 5, false)];

        let selection = select_runnable(&tasks);

        assert!(selection.runnable.is_empty());
        assert!(selection.superseded.is_empty(), "task 2 must stay untouched");
    }

    #[test]
    fn suspension_is_per_slot() {
        let tasks = vec![
            task(1, "a", 5, true),
            task(2, "a", 6, false),
            task(3, "a", 5, false),
            task(4, "b", 5, false),
        ];

        let selection = select_runnable(&tasks);

        assert_eq!(ids(&selection.runnable), vec![2, 4]);
        assert!(selection.superseded.is_empty());
    }

    #[test]
    fn identity_is_the_slot_not_the_content_hash() {
        let mut first = task(1, "a", 5, false);
        let mut second = task(2, "a", 5, false);
        first.content_hash = "1111".into();
        second.content_hash = "2222".into();
        let same_hash_other_slot = {
            let mut t = task(3, "a", 6, false);
            t.content_hash = "2222".into();
            t
        };

        let selection = select_runnable(&[first, second, same_hash_other_slot]);

        assert_eq!(ids(&selection.runnable), vec![2, 3]);
        assert_eq!(ids(&selection.superseded), vec![1]);
    }

    #[test]
    fn runnable_batch_keeps_arrival_order() {
        let tasks = vec![
            task(1, "b", 1, false),
            task(2, "a", 1, false),
            task(3, "b", 1, false),
            task(4, "a", 2, false),
        ];

        let selection = select_runnable(&tasks);

        assert_eq!(ids(&selection.runnable), vec![2, 3, 4]);
        assert_eq!(ids(&selection.superseded), vec![1]);
    }

    #[test]
    fn empty_input_selects_nothing() {
        assert_eq!(select_runnable(&[]), Selection::default());
    }
}
