use super::*;
use crate::types::TaskId;

const WEEK: i64 = 7 * 24 * 60 * 60;

async fn claimed_cycle(
    db: &Database,
    anime: &NewAnime,
    episodes: &[u32],
) -> Vec<TaskId> {
    db.insert_anime(anime).await.unwrap();
    let tasks: Vec<_> = episodes
        .iter()
        .map(|&ep| new_task(&anime.id, ep, 1000 + ep as i64))
        .collect();
    let ids = db.insert_episode_tasks(&tasks).await.unwrap();
    db.claim_anime_for_update(false, 0, WEEK).await.unwrap();
    let claimed = db
        .claim_runnable_tasks(std::slice::from_ref(&anime.id))
        .await
        .unwrap();
    assert!(claimed.adopted.is_empty());
    ids
}

#[tokio::test]
async fn partial_success_records_only_delivered_episodes() {
    let (db, _file) = open_db().await;
    let anime = new_anime("A", 1);
    let ids = claimed_cycle(&db, &anime, &[1, 2, 3]).await;

    let summary = db
        .finalize_delivery(&ids[..2], &ids[2..], &[anime.id.clone()])
        .await
        .unwrap();

    assert_eq!(summary.tasks.len(), 3);
    assert_eq!(
        summary.delivered.get(&anime.id).cloned().unwrap_or_default(),
        [1, 2].into_iter().collect()
    );

    let entry = db.get_anime(&anime.id).await.unwrap().unwrap();
    assert_eq!(entry.known_episode_numbers, [1, 2].into_iter().collect());
    assert_eq!(entry.newest_publish_time, 1002);
    assert!(!entry.locked);

    let failed = db.get_episode_task(ids[2]).await.unwrap().unwrap();
    assert!(failed.completed && !failed.succeeded && !failed.locked);
    let delivered = db.get_episode_task(ids[0]).await.unwrap().unwrap();
    assert!(delivered.completed && delivered.succeeded && !delivered.locked);

    db.close().await;
}

#[tokio::test]
async fn all_failed_still_releases_the_anime() {
    let (db, _file) = open_db().await;
    let anime = new_anime("A", 1);
    let ids = claimed_cycle(&db, &anime, &[1, 2]).await;

    let summary = db
        .finalize_delivery(&[], &ids, &[anime.id.clone()])
        .await
        .unwrap();

    assert!(summary.delivered.is_empty());
    assert!(summary.released.contains(&anime.id));

    let entry = db.get_anime(&anime.id).await.unwrap().unwrap();
    assert!(!entry.locked);
    assert!(entry.known_episode_numbers.is_empty());
    assert_eq!(entry.newest_publish_time, 0);

    db.close().await;
}

#[tokio::test]
async fn claimed_anime_without_tasks_are_released() {
    let (db, _file) = open_db().await;
    let anime = new_anime("A", 1);
    db.insert_anime(&anime).await.unwrap();
    db.claim_anime_for_update(false, 0, WEEK).await.unwrap();

    let summary = db
        .finalize_delivery(&[], &[], &[anime.id.clone()])
        .await
        .unwrap();

    assert!(summary.tasks.is_empty());
    assert!(!db.get_anime(&anime.id).await.unwrap().unwrap().locked);

    db.close().await;
}

#[tokio::test]
async fn merge_keeps_existing_episodes_and_watermark() {
    let (db, _file) = open_db().await;
    let anime = new_anime("A", 1);
    db.insert_anime(&anime).await.unwrap();
    db.update_anime(
        &anime.id,
        &AnimeUpdate {
            known_episode_numbers: Some([1, 2].into_iter().collect()),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let mut old_release = new_task(&anime.id, 4, 50);
    old_release.content_hash = "ab".repeat(20);
    let ids = db.insert_episode_tasks(&[old_release]).await.unwrap();
    let claimed = db.claim_runnable_tasks(&[]).await.unwrap();
    db.finalize_delivery(&ids, &[], &claimed.adopted)
        .await
        .unwrap();

    let ids = db
        .insert_episode_tasks(&[new_task(&anime.id, 3, 20)])
        .await
        .unwrap();
    let claimed = db.claim_runnable_tasks(&[]).await.unwrap();
    assert_eq!(claimed.runnable.len(), 1);
    db.finalize_delivery(&ids, &[], &claimed.adopted)
        .await
        .unwrap();

    let entry = db.get_anime(&anime.id).await.unwrap().unwrap();
    assert_eq!(entry.known_episode_numbers, [1, 2, 3, 4].into_iter().collect());
    assert_eq!(entry.newest_publish_time, 50, "watermark never moves backwards");

    db.close().await;
}

#[tokio::test]
async fn finalize_skips_deleted_rows() {
    let (db, _file) = open_db().await;
    let anime = new_anime("A", 1);
    db.insert_anime(&anime).await.unwrap();

    let summary = db
        .finalize_delivery(&[TaskId(999)], &[], &[AnimeId::from("gone")])
        .await
        .unwrap();

    assert!(summary.tasks.is_empty());
    assert!(summary.delivered.is_empty());

    db.close().await;
}

#[tokio::test]
async fn finalize_leaves_locks_it_does_not_own() {
    let (db, _file) = open_db().await;
    let anime = new_anime("A", 1);
    let ids = claimed_cycle(&db, &anime, &[1]).await;

    // Tasks of A finalized by a caller that does not hold A
    let summary = db.finalize_delivery(&ids, &[], &[]).await.unwrap();

    assert!(summary.released.is_empty());
    let entry = db.get_anime(&anime.id).await.unwrap().unwrap();
    assert!(entry.locked, "lock stays with its holder");
    assert_eq!(entry.known_episode_numbers, [1].into_iter().collect());

    db.close().await;
}
