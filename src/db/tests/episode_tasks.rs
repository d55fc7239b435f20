use super::*;

async fn seeded() -> (Database, NamedTempFile, AnimeId) {
    let (db, file) = open_db().await;
    let anime = new_anime("A", 1);
    db.insert_anime(&anime).await.unwrap();
    (db, file, anime.id)
}

fn seq(tasks: &[crate::types::EpisodeTask]) -> Vec<i64> {
    tasks.iter().map(|t| t.sequence_id.0).collect()
}

#[tokio::test]
async fn insert_assigns_increasing_sequence_ids() {
    let (db, _file, id) = seeded().await;

    let ids = db
        .insert_episode_tasks(&[new_task(&id, 1, 10), new_task(&id, 2, 20)])
        .await
        .unwrap();
    let more = db.insert_episode_tasks(&[new_task(&id, 3, 30)]).await.unwrap();

    assert_eq!(ids.len(), 2);
    assert!(ids[0] < ids[1]);
    assert!(ids[1] < more[0]);

    let task = db.get_episode_task(more[0]).await.unwrap().unwrap();
    assert_eq!(task.episode_number, 3);
    assert!(!task.locked && !task.completed && !task.succeeded);

    assert!(db.insert_episode_tasks(&[]).await.unwrap().is_empty());

    db.close().await;
}

#[tokio::test]
async fn claim_supersedes_older_tasks_for_the_same_slot() {
    let (db, _file, id) = seeded().await;
    let ids = db
        .insert_episode_tasks(&[
            new_task(&id, 5, 10),
            new_task(&id, 5, 20),
            new_task(&id, 5, 30),
        ])
        .await
        .unwrap();

    let claimed = db.claim_runnable_tasks(std::slice::from_ref(&id)).await.unwrap();

    assert_eq!(seq(&claimed.runnable), vec![ids[2].0]);
    assert_eq!(seq(&claimed.superseded), vec![ids[0].0, ids[1].0]);

    let stored = db.get_episode_task(ids[0]).await.unwrap().unwrap();
    assert!(stored.completed);
    assert!(!stored.succeeded);
    assert!(db.get_episode_task(ids[2]).await.unwrap().unwrap().locked);

    db.close().await;
}

#[tokio::test]
async fn claim_leaves_slot_alone_while_a_delivery_is_in_flight() {
    let (db, _file, id) = seeded().await;
    let first = db.insert_episode_tasks(&[new_task(&id, 5, 10)]).await.unwrap();
    db.claim_runnable_tasks(std::slice::from_ref(&id)).await.unwrap();

    let later = db
        .insert_episode_tasks(&[new_task(&id, 5, 20), new_task(&id, 6, 20)])
        .await
        .unwrap();
    let claimed = db.claim_runnable_tasks(std::slice::from_ref(&id)).await.unwrap();

    assert_eq!(seq(&claimed.runnable), vec![later[1].0]);
    assert!(claimed.superseded.is_empty());
    assert!(!db.get_episode_task(later[0]).await.unwrap().unwrap().completed);

    // Once the in-flight delivery finishes the queued task becomes runnable.
    db.finalize_delivery(&[], &first, &[]).await.unwrap();
    let claimed = db.claim_runnable_tasks(std::slice::from_ref(&id)).await.unwrap();
    assert_eq!(seq(&claimed.runnable), vec![later[0].0]);

    db.close().await;
}

#[tokio::test]
async fn list_filters_by_completed_and_locked() {
    let (db, _file, id) = seeded().await;
    db.insert_episode_tasks(&[new_task(&id, 1, 10), new_task(&id, 1, 20)])
        .await
        .unwrap();
    db.claim_runnable_tasks(std::slice::from_ref(&id)).await.unwrap();
    db.insert_episode_tasks(&[new_task(&id, 2, 30)]).await.unwrap();

    assert_eq!(db.list_episode_tasks(None, None).await.unwrap().len(), 3);
    assert_eq!(db.list_episode_tasks(Some(true), None).await.unwrap().len(), 1);
    assert_eq!(db.list_episode_tasks(Some(false), None).await.unwrap().len(), 2);
    assert_eq!(db.list_episode_tasks(None, Some(true)).await.unwrap().len(), 1);
    assert_eq!(
        db.list_episode_tasks(Some(false), Some(false))
            .await
            .unwrap()
            .len(),
        1
    );

    db.close().await;
}

#[tokio::test]
async fn release_all_task_locks_unlocks_in_flight_tasks() {
    let (db, _file, id) = seeded().await;
    db.insert_episode_tasks(&[new_task(&id, 1, 10), new_task(&id, 2, 20)])
        .await
        .unwrap();
    db.claim_runnable_tasks(std::slice::from_ref(&id)).await.unwrap();

    assert_eq!(db.release_all_task_locks().await.unwrap(), 2);
    assert!(db.list_episode_tasks(None, Some(true)).await.unwrap().is_empty());

    let claimed = db.claim_runnable_tasks(std::slice::from_ref(&id)).await.unwrap();
    assert_eq!(claimed.runnable.len(), 2);

    db.close().await;
}

#[tokio::test]
async fn purge_keeps_newest_completed_and_all_pending() {
    let (db, _file, id) = seeded().await;
    let tasks: Vec<_> = (1..=5).map(|ep| new_task(&id, ep, ep as i64)).collect();
    let ids = db.insert_episode_tasks(&tasks).await.unwrap();
    db.claim_runnable_tasks(std::slice::from_ref(&id)).await.unwrap();
    db.finalize_delivery(&ids[..4], &[], &[]).await.unwrap();

    let deleted = db.purge_completed_tasks(2).await.unwrap();

    assert_eq!(deleted, 2);
    let remaining = seq(&db.list_episode_tasks(None, None).await.unwrap());
    assert_eq!(remaining, vec![ids[2].0, ids[3].0, ids[4].0]);

    db.close().await;
}

#[tokio::test]
async fn claim_skips_anime_locked_by_someone_else() {
    let (db, _file, id) = seeded().await;
    let other = new_anime("B", 1);
    db.insert_anime(&other).await.unwrap();
    db.insert_episode_tasks(&[new_task(&id, 1, 10), new_task(&other.id, 1, 20)])
        .await
        .unwrap();
    assert!(db.try_lock_anime(&id).await.unwrap());

    let claimed = db.claim_runnable_tasks(&[]).await.unwrap();

    assert_eq!(claimed.runnable.len(), 1);
    assert_eq!(claimed.runnable[0].anime_id, other.id);
    assert_eq!(claimed.adopted, vec![other.id.clone()]);
    assert!(db.get_anime(&other.id).await.unwrap().unwrap().locked);
    assert!(
        db.list_episode_tasks(Some(false), Some(false))
            .await
            .unwrap()
            .iter()
            .all(|t| t.anime_id == id),
        "tasks of the locked anime are untouched"
    );

    // The holder itself can claim them
    let claimed = db.claim_runnable_tasks(std::slice::from_ref(&id)).await.unwrap();
    assert_eq!(claimed.runnable.len(), 1);
    assert!(claimed.adopted.is_empty());

    db.close().await;
}

#[tokio::test]
async fn claim_does_not_supersede_inside_a_foreign_anime() {
    let (db, _file, id) = seeded().await;
    db.insert_episode_tasks(&[new_task(&id, 5, 10), new_task(&id, 5, 20)])
        .await
        .unwrap();
    assert!(db.try_lock_anime(&id).await.unwrap());

    let claimed = db.claim_runnable_tasks(&[]).await.unwrap();

    assert!(claimed.runnable.is_empty());
    assert!(claimed.superseded.is_empty());
    assert!(claimed.adopted.is_empty());
    assert_eq!(
        db.list_episode_tasks(Some(false), None).await.unwrap().len(),
        2
    );

    db.close().await;
}
