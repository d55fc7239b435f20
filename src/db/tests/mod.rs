use crate::db::*;
use crate::types::{AnimeId, AnimeSource, Subscription};
use std::path::PathBuf;
use tempfile::NamedTempFile;

mod episode_tasks;
mod reconcile;

async fn open_db() -> (Database, NamedTempFile) {
    let temp_file = NamedTempFile::new().unwrap();
    let db = Database::new(temp_file.path()).await.unwrap();
    (db, temp_file)
}

fn new_anime(name: &str, season: u32) -> NewAnime {
    NewAnime {
        id: AnimeId::derive(name, season),
        name: name.to_string(),
        season,
        storage_directory: PathBuf::from(format!("/library/{}/Season{}", name, season)),
        source: AnimeSource::AcgRip,
        subscription: Subscription::Query(name.to_string()),
        auto_update: true,
    }
}

fn new_task(anime_id: &AnimeId, episode: u32, publish_time: i64) -> NewEpisodeTask {
    NewEpisodeTask {
        anime_id: anime_id.clone(),
        episode_number: episode,
        content_hash: format!("{:040x}", publish_time),
        staged_file: None,
        magnet: Some(format!("magnet:?xt=urn:btih:{:040x}", publish_time)),
        destination_path: PathBuf::from(format!("/library/x/S01E{:02}", episode)),
        publish_time,
    }
}
