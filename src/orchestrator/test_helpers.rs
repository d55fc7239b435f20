//! In-memory collaborators and a test orchestrator factory.

use crate::config::Config;
use crate::error::{Error, Result, TransferError};
use crate::feed::FeedSource;
use crate::media_server::MediaServer;
use crate::orchestrator::{Collaborators, NewAnimeRequest, Orchestrator};
use crate::torrent::{TorrentEngine, TorrentStatus};
use crate::transfer::{TransferResolver, magnet_info_hash};
use crate::types::{AnimeEntry, AnimeSource, EpisodeNumber, FeedItem, ResolvedTransfer};
use async_trait::async_trait;
use sha1::{Digest, Sha1};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::{TempDir, tempdir};

/// Feed source serving registered item lists by URL
#[derive(Default)]
pub(crate) struct FakeFeed {
    feeds: Mutex<HashMap<String, Vec<FeedItem>>>,
    failing: Mutex<HashSet<String>>,
}

impl FakeFeed {
    pub(crate) fn set_items(&self, url: &str, items: Vec<FeedItem>) {
        self.feeds.lock().unwrap().insert(url.to_string(), items);
    }

    pub(crate) fn fail(&self, url: &str) {
        self.failing.lock().unwrap().insert(url.to_string());
    }
}

#[async_trait]
impl FeedSource for FakeFeed {
    // The fetched "document" is the URL itself; parse looks it up.
    async fn fetch_text(&self, url: &str) -> Result<String> {
        if self.failing.lock().unwrap().contains(url) {
            return Err(Error::Feed(format!("Feed returned HTTP 503: {}", url)));
        }
        Ok(url.to_string())
    }

    fn parse(&self, _source: AnimeSource, text: &str) -> Result<Vec<FeedItem>> {
        Ok(self
            .feeds
            .lock()
            .unwrap()
            .get(text)
            .cloned()
            .unwrap_or_default())
    }
}

/// Resolver that hashes magnets for real and stages a fake `.torrent` for
/// http(s) locators
///
/// A staged file holds its own content hash so the fake engine can map
/// submitted files back to hashes.
pub(crate) struct FakeResolver {
    staging_dir: PathBuf,
    staged: AtomicUsize,
}

impl FakeResolver {
    pub(crate) fn new(staging_dir: PathBuf) -> Self {
        Self {
            staging_dir,
            staged: AtomicUsize::new(0),
        }
    }
}

/// Content hash the fake resolver assigns to an http(s) locator
pub(crate) fn url_hash(locator: &str) -> String {
    hex::encode(Sha1::digest(locator.as_bytes()))
}

#[async_trait]
impl TransferResolver for FakeResolver {
    async fn resolve(&self, locator: &str) -> std::result::Result<ResolvedTransfer, TransferError> {
        if locator.starts_with("magnet:") {
            return Ok(ResolvedTransfer {
                content_hash: magnet_info_hash(locator)?,
                staged_file: None,
                magnet: Some(locator.to_string()),
            });
        }
        if locator.starts_with("http://") || locator.starts_with("https://") {
            let hash = url_hash(locator);
            let n = self.staged.fetch_add(1, Ordering::SeqCst);
            let path = self.staging_dir.join(format!("{}-{}.torrent", hash, n));
            std::fs::write(&path, &hash).map_err(|e| TransferError::FetchFailed {
                locator: locator.to_string(),
                reason: e.to_string(),
            })?;
            return Ok(ResolvedTransfer {
                content_hash: hash,
                staged_file: Some(path),
                magnet: None,
            });
        }
        Err(TransferError::UnsupportedScheme {
            locator: locator.to_string(),
        })
    }
}

/// Torrent engine that reports whatever the test marked as finished
#[derive(Default)]
pub(crate) struct FakeTorrentEngine {
    submissions: Mutex<Vec<(Vec<String>, Vec<PathBuf>)>>,
    known: Mutex<HashSet<String>>,
    finished: Mutex<HashMap<String, PathBuf>>,
    removed: Mutex<Vec<String>>,
    fail_submit: AtomicBool,
}

impl FakeTorrentEngine {
    /// Report `hash` as finished, with its content at `path`
    pub(crate) fn finish(&self, hash: &str, path: &Path) {
        self.finished
            .lock()
            .unwrap()
            .insert(hash.to_string(), path.to_path_buf());
    }

    /// Report `hash` as finished with a single file written under `dir`
    pub(crate) fn finish_with_file(&self, hash: &str, dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::create_dir_all(dir).unwrap();
        std::fs::write(&path, format!("content of {}", hash)).unwrap();
        self.finish(hash, &path);
        path
    }

    pub(crate) fn fail_submissions(&self) {
        self.fail_submit.store(true, Ordering::SeqCst);
    }

    pub(crate) fn submissions(&self) -> Vec<(Vec<String>, Vec<PathBuf>)> {
        self.submissions.lock().unwrap().clone()
    }

    pub(crate) fn removed(&self) -> Vec<String> {
        self.removed.lock().unwrap().clone()
    }
}

#[async_trait]
impl TorrentEngine for FakeTorrentEngine {
    async fn submit(&self, magnets: &[String], files: &[PathBuf]) -> Result<()> {
        if self.fail_submit.load(Ordering::SeqCst) {
            return Err(Error::TorrentEngine("qBittorrent rejected the torrents".into()));
        }
        let mut known = self.known.lock().unwrap();
        for magnet in magnets {
            known.insert(magnet_info_hash(magnet)?);
        }
        for file in files {
            known.insert(std::fs::read_to_string(file)?);
        }
        self.submissions
            .lock()
            .unwrap()
            .push((magnets.to_vec(), files.to_vec()));
        Ok(())
    }

    async fn remove(&self, hashes: &[String]) -> Result<()> {
        self.removed.lock().unwrap().extend(hashes.iter().cloned());
        Ok(())
    }

    async fn poll(&self, hashes: &[String]) -> Result<Vec<TorrentStatus>> {
        let known = self.known.lock().unwrap();
        let finished = self.finished.lock().unwrap();
        Ok(hashes
            .iter()
            .filter_map(|hash| match finished.get(hash) {
                Some(path) => Some(TorrentStatus {
                    hash: hash.clone(),
                    progress: 1.0,
                    content_path: path.clone(),
                }),
                None if known.contains(hash) => Some(TorrentStatus {
                    hash: hash.clone(),
                    progress: 0.5,
                    content_path: PathBuf::new(),
                }),
                None => None,
            })
            .collect())
    }
}

/// Media server counting refresh requests
#[derive(Default)]
pub(crate) struct FakeMediaServer {
    refreshes: AtomicUsize,
    fail: AtomicBool,
}

impl FakeMediaServer {
    pub(crate) fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }

    pub(crate) fn fail_refreshes(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl MediaServer for FakeMediaServer {
    async fn refresh(&self) -> Result<()> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::MediaServer("Library refresh returned HTTP 500".into()));
        }
        Ok(())
    }
}

/// Handles to the fakes behind a test orchestrator
pub(crate) struct Fakes {
    pub(crate) feed: Arc<FakeFeed>,
    pub(crate) torrent: Arc<FakeTorrentEngine>,
    pub(crate) media_server: Arc<FakeMediaServer>,
    /// Where tests put "downloaded" content
    pub(crate) download_dir: PathBuf,
}

impl Fakes {
    fn new(config: &Config, download_dir: PathBuf) -> (Self, Collaborators) {
        let feed = Arc::new(FakeFeed::default());
        let torrent = Arc::new(FakeTorrentEngine::default());
        let media_server = Arc::new(FakeMediaServer::default());
        let collaborators = Collaborators {
            feed: feed.clone(),
            resolver: Arc::new(FakeResolver::new(config.library.staging_dir.clone())),
            torrent: torrent.clone(),
            media_server: media_server.clone(),
        };
        (
            Self {
                feed,
                torrent,
                media_server,
                download_dir,
            },
            collaborators,
        )
    }
}

/// Configuration rooted in `dir` with fast polling and no scheduler
pub(crate) fn test_config(dir: &Path) -> Config {
    let mut config = Config::default();
    config.persistence.database_path = dir.join("test.db");
    config.library.base_path = dir.join("library");
    config.library.staging_dir = dir.join("staging");
    config.update.run_scheduler = false;
    config.update.poll_interval = Duration::from_millis(10);
    config.update.delivery_timeout = Duration::from_secs(5);
    config
}

/// Create a test orchestrator backed by fakes
/// Returns the orchestrator, the fakes and the tempdir (which must be kept alive).
pub(crate) async fn create_test_orchestrator() -> (Orchestrator, Fakes, TempDir) {
    create_test_orchestrator_with(|_| {}).await
}

/// Like [`create_test_orchestrator`], with a chance to adjust the configuration
pub(crate) async fn create_test_orchestrator_with(
    configure: impl FnOnce(&mut Config),
) -> (Orchestrator, Fakes, TempDir) {
    let temp_dir = tempdir().unwrap();
    let mut config = test_config(temp_dir.path());
    configure(&mut config);

    let (fakes, collaborators) = Fakes::new(&config, temp_dir.path().join("downloads"));
    let orchestrator = Orchestrator::with_collaborators(config, collaborators)
        .await
        .unwrap();

    (orchestrator, fakes, temp_dir)
}

/// Second orchestrator over the same configuration (simulates a restart)
pub(crate) async fn reopen(config: Config) -> (Orchestrator, Fakes) {
    let download_dir = config.library.base_path.with_file_name("downloads");
    let (fakes, collaborators) = Fakes::new(&config, download_dir);
    let orchestrator = Orchestrator::with_collaborators(config, collaborators)
        .await
        .unwrap();
    (orchestrator, fakes)
}

/// Magnet link for a 40-hex-character hash
pub(crate) fn magnet(hash: &str) -> String {
    format!("magnet:?xt=urn:btih:{}&dn=episode", hash)
}

/// 40-hex-character info-hash derived from a small number
pub(crate) fn hash(n: u32) -> String {
    format!("{:040x}", n)
}

/// Feed item for episode `episode`
pub(crate) fn feed_item(episode: u32, publish_time: i64, locator: &str) -> FeedItem {
    FeedItem {
        title: format!("[Group] Show - {:02} [1080p]", episode),
        episode: EpisodeNumber::Known(episode),
        publish_time,
        locator: locator.to_string(),
    }
}

/// Add a direct-URL anime whose feed lives at `feed_url`
pub(crate) async fn add_direct_anime(
    orchestrator: &Orchestrator,
    name: &str,
    feed_url: &str,
    auto_update: bool,
) -> AnimeEntry {
    orchestrator
        .add_anime(NewAnimeRequest {
            name: name.to_string(),
            season: 1,
            source: Some(AnimeSource::DirectUrl),
            query_text: None,
            feed_url: Some(feed_url.to_string()),
            auto_update,
        })
        .await
        .unwrap()
}
