//! Torrent engine seam.
//!
//! The delivery pipeline submits transfers, polls their progress and
//! optionally removes finished ones through [`TorrentEngine`]. The engine owns
//! the downloaded data; the pipeline only copies it out.

use crate::error::Result;
use async_trait::async_trait;
use std::path::PathBuf;

mod qbittorrent;

pub use qbittorrent::QbittorrentClient;

/// Progress of one transfer as reported by the engine
#[derive(Clone, Debug, PartialEq)]
pub struct TorrentStatus {
    /// Info-hash (lowercase hex)
    pub hash: String,
    /// Completion ratio in `0.0..=1.0`
    pub progress: f64,
    /// File or directory the engine wrote the content to
    pub content_path: PathBuf,
}

impl TorrentStatus {
    /// Whether the engine has finished the transfer
    pub fn is_complete(&self) -> bool {
        self.progress >= 1.0
    }
}

/// Remote torrent engine
#[async_trait]
pub trait TorrentEngine: Send + Sync {
    /// Submit magnet links and `.torrent` files in one request
    async fn submit(&self, magnets: &[String], files: &[PathBuf]) -> Result<()>;

    /// Remove transfers, keeping their downloaded files
    async fn remove(&self, hashes: &[String]) -> Result<()>;

    /// Report progress for the given hashes
    ///
    /// Hashes the engine does not know are simply absent from the result.
    async fn poll(&self, hashes: &[String]) -> Result<Vec<TorrentStatus>>;
}
