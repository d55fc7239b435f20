//! Transfer resolution: turning a feed item's locator into something the
//! torrent engine accepts, plus the info-hash that identifies the content.
//!
//! - `magnet:` links are passed through; the hash comes from `xt=urn:btih:`.
//! - `http(s):` locators are downloaded into the staging directory and hashed
//!   from the bencoded `info` dictionary.
//! - Any other scheme is rejected with [`TransferError::UnsupportedScheme`].

use crate::config::{HttpConfig, RetryConfig};
use crate::error::{Error, Result, TransferError};
use crate::retry::fetch_with_retry;
use crate::types::ResolvedTransfer;
use async_trait::async_trait;
use rand::Rng;
use sha1::{Digest, Sha1};
use std::path::PathBuf;

mod bencode;
mod magnet;

pub use bencode::info_span;
pub use magnet::magnet_info_hash;

/// Resolves transfer locators
#[async_trait]
pub trait TransferResolver: Send + Sync {
    /// Resolve one locator
    async fn resolve(&self, locator: &str) -> std::result::Result<ResolvedTransfer, TransferError>;
}

/// Production resolver: magnets in memory, `.torrent` URLs staged on disk
pub struct DefaultResolver {
    client: reqwest::Client,
    retry: RetryConfig,
    staging_dir: PathBuf,
}

impl DefaultResolver {
    /// Create a resolver that stages downloads under `staging_dir`
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created
    pub fn new(http: &HttpConfig, retry: RetryConfig, staging_dir: PathBuf) -> Result<Self> {
        Ok(Self::with_client(http.build_client()?, retry, staging_dir))
    }

    /// Create a resolver around an existing client
    pub fn with_client(client: reqwest::Client, retry: RetryConfig, staging_dir: PathBuf) -> Self {
        Self {
            client,
            retry,
            staging_dir,
        }
    }

    async fn download_once(&self, locator: &str) -> Result<Vec<u8>> {
        let response = self.client.get(locator).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Transfer(TransferError::FetchFailed {
                locator: locator.to_string(),
                reason: format!("HTTP {}", status.as_u16()),
            }));
        }

        Ok(response.bytes().await?.to_vec())
    }

    async fn resolve_torrent_url(
        &self,
        locator: &str,
    ) -> std::result::Result<ResolvedTransfer, TransferError> {
        let data = fetch_with_retry(&self.retry, || self.download_once(locator))
            .await
            .map_err(|e| match e {
                Error::Transfer(e) => e,
                other => TransferError::FetchFailed {
                    locator: locator.to_string(),
                    reason: other.to_string(),
                },
            })?;

        let info = info_span(&data).map_err(|reason| TransferError::InvalidTorrent {
            locator: locator.to_string(),
            reason,
        })?;
        let content_hash = hex::encode(Sha1::digest(info));

        let staged_file = self.stage(&content_hash, &data).await.map_err(|e| {
            TransferError::FetchFailed {
                locator: locator.to_string(),
                reason: format!("failed to stage torrent: {}", e),
            }
        })?;

        tracing::debug!(
            locator,
            hash = %content_hash,
            path = %staged_file.display(),
            "Staged torrent file"
        );

        Ok(ResolvedTransfer {
            content_hash,
            staged_file: Some(staged_file),
            magnet: None,
        })
    }

    /// Write the torrent under a name no other task shares
    async fn stage(&self, content_hash: &str, data: &[u8]) -> std::io::Result<PathBuf> {
        tokio::fs::create_dir_all(&self.staging_dir).await?;
        let suffix: u32 = rand::thread_rng().r#gen();
        let path = self
            .staging_dir
            .join(format!("{}-{:08x}.torrent", content_hash, suffix));
        tokio::fs::write(&path, data).await?;
        Ok(path)
    }
}

#[async_trait]
impl TransferResolver for DefaultResolver {
    async fn resolve(&self, locator: &str) -> std::result::Result<ResolvedTransfer, TransferError> {
        let scheme = locator
            .split_once(':')
            .map(|(scheme, _)| scheme.to_ascii_lowercase());

        match scheme.as_deref() {
            Some("magnet") => Ok(ResolvedTransfer {
                content_hash: magnet_info_hash(locator)?,
                staged_file: None,
                magnet: Some(locator.to_string()),
            }),
            Some("http") | Some("https") => self.resolve_torrent_url(locator).await,
            _ => Err(TransferError::UnsupportedScheme {
                locator: locator.to_string(),
            }),
        }
    }
}
