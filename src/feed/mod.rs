//! Feed sources: fetching a subscription's feed and turning it into episode items.
//!
//! A [`FeedSource`] is the only seam through which an update cycle reads the
//! outside world's release listings. [`HttpFeedSource`] is the production
//! implementation; tests substitute in-memory fakes.

use crate::config::{HttpConfig, RetryConfig};
use crate::error::{Error, Result};
use crate::retry::fetch_with_retry;
use crate::types::{AnimeSource, FeedItem};
use async_trait::async_trait;

mod episode;
mod parse;

pub use episode::parse_episode_number;
pub use parse::parse_feed;

/// Source of release listings for a subscription
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Fetch the raw feed document at `url`
    async fn fetch_text(&self, url: &str) -> Result<String>;

    /// Parse a feed document published by `source`
    fn parse(&self, source: AnimeSource, text: &str) -> Result<Vec<FeedItem>>;

    /// Fetch and parse in one step
    async fn fetch(&self, source: AnimeSource, url: &str) -> Result<Vec<FeedItem>> {
        let text = self.fetch_text(url).await?;
        self.parse(source, &text)
    }
}

/// Feed source that fetches over HTTP
pub struct HttpFeedSource {
    client: reqwest::Client,
    retry: RetryConfig,
}

impl HttpFeedSource {
    /// Create a feed source from the HTTP and retry settings
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created
    pub fn new(http: &HttpConfig, retry: RetryConfig) -> Result<Self> {
        Ok(Self::with_client(http.build_client()?, retry))
    }

    /// Create a feed source around an existing client
    pub fn with_client(client: reqwest::Client, retry: RetryConfig) -> Self {
        Self { client, retry }
    }

    async fn fetch_once(&self, url: &str) -> Result<String> {
        let response = self.client.get(url).send().await?;

        // Check HTTP status before trying to read the body
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Feed(format!(
                "Feed returned HTTP {}: {}",
                status.as_u16(),
                url
            )));
        }

        Ok(response.text().await?)
    }
}

#[async_trait]
impl FeedSource for HttpFeedSource {
    async fn fetch_text(&self, url: &str) -> Result<String> {
        tracing::debug!(url, "Fetching feed");
        fetch_with_retry(&self.retry, || self.fetch_once(url)).await
    }

    fn parse(&self, source: AnimeSource, text: &str) -> Result<Vec<FeedItem>> {
        let items = parse_feed(text)?;
        tracing::debug!(source = %source, items = items.len(), "Parsed feed");
        Ok(items)
    }
}
