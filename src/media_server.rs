//! Media server notification after new episodes land in the library.

use crate::config::{HttpConfig, MediaServerConfig};
use crate::error::{Error, Result};
use async_trait::async_trait;

/// Media server that indexes the library
#[async_trait]
pub trait MediaServer: Send + Sync {
    /// Ask the server to rescan its libraries
    async fn refresh(&self) -> Result<()>;
}

/// Build the media server described by `config`
///
/// Without a configured URL library refresh is disabled.
pub fn from_config(config: &MediaServerConfig, http: &HttpConfig) -> Result<Box<dyn MediaServer>> {
    match &config.url {
        Some(url) => Ok(Box::new(JellyfinClient::new(
            url,
            config.api_key.clone(),
            http,
        )?)),
        None => Ok(Box::new(NoOpMediaServer)),
    }
}

/// Jellyfin client authenticating with an API key
pub struct JellyfinClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl JellyfinClient {
    /// Create a client for the server at `url`
    pub fn new(url: &str, api_key: Option<String>, http: &HttpConfig) -> Result<Self> {
        Ok(Self {
            client: http.build_service_client(false)?,
            base_url: url.trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl MediaServer for JellyfinClient {
    async fn refresh(&self) -> Result<()> {
        let mut request = self
            .client
            .post(format!("{}/Library/Refresh", self.base_url));
        if let Some(key) = &self.api_key {
            request = request.header("X-Emby-Token", key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::MediaServer(format!(
                "Library refresh returned HTTP {}",
                status.as_u16()
            )));
        }

        tracing::debug!("Requested Jellyfin library refresh");
        Ok(())
    }
}

/// Media server that does nothing
pub struct NoOpMediaServer;

#[async_trait]
impl MediaServer for NoOpMediaServer {
    async fn refresh(&self) -> Result<()> {
        Ok(())
    }
}
