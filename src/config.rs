//! Configuration types for autoanime

use crate::error::{Error, Result};
use crate::types::AnimeSource;
use serde::{Deserialize, Serialize};
use std::{path::Path, path::PathBuf, time::Duration};

/// Library layout on disk
///
/// Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LibraryConfig {
    /// Library root. Each anime is stored under `base_path/<name>/Season<season>`
    /// (default: "./library")
    #[serde(default = "default_base_path")]
    pub base_path: PathBuf,

    /// Directory for downloaded `.torrent` files awaiting submission (default: "./staging")
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            base_path: default_base_path(),
            staging_dir: default_staging_dir(),
        }
    }
}

/// Update cycle timing and behavior
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpdateConfig {
    /// An auto-update anime is only refreshed when its newest publication is older
    /// than this (default: 7 days)
    #[serde(default = "default_min_refresh_interval", with = "duration_serde")]
    pub min_refresh_interval: Duration,

    /// Period of the background auto-update scheduler (default: 2 hours)
    #[serde(default = "default_auto_update_interval", with = "duration_serde")]
    pub auto_update_interval: Duration,

    /// Interval between torrent engine polls and copy-worker checks (default: 2 seconds)
    #[serde(default = "default_poll_interval", with = "duration_serde")]
    pub poll_interval: Duration,

    /// Upper bound on a delivery pipeline run (default: 1 hour)
    ///
    /// Reaching it does not cancel the transfers on the torrent engine; tasks
    /// that were not copied in time are reconciled as failed.
    #[serde(default = "default_delivery_timeout", with = "duration_serde")]
    pub delivery_timeout: Duration,

    /// Source used when an add request does not name one (default: acgrip)
    #[serde(default)]
    pub default_source: AnimeSource,

    /// Remove successfully copied transfers from the torrent engine (files are kept)
    #[serde(default)]
    pub remove_finished_transfers: bool,

    /// Number of completed episode tasks kept for history (default: 1000)
    #[serde(default = "default_history_capacity")]
    pub history_capacity: u32,

    /// Start the periodic auto-update scheduler on startup (default: true)
    #[serde(default = "default_true")]
    pub run_scheduler: bool,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            min_refresh_interval: default_min_refresh_interval(),
            auto_update_interval: default_auto_update_interval(),
            poll_interval: default_poll_interval(),
            delivery_timeout: default_delivery_timeout(),
            default_source: AnimeSource::default(),
            remove_finished_transfers: false,
            history_capacity: default_history_capacity(),
            run_scheduler: true,
        }
    }
}

/// Outgoing HTTP settings shared by the feed source, resolver and service clients
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Request timeout (default: 20 seconds)
    #[serde(default = "default_http_timeout", with = "duration_serde")]
    pub timeout: Duration,

    /// Optional proxy for all outgoing requests (e.g. "http://127.0.0.1:7890")
    #[serde(default)]
    pub proxy: Option<String>,

    /// User agent sent with feed and torrent requests
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: default_http_timeout(),
            proxy: None,
            user_agent: default_user_agent(),
        }
    }
}

impl HttpConfig {
    /// Build a reqwest client for public sites (feeds, torrent downloads)
    ///
    /// Honors the timeout, proxy and user agent.
    pub fn build_client(&self) -> Result<reqwest::Client> {
        let mut builder = self.base_builder();

        if let Some(proxy) = &self.proxy {
            let proxy = reqwest::Proxy::all(proxy).map_err(|e| Error::Config {
                message: format!("invalid proxy URL: {}", e),
                key: Some("http.proxy".to_string()),
            })?;
            builder = builder.proxy(proxy);
        }

        finish(builder)
    }

    /// Build a reqwest client for the torrent engine and media server
    ///
    /// These usually live on the local network, so the proxy is not applied.
    pub fn build_service_client(&self, cookies: bool) -> Result<reqwest::Client> {
        finish(self.base_builder().cookie_store(cookies))
    }

    fn base_builder(&self) -> reqwest::ClientBuilder {
        reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(self.user_agent.clone())
    }
}

fn finish(builder: reqwest::ClientBuilder) -> Result<reqwest::Client> {
    builder
        .build()
        .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))
}

/// qBittorrent Web API connection
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TorrentEngineConfig {
    /// Web UI address (default: "http://127.0.0.1:8080")
    #[serde(default = "default_qbittorrent_url")]
    pub url: String,

    /// Web UI username (default: "admin")
    #[serde(default = "default_qbittorrent_username")]
    pub username: String,

    /// Web UI password
    #[serde(default)]
    pub password: String,

    /// Save path passed with each submission (engine default if None)
    #[serde(default)]
    pub save_path: Option<PathBuf>,
}

impl Default for TorrentEngineConfig {
    fn default() -> Self {
        Self {
            url: default_qbittorrent_url(),
            username: default_qbittorrent_username(),
            password: String::new(),
            save_path: None,
        }
    }
}

/// Jellyfin connection (library refresh after delivery)
///
/// With no URL configured, library refresh is a no-op.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct MediaServerConfig {
    /// Jellyfin address (e.g. "http://127.0.0.1:8096")
    #[serde(default)]
    pub url: Option<String>,

    /// API key sent as `X-Emby-Token`
    #[serde(default)]
    pub api_key: Option<String>,
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 30 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Data storage
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Database path (default: "./autoanime.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Main configuration for [`Orchestrator`](crate::Orchestrator)
///
/// Every section has defaults, so `{}` is a valid configuration document.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Library layout
    #[serde(default)]
    pub library: LibraryConfig,

    /// Update cycle behavior
    #[serde(default)]
    pub update: UpdateConfig,

    /// Outgoing HTTP settings
    #[serde(default)]
    pub http: HttpConfig,

    /// qBittorrent connection
    #[serde(default)]
    pub torrent_engine: TorrentEngineConfig,

    /// Jellyfin connection
    #[serde(default)]
    pub media_server: MediaServerConfig,

    /// Retry behavior for feed and torrent-file fetches
    #[serde(default)]
    pub retry: RetryConfig,

    /// Data storage
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl Config {
    /// Parse a JSON configuration document and validate it
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a JSON configuration file
    pub async fn from_json_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to read config file '{}': {}", path.display(), e),
            ))
        })?;
        Self::from_json_str(&content)
    }

    /// Reject settings that would make the update cycle unusable
    pub fn validate(&self) -> Result<()> {
        if self.update.poll_interval.is_zero() {
            return Err(config_error("poll_interval must be positive", "update.poll_interval"));
        }
        if self.update.delivery_timeout < self.update.poll_interval {
            return Err(config_error(
                "delivery_timeout must not be shorter than poll_interval",
                "update.delivery_timeout",
            ));
        }
        if self.update.auto_update_interval.is_zero() {
            return Err(config_error(
                "auto_update_interval must be positive",
                "update.auto_update_interval",
            ));
        }
        if self.library.base_path.as_os_str().is_empty() {
            return Err(config_error("base_path must not be empty", "library.base_path"));
        }
        url::Url::parse(&self.torrent_engine.url).map_err(|e| {
            config_error(
                &format!("invalid torrent engine URL: {}", e),
                "torrent_engine.url",
            )
        })?;
        if let Some(media_url) = &self.media_server.url {
            url::Url::parse(media_url).map_err(|e| {
                config_error(
                    &format!("invalid media server URL: {}", e),
                    "media_server.url",
                )
            })?;
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(config_error(
                "backoff_multiplier must be at least 1.0",
                "retry.backoff_multiplier",
            ));
        }
        Ok(())
    }
}

fn config_error(message: &str, key: &str) -> Error {
    Error::Config {
        message: message.to_string(),
        key: Some(key.to_string()),
    }
}

fn default_base_path() -> PathBuf {
    PathBuf::from("./library")
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from("./staging")
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./autoanime.db")
}

fn default_min_refresh_interval() -> Duration {
    Duration::from_secs(7 * 24 * 60 * 60)
}

fn default_auto_update_interval() -> Duration {
    Duration::from_secs(2 * 60 * 60)
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_delivery_timeout() -> Duration {
    Duration::from_secs(60 * 60)
}

fn default_history_capacity() -> u32 {
    1000
}

fn default_http_timeout() -> Duration {
    Duration::from_secs(20)
}

fn default_user_agent() -> String {
    format!("autoanime/{}", env!("CARGO_PKG_VERSION"))
}

fn default_qbittorrent_url() -> String {
    "http://127.0.0.1:8080".to_string()
}

fn default_qbittorrent_username() -> String {
    "admin".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = Config::from_json_str("{}").unwrap();

        assert_eq!(config.update.poll_interval, Duration::from_secs(2));
        assert_eq!(config.update.auto_update_interval, Duration::from_secs(7200));
        assert_eq!(config.update.min_refresh_interval, Duration::from_secs(604_800));
        assert_eq!(config.http.timeout, Duration::from_secs(20));
        assert_eq!(config.update.default_source, AnimeSource::AcgRip);
        assert!(config.update.run_scheduler);
        assert!(config.media_server.url.is_none());
    }

    #[test]
    fn durations_are_read_as_seconds() {
        let config = Config::from_json_str(
            r#"{
                "update": { "poll_interval": 5, "delivery_timeout": 600, "default_source": "dmhy" },
                "http": { "timeout": 30, "proxy": "http://127.0.0.1:7890" }
            }"#,
        )
        .unwrap();

        assert_eq!(config.update.poll_interval, Duration::from_secs(5));
        assert_eq!(config.update.delivery_timeout, Duration::from_secs(600));
        assert_eq!(config.update.default_source, AnimeSource::Dmhy);
        assert_eq!(config.http.timeout, Duration::from_secs(30));
        assert_eq!(config.http.proxy.as_deref(), Some("http://127.0.0.1:7890"));
    }

    #[test]
    fn serialization_round_trip_keeps_seconds() {
        let mut config = Config::default();
        config.update.delivery_timeout = Duration::from_secs(90);

        let json = serde_json::to_string(&config).expect("serialize failed");
        let back: Config = serde_json::from_str(&json).expect("deserialize failed");

        assert_eq!(back.update.delivery_timeout, Duration::from_secs(90));
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let err = Config::from_json_str(r#"{ "update": { "poll_interval": 0 } }"#).unwrap_err();

        match err {
            Error::Config { key, .. } => assert_eq!(key.as_deref(), Some("update.poll_interval")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn timeout_shorter_than_poll_interval_is_rejected() {
        let err = Config::from_json_str(
            r#"{ "update": { "poll_interval": 10, "delivery_timeout": 5 } }"#,
        )
        .unwrap_err();

        assert_eq!(err.error_code(), "config_error");
    }

    #[test]
    fn invalid_media_server_url_is_rejected() {
        let err = Config::from_json_str(r#"{ "media_server": { "url": "not a url" } }"#)
            .unwrap_err();

        match err {
            Error::Config { key, .. } => assert_eq!(key.as_deref(), Some("media_server.url")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn build_client_rejects_bad_proxy() {
        let http = HttpConfig {
            proxy: Some("::not a proxy::".to_string()),
            ..Default::default()
        };

        assert!(http.build_client().is_err());
    }

    #[tokio::test]
    async fn from_json_file_reads_document() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        tokio::fs::write(&path, r#"{ "update": { "history_capacity": 10 } }"#)
            .await
            .unwrap();

        let config = Config::from_json_file(&path).await.unwrap();
        assert_eq!(config.update.history_capacity, 10);
    }
}
