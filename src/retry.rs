//! Retry logic with exponential backoff
//!
//! Feed fetches and `.torrent` downloads go through [`fetch_with_retry`] so that
//! a flaky tracker site does not cost a whole update cycle. Backoff is
//! exponential with optional jitter.
//!
//! # Example
//!
//! ```no_run
//! use autoanime::config::RetryConfig;
//! use autoanime::retry::fetch_with_retry;
//!
//! # async fn example(client: reqwest::Client) -> autoanime::Result<()> {
//! let retry = RetryConfig::default();
//! let body = fetch_with_retry(&retry, || async {
//!     let response = client.get("https://nyaa.si/?page=rss&q=frieren").send().await?;
//!     Ok::<_, autoanime::Error>(response.text().await?)
//! })
//! .await?;
//! println!("{} bytes", body.len());
//! # Ok(())
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::{Error, TransferError};
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (timeouts, refused connections, 5xx) return `true`.
/// Permanent failures (bad input, not found, rejected credentials) return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            Error::Network(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.status().is_some_and(|s| s.is_server_error())
            }
            Error::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::ConnectionRefused
                    | std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::Interrupted
            ),
            Error::Transfer(TransferError::FetchFailed { reason, .. }) | Error::Feed(reason) => {
                reason.contains("timed out")
                    || reason.contains("connection")
                    || reason.contains("HTTP 5")
            }
            Error::Transfer(_) => false,
            Error::Config { .. }
            | Error::Database(_)
            | Error::Sqlx(_)
            | Error::Library(_)
            | Error::Delivery(_)
            | Error::TorrentEngine(_)
            | Error::MediaServer(_)
            | Error::Serialization(_)
            | Error::ShuttingDown
            | Error::Other(_) => false,
        }
    }
}

/// Delay schedule for one retried operation
#[derive(Debug)]
struct Backoff<'a> {
    config: &'a RetryConfig,
    retries: u32,
    next: Duration,
}

impl<'a> Backoff<'a> {
    fn new(config: &'a RetryConfig) -> Self {
        Self {
            config,
            retries: 0,
            next: config.initial_delay,
        }
    }

    /// Delay before the next attempt, or `None` once the budget is spent
    fn next_delay(&mut self) -> Option<Duration> {
        if self.retries >= self.config.max_attempts {
            return None;
        }
        self.retries += 1;

        let delay = self.next;
        let grown = Duration::from_secs_f64(delay.as_secs_f64() * self.config.backoff_multiplier);
        self.next = grown.min(self.config.max_delay);

        Some(if self.config.jitter {
            add_jitter(delay)
        } else {
            delay
        })
    }
}

/// Run `operation` until it succeeds, fails permanently or runs out of retries
///
/// `config.max_attempts` counts retries, so the operation runs at most
/// `max_attempts + 1` times. The last error is returned as is.
pub async fn fetch_with_retry<F, Fut, T, E>(config: &RetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display,
{
    let mut backoff = Backoff::new(config);

    loop {
        let error = match operation().await {
            Ok(value) => {
                if backoff.retries > 0 {
                    tracing::info!(retries = backoff.retries, "Request succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) => e,
        };

        if !error.is_retryable() {
            tracing::debug!(error = %error, "Request failed permanently");
            return Err(error);
        }

        let Some(delay) = backoff.next_delay() else {
            tracing::error!(
                error = %error,
                attempts = backoff.retries + 1,
                "Request failed, retries exhausted"
            );
            return Err(error);
        };

        tracing::warn!(
            error = %error,
            retry = backoff.retries,
            max_retries = config.max_attempts,
            delay_ms = delay.as_millis() as u64,
            "Request failed, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}

/// Stretch `delay` by a random factor in `1.0..=2.0`
fn add_jitter(delay: Duration) -> Duration {
    let factor: f64 = rand::thread_rng().gen_range(1.0..=2.0);
    delay.mul_f64(factor)
}
