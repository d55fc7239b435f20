//! Update orchestration split into focused submodules.
//!
//! The [`Orchestrator`] struct and its methods are organized by domain:
//! - [`library`] - Anime registry operations exposed to an API layer
//! - [`planner`] - Claiming anime and queueing newly published episodes
//! - [`select`] - Deduplicating claim of runnable episode tasks
//! - [`pipeline`] - Submission, download monitor and copy workers
//! - [`reconciler`] - Writing outcomes back and releasing locks
//! - [`cycle`] - The full plan → select → deliver → reconcile cycle
//! - [`scheduler`] - Periodic auto-update cycles
//! - [`lifecycle`] - Startup recovery and shutdown coordination

mod cycle;
mod library;
mod lifecycle;
mod pipeline;
mod planner;
mod reconciler;
mod scheduler;
mod select;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use cycle::CycleReport;
pub use library::{AnimeChange, AnimeQuery, NewAnimeRequest};
pub use pipeline::DeliveryReport;
pub use planner::PlanReport;
pub use scheduler::UpdateScheduler;

use crate::config::Config;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::feed::{FeedSource, HttpFeedSource};
use crate::media_server::{self, MediaServer};
use crate::torrent::{QbittorrentClient, TorrentEngine};
use crate::transfer::{DefaultResolver, TransferResolver};
use crate::types::Event;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;

/// External services an update cycle talks to
#[derive(Clone)]
pub struct Collaborators {
    /// Release listings
    pub feed: Arc<dyn FeedSource>,
    /// Locator → info-hash (+ staged `.torrent`)
    pub resolver: Arc<dyn TransferResolver>,
    /// Remote torrent engine
    pub torrent: Arc<dyn TorrentEngine>,
    /// Library indexer notified after delivery
    pub media_server: Arc<dyn MediaServer>,
}

impl Collaborators {
    /// Build the production collaborators described by `config`
    ///
    /// # Errors
    /// Returns error if an HTTP client cannot be created
    pub fn from_config(config: &Config) -> Result<Self> {
        let feed = HttpFeedSource::new(&config.http, config.retry.clone())?;
        let resolver = DefaultResolver::new(
            &config.http,
            config.retry.clone(),
            config.library.staging_dir.clone(),
        )?;
        let torrent = QbittorrentClient::new(&config.torrent_engine, &config.http)?;
        let media_server = media_server::from_config(&config.media_server, &config.http)?;

        Ok(Self {
            feed: Arc::new(feed),
            resolver: Arc::new(resolver),
            torrent: Arc::new(torrent),
            media_server: Arc::from(media_server),
        })
    }
}

/// Shutdown and scheduling signals shared by every clone
#[derive(Clone)]
pub(crate) struct RunState {
    /// Flag to indicate whether new cycles are accepted (set to false during shutdown)
    pub(crate) accepting_new: Arc<AtomicBool>,
    /// Cancelled on shutdown; wakes the scheduler out of its sleep
    pub(crate) shutdown_token: CancellationToken,
    /// Notified by manual updates to restart the scheduler's interval
    pub(crate) postpone_scheduler: Arc<tokio::sync::Notify>,
}

/// Main orchestrator instance (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct Orchestrator {
    /// Database instance for persistence (wrapped in Arc for sharing across tasks)
    /// Public for integration tests to inspect anime and task rows
    pub db: Arc<Database>,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: tokio::sync::broadcast::Sender<Event>,
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: Arc<Config>,
    /// Feed, resolver, torrent engine and media server
    pub(crate) collaborators: Collaborators,
    /// Shutdown and scheduling signals
    pub(crate) run_state: RunState,
}

impl Orchestrator {
    /// Create an orchestrator with the production collaborators
    ///
    /// See [`Orchestrator::with_collaborators`].
    pub async fn new(config: Config) -> Result<Self> {
        let collaborators = Collaborators::from_config(&config)?;
        Self::with_collaborators(config, collaborators).await
    }

    /// Create an orchestrator around the given collaborators
    ///
    /// This initializes all core components:
    /// - Validates the configuration
    /// - Creates the library and staging directories
    /// - Opens/creates the SQLite database and runs migrations
    /// - Releases locks left behind by a previous process
    /// - Starts the auto-update scheduler if configured
    pub async fn with_collaborators(config: Config, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;

        for dir in [&config.library.base_path, &config.library.staging_dir] {
            tokio::fs::create_dir_all(dir).await.map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!("Failed to create directory '{}': {}", dir.display(), e),
                ))
            })?;
        }

        let db = Database::new(&config.persistence.database_path).await?;

        lifecycle::recover(&db, &config).await?;

        // Mark that we're starting up (for unclean shutdown detection)
        db.set_clean_start().await?;

        // Create broadcast channel with buffer size of 1000 events
        // This allows multiple subscribers to receive all events independently
        let (event_tx, _rx) = tokio::sync::broadcast::channel(1000);

        let orchestrator = Self {
            db: Arc::new(db),
            event_tx,
            config: Arc::new(config),
            collaborators,
            run_state: RunState {
                accepting_new: Arc::new(AtomicBool::new(true)),
                shutdown_token: CancellationToken::new(),
                postpone_scheduler: Arc::new(tokio::sync::Notify::new()),
            },
        };

        if orchestrator.config.update.run_scheduler {
            orchestrator.start_scheduler();
        }

        Ok(orchestrator)
    }

    /// Subscribe to orchestrator events
    ///
    /// Returns a receiver that will receive all events emitted after subscription.
    /// Multiple subscribers are supported, and each receives all events independently.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Having no subscribers is not an error.
    pub(crate) fn emit_event(&self, event: Event) {
        self.event_tx.send(event).ok();
    }

    /// Get the current configuration
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Start the auto-update scheduler background task
    pub fn start_scheduler(&self) -> tokio::task::JoinHandle<()> {
        let scheduler = UpdateScheduler::new(self.clone());
        let handle = tokio::spawn(scheduler.run());
        tracing::info!(
            interval = ?self.config.update.auto_update_interval,
            "Auto-update scheduler started"
        );
        handle
    }

    pub(crate) fn is_accepting(&self) -> bool {
        self.run_state.accepting_new.load(Ordering::SeqCst)
    }
}
