//! # autoanime
//!
//! Library that keeps a personal anime library up to date.
//!
//! Tracked series ("anime") subscribe to a release feed. An update cycle reads
//! those feeds, queues every newly published episode, hands the batch to a
//! torrent engine, copies finished downloads into the library and records
//! what was delivered. A media server is asked to rescan afterwards.
//!
//! ## Update cycle
//!
//! 1. **Plan** - claim eligible anime and queue their new episodes
//! 2. **Select** - deduplicate queued episodes and claim the runnable ones
//! 3. **Deliver** - submit, wait for the engine, copy into the library
//! 4. **Reconcile** - write outcomes back and release every claim
//!
//! Claims are persistent lock flags taken inside SQLite transactions, so
//! overlapping cycles never work on the same anime or episode.
//!
//! ## Quick Start
//!
//! ```no_run
//! use autoanime::{Orchestrator, Config, NewAnimeRequest, AnimeSource};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_json_file(std::path::Path::new("autoanime.json")).await?;
//!     let orchestrator = Orchestrator::new(config).await?;
//!
//!     orchestrator
//!         .add_anime(NewAnimeRequest {
//!             name: "Sousou no Frieren".to_string(),
//!             season: 1,
//!             source: Some(AnimeSource::AcgRip),
//!             query_text: Some("Frieren 1080p".to_string()),
//!             auto_update: true,
//!             ..Default::default()
//!         })
//!         .await?;
//!
//!     // Subscribe to events
//!     let mut events = orchestrator.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     orchestrator.trigger_manual_update()?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Configuration types
pub mod config;
/// Database persistence layer
pub mod db;
/// Episode task deduplication
pub mod dedup;
/// Error types
pub mod error;
/// Release feeds
pub mod feed;
/// Media server notification
pub mod media_server;
/// Update orchestration
pub mod orchestrator;
/// Retry logic with exponential backoff
pub mod retry;
/// Torrent engine client
pub mod torrent;
/// Transfer locator resolution
pub mod transfer;
/// Core types and events
pub mod types;

// Re-export commonly used types
pub use config::Config;
pub use db::Database;
pub use error::{
    DatabaseError, DeliveryError, Error, ErrorDetail, LibraryError, Result, TransferError,
};
pub use orchestrator::{
    AnimeChange, AnimeQuery, Collaborators, CycleReport, DeliveryReport, NewAnimeRequest,
    Orchestrator, PlanReport,
};
pub use types::{
    AnimeEntry, AnimeId, AnimeSource, DeliveryState, EpisodeNumber, EpisodePreview, EpisodeTask,
    Event, Subscription, TaskId,
};

/// Run until SIGTERM or SIGINT (Ctrl+C elsewhere), then shut the orchestrator down
///
/// The background scheduler, if enabled, keeps running cycles until then.
///
/// # Example
///
/// ```no_run
/// use autoanime::{Config, Orchestrator, run_with_shutdown};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let orchestrator = Orchestrator::new(Config::default()).await?;
///     run_with_shutdown(orchestrator).await?;
///     Ok(())
/// }
/// ```
pub async fn run_with_shutdown(orchestrator: Orchestrator) -> Result<()> {
    wait_for_signal().await;
    orchestrator.shutdown().await
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Registration fails in some sandboxes; fall back to whatever is available.
    match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            let name = tokio::select! {
                _ = sigterm.recv() => "SIGTERM",
                _ = sigint.recv() => "SIGINT",
            };
            tracing::info!(signal = name, "Received shutdown signal");
        }
        (Ok(mut only), Err(e)) | (Err(e), Ok(mut only)) => {
            tracing::warn!(error = %e, "Could not register both signal handlers");
            only.recv().await;
            tracing::info!("Received shutdown signal");
        }
        (Err(e), Err(_)) => {
            tracing::error!(error = %e, "Could not register signal handlers, using ctrl_c");
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            }
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Received Ctrl+C"),
        Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl+C"),
    }
}
