//! Error types for autoanime
//!
//! This module provides the error taxonomy used throughout the library:
//! - Domain-specific error types (Library, Transfer, Delivery, Database)
//! - Machine-readable error codes for an embedding API layer
//! - Structured error details with contextual information (anime id, locator, etc.)

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for autoanime operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for autoanime
///
/// This is the primary error type used throughout the library. Each variant includes
/// contextual information to help diagnose issues.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "library.base_path")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Library operation rejected (validation or ownership conflict)
    #[error("{0}")]
    Library(#[from] LibraryError),

    /// Transfer locator could not be resolved
    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    /// Delivery pipeline error
    #[error("delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    /// Feed could not be fetched or parsed
    #[error("feed error: {0}")]
    Feed(String),

    /// Torrent engine rejected a request or returned an unexpected response
    #[error("torrent engine error: {0}")]
    TorrentEngine(String),

    /// Media server rejected a request
    #[error("media server error: {0}")]
    MediaServer(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Shutdown in progress - not accepting new cycles
    #[error("shutdown in progress: not accepting new update cycles")]
    ShuttingDown,

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Stored value could not be decoded into a domain type
    #[error("corrupt row: {0}")]
    CorruptRow(String),
}

/// Errors returned by the library operations (add/change/inquire/delete)
///
/// Validation failures ("fix your request") and ownership conflicts ("try later")
/// are separate variants so callers can tell them apart.
#[derive(Debug, Error)]
pub enum LibraryError {
    /// The request is inconsistent; nothing was changed
    #[error("{0}")]
    Validation(String),

    /// The anime is owned by an in-flight update cycle
    #[error("Anime is under management: {id}")]
    Locked {
        /// Id of the locked anime
        id: String,
    },

    /// An anime with the same name and season is already tracked
    #[error("Anime is already in the library: {id}")]
    AlreadyExists {
        /// Id of the existing anime
        id: String,
    },

    /// No anime with this id
    #[error("Anime does not exist: {id}")]
    NotFound {
        /// Id that was looked up
        id: String,
    },
}

/// Transfer locator resolution errors
///
/// These are expected outcomes of feed processing: the planner skips the
/// offending item and continues with the rest of the feed.
#[derive(Debug, Error)]
pub enum TransferError {
    /// Locator scheme is neither magnet nor http(s)
    #[error("unsupported locator scheme: {locator}")]
    UnsupportedScheme {
        /// The locator that was rejected
        locator: String,
    },

    /// Magnet link without a usable BitTorrent info-hash
    #[error("malformed magnet link {locator}: {reason}")]
    MalformedMagnet {
        /// The magnet link
        locator: String,
        /// Why it was rejected
        reason: String,
    },

    /// Downloaded file is not a valid torrent
    #[error("invalid torrent file from {locator}: {reason}")]
    InvalidTorrent {
        /// Where the file came from
        locator: String,
        /// Why it was rejected
        reason: String,
    },

    /// Torrent file could not be downloaded or staged
    #[error("failed to fetch {locator}: {reason}")]
    FetchFailed {
        /// URL of the torrent file
        locator: String,
        /// Underlying failure
        reason: String,
    },
}

/// Delivery pipeline errors
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The torrent engine did not accept the submission batch
    #[error("submission of {count} transfers failed: {reason}")]
    SubmissionFailed {
        /// Number of tasks in the rejected batch
        count: usize,
        /// The reason reported by the engine client
        reason: String,
    },

    /// Copying a downloaded artifact into the library failed
    #[error("failed to copy {source_path} to {dest_path}: {reason}")]
    CopyFailed {
        /// Path reported by the torrent engine
        source_path: std::path::PathBuf,
        /// Library destination
        dest_path: std::path::PathBuf,
        /// Underlying failure
        reason: String,
    },
}

impl Error {
    /// Get the machine-readable error code
    pub fn error_code(&self) -> &str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Database(_) => "database_error",
            Error::Sqlx(_) => "database_error",
            Error::Library(e) => match e {
                LibraryError::Validation(_) => "validation_error",
                LibraryError::Locked { .. } => "locked",
                LibraryError::AlreadyExists { .. } => "already_exists",
                LibraryError::NotFound { .. } => "not_found",
            },
            Error::Transfer(e) => match e {
                TransferError::UnsupportedScheme { .. } => "unsupported_scheme",
                TransferError::MalformedMagnet { .. } => "malformed_magnet",
                TransferError::InvalidTorrent { .. } => "invalid_torrent",
                TransferError::FetchFailed { .. } => "fetch_failed",
            },
            Error::Delivery(e) => match e {
                DeliveryError::SubmissionFailed { .. } => "submission_failed",
                DeliveryError::CopyFailed { .. } => "copy_failed",
            },
            Error::Feed(_) => "feed_error",
            Error::TorrentEngine(_) => "torrent_engine_error",
            Error::MediaServer(_) => "media_server_error",
            Error::Io(_) => "io_error",
            Error::Network(_) => "network_error",
            Error::Serialization(_) => "serialization_error",
            Error::ShuttingDown => "shutting_down",
            Error::Other(_) => "internal_error",
        }
    }

    /// True for a validation failure (the request must be fixed)
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Library(LibraryError::Validation(_)))
    }

    /// True for an ownership conflict (the request may succeed later)
    pub fn is_locked(&self) -> bool {
        matches!(self, Error::Library(LibraryError::Locked { .. }))
    }
}

impl Error {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Error::Library(LibraryError::Validation(message.into()))
    }
}

/// Structured failure reported to an embedding API layer
///
/// # Example JSON
///
/// ```json
/// {
///   "code": "locked",
///   "message": "Anime is under management: 3f2a...",
///   "details": { "anime_id": "3f2a..." }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "validation_error", "locked")
    pub code: String,

    /// Human-readable error message
    pub message: String,

    /// Optional additional context about the error
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl From<&Error> for ErrorDetail {
    fn from(error: &Error) -> Self {
        let details = match error {
            Error::Library(LibraryError::Locked { id })
            | Error::Library(LibraryError::AlreadyExists { id })
            | Error::Library(LibraryError::NotFound { id }) => Some(serde_json::json!({
                "anime_id": id,
            })),
            Error::Transfer(TransferError::UnsupportedScheme { locator })
            | Error::Transfer(TransferError::MalformedMagnet { locator, .. })
            | Error::Transfer(TransferError::InvalidTorrent { locator, .. })
            | Error::Transfer(TransferError::FetchFailed { locator, .. }) => {
                Some(serde_json::json!({
                    "locator": locator,
                }))
            }
            Error::Delivery(DeliveryError::SubmissionFailed { count, .. }) => {
                Some(serde_json::json!({
                    "task_count": count,
                }))
            }
            Error::Config { key: Some(key), .. } => Some(serde_json::json!({
                "key": key,
            })),
            _ => None,
        };

        ErrorDetail {
            code: error.error_code().to_string(),
            message: error.to_string(),
            details,
        }
    }
}

impl From<Error> for ErrorDetail {
    fn from(error: Error) -> Self {
        ErrorDetail::from(&error)
    }
}
