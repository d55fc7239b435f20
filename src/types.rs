//! Core types for autoanime

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Stable identifier of an anime entry
///
/// Derived from name and season, so adding the same series twice yields the
/// same id and the second add is detected as a duplicate.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AnimeId(pub String);

impl AnimeId {
    /// Derive the id of `name` + `season` (SHA-256, lowercase hex)
    pub fn derive(name: &str, season: u32) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(name.as_bytes());
        hasher.update(season.to_string().as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// Borrow the hex string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for AnimeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for AnimeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for AnimeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl sqlx::Type<sqlx::Sqlite> for AnimeId {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <String as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <String as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for AnimeId {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> std::result::Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for AnimeId {
    fn decode(
        value: sqlx::sqlite::SqliteValueRef<'r>,
    ) -> std::result::Result<Self, sqlx::error::BoxDynError> {
        let id = <String as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(id))
    }
}

/// Sequence id of an episode task (assigned at insertion, defines arrival order)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub i64);

impl TaskId {
    /// Get the inner i64 value
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl From<i64> for TaskId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl From<TaskId> for i64 {
    fn from(id: TaskId) -> Self {
        id.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

impl sqlx::Type<sqlx::Sqlite> for TaskId {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <i64 as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <i64 as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for TaskId {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> std::result::Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for TaskId {
    fn decode(
        value: sqlx::sqlite::SqliteValueRef<'r>,
    ) -> std::result::Result<Self, sqlx::error::BoxDynError> {
        let id = <i64 as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(id))
    }
}

/// Where an anime's feed comes from
///
/// The three feed backends build their feed URL from a search text; `DirectUrl`
/// subscribes to an arbitrary feed URL instead.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnimeSource {
    /// acg.rip
    #[default]
    #[serde(rename = "acgrip")]
    AcgRip,
    /// dmhy.org
    #[serde(rename = "dmhy")]
    Dmhy,
    /// bangumi.moe
    #[serde(rename = "bangumi")]
    BangumiMoe,
    /// User-supplied feed URL
    #[serde(rename = "direct_url")]
    DirectUrl,
}

impl AnimeSource {
    /// Stable name used in storage and messages
    pub fn as_str(&self) -> &'static str {
        match self {
            AnimeSource::AcgRip => "acgrip",
            AnimeSource::Dmhy => "dmhy",
            AnimeSource::BangumiMoe => "bangumi",
            AnimeSource::DirectUrl => "direct_url",
        }
    }

    /// Whether this source is driven by a search text (as opposed to a feed URL)
    pub fn requires_query(&self) -> bool {
        !matches!(self, AnimeSource::DirectUrl)
    }

    /// Feed URL for a search on this backend, `None` for [`AnimeSource::DirectUrl`]
    pub fn build_query_url(&self, text: &str) -> Option<String> {
        let q = urlencoding::encode(text);
        match self {
            AnimeSource::AcgRip => Some(format!("https://acg.rip/.xml?term={}", q)),
            AnimeSource::Dmhy => Some(format!(
                "http://www.dmhy.org/topics/rss/rss.xml?keyword={}&sort_id=2&team_id=0&order=date-desc",
                q
            )),
            AnimeSource::BangumiMoe => Some(format!("https://bangumi.moe/rss/search/{}", q)),
            AnimeSource::DirectUrl => None,
        }
    }
}

impl std::fmt::Display for AnimeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AnimeSource {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "acgrip" => Ok(AnimeSource::AcgRip),
            "dmhy" => Ok(AnimeSource::Dmhy),
            "bangumi" => Ok(AnimeSource::BangumiMoe),
            "direct_url" => Ok(AnimeSource::DirectUrl),
            other => Err(Error::validation(format!("Unknown anime source: {}", other))),
        }
    }
}

/// Feed subscription of an anime: a search text or a direct feed URL, never both
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Subscription {
    /// Search text for a feed backend
    Query(String),
    /// Direct feed URL
    FeedUrl(String),
}

impl Subscription {
    /// Build a subscription from the two optional request fields
    ///
    /// Empty strings count as absent.
    pub fn from_parts(query_text: Option<&str>, feed_url: Option<&str>) -> Result<Self> {
        let query_text = query_text.filter(|s| !s.is_empty());
        let feed_url = feed_url.filter(|s| !s.is_empty());
        match (query_text, feed_url) {
            (Some(_), Some(_)) => Err(Error::validation(
                "Search text and http url cannot have values at the same time",
            )),
            (None, None) => Err(Error::validation(
                "Search text and http url cannot be empty at the same time",
            )),
            (Some(q), None) => Ok(Subscription::Query(q.to_string())),
            (None, Some(u)) => Ok(Subscription::FeedUrl(u.to_string())),
        }
    }

    /// Check that the subscription kind matches what `source` needs
    pub fn check_source(&self, source: AnimeSource) -> Result<()> {
        match (source.requires_query(), self) {
            (true, Subscription::Query(_)) | (false, Subscription::FeedUrl(_)) => Ok(()),
            (true, Subscription::FeedUrl(_)) => Err(Error::validation(format!(
                "The selected source {} must be passed the search text",
                source
            ))),
            (false, Subscription::Query(_)) => Err(Error::validation(format!(
                "The selected source {} must be passed the http url",
                source
            ))),
        }
    }

    /// Resolve the feed URL to fetch for `source`
    pub fn feed_url(&self, source: AnimeSource) -> Result<String> {
        self.check_source(source)?;
        match self {
            Subscription::FeedUrl(url) => Ok(url.clone()),
            Subscription::Query(text) => source.build_query_url(text).ok_or_else(|| {
                Error::validation(format!(
                    "The selected source {} must be passed the http url",
                    source
                ))
            }),
        }
    }

    /// Search text, if this is a query subscription
    pub fn query_text(&self) -> Option<&str> {
        match self {
            Subscription::Query(q) => Some(q),
            Subscription::FeedUrl(_) => None,
        }
    }

    /// Feed URL, if this is a direct subscription
    pub fn direct_url(&self) -> Option<&str> {
        match self {
            Subscription::FeedUrl(u) => Some(u),
            Subscription::Query(_) => None,
        }
    }
}

/// A tracked series + season
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnimeEntry {
    /// Content-derived id
    pub id: AnimeId,
    /// Series name
    pub name: String,
    /// Season number
    pub season: u32,
    /// Directory episodes are copied into
    pub storage_directory: PathBuf,
    /// Feed backend
    pub source: AnimeSource,
    /// Search text or feed URL
    pub subscription: Subscription,
    /// Episodes already delivered
    pub known_episode_numbers: BTreeSet<u32>,
    /// Newest publish time (unix seconds) among delivered episodes
    pub newest_publish_time: i64,
    /// Included in scheduled auto-update cycles
    pub auto_update: bool,
    /// Owned by an in-flight update cycle
    pub locked: bool,
}

impl AnimeEntry {
    /// Library path of an episode, without extension
    pub fn episode_destination(&self, episode: u32) -> PathBuf {
        episode_destination(&self.storage_directory, self.season, episode)
    }
}

/// `<dir>/S01E05` style destination (extension is added when the file is copied)
pub fn episode_destination(storage_directory: &Path, season: u32, episode: u32) -> PathBuf {
    storage_directory.join(format!("S{:02}E{:02}", season, episode))
}

/// One discovered, not-yet-delivered episode transfer
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EpisodeTask {
    /// Arrival order
    pub sequence_id: TaskId,
    /// Owning anime
    pub anime_id: AnimeId,
    /// Episode number within the season
    pub episode_number: u32,
    /// BitTorrent info-hash (lowercase hex); identity of the transfer
    pub content_hash: String,
    /// Locally staged `.torrent` file, for file-based transfers
    pub staged_file: Option<PathBuf>,
    /// Magnet link, for magnet-based transfers
    pub magnet: Option<String>,
    /// Library path without extension
    pub destination_path: PathBuf,
    /// Publish time of the feed item (unix seconds)
    pub publish_time: i64,
    /// Owned by an in-flight delivery
    pub locked: bool,
    /// Terminal (delivered, failed or superseded)
    pub completed: bool,
    /// Delivered successfully
    pub succeeded: bool,
}

/// Parsed episode number of a feed item
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeNumber {
    /// Episode number found in the title
    Known(u32),
    /// Title did not name a single episode
    Unknown,
}

impl EpisodeNumber {
    /// The number, if known
    pub fn known(&self) -> Option<u32> {
        match self {
            EpisodeNumber::Known(n) => Some(*n),
            EpisodeNumber::Unknown => None,
        }
    }
}

impl std::fmt::Display for EpisodeNumber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EpisodeNumber::Known(n) => write!(f, "{}", n),
            EpisodeNumber::Unknown => f.write_str("unknown"),
        }
    }
}

/// One item of a parsed feed
#[derive(Clone, Debug, PartialEq)]
pub struct FeedItem {
    /// Item title
    pub title: String,
    /// Episode parsed from the title
    pub episode: EpisodeNumber,
    /// Publish time (unix seconds, 0 when the feed omits it)
    pub publish_time: i64,
    /// Transfer locator (magnet link or `.torrent` URL)
    pub locator: String,
}

/// Feed item preview returned by a feed search
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EpisodePreview {
    /// Item title
    pub title: String,
    /// Episode parsed from the title
    pub episode: EpisodeNumber,
    /// Publish time (unix seconds)
    pub publish_time: i64,
}

impl From<FeedItem> for EpisodePreview {
    fn from(item: FeedItem) -> Self {
        Self {
            title: item.title,
            episode: item.episode,
            publish_time: item.publish_time,
        }
    }
}

/// Outcome of resolving a transfer locator
///
/// Exactly one of `staged_file` and `magnet` is set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedTransfer {
    /// BitTorrent info-hash (lowercase hex)
    pub content_hash: String,
    /// Downloaded `.torrent` file
    pub staged_file: Option<PathBuf>,
    /// Magnet link
    pub magnet: Option<String>,
}

/// Per-task state inside one delivery pipeline run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    /// Claimed, not yet submitted
    Queued,
    /// Accepted by the torrent engine
    Submitted,
    /// Reported by the engine, not finished
    Downloading,
    /// Finished on the engine
    Downloaded,
    /// Being copied into the library
    Copying,
    /// Copied into the library
    Copied,
    /// Failed for this cycle
    Failed,
}

impl DeliveryState {
    /// Whether this state counts as a successful delivery
    pub fn is_success(&self) -> bool {
        matches!(self, DeliveryState::Copied)
    }
}

/// Event emitted during library operations and update cycles
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Anime added to the library
    AnimeAdded {
        /// Anime id
        id: AnimeId,
        /// Series name
        name: String,
        /// Season number
        season: u32,
    },

    /// Anime settings changed
    AnimeChanged {
        /// Anime id
        id: AnimeId,
    },

    /// Anime removed from the library
    AnimeDeleted {
        /// Anime id
        id: AnimeId,
    },

    /// Update cycle started
    CycleStarted {
        /// Whether only auto-update anime are considered
        auto_update_only: bool,
    },

    /// Planner queued new episode tasks
    TasksPlanned {
        /// Number of anime that produced tasks
        anime_count: usize,
        /// Number of tasks inserted
        task_count: usize,
    },

    /// Older queued tasks were superseded by newer ones for the same episode
    TasksSuperseded {
        /// Superseded task ids
        ids: Vec<TaskId>,
    },

    /// Delivery pipeline started
    DeliveryStarted {
        /// Task ids in the batch
        ids: Vec<TaskId>,
    },

    /// Torrent engine did not accept the batch
    SubmissionFailed {
        /// Error message
        error: String,
    },

    /// Transfer finished on the torrent engine
    TaskDownloaded {
        /// Task id
        id: TaskId,
    },

    /// Episode copied into the library
    TaskCopied {
        /// Task id
        id: TaskId,
        /// Final library path
        path: PathBuf,
    },

    /// Delivery timeout reached, reconciling partial results
    DeliveryTimedOut {
        /// Tasks not copied in time
        pending: Vec<TaskId>,
    },

    /// Task outcome written back
    TaskFinalized {
        /// Task id
        id: TaskId,
        /// Whether delivery succeeded
        succeeded: bool,
    },

    /// Update cycle finished
    CycleFinished {
        /// Number of delivered episodes
        succeeded: usize,
        /// Number of failed tasks
        failed: usize,
    },

    /// Media server refresh failed (not rolled back)
    LibraryRefreshFailed {
        /// Error message
        error: String,
    },

    /// Orchestrator is shutting down
    Shutdown,
}
