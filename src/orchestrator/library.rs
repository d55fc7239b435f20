//! Anime registry operations exposed to an API layer.
//!
//! Validation failures and ownership conflicts come back as distinct
//! [`LibraryError`] variants; nothing is written when validation fails.

use crate::db::{AnimeUpdate, NewAnime};
use crate::error::{Error, LibraryError, Result};
use crate::types::{AnimeEntry, AnimeId, AnimeSource, EpisodePreview, EpisodeTask, Event, Subscription};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;

use super::Orchestrator;

/// Request to start tracking an anime
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NewAnimeRequest {
    /// Series name
    pub name: String,
    /// Season number
    pub season: u32,
    /// Feed backend (configured default if None)
    #[serde(default)]
    pub source: Option<AnimeSource>,
    /// Search text for a feed backend
    #[serde(default)]
    pub query_text: Option<String>,
    /// Direct feed URL
    #[serde(default)]
    pub feed_url: Option<String>,
    /// Include in scheduled auto-update cycles
    #[serde(default)]
    pub auto_update: bool,
}

/// Partial change to a tracked anime; `None` leaves a field untouched
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AnimeChange {
    /// New feed backend
    #[serde(default)]
    pub source: Option<AnimeSource>,
    /// New search text
    #[serde(default)]
    pub query_text: Option<String>,
    /// New direct feed URL
    #[serde(default)]
    pub feed_url: Option<String>,
    /// New auto-update flag
    #[serde(default)]
    pub auto_update: Option<bool>,
    /// Replace the set of delivered episodes
    #[serde(default)]
    pub known_episode_numbers: Option<BTreeSet<u32>>,
}

/// Which anime [`Orchestrator::inquire_anime`] returns
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnimeQuery {
    /// Exactly one anime
    Id(AnimeId),
    /// Anime whose name contains the fragment
    Name(String),
    /// Every tracked anime
    All,
}

impl Orchestrator {
    /// Start tracking an anime
    ///
    /// Validation runs in a fixed order: both locators, neither locator,
    /// locator kind vs. source, then duplicate id.
    pub async fn add_anime(&self, request: NewAnimeRequest) -> Result<AnimeEntry> {
        let subscription =
            Subscription::from_parts(request.query_text.as_deref(), request.feed_url.as_deref())?;
        let source = request
            .source
            .unwrap_or(self.config.update.default_source);
        subscription.check_source(source)?;

        let name = request.name.trim();
        if name.is_empty() {
            return Err(Error::validation("Anime name cannot be empty"));
        }

        let id = AnimeId::derive(name, request.season);
        let anime = NewAnime {
            id: id.clone(),
            name: name.to_string(),
            season: request.season,
            storage_directory: self.storage_directory(name, request.season),
            source,
            subscription,
            auto_update: request.auto_update,
        };

        self.db.insert_anime(&anime).await?;

        if let Err(e) = tokio::fs::create_dir_all(&anime.storage_directory).await {
            tracing::warn!(
                anime_id = %id,
                path = %anime.storage_directory.display(),
                error = %e,
                "Failed to create storage directory, it will be created on first delivery"
            );
        }

        tracing::info!(anime_id = %id, name = %anime.name, season = anime.season, "Anime added");
        self.emit_event(Event::AnimeAdded {
            id: id.clone(),
            name: anime.name.clone(),
            season: anime.season,
        });

        self.db
            .get_anime(&id)
            .await?
            .ok_or_else(|| Error::Library(LibraryError::NotFound { id: id.to_string() }))
    }

    /// Change a tracked anime
    ///
    /// The anime is locked for the duration of the change and always released
    /// afterwards, including when the change is rejected.
    pub async fn change_anime(&self, id: &AnimeId, change: AnimeChange) -> Result<AnimeEntry> {
        if !self.db.try_lock_anime(id).await? {
            return Err(Error::Library(LibraryError::Locked { id: id.to_string() }));
        }

        let result = self.apply_change(id, change).await;

        if let Err(e) = self.db.release_anime(std::slice::from_ref(id)).await {
            tracing::error!(anime_id = %id, error = %e, "Failed to release anime after change");
            return Err(e);
        }

        let mut entry = result?;
        entry.locked = false;

        tracing::info!(anime_id = %id, "Anime changed");
        self.emit_event(Event::AnimeChanged { id: id.clone() });
        Ok(entry)
    }

    async fn apply_change(&self, id: &AnimeId, change: AnimeChange) -> Result<AnimeEntry> {
        let current = self
            .db
            .get_anime(id)
            .await?
            .ok_or_else(|| Error::Library(LibraryError::NotFound { id: id.to_string() }))?;

        let query_text = change.query_text.filter(|s| !s.is_empty());
        let feed_url = change.feed_url.filter(|s| !s.is_empty());
        let source = change.source.unwrap_or(current.source);

        let subscription = match (query_text, feed_url) {
            (Some(_), Some(_)) => {
                return Err(Error::validation(
                    "Search text and http url cannot have values at the same time",
                ));
            }
            (Some(text), None) => {
                if !source.requires_query() {
                    return Err(Error::validation(format!(
                        "The selected source {} cannot be passed the search text",
                        source
                    )));
                }
                Some(Subscription::Query(text))
            }
            (None, Some(url)) => {
                if source.requires_query() {
                    return Err(Error::validation(format!(
                        "The selected source {} cannot be passed the http url",
                        source
                    )));
                }
                Some(Subscription::FeedUrl(url))
            }
            (None, None) => None,
        };

        subscription
            .as_ref()
            .unwrap_or(&current.subscription)
            .check_source(source)?;

        let update = AnimeUpdate {
            source: change.source,
            subscription,
            auto_update: change.auto_update,
            known_episode_numbers: change.known_episode_numbers,
        };
        self.db.update_anime(id, &update).await
    }

    /// Look up tracked anime
    pub async fn inquire_anime(&self, query: AnimeQuery) -> Result<Vec<AnimeEntry>> {
        match query {
            AnimeQuery::Id(id) => Ok(self.db.get_anime(&id).await?.into_iter().collect()),
            AnimeQuery::Name(fragment) => self.db.search_anime_by_name(&fragment).await,
            AnimeQuery::All => self.db.list_anime().await,
        }
    }

    /// Stop tracking an anime and drop its episode tasks
    ///
    /// Rejected with [`LibraryError::Locked`] while an update cycle owns it.
    /// Delivered episode files stay in the library.
    pub async fn delete_anime(&self, id: &AnimeId) -> Result<()> {
        let staged_files = self.db.delete_anime(id).await?;
        remove_staged_files(staged_files.iter()).await;

        tracing::info!(anime_id = %id, "Anime deleted");
        self.emit_event(Event::AnimeDeleted { id: id.clone() });
        Ok(())
    }

    /// List episode tasks; `None` disables a filter
    pub async fn inquire_episode_tasks(
        &self,
        filter_by_completed: Option<bool>,
        filter_by_locked: Option<bool>,
    ) -> Result<Vec<EpisodeTask>> {
        self.db
            .list_episode_tasks(filter_by_completed, filter_by_locked)
            .await
    }

    /// Preview what a subscription's feed currently lists
    ///
    /// Applies the same validation as [`Orchestrator::add_anime`] and touches
    /// no state.
    pub async fn search_feed(
        &self,
        source: AnimeSource,
        query_text: Option<&str>,
        feed_url: Option<&str>,
    ) -> Result<Vec<EpisodePreview>> {
        let subscription = Subscription::from_parts(query_text, feed_url)?;
        let url = subscription.feed_url(source)?;

        let items = self.collaborators.feed.fetch(source, &url).await?;
        Ok(items.into_iter().map(EpisodePreview::from).collect())
    }

    fn storage_directory(&self, name: &str, season: u32) -> PathBuf {
        self.config
            .library
            .base_path
            .join(sanitize_dir_name(name))
            .join(format!("Season{}", season))
    }
}

/// Replace characters that are not allowed in directory names
fn sanitize_dir_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}

/// Delete staged `.torrent` files, ignoring ones already gone
pub(crate) async fn remove_staged_files<'a>(paths: impl Iterator<Item = &'a PathBuf>) {
    for path in paths {
        match tokio::fs::remove_file(path).await {
            Ok(()) => tracing::debug!(path = %path.display(), "Removed staged torrent file"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove staged torrent file")
            }
        }
    }
}
