//! RSS 2.0 and Atom parsing into [`FeedItem`]s.

use super::episode::parse_episode_number;
use crate::error::{Error, Result};
use crate::types::FeedItem;
use tracing::{debug, warn};

/// Parse feed content as RSS, falling back to Atom
///
/// Items without any usable locator are dropped.
pub fn parse_feed(content: &str) -> Result<Vec<FeedItem>> {
    match parse_as_rss(content) {
        Ok(items) => {
            debug!("Parsed feed as RSS, found {} items", items.len());
            Ok(items)
        }
        Err(rss_err) => {
            debug!("Failed to parse as RSS: {}, trying Atom", rss_err);
            parse_as_atom(content).map_err(|atom_err| {
                Error::Feed(format!(
                    "Failed to parse feed as RSS or Atom. RSS error: {}. Atom error: {}",
                    rss_err, atom_err
                ))
            })
        }
    }
}

fn parse_as_rss(content: &str) -> Result<Vec<FeedItem>> {
    let channel = content
        .parse::<rss::Channel>()
        .map_err(|e| Error::Feed(format!("RSS parse error: {}", e)))?;

    let items = channel
        .items()
        .iter()
        .filter_map(|item| {
            let title = item.title().unwrap_or("").trim().to_string();

            // Enclosure first, then any magnet the item carries, then the plain link.
            let locator = item
                .enclosure()
                .map(|enc| enc.url().to_string())
                .filter(|url| !url.is_empty())
                .or_else(|| {
                    [item.link(), item.guid().map(|g| g.value())]
                        .into_iter()
                        .flatten()
                        .find(|candidate| candidate.starts_with("magnet:"))
                        .map(str::to_string)
                })
                .or_else(|| item.link().map(str::to_string));

            let Some(locator) = locator else {
                warn!(title = %title, "Feed item has no transfer locator, skipping");
                return None;
            };

            let publish_time = item
                .pub_date()
                .and_then(|date| chrono::DateTime::parse_from_rfc2822(date.trim()).ok())
                .map_or(0, |dt| dt.timestamp());

            Some(FeedItem {
                episode: parse_episode_number(&title),
                title,
                publish_time,
                locator,
            })
        })
        .collect();

    Ok(items)
}

fn parse_as_atom(content: &str) -> Result<Vec<FeedItem>> {
    let feed = atom_syndication::Feed::read_from(content.as_bytes())
        .map_err(|e| Error::Feed(format!("Atom parse error: {}", e)))?;

    let items = feed
        .entries()
        .iter()
        .filter_map(|entry| {
            let title = entry.title().as_str().trim().to_string();
            let links = entry.links();

            let locator = links
                .iter()
                .find(|link| link.rel() == "enclosure")
                .or_else(|| links.iter().find(|link| link.href().starts_with("magnet:")))
                .or_else(|| links.first())
                .map(|link| link.href().to_string());

            let Some(locator) = locator else {
                warn!(title = %title, "Feed entry has no transfer locator, skipping");
                return None;
            };

            let publish_time = entry
                .published()
                .copied()
                .unwrap_or_else(|| *entry.updated())
                .timestamp();

            Some(FeedItem {
                episode: parse_episode_number(&title),
                title,
                publish_time,
                locator,
            })
        })
        .collect();

    Ok(items)
}
