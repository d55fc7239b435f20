//! Common test utilities for autoanime integration tests

#![allow(dead_code)]

use std::path::Path;
use std::time::Duration;
use autoanime::Config;
use autoanime::config::RetryConfig;

/// Single-file torrent; the SHA-1 of its `info` dictionary is [`TORRENT_HASH`]
pub const TORRENT: &[u8] = b"d8:announce31:http://tracker.example/announce4:infod6:lengthi1024e4:name8:ep01.mkv12:piece lengthi16384e6:pieces20:aaaaaaaaaaaaaaaaaaaaee";

/// Info-hash of [`TORRENT`]
pub const TORRENT_HASH: &str = "79f645dde14a265f048a68e7d59aee2c522dc32d";

/// Config rooted in `dir` talking to the mock server at `server_uri`
///
/// The scheduler is off and polling is fast so a cycle finishes quickly.
pub fn test_config(dir: &Path, server_uri: &str) -> Config {
    let mut config = Config::default();
    config.persistence.database_path = dir.join("autoanime.db");
    config.library.base_path = dir.join("library");
    config.library.staging_dir = dir.join("staging");
    config.update.run_scheduler = false;
    config.update.poll_interval = Duration::from_millis(10);
    config.update.delivery_timeout = Duration::from_secs(5);
    config.torrent_engine.url = server_uri.to_string();
    config.torrent_engine.username = "admin".to_string();
    config.torrent_engine.password = "adminadmin".to_string();
    config.media_server.url = Some(server_uri.to_string());
    config.media_server.api_key = Some("jellyfin-key".to_string());
    config.retry = RetryConfig {
        max_attempts: 1,
        initial_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(10),
        backoff_multiplier: 2.0,
        jitter: false,
    };
    config
}

/// One `<item>` of an RSS 2.0 feed
pub struct RssItem<'a> {
    pub title: &'a str,
    pub pub_date: &'a str,
    pub link: &'a str,
    pub enclosure: Option<&'a str>,
}

/// Render an RSS 2.0 document
pub fn rss_feed(items: &[RssItem<'_>]) -> String {
    let mut body = String::from(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Releases</title>
    <link>https://releases.test/</link>
    <description>Test feed</description>
"#,
    );
    for item in items {
        body.push_str("    <item>\n");
        body.push_str(&format!("      <title>{}</title>\n", item.title));
        body.push_str(&format!("      <link>{}</link>\n", item.link));
        body.push_str(&format!("      <pubDate>{}</pubDate>\n", item.pub_date));
        if let Some(url) = item.enclosure {
            body.push_str(&format!(
                "      <enclosure url=\"{}\" length=\"1024\" type=\"application/x-bittorrent\"/>\n",
                url
            ));
        }
        body.push_str("    </item>\n");
    }
    body.push_str("  </channel>\n</rss>\n");
    body
}
