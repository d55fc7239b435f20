//! Episode number extraction from release titles.

use crate::types::EpisodeNumber;
use regex::Regex;
use std::sync::LazyLock;

// Batch releases ("[01-12]", "01~13 Fin") never name a single episode.
static RANGE_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| compile(r"(?:^|[\[【\s第])\d{1,3}\s?[-~～]\s?\d{1,3}(?:$|[\]】\s话話集])"));

static EPISODE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // 第12话 / 第12話 / 第12集
        r"第\s*(\d{1,4})\s*[话話集]",
        // [12] / [12v2] / 【12】 / [12 END]
        r"[\[【](\d{1,3})(?:v\d+)?(?:\s?END)?[\]】]",
        // "Title - 12 [1080p]"
        r"\s-\s(\d{1,3})(?:v\d+)?(?:[\s\[(【.]|$)",
        // EP12 / E12 / S01E12
        r"(?i)(?:\bEP?|S\d{1,2}E)(\d{1,3})(?:v\d+)?\b",
    ]
    .into_iter()
    .filter_map(compile)
    .collect()
});

fn compile(pattern: &str) -> Option<Regex> {
    Regex::new(pattern)
        .map_err(|e| tracing::error!(pattern, error = %e, "Invalid episode pattern"))
        .ok()
}

/// Extract the episode number from a release title
///
/// Returns [`EpisodeNumber::Unknown`] for batches and for titles none of the
/// known naming conventions match.
pub fn parse_episode_number(title: &str) -> EpisodeNumber {
    if RANGE_PATTERN
        .as_ref()
        .is_some_and(|range| range.is_match(title))
    {
        return EpisodeNumber::Unknown;
    }

    EPISODE_PATTERNS
        .iter()
        .find_map(|pattern| {
            pattern
                .captures(title)
                .and_then(|caps| caps.get(1))
                .and_then(|m| m.as_str().parse::<u32>().ok())
        })
        .map_or(EpisodeNumber::Unknown, EpisodeNumber::Known)
}
