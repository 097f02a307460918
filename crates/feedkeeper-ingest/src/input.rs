//! Target list input
//!
//! Targets arrive one per line from a file or stdin (`-`). Blank lines and
//! `#` comments are ignored and duplicates dropped, keeping first-seen
//! order. Facebook URLs are reduced to the post id or profile id/username
//! they point at.

use crate::error::{IngestError, Result};
use crate::framework::types::{Resource, SearchQuery, SearchType};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use std::collections::HashSet;
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

/// Path segments that never name a profile
const RESERVED_SEGMENTS: &[&str] = &[
    "groups",
    "pages",
    "people",
    "watch",
    "photo",
    "photo.php",
    "photos",
    "posts",
    "permalink.php",
    "story.php",
    "profile.php",
    "videos",
    "events",
    "hashtag",
    "search",
];

/// What the lines of an input name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    Post,
    Profile,
}

/// Read the whole input: a file path, or `-` for stdin
pub async fn read_source(source: &str) -> Result<String> {
    if source == "-" {
        let mut text = String::new();
        tokio::io::stdin().read_to_string(&mut text).await?;
        Ok(text)
    } else {
        tokio::fs::read_to_string(source)
            .await
            .map_err(|e| IngestError::input(format!("cannot read '{}': {}", source, e)))
    }
}

/// Meaningful lines of an input, trimmed, in first-seen order without
/// duplicates
pub fn parse_lines(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter(|line| seen.insert(line.to_string()))
        .map(str::to_string)
        .collect()
}

/// Turn input lines into post or profile targets.
///
/// Lines that do not name a usable identifier are logged and skipped; an
/// input with no usable line at all is an error.
pub fn identifier_targets(lines: &[String], kind: InputKind) -> Result<Vec<Resource>> {
    let mut seen = HashSet::new();
    let mut targets = Vec::new();

    for line in lines {
        let id = match identifier(line, kind) {
            Ok(id) => id,
            Err(e) => {
                warn!(line = %line, error = %e, "Skipping input line");
                continue;
            },
        };
        if !seen.insert(id.clone()) {
            debug!(line = %line, id = %id, "Duplicate target");
            continue;
        }
        targets.push(match kind {
            InputKind::Post => Resource::Post(id),
            InputKind::Profile => Resource::Profile(id),
        });
    }

    if targets.is_empty() {
        return Err(IngestError::input("no targets in input"));
    }
    Ok(targets)
}

/// Turn input lines into search targets sharing one type and date window.
/// Requests differing only in case are the same search.
pub fn search_targets(
    lines: &[String],
    search_type: SearchType,
    from_date: Option<NaiveDateTime>,
    to_date: Option<NaiveDateTime>,
) -> Result<Vec<Resource>> {
    let mut seen = HashSet::new();
    let targets: Vec<Resource> = lines
        .iter()
        .filter(|request| seen.insert(request.to_lowercase()))
        .map(|request| {
            Resource::Search(SearchQuery {
                request: request.clone(),
                search_type,
                from_date,
                to_date,
            })
        })
        .collect();

    if targets.is_empty() {
        return Err(IngestError::input("no search requests in input"));
    }
    Ok(targets)
}

/// Reduce one input line to a bare identifier
pub fn identifier(line: &str, kind: InputKind) -> Result<String> {
    let line = line.trim();
    let id = if looks_like_url(line) {
        from_url(line, kind)?
    } else {
        line.to_string()
    };

    // Post ids are canonical i64 text: "0123" and "123" are one ledger key
    let normalized = match kind {
        InputKind::Post if !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()) => {
            id.parse::<i64>().ok().map(|n| n.to_string())
        },
        InputKind::Post => None,
        InputKind::Profile => {
            let valid =
                !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-');
            valid.then_some(id)
        },
    };

    normalized.ok_or_else(|| {
        let expected = match kind {
            InputKind::Post => "a numeric post id or post URL",
            InputKind::Profile => "a profile id, username or profile URL",
        };
        IngestError::input(format!("'{}' is not {}", line, expected))
    })
}

fn looks_like_url(line: &str) -> bool {
    line.starts_with("http://") || line.starts_with("https://") || line.contains("facebook.com/")
}

fn from_url(line: &str, kind: InputKind) -> Result<String> {
    let with_scheme = if line.starts_with("http://") || line.starts_with("https://") {
        line.to_string()
    } else {
        format!("https://{}", line)
    };
    let url = url::Url::parse(&with_scheme)
        .map_err(|e| IngestError::input(format!("invalid URL '{}': {}", line, e)))?;

    let query = |key: &str| {
        url.query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    };
    let segments: Vec<&str> = url
        .path_segments()
        .map(|s| s.filter(|seg| !seg.is_empty()).collect())
        .unwrap_or_default();

    let found = match kind {
        InputKind::Post => query("story_fbid")
            .or_else(|| query("fbid"))
            .or_else(|| query("v"))
            .or_else(|| {
                segments
                    .windows(2)
                    .find(|w| matches!(w[0], "posts" | "permalink" | "videos" | "photos"))
                    .map(|w| w[1].to_string())
            }),
        InputKind::Profile => match segments.as_slice() {
            ["profile.php", ..] => query("id"),
            ["groups", group, ..] | ["pages", _, group, ..] => Some(group.to_string()),
            ["people", _, id, ..] => Some(id.to_string()),
            [name, ..] if !RESERVED_SEGMENTS.contains(name) => Some(name.to_string()),
            _ => None,
        },
    };

    found.ok_or_else(|| IngestError::input(format!("cannot find an identifier in '{}'", line)))
}

/// Parse a date filter: `YYYY-MM-DD`, `YYYY-MM-DDTHH:MM:SS` or RFC 3339
/// (converted to UTC).
pub fn parse_date(value: &str) -> std::result::Result<NaiveDateTime, String> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.naive_utc());
    }
    for format in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
            return Ok(dt);
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| format!("invalid date '{}', expected YYYY-MM-DD or YYYY-MM-DDTHH:MM:SS", value))
}
