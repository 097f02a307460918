//! Tolerant field accessors over raw JSON payloads

use crate::error::{IngestError, Result};
use crate::normalize::{OwnerSnapshot, Reactions, TaggedText};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::{Map, Value};
use tracing::debug;

pub(crate) type Object = Map<String, Value>;

pub(crate) fn as_object<'a>(value: &'a Value, kind: &'static str) -> Result<&'a Object> {
    value
        .as_object()
        .ok_or_else(|| IngestError::normalization(kind, format!("expected a JSON object, got {}", type_name(value))))
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// First key that is present and not null
pub(crate) fn first<'a>(obj: &'a Object, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .find(|v| !v.is_null())
}

/// Ids arrive as numbers or numeric strings
pub(crate) fn parse_id(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub(crate) fn require_id(obj: &Object, kind: &'static str) -> Result<i64> {
    match obj.get("id") {
        None | Some(Value::Null) => Err(IngestError::normalization(kind, "missing id")),
        Some(raw) => parse_id(raw)
            .ok_or_else(|| IngestError::normalization(kind, format!("invalid id {}", raw))),
    }
}

pub(crate) fn id(obj: &Object, keys: &[&str]) -> Option<i64> {
    first(obj, keys).and_then(parse_id)
}

/// Non-empty string
pub(crate) fn string(obj: &Object, keys: &[&str]) -> Option<String> {
    match first(obj, keys)? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub(crate) fn integer(obj: &Object, keys: &[&str]) -> Option<i64> {
    match first(obj, keys)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub(crate) fn boolean(obj: &Object, keys: &[&str]) -> Option<bool> {
    match first(obj, keys)? {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_i64().map(|n| n != 0),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Parse a timestamp: RFC 3339, naive ISO 8601 (taken as UTC), a bare date,
/// or unix seconds. Anything else yields `None`.
pub(crate) fn timestamp(obj: &Object, keys: &[&str]) -> Option<DateTime<Utc>> {
    let raw = first(obj, keys)?;
    let parsed = match raw {
        Value::String(s) => parse_timestamp_str(s.trim()),
        Value::Number(n) => n.as_i64().and_then(|secs| DateTime::from_timestamp(secs, 0)),
        _ => None,
    };
    if parsed.is_none() {
        debug!(field = keys.first().copied().unwrap_or_default(), raw = %raw, "Unparseable timestamp");
    }
    parsed
}

pub(crate) fn parse_timestamp_str(s: &str) -> Option<DateTime<Utc>> {
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%z") {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Array of display strings.
///
/// Elements may be strings or objects carrying `name`/`title`/`text`; a
/// single string is treated as a one-element list.
pub(crate) fn string_list(obj: &Object, keys: &[&str]) -> Vec<String> {
    match first(obj, keys) {
        Some(Value::Array(items)) => items.iter().filter_map(display_string).collect(),
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.clone()],
        Some(other @ Value::Object(_)) => display_string(other).into_iter().collect(),
        _ => Vec::new(),
    }
}

fn display_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Object(obj) => string(obj, &["name", "title", "text"]),
        _ => None,
    }
}

pub(crate) fn id_list(obj: &Object, keys: &[&str]) -> Vec<i64> {
    match first(obj, keys) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::Object(inner) => id(inner, &["id"]),
                other => parse_id(other),
            })
            .collect(),
        _ => Vec::new(),
    }
}

/// Owner snapshot from flat `owner_*` fields, falling back to a nested
/// `owner` object.
pub(crate) fn owner(obj: &Object) -> OwnerSnapshot {
    let nested = obj.get("owner").and_then(Value::as_object);
    let from_nested = |keys: &[&str]| nested.and_then(|o| string(o, keys));

    OwnerSnapshot {
        id: id(obj, &["owner_id"]).or_else(|| nested.and_then(|o| id(o, &["id"]))),
        username: string(obj, &["owner_username"]).or_else(|| from_nested(&["username"])),
        full_name: string(obj, &["owner_full_name"]).or_else(|| from_nested(&["full_name", "name"])),
    }
}

const REACTION_TYPES: [&str; 7] = ["like", "love", "haha", "wow", "sad", "angry", "care"];

/// Reaction counts from a nested `reactions` object or flat
/// `reactions_<type>_count` fields. The total is the sum when not given.
pub(crate) fn reactions(obj: &Object) -> Reactions {
    let nested = obj.get("reactions").and_then(Value::as_object);
    let count = |kind: &str| -> i64 {
        let flat = [format!("reactions_{}_count", kind), format!("{}_count", kind)];
        let flat_keys: Vec<&str> = flat.iter().map(String::as_str).collect();
        nested
            .and_then(|n| integer(n, &[kind]))
            .or_else(|| integer(obj, &flat_keys))
            .unwrap_or(0)
            .max(0)
    };

    let counts: Vec<i64> = REACTION_TYPES.iter().map(|k| count(*k)).collect();
    let total = nested
        .and_then(|n| integer(n, &["total"]))
        .or_else(|| integer(obj, &["reactions_total_count", "reactions_count"]))
        .unwrap_or_else(|| counts.iter().sum());

    Reactions {
        total: total.max(0),
        like: counts[0],
        love: counts[1],
        haha: counts[2],
        wow: counts[3],
        sad: counts[4],
        angry: counts[5],
        care: counts[6],
    }
}

struct Mention {
    id: i64,
    name: String,
    offset: Option<u64>,
}

fn offset_of(obj: &Object) -> Option<u64> {
    integer(obj, &["offset", "start", "position"]).and_then(|o| u64::try_from(o).ok())
}

/// Hashtags and tagged users, each sorted by their offset in the text so
/// the id and name arrays stay positionally aligned.
///
/// Plain arrays are taken in the order given; entity objects
/// (`{"tag": .., "offset": ..}`, `{"id": .., "name": .., "offset": ..}`) are
/// reordered by offset, entries without one keeping their relative order
/// at the end.
pub(crate) fn tagged_text(obj: &Object) -> TaggedText {
    let mut tags: Vec<(Option<u64>, String)> = match first(obj, &["text_tags", "hashtags"]) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::Object(tag) => string(tag, &["tag", "name", "text"]).map(|t| (offset_of(tag), t)),
                other => display_string(other).map(|t| (None, t)),
            })
            .collect(),
        _ => Vec::new(),
    };
    tags.sort_by_key(|(offset, _)| offset.unwrap_or(u64::MAX));

    let names: Vec<Option<String>> = match first(obj, &["text_tagged_user_names"]) {
        Some(Value::Array(items)) => items.iter().map(display_string).collect(),
        _ => Vec::new(),
    };

    let mut mentions: Vec<Mention> = match first(obj, &["text_tagged_users", "mentions"]) {
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .filter_map(|(i, item)| match item {
                Value::Object(user) => id(user, &["id", "user_id"]).map(|uid| Mention {
                    id: uid,
                    name: string(user, &["name", "full_name", "username"])
                        .or_else(|| names.get(i).cloned().flatten())
                        .unwrap_or_default(),
                    offset: offset_of(user),
                }),
                other => parse_id(other).map(|uid| Mention {
                    id: uid,
                    name: names.get(i).cloned().flatten().unwrap_or_default(),
                    offset: None,
                }),
            })
            .collect(),
        _ => Vec::new(),
    };
    mentions.sort_by_key(|m| m.offset.unwrap_or(u64::MAX));

    TaggedText {
        tags: tags.into_iter().map(|(_, t)| t).collect(),
        tagged_user_ids: mentions.iter().map(|m| m.id).collect(),
        tagged_user_names: mentions.into_iter().map(|m| m.name).collect(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn obj(value: Value) -> Object {
        value.as_object().unwrap().clone()
    }

    #[test]
    fn test_ids_accept_strings_and_numbers() {
        let o = obj(json!({"a": "123", "b": 456, "c": "x1", "d": null}));
        assert_eq!(id(&o, &["a"]), Some(123));
        assert_eq!(id(&o, &["b"]), Some(456));
        assert_eq!(id(&o, &["c"]), None);
        assert_eq!(id(&o, &["d", "b"]), Some(456));
    }

    #[test]
    fn test_require_id_reports_problem() {
        let err = require_id(&obj(json!({"text": "hi"})), "post").unwrap_err();
        assert!(err.to_string().contains("missing id"));
        let err = require_id(&obj(json!({"id": "abc"})), "post").unwrap_err();
        assert!(err.to_string().contains("invalid id"));
    }

    #[test]
    fn test_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2021, 1, 1, 2, 16, 32).unwrap();
        for raw in [
            json!("2021-01-01T02:16:32Z"),
            json!("2021-01-01T02:16:32+00:00"),
            json!("2021-01-01T02:16:32"),
            json!("2021-01-01 02:16:32"),
            json!(1609467392),
        ] {
            let o = obj(json!({ "t": raw }));
            assert_eq!(timestamp(&o, &["t"]), Some(expected), "input {:?}", raw);
        }
        assert_eq!(timestamp(&obj(json!({"t": "yesterday"})), &["t"]), None);
        assert_eq!(timestamp(&obj(json!({"t": ""})), &["t"]), None);
    }

    #[test]
    fn test_string_list_shapes() {
        let o = obj(json!({
            "plain": ["Acme", "", "Globex"],
            "objects": [{"name": "MIT"}, {"title": "Stanford"}, {"id": 1}],
            "single": "Berlin",
        }));
        assert_eq!(string_list(&o, &["plain"]), vec!["Acme", "Globex"]);
        assert_eq!(string_list(&o, &["objects"]), vec!["MIT", "Stanford"]);
        assert_eq!(string_list(&o, &["single"]), vec!["Berlin"]);
        assert!(string_list(&o, &["missing"]).is_empty());
    }

    #[test]
    fn test_owner_flat_and_nested() {
        let flat = owner(&obj(json!({"owner_id": "7", "owner_username": "ann"})));
        assert_eq!(flat.id, Some(7));
        assert_eq!(flat.username.as_deref(), Some("ann"));
        assert_eq!(flat.full_name, None);

        let nested = owner(&obj(json!({"owner": {"id": 8, "username": "bob", "name": "Bob B"}})));
        assert_eq!(nested.id, Some(8));
        assert_eq!(nested.full_name.as_deref(), Some("Bob B"));
    }

    #[test]
    fn test_reactions_default_and_sum() {
        let none = reactions(&obj(json!({})));
        assert_eq!(none, Reactions::default());

        let flat = reactions(&obj(json!({"reactions_like_count": 3, "reactions_love_count": "2"})));
        assert_eq!(flat.like, 3);
        assert_eq!(flat.love, 2);
        assert_eq!(flat.total, 5);

        let nested = reactions(&obj(json!({"reactions": {"haha": 1, "total": 10}})));
        assert_eq!(nested.haha, 1);
        assert_eq!(nested.total, 10);
    }

    #[test]
    fn test_tagged_text_aligns_by_offset() {
        let tagged = tagged_text(&obj(json!({
            "text_tags": [
                {"tag": "#late", "offset": 40},
                {"tag": "#early", "offset": 2},
            ],
            "text_tagged_users": [
                {"id": "200", "name": "Second", "offset": 30},
                {"id": 100, "name": "First", "offset": 5},
                {"name": "No id", "offset": 1},
            ],
        })));
        assert_eq!(tagged.tags, vec!["#early", "#late"]);
        assert_eq!(tagged.tagged_user_ids, vec![100, 200]);
        assert_eq!(tagged.tagged_user_names, vec!["First", "Second"]);
    }

    #[test]
    fn test_tagged_text_plain_arrays_keep_order() {
        let tagged = tagged_text(&obj(json!({
            "text_tags": ["a", "b"],
            "text_tagged_users": ["11", "bogus", 12],
            "text_tagged_user_names": ["Eleven", "Bogus", "Twelve"],
        })));
        assert_eq!(tagged.tags, vec!["a", "b"]);
        assert_eq!(tagged.tagged_user_ids, vec![11, 12]);
        assert_eq!(tagged.tagged_user_names, vec!["Eleven", "Twelve"]);
    }
}
