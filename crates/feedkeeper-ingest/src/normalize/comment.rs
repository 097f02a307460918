use crate::error::{IngestError, Result};
use crate::normalize::fields;
use crate::normalize::CommentRow;
use chrono::{DateTime, Utc};
use serde_json::Value;

const KIND: &str = "comment";

/// Normalize a comment or reply.
///
/// `post_id` and `parent_comment_id` come from the collection the comment
/// was fetched from and take precedence over whatever the payload says.
pub fn normalize_comment(
    value: &Value,
    post_id: Option<i64>,
    parent_comment_id: Option<i64>,
    fetched_at: DateTime<Utc>,
) -> Result<CommentRow> {
    let obj = fields::as_object(value, KIND)?;
    let id = fields::require_id(obj, KIND)?;

    let post_id = post_id
        .or_else(|| fields::id(obj, &["post_id", "parent_id"]))
        .ok_or_else(|| IngestError::normalization(KIND, format!("comment {} has no post id", id)))?;

    Ok(CommentRow {
        id,
        post_id,
        parent_comment_id: parent_comment_id.or_else(|| fields::id(obj, &["parent_comment_id"])),
        created_time: fields::timestamp(obj, &["created_time", "created_at"]),
        text: fields::string(obj, &["text", "message"]),
        text_lang: fields::string(obj, &["text_lang", "lang"]),
        tagged: fields::tagged_text(obj),
        reactions: fields::reactions(obj),
        replies_count: fields::integer(obj, &["replies_count", "comments_count"]),
        owner: fields::owner(obj),
        fetched_at,
    })
}
