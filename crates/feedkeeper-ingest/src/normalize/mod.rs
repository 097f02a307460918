//! Record normalization
//!
//! Maps tagged raw API payloads ([`RawRecord`]) onto the fixed row shapes of
//! the destination tables. Every function here is pure: the same record and
//! `fetched_at` always give the same row.
//!
//! Missing optional data never fails a record. Reactions default to 0,
//! arrays to empty, scalars and unparseable timestamps to `None`. Only input
//! that cannot be identified (not an object, no usable `id`, a comment with
//! no post) is rejected with [`IngestError::Normalization`].
//!
//! [`IngestError::Normalization`]: crate::error::IngestError::Normalization

mod comment;
pub(crate) mod fields;
mod post;
mod profile;
mod search;

use crate::error::Result;
use crate::framework::types::RawRecord;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;

pub use comment::normalize_comment;
pub use post::normalize_post;
pub use profile::normalize_profile;
pub use search::normalize_search;

/// Destination tables written by the pipeline
pub const TABLE_POSTS: &str = "posts";
pub const TABLE_COMMENTS: &str = "comments";
pub const TABLE_PROFILES: &str = "profiles";
pub const TABLE_SEARCHES: &str = "searches";
pub const TABLE_CONNECTIONS: &str = "connections";

pub const DATA_TABLES: [&str; 5] = [
    TABLE_POSTS,
    TABLE_COMMENTS,
    TABLE_PROFILES,
    TABLE_SEARCHES,
    TABLE_CONNECTIONS,
];

/// Normalize one raw record into its row.
pub fn normalize(record: &RawRecord, fetched_at: DateTime<Utc>) -> Result<Row> {
    match record {
        RawRecord::Post(value) => normalize_post(value, fetched_at).map(Row::Post),
        RawRecord::Comment {
            value,
            post_id,
            parent_comment_id,
        } => normalize_comment(value, *post_id, *parent_comment_id, fetched_at).map(Row::Comment),
        RawRecord::Profile(value) => normalize_profile(value, fetched_at).map(Row::Profile),
        RawRecord::Search { value, query } => {
            normalize_search(value, query, fetched_at).map(Row::Search)
        },
    }
}

/// A normalized row, one variant per destination table
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "table", rename_all = "lowercase")]
pub enum Row {
    Post(PostRow),
    Comment(CommentRow),
    Profile(ProfileRow),
    Search(SearchRow),
}

impl Row {
    pub fn table(&self) -> &'static str {
        match self {
            Row::Post(_) => TABLE_POSTS,
            Row::Comment(_) => TABLE_COMMENTS,
            Row::Profile(_) => TABLE_PROFILES,
            Row::Search(_) => TABLE_SEARCHES,
        }
    }

    /// Primary key rendered as text, for logs and the ledger
    pub fn key(&self) -> String {
        match self {
            Row::Post(row) => row.id.to_string(),
            Row::Comment(row) => row.id.to_string(),
            Row::Profile(row) => row.id.to_string(),
            Row::Search(row) => row.id.clone(),
        }
    }
}

/// Reaction counts per type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Reactions {
    pub total: i64,
    pub like: i64,
    pub love: i64,
    pub haha: i64,
    pub wow: i64,
    pub sad: i64,
    pub angry: i64,
    pub care: i64,
}

/// Hashtags and mentions extracted from a text, each ordered by offset.
///
/// `tagged_user_ids[i]` and `tagged_user_names[i]` describe the same mention.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaggedText {
    pub tags: Vec<String>,
    pub tagged_user_ids: Vec<i64>,
    pub tagged_user_names: Vec<String>,
}

/// Author as seen at fetch time
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OwnerSnapshot {
    pub id: Option<i64>,
    pub username: Option<String>,
    pub full_name: Option<String>,
}

/// The single attachment shape of a post
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Attachment {
    #[default]
    None,
    Link {
        url: Option<String>,
        preview_url: Option<String>,
    },
    Video {
        url: Option<String>,
        preview_url: Option<String>,
    },
    Image {
        url: Option<String>,
        preview_url: Option<String>,
    },
    Media {
        ids: Vec<i64>,
        preview_urls: Vec<String>,
        preview_contents: Vec<String>,
    },
}

/// Flat attachment columns; at most one shape is non-null
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AttachmentColumns {
    pub attachment_type: Option<&'static str>,
    pub link_url: Option<String>,
    pub link_preview_url: Option<String>,
    pub video_url: Option<String>,
    pub video_preview_url: Option<String>,
    pub image_url: Option<String>,
    pub image_preview_url: Option<String>,
    pub medias_id: Option<Vec<i64>>,
    pub medias_preview_url: Option<Vec<String>>,
    pub medias_preview_content: Option<Vec<String>>,
}

impl Attachment {
    pub fn type_name(&self) -> Option<&'static str> {
        match self {
            Attachment::None => None,
            Attachment::Link { .. } => Some("link"),
            Attachment::Video { .. } => Some("video"),
            Attachment::Image { .. } => Some("image"),
            Attachment::Media { .. } => Some("media"),
        }
    }

    pub fn columns(&self) -> AttachmentColumns {
        let mut cols = AttachmentColumns {
            attachment_type: self.type_name(),
            ..Default::default()
        };
        match self.clone() {
            Attachment::None => {},
            Attachment::Link { url, preview_url } => {
                cols.link_url = url;
                cols.link_preview_url = preview_url;
            },
            Attachment::Video { url, preview_url } => {
                cols.video_url = url;
                cols.video_preview_url = preview_url;
            },
            Attachment::Image { url, preview_url } => {
                cols.image_url = url;
                cols.image_preview_url = preview_url;
            },
            Attachment::Media {
                ids,
                preview_urls,
                preview_contents,
            } => {
                cols.medias_id = Some(ids);
                cols.medias_preview_url = Some(preview_urls);
                cols.medias_preview_content = Some(preview_contents);
            },
        }
        cols
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PostRow {
    pub id: i64,
    pub created_time: Option<DateTime<Utc>>,
    pub text: Option<String>,
    pub text_lang: Option<String>,
    pub tagged: TaggedText,
    pub attachment: Attachment,
    pub attached_post_id: Option<i64>,
    pub reactions: Reactions,
    pub comments_count: Option<i64>,
    pub shares_count: Option<i64>,
    pub owner: OwnerSnapshot,
    pub group_id: Option<i64>,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommentRow {
    pub id: i64,
    pub post_id: i64,
    pub parent_comment_id: Option<i64>,
    pub created_time: Option<DateTime<Utc>>,
    pub text: Option<String>,
    pub text_lang: Option<String>,
    pub tagged: TaggedText,
    pub reactions: Reactions,
    pub replies_count: Option<i64>,
    pub owner: OwnerSnapshot,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProfileRow {
    pub id: i64,
    pub username: Option<String>,
    pub full_name: Option<String>,
    pub profile_type: Option<String>,
    pub biography: Option<String>,
    pub profile_url: Option<String>,
    pub avatar_url: Option<String>,
    pub is_verified: Option<bool>,
    pub categories: Vec<String>,
    pub workplaces: Vec<String>,
    pub education: Vec<String>,
    pub languages: Vec<String>,
    pub current_city: Vec<String>,
    pub hometown: Vec<String>,
    pub likes_count: Option<i64>,
    pub friends_count: Option<i64>,
    pub followers_count: Option<i64>,
    pub members_count: Option<i64>,
    pub last_post_created_time: Option<DateTime<Utc>>,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchRow {
    pub id: String,
    pub request: String,
    pub search_type: String,
    pub location_id: Option<i64>,
    pub author_id: Option<i64>,
    pub from_date: Option<NaiveDateTime>,
    pub to_date: Option<NaiveDateTime>,
    pub fetched_at: DateTime<Utc>,
}
