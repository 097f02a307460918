//! Core types shared by the ingestion pipeline

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Format used for date filters on the wire and inside search keys
pub const DATE_FILTER_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Opaque pagination token handed out by the remote API
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cursor(String);

impl Cursor {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Cursor {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// How a search request is ranked by the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SearchType {
    #[default]
    Top,
    Latest,
    Hashtag,
}

impl SearchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchType::Top => "top",
            SearchType::Latest => "latest",
            SearchType::Hashtag => "hashtag",
        }
    }
}

impl fmt::Display for SearchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A saved search descriptor used as a fetch target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub request: String,
    pub search_type: SearchType,
    pub from_date: Option<NaiveDateTime>,
    pub to_date: Option<NaiveDateTime>,
}

impl SearchQuery {
    /// Stable identity of the query: `lower(request)/from/to/type`.
    pub fn key(&self) -> String {
        let fmt_date = |d: &Option<NaiveDateTime>| {
            d.map(|d| d.format(DATE_FILTER_FORMAT).to_string())
                .unwrap_or_default()
        };
        format!(
            "{}/{}/{}/{}",
            self.request.to_lowercase(),
            fmt_date(&self.from_date),
            fmt_date(&self.to_date),
            self.search_type
        )
    }
}

/// A single addressable remote item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resource {
    Post(String),
    Comment(String),
    /// Numeric id or username
    Profile(String),
    Search(SearchQuery),
}

impl Resource {
    pub fn kind(&self) -> &'static str {
        match self {
            Resource::Post(_) => "post",
            Resource::Comment(_) => "comment",
            Resource::Profile(_) => "profile",
            Resource::Search(_) => "search",
        }
    }

    /// Id under which this resource appears in the ledger: the raw id or
    /// username, or the search key
    pub fn ledger_id(&self) -> String {
        match self {
            Resource::Post(id) | Resource::Comment(id) | Resource::Profile(id) => id.clone(),
            Resource::Search(query) => query.key(),
        }
    }

    /// Kind-qualified name used in logs, e.g. `post:123`
    pub fn target_key(&self) -> String {
        match self {
            Resource::Post(id) => format!("post:{}", id),
            Resource::Comment(id) => format!("comment:{}", id),
            Resource::Profile(id) => format!("profile:{}", id),
            Resource::Search(query) => format!("search:{}", query.key()),
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.target_key())
    }
}

/// Named grouping of fetched ids under a parent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Collection {
    /// Comments of a post
    Comments,
    /// Replies to a comment
    Replies,
    /// Timeline posts of a profile
    FeedPosts,
    /// Community section posts of a profile or group
    CommunityPosts,
    /// Posts returned by a search
    SearchPosts,
    /// The target item itself
    Item,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Comments => "comments",
            Collection::Replies => "replies",
            Collection::FeedPosts => "feed_posts",
            Collection::CommunityPosts => "community_posts",
            Collection::SearchPosts => "search_posts",
            Collection::Item => "item",
        }
    }

    pub const ALL: [Collection; 6] = [
        Collection::Comments,
        Collection::Replies,
        Collection::FeedPosts,
        Collection::CommunityPosts,
        Collection::SearchPosts,
        Collection::Item,
    ];

    /// Collections whose members are posts
    pub const POST_FEEDS: [Collection; 3] = [
        Collection::FeedPosts,
        Collection::CommunityPosts,
        Collection::SearchPosts,
    ];
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Collection {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Collection::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| {
                let names: Vec<&str> = Collection::ALL.iter().map(|c| c.as_str()).collect();
                format!("unknown collection '{}' (expected one of: {})", s, names.join(", "))
            })
    }
}

/// One paginated collection under a parent resource.
///
/// Carries the context needed to resolve each raw item into a
/// [`RawRecord`] at fetch time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionRequest {
    pub parent: Resource,
    pub collection: Collection,
    /// Post the fetched comments belong to
    pub post_id: Option<i64>,
    /// Comment the fetched replies answer
    pub parent_comment_id: Option<i64>,
}

impl CollectionRequest {
    pub fn comments(post_id: i64) -> Self {
        Self {
            parent: Resource::Post(post_id.to_string()),
            collection: Collection::Comments,
            post_id: Some(post_id),
            parent_comment_id: None,
        }
    }

    pub fn replies(post_id: i64, comment_id: i64) -> Self {
        Self {
            parent: Resource::Comment(comment_id.to_string()),
            collection: Collection::Replies,
            post_id: Some(post_id),
            parent_comment_id: Some(comment_id),
        }
    }

    pub fn profile_posts(profile: &str, collection: Collection) -> Self {
        Self {
            parent: Resource::Profile(profile.to_string()),
            collection,
            post_id: None,
            parent_comment_id: None,
        }
    }

    pub fn search_posts(query: SearchQuery) -> Self {
        Self {
            parent: Resource::Search(query),
            collection: Collection::SearchPosts,
            post_id: None,
            parent_comment_id: None,
        }
    }

    /// Ledger id of the parent, shared by connections and progress rows
    pub fn parent_id(&self) -> String {
        self.parent.ledger_id()
    }

    /// Tag a raw item with the entity kind this collection yields
    pub fn resolve(&self, value: Value) -> RawRecord {
        match self.collection {
            Collection::Comments | Collection::Replies => RawRecord::Comment {
                value,
                post_id: self.post_id,
                parent_comment_id: self.parent_comment_id,
            },
            _ => RawRecord::Post(value),
        }
    }
}

/// Raw API payload tagged with its entity kind.
#[derive(Debug, Clone, PartialEq)]
pub enum RawRecord {
    Post(Value),
    Comment {
        value: Value,
        post_id: Option<i64>,
        parent_comment_id: Option<i64>,
    },
    Profile(Value),
    Search { value: Value, query: SearchQuery },
}

impl RawRecord {
    pub fn kind(&self) -> &'static str {
        match self {
            RawRecord::Post(_) => "post",
            RawRecord::Comment { .. } => "comment",
            RawRecord::Profile(_) => "profile",
            RawRecord::Search { .. } => "search",
        }
    }

    pub fn value(&self) -> &Value {
        match self {
            RawRecord::Post(value)
            | RawRecord::Comment { value, .. }
            | RawRecord::Profile(value)
            | RawRecord::Search { value, .. } => value,
        }
    }

    /// Id of the record as sent by the API, for log context
    pub fn raw_id(&self) -> String {
        match self.value().get("id") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => "<missing>".to_string(),
        }
    }
}

/// Query parameters that shape what the API loads for a target
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchParams {
    pub load_comments: bool,
    pub max_comments: Option<u32>,
    pub load_feed_posts: bool,
    pub load_community_posts: bool,
    pub max_posts: Option<u32>,
    pub from_date: Option<NaiveDateTime>,
    pub to_date: Option<NaiveDateTime>,
    pub page_size: u32,
}

impl FetchParams {
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = vec![
            ("load_comments", u8::from(self.load_comments).to_string()),
            ("load_feed_posts", u8::from(self.load_feed_posts).to_string()),
            (
                "load_community_posts",
                u8::from(self.load_community_posts).to_string(),
            ),
        ];
        if let Some(max) = self.max_comments {
            pairs.push(("max_comments", max.to_string()));
        }
        if let Some(max) = self.max_posts {
            pairs.push(("max_posts", max.to_string()));
        }
        if let Some(date) = self.from_date {
            pairs.push(("from_date", date.format(DATE_FILTER_FORMAT).to_string()));
        }
        if let Some(date) = self.to_date {
            pairs.push(("to_date", date.format(DATE_FILTER_FORMAT).to_string()));
        }
        pairs
    }
}

/// Status of a refresh task on the remote side
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshStatus {
    Created,
    Pending,
    Finished,
    Failed,
    Unknown,
}

impl RefreshStatus {
    /// No point polling any further
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RefreshStatus::Finished | RefreshStatus::Failed | RefreshStatus::Unknown
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshStatus::Created => "created",
            RefreshStatus::Pending => "pending",
            RefreshStatus::Finished => "finished",
            RefreshStatus::Failed => "failed",
            RefreshStatus::Unknown => "unknown",
        }
    }
}

impl From<&str> for RefreshStatus {
    fn from(s: &str) -> Self {
        match s {
            "created" => RefreshStatus::Created,
            "pending" => RefreshStatus::Pending,
            "finished" => RefreshStatus::Finished,
            "fail" | "failed" => RefreshStatus::Failed,
            _ => RefreshStatus::Unknown,
        }
    }
}

/// One page as returned by the remote API, before resolution
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawPage {
    pub items: Vec<Value>,
    pub next_cursor: Option<Cursor>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use serde_json::json;

    fn date(y: i32, m: u32, d: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_search_key_is_case_insensitive() {
        let a = SearchQuery {
            request: "Rust Lang".to_string(),
            search_type: SearchType::Latest,
            from_date: Some(date(2024, 1, 1)),
            to_date: None,
        };
        let b = SearchQuery {
            request: "rust lang".to_string(),
            ..a.clone()
        };
        assert_eq!(a.key(), "rust lang/2024-01-01T00:00:00//latest");
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn test_collection_round_trips_through_str() {
        for collection in Collection::ALL {
            assert_eq!(collection.as_str().parse::<Collection>().unwrap(), collection);
        }
        assert!("likes".parse::<Collection>().is_err());
    }

    #[test]
    fn test_resolve_attaches_comment_context() {
        let request = CollectionRequest::replies(10, 20);
        let record = request.resolve(json!({"id": "30"}));
        assert_eq!(
            record,
            RawRecord::Comment {
                value: json!({"id": "30"}),
                post_id: Some(10),
                parent_comment_id: Some(20),
            }
        );
        assert_eq!(record.raw_id(), "30");

        let posts = CollectionRequest::profile_posts("zuck", Collection::FeedPosts);
        assert_eq!(posts.resolve(json!({"id": 1})).kind(), "post");
        assert_eq!(posts.parent_id(), "zuck");
        assert_eq!(posts.parent.target_key(), "profile:zuck");
    }

    #[test]
    fn test_refresh_status_terminal_states() {
        assert!(RefreshStatus::from("finished").is_terminal());
        assert!(RefreshStatus::from("fail").is_terminal());
        assert!(RefreshStatus::from("something-new").is_terminal());
        assert!(!RefreshStatus::from("pending").is_terminal());
        assert!(!RefreshStatus::from("created").is_terminal());
    }

    #[test]
    fn test_fetch_params_skip_unset_values() {
        let params = FetchParams {
            load_comments: true,
            max_comments: Some(50),
            page_size: 100,
            ..Default::default()
        };
        let pairs = params.query_pairs();
        assert!(pairs.contains(&("load_comments", "1".to_string())));
        assert!(pairs.contains(&("max_comments", "50".to_string())));
        assert!(!pairs.iter().any(|(k, _)| *k == "max_posts" || *k == "from_date"));
    }
}
