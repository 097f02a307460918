//! API endpoint path builders
//!
//! Paths are relative to the versioned base URL
//! (`https://api.data365.co/v1.1`). Identifiers and search requests are
//! percent-encoded as single path segments.

use crate::framework::types::{Collection, CollectionRequest, Resource};
use urlencoding::encode;

/// Path of a single item
pub fn item_path(resource: &Resource) -> String {
    match resource {
        Resource::Post(id) => format!("facebook/post/{}", encode(id)),
        Resource::Comment(id) => format!("facebook/comment/{}", encode(id)),
        Resource::Profile(id) => format!("facebook/profile/{}", encode(id)),
        Resource::Search(query) => format!(
            "facebook/search/{}/posts/{}",
            encode(&query.request),
            query.search_type
        ),
    }
}

/// Path of a paginated collection under its parent item
pub fn collection_path(request: &CollectionRequest) -> String {
    let parent = item_path(&request.parent);
    let suffix = match request.collection {
        Collection::Comments => "comments",
        Collection::Replies => "replies",
        Collection::FeedPosts => "feed/posts",
        Collection::CommunityPosts => "community/posts",
        Collection::SearchPosts => "posts",
        Collection::Item => return parent,
    };
    format!("{}/{}", parent, suffix)
}

/// Path of the refresh task of an item
pub fn update_path(resource: &Resource) -> String {
    format!("{}/update", item_path(resource))
}

/// Join a base URL and a relative path
pub fn url(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path)
}
