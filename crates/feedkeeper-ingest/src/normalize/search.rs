use crate::error::Result;
use crate::framework::types::SearchQuery;
use crate::normalize::fields;
use crate::normalize::SearchRow;
use chrono::{DateTime, Utc};
use serde_json::Value;

const KIND: &str = "search";

/// Normalize a search descriptor.
///
/// The row is keyed by [`SearchQuery::key`] rather than the API's own id so
/// repeated runs with the same request and filters land on one row.
pub fn normalize_search(value: &Value, query: &SearchQuery, fetched_at: DateTime<Utc>) -> Result<SearchRow> {
    let obj = fields::as_object(value, KIND)?;

    Ok(SearchRow {
        id: query.key(),
        request: query.request.clone(),
        search_type: query.search_type.as_str().to_string(),
        location_id: fields::id(obj, &["location_id"]),
        author_id: fields::id(obj, &["author_id"]),
        from_date: query.from_date,
        to_date: query.to_date,
        fetched_at,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::framework::types::SearchType;
    use serde_json::json;

    #[test]
    fn test_search_row_uses_query_key() {
        let query = SearchQuery {
            request: "Solar Panels".to_string(),
            search_type: SearchType::Hashtag,
            from_date: None,
            to_date: None,
        };
        let row = normalize_search(
            &json!({"id": "abc", "location_id": "55", "post_count": 100}),
            &query,
            Utc::now(),
        )
        .unwrap();
        assert_eq!(row.id, "solar panels///hashtag");
        assert_eq!(row.request, "Solar Panels");
        assert_eq!(row.location_id, Some(55));
        assert_eq!(row.author_id, None);
    }
}
