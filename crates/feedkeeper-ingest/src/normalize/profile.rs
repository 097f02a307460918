use crate::error::Result;
use crate::normalize::fields;
use crate::normalize::ProfileRow;
use chrono::{DateTime, Utc};
use serde_json::Value;

const KIND: &str = "profile";

pub fn normalize_profile(value: &Value, fetched_at: DateTime<Utc>) -> Result<ProfileRow> {
    let obj = fields::as_object(value, KIND)?;
    let id = fields::require_id(obj, KIND)?;

    Ok(ProfileRow {
        id,
        username: fields::string(obj, &["username"]),
        full_name: fields::string(obj, &["full_name", "name"]),
        profile_type: fields::string(obj, &["profile_type", "type"]),
        biography: fields::string(obj, &["biography", "about", "description"]),
        profile_url: fields::string(obj, &["profile_url", "url"]),
        avatar_url: fields::string(obj, &["profile_avatar_url", "avatar_url", "profile_photo_url"]),
        is_verified: fields::boolean(obj, &["is_verified", "verified"]),
        categories: fields::string_list(obj, &["categories", "category"]),
        workplaces: fields::string_list(obj, &["workplace", "workplaces", "work"]),
        education: fields::string_list(obj, &["education"]),
        languages: fields::string_list(obj, &["langs", "languages"]),
        current_city: fields::string_list(obj, &["current_city"]),
        hometown: fields::string_list(obj, &["hometown"]),
        likes_count: fields::integer(obj, &["likes_count"]),
        friends_count: fields::integer(obj, &["friends_count"]),
        followers_count: fields::integer(obj, &["followers_count"]),
        members_count: fields::integer(obj, &["members_count", "group_members_count"]),
        last_post_created_time: fields::timestamp(obj, &["last_post_created_time"]),
        fetched_at,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_array_attributes() {
        let row = normalize_profile(
            &json!({
                "id": "4",
                "username": "zuck",
                "full_name": "Mark",
                "workplace": [{"name": "Meta"}, "Harvard Dorm"],
                "education": ["Harvard"],
                "langs": "English",
                "current_city": ["Palo Alto"],
                "followers_count": "119000000",
                "is_verified": true,
                "last_post_created_time": "2024-02-01T08:00:00+02:00",
            }),
            Utc::now(),
        )
        .unwrap();

        assert_eq!(row.id, 4);
        assert_eq!(row.workplaces, vec!["Meta", "Harvard Dorm"]);
        assert_eq!(row.languages, vec!["English"]);
        assert_eq!(row.followers_count, Some(119_000_000));
        assert_eq!(row.is_verified, Some(true));
        assert_eq!(
            row.last_post_created_time.map(|t| t.to_rfc3339()),
            Some("2024-02-01T06:00:00+00:00".to_string())
        );
    }

    #[test]
    fn test_sparse_profile() {
        let row = normalize_profile(&json!({"id": 12, "hometown": null}), Utc::now()).unwrap();
        assert_eq!(row.username, None);
        assert!(row.hometown.is_empty());
        assert!(row.categories.is_empty());
        assert_eq!(row.members_count, None);
    }
}
