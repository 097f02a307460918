use crate::error::Result;
use crate::normalize::fields::{self, Object};
use crate::normalize::{Attachment, PostRow};
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;

const KIND: &str = "post";

pub fn normalize_post(value: &Value, fetched_at: DateTime<Utc>) -> Result<PostRow> {
    let obj = fields::as_object(value, KIND)?;
    let id = fields::require_id(obj, KIND)?;

    Ok(PostRow {
        id,
        created_time: fields::timestamp(obj, &["created_time", "created_at"]),
        text: fields::string(obj, &["text", "message"]),
        text_lang: fields::string(obj, &["text_lang", "lang"]),
        tagged: fields::tagged_text(obj),
        attachment: attachment(obj, id),
        attached_post_id: fields::id(obj, &["attached_post_id"]),
        reactions: fields::reactions(obj),
        comments_count: fields::integer(obj, &["comments_count"]),
        shares_count: fields::integer(obj, &["shares_count"]),
        owner: fields::owner(obj),
        group_id: fields::id(obj, &["group_id"]),
        fetched_at,
    })
}

/// Pick the attachment shape.
///
/// A nested `attachment` object wins; otherwise the flat `attached_*`
/// columns are inspected in the order media, video, image, link and the
/// first populated shape is kept.
fn attachment(obj: &Object, post_id: i64) -> Attachment {
    if let Some(nested) = obj.get("attachment").and_then(Value::as_object) {
        return nested_attachment(nested);
    }

    let media = Attachment::Media {
        ids: fields::id_list(obj, &["attached_medias_id"]),
        preview_urls: fields::string_list(obj, &["attached_medias_preview_url"]),
        preview_contents: fields::string_list(obj, &["attached_medias_preview_content"]),
    };
    let video = Attachment::Video {
        url: fields::string(obj, &["attached_video_url"]),
        preview_url: fields::string(obj, &["attached_video_preview_url"]),
    };
    let image = Attachment::Image {
        url: fields::string(obj, &["attached_image_url"]),
        preview_url: fields::string(obj, &["attached_image_preview_url"]),
    };
    let link = Attachment::Link {
        url: fields::string(obj, &["attached_link", "attached_link_url"]),
        preview_url: fields::string(obj, &["attached_link_preview_url"]),
    };

    let mut present = [media, video, image, link]
        .into_iter()
        .filter(|candidate| !is_empty(candidate));
    let chosen = present.next().unwrap_or_default();
    let dropped: Vec<&str> = present.filter_map(|a| a.type_name()).collect();
    if !dropped.is_empty() {
        debug!(post_id, kept = ?chosen.type_name(), ?dropped, "Post has several attachment shapes");
    }
    chosen
}

fn nested_attachment(att: &Object) -> Attachment {
    let url = fields::string(att, &["url", "link", "src"]);
    let preview_url = fields::string(att, &["preview_url", "preview_image_url", "thumbnail_url", "preview"]);
    let kind = fields::string(att, &["type"]).map(|t| t.to_lowercase());

    match kind.as_deref() {
        Some("video") => Attachment::Video { url, preview_url },
        Some("image") | Some("photo") => Attachment::Image { url, preview_url },
        Some("link") | Some("share") => Attachment::Link { url, preview_url },
        Some("media") | Some("album") | Some("photos") => {
            let items: Vec<&Object> = fields::first(att, &["medias", "items"])
                .and_then(Value::as_array)
                .map(|items| items.iter().filter_map(Value::as_object).collect())
                .unwrap_or_default();
            Attachment::Media {
                ids: items.iter().filter_map(|m| fields::id(m, &["id"])).collect(),
                preview_urls: items
                    .iter()
                    .filter_map(|m| fields::string(m, &["preview_url", "url"]))
                    .collect(),
                preview_contents: items
                    .iter()
                    .filter_map(|m| fields::string(m, &["preview_content", "description"]))
                    .collect(),
            }
        },
        _ if url.is_some() => Attachment::Link { url, preview_url },
        _ => Attachment::None,
    }
}

fn is_empty(attachment: &Attachment) -> bool {
    match attachment {
        Attachment::None => true,
        Attachment::Link { url, preview_url }
        | Attachment::Video { url, preview_url }
        | Attachment::Image { url, preview_url } => url.is_none() && preview_url.is_none(),
        Attachment::Media {
            ids,
            preview_urls,
            preview_contents,
        } => ids.is_empty() && preview_urls.is_empty() && preview_contents.is_empty(),
    }
}
