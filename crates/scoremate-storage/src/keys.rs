//! Object key layout, shared by every backend.
//!
//! - original upload: `{user_id}/uploads/{upload_id}/original.{ext}`
//! - cover thumbnail: `{user_id}/scores/{score_id}/thumbs/cover.jpg`
//! - page thumbnail: `{user_id}/scores/{score_id}/thumbs/page-{n:04}.jpg`

use uuid::Uuid;

const DEFAULT_EXTENSION: &str = "pdf";
const MAX_EXTENSION_LEN: usize = 10;

/// Extension taken from the client filename, lowercased; `pdf` when absent or odd.
pub fn extension_for(filename: Option<&str>) -> String {
    filename
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_lowercase())
        .filter(|ext| {
            !ext.is_empty()
                && ext.len() <= MAX_EXTENSION_LEN
                && ext.chars().all(|c| c.is_ascii_alphanumeric())
        })
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string())
}

pub fn original_key(user_id: Uuid, upload_id: Uuid, filename: Option<&str>) -> String {
    format!(
        "{}/uploads/{}/original.{}",
        user_id,
        upload_id,
        extension_for(filename)
    )
}

pub fn cover_thumbnail_key(user_id: Uuid, score_id: Uuid) -> String {
    format!("{}/scores/{}/thumbs/cover.jpg", user_id, score_id)
}

pub fn page_thumbnail_key(user_id: Uuid, score_id: Uuid, page: i32) -> String {
    format!("{}/scores/{}/thumbs/page-{:04}.jpg", user_id, score_id, page)
}

/// Every object that can exist for a score: original, cover and each known page.
pub fn score_object_keys(
    user_id: Uuid,
    score_id: Uuid,
    original_key: &str,
    thumbnail_key: Option<&str>,
    pages: Option<i32>,
) -> Vec<String> {
    let mut keys = vec![original_key.to_string()];
    let cover = cover_thumbnail_key(user_id, score_id);
    if let Some(thumb) = thumbnail_key.filter(|k| !k.is_empty() && *k != cover) {
        keys.push(thumb.to_string());
    }
    keys.push(cover);
    for page in 1..=pages.unwrap_or(0).max(0) {
        keys.push(page_thumbnail_key(user_id, score_id, page));
    }
    keys
}
