use crate::model::{MediaItem, MediaKind};
use sanitize_filename::sanitize;
use std::path::{Path, PathBuf};
use url::Url;

/// Build the on-disk filename for a media item:
/// `<sanitize(tweetId)>_<sanitize(mediaId)>.<ext>`.
///
/// The media id half of `item.id` is everything after the first
/// `<tweetId>_` prefix the scraper assembled; falling back to the whole id
/// keeps this total for ids that don't follow that convention (e.g. items
/// constructed directly in tests).
pub fn build_filename(item: &MediaItem) -> String {
    let media_id = item
        .id
        .strip_prefix(&format!("{}_", item.tweet_id))
        .unwrap_or(item.id.as_str());
    let ext = extension_for(item);
    format!(
        "{}_{}.{}",
        sanitize(&item.tweet_id),
        sanitize(media_id),
        ext
    )
}

/// Resolve the file extension for a media item: prefer an explicit
/// `?format=` query parameter on the URL, else the URL path's suffix, else
/// the kind's default extension.
pub fn extension_for(item: &MediaItem) -> String {
    if let Ok(url) = Url::parse(&item.url) {
        if let Some(format) = url
            .query_pairs()
            .find(|(k, _)| k == "format")
            .map(|(_, v)| v.to_string())
        {
            if !format.is_empty() && format.chars().all(|c| c.is_ascii_alphanumeric()) {
                return format.to_ascii_lowercase();
            }
        }
        if let Some(segments) = url.path_segments() {
            if let Some(last) = segments.last() {
                if let Some((_, ext)) = last.rsplit_once('.') {
                    if !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()) {
                        return ext.to_ascii_lowercase();
                    }
                }
            }
        }
    }
    item.kind.default_extension().to_string()
}

/// Full target path for a media item: `<outputDir>/<sanitize(username)>/<filename>`.
pub fn target_path(output_dir: &Path, item: &MediaItem) -> PathBuf {
    output_dir
        .join(sanitize(&item.username))
        .join(build_filename(item))
}
