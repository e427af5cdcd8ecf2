pub mod browser;
pub mod graphql;

use crate::error::ScraperError;
use crate::model::{MediaItem, MediaKind};
use crate::session::Session;
use async_trait::async_trait;

/// Caller-supplied constraints on a single `fetch_user_media` call.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub max_tweets: usize,
    pub kinds: Vec<MediaKind>,
}

impl Default for FetchOptions {
    fn default() -> Self {
        FetchOptions {
            max_tweets: 200,
            kinds: vec![MediaKind::Image, MediaKind::Video, MediaKind::Gif],
        }
    }
}

/// A media-inventory source for a single account. Both the structured-API
/// scraper and the headless-browser fallback implement this so the
/// orchestrator never needs to know which one it is driving.
#[async_trait]
pub trait Scraper: Send {
    async fn initialize(&mut self, session: &Session) -> Result<(), ScraperError>;

    async fn fetch_user_media(
        &mut self,
        handle: &str,
        options: &FetchOptions,
    ) -> Result<Vec<MediaItem>, ScraperError>;

    async fn close(&mut self) -> Result<(), ScraperError>;
}

/// De-duplicate by `(tweetId, kind, url)` and filter to the requested kinds,
/// preserving first-seen order. Shared by every scraper implementation so
/// the invariant in the spec's testable properties holds regardless of
/// which engine produced the raw list.
pub fn finalize(mut items: Vec<MediaItem>, options: &FetchOptions) -> Vec<MediaItem> {
    use std::collections::HashSet;
    let mut seen = HashSet::new();
    items.retain(|item| {
        options.kinds.contains(&item.kind)
            && seen.insert((item.tweet_id.clone(), item.kind, item.url.clone()))
    });
    if items.len() > options.max_tweets {
        items.truncate(options.max_tweets);
    }
    items
}
