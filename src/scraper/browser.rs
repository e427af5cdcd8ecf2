//! Headless-browser scraper: the fallback inventory source used when the
//! structured GraphQL API is unreachable or exhausted. Renders the
//! platform's media page for an account and scrapes rendered tweet
//! articles out of the DOM, scrolling incrementally to load more.

use super::{FetchOptions, Scraper};
use crate::cookies::PLATFORM_DOMAINS;
use crate::error::ScraperError;
use crate::model::{MediaItem, MediaKind};
use crate::session::Session;
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::network::CookieParam;
use chromiumoxide::Page;
use futures_util::StreamExt;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";
const MAX_SCROLL_ROUNDS: u32 = 14;
const STALE_ROUND_LIMIT: u32 = 3;
const SCROLL_WAIT: Duration = Duration::from_millis(900);
const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(30);

/// One candidate tweet article, exactly as extracted by [`EXTRACT_SCRIPT`].
#[derive(Debug, Deserialize)]
struct RawCandidate {
    tweet_id: String,
    created_at: Option<String>,
    images: Vec<String>,
    videos: Vec<String>,
}

/// Injected into the page on every scroll round. Skips retweets/reposts,
/// keeps only articles whose every status link resolves to the target
/// account, and collects image/video sources per spec §4.4's DOM contract.
const EXTRACT_SCRIPT: &str = r#"
(() => {
  const target = window.__twmdTargetHandle.toLowerCase();
  const out = [];
  document.querySelectorAll('article[data-testid="tweet"]').forEach(article => {
    const social = article.querySelector('[data-testid="socialContext"]');
    if (social && /retweet|repost/i.test(social.textContent || '')) return;

    const links = Array.from(article.querySelectorAll('a[href*="/status/"]'))
      .map(a => a.getAttribute('href'))
      .filter(Boolean);
    if (links.length === 0) return;

    const users = new Set();
    let tweetId = null;
    for (const href of links) {
      const match = href.match(/^\/([^/]+)\/status\/(\d+)/);
      if (!match) continue;
      users.add(match[1].toLowerCase());
      if (tweetId === null) tweetId = match[2];
    }
    if (tweetId === null) return;
    if (users.size !== 1 || !users.has(target)) return;

    const images = Array.from(article.querySelectorAll('img[src*="pbs.twimg.com/media/"]'))
      .map(img => img.src.replace(/([?&])name=\w+/, '$1name=orig'));
    const videos = Array.from(article.querySelectorAll('video source[src], video[src]'))
      .map(v => v.getAttribute('src'))
      .filter(src => src && (src.includes('video.twimg.com') || src.endsWith('.mp4') || src.endsWith('.m3u8')));

    const time = article.querySelector('time');
    out.push({
      tweet_id: tweetId,
      created_at: time ? time.getAttribute('datetime') : null,
      images,
      videos,
    });
  });
  return out;
})()
"#;

pub struct BrowserScraper {
    browser: Option<Browser>,
    session: Session,
}

impl BrowserScraper {
    pub fn new() -> Self {
        BrowserScraper {
            browser: None,
            session: Session::anonymous(),
        }
    }

    async fn launch(&mut self) -> anyhow::Result<()> {
        let config = BrowserConfig::builder()
            .window_size(1280, 1024)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build browser config: {e}"))?;
        let (browser, mut handler) = Browser::launch(config).await?;
        tokio::spawn(async move { while handler.next().await.is_some() {} });
        self.browser = Some(browser);
        Ok(())
    }

    async fn inject_cookies(&self, page: &Page, session: &Session) -> anyhow::Result<()> {
        let mut params = Vec::new();
        for cookie in session.normalized_cookies() {
            for domain in PLATFORM_DOMAINS {
                params.push(
                    CookieParam::builder()
                        .name(cookie.name.clone())
                        .value(cookie.value.clone())
                        .domain(format!(".{domain}"))
                        .path("/")
                        .build()
                        .map_err(|e| anyhow::anyhow!("invalid cookie param: {e}"))?,
                );
            }
        }
        if !params.is_empty() {
            page.set_cookies(params).await?;
        }
        Ok(())
    }

    async fn scrape_url(
        &self,
        page: &Page,
        url: &str,
        handle: &str,
    ) -> anyhow::Result<Vec<RawCandidate>> {
        page.goto(url).await?;
        tokio::time::timeout(NAVIGATION_TIMEOUT, page.wait_for_navigation()).await??;
        page.evaluate(format!("window.__twmdTargetHandle = {handle:?};"))
            .await?;
        tokio::time::sleep(Duration::from_millis(1500)).await;

        let mut seen = std::collections::HashSet::new();
        let mut all = Vec::new();
        let mut stale_rounds = 0u32;

        for round in 0..MAX_SCROLL_ROUNDS {
            let result = page.evaluate(EXTRACT_SCRIPT).await?;
            let candidates: Vec<RawCandidate> = result.into_value().unwrap_or_default();

            let mut new_count = 0;
            for candidate in candidates {
                if seen.insert(candidate.tweet_id.clone()) {
                    new_count += 1;
                    all.push(candidate);
                }
            }
            debug!("scroll round {round}: {new_count} new articles on {url}");

            if new_count == 0 {
                stale_rounds += 1;
                if stale_rounds >= STALE_ROUND_LIMIT {
                    break;
                }
            } else {
                stale_rounds = 0;
            }

            page.evaluate("window.scrollBy(0, window.innerHeight * 2.5)")
                .await?;
            tokio::time::sleep(SCROLL_WAIT).await;
        }

        Ok(all)
    }

    fn candidate_urls(handle: &str) -> Vec<String> {
        PLATFORM_DOMAINS
            .iter()
            .flat_map(|domain| {
                vec![
                    format!("https://{domain}/{handle}/media"),
                    format!("https://{domain}/search?q=from%3A{handle}%20filter%3Amedia&f=live"),
                ]
            })
            .collect()
    }
}

impl Default for BrowserScraper {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Scraper for BrowserScraper {
    async fn initialize(&mut self, session: &Session) -> Result<(), ScraperError> {
        self.session = session.clone();
        self.launch()
            .await
            .map_err(|e| ScraperError::Other(e.context("failed to launch headless browser")))?;
        Ok(())
    }

    async fn fetch_user_media(
        &mut self,
        handle: &str,
        options: &FetchOptions,
    ) -> Result<Vec<MediaItem>, ScraperError> {
        let browser = self
            .browser
            .as_ref()
            .ok_or_else(|| ScraperError::Other(anyhow::anyhow!("browser scraper not initialized")))?;

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| ScraperError::Other(anyhow::anyhow!("failed to open page: {e}")))?;

        if !self.session.is_empty() {
            self.inject_cookies(&page, &self.session)
                .await
                .map_err(|e| ScraperError::Other(e.context("failed to inject session cookies")))?;
        }

        let mut candidates = Vec::new();
        for url in Self::candidate_urls(handle) {
            match self.scrape_url(&page, &url, handle).await {
                Ok(found) if !found.is_empty() => {
                    candidates = found;
                    break;
                }
                Ok(_) => continue,
                Err(e) => {
                    warn!("headless scrape of {url} failed: {e:#}");
                    continue;
                }
            }
        }

        if candidates.is_empty() {
            return Err(ScraperError::NoInventory(handle.to_string()));
        }

        let items = candidates
            .into_iter()
            .flat_map(|candidate| raw_candidate_to_items(candidate, handle))
            .collect();
        Ok(super::finalize(items, options))
    }

    async fn close(&mut self) -> Result<(), ScraperError> {
        if let Some(mut browser) = self.browser.take() {
            let _ = browser.close().await;
            let _ = browser.wait().await;
        }
        Ok(())
    }
}

fn raw_candidate_to_items(candidate: RawCandidate, handle: &str) -> Vec<MediaItem> {
    let created_at = candidate
        .created_at
        .as_deref()
        .and_then(|s| crate::time_utils::parse_rfc3339(s).ok());

    let mut items = Vec::new();
    for (idx, url) in candidate.images.iter().enumerate() {
        items.push(MediaItem {
            id: format!("{}_{}", candidate.tweet_id, idx),
            tweet_id: candidate.tweet_id.clone(),
            username: handle.to_string(),
            kind: MediaKind::Image,
            url: url.clone(),
            created_at,
            filename_hint: None,
        });
    }
    for (idx, url) in candidate.videos.iter().enumerate() {
        let kind = if url.contains("/tweet_video/") || url.ends_with(".gif") {
            MediaKind::Gif
        } else {
            MediaKind::Video
        };
        items.push(MediaItem {
            id: format!("{}_v{}", candidate.tweet_id, idx),
            tweet_id: candidate.tweet_id.clone(),
            username: handle.to_string(),
            kind,
            url: url.clone(),
            created_at,
            filename_hint: None,
        });
    }
    items
}
