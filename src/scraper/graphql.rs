//! Structured-API (GraphQL) scraper: the primary media-inventory source.
//!
//! Talks to the platform's internal GraphQL surface using cookie-derived
//! auth triples rather than an official API key. Because that surface is
//! undocumented and moves under us, almost every step here is defensive:
//! four URL bases are tried per request, several auth triples are tried in
//! rotation, operation ids and the bearer token can be rediscovered from the
//! client's own JS bundles, and GraphQL's "features cannot be null" rejection
//! is treated as routine feedback rather than a hard failure.

use super::{FetchOptions, Scraper};
use crate::error::ScraperError;
use crate::model::{MediaItem, MediaKind};
use crate::session::Session;
use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

const DEFAULT_BEARER_TOKEN: &str = "AAAAAAAAAAAAAAAAAAAAANRILgAAAAAAnNwIzUejRCOuH5E6I8xnZz4puTs%3D1Zv7ttfk8LF81IUq16cHjhLTvJu4FA33AGWWjCpTnA";

const URL_BASES: [&str; 4] = [
    "https://twitter.com/i/api/graphql",
    "https://api.twitter.com/graphql",
    "https://x.com/i/api/graphql",
    "https://api.x.com/graphql",
];

const MAX_PAGINATION_ROUNDS: u32 = 30;
const MAX_FEATURE_FLAG_ITERATIONS: u32 = 4;
const MAX_AUTH_RECOVERY_STEPS: u32 = 3;

#[derive(Debug, Clone)]
struct AuthTriple {
    auth_token: String,
    ct0: String,
    guest_token: Option<String>,
}

/// Bundle of request headers derived from one [`AuthTriple`] + bearer token.
struct AuthContext<'a> {
    triple: &'a AuthTriple,
    bearer: &'a str,
}

pub struct GraphqlScraper {
    client: Client,
    auth_triples: Vec<AuthTriple>,
    auth_idx: usize,
    bearer_tokens: Vec<String>,
    bearer_idx: usize,
    operation_ids: std::collections::HashMap<&'static str, Vec<String>>,
    features: serde_json::Map<String, Value>,
    metadata_refreshed: bool,
}

impl GraphqlScraper {
    pub fn new(client: Client) -> Self {
        let mut operation_ids = std::collections::HashMap::new();
        operation_ids.insert("UserByScreenName", vec!["G3KGOASz96M-Qu0nwmGXNg".to_string()]);
        operation_ids.insert("UserMedia", vec!["YqiE3JL1KNgf9nSljYdxaA".to_string()]);
        operation_ids.insert("UserTweets", vec!["V7H0Ap3_Hh2FyS75OCDO3Q".to_string()]);

        let default_bearer = std::env::var("TWMD_WEB_BEARER_TOKEN")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_BEARER_TOKEN.to_string());

        GraphqlScraper {
            client,
            auth_triples: Vec::new(),
            auth_idx: 0,
            bearer_tokens: vec![default_bearer],
            bearer_idx: 0,
            operation_ids,
            features: default_features(),
            metadata_refreshed: false,
        }
    }

    fn current_auth(&self) -> Option<AuthTriple> {
        self.auth_triples.get(self.auth_idx).cloned()
    }

    fn current_bearer(&self) -> String {
        self.bearer_tokens
            .get(self.bearer_idx)
            .cloned()
            .unwrap_or_else(|| DEFAULT_BEARER_TOKEN.to_string())
    }

    fn advance_auth(&mut self) -> bool {
        if self.auth_idx + 1 < self.auth_triples.len() {
            self.auth_idx += 1;
            true
        } else {
            false
        }
    }

    fn advance_bearer(&mut self) -> bool {
        if self.bearer_idx + 1 < self.bearer_tokens.len() {
            self.bearer_idx += 1;
            true
        } else {
            false
        }
    }

    /// Auth/ct0/bearer/metadata recovery ladder shared by the 401 and 404
    /// failure paths: advance to the next auth triple, then try a ct0
    /// refresh, then the next bearer token, then (once) a full metadata
    /// refresh that resets both indices. Returns `true` as soon as a step
    /// changes enough state to be worth retrying the request with.
    async fn try_recover_auth(&mut self) -> bool {
        if self.advance_auth() {
            return true;
        }
        if self.try_refresh_ct0().await.is_ok() {
            return true;
        }
        if self.advance_bearer() {
            return true;
        }
        if !self.metadata_refreshed {
            self.metadata_refreshed = true;
            if self.refresh_metadata().await.is_ok() {
                self.auth_idx = 0;
                self.bearer_idx = 0;
                return true;
            }
        }
        false
    }

    /// Resolve `@handle` to the platform's internal numeric user id.
    async fn resolve_user_id(&mut self, handle: &str) -> Result<String, ScraperError> {
        let variables = json!({
            "screen_name": handle,
            "withSafetyModeUserFields": true,
        });
        let response = self
            .request_graphql("UserByScreenName", variables)
            .await?;

        #[derive(Deserialize)]
        struct Data {
            user: Option<UserResult>,
        }
        #[derive(Deserialize)]
        struct UserResult {
            result: Option<UserResultInner>,
        }
        #[derive(Deserialize)]
        struct UserResultInner {
            rest_id: Option<String>,
        }

        // `response` is already the unwrapped `data` object (see
        // `classify_response`), not the raw GraphQL envelope.
        let data: Data = serde_json::from_value(response)
            .map_err(|e| ScraperError::Other(anyhow::anyhow!("unexpected UserByScreenName shape: {e}")))?;

        data.user
            .and_then(|u| u.result)
            .and_then(|r| r.rest_id)
            .ok_or_else(|| ScraperError::UserNotFound(handle.to_string()))
    }

    /// Paginate the user's media timeline, applying the filtering and
    /// kind-mapping rules, until `options.max_tweets` items are collected or
    /// the timeline is exhausted.
    async fn paginate_media(
        &mut self,
        user_id: &str,
        handle: &str,
        options: &FetchOptions,
    ) -> Result<Vec<MediaItem>, ScraperError> {
        let mut items = Vec::new();
        let mut cursor: Option<String> = None;
        let mut previous_cursor: Option<String> = None;

        for _round in 0..MAX_PAGINATION_ROUNDS {
            if items.len() >= options.max_tweets {
                break;
            }
            let mut variables = json!({
                "userId": user_id,
                "count": 40,
                "includePromotedContent": false,
                "withVoice": true,
            });
            if let Some(c) = &cursor {
                variables["cursor"] = json!(c);
            }

            let response = self.request_graphql("UserMedia", variables).await?;
            let (page_items, next_cursor) = parse_timeline_page(response, user_id, handle)?;
            items.extend(page_items);

            match (&next_cursor, &previous_cursor) {
                (Some(next), Some(prev)) if next == prev => break,
                (None, _) => break,
                _ => {}
            }
            previous_cursor = cursor;
            cursor = next_cursor;
        }

        Ok(items)
    }

    /// Issue a GraphQL GET, rotating auth triples / bearer tokens / feature
    /// flags / URL bases as failures demand. Returns the parsed `data`
    /// object of the first endpoint combination that answers successfully.
    async fn request_graphql(
        &mut self,
        operation: &'static str,
        variables: Value,
    ) -> Result<Value, ScraperError> {
        let mut outer_iterations = 0;
        loop {
            outer_iterations += 1;
            if outer_iterations > MAX_FEATURE_FLAG_ITERATIONS + MAX_AUTH_RECOVERY_STEPS + 1 {
                return Err(ScraperError::Other(anyhow::anyhow!(
                    "exceeded retry budget calling {operation}"
                )));
            }

            let Some(auth) = self.current_auth() else {
                return Err(ScraperError::AuthExhausted(operation.to_string()));
            };
            let bearer = self.current_bearer();
            let op_ids = self.operation_ids.get(operation).cloned().unwrap_or_default();
            if op_ids.is_empty() {
                return Err(ScraperError::Other(anyhow::anyhow!(
                    "no known operation id for {operation}"
                )));
            }

            let mut last_failure = None;
            for op_id in &op_ids {
                for base in URL_BASES {
                    let url = format!("{base}/{op_id}/{operation}");
                    let context = AuthContext {
                        triple: &auth,
                        bearer: &bearer,
                    };
                    match self
                        .try_once(&url, &context, &variables, operation)
                        .await
                    {
                        Ok(data) => return Ok(data),
                        Err(failure) => last_failure = Some(failure),
                    }
                }
            }

            match last_failure {
                Some(RequestFailure::FeatureFlagsRequired(names)) => {
                    if outer_iterations > MAX_FEATURE_FLAG_ITERATIONS {
                        return Err(ScraperError::Other(anyhow::anyhow!(
                            "feature-flag negotiation did not converge for {operation}"
                        )));
                    }
                    for name in names {
                        self.features.insert(name, json!(false));
                    }
                    continue;
                }
                Some(RequestFailure::Auth) => {
                    if self.try_recover_auth().await {
                        continue;
                    }
                    return Err(ScraperError::AuthExhausted(operation.to_string()));
                }
                Some(RequestFailure::NotFound) => {
                    // Spec groups a 404 "not found" body with the 401 case:
                    // both run the same auth/ct0/bearer/metadata recovery
                    // ladder before giving up, since a stale auth triple can
                    // itself render a valid handle's timeline "not found".
                    if self.try_recover_auth().await {
                        continue;
                    }
                    return Err(ScraperError::UserNotFound(operation.to_string()));
                }
                Some(RequestFailure::RateLimited(secs)) => {
                    return Err(ScraperError::RateLimited {
                        retry_after_secs: secs,
                    })
                }
                Some(RequestFailure::Other(message)) | None => {
                    return Err(ScraperError::Other(anyhow::anyhow!(
                        "{operation} failed on every base: {}",
                        message.unwrap_or_else(|| "no response".to_string())
                    )))
                }
            }
        }
    }

    async fn try_once(
        &self,
        url: &str,
        auth: &AuthContext<'_>,
        variables: &Value,
        operation: &str,
    ) -> Result<Value, RequestFailure> {
        let cookie_header = format!(
            "auth_token={}; ct0={}",
            auth.triple.auth_token, auth.triple.ct0
        );

        let mut request = self
            .client
            .get(url)
            .bearer_auth(auth.bearer)
            .header("x-csrf-token", &auth.triple.ct0)
            .header("x-twitter-auth-type", "OAuth2Session")
            .header("x-twitter-active-user", "yes")
            .header("x-twitter-client-language", "en")
            .header("Referer", "https://x.com/")
            .header("Origin", "https://x.com")
            .header("User-Agent", USER_AGENT)
            .header("Cookie", cookie_header)
            .query(&[
                ("variables", variables.to_string()),
                ("features", Value::Object(self.features.clone()).to_string()),
            ]);

        if let Some(guest) = &auth.triple.guest_token {
            request = request.header("x-guest-token", guest);
        }

        let response = request
            .send()
            .await
            .map_err(|e| RequestFailure::Other(Some(format!("{operation}: {e}"))))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| RequestFailure::Other(Some(format!("{operation}: {e}"))))?;

        classify_response(status, &body)
    }

    async fn try_refresh_ct0(&mut self) -> Result<()> {
        let Some(auth) = self.auth_triples.get(self.auth_idx).cloned() else {
            anyhow::bail!("no active auth triple");
        };
        let response = self
            .client
            .get("https://x.com/")
            .header("User-Agent", USER_AGENT)
            .header("Cookie", format!("auth_token={}", auth.auth_token))
            .send()
            .await
            .context("ct0 refresh request failed")?;

        for header in response.headers().get_all(reqwest::header::SET_COOKIE) {
            if let Ok(value) = header.to_str() {
                if let Some(ct0) = extract_cookie_value(value, "ct0") {
                    if let Some(entry) = self.auth_triples.get_mut(self.auth_idx) {
                        entry.ct0 = ct0;
                        return Ok(());
                    }
                }
            }
        }
        anyhow::bail!("no ct0 cookie found in refresh response")
    }

    /// Fetch the platform's home page and its `main*.js` bundles, harvesting
    /// a fresh bearer token and operation ids for the operations this
    /// scraper uses.
    async fn refresh_metadata(&mut self) -> Result<()> {
        let home = self
            .client
            .get("https://x.com/")
            .header("User-Agent", USER_AGENT)
            .send()
            .await
            .context("failed to fetch home page for metadata refresh")?
            .text()
            .await
            .context("failed to read home page body")?;

        let bundle_re = Regex::new(r#"https://abs\.twimg\.com/responsive-web/[^"'\s]*main\.[a-zA-Z0-9]+\.js"#).unwrap();
        let mut discovered_tokens = Vec::new();
        let mut discovered_ops: std::collections::HashMap<String, String> = std::collections::HashMap::new();

        for bundle_url in bundle_re.find_iter(&home).map(|m| m.as_str().to_string()) {
            let Ok(bundle) = self
                .client
                .get(&bundle_url)
                .header("User-Agent", USER_AGENT)
                .send()
                .await
            else {
                continue;
            };
            let Ok(body) = bundle.text().await else {
                continue;
            };
            harvest_bearer_tokens(&body, &mut discovered_tokens);
            harvest_operation_ids(&body, &mut discovered_ops);
        }

        if !discovered_tokens.is_empty() {
            discovered_tokens.dedup();
            self.bearer_tokens = discovered_tokens;
        }
        for (name, id) in discovered_ops {
            for known in ["UserByScreenName", "UserMedia", "UserTweets"] {
                if name == known {
                    self.operation_ids.entry(known).or_default().insert(0, id.clone());
                }
            }
        }
        Ok(())
    }

    /// Legacy `statuses/user_timeline.json` fallback, used only once every
    /// GraphQL base has been exhausted.
    async fn fetch_legacy_timeline(
        &self,
        handle: &str,
        options: &FetchOptions,
    ) -> Result<Vec<MediaItem>, ScraperError> {
        let Some(auth) = self.current_auth() else {
            return Err(ScraperError::AuthExhausted(handle.to_string()));
        };
        let mut items = Vec::new();
        let mut max_id: Option<String> = None;

        loop {
            if items.len() >= options.max_tweets {
                break;
            }
            let count = (options.max_tweets - items.len()).clamp(1, 200);
            let mut url = format!(
                "https://api.twitter.com/1.1/statuses/user_timeline.json?screen_name={handle}&count={count}&include_rts=false&exclude_replies=true&tweet_mode=extended&include_ext_alt_text=true"
            );
            if let Some(id) = &max_id {
                url.push_str(&format!("&max_id={id}"));
            }

            let response = self
                .client
                .get(&url)
                .bearer_auth(&self.current_bearer())
                .header("x-csrf-token", &auth.ct0)
                .header(
                    "Cookie",
                    format!("auth_token={}; ct0={}", auth.auth_token, auth.ct0),
                )
                .header("User-Agent", USER_AGENT)
                .send()
                .await
                .map_err(ScraperError::Network)?;

            if !response.status().is_success() {
                return Err(ScraperError::Other(anyhow::anyhow!(
                    "legacy timeline request failed with status {}",
                    response.status()
                )));
            }
            let tweets: Vec<Value> = response
                .json()
                .await
                .map_err(ScraperError::Network)?;
            if tweets.is_empty() {
                break;
            }
            let last_id = tweets
                .last()
                .and_then(|t| t.get("id_str"))
                .and_then(Value::as_str)
                .map(str::to_string);

            for tweet in &tweets {
                items.extend(legacy_tweet_to_items(tweet, handle));
            }

            match last_id {
                Some(id) => {
                    let next = decrement_snowflake(&id);
                    if max_id.as_deref() == Some(next.as_str()) {
                        break;
                    }
                    max_id = Some(next);
                }
                None => break,
            }
        }

        Ok(items)
    }
}

enum RequestFailure {
    FeatureFlagsRequired(Vec<String>),
    Auth,
    NotFound,
    RateLimited(Option<u64>),
    Other(Option<String>),
}

fn classify_response(status: StatusCode, body: &str) -> Result<Value, RequestFailure> {
    let parsed: Value = serde_json::from_str(body).unwrap_or(Value::Null);

    if let Some(names) = required_feature_flags(&parsed) {
        return Err(RequestFailure::FeatureFlagsRequired(names));
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(RequestFailure::RateLimited(None));
    }

    if status == StatusCode::UNAUTHORIZED {
        let mentions_auth = body.contains("\"code\":32") || body.to_ascii_lowercase().contains("authenticate");
        return Err(if mentions_auth {
            RequestFailure::Auth
        } else {
            RequestFailure::Other(Some(body.to_string()))
        });
    }

    if status == StatusCode::NOT_FOUND {
        let lower = body.to_ascii_lowercase();
        if lower.contains("not found") || lower.contains("page does not exist") {
            return Err(RequestFailure::NotFound);
        }
        return Err(RequestFailure::Other(Some(body.to_string())));
    }

    if !status.is_success() {
        return Err(RequestFailure::Other(Some(format!("status {status}"))));
    }

    if parsed.get("data").is_none() {
        return Err(RequestFailure::Other(Some("response had no data field".to_string())));
    }

    Ok(parsed["data"].clone())
}

fn required_feature_flags(parsed: &Value) -> Option<Vec<String>> {
    let errors = parsed.get("errors")?.as_array()?;
    let re = Regex::new(r"features cannot be null: \[(?P<list>[^\]]*)\]").ok()?;
    for error in errors {
        let message = error.get("message")?.as_str()?;
        if let Some(caps) = re.captures(message) {
            let names: Vec<String> = caps["list"]
                .split(',')
                .map(|s| s.trim().trim_matches('"').to_string())
                .filter(|s| !s.is_empty())
                .collect();
            if !names.is_empty() {
                return Some(names);
            }
        }
    }
    None
}

fn extract_cookie_value(set_cookie_header: &str, name: &str) -> Option<String> {
    let first = set_cookie_header.split(';').next()?;
    let (k, v) = first.split_once('=')?;
    if k.trim() == name {
        Some(v.trim().to_string())
    } else {
        None
    }
}

fn harvest_bearer_tokens(body: &str, out: &mut Vec<String>) {
    let re = Regex::new(r#"(?:Bearer |BEARER_TOKEN["']?\s*[:=]\s*["'])(AAAAAAAAAAAAAAAAAAAAA[A-Za-z0-9%]+)"#).unwrap();
    for caps in re.captures_iter(body) {
        out.push(caps[1].to_string());
    }
}

fn harvest_operation_ids(body: &str, out: &mut std::collections::HashMap<String, String>) {
    let forward = Regex::new(r#"["'](?P<id>[A-Za-z0-9_-]{20,})["']\s*,\s*["'](?P<name>UserByScreenName|UserMedia|UserTweets)["']"#).unwrap();
    for caps in forward.captures_iter(body) {
        out.insert(caps["name"].to_string(), caps["id"].to_string());
    }
    let object_form = Regex::new(r#"operationName\s*:\s*["'](?P<name>UserByScreenName|UserMedia|UserTweets)["']\s*,\s*queryId\s*:\s*["'](?P<id>[A-Za-z0-9_-]{20,})["']"#).unwrap();
    for caps in object_form.captures_iter(body) {
        out.insert(caps["name"].to_string(), caps["id"].to_string());
    }
}

/// Walk one page of `timeline_v2.timeline.instructions` and return the
/// tweets-turned-media plus the bottom cursor, if any.
fn parse_timeline_page(
    data: Value,
    user_id: &str,
    handle: &str,
) -> Result<(Vec<MediaItem>, Option<String>), ScraperError> {
    let instructions = data
        .pointer("/user/result/timeline_v2/timeline/instructions")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut items = Vec::new();
    let mut cursor = None;

    for instruction in &instructions {
        let entries = match instruction.get("type").and_then(Value::as_str) {
            Some("TimelineAddEntries") => instruction
                .get("entries")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default(),
            Some("TimelinePinEntry") => instruction
                .get("entry")
                .cloned()
                .into_iter()
                .collect(),
            _ => continue,
        };

        for entry in &entries {
            let entry_id = entry.get("entryId").and_then(Value::as_str).unwrap_or("");
            if entry_id.starts_with("cursor-bottom-") {
                cursor = entry
                    .pointer("/content/value")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                continue;
            }

            if let Some(tweet_result) = entry.pointer("/content/itemContent/tweet_results/result") {
                if let Some(item) = tweet_result_to_item(tweet_result, user_id, handle) {
                    items.push(item);
                }
            }
        }
    }

    Ok((items, cursor))
}

/// Apply the filtering and kind-mapping rules to one `tweet_results.result`
/// object, producing one [`MediaItem`] per attached media.
fn tweet_result_to_item(result: &Value, user_id: &str, handle: &str) -> Option<Vec<MediaItem>> {
    let tweet = match result.get("__typename").and_then(Value::as_str) {
        Some("TweetWithVisibilityResults") => result.get("tweet")?,
        _ => result,
    };

    let legacy = tweet.get("legacy")?;
    if legacy.get("retweeted_status_result").is_some() {
        return None;
    }
    let tweet_user_id = legacy.get("user_id_str").and_then(Value::as_str)?;
    if tweet_user_id != user_id {
        return None;
    }

    let tweet_id = tweet
        .get("rest_id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let created_at = legacy
        .get("created_at")
        .and_then(Value::as_str)
        .and_then(|s| crate::time_utils::parse_rfc3339(s).ok())
        .or_else(|| {
            legacy
                .get("created_at")
                .and_then(Value::as_str)
                .and_then(parse_twitter_date)
        });

    let media = legacy
        .get("extended_entities")
        .and_then(|e| e.get("media"))
        .or_else(|| legacy.get("entities").and_then(|e| e.get("media")))
        .and_then(Value::as_array)?;

    let mut out = Vec::new();
    for (idx, media_entry) in media.iter().enumerate() {
        let Some((kind, url)) = resolve_media_url(media_entry) else {
            continue;
        };
        let media_key = media_entry
            .get("media_key")
            .and_then(Value::as_str)
            .map(|k| k.rsplit('_').next().unwrap_or(k).to_string())
            .unwrap_or_else(|| idx.to_string());
        out.push(MediaItem {
            id: format!("{tweet_id}_{media_key}"),
            tweet_id: tweet_id.clone(),
            username: handle.to_string(),
            kind,
            url,
            created_at,
            filename_hint: None,
        });
    }
    Some(out)
}

impl Default for GraphqlScraper {
    fn default() -> Self {
        Self::new(Client::new())
    }
}

fn resolve_media_url(media_entry: &Value) -> Option<(MediaKind, String)> {
    let raw_type = media_entry.get("type").and_then(Value::as_str)?;
    match raw_type {
        "photo" => {
            let base = media_entry.get("media_url_https").and_then(Value::as_str)?;
            Some((MediaKind::Image, format!("{base}?name=orig")))
        }
        "video" | "animated_gif" => {
            let variants = media_entry
                .pointer("/video_info/variants")
                .and_then(Value::as_array)?;
            let best = variants
                .iter()
                .filter(|v| {
                    v.get("content_type")
                        .and_then(Value::as_str)
                        .is_some_and(|c| c.contains("mp4"))
                })
                .max_by_key(|v| v.get("bitrate").and_then(Value::as_u64).unwrap_or(0))?;
            let url = best.get("url").and_then(Value::as_str)?.to_string();
            let kind = if raw_type == "animated_gif" || url.contains("/tweet_video/") {
                MediaKind::Gif
            } else {
                MediaKind::Video
            };
            Some((kind, url))
        }
        _ => None,
    }
}

fn legacy_tweet_to_items(tweet: &Value, handle: &str) -> Vec<MediaItem> {
    if tweet.get("retweeted_status").is_some() {
        return Vec::new();
    }
    let tweet_id = tweet.get("id_str").and_then(Value::as_str).unwrap_or_default();
    let created_at = tweet
        .get("created_at")
        .and_then(Value::as_str)
        .and_then(parse_twitter_date);
    let media = tweet
        .pointer("/extended_entities/media")
        .or_else(|| tweet.pointer("/entities/media"))
        .and_then(Value::as_array);

    let Some(media) = media else {
        return Vec::new();
    };

    media
        .iter()
        .enumerate()
        .filter_map(|(idx, entry)| {
            let (kind, url) = resolve_media_url(entry)?;
            let media_key = entry
                .get("media_key")
                .and_then(Value::as_str)
                .map(|k| k.rsplit('_').next().unwrap_or(k).to_string())
                .unwrap_or_else(|| idx.to_string());
            Some(MediaItem {
                id: format!("{tweet_id}_{media_key}"),
                tweet_id: tweet_id.to_string(),
                username: handle.to_string(),
                kind,
                url,
                created_at,
                filename_hint: None,
            })
        })
        .collect()
}

/// The legacy API's `created_at` uses a fixed non-RFC3339 layout
/// (`"Wed Oct 10 20:19:24 +0000 2018"`).
fn parse_twitter_date(s: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_str(s, "%a %b %d %H:%M:%S %z %Y")
        .ok()
        .map(|dt| dt.with_timezone(&chrono::Utc))
}

fn decrement_snowflake(id: &str) -> String {
    id.parse::<i128>()
        .map(|n| (n - 1).to_string())
        .unwrap_or_else(|_| id.to_string())
}

fn default_features() -> serde_json::Map<String, Value> {
    let mut map = serde_json::Map::new();
    for name in [
        "responsive_web_graphql_exclude_directive_enabled",
        "verified_phone_label_enabled",
        "responsive_web_graphql_timeline_navigation_enabled",
        "responsive_web_graphql_skip_user_profile_image_extensions_enabled",
        "tweetypie_unmention_optimization_enabled",
        "view_counts_everywhere_api_enabled",
        "longform_notetweets_consumption_enabled",
        "tweet_awards_web_tipping_enabled",
        "freedom_of_speech_not_reach_fetch_enabled",
        "standardized_nudges_misinfo",
        "tweet_with_visibility_results_prefer_gql_media_interstitial_enabled",
        "responsive_web_media_download_video_enabled",
        "rweb_tipjar_consumption_enabled",
        "creator_subscriptions_tweet_preview_api_enabled",
        "responsive_web_enhance_cards_enabled",
    ] {
        map.insert(name.to_string(), json!(true));
    }
    map
}

/// Build the auth-triple rotation from a session: every domain-aligned
/// `(auth_token, ct0)` pair first, then the cross-product of every distinct
/// value found anywhere in the session.
fn build_auth_triples(session: &Session) -> Vec<AuthTriple> {
    let cookies = session.normalized_cookies();
    let guest_token = crate::cookies::value_of(&cookies, "gt")
        .or_else(|| crate::cookies::value_of(&cookies, "guest_id"))
        .map(str::to_string);

    let mut triples = Vec::new();
    let mut seen = std::collections::HashSet::new();

    for domain in crate::cookies::PLATFORM_DOMAINS {
        let auth_token = cookies
            .iter()
            .find(|c| c.domain == domain && c.name.eq_ignore_ascii_case("auth_token"))
            .map(|c| c.value.clone());
        let ct0 = cookies
            .iter()
            .find(|c| c.domain == domain && c.name.eq_ignore_ascii_case("ct0"))
            .map(|c| c.value.clone());
        if let (Some(a), Some(c)) = (auth_token, ct0) {
            if seen.insert(format!("{a}|{c}")) {
                triples.push(AuthTriple {
                    auth_token: a,
                    ct0: c,
                    guest_token: guest_token.clone(),
                });
            }
        }
    }

    let all_auth: Vec<&str> = crate::cookies::values_of(&cookies, "auth_token");
    let all_ct0: Vec<&str> = crate::cookies::values_of(&cookies, "ct0");
    for a in &all_auth {
        for c in &all_ct0 {
            if seen.insert(format!("{a}|{c}")) {
                triples.push(AuthTriple {
                    auth_token: a.to_string(),
                    ct0: c.to_string(),
                    guest_token: guest_token.clone(),
                });
            }
        }
    }

    triples
}

#[async_trait]
impl Scraper for GraphqlScraper {
    async fn initialize(&mut self, session: &Session) -> Result<(), ScraperError> {
        self.auth_triples = build_auth_triples(session);
        self.auth_idx = 0;
        self.bearer_idx = 0;
        self.metadata_refreshed = false;
        if self.auth_triples.is_empty() {
            debug!("no auth triples found in session; guest-only endpoints will be attempted");
        }
        Ok(())
    }

    async fn fetch_user_media(
        &mut self,
        handle: &str,
        options: &FetchOptions,
    ) -> Result<Vec<MediaItem>, ScraperError> {
        let graphql_result = match self.resolve_user_id(handle).await {
            Ok(user_id) => self.paginate_media(&user_id, handle, options).await,
            Err(e) => Err(e),
        };

        match graphql_result {
            Ok(items) => Ok(super::finalize(items, options)),
            Err(e) => {
                warn!("graphql media fetch for @{handle} failed ({e}), falling back to legacy timeline API");
                let items = self.fetch_legacy_timeline(handle, options).await?;
                Ok(super::finalize(items, options))
            }
        }
    }

    async fn close(&mut self) -> Result<(), ScraperError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;

    fn session_with(auth_token: &str, ct0: &str) -> Session {
        Session::from_cookie_text(&format!("auth_token={auth_token}; ct0={ct0}"), true).unwrap()
    }

    #[test]
    fn new_honors_twmd_web_bearer_token_override() {
        // SAFETY: this test owns the lifetime of the var it sets and
        // restores the prior value before returning, but env vars are
        // process-global; run only the assertions that depend on it here.
        let previous = std::env::var("TWMD_WEB_BEARER_TOKEN").ok();
        std::env::set_var("TWMD_WEB_BEARER_TOKEN", "AAAAoverride");
        let scraper = GraphqlScraper::new(Client::new());
        assert_eq!(scraper.current_bearer(), "AAAAoverride");
        match previous {
            Some(v) => std::env::set_var("TWMD_WEB_BEARER_TOKEN", v),
            None => std::env::remove_var("TWMD_WEB_BEARER_TOKEN"),
        }
    }

    #[test]
    fn build_auth_triples_deduplicates_across_domains() {
        let session = session_with("A1", "C1");
        let triples = build_auth_triples(&session);
        // Same pair appears on both platform domains but should collapse to one.
        assert_eq!(triples.len(), 1);
        assert_eq!(triples[0].auth_token, "A1");
        assert_eq!(triples[0].ct0, "C1");
    }

    #[test]
    fn classify_response_detects_feature_flag_rejection() {
        let body = r#"{"errors":[{"message":"Bad Request: features cannot be null: [\"responsive_web_foo\", \"bar_baz\"]"}]}"#;
        let failure = classify_response(StatusCode::BAD_REQUEST, body);
        match failure {
            Err(RequestFailure::FeatureFlagsRequired(names)) => {
                assert_eq!(names, vec!["responsive_web_foo", "bar_baz"]);
            }
            _ => panic!("expected FeatureFlagsRequired"),
        }
    }

    #[test]
    fn classify_response_maps_401_code_32_to_auth_failure() {
        let body = r#"{"errors":[{"message":"Could not authenticate you","code":32}]}"#;
        assert!(matches!(
            classify_response(StatusCode::UNAUTHORIZED, body),
            Err(RequestFailure::Auth)
        ));
    }

    #[test]
    fn classify_response_returns_data_on_success() {
        let body = r#"{"data":{"user":{"result":{"rest_id":"123"}}}}"#;
        let data = classify_response(StatusCode::OK, body).unwrap();
        assert_eq!(data["user"]["result"]["rest_id"], "123");
    }

    #[test]
    fn resolve_media_url_picks_highest_bitrate_mp4_variant() {
        let media = json!({
            "type": "video",
            "video_info": {
                "variants": [
                    {"bitrate": 256000, "content_type": "video/mp4", "url": "https://video.twimg.com/low.mp4"},
                    {"bitrate": 2048000, "content_type": "video/mp4", "url": "https://video.twimg.com/high.mp4"},
                    {"content_type": "application/x-mpegURL", "url": "https://video.twimg.com/playlist.m3u8"},
                ]
            }
        });
        let (kind, url) = resolve_media_url(&media).unwrap();
        assert_eq!(kind, MediaKind::Video);
        assert_eq!(url, "https://video.twimg.com/high.mp4");
    }

    #[test]
    fn resolve_media_url_classifies_tweet_video_path_as_gif() {
        let media = json!({
            "type": "animated_gif",
            "video_info": {
                "variants": [
                    {"content_type": "video/mp4", "url": "https://video.twimg.com/tweet_video/abc.mp4"},
                ]
            }
        });
        let (kind, _) = resolve_media_url(&media).unwrap();
        assert_eq!(kind, MediaKind::Gif);
    }

    #[test]
    fn tweet_result_to_item_drops_retweets_and_mismatched_authors() {
        let tweet = json!({
            "rest_id": "1",
            "legacy": {
                "retweeted_status_result": {},
                "user_id_str": "42",
                "created_at": "Wed Oct 10 20:19:24 +0000 2018",
            }
        });
        assert!(tweet_result_to_item(&tweet, "42", "alice").is_none());

        let mismatched = json!({
            "rest_id": "2",
            "legacy": {
                "user_id_str": "99",
                "created_at": "Wed Oct 10 20:19:24 +0000 2018",
            }
        });
        assert!(tweet_result_to_item(&mismatched, "42", "alice").is_none());
    }

    #[test]
    fn tweet_result_to_item_extracts_photo_media() {
        let tweet = json!({
            "rest_id": "10",
            "legacy": {
                "user_id_str": "42",
                "created_at": "Wed Oct 10 20:19:24 +0000 2018",
                "extended_entities": {
                    "media": [
                        {"type": "photo", "media_key": "3_9999", "media_url_https": "https://pbs.twimg.com/media/abc.jpg"}
                    ]
                }
            }
        });
        let items = tweet_result_to_item(&tweet, "42", "alice").unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "10_9999");
        assert_eq!(items[0].kind, MediaKind::Image);
        assert!(items[0].url.ends_with("?name=orig"));
    }

    #[test]
    fn decrement_snowflake_subtracts_one() {
        assert_eq!(decrement_snowflake("1000"), "999");
    }
}
