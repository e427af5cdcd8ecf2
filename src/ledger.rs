use crate::model::MediaItem;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use url::Url;

const LEDGER_VERSION: u32 = 1;
const LEDGER_DIR: &str = ".engine-cache";
const LEDGER_FILE: &str = "downloaded-media.json";

#[derive(Debug, Serialize, Deserialize)]
struct LedgerFile {
    version: u32,
    updated_at: DateTime<Utc>,
    media_keys: Vec<String>,
}

/// Tracks which media items have already been downloaded for a given
/// `outputDir`, persisted as a single JSON file so reruns skip work that
/// already landed on disk.
pub struct Ledger {
    path: PathBuf,
    keys: BTreeSet<String>,
}

impl Ledger {
    /// Load the ledger for `output_dir`. A missing or unparsable file
    /// degrades silently to an empty ledger rather than failing the run.
    pub fn load(output_dir: &Path) -> Self {
        let path = output_dir.join(LEDGER_DIR).join(LEDGER_FILE);
        let keys = fs::read_to_string(&path)
            .ok()
            .and_then(|data| serde_json::from_str::<LedgerFile>(&data).ok())
            .map(|f| f.media_keys.into_iter().collect())
            .unwrap_or_default();
        Ledger { path, keys }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn record(&mut self, key: String) {
        self.keys.insert(key);
    }

    /// Write the ledger atomically (write-to-temp, then rename).
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let file = LedgerFile {
            version: LEDGER_VERSION,
            updated_at: Utc::now(),
            media_keys: self.keys.iter().cloned().collect(),
        };
        let data = serde_json::to_string_pretty(&file).context("failed to serialize ledger")?;
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, data)
            .with_context(|| format!("failed to write {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &self.path)
            .with_context(|| format!("failed to replace {}", self.path.display()))?;
        debug!("wrote ledger with {} keys to {}", self.keys.len(), self.path.display());
        Ok(())
    }
}

/// Compute the ledger key for a media item:
/// `lower(username) | tweetId | kind | normalize-url-for-key(url)`.
pub fn key_for(item: &MediaItem) -> String {
    format!(
        "{}|{}|{}|{}",
        item.username.to_ascii_lowercase(),
        item.tweet_id,
        item.kind.as_str(),
        normalize_url_for_key(&item.url),
    )
}

/// Drop the query string and fragment so re-signed CDN URLs for the same
/// asset still hash to the same key.
fn normalize_url_for_key(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) => {
            parsed.set_query(None);
            parsed.set_fragment(None);
            parsed.into()
        }
        Err(_) => url.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MediaKind;
    use tempfile::tempdir;

    fn item(username: &str, tweet_id: &str, url: &str) -> MediaItem {
        MediaItem {
            id: format!("{tweet_id}_m1"),
            tweet_id: tweet_id.to_string(),
            username: username.to_string(),
            kind: MediaKind::Image,
            url: url.to_string(),
            created_at: None,
            filename_hint: None,
        }
    }

    #[test]
    fn key_for_ignores_query_string() {
        let a = item("Alice", "t1", "https://pbs.twimg.com/media/x?name=orig");
        let b = item("Alice", "t1", "https://pbs.twimg.com/media/x?name=small");
        assert_eq!(key_for(&a), key_for(&b));
    }

    #[test]
    fn key_for_is_case_insensitive_on_username() {
        let a = item("Alice", "t1", "https://pbs.twimg.com/media/x");
        let b = item("alice", "t1", "https://pbs.twimg.com/media/x");
        assert_eq!(key_for(&a), key_for(&b));
    }

    #[test]
    fn missing_ledger_file_loads_empty() {
        let dir = tempdir().unwrap();
        let ledger = Ledger::load(dir.path());
        assert!(!ledger.contains("anything"));
    }

    #[test]
    fn save_then_load_round_trips_recorded_keys() {
        let dir = tempdir().unwrap();
        let mut ledger = Ledger::load(dir.path());
        ledger.record("alice|t1|image|https://pbs.twimg.com/media/x".to_string());
        ledger.save().unwrap();

        let reloaded = Ledger::load(dir.path());
        assert!(reloaded.contains("alice|t1|image|https://pbs.twimg.com/media/x"));
    }

    #[test]
    fn corrupt_ledger_file_degrades_to_empty_rather_than_erroring() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join(LEDGER_DIR)).unwrap();
        fs::write(dir.path().join(LEDGER_DIR).join(LEDGER_FILE), "not json").unwrap();
        let ledger = Ledger::load(dir.path());
        assert!(!ledger.contains("anything"));
    }
}
