use crate::cookies::{self, NormalizedCookie, REQUIRED_COOKIE_NAMES};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Persisted credential bundle for a logged-in account.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub cookies: Vec<String>,
    pub updated_at: DateTime<Utc>,
    pub valid: bool,
}

impl Session {
    /// A placeholder session used when no credentials are on disk, so the
    /// scraper can still be initialized and run against guest-accessible
    /// endpoints where the platform allows it.
    pub fn anonymous() -> Self {
        Session {
            cookies: Vec::new(),
            updated_at: Utc::now(),
            valid: false,
        }
    }

    pub fn from_cookie_text(raw: &str, strict: bool) -> Result<Self> {
        let normalized = cookies::normalize(raw)?;
        if strict {
            let missing = cookies::missing_required(&normalized, &REQUIRED_COOKIE_NAMES);
            if !missing.is_empty() {
                anyhow::bail!("missing required cookies: {}", missing.join(", "));
            }
        }
        Ok(Session {
            cookies: normalized
                .into_iter()
                .map(|c| format!("{}={}; Domain={}", c.name, c.value, c.domain))
                .collect(),
            updated_at: Utc::now(),
            valid: true,
        })
    }

    pub fn normalized_cookies(&self) -> Vec<NormalizedCookie> {
        self.cookies
            .iter()
            .flat_map(|line| cookies::normalize(line).unwrap_or_default())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }
}

/// Loads and persists a [`Session`] under `<home>/.<appName>/session.json`.
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(app_name: &str) -> Result<Self> {
        let home = dirs::home_dir().context("could not determine home directory")?;
        let path = home.join(format!(".{app_name}")).join("session.json");
        Ok(SessionStore { path })
    }

    pub fn with_path(path: PathBuf) -> Self {
        SessionStore { path }
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    pub fn load(&self) -> Result<Option<Session>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let data = fs::read_to_string(&self.path)
            .with_context(|| format!("failed to read session file {}", self.path.display()))?;
        let session: Session = serde_json::from_str(&data)
            .with_context(|| format!("failed to parse session file {}", self.path.display()))?;
        Ok(Some(session))
    }

    pub fn save(&self, session: &Session) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let data = serde_json::to_string_pretty(session).context("failed to serialize session")?;
        fs::write(&self.path, data)
            .with_context(|| format!("failed to write session file {}", self.path.display()))?;
        set_owner_only_permissions(&self.path)?;
        Ok(())
    }

    pub fn clear(&self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)
                .with_context(|| format!("failed to remove session file {}", self.path.display()))?;
        }
        Ok(())
    }
}

#[cfg(unix)]
fn set_owner_only_permissions(path: &std::path::Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(0o600);
    fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn set_owner_only_permissions(_path: &std::path::Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn load_returns_none_when_absent() {
        let dir = tempdir().unwrap();
        let store = SessionStore::with_path(dir.path().join("session.json"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let store = SessionStore::with_path(dir.path().join("nested").join("session.json"));
        let session = Session::from_cookie_text("auth_token=A1; ct0=C1", true).unwrap();
        store.save(&session).unwrap();

        let loaded = store.load().unwrap().expect("session should be present");
        assert_eq!(loaded.cookies.len(), session.cookies.len());
        assert!(loaded.valid);
    }

    #[cfg(unix)]
    #[test]
    fn save_sets_owner_only_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempdir().unwrap();
        let store = SessionStore::with_path(dir.path().join("session.json"));
        let session = Session::anonymous();
        store.save(&session).unwrap();
        let mode = fs::metadata(dir.path().join("session.json"))
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(mode, 0o600);
    }

    #[test]
    fn clear_removes_an_existing_file_and_is_a_no_op_otherwise() {
        let dir = tempdir().unwrap();
        let store = SessionStore::with_path(dir.path().join("session.json"));
        store.save(&Session::anonymous()).unwrap();
        assert!(store.exists());
        store.clear().unwrap();
        assert!(!store.exists());
        // Clearing again should not error.
        store.clear().unwrap();
    }

    #[test]
    fn strict_mode_rejects_missing_ct0() {
        let err = Session::from_cookie_text("auth_token=A1; dummy=1", true).unwrap_err();
        assert!(err.to_string().contains("ct0"));
    }
}
