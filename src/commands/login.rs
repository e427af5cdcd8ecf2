use crate::error::ErrorKind;
use crate::session::{Session, SessionStore};
use anyhow::Context;
use std::path::Path;
use tracing::info;

/// Read cookie text from `cookie_file` (or standard input when absent),
/// normalize it, and persist it as the active session.
pub fn execute(store: &SessionStore, cookie_file: Option<&Path>, strict: bool) -> Result<(), ErrorKind> {
    let raw = match cookie_file {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read cookie file {}", path.display()))
            .map_err(|e| ErrorKind::Usage(e.to_string()))?,
        None => {
            use std::io::Read;
            let mut buf = String::new();
            std::io::stdin()
                .read_to_string(&mut buf)
                .context("failed to read cookies from standard input")
                .map_err(|e| ErrorKind::Usage(e.to_string()))?;
            buf
        }
    };

    let session = Session::from_cookie_text(&raw, strict).map_err(|e| ErrorKind::Auth(e.to_string()))?;
    store.save(&session).map_err(ErrorKind::Internal)?;
    info!("session saved with {} cookie(s)", session.cookies.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn execute_reads_a_cookie_file_and_saves_a_session() {
        let dir = tempdir().unwrap();
        let cookie_path = dir.path().join("cookies.txt");
        std::fs::write(&cookie_path, "auth_token=A1; ct0=C1").unwrap();

        let store = SessionStore::with_path(dir.path().join("session.json"));
        execute(&store, Some(&cookie_path), true).unwrap();
        assert!(store.load().unwrap().unwrap().valid);
    }

    #[test]
    fn execute_rejects_missing_required_cookies_in_strict_mode() {
        let dir = tempdir().unwrap();
        let cookie_path = dir.path().join("cookies.txt");
        std::fs::write(&cookie_path, "auth_token=A1").unwrap();

        let store = SessionStore::with_path(dir.path().join("session.json"));
        let err = execute(&store, Some(&cookie_path), true).unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }
}
