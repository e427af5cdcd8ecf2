use crate::cookies::{self, REQUIRED_COOKIE_NAMES};
use crate::error::ErrorKind;
use crate::session::SessionStore;

#[derive(Debug)]
pub struct WhoAmI {
    pub logged_in: bool,
    pub updated_at: Option<String>,
}

/// Report whether a valid session is on disk, without revealing any
/// cookie value.
pub fn execute(store: &SessionStore) -> Result<WhoAmI, ErrorKind> {
    let session = store.load().map_err(ErrorKind::Internal)?;
    match session {
        None => Ok(WhoAmI {
            logged_in: false,
            updated_at: None,
        }),
        Some(session) => {
            let normalized = session.normalized_cookies();
            let missing = cookies::missing_required(&normalized, &REQUIRED_COOKIE_NAMES);
            if !missing.is_empty() || !session.valid {
                return Err(ErrorKind::Auth(format!(
                    "session is missing required cookies: {}",
                    missing.join(", ")
                )));
            }
            Ok(WhoAmI {
                logged_in: true,
                updated_at: Some(session.updated_at.to_rfc3339()),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;
    use tempfile::tempdir;

    #[test]
    fn reports_logged_out_when_no_session_file_exists() {
        let dir = tempdir().unwrap();
        let store = SessionStore::with_path(dir.path().join("session.json"));
        let who = execute(&store).unwrap();
        assert!(!who.logged_in);
    }

    #[test]
    fn reports_logged_in_for_a_valid_session() {
        let dir = tempdir().unwrap();
        let store = SessionStore::with_path(dir.path().join("session.json"));
        store
            .save(&Session::from_cookie_text("auth_token=A1; ct0=C1", true).unwrap())
            .unwrap();
        assert!(execute(&store).unwrap().logged_in);
    }

    #[test]
    fn auth_errors_when_required_cookies_are_missing() {
        let dir = tempdir().unwrap();
        let store = SessionStore::with_path(dir.path().join("session.json"));
        store
            .save(&Session::from_cookie_text("auth_token=A1; ct0=C1", true).unwrap())
            .unwrap();

        // Corrupt the saved session so it no longer carries ct0.
        let mut session = store.load().unwrap().unwrap();
        session.cookies.retain(|c| !c.starts_with("ct0"));
        store.save(&session).unwrap();

        let err = execute(&store).unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }
}
