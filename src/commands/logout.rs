use crate::error::ErrorKind;
use crate::session::SessionStore;
use tracing::info;

pub fn execute(store: &SessionStore) -> Result<(), ErrorKind> {
    store.clear().map_err(ErrorKind::Internal)?;
    info!("session cleared");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;
    use tempfile::tempdir;

    #[test]
    fn execute_removes_an_existing_session() {
        let dir = tempdir().unwrap();
        let store = SessionStore::with_path(dir.path().join("session.json"));
        store.save(&Session::anonymous()).unwrap();
        execute(&store).unwrap();
        assert!(!store.exists());
    }

    #[test]
    fn execute_on_an_already_logged_out_store_does_not_error() {
        let dir = tempdir().unwrap();
        let store = SessionStore::with_path(dir.path().join("session.json"));
        execute(&store).unwrap();
    }
}
