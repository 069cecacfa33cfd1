//! Session guard: every protected view asks here before rendering or calling the API.
//!
//! Trust-on-read: the stored record is only checked for shape. A forged or expired token is
//! noticed when the server answers 401/403, at which point views call [`SessionGuard::expire`].

use std::sync::Arc;

use crate::credential::{Credential, CredentialError, SessionProvider};
use crate::route::{Navigator, Route};

#[derive(Clone)]
pub struct SessionGuard {
    provider: SessionProvider,
    navigator: Arc<dyn Navigator>,
}

impl SessionGuard {
    pub fn new(provider: SessionProvider, navigator: Arc<dyn Navigator>) -> Self {
        Self {
            provider,
            navigator,
        }
    }

    pub fn provider(&self) -> &SessionProvider {
        &self.provider
    }

    pub fn navigator(&self) -> &Arc<dyn Navigator> {
        &self.navigator
    }

    /// Return the stored credential, or purge it and send the user to login.
    pub fn require(&self) -> Option<Credential> {
        match self.provider.current() {
            Ok(c) => Some(c),
            Err(CredentialError::Absent) => {
                log::info!("session guard: no credential, redirecting to login");
                self.navigator.navigate(Route::Login);
                None
            }
            Err(e) => {
                log::info!("session guard: {}, purging and redirecting to login", e);
                self.provider.purge();
                self.navigator.navigate(Route::Login);
                None
            }
        }
    }

    /// The server rejected the credential: purge it and go to login.
    pub fn expire(&self) {
        log::info!("session guard: credential rejected by server, signing out");
        self.provider.purge();
        self.navigator.navigate(Route::Login);
    }

    /// Explicit sign-out.
    pub fn logout(&self) {
        log::info!("signing out");
        self.provider.purge();
        self.navigator.navigate(Route::Login);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::{CredentialStore, FileCredentialStore, MemoryCredentialStore};
    use crate::route::MemoryNavigator;

    fn guard_with(raw: Option<&str>) -> (SessionGuard, Arc<MemoryCredentialStore>, Arc<MemoryNavigator>) {
        let store = Arc::new(match raw {
            Some(r) => MemoryCredentialStore::with_raw(r),
            None => MemoryCredentialStore::new(),
        });
        let nav = Arc::new(MemoryNavigator::new(Route::Explore));
        let guard = SessionGuard::new(SessionProvider::new(store.clone()), nav.clone());
        (guard, store, nav)
    }

    #[test]
    fn valid_record_passes_without_navigation() {
        let (guard, store, nav) = guard_with(Some(r#"{"token":"t","user":{"id":1,"name":"Rina"}}"#));
        let c = guard.require().expect("authenticated");
        assert_eq!(c.user.id, "1");
        assert_eq!(nav.current(), Route::Explore);
        assert!(store.read().unwrap().is_some());
    }

    #[test]
    fn absent_or_malformed_records_redirect_and_purge() {
        for raw in [
            None,
            Some(""),
            Some("{"),
            Some("[]"),
            Some(r#"{"user":{"id":1}}"#),
            Some(r#"{"token":"","user":{"id":1}}"#),
            Some(r#"{"token":"t"}"#),
            Some(r#"{"token":"t","user":null}"#),
        ] {
            let (guard, store, nav) = guard_with(raw);
            assert!(guard.require().is_none(), "record {raw:?}");
            assert_eq!(nav.current(), Route::Login, "record {raw:?}");
            assert!(store.read().unwrap().is_none(), "record {raw:?} not purged");
        }
    }

    #[test]
    fn unreadable_record_file_is_purged() {
        let dir = std::env::temp_dir().join(format!("coach-guard-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("auth.json");
        std::fs::write(&path, [0xff, 0xfe, b'{']).unwrap();
        let nav = Arc::new(MemoryNavigator::new(Route::Explore));
        let store = Arc::new(FileCredentialStore::new(path.clone()));
        let guard = SessionGuard::new(SessionProvider::new(store), nav.clone());

        assert!(guard.require().is_none());
        assert_eq!(nav.current(), Route::Login);
        assert!(!path.exists(), "unreadable record survived");
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn expire_purges_and_redirects() {
        let (guard, store, nav) = guard_with(Some(r#"{"token":"t","user":{"id":1}}"#));
        guard.expire();
        assert!(store.read().unwrap().is_none());
        assert_eq!(nav.current(), Route::Login);
    }
}
