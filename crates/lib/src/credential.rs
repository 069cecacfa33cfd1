//! Session credential: token + user identity persisted locally between runs.
//!
//! The record is stored as JSON (`{"token": "...", "user": {"id": ..., "name": "..."}}`).
//! Storage goes through [`CredentialStore`] so views never touch the medium directly;
//! [`FileCredentialStore`] is used by the applications, [`MemoryCredentialStore`] by tests.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::api::id_string;

/// User identity carried inside the credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    #[serde(deserialize_with = "id_string")]
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// Opaque bearer token plus the user it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub token: String,
    pub user: User,
}

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("no stored credential")]
    Absent,
    #[error("stored credential is not valid JSON: {0}")]
    Malformed(String),
    #[error("stored credential has no token")]
    MissingToken,
    #[error("stored credential has no user")]
    MissingUser,
    #[error("stored credential is unreadable: {0}")]
    Unreadable(#[source] std::io::Error),
    #[error("credential storage failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Loose shape used to tell "missing field" apart from "wrong JSON".
#[derive(Deserialize)]
struct RawCredential {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    user: Option<serde_json::Value>,
}

impl Credential {
    pub fn new(token: impl Into<String>, user_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            user: User {
                id: user_id.into(),
                name: name.into(),
            },
        }
    }

    /// Parse a stored record. An empty token or a null/absent user counts as missing.
    pub fn parse(raw: &str) -> Result<Self, CredentialError> {
        let rec: RawCredential =
            serde_json::from_str(raw).map_err(|e| CredentialError::Malformed(e.to_string()))?;
        let token = rec
            .token
            .filter(|t| !t.trim().is_empty())
            .ok_or(CredentialError::MissingToken)?;
        let user = match rec.user {
            None | Some(serde_json::Value::Null) => return Err(CredentialError::MissingUser),
            Some(v) => serde_json::from_value::<User>(v)
                .map_err(|e| CredentialError::Malformed(e.to_string()))?,
        };
        Ok(Self { token, user })
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Persistence medium for the raw credential record.
pub trait CredentialStore: Send + Sync {
    /// Raw stored record, or None when nothing is stored. A record that exists but cannot be
    /// read as text is an error.
    fn read(&self) -> std::io::Result<Option<String>>;
    fn write(&self, raw: &str) -> std::io::Result<()>;
    fn remove(&self);
}

/// Credential record in a JSON file (default `~/.coach/auth.json`).
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialStore for FileCredentialStore {
    fn read(&self) -> std::io::Result<Option<String>> {
        let bytes = match std::fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        String::from_utf8(bytes)
            .map(Some)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Writes to a sibling temp file first, then renames over the record.
    fn write(&self, raw: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self
            .path
            .with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
        std::fs::write(&tmp, raw)?;
        std::fs::rename(&tmp, &self.path).inspect_err(|_| {
            let _ = std::fs::remove_file(&tmp);
        })
    }

    fn remove(&self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => log::debug!("removed credential at {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => log::warn!("removing credential at {}: {}", self.path.display(), e),
        }
    }
}

/// In-process credential record.
#[derive(Default)]
pub struct MemoryCredentialStore {
    inner: Mutex<Option<String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_raw(raw: impl Into<String>) -> Self {
        Self {
            inner: Mutex::new(Some(raw.into())),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn read(&self) -> std::io::Result<Option<String>> {
        Ok(self.inner.lock().ok().and_then(|g| g.clone()))
    }

    fn write(&self, raw: &str) -> std::io::Result<()> {
        if let Ok(mut g) = self.inner.lock() {
            *g = Some(raw.to_string());
        }
        Ok(())
    }

    fn remove(&self) {
        if let Ok(mut g) = self.inner.lock() {
            *g = None;
        }
    }
}

/// Reads, saves, and purges the credential through a store.
#[derive(Clone)]
pub struct SessionProvider {
    store: Arc<dyn CredentialStore>,
}

impl SessionProvider {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }

    /// Current credential; Absent when nothing is stored.
    pub fn current(&self) -> Result<Credential, CredentialError> {
        let raw = self
            .store
            .read()
            .map_err(CredentialError::Unreadable)?
            .ok_or(CredentialError::Absent)?;
        Credential::parse(&raw)
    }

    pub fn save(&self, credential: &Credential) -> Result<(), CredentialError> {
        self.store.write(&credential.to_json())?;
        Ok(())
    }

    pub fn purge(&self) {
        self.store.remove();
    }

    /// Display name of the stored user, if a well-formed record exists.
    pub fn user_name(&self) -> Option<String> {
        self.current()
            .ok()
            .map(|c| c.user.name)
            .filter(|n| !n.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_numeric_user_id() {
        let c = Credential::parse(r#"{"token":"t-1","user":{"id":17,"name":"Dewi"}}"#).unwrap();
        assert_eq!(c.token, "t-1");
        assert_eq!(c.user.id, "17");
        assert_eq!(c.user.name, "Dewi");
    }

    #[test]
    fn parse_rejects_missing_or_empty_token() {
        assert!(matches!(
            Credential::parse(r#"{"user":{"id":"u"}}"#),
            Err(CredentialError::MissingToken)
        ));
        assert!(matches!(
            Credential::parse(r#"{"token":"  ","user":{"id":"u"}}"#),
            Err(CredentialError::MissingToken)
        ));
    }

    #[test]
    fn parse_rejects_missing_or_null_user() {
        assert!(matches!(
            Credential::parse(r#"{"token":"t"}"#),
            Err(CredentialError::MissingUser)
        ));
        assert!(matches!(
            Credential::parse(r#"{"token":"t","user":null}"#),
            Err(CredentialError::MissingUser)
        ));
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(matches!(
            Credential::parse("not json"),
            Err(CredentialError::Malformed(_))
        ));
        assert!(matches!(
            Credential::parse(r#"{"token":"t","user":"someone"}"#),
            Err(CredentialError::Malformed(_))
        ));
    }

    #[test]
    fn provider_save_then_current() {
        let provider = SessionProvider::new(Arc::new(MemoryCredentialStore::new()));
        assert!(matches!(provider.current(), Err(CredentialError::Absent)));
        let c = Credential::new("tok", "u-1", "Ayu");
        provider.save(&c).unwrap();
        assert_eq!(provider.current().unwrap(), c);
        assert_eq!(provider.user_name().as_deref(), Some("Ayu"));
        provider.purge();
        assert!(matches!(provider.current(), Err(CredentialError::Absent)));
    }

    #[test]
    fn file_store_round_trip_and_remove() {
        let dir = std::env::temp_dir().join(format!("coach-cred-test-{}", uuid::Uuid::new_v4()));
        let store = FileCredentialStore::new(dir.join("auth.json"));
        assert!(store.read().unwrap().is_none());
        store.write(r#"{"token":"a","user":{"id":"1"}}"#).unwrap();
        assert_eq!(
            store.read().unwrap().as_deref(),
            Some(r#"{"token":"a","user":{"id":"1"}}"#)
        );
        store.remove();
        assert!(store.read().unwrap().is_none());
        store.remove();
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn non_utf8_record_is_unreadable_not_absent() {
        let dir = std::env::temp_dir().join(format!("coach-cred-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("auth.json");
        std::fs::write(&path, [0xff, 0xfe, b'{']).unwrap();
        let store = FileCredentialStore::new(path.clone());
        assert_eq!(
            store.read().unwrap_err().kind(),
            std::io::ErrorKind::InvalidData
        );
        let provider = SessionProvider::new(Arc::new(store));
        assert!(matches!(
            provider.current(),
            Err(CredentialError::Unreadable(_))
        ));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
