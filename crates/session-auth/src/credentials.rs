//! Credential storage for the session token pair
//!
//! The store is the single owner of the access/refresh pair. The client reads
//! it through `CredentialStore::get()` at most once per attempt and never
//! caches it beyond that; renewal writes through `set()` and unrecoverable
//! auth failures wipe it through `clear()`.
//!
//! Expiry deltas handed to `set()` are converted to absolute unix
//! milliseconds at storage time.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use common::Secret;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::constants::UNSET_TOKEN_MARKERS;
use crate::error::{Error, Result};

/// Boxed future returned by `CredentialStore` methods (keeps the trait dyn-compatible).
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Current unix time in milliseconds.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// A token is usable when it is non-empty and not a stringified null.
pub fn is_valid_token(token: &str) -> bool {
    !token.is_empty() && !UNSET_TOKEN_MARKERS.contains(&token)
}

/// Snapshot of the stored session.
///
/// Expiry fields are absolute unix timestamps in milliseconds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Credential {
    pub access_token: Option<Secret<String>>,
    pub refresh_token: Option<Secret<String>>,
    pub access_expires_at: Option<u64>,
    pub refresh_expires_at: Option<u64>,
}

impl Credential {
    /// Access token to send as `Authorization: Bearer`.
    pub fn access_token(&self) -> Option<&str> {
        self.access_token
            .as_ref()
            .map(|t| t.expose().as_str())
            .filter(|t| is_valid_token(t))
    }

    /// Refresh token, treated as absent once its recorded expiry has passed.
    pub fn refresh_token_at(&self, now_millis: u64) -> Option<&str> {
        if self.refresh_expires_at.is_some_and(|at| at <= now_millis) {
            return None;
        }
        self.refresh_token
            .as_ref()
            .map(|t| t.expose().as_str())
            .filter(|t| is_valid_token(t))
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token_at(now_millis())
    }

    pub fn is_empty(&self) -> bool {
        self.access_token().is_none() && self.refresh_token().is_none()
    }

    /// Merge a grant into this credential.
    ///
    /// The access token is always replaced. The refresh token is only
    /// replaced when the grant carries one; otherwise the old one is kept
    /// along with its expiry.
    fn apply(&mut self, grant: TokenGrant, now_millis: u64) {
        self.access_token = Some(Secret::new(grant.access_token));
        self.access_expires_at = grant.expires_in.map(|s| now_millis + s * 1000);
        if let Some(refresh) = grant.refresh_token.filter(|t| is_valid_token(t)) {
            self.refresh_token = Some(Secret::new(refresh));
            self.refresh_expires_at = grant.refresh_expires_in.map(|s| now_millis + s * 1000);
        }
    }
}

/// Tokens handed to `CredentialStore::set()`.
///
/// `expires_in` / `refresh_expires_in` are deltas in seconds.
#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<u64>,
    pub refresh_expires_in: Option<u64>,
}

impl TokenGrant {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: Some(refresh_token.into()),
            expires_in: None,
            refresh_expires_in: None,
        }
    }

    pub fn with_expiry(mut self, expires_in: Option<u64>, refresh_expires_in: Option<u64>) -> Self {
        self.expires_in = expires_in;
        self.refresh_expires_in = refresh_expires_in;
        self
    }
}

/// Persistence contract for the session credential.
///
/// Implementations must be safe to call from any task and must behave as a
/// no-op, never an error, where no persistent storage exists.
pub trait CredentialStore: Send + Sync {
    fn get(&self) -> StoreFuture<'_, Credential>;

    fn set(&self, grant: TokenGrant) -> StoreFuture<'_, Result<()>>;

    fn clear(&self) -> StoreFuture<'_, Result<()>>;
}

/// Process-local store. Lost on exit.
#[derive(Default)]
pub struct MemoryCredentialStore {
    state: Mutex<Credential>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with an existing token pair.
    pub fn with_tokens(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        let mut credential = Credential::default();
        credential.apply(TokenGrant::new(access_token, refresh_token), now_millis());
        Self {
            state: Mutex::new(credential),
        }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn get(&self) -> StoreFuture<'_, Credential> {
        Box::pin(async move { self.state.lock().await.clone() })
    }

    fn set(&self, grant: TokenGrant) -> StoreFuture<'_, Result<()>> {
        Box::pin(async move {
            self.state.lock().await.apply(grant, now_millis());
            Ok(())
        })
    }

    fn clear(&self) -> StoreFuture<'_, Result<()>> {
        Box::pin(async move {
            *self.state.lock().await = Credential::default();
            Ok(())
        })
    }
}

/// Store for environments without persistent storage: always empty.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCredentialStore;

impl CredentialStore for NoopCredentialStore {
    fn get(&self) -> StoreFuture<'_, Credential> {
        Box::pin(async { Credential::default() })
    }

    fn set(&self, _grant: TokenGrant) -> StoreFuture<'_, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    fn clear(&self) -> StoreFuture<'_, Result<()>> {
        Box::pin(async { Ok(()) })
    }
}

/// On-disk layout of the credential file.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredCredential {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    auth_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    auth_token_expires_at: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token_expires_at: Option<u64>,
}

impl From<StoredCredential> for Credential {
    fn from(stored: StoredCredential) -> Self {
        Self {
            access_token: stored.auth_token.map(Secret::new),
            refresh_token: stored.refresh_token.map(Secret::new),
            access_expires_at: stored.auth_token_expires_at,
            refresh_expires_at: stored.refresh_token_expires_at,
        }
    }
}

impl From<&Credential> for StoredCredential {
    fn from(credential: &Credential) -> Self {
        Self {
            auth_token: credential.access_token.as_ref().map(|t| t.expose().clone()),
            refresh_token: credential.refresh_token.as_ref().map(|t| t.expose().clone()),
            auth_token_expires_at: credential.access_expires_at,
            refresh_token_expires_at: credential.refresh_expires_at,
        }
    }
}

/// JSON-file store.
///
/// The in-memory copy is authoritative for reads; every write persists the
/// whole record with an atomic temp-file + rename. A tokio Mutex serializes
/// writes from renewal and from explicit login/logout.
pub struct FileCredentialStore {
    path: PathBuf,
    state: Mutex<Credential>,
}

impl FileCredentialStore {
    /// Load the credential file, creating an empty one on cold start.
    pub async fn load(path: PathBuf) -> Result<Self> {
        let credential = if path.exists() {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| Error::Io(format!("reading credential file: {e}")))?;
            let stored: StoredCredential = serde_json::from_str(&contents)
                .map_err(|e| Error::CredentialParse(format!("parsing credential file: {e}")))?;
            let credential = Credential::from(stored);
            info!(
                path = %path.display(),
                has_session = !credential.is_empty(),
                "loaded credentials"
            );
            credential
        } else {
            info!(path = %path.display(), "credential file not found, starting signed out");
            let credential = Credential::default();
            write_atomic(&path, &credential).await?;
            credential
        };

        Ok(Self {
            path,
            state: Mutex::new(credential),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CredentialStore for FileCredentialStore {
    fn get(&self) -> StoreFuture<'_, Credential> {
        Box::pin(async move { self.state.lock().await.clone() })
    }

    fn set(&self, grant: TokenGrant) -> StoreFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            state.apply(grant, now_millis());
            debug!("stored session tokens");
            write_atomic(&self.path, &state).await
        })
    }

    fn clear(&self) -> StoreFuture<'_, Result<()>> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            *state = Credential::default();
            debug!("cleared session tokens");
            write_atomic(&self.path, &state).await
        })
    }
}

/// Write the credential file atomically with 0600 permissions on unix.
async fn write_atomic(path: &Path, credential: &Credential) -> Result<()> {
    let json = serde_json::to_string_pretty(&StoredCredential::from(credential))
        .map_err(|e| Error::CredentialParse(format!("serializing credentials: {e}")))?;

    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    let tmp_path = dir.join(format!(".credentials.tmp.{}", std::process::id()));

    tokio::fs::write(&tmp_path, json.as_bytes())
        .await
        .map_err(|e| Error::Io(format!("writing temp credential file: {e}")))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let perms = std::fs::Permissions::from_mode(0o600);
        tokio::fs::set_permissions(&tmp_path, perms)
            .await
            .map_err(|e| Error::Io(format!("setting credential file permissions: {e}")))?;
    }

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| Error::Io(format!("renaming temp credential file: {e}")))?;

    debug!(path = %path.display(), "persisted credentials");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_tokens_are_invalid() {
        assert!(is_valid_token("at_1"));
        assert!(!is_valid_token(""));
        assert!(!is_valid_token("undefined"));
        assert!(!is_valid_token("null"));
    }

    #[test]
    fn expired_refresh_token_reads_as_absent() {
        let mut credential = Credential::default();
        credential.apply(
            TokenGrant::new("at", "rt").with_expiry(Some(60), Some(120)),
            1_000,
        );
        assert_eq!(credential.access_expires_at, Some(61_000));
        assert_eq!(credential.refresh_token_at(120_999), Some("rt"));
        assert_eq!(credential.refresh_token_at(121_000), None);
    }

    #[test]
    fn grant_without_refresh_keeps_previous_refresh() {
        let mut credential = Credential::default();
        credential.apply(TokenGrant::new("at_1", "rt_1"), 0);

        let grant = TokenGrant {
            access_token: "at_2".into(),
            refresh_token: None,
            expires_in: None,
            refresh_expires_in: None,
        };
        credential.apply(grant, 0);

        assert_eq!(credential.access_token(), Some("at_2"));
        assert_eq!(credential.refresh_token_at(0), Some("rt_1"));
    }

    #[tokio::test]
    async fn memory_store_set_get_clear() {
        let store = MemoryCredentialStore::new();
        assert!(store.get().await.is_empty());

        store.set(TokenGrant::new("at_1", "rt_1")).await.unwrap();
        let credential = store.get().await;
        assert_eq!(credential.access_token(), Some("at_1"));
        assert_eq!(credential.refresh_token(), Some("rt_1"));

        store.clear().await.unwrap();
        assert!(store.get().await.is_empty());
    }

    #[tokio::test]
    async fn noop_store_is_always_empty() {
        let store = NoopCredentialStore;
        store.set(TokenGrant::new("at", "rt")).await.unwrap();
        assert!(store.get().await.is_empty());
        store.clear().await.unwrap();
    }

    #[tokio::test]
    async fn file_store_cold_start_creates_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");

        let store = FileCredentialStore::load(path.clone()).await.unwrap();
        assert!(store.get().await.is_empty());
        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), "{}");
    }

    #[tokio::test]
    async fn file_store_roundtrip_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");

        let store = FileCredentialStore::load(path.clone()).await.unwrap();
        store
            .set(TokenGrant::new("at_disk", "rt_disk").with_expiry(Some(3600), None))
            .await
            .unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let raw: serde_json::Value = serde_json::from_str(&contents).unwrap();
        assert_eq!(raw["auth_token"], "at_disk");
        assert_eq!(raw["refresh_token"], "rt_disk");
        assert!(raw["auth_token_expires_at"].as_u64().is_some());

        let reloaded = FileCredentialStore::load(path).await.unwrap();
        let credential = reloaded.get().await;
        assert_eq!(credential.access_token(), Some("at_disk"));
        assert_eq!(credential.refresh_token(), Some("rt_disk"));
    }

    #[tokio::test]
    async fn file_store_clear_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");

        let store = FileCredentialStore::load(path.clone()).await.unwrap();
        store.set(TokenGrant::new("at", "rt")).await.unwrap();
        store.clear().await.unwrap();

        let reloaded = FileCredentialStore::load(path).await.unwrap();
        assert!(reloaded.get().await.is_empty());
    }

    #[tokio::test]
    async fn file_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        tokio::fs::write(&path, "{not json").await.unwrap();

        let result = FileCredentialStore::load(path).await;
        assert!(matches!(result, Err(Error::CredentialParse(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_permissions_are_0600() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");

        let store = FileCredentialStore::load(path.clone()).await.unwrap();
        store.set(TokenGrant::new("at", "rt")).await.unwrap();

        let metadata = tokio::fs::metadata(&path).await.unwrap();
        let mode = metadata.permissions().mode() & 0o777;
        assert_eq!(mode, 0o600, "credential file must be 0600, got {mode:o}");
    }
}
