//! Drive session state: the OAuth token and where it is persisted.
//!
//! A [`Session`] is created explicitly with [`Session::load`] at startup and
//! written back with [`Session::persist`]. Every token change made through
//! [`Session::install`] is persisted immediately, so a restart never forces
//! a new authorization while the refresh token is still valid.

use crate::error::DistributorError;
use crate::output::write_atomic;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Seconds before nominal expiry at which a token is treated as expired.
const EXPIRY_MARGIN_SECS: i64 = 300;

/// An OAuth token as returned by the provider's token endpoint.
///
/// Unknown fields of the provider response are ignored; `obtained_at` is
/// filled in locally.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
    /// Lifetime in seconds, as reported by the provider.
    #[serde(default)]
    pub expires_in: i64,
    #[serde(default)]
    pub scope: String,
    /// Unix time the token was received. 0 when unknown.
    #[serde(default)]
    pub obtained_at: i64,
}

impl TokenRecord {
    /// Stamp a freshly issued token with the current time.
    pub fn issued_now(mut self) -> Self {
        self.obtained_at = chrono::Utc::now().timestamp();
        self
    }

    /// Unix time after which the token should no longer be used.
    pub fn expires_at(&self) -> Option<i64> {
        (self.obtained_at > 0 && self.expires_in > 0).then(|| self.obtained_at + self.expires_in)
    }

    /// Whether the token is past (or close to) its expiry at unix time `now`.
    /// Tokens with unknown lifetime are never considered expired.
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expires_at()
            .is_some_and(|at| now >= at - EXPIRY_MARGIN_SECS)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(chrono::Utc::now().timestamp())
    }

    pub fn can_refresh(&self) -> bool {
        !self.refresh_token.is_empty()
    }
}

impl fmt::Debug for TokenRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenRecord")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &(!self.refresh_token.is_empty()).then_some("<redacted>"))
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .field("obtained_at", &self.obtained_at)
            .finish()
    }
}

/// JSON file holding one [`TokenRecord`].
#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored token. A missing file yields `None`; an unreadable
    /// or malformed file is logged and also yields `None`, so a damaged
    /// token file only costs a re-authorization.
    pub async fn load(&self) -> Option<TokenRecord> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No token file at {}", self.path.display());
                return None;
            }
            Err(e) => {
                warn!("Cannot read token file {}: {}", self.path.display(), e);
                return None;
            }
        };
        match serde_json::from_slice::<TokenRecord>(&bytes) {
            Ok(record) if !record.access_token.is_empty() => Some(record),
            Ok(_) => {
                warn!("Token file {} has an empty access token", self.path.display());
                None
            }
            Err(e) => {
                warn!("Ignoring malformed token file {}: {}", self.path.display(), e);
                None
            }
        }
    }

    /// Atomically replace the stored token.
    pub async fn save(&self, record: &TokenRecord) -> Result<(), DistributorError> {
        let json = serde_json::to_vec_pretty(record)
            .map_err(|e| DistributorError::Internal(format!("cannot serialize token: {e}")))?;
        write_atomic(&self.path, &json).await?;
        debug!("Token persisted to {}", self.path.display());
        Ok(())
    }
}

/// The live drive authorization, shared by every request of the process.
#[derive(Debug)]
pub struct Session {
    store: TokenStore,
    token: RwLock<Option<TokenRecord>>,
}

impl Session {
    /// Initialise the session from the token store.
    pub async fn load(store: TokenStore) -> Self {
        let token = store.load().await;
        match &token {
            Some(t) => info!(
                "Loaded drive token from {} (expired: {})",
                store.path().display(),
                t.is_expired()
            ),
            None => info!("No drive token yet; authorization required"),
        }
        Self {
            store,
            token: RwLock::new(token),
        }
    }

    /// A session holding `token`, not yet persisted.
    pub fn with_token(store: TokenStore, token: Option<TokenRecord>) -> Self {
        Self {
            store,
            token: RwLock::new(token),
        }
    }

    pub fn store(&self) -> &TokenStore {
        &self.store
    }

    pub async fn token(&self) -> Option<TokenRecord> {
        self.token.read().await.clone()
    }

    pub async fn access_token(&self) -> Option<String> {
        self.token.read().await.as_ref().map(|t| t.access_token.clone())
    }

    pub async fn is_authorized(&self) -> bool {
        self.token.read().await.is_some()
    }

    /// Replace the token and persist it.
    pub async fn install(&self, record: TokenRecord) -> Result<(), DistributorError> {
        let mut guard = self.token.write().await;
        self.store.save(&record).await?;
        *guard = Some(record);
        Ok(())
    }

    /// Write the current token back to the store (no-op without a token).
    pub async fn persist(&self) -> Result<(), DistributorError> {
        match self.token.read().await.as_ref() {
            Some(record) => self.store.save(record).await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(access: &str) -> TokenRecord {
        TokenRecord {
            access_token: access.into(),
            refresh_token: "refresh".into(),
            expires_in: 3600,
            scope: "basic netdisk".into(),
            obtained_at: 1_000,
        }
    }

    #[test]
    fn parses_provider_response() {
        let json = r#"{"expires_in":2592000,"refresh_token":"r","access_token":"a",
                       "session_secret":"","session_key":"","scope":"basic netdisk"}"#;
        let t: TokenRecord = serde_json::from_str(json).unwrap();
        assert_eq!(t.access_token, "a");
        assert_eq!(t.expires_in, 2_592_000);
        assert_eq!(t.obtained_at, 0);
        assert!(!t.is_expired());
    }

    #[test]
    fn expiry_honours_margin() {
        let t = record("a");
        assert!(!t.is_expired_at(1_000 + 3600 - EXPIRY_MARGIN_SECS - 1));
        assert!(t.is_expired_at(1_000 + 3600 - EXPIRY_MARGIN_SECS));
    }

    #[test]
    fn debug_hides_tokens() {
        let dbg = format!("{:?}", record("super-secret-access"));
        assert!(!dbg.contains("super-secret-access"));
        assert!(!dbg.contains("refresh\""));
    }

    #[tokio::test]
    async fn store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("baidu_token.json"));
        assert!(store.load().await.is_none());
        store.save(&record("a1")).await.unwrap();
        assert_eq!(store.load().await, Some(record("a1")));
    }

    #[tokio::test]
    async fn malformed_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("baidu_token.json");
        std::fs::write(&path, b"{not json").unwrap();
        assert!(TokenStore::new(path).load().await.is_none());
    }

    #[tokio::test]
    async fn install_persists_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("t.json"));
        let session = Session::load(store.clone()).await;
        assert!(!session.is_authorized().await);

        session.install(record("fresh")).await.unwrap();
        assert_eq!(session.access_token().await.as_deref(), Some("fresh"));

        let reloaded = Session::load(store).await;
        assert_eq!(reloaded.access_token().await.as_deref(), Some("fresh"));
    }
}
