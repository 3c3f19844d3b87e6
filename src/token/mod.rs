//! Shared OAuth credential for the ledger API
//!
//! Many independent workers share one credential record. Refresh tokens are
//! single-use, so refreshes are serialized with optimistic locking: a writer
//! commits only if the record still has the version it read. A writer that
//! loses re-reads the record and uses the winner's token. It never calls the
//! token endpoint again with the refresh token it already spent.

pub mod endpoint;
pub mod postgres;

pub use endpoint::HttpTokenEndpoint;
pub use postgres::PgCredentialStore;

use crate::error::ProcessingError;
use crate::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub const CREDENTIAL_KEY: &str = "ledger_oauth";
pub const EXPIRY_BUFFER_SECS: i64 = 300;
pub const REFRESH_TOKEN_LIFETIME_DAYS: i64 = 101;
pub const DEFAULT_ACCESS_LIFETIME_SECS: i64 = 3600;

const CONFLICT_BACKOFF: std::time::Duration = std::time::Duration::from_millis(500);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OAuthCredential {
    pub access_token: String,
    pub refresh_token: String,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

impl OAuthCredential {
    fn from_grant(grant: TokenGrant, previous_refresh: &str, version: i64) -> Self {
        let now = Utc::now();
        Self {
            access_token: grant.access_token,
            refresh_token: grant
                .refresh_token
                .unwrap_or_else(|| previous_refresh.to_string()),
            access_expires_at: now + Duration::seconds(grant.expires_in),
            refresh_expires_at: now + Duration::days(REFRESH_TOKEN_LIFETIME_DAYS),
            version,
            updated_at: now,
        }
    }

    pub fn is_fresh(&self, now: DateTime<Utc>, buffer: Duration) -> bool {
        now < self.access_expires_at - buffer
    }
}

/// Response of a refresh_token grant
#[derive(Debug, Clone, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default = "default_expires_in")]
    pub expires_in: i64,
}

fn default_expires_in() -> i64 {
    DEFAULT_ACCESS_LIFETIME_SECS
}

//
// ================= Collaborators =================
//

#[async_trait::async_trait]
pub trait CredentialStore: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<OAuthCredential>>;

    /// Bootstrap write, no version check
    async fn put_unconditional(&self, key: &str, credential: &OAuthCredential) -> Result<()>;

    /// Write only if the stored version equals `expected_version`.
    /// Returns false when another writer got there first.
    async fn compare_and_swap(
        &self,
        key: &str,
        expected_version: i64,
        credential: &OAuthCredential,
    ) -> Result<bool>;
}

#[async_trait::async_trait]
pub trait TokenEndpoint: Send + Sync {
    async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant>;
}

/// In-memory credential store for tests and single-process runs
pub struct InMemoryCredentialStore {
    records: Arc<Mutex<HashMap<String, OAuthCredential>>>,
}

impl InMemoryCredentialStore {
    pub fn new() -> Self {
        Self {
            records: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryCredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl CredentialStore for InMemoryCredentialStore {
    async fn load(&self, key: &str) -> Result<Option<OAuthCredential>> {
        Ok(self.records.lock().await.get(key).cloned())
    }

    async fn put_unconditional(&self, key: &str, credential: &OAuthCredential) -> Result<()> {
        self.records
            .lock()
            .await
            .insert(key.to_string(), credential.clone());
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        key: &str,
        expected_version: i64,
        credential: &OAuthCredential,
    ) -> Result<bool> {
        let mut records = self.records.lock().await;
        match records.get(key) {
            Some(current) if current.version == expected_version => {
                records.insert(key.to_string(), credential.clone());
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

//
// ================= Manager =================
//

enum Attempt {
    Token(String),
    Conflict,
}

pub struct TokenManager {
    store: Arc<dyn CredentialStore>,
    endpoint: Arc<dyn TokenEndpoint>,
    seed_refresh_token: String,
    key: String,
    buffer: Duration,
    backoff: std::time::Duration,
}

impl TokenManager {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        endpoint: Arc<dyn TokenEndpoint>,
        seed_refresh_token: impl Into<String>,
    ) -> Self {
        Self {
            store,
            endpoint,
            seed_refresh_token: seed_refresh_token.into(),
            key: CREDENTIAL_KEY.to_string(),
            buffer: Duration::seconds(EXPIRY_BUFFER_SECS),
            backoff: CONFLICT_BACKOFF,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn with_backoff(mut self, backoff: std::time::Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Current access token, refreshing when stale or when forced
    pub async fn access_token(&self, force_refresh: bool) -> Result<String> {
        if let Attempt::Token(token) = self.attempt(force_refresh).await? {
            return Ok(token);
        }

        warn!(key = %self.key, "Credential refreshed by another worker, re-reading");
        tokio::time::sleep(self.backoff).await;

        match self.attempt(false).await? {
            Attempt::Token(token) => Ok(token),
            Attempt::Conflict => Err(ProcessingError::CredentialConflict(format!(
                "lost two consecutive refresh races for {}",
                self.key
            ))),
        }
    }

    async fn attempt(&self, force_refresh: bool) -> Result<Attempt> {
        let Some(current) = self.store.load(&self.key).await? else {
            return self.bootstrap().await.map(Attempt::Token);
        };

        if !force_refresh && current.is_fresh(Utc::now(), self.buffer) {
            debug!(version = current.version, "Using cached access token");
            return Ok(Attempt::Token(current.access_token));
        }

        let grant = self.endpoint.refresh(&current.refresh_token).await?;
        let next = OAuthCredential::from_grant(grant, &current.refresh_token, current.version + 1);

        if self
            .store
            .compare_and_swap(&self.key, current.version, &next)
            .await?
        {
            info!(key = %self.key, version = next.version, "Access token refreshed");
            Ok(Attempt::Token(next.access_token))
        } else {
            Ok(Attempt::Conflict)
        }
    }

    async fn bootstrap(&self) -> Result<String> {
        if self.seed_refresh_token.is_empty() {
            return Err(ProcessingError::TokenRefresh(
                "no stored credential and no seed refresh token".to_string(),
            ));
        }

        info!(key = %self.key, "Bootstrapping credential from seed refresh token");
        let grant = self.endpoint.refresh(&self.seed_refresh_token).await?;
        let credential = OAuthCredential::from_grant(grant, &self.seed_refresh_token, 1);
        self.store.put_unconditional(&self.key, &credential).await?;
        Ok(credential.access_token)
    }
}

//
// ================= Tests =================
//

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Barrier;

    /// Issues "access-N"/"refresh-N" and records every refresh token it was given
    struct CountingEndpoint {
        calls: AtomicUsize,
        seen: Mutex<Vec<String>>,
        barrier: Option<Barrier>,
    }

    impl CountingEndpoint {
        fn new(barrier: Option<Barrier>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
                barrier,
            }
        }
    }

    #[async_trait::async_trait]
    impl TokenEndpoint for CountingEndpoint {
        async fn refresh(&self, refresh_token: &str) -> Result<TokenGrant> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.seen.lock().await.push(refresh_token.to_string());
            if let Some(barrier) = &self.barrier {
                barrier.wait().await;
            }
            Ok(TokenGrant {
                access_token: format!("access-{}", n),
                refresh_token: Some(format!("refresh-{}", n)),
                expires_in: 3600,
            })
        }
    }

    fn credential(version: i64, expires_in: i64) -> OAuthCredential {
        let now = Utc::now();
        OAuthCredential {
            access_token: format!("stored-{}", version),
            refresh_token: format!("stored-refresh-{}", version),
            access_expires_at: now + Duration::seconds(expires_in),
            refresh_expires_at: now + Duration::days(100),
            version,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_bootstrap_writes_version_one() {
        let store = Arc::new(InMemoryCredentialStore::new());
        let endpoint = Arc::new(CountingEndpoint::new(None));
        let manager = TokenManager::new(store.clone(), endpoint.clone(), "seed");

        let token = manager.access_token(false).await.unwrap();
        assert_eq!(token, "access-1");

        let stored = store.load(CREDENTIAL_KEY).await.unwrap().unwrap();
        assert_eq!(stored.version, 1);
        assert_eq!(stored.refresh_token, "refresh-1");
        assert_eq!(endpoint.seen.lock().await.as_slice(), ["seed"]);
    }

    #[tokio::test]
    async fn test_fresh_token_is_served_from_cache() {
        let store = Arc::new(InMemoryCredentialStore::new());
        store.put_unconditional(CREDENTIAL_KEY, &credential(4, 3600)).await.unwrap();
        let endpoint = Arc::new(CountingEndpoint::new(None));
        let manager = TokenManager::new(store, endpoint.clone(), "seed");

        assert_eq!(manager.access_token(false).await.unwrap(), "stored-4");
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_token_inside_buffer_is_refreshed() {
        let store = Arc::new(InMemoryCredentialStore::new());
        store.put_unconditional(CREDENTIAL_KEY, &credential(4, 120)).await.unwrap();
        let endpoint = Arc::new(CountingEndpoint::new(None));
        let manager = TokenManager::new(store.clone(), endpoint.clone(), "seed");

        assert_eq!(manager.access_token(false).await.unwrap(), "access-1");
        let stored = store.load(CREDENTIAL_KEY).await.unwrap().unwrap();
        assert_eq!(stored.version, 5);
        assert_eq!(endpoint.seen.lock().await.as_slice(), ["stored-refresh-4"]);
    }

    #[tokio::test]
    async fn test_concurrent_refresh_commits_one_version() {
        let store = Arc::new(InMemoryCredentialStore::new());
        store.put_unconditional(CREDENTIAL_KEY, &credential(7, 3600)).await.unwrap();

        // Both workers read version 7 before either writes
        let endpoint = Arc::new(CountingEndpoint::new(Some(Barrier::new(2))));
        let worker_a = TokenManager::new(store.clone(), endpoint.clone(), "seed")
            .with_backoff(std::time::Duration::from_millis(5));
        let worker_b = TokenManager::new(store.clone(), endpoint.clone(), "seed")
            .with_backoff(std::time::Duration::from_millis(5));

        let (a, b) = tokio::join!(worker_a.access_token(true), worker_b.access_token(true));
        let (a, b) = (a.unwrap(), b.unwrap());

        let stored = store.load(CREDENTIAL_KEY).await.unwrap().unwrap();
        assert_eq!(stored.version, 8);
        assert_eq!(a, stored.access_token);
        assert_eq!(b, stored.access_token);

        // One call each before the race was decided; the loser did not call again
        assert_eq!(endpoint.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_compare_and_swap_rejects_stale_version() {
        let store = InMemoryCredentialStore::new();
        store.put_unconditional(CREDENTIAL_KEY, &credential(2, 3600)).await.unwrap();

        assert!(!store.compare_and_swap(CREDENTIAL_KEY, 1, &credential(2, 3600)).await.unwrap());
        assert!(store.compare_and_swap(CREDENTIAL_KEY, 2, &credential(3, 3600)).await.unwrap());
        assert!(!store.compare_and_swap("missing", 0, &credential(1, 3600)).await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_seed_is_an_error() {
        let manager = TokenManager::new(
            Arc::new(InMemoryCredentialStore::new()),
            Arc::new(CountingEndpoint::new(None)),
            "",
        );
        assert!(matches!(
            manager.access_token(false).await,
            Err(ProcessingError::TokenRefresh(_))
        ));
    }
}
