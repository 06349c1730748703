//! Stores consulted during verification.
//!
//! Both stores are external collaborators. The verifiers only call the traits below
//! and bound every call with the configured upstream timeout.

pub mod cleanup;
pub mod memory;
pub mod redb_store;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::{AuthFailure, FailureKind};
use crate::identity::AuthMethod;

pub use cleanup::{spawn_replay_cleanup, DEFAULT_CLEANUP_INTERVAL_SECS};
pub use memory::{MemoryCredentialStore, MemoryReplayStore};
pub use redb_store::RedbStore;

/// Identity record owned by the credential store.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoredIdentityRecord {
    /// Username as stored.
    pub username: String,

    /// PHC-formatted secret hash. Absent for federated accounts.
    pub secret_hash: Option<String>,

    /// Method this account is provisioned for.
    pub method: AuthMethod,
}

impl StoredIdentityRecord {
    pub fn local(username: impl Into<String>, secret_hash: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret_hash: Some(secret_hash.into()),
            method: AuthMethod::Local,
        }
    }

    pub fn federated(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret_hash: None,
            method: AuthMethod::Federated,
        }
    }
}

impl std::fmt::Debug for StoredIdentityRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredIdentityRecord")
            .field("username", &self.username)
            .field("secret_hash", &self.secret_hash.as_ref().map(|_| "<redacted>"))
            .field("method", &self.method)
            .finish()
    }
}

/// Lookup of identity records by username.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Find a record. Matching is case-insensitive.
    async fn find_by_username(&self, username: &str) -> Result<Option<StoredIdentityRecord>>;
}

/// Assertion IDs that have already been accepted.
#[async_trait]
pub trait ReplayStore: Send + Sync {
    async fn seen(&self, assertion_id: &str) -> Result<bool>;

    /// Remember an assertion ID until `expires_at`.
    async fn record(&self, assertion_id: &str, expires_at: DateTime<Utc>) -> Result<()>;
}

/// Key used by stores for case-insensitive lookup.
pub(crate) fn username_key(username: &str) -> String {
    username.trim().to_lowercase()
}

/// Await a store call under the upstream timeout.
pub(crate) async fn bounded<T, F>(
    limit: Duration,
    store: &'static str,
    call: F,
) -> std::result::Result<T, AuthFailure>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => {
            warn!(store, error = %e, "Store call failed");
            Err(AuthFailure::new(
                FailureKind::UpstreamUnavailable,
                format!("{} unavailable", store),
            ))
        }
        Err(_) => {
            warn!(store, timeout_ms = limit.as_millis() as u64, "Store call timed out");
            Err(AuthFailure::new(
                FailureKind::UpstreamTimeout,
                format!("{} did not answer within {:?}", store, limit),
            ))
        }
    }
}
