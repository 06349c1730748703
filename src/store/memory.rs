//! In-process store implementations.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;

use super::{username_key, CredentialStore, ReplayStore, StoredIdentityRecord};

/// Credential store held in memory.
#[derive(Default)]
pub struct MemoryCredentialStore {
    records: RwLock<HashMap<String, StoredIdentityRecord>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a record.
    pub fn insert(&self, record: StoredIdentityRecord) -> Result<()> {
        let mut records = self
            .records
            .write()
            .map_err(|_| anyhow!("Credential store lock poisoned"))?;
        records.insert(username_key(&record.username), record);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn find_by_username(&self, username: &str) -> Result<Option<StoredIdentityRecord>> {
        let records = self
            .records
            .read()
            .map_err(|_| anyhow!("Credential store lock poisoned"))?;
        Ok(records.get(&username_key(username)).cloned())
    }
}

/// Replay store held in memory.
#[derive(Default)]
pub struct MemoryReplayStore {
    seen: RwLock<HashMap<String, DateTime<Utc>>>,
}

impl MemoryReplayStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop records whose expiry has passed. Returns the number removed.
    pub fn evict_expired(&self) -> Result<usize> {
        let now = Utc::now();
        let mut seen = self
            .seen
            .write()
            .map_err(|_| anyhow!("Replay store lock poisoned"))?;
        let before = seen.len();
        seen.retain(|_, expires_at| *expires_at > now);
        Ok(before - seen.len())
    }
}

#[async_trait]
impl ReplayStore for MemoryReplayStore {
    async fn seen(&self, assertion_id: &str) -> Result<bool> {
        let seen = self
            .seen
            .read()
            .map_err(|_| anyhow!("Replay store lock poisoned"))?;
        Ok(seen.contains_key(assertion_id))
    }

    async fn record(&self, assertion_id: &str, expires_at: DateTime<Utc>) -> Result<()> {
        let mut seen = self
            .seen
            .write()
            .map_err(|_| anyhow!("Replay store lock poisoned"))?;
        seen.insert(assertion_id.to_string(), expires_at);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::AuthMethod;

    #[tokio::test]
    async fn test_lookup_is_case_insensitive() {
        let store = MemoryCredentialStore::new();
        store
            .insert(StoredIdentityRecord::federated("samluser@oktaauth.com"))
            .unwrap();

        let record = store
            .find_by_username("SAMLUSER@OktaAuth.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.username, "samluser@oktaauth.com");
        assert_eq!(record.method, AuthMethod::Federated);

        assert!(store
            .find_by_username("other@oktaauth.com")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_replay_record_and_evict() {
        let store = MemoryReplayStore::new();
        assert!(!store.seen("_a1").await.unwrap());

        store
            .record("_a1", Utc::now() + chrono::Duration::minutes(5))
            .await
            .unwrap();
        store
            .record("_a2", Utc::now() - chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert!(store.seen("_a1").await.unwrap());
        assert!(store.seen("_a2").await.unwrap());

        assert_eq!(store.evict_expired().unwrap(), 1);
        assert!(store.seen("_a1").await.unwrap());
        assert!(!store.seen("_a2").await.unwrap());
    }
}
