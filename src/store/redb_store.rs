//! Identity and replay store backed by a redb embedded database.
//!
//! One database file holds two tables:
//! - identity records keyed by lowercased username
//! - accepted assertion IDs with their expiry, for replay prevention

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{username_key, CredentialStore, ReplayStore, StoredIdentityRecord};

/// redb table for identities (key: lowercased username, value: MessagePack bytes).
const IDENTITIES_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("identities");

/// redb table for assertion ID tracking (key: assertion_id, value: expiry timestamp).
const ASSERTIONS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("replay_assertions");

/// Persistent credential and replay store.
///
/// Cloning is cheap; clones share the database handle.
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
}

impl RedbStore {
    /// Open or create a store at the given path.
    pub fn open(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {:?}", parent))?;
        }

        let db = Database::create(&path)
            .with_context(|| format!("Failed to open identity database: {:?}", path))?;

        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(IDENTITIES_TABLE)?;
            let _ = write_txn.open_table(ASSERTIONS_TABLE)?;
        }
        write_txn.commit()?;

        let store = Self { db: Arc::new(db) };
        debug!(
            identities = store.identity_count()?,
            assertions = store.assertion_count()?,
            "Opened identity store"
        );

        Ok(store)
    }

    /// Insert or replace an identity record.
    pub fn upsert_identity(&self, record: &StoredIdentityRecord) -> Result<()> {
        let data = rmp_serde::to_vec(record).context("Failed to serialize identity")?;
        let key = username_key(&record.username);
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(IDENTITIES_TABLE)?;
            table.insert(key.as_str(), data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Delete an identity record. Returns whether one existed.
    pub fn remove_identity(&self, username: &str) -> Result<bool> {
        let key = username_key(username);
        let write_txn = self.db.begin_write()?;
        let removed = {
            let mut table = write_txn.open_table(IDENTITIES_TABLE)?;
            let result = table.remove(key.as_str())?;
            result.is_some()
        };
        write_txn.commit()?;
        Ok(removed)
    }

    /// Look up an identity record.
    pub fn get_identity(&self, username: &str) -> Result<Option<StoredIdentityRecord>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(IDENTITIES_TABLE)?;

        let key = username_key(username);
        match table.get(key.as_str())? {
            Some(value) => {
                let record: StoredIdentityRecord = rmp_serde::from_slice(value.value())
                    .context("Failed to deserialize identity")?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    pub fn identity_count(&self) -> Result<usize> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(IDENTITIES_TABLE)?;
        Ok(table.len()? as usize)
    }

    pub fn assertion_count(&self) -> Result<usize> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ASSERTIONS_TABLE)?;
        Ok(table.len()? as usize)
    }

    /// Check if an assertion ID has been accepted before.
    pub fn is_assertion_seen(&self, assertion_id: &str) -> Result<bool> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ASSERTIONS_TABLE)?;
        Ok(table.get(assertion_id)?.is_some())
    }

    /// Mark an assertion ID as accepted. Committed before returning.
    pub fn mark_assertion_seen(&self, assertion_id: &str, expires_at: DateTime<Utc>) -> Result<()> {
        let data = rmp_serde::to_vec(&expires_at)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(ASSERTIONS_TABLE)?;
            table.insert(assertion_id, data.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Remove replay records whose expiry has passed.
    /// Returns the number of records evicted.
    pub fn evict_expired_assertions(&self) -> Result<usize> {
        let now = Utc::now();

        let expired: Vec<String> = {
            let read_txn = self.db.begin_read()?;
            let table = read_txn.open_table(ASSERTIONS_TABLE)?;

            let mut ids = Vec::new();
            for entry in table.iter()? {
                let (key, value) = entry?;
                match rmp_serde::from_slice::<DateTime<Utc>>(value.value()) {
                    Ok(expires_at) if now > expires_at => {
                        ids.push(key.value().to_string());
                    }
                    Err(e) => {
                        warn!(key = key.value(), error = %e, "Unreadable replay record, marking for deletion");
                        ids.push(key.value().to_string());
                    }
                    _ => {}
                }
            }
            ids
        };

        if expired.is_empty() {
            return Ok(0);
        }

        let write_txn = self.db.begin_write()?;
        let mut evicted = 0;
        {
            let mut table = write_txn.open_table(ASSERTIONS_TABLE)?;
            for id in &expired {
                if table.remove(id.as_str())?.is_some() {
                    evicted += 1;
                }
            }
        }
        write_txn.commit()?;

        Ok(evicted)
    }
}

impl RedbStore {
    /// Run a redb call on the blocking pool so callers can time it out.
    async fn blocking<T, F>(&self, call: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&RedbStore) -> Result<T> + Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || call(&store))
            .await
            .context("identity store task failed")?
    }
}

#[async_trait]
impl CredentialStore for RedbStore {
    async fn find_by_username(&self, username: &str) -> Result<Option<StoredIdentityRecord>> {
        let username = username.to_string();
        self.blocking(move |store| store.get_identity(&username))
            .await
    }
}

#[async_trait]
impl ReplayStore for RedbStore {
    async fn seen(&self, assertion_id: &str) -> Result<bool> {
        let assertion_id = assertion_id.to_string();
        self.blocking(move |store| store.is_assertion_seen(&assertion_id))
            .await
    }

    async fn record(&self, assertion_id: &str, expires_at: DateTime<Utc>) -> Result<()> {
        let assertion_id = assertion_id.to_string();
        self.blocking(move |store| store.mark_assertion_seen(&assertion_id, expires_at))
            .await
    }
}
