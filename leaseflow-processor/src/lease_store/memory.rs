use std::{collections::BTreeMap, sync::Arc};

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::trace;

use crate::{error::LeaseStoreError, lease::Lease, Result};

use super::LeaseContainer;

#[derive(Default)]
struct Table {
    leases: BTreeMap<String, Lease>,
    next_version: u64,
}

impl Table {
    fn bump(&mut self, mut lease: Lease) -> Lease {
        self.next_version += 1;
        lease.version = self.next_version.to_string();
        self.leases.insert(lease.partition_token.clone(), lease.clone());
        lease
    }

    /// Stored record matching `lease`'s version.
    fn current(&self, lease: &Lease) -> std::result::Result<&Lease, LeaseStoreError> {
        let stored = self
            .leases
            .get(&lease.partition_token)
            .ok_or_else(|| LeaseStoreError::NotFound {
                token: lease.partition_token.clone(),
            })?;
        if stored.version != lease.version {
            return Err(LeaseStoreError::VersionConflict {
                token: lease.partition_token.clone(),
            });
        }
        Ok(stored)
    }
}

/// Lease container kept in process memory. Writes replace the whole record
/// when the caller's version matches, like a conditional document replace.
/// Shared clones see the same records, so several hosts in one process can
/// contend for leases the way they would against a remote store.
#[derive(Clone, Default)]
pub struct InMemoryLeaseContainer {
    table: Arc<Mutex<Table>>,
}

impl InMemoryLeaseContainer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `lease` as-is apart from assigning a fresh version.
    pub async fn insert(&self, lease: Lease) -> Lease {
        self.table.lock().await.bump(lease)
    }
}

impl LeaseContainer for InMemoryLeaseContainer {
    async fn list_all(&self) -> Result<Vec<Lease>> {
        Ok(self.table.lock().await.leases.values().cloned().collect())
    }

    async fn read(&self, partition_token: &str) -> Result<Option<Lease>> {
        Ok(self.table.lock().await.leases.get(partition_token).cloned())
    }

    async fn create_if_absent(
        &self,
        partition_token: &str,
        continuation: Option<&str>,
    ) -> Result<bool> {
        let mut table = self.table.lock().await;
        if table.leases.contains_key(partition_token) {
            return Ok(false);
        }
        let mut lease = Lease::new(partition_token);
        lease.continuation_token = continuation.map(str::to_owned);
        table.bump(lease);
        trace!(partition = partition_token, "created lease");
        Ok(true)
    }

    async fn acquire(&self, lease: &Lease, owner: &str) -> Result<Lease> {
        let mut table = self.table.lock().await;
        table.current(lease)?;
        let mut stored = lease.clone();
        stored.owner = owner.to_owned();
        stored.timestamp = Utc::now();
        Ok(table.bump(stored))
    }

    async fn renew(&self, lease: &Lease) -> Result<Lease> {
        let mut table = self.table.lock().await;
        table.current(lease)?;
        let mut stored = lease.clone();
        stored.timestamp = Utc::now();
        Ok(table.bump(stored))
    }

    async fn checkpoint(&self, lease: &Lease, continuation: &str) -> Result<Lease> {
        let mut table = self.table.lock().await;
        table.current(lease)?;
        let mut stored = lease.clone();
        stored.continuation_token = Some(continuation.to_owned());
        stored.timestamp = Utc::now();
        Ok(table.bump(stored))
    }

    async fn release(&self, lease: &Lease) -> Result<()> {
        let mut table = self.table.lock().await;
        table.current(lease)?;
        let mut stored = lease.clone();
        stored.owner.clear();
        table.bump(stored);
        Ok(())
    }

    async fn delete(&self, lease: &Lease) -> Result<()> {
        let mut table = self.table.lock().await;
        table.current(lease)?;
        table.leases.remove(&lease.partition_token);
        Ok(())
    }
}
