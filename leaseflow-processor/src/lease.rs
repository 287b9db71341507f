//! Lease records and the per-partition shared lease handle.

use std::{collections::BTreeMap, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::{
    error::{as_store_error, LeaseLost, LeaseStoreError, Result},
    lease_store::LeaseContainer,
};

/// Ownership and progress record for one partition of the source feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lease {
    pub partition_token: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continuation_token: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub version: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
}

impl Lease {
    /// A fresh, unowned lease for a newly discovered partition.
    pub fn new(partition_token: impl Into<String>) -> Self {
        Self {
            partition_token: partition_token.into(),
            owner: String::new(),
            continuation_token: None,
            timestamp: Utc::now(),
            version: String::new(),
            properties: BTreeMap::new(),
        }
    }

    pub fn with_continuation(mut self, continuation: impl Into<String>) -> Self {
        self.continuation_token = Some(continuation.into());
        self
    }

    pub fn with_owner(mut self, owner: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        self.owner = owner.into();
        self.timestamp = timestamp;
        self
    }

    pub fn is_unowned(&self) -> bool {
        self.owner.trim().is_empty()
    }

    pub fn is_owned_by(&self, host_name: &str) -> bool {
        self.owner.eq_ignore_ascii_case(host_name)
    }

    /// True once the last renewal is older than `expiration_interval`.
    pub fn is_expired(&self, now: DateTime<Utc>, expiration_interval: Duration) -> bool {
        match chrono::Duration::from_std(expiration_interval) {
            Ok(interval) => self.timestamp + interval < now,
            Err(_) => false,
        }
    }
}

/// A write through a [`LeaseHandle`].
#[derive(Debug, Clone, Copy)]
pub enum LeaseUpdate<'a> {
    Renew,
    Checkpoint(&'a str),
}

const MAX_CONFLICT_RETRIES: usize = 5;

/// The latest known copy of a lease held by this host, shared by the
/// partition's checkpointer and renewer so every conditional write carries
/// the most recent version.
#[derive(Debug, Clone)]
pub struct LeaseHandle {
    lease: Arc<Mutex<Lease>>,
}

impl LeaseHandle {
    pub fn new(lease: Lease) -> Self {
        Self {
            lease: Arc::new(Mutex::new(lease)),
        }
    }

    pub async fn snapshot(&self) -> Lease {
        self.lease.lock().await.clone()
    }

    pub async fn replace(&self, lease: Lease) {
        *self.lease.lock().await = lease;
    }

    /// Apply `update` with optimistic concurrency. A version conflict
    /// re-reads the record and retries while this host still owns it; a
    /// missing record or a new owner is reported as [`LeaseLost`].
    #[tracing::instrument(skip_all)]
    pub async fn update<C: LeaseContainer>(
        &self,
        container: &C,
        update: LeaseUpdate<'_>,
    ) -> Result<Lease> {
        for _ in 0..MAX_CONFLICT_RETRIES {
            let current = self.snapshot().await;
            let res = match update {
                LeaseUpdate::Renew => container.renew(&current).await,
                LeaseUpdate::Checkpoint(continuation) => {
                    container.checkpoint(&current, continuation).await
                }
            };
            let err = match res {
                Ok(updated) => {
                    self.replace(updated.clone()).await;
                    return Ok(updated);
                }
                Err(err) => err,
            };
            match as_store_error(&err) {
                Some(LeaseStoreError::VersionConflict { .. }) => {
                    let fresh = container.read(&current.partition_token).await?;
                    match fresh {
                        Some(fresh) if fresh.is_owned_by(&current.owner) => {
                            debug!(
                                partition = %current.partition_token,
                                version = %fresh.version,
                                "lease changed underneath us, retrying"
                            );
                            self.replace(fresh).await;
                        }
                        _ => {
                            return Err(LeaseLost {
                                token: current.partition_token,
                            }
                            .into())
                        }
                    }
                }
                Some(LeaseStoreError::NotFound { .. }) => {
                    return Err(LeaseLost {
                        token: current.partition_token,
                    }
                    .into())
                }
                None => return Err(err),
            }
        }
        let token = self.snapshot().await.partition_token;
        Err(LeaseLost { token }.into())
    }
}
