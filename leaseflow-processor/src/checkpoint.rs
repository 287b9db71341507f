use async_trait::async_trait;
use tracing::debug;

use crate::{
    lease::{LeaseHandle, LeaseUpdate},
    lease_store::LeaseContainer,
    Result,
};

/// Durable write of a continuation token into the partition's lease.
#[async_trait]
pub trait Checkpointer: Send + Sync {
    /// Fails with [`LeaseLost`](crate::error::LeaseLost) when another host
    /// has acquired the lease or the record is gone.
    async fn checkpoint(&self, continuation: &str) -> Result<()>;
}

/// Checkpoints through the lease container with optimistic concurrency.
pub struct PartitionCheckpointer<C> {
    container: C,
    lease: LeaseHandle,
}

impl<C: LeaseContainer> PartitionCheckpointer<C> {
    pub fn new(container: C, lease: LeaseHandle) -> Self {
        Self { container, lease }
    }
}

#[async_trait]
impl<C: LeaseContainer> Checkpointer for PartitionCheckpointer<C> {
    async fn checkpoint(&self, continuation: &str) -> Result<()> {
        let lease = self
            .lease
            .update(&self.container, LeaseUpdate::Checkpoint(continuation))
            .await?;
        debug!(
            partition = %lease.partition_token,
            continuation,
            version = %lease.version,
            "checkpoint written"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        error::is_lease_lost,
        lease::Lease,
        lease_store::{InMemoryLeaseContainer, LeaseContainer},
    };

    use super::*;

    async fn owned_lease(container: &InMemoryLeaseContainer, owner: &str) -> Lease {
        container.create_if_absent("0", None).await.unwrap();
        let lease = container.read("0").await.unwrap().unwrap();
        container.acquire(&lease, owner).await.unwrap()
    }

    #[tokio::test]
    async fn test_checkpoint_persists_continuation() {
        let container = InMemoryLeaseContainer::new();
        let lease = owned_lease(&container, "a").await;
        let checkpointer = PartitionCheckpointer::new(container.clone(), LeaseHandle::new(lease));

        checkpointer.checkpoint("c1").await.unwrap();
        checkpointer.checkpoint("c2").await.unwrap();

        let stored = container.read("0").await.unwrap().unwrap();
        assert_eq!(stored.continuation_token.as_deref(), Some("c2"));
        assert_eq!(stored.owner, "a");
    }

    #[tokio::test]
    async fn test_checkpoint_survives_own_concurrent_write() {
        let container = InMemoryLeaseContainer::new();
        let lease = owned_lease(&container, "a").await;
        let handle = LeaseHandle::new(lease.clone());
        let checkpointer = PartitionCheckpointer::new(container.clone(), handle.clone());

        // Renewal through a different copy bumps the version behind the
        // handle's back; the lease is still ours.
        container.renew(&lease).await.unwrap();

        checkpointer.checkpoint("c1").await.unwrap();
        let stored = container.read("0").await.unwrap().unwrap();
        assert_eq!(stored.continuation_token.as_deref(), Some("c1"));
        assert_eq!(handle.snapshot().await.version, stored.version);
    }

    #[tokio::test]
    async fn test_checkpoint_after_theft_is_lease_lost() {
        let container = InMemoryLeaseContainer::new();
        let lease = owned_lease(&container, "a").await;
        let checkpointer =
            PartitionCheckpointer::new(container.clone(), LeaseHandle::new(lease.clone()));

        container.acquire(&lease, "b").await.unwrap();

        let err = checkpointer.checkpoint("c1").await.unwrap_err();
        assert!(is_lease_lost(&err));
        let stored = container.read("0").await.unwrap().unwrap();
        assert_eq!(stored.continuation_token, None);
    }

    #[tokio::test]
    async fn test_checkpoint_after_delete_is_lease_lost() {
        let container = InMemoryLeaseContainer::new();
        let lease = owned_lease(&container, "a").await;
        let checkpointer =
            PartitionCheckpointer::new(container.clone(), LeaseHandle::new(lease.clone()));

        container.delete(&lease).await.unwrap();

        let err = checkpointer.checkpoint("c1").await.unwrap_err();
        assert!(is_lease_lost(&err));
    }
}
