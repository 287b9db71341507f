use std::future::Future;

use tracing::info;

use crate::{lease_store::LeaseContainer, Result};

/// Prepares the lease container before a host starts balancing.
pub trait Bootstrapper: Send + Sync + 'static {
    fn initialize(&self) -> impl Future<Output = Result<()>> + Send;
}

/// Leaves the lease container as it is; leases are created elsewhere.
#[derive(Debug, Clone, Default)]
pub struct SkipBootstrap;

impl Bootstrapper for SkipBootstrap {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }
}

/// Creates an unowned lease for each partition of a known list. Leases that
/// already exist are left untouched, so every host can run it on startup.
pub struct PartitionListBootstrapper<C> {
    container: C,
    partitions: Vec<String>,
}

impl<C: LeaseContainer> PartitionListBootstrapper<C> {
    pub fn new<I, T>(container: C, partitions: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            container,
            partitions: partitions.into_iter().map(Into::into).collect(),
        }
    }
}

impl<C: LeaseContainer> Bootstrapper for PartitionListBootstrapper<C> {
    #[tracing::instrument(skip_all)]
    async fn initialize(&self) -> Result<()> {
        let mut created = 0;
        for token in &self.partitions {
            if self.container.create_if_absent(token, None).await? {
                created += 1;
            }
        }
        info!(partitions = self.partitions.len(), created, "lease container bootstrapped");
        Ok(())
    }
}
