//! Running processors for the leases this host owns.

use std::future::Future;

use crate::{error::FeedError, lease::Lease, Result};

mod partition_controller;
mod renewer;
mod supervisor;

pub use partition_controller::{ControllerSettings, PartitionControllerCore};
pub use renewer::LeaseRenewer;
pub use supervisor::PartitionSupervisor;

/// Starts and stops partition processing for leases proposed by the load
/// balancer.
pub trait PartitionController: Send + Sync + 'static {
    /// Resume processing for leases this host already owns.
    fn initialize(&self) -> impl Future<Output = Result<()>> + Send;

    /// Take ownership of `lease` and start processing it, unless it is
    /// already being processed here.
    fn add_or_update_lease(&self, lease: Lease) -> impl Future<Output = Result<()>> + Send;

    /// Stop every partition and wait for them to exit.
    fn shutdown(&self) -> impl Future<Output = Result<()>> + Send;
}

/// How to replace a lease whose partition is gone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GoneResolution {
    /// Leases for the partitions that replace the gone one. They must
    /// already exist in the lease container.
    pub children: Vec<Lease>,
    pub delete_gone_lease: bool,
}

/// Reacts to partitions that split or disappeared.
pub trait PartitionSynchronizer: Send + Sync + 'static {
    fn handle_partition_gone(
        &self,
        lease: &Lease,
        reason: &FeedError,
    ) -> impl Future<Output = Result<GoneResolution>> + Send;
}

/// Deletes leases of partitions that no longer exist. Splits are not
/// resolved; the parent lease is released so another host can try again.
#[derive(Debug, Clone, Default)]
pub struct RetireGoneLeases;

impl PartitionSynchronizer for RetireGoneLeases {
    async fn handle_partition_gone(
        &self,
        lease: &Lease,
        reason: &FeedError,
    ) -> Result<GoneResolution> {
        match reason {
            FeedError::NotFound { .. } => Ok(GoneResolution {
                children: vec![],
                delete_gone_lease: true,
            }),
            FeedError::Split { .. } => {
                anyhow::bail!("no child partitions known for split lease {}", lease.partition_token)
            }
        }
    }
}
