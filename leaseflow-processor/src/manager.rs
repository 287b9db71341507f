use std::sync::Arc;

use tracing::info;

use crate::{
    balancing::{LoadBalancingStrategy, PartitionLoadBalancer},
    bootstrap::Bootstrapper,
    controller::PartitionController,
    lease_store::LeaseContainer,
    Result,
};

/// Orders startup and shutdown of a host's lease machinery.
///
/// The load balancer is stopped before the controller shuts down, so no new
/// lease is handed to a controller that is tearing its partitions down.
pub struct PartitionManager<B, P, C, S> {
    bootstrapper: B,
    controller: Arc<P>,
    load_balancer: PartitionLoadBalancer<C, P, S>,
}

impl<B, P, C, S> PartitionManager<B, P, C, S>
where
    B: Bootstrapper,
    P: PartitionController,
    C: LeaseContainer,
    S: LoadBalancingStrategy,
{
    pub fn new(
        bootstrapper: B,
        controller: Arc<P>,
        load_balancer: PartitionLoadBalancer<C, P, S>,
    ) -> Self {
        Self {
            bootstrapper,
            controller,
            load_balancer,
        }
    }

    pub fn controller(&self) -> &Arc<P> {
        &self.controller
    }

    /// Bootstrap the lease container, resume owned leases, then start
    /// balancing.
    #[tracing::instrument(skip_all)]
    pub async fn start(&self) -> Result<()> {
        self.bootstrapper.initialize().await?;
        self.controller.initialize().await?;
        self.load_balancer.start().await?;
        info!("partition manager started");
        Ok(())
    }

    #[tracing::instrument(skip_all)]
    pub async fn stop(&self) -> Result<()> {
        self.load_balancer.stop().await?;
        self.controller.shutdown().await?;
        info!("partition manager stopped");
        Ok(())
    }
}
