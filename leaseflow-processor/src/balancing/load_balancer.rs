use std::{sync::Arc, time::Duration};

use tokio::{select, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    controller::PartitionController, lease_store::LeaseContainer, task::LoopTask, Result,
};

use super::LoadBalancingStrategy;

/// Periodically proposes leases to the partition controller.
pub struct PartitionLoadBalancer<C, P, S> {
    container: C,
    controller: Arc<P>,
    strategy: Arc<S>,
    lease_acquire_interval: Duration,
    task: LoopTask,
}

impl<C, P, S> PartitionLoadBalancer<C, P, S>
where
    C: LeaseContainer,
    P: PartitionController,
    S: LoadBalancingStrategy,
{
    pub fn new(
        container: C,
        controller: Arc<P>,
        strategy: S,
        lease_acquire_interval: Duration,
    ) -> Self {
        Self {
            container,
            controller,
            strategy: Arc::new(strategy),
            lease_acquire_interval,
            task: LoopTask::default(),
        }
    }

    /// Spawn the balancing loop. Fails if it is already running.
    pub async fn start(&self) -> Result<()> {
        let container = self.container.clone();
        let controller = self.controller.clone();
        let strategy = self.strategy.clone();
        let interval = self.lease_acquire_interval;
        self.task
            .start(move |cancel| run(container, controller, strategy, interval, cancel))
            .await
    }

    /// Cancel the loop and wait for it to exit. Fails if it was not started.
    pub async fn stop(&self) -> Result<()> {
        self.task.stop().await
    }

    pub async fn is_running(&self) -> bool {
        self.task.is_running().await
    }
}

#[tracing::instrument(skip_all)]
async fn run<C, P, S>(
    container: C,
    controller: Arc<P>,
    strategy: Arc<S>,
    interval: Duration,
    cancel: CancellationToken,
) where
    C: LeaseContainer,
    P: PartitionController,
    S: LoadBalancingStrategy,
{
    info!(?interval, "partition load balancer started");
    loop {
        // Not raced against `cancel`: an acquired lease must reach the
        // controller's registry before the loop exits.
        balance(&container, controller.as_ref(), strategy.as_ref(), &cancel).await;
        select! {
            _ = cancel.cancelled() => break,
            _ = sleep(interval) => {}
        }
    }
    info!("partition load balancer stopped");
}

/// One rebalancing cycle. Failures are logged and never end the loop.
/// Cancellation is checked between leases only.
async fn balance<C, P, S>(
    container: &C,
    controller: &P,
    strategy: &S,
    cancel: &CancellationToken,
) where
    C: LeaseContainer,
    P: PartitionController,
    S: LoadBalancingStrategy,
{
    let all_leases = match container.list_all().await {
        Ok(leases) => leases,
        Err(e) => {
            warn!(err = format!("{:#}", e), "listing leases");
            return;
        }
    };
    let to_take = strategy.select_leases_to_take(&all_leases);
    debug!(total = all_leases.len(), taking = to_take.len(), "balance cycle");
    for lease in to_take {
        if cancel.is_cancelled() {
            debug!("balance cycle interrupted");
            return;
        }
        let token = lease.partition_token.clone();
        if let Err(e) = controller.add_or_update_lease(lease).await {
            warn!(partition = %token, err = format!("{:#}", e), "taking lease");
        }
    }
}
