use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::{Error, Result};
use leaseflow_processor::{
    bootstrap::PartitionListBootstrapper, CheckpointFrequency, ChangeFeedProcessorBuilder,
    FeedEstimator, InMemoryLeaseContainer, ProcessorOptions, TracingHealthMonitor,
};
use tokio::{select, task::JoinSet, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    cli::Commands,
    initialize_stdout_logging,
    sim::{ContinuationLagEstimator, CountingObserver, SyntheticFeed},
    Cli,
};

/// Parameters of a simulated fleet.
#[derive(Debug, Clone)]
pub struct Simulation {
    pub hosts: usize,
    pub partitions: usize,
    pub items_per_partition: u64,
    pub duration: Duration,
    pub max_item_count: Option<u32>,
    pub checkpoint_every: Option<u64>,
}

impl Simulation {
    fn options(&self, host_name: String) -> ProcessorOptions {
        ProcessorOptions {
            lease_acquire_interval: Duration::from_secs(1),
            lease_expiration_interval: Duration::from_secs(6),
            lease_renew_interval: Duration::from_secs(2),
            feed_poll_delay: Duration::from_millis(500),
            max_item_count: self.max_item_count,
            checkpoint_frequency: self
                .checkpoint_every
                .map(CheckpointFrequency::every_batches)
                .unwrap_or_default(),
            ..ProcessorOptions::default()
        }
        .with_host_name(host_name)
    }

    fn total_items(&self) -> u64 {
        self.items_per_partition
            .saturating_mul(self.partitions as u64)
    }
}

pub struct App {
    cli: Cli,
}

impl App {
    pub fn new(cli: Cli) -> Result<App> {
        Ok(App { cli })
    }

    #[tracing::instrument(skip_all)]
    pub async fn run(&mut self) -> Result<()> {
        println!("leaseflow {}", env!("CARGO_PKG_VERSION"));

        if self.cli.version() {
            return Ok(());
        }

        initialize_stdout_logging();

        let simulation = match self.cli.commands {
            Commands::Simulate {
                hosts,
                partitions,
                items_per_partition,
                duration_secs,
                max_item_count,
                checkpoint_every,
            } => Simulation {
                hosts,
                partitions,
                items_per_partition,
                duration: Duration::from_secs(duration_secs),
                max_item_count,
                checkpoint_every,
            },
            Commands::Version => return Ok(()),
        };

        let cancel = CancellationToken::new();
        let mut tasks = JoinSet::new();

        // Set up ctrl-c handler
        let ctrl_c_cancel = cancel.clone();
        tasks.spawn(async move {
            select! {
                _ = ctrl_c_cancel.cancelled() => {}
                _ = tokio::signal::ctrl_c() => {
                    info!("Received ctrl-c, shutting down...");
                    ctrl_c_cancel.cancel();
                }
            }
            Ok::<(), Error>(())
        });

        let res = simulate(&simulation, cancel.clone()).await;
        cancel.cancel();
        while let Some(joined) = tasks.join_next().await {
            joined??;
        }
        if let Err(e) = res {
            error!(err = format!("{:#}", e));
            return Err(e);
        }
        Ok(())
    }
}

/// Run every host of `simulation` until the duration elapses or `cancel`
/// fires, then stop them all. Returns the number of changes delivered.
#[tracing::instrument(skip_all, fields(hosts = simulation.hosts, partitions = simulation.partitions))]
pub async fn simulate(simulation: &Simulation, cancel: CancellationToken) -> Result<u64> {
    let container = InMemoryLeaseContainer::new();
    let partitions: Vec<String> = (0..simulation.partitions).map(|i| i.to_string()).collect();
    let processed = Arc::new(AtomicU64::new(0));

    let mut hosts = vec![];
    for i in 0..simulation.hosts {
        let host_name = format!("host-{}", i);
        let observer_host = host_name.clone();
        let observer_processed = processed.clone();
        let host = ChangeFeedProcessorBuilder::new(
            simulation.options(host_name),
            container.clone(),
            SyntheticFeed::new(simulation.items_per_partition),
            move || CountingObserver::new(observer_host.clone(), observer_processed.clone()),
        )
        .with_bootstrapper(PartitionListBootstrapper::new(
            container.clone(),
            partitions.clone(),
        ))
        .build();
        hosts.push(host);
    }

    let estimator = FeedEstimator::new(
        ContinuationLagEstimator::new(container.clone(), simulation.items_per_partition),
        Arc::new(|remaining: u64| info!(remaining, "estimated backlog")),
        Arc::new(TracingHealthMonitor),
    )
    .with_estimation_period(Duration::from_secs(2));

    for host in &hosts {
        host.start().await?;
    }
    estimator.start().await?;
    info!(total = simulation.total_items(), "fleet started");

    select! {
        _ = cancel.cancelled() => {}
        _ = sleep(simulation.duration) => {
            info!("simulation time elapsed");
        }
    }

    if let Err(e) = estimator.stop().await {
        warn!(err = format!("{:#}", e), "stopping estimator");
    }
    for host in &hosts {
        if let Err(e) = host.stop().await {
            warn!(err = format!("{:#}", e), "stopping host");
        }
    }

    let processed = processed.load(Ordering::Relaxed);
    info!(processed, total = simulation.total_items(), "fleet stopped");
    Ok(processed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_single_host_drains_feed() {
        let simulation = Simulation {
            hosts: 1,
            partitions: 2,
            items_per_partition: 25,
            duration: Duration::from_secs(3),
            max_item_count: Some(10),
            checkpoint_every: None,
        };
        let processed = simulate(&simulation, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(processed, 50);
    }
}
