use std::{collections::HashMap, sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use tokio::{select, sync::Mutex, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    checkpoint::{Checkpointer, PartitionCheckpointer},
    error::{as_feed_error, is_cancelled, CancelError, FeedError},
    health::HealthMonitor,
    lease::{Lease, LeaseHandle},
    lease_store::LeaseContainer,
    observer::{ChangeFeedObserverFactory, CloseReason, ObserverContext},
    processor::{FeedPageSource, FeedPageSourceFactory, PartitionProcessor, ProcessorSettings},
    task::LoopTask,
    Result,
};

use super::{
    GoneResolution, LeaseRenewer, PartitionController, PartitionSupervisor,
    PartitionSynchronizer,
};

type ItemOf<F> = <<F as FeedPageSourceFactory>::Source as FeedPageSource>::Item;

/// Per-host settings applied to every partition the controller runs.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub host_name: String,
    pub lease_renew_interval: Duration,
    pub feed_poll_delay: Duration,
    pub max_item_count: Option<u32>,
    pub start_from_beginning: bool,
    pub start_time: Option<DateTime<Utc>>,
}

impl ControllerSettings {
    pub fn new(host_name: impl Into<String>) -> Self {
        Self {
            host_name: host_name.into(),
            lease_renew_interval: Duration::from_secs(17),
            feed_poll_delay: Duration::from_secs(5),
            max_item_count: None,
            start_from_beginning: false,
            start_time: None,
        }
    }
}

enum Slot {
    /// Acquisition in progress.
    Starting,
    Running(JoinHandle<()>),
}

struct Partitions {
    slots: HashMap<String, Slot>,
    /// Parent of every supervisor's token. Cancelled on shutdown.
    root: CancellationToken,
}

struct Exit {
    lease: Lease,
    result: Result<()>,
}

/// Runs a [`PartitionSupervisor`] for every lease this host acquires.
///
/// Supervisors report their exit on a channel drained by a reaper task,
/// which releases, retires or replaces the lease depending on why the
/// partition stopped.
pub struct PartitionControllerCore<C, F, O, Y> {
    inner: Arc<Inner<C, F, O, Y>>,
}

struct Inner<C, F, O, Y> {
    settings: ControllerSettings,
    container: C,
    source_factory: F,
    observer_factory: O,
    synchronizer: Y,
    health: Arc<dyn HealthMonitor>,
    partitions: Mutex<Partitions>,
    exit_tx: flume::Sender<Exit>,
    exit_rx: flume::Receiver<Exit>,
    reaper: LoopTask,
}

impl<C, F, O, Y> PartitionControllerCore<C, F, O, Y>
where
    C: LeaseContainer,
    F: FeedPageSourceFactory,
    O: ChangeFeedObserverFactory<ItemOf<F>>,
    Y: PartitionSynchronizer,
{
    pub fn new(
        settings: ControllerSettings,
        container: C,
        source_factory: F,
        observer_factory: O,
        synchronizer: Y,
        health: Arc<dyn HealthMonitor>,
    ) -> Self {
        let (exit_tx, exit_rx) = flume::unbounded();
        Self {
            inner: Arc::new(Inner {
                settings,
                container,
                source_factory,
                observer_factory,
                synchronizer,
                health,
                partitions: Mutex::new(Partitions {
                    slots: HashMap::new(),
                    root: CancellationToken::new(),
                }),
                exit_tx,
                exit_rx,
                reaper: LoopTask::default(),
            }),
        }
    }

    /// Tokens of the partitions currently starting or running here, sorted.
    pub async fn running_partitions(&self) -> Vec<String> {
        let mut tokens: Vec<_> = self
            .inner
            .partitions
            .lock()
            .await
            .slots
            .keys()
            .cloned()
            .collect();
        tokens.sort();
        tokens
    }
}

impl<C, F, O, Y> PartitionController for PartitionControllerCore<C, F, O, Y>
where
    C: LeaseContainer,
    F: FeedPageSourceFactory,
    O: ChangeFeedObserverFactory<ItemOf<F>>,
    Y: PartitionSynchronizer,
{
    async fn initialize(&self) -> Result<()> {
        {
            let mut partitions = self.inner.partitions.lock().await;
            if partitions.root.is_cancelled() {
                partitions.root = CancellationToken::new();
            }
        }
        let inner = self.inner.clone();
        self.inner
            .reaper
            .start(move |cancel| reap(inner, cancel))
            .await?;

        let host_name = &self.inner.settings.host_name;
        let owned: Vec<_> = self
            .inner
            .container
            .list_all()
            .await?
            .into_iter()
            .filter(|lease| lease.is_owned_by(host_name))
            .collect();
        info!(host = %host_name, owned = owned.len(), "resuming owned leases");
        for lease in owned {
            let token = lease.partition_token.clone();
            if let Err(e) = self.inner.add_lease(lease).await {
                warn!(partition = %token, err = format!("{:#}", e), "resuming lease");
            }
        }
        Ok(())
    }

    async fn add_or_update_lease(&self, lease: Lease) -> Result<()> {
        self.inner.add_lease(lease).await
    }

    async fn shutdown(&self) -> Result<()> {
        if let Err(e) = self.inner.reaper.stop().await {
            debug!(err = %e, "reaper");
        }

        let slots = {
            let mut partitions = self.inner.partitions.lock().await;
            partitions.root.cancel();
            std::mem::take(&mut partitions.slots)
        };
        info!(partitions = slots.len(), "stopping partitions");
        for (token, slot) in slots {
            if let Slot::Running(task) = slot {
                if let Err(e) = task.await {
                    warn!(partition = %token, err = %e, "supervisor did not exit cleanly");
                }
            }
        }

        while let Ok(exit) = self.inner.exit_rx.try_recv() {
            self.inner.handle_exit(exit).await;
        }
        Ok(())
    }
}

impl<C, F, O, Y> Inner<C, F, O, Y>
where
    C: LeaseContainer,
    F: FeedPageSourceFactory,
    O: ChangeFeedObserverFactory<ItemOf<F>>,
    Y: PartitionSynchronizer,
{
    #[tracing::instrument(skip_all, fields(partition = %lease.partition_token))]
    async fn add_lease(self: &Arc<Self>, lease: Lease) -> Result<()> {
        let token = lease.partition_token.clone();
        {
            let mut partitions = self.partitions.lock().await;
            if partitions.root.is_cancelled() {
                return Err(CancelError.into());
            }
            if partitions.slots.contains_key(&token) {
                debug!("already processing");
                return Ok(());
            }
            partitions.slots.insert(token.clone(), Slot::Starting);
        }

        let acquired = match self.container.acquire(&lease, &self.settings.host_name).await {
            Ok(acquired) => acquired,
            Err(e) => {
                self.partitions.lock().await.slots.remove(&token);
                return Err(e);
            }
        };
        info!(version = %acquired.version, "lease acquired");
        self.health.notify_lease_acquire(&token);

        let handle = LeaseHandle::new(acquired.clone());
        let mut partitions = self.partitions.lock().await;
        if partitions.root.is_cancelled() {
            partitions.slots.remove(&token);
            drop(partitions);
            self.release(&acquired).await;
            return Err(CancelError.into());
        }
        let cancel = partitions.root.child_token();
        let supervisor = self.supervisor(&acquired, handle.clone());
        let exit_tx = self.exit_tx.clone();
        let task = tokio::spawn(async move {
            let result = supervisor.run(cancel).await;
            let lease = handle.snapshot().await;
            if exit_tx.send_async(Exit { lease, result }).await.is_err() {
                debug!("controller gone");
            }
        });
        partitions.slots.insert(token, Slot::Running(task));
        Ok(())
    }

    fn supervisor(
        &self,
        lease: &Lease,
        handle: LeaseHandle,
    ) -> PartitionSupervisor<F::Source, O::Observer, C> {
        let token = &lease.partition_token;
        let checkpointer: Arc<dyn Checkpointer> = Arc::new(PartitionCheckpointer::new(
            self.container.clone(),
            handle.clone(),
        ));
        let settings = ProcessorSettings {
            lease_token: token.clone(),
            max_item_count: self.settings.max_item_count,
            feed_poll_delay: self.settings.feed_poll_delay,
            start_continuation: lease.continuation_token.clone(),
            start_from_beginning: self.settings.start_from_beginning,
            start_time: self.settings.start_time,
            session_token: None,
        };
        let processor = PartitionProcessor::new(
            self.source_factory.create(token),
            settings,
            checkpointer.clone(),
        );
        let renewer = LeaseRenewer::new(
            self.container.clone(),
            handle,
            self.settings.lease_renew_interval,
        );
        let context = ObserverContext::new(
            token.clone(),
            None,
            lease.continuation_token.clone(),
            checkpointer,
        );
        PartitionSupervisor::new(processor, renewer, self.observer_factory.create(), context)
    }

    #[tracing::instrument(skip_all, fields(partition = %exit.lease.partition_token))]
    async fn handle_exit(self: &Arc<Self>, exit: Exit) {
        let Exit { lease, result } = exit;
        let slot = self
            .partitions
            .lock()
            .await
            .slots
            .remove(&lease.partition_token);
        if let Some(Slot::Running(task)) = slot {
            if let Err(e) = task.await {
                warn!(err = %e, "supervisor did not exit cleanly");
            }
        }

        if let Err(e) = &result {
            if !is_cancelled(e) {
                self.health.notify_error(&lease.partition_token, e);
            }
        }
        let reason = CloseReason::from_result(&result);
        match (reason, result.as_ref().err().and_then(as_feed_error)) {
            (CloseReason::LeaseLost, _) => {
                info!("lease taken by another host");
            }
            (CloseReason::ResourceGone, Some(gone)) => {
                let gone = gone.clone();
                self.handle_partition_gone(lease, gone).await;
            }
            _ => self.release(&lease).await,
        }
    }

    async fn handle_partition_gone(self: &Arc<Self>, lease: Lease, gone: FeedError) {
        let GoneResolution {
            children,
            delete_gone_lease,
        } = match self.synchronizer.handle_partition_gone(&lease, &gone).await {
            Ok(resolution) => resolution,
            Err(e) => {
                warn!(err = format!("{:#}", e), "resolving gone partition");
                self.health.notify_error(&lease.partition_token, &e);
                self.release(&lease).await;
                return;
            }
        };
        info!(
            children = children.len(),
            delete = delete_gone_lease,
            reason = %gone,
            "partition gone"
        );

        if delete_gone_lease {
            match self.container.delete(&lease).await {
                Ok(()) => self.health.notify_lease_release(&lease.partition_token),
                Err(e) => warn!(err = format!("{:#}", e), "deleting gone lease"),
            }
        }
        for mut child in children {
            child.properties = lease.properties.clone();
            let token = child.partition_token.clone();
            if let Err(e) = self.add_lease(child).await {
                warn!(child = %token, err = format!("{:#}", e), "starting child lease");
            }
        }
    }

    async fn release(&self, lease: &Lease) {
        match self.container.release(lease).await {
            Ok(()) => {
                debug!(partition = %lease.partition_token, "lease released");
                self.health.notify_lease_release(&lease.partition_token);
            }
            Err(e) => {
                debug!(
                    partition = %lease.partition_token,
                    err = format!("{:#}", e),
                    "lease changed before release"
                );
            }
        }
    }
}

#[tracing::instrument(skip_all)]
async fn reap<C, F, O, Y>(inner: Arc<Inner<C, F, O, Y>>, cancel: CancellationToken)
where
    C: LeaseContainer,
    F: FeedPageSourceFactory,
    O: ChangeFeedObserverFactory<ItemOf<F>>,
    Y: PartitionSynchronizer,
{
    loop {
        let exit = select! {
            _ = cancel.cancelled() => break,
            res = inner.exit_rx.recv_async() => match res {
                Ok(exit) => exit,
                Err(_) => break,
            },
        };
        inner.handle_exit(exit).await;
    }
}
