use std::sync::Arc;

use crate::{
    balancing::{EqualPartitionsBalancingStrategy, PartitionLoadBalancer},
    bootstrap::{Bootstrapper, SkipBootstrap},
    config::ProcessorOptions,
    controller::{PartitionControllerCore, PartitionSynchronizer, RetireGoneLeases},
    health::{HealthMonitor, TracingHealthMonitor},
    lease_store::LeaseContainer,
    manager::PartitionManager,
    observer::{ChangeFeedObserverFactory, CheckpointerObserverFactory},
    processor::{FeedPageSource, FeedPageSourceFactory},
};

/// A fully wired host, as assembled by [`ChangeFeedProcessorBuilder`].
pub type ChangeFeedProcessor<B, C, F, O, Y> = PartitionManager<
    B,
    PartitionControllerCore<C, F, CheckpointerObserverFactory<O>, Y>,
    C,
    EqualPartitionsBalancingStrategy,
>;

/// Assembles a host from its options and collaborators.
pub struct ChangeFeedProcessorBuilder<C, F, O, B = SkipBootstrap, Y = RetireGoneLeases> {
    options: ProcessorOptions,
    container: C,
    source_factory: F,
    observer_factory: O,
    bootstrapper: B,
    synchronizer: Y,
    health: Arc<dyn HealthMonitor>,
}

impl<C, F, O> ChangeFeedProcessorBuilder<C, F, O> {
    pub fn new(
        options: ProcessorOptions,
        container: C,
        source_factory: F,
        observer_factory: O,
    ) -> Self {
        Self {
            options,
            container,
            source_factory,
            observer_factory,
            bootstrapper: SkipBootstrap,
            synchronizer: RetireGoneLeases,
            health: Arc::new(TracingHealthMonitor),
        }
    }
}

impl<C, F, O, B, Y> ChangeFeedProcessorBuilder<C, F, O, B, Y> {
    pub fn with_bootstrapper<B2>(
        self,
        bootstrapper: B2,
    ) -> ChangeFeedProcessorBuilder<C, F, O, B2, Y> {
        ChangeFeedProcessorBuilder {
            options: self.options,
            container: self.container,
            source_factory: self.source_factory,
            observer_factory: self.observer_factory,
            bootstrapper,
            synchronizer: self.synchronizer,
            health: self.health,
        }
    }

    pub fn with_synchronizer<Y2>(
        self,
        synchronizer: Y2,
    ) -> ChangeFeedProcessorBuilder<C, F, O, B, Y2> {
        ChangeFeedProcessorBuilder {
            options: self.options,
            container: self.container,
            source_factory: self.source_factory,
            observer_factory: self.observer_factory,
            bootstrapper: self.bootstrapper,
            synchronizer,
            health: self.health,
        }
    }

    pub fn with_health_monitor(mut self, health: Arc<dyn HealthMonitor>) -> Self {
        self.health = health;
        self
    }
}

impl<C, F, O, B, Y> ChangeFeedProcessorBuilder<C, F, O, B, Y>
where
    C: LeaseContainer,
    F: FeedPageSourceFactory,
    O: ChangeFeedObserverFactory<<F::Source as FeedPageSource>::Item>,
    B: Bootstrapper,
    Y: PartitionSynchronizer,
{
    pub fn build(self) -> ChangeFeedProcessor<B, C, F, O, Y> {
        let observer_factory = CheckpointerObserverFactory::new(
            self.observer_factory,
            self.options.checkpoint_frequency.clone(),
        );
        let controller = Arc::new(PartitionControllerCore::new(
            self.options.controller_settings(),
            self.container.clone(),
            self.source_factory,
            observer_factory,
            self.synchronizer,
            self.health,
        ));
        let load_balancer = PartitionLoadBalancer::new(
            self.container,
            controller.clone(),
            self.options.balancing_strategy(),
            self.options.lease_acquire_interval,
        );
        PartitionManager::new(self.bootstrapper, controller, load_balancer)
    }
}
