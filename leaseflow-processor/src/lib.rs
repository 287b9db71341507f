//! Distributes the partitions of a change feed across a fleet of hosts and
//! runs a resilient reader for every partition a host owns.
//!
//! Hosts coordinate only through a shared [`LeaseContainer`]: each
//! partition has a [`Lease`] recording its owner and how far it has been
//! read. A [`PartitionManager`] bootstraps the leases, resumes the ones this
//! host already owns and starts a [`PartitionLoadBalancer`] that takes over
//! a fair share of the rest. Every owned partition is read by a
//! [`PartitionProcessor`] that delivers changes to a user
//! [`ChangeFeedObserver`] and checkpoints progress back into the lease.

mod builder;
mod checkpoint;
mod config;
mod error;
mod health;
mod lease;
mod manager;
mod task;

pub mod balancing;
pub mod bootstrap;
pub mod controller;
pub mod estimator;
pub mod lease_store;
pub mod observer;
pub mod processor;

pub use balancing::{
    EqualPartitionsBalancingStrategy, LoadBalancingStrategy, PartitionLoadBalancer,
};
pub use builder::{ChangeFeedProcessor, ChangeFeedProcessorBuilder};
pub use checkpoint::{Checkpointer, PartitionCheckpointer};
pub use config::ProcessorOptions;
pub use controller::{PartitionController, PartitionControllerCore};
pub use error::{
    as_feed_error, as_store_error, is_cancelled, is_lease_lost, is_observer_failure, CancelError,
    CheckpointError, Error, FeedError, FeedFault, LeaseLost, LeaseStoreError, LifecycleError,
    ObserverFailure, Result,
};
pub use estimator::{FeedEstimator, RemainingLeaseWork, RemainingWorkEstimator};
pub use health::{HealthMonitor, TracingHealthMonitor};
pub use lease::{Lease, LeaseHandle, LeaseUpdate};
pub use lease_store::{InMemoryLeaseContainer, LeaseContainer};
pub use manager::PartitionManager;
pub use observer::{
    ChangeFeedObserver, ChangeFeedObserverFactory, CheckpointFrequency, CloseReason,
    ObserverContext,
};
pub use processor::{FeedPageSource, FeedPageSourceFactory, FeedRequest, Page, PartitionProcessor};

#[cfg(test)]
pub mod tests;
