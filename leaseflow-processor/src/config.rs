use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::{
    balancing::EqualPartitionsBalancingStrategy, controller::ControllerSettings,
    observer::CheckpointFrequency,
};

/// Host-wide processor configuration.
#[derive(Debug, Clone)]
pub struct ProcessorOptions {
    /// Identifies this host as a lease owner. Must be unique in the fleet.
    pub host_name: String,
    pub lease_acquire_interval: Duration,
    pub lease_expiration_interval: Duration,
    pub lease_renew_interval: Duration,
    pub feed_poll_delay: Duration,
    pub max_item_count: Option<u32>,
    /// Zero leaves the bound unset.
    pub min_partition_count: usize,
    /// Zero leaves the bound unset.
    pub max_partition_count: usize,
    pub checkpoint_frequency: CheckpointFrequency,
    pub start_from_beginning: bool,
    pub start_time: Option<DateTime<Utc>>,
}

impl Default for ProcessorOptions {
    fn default() -> Self {
        Self {
            host_name: format!("host-{}", std::process::id()),
            lease_acquire_interval: Duration::from_secs(13),
            lease_expiration_interval: Duration::from_secs(60),
            lease_renew_interval: Duration::from_secs(17),
            feed_poll_delay: Duration::from_secs(5),
            max_item_count: None,
            min_partition_count: 0,
            max_partition_count: 0,
            checkpoint_frequency: CheckpointFrequency::default(),
            start_from_beginning: false,
            start_time: None,
        }
    }
}

impl ProcessorOptions {
    pub fn with_host_name(mut self, host_name: impl Into<String>) -> Self {
        self.host_name = host_name.into();
        self
    }

    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            host_name: self.host_name.clone(),
            lease_renew_interval: self.lease_renew_interval,
            feed_poll_delay: self.feed_poll_delay,
            max_item_count: self.max_item_count,
            start_from_beginning: self.start_from_beginning,
            start_time: self.start_time,
        }
    }

    pub fn balancing_strategy(&self) -> EqualPartitionsBalancingStrategy {
        EqualPartitionsBalancingStrategy::new(
            self.host_name.clone(),
            self.min_partition_count,
            self.max_partition_count,
            self.lease_expiration_interval,
        )
    }
}
