//! Lease rebalancing across the hosts of a fleet.
//!
//! A [`LoadBalancingStrategy`] looks at the global lease snapshot and decides
//! which leases this host should try to take in the current cycle. The
//! [`PartitionLoadBalancer`] runs that decision periodically and hands the
//! candidates to the partition controller. Acquisition itself is arbitrated
//! by the lease store; the strategy only proposes.

mod equal_partitions;
mod load_balancer;

pub use equal_partitions::EqualPartitionsBalancingStrategy;
pub use load_balancer::PartitionLoadBalancer;

use crate::lease::Lease;

pub trait LoadBalancingStrategy: Send + Sync + 'static {
    /// Leases this host should attempt to acquire. Must not return more
    /// than the host's remaining quota, and never mutates its input.
    fn select_leases_to_take(&self, all_leases: &[Lease]) -> Vec<Lease>;
}
