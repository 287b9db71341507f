use std::future::Future;

use crate::{lease::Lease, Result};

mod memory;
pub use memory::InMemoryLeaseContainer;

/// Persistence for lease records with optimistic concurrency.
///
/// Every mutating call takes the lease as last read and must fail with
/// [`LeaseStoreError::VersionConflict`](crate::error::LeaseStoreError) when
/// the stored version differs, or
/// [`LeaseStoreError::NotFound`](crate::error::LeaseStoreError) when the
/// record no longer exists. Successful writes return the stored record with
/// its new version.
pub trait LeaseContainer: Clone + Send + Sync + 'static {
    fn list_all(&self) -> impl Future<Output = Result<Vec<Lease>>> + Send;

    fn read(&self, partition_token: &str) -> impl Future<Output = Result<Option<Lease>>> + Send;

    /// Create an unowned lease for a partition unless one exists. Returns
    /// true when a record was created.
    fn create_if_absent(
        &self,
        partition_token: &str,
        continuation: Option<&str>,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Take ownership of `lease` for `owner`, refreshing its timestamp.
    fn acquire(&self, lease: &Lease, owner: &str) -> impl Future<Output = Result<Lease>> + Send;

    /// Refresh the timestamp of a lease this host owns.
    fn renew(&self, lease: &Lease) -> impl Future<Output = Result<Lease>> + Send;

    /// Persist a continuation token into a lease this host owns.
    fn checkpoint(
        &self,
        lease: &Lease,
        continuation: &str,
    ) -> impl Future<Output = Result<Lease>> + Send;

    /// Clear ownership so any host may acquire the lease.
    fn release(&self, lease: &Lease) -> impl Future<Output = Result<()>> + Send;

    /// Retire the lease of a partition that no longer exists.
    fn delete(&self, lease: &Lease) -> impl Future<Output = Result<()>> + Send;
}
