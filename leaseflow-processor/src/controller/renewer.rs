use std::time::Duration;

use backoff::{backoff::Backoff, ExponentialBackoff};
use tokio::{select, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    error::{is_lease_lost, CancelError},
    lease::{LeaseHandle, LeaseUpdate},
    lease_store::LeaseContainer,
    Result,
};

/// Keeps a held lease's timestamp fresh so other hosts don't treat it as
/// expired.
pub struct LeaseRenewer<C> {
    container: C,
    lease: LeaseHandle,
    renew_interval: Duration,
}

impl<C: LeaseContainer> LeaseRenewer<C> {
    pub fn new(container: C, lease: LeaseHandle, renew_interval: Duration) -> Self {
        Self {
            container,
            lease,
            renew_interval,
        }
    }

    /// Renew until cancelled or the lease is lost. The first renewal happens
    /// after half an interval.
    #[tracing::instrument(skip_all)]
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let mut delay = self.renew_interval / 2;
        loop {
            select! {
                _ = cancel.cancelled() => return Err(CancelError.into()),
                _ = sleep(delay) => {}
            }
            self.renew(&cancel).await?;
            delay = self.renew_interval;
        }
    }

    /// One renewal. Store failures are retried for up to one renew interval,
    /// then logged and left for the next round; only a lost lease or
    /// cancellation is returned.
    async fn renew(&self, cancel: &CancellationToken) -> Result<()> {
        let mut retry = ExponentialBackoff {
            max_elapsed_time: Some(self.renew_interval),
            ..Default::default()
        };
        loop {
            let err = match self.lease.update(&self.container, LeaseUpdate::Renew).await {
                Ok(lease) => {
                    debug!(partition = %lease.partition_token, version = %lease.version, "lease renewed");
                    return Ok(());
                }
                Err(e) if is_lease_lost(&e) => return Err(e),
                Err(e) => e,
            };
            match retry.next_backoff() {
                Some(delay) => {
                    warn!(err = format!("{:#}", err), ?delay, "renewing lease, retrying");
                    select! {
                        _ = cancel.cancelled() => return Err(CancelError.into()),
                        _ = sleep(delay) => {}
                    }
                }
                None => {
                    warn!(err = format!("{:#}", err), "renewing lease, retries exceeded");
                    return Ok(());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        error::is_cancelled,
        lease::Lease,
        lease_store::InMemoryLeaseContainer,
    };

    use super::*;

    async fn held(container: &InMemoryLeaseContainer) -> Lease {
        container.create_if_absent("0", None).await.unwrap();
        let lease = container.read("0").await.unwrap().unwrap();
        container.acquire(&lease, "a").await.unwrap()
    }

    #[tokio::test]
    async fn test_renews_until_cancelled() {
        let container = InMemoryLeaseContainer::new();
        let lease = held(&container).await;
        let renewer = LeaseRenewer::new(
            container.clone(),
            LeaseHandle::new(lease.clone()),
            Duration::from_millis(4),
        );
        let cancel = CancellationToken::new();
        let run = tokio::spawn({
            let cancel = cancel.clone();
            async move { renewer.run(cancel).await }
        });
        tokio::time::sleep(Duration::from_millis(30)).await;
        cancel.cancel();
        let err = run.await.unwrap().unwrap_err();
        assert!(is_cancelled(&err));

        let stored = container.read("0").await.unwrap().unwrap();
        assert!(stored.timestamp > lease.timestamp);
        assert_ne!(stored.version, lease.version);
        assert_eq!(stored.owner, "a");
    }

    #[tokio::test]
    async fn test_stolen_lease_ends_renewal() {
        let container = InMemoryLeaseContainer::new();
        let lease = held(&container).await;
        container.acquire(&lease, "b").await.unwrap();

        let renewer = LeaseRenewer::new(
            container.clone(),
            LeaseHandle::new(lease),
            Duration::from_millis(2),
        );
        let err = renewer.run(CancellationToken::new()).await.unwrap_err();
        assert!(is_lease_lost(&err));
        assert_eq!(container.read("0").await.unwrap().unwrap().owner, "b");
    }
}
