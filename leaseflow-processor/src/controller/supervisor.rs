use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    lease_store::LeaseContainer,
    observer::{ChangeFeedObserver, CloseReason, ObserverContext},
    processor::{FeedPageSource, PartitionProcessor},
    Result,
};

use super::LeaseRenewer;

/// Runs one owned partition: opens the observer, races the feed loop
/// against lease renewal, and closes the observer with the reason either
/// of them stopped.
pub struct PartitionSupervisor<S, O, C> {
    processor: PartitionProcessor<S>,
    renewer: LeaseRenewer<C>,
    observer: O,
    context: ObserverContext,
}

impl<S, O, C> PartitionSupervisor<S, O, C>
where
    S: FeedPageSource,
    O: ChangeFeedObserver<S::Item>,
    C: LeaseContainer,
{
    pub fn new(
        processor: PartitionProcessor<S>,
        renewer: LeaseRenewer<C>,
        observer: O,
        context: ObserverContext,
    ) -> Self {
        Self {
            processor,
            renewer,
            observer,
            context,
        }
    }

    #[tracing::instrument(skip_all, fields(lease = %self.context.lease_token()))]
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        self.observer.open(&self.context).await?;

        let stop = cancel.child_token();
        let res = select! {
            res = self.processor.run(&mut self.observer, stop.clone()) => res,
            res = self.renewer.run(stop.clone()) => res,
        };
        stop.cancel();

        let reason = CloseReason::from_result(&res);
        info!(?reason, "partition stopped");
        if let Err(e) = self.observer.close(&self.context, reason).await {
            warn!(err = format!("{:#}", e), "closing observer");
        }
        res
    }
}
