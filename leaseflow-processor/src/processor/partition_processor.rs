use std::{sync::Arc, time::Duration};

use tokio::{select, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::{
    checkpoint::Checkpointer,
    error::{CancelError, FeedError, FeedFault},
    observer::{ChangeFeedObserver, ObserverContext},
    Error, Result,
};

use super::{FeedPageSource, FeedRequest, ProcessorSettings};

/// Page size to start shrinking from when none was configured.
pub const DEFAULT_MAX_ITEM_COUNT: u32 = 100;

enum DrainError {
    Fault(FeedFault),
    Cancelled,
    Observer(Error),
}

/// Reads one partition's feed and delivers non-empty pages to an observer.
///
/// The processor owns its adjusted page size and its position in the feed;
/// nothing here is shared with other partitions.
pub struct PartitionProcessor<S> {
    source: S,
    settings: ProcessorSettings,
    checkpointer: Arc<dyn Checkpointer>,
    max_item_count: Option<u32>,
    continuation: Option<String>,
    session_token: Option<String>,
}

impl<S: FeedPageSource> PartitionProcessor<S> {
    pub fn new(
        source: S,
        settings: ProcessorSettings,
        checkpointer: Arc<dyn Checkpointer>,
    ) -> Self {
        Self {
            source,
            max_item_count: settings.max_item_count,
            continuation: settings.start_continuation.clone(),
            session_token: settings.session_token.clone(),
            settings,
            checkpointer,
        }
    }

    /// Last continuation read from the feed, whether or not it has been
    /// checkpointed.
    pub fn continuation(&self) -> Option<&str> {
        self.continuation.as_deref()
    }

    /// Page size the next request will ask for.
    pub fn max_item_count(&self) -> Option<u32> {
        self.max_item_count
    }

    /// Poll the feed until `cancel` fires or the partition fails terminally.
    ///
    /// Returns [`CancelError`] on cancellation and [`FeedError`] when the
    /// partition is gone or split. Observer errors end the loop unchanged.
    #[tracing::instrument(skip_all, fields(lease = %self.settings.lease_token))]
    pub async fn run<O>(&mut self, observer: &mut O, cancel: CancellationToken) -> Result<()>
    where
        O: ChangeFeedObserver<S::Item>,
    {
        info!(continuation = ?self.continuation, "partition processor started");
        loop {
            let mut delay = self.settings.feed_poll_delay;
            match self.drain(observer, &cancel).await {
                Ok(()) => {
                    if self.max_item_count != self.settings.max_item_count {
                        debug!(
                            max_item_count = ?self.settings.max_item_count,
                            "restoring page size"
                        );
                        self.max_item_count = self.settings.max_item_count;
                    }
                }
                Err(DrainError::Cancelled) => return Err(CancelError.into()),
                Err(DrainError::Observer(e)) => return Err(e),
                Err(DrainError::Fault(fault)) => {
                    if let Some(retry) = self.handle_fault(fault, &cancel)? {
                        delay = retry;
                    }
                }
            }
            select! {
                _ = cancel.cancelled() => return Err(CancelError.into()),
                _ = sleep(delay) => {}
            }
        }
    }

    /// Fetch pages until the source has nothing more to return right now.
    async fn drain<O>(
        &mut self,
        observer: &mut O,
        cancel: &CancellationToken,
    ) -> std::result::Result<(), DrainError>
    where
        O: ChangeFeedObserver<S::Item>,
    {
        loop {
            let request = FeedRequest {
                partition_token: &self.settings.lease_token,
                continuation: self.continuation.as_deref(),
                max_item_count: self.max_item_count,
                session_token: self.session_token.as_deref(),
                start_from_beginning: self.settings.start_from_beginning,
                start_time: self.settings.start_time,
            };
            let page = select! {
                _ = cancel.cancelled() => return Err(DrainError::Cancelled),
                res = self.source.fetch_next(&request) => res.map_err(DrainError::Fault)?,
            };
            if page.session_token.is_some() {
                self.session_token = page.session_token;
            }

            if !page.items.is_empty() {
                trace!(
                    items = page.items.len(),
                    continuation = %page.continuation,
                    "delivering page"
                );
                let context = ObserverContext::new(
                    self.settings.lease_token.clone(),
                    self.session_token.clone(),
                    Some(page.continuation.clone()),
                    self.checkpointer.clone(),
                );
                observer
                    .process_changes(&context, &page.items)
                    .await
                    .map_err(DrainError::Observer)?;
            }
            self.continuation = Some(page.continuation);

            if !page.has_more_results {
                return Ok(());
            }
        }
    }

    /// Decide what a fault means for the loop. `Ok(Some(delay))` overrides
    /// the poll delay before the next attempt; errors end the loop.
    fn handle_fault(
        &mut self,
        fault: FeedFault,
        cancel: &CancellationToken,
    ) -> Result<Option<Duration>> {
        match fault {
            FeedFault::PartitionNotFound => {
                info!(continuation = ?self.continuation, "partition not found");
                Err(FeedError::NotFound {
                    continuation: self.continuation.clone(),
                }
                .into())
            }
            FeedFault::PartitionSplit => {
                info!(continuation = ?self.continuation, "partition split");
                Err(FeedError::Split {
                    continuation: self.continuation.clone(),
                }
                .into())
            }
            FeedFault::Transient {
                reason,
                retry_after,
            } => {
                debug!(reason, ?retry_after, "transient feed error, retrying");
                Ok(retry_after)
            }
            FeedFault::PageTooLarge => {
                let current = self.max_item_count.unwrap_or(DEFAULT_MAX_ITEM_COUNT);
                if current <= 1 {
                    return Err(Error::from(FeedFault::PageTooLarge)
                        .context("page size cannot be reduced below 1"));
                }
                self.max_item_count = Some(current / 2);
                warn!(
                    from = current,
                    to = current / 2,
                    "response too large, reducing page size"
                );
                Ok(None)
            }
            FeedFault::Cancelled => {
                if cancel.is_cancelled() {
                    return Err(CancelError.into());
                }
                debug!("request cancelled by transport, continuing");
                Ok(None)
            }
            fault @ FeedFault::Undefined(_) => Err(fault.into()),
        }
    }
}
