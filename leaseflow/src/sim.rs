//! A synthetic change feed and its collaborators for fleet simulations.
//!
//! Every partition holds a fixed run of sequence numbers. Continuations are
//! the decimal offset of the next unread change, so backlog can be derived
//! from a lease alone.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use leaseflow_processor::{
    estimator::RemainingLeaseWork, ChangeFeedObserver, FeedFault, FeedPageSource,
    FeedPageSourceFactory, FeedRequest, InMemoryLeaseContainer, LeaseContainer, ObserverContext,
    Page, RemainingWorkEstimator, Result,
};
use tracing::debug;

const DEFAULT_PAGE_SIZE: u64 = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub partition: String,
    pub sequence: u64,
}

#[derive(Debug, Clone)]
pub struct SyntheticFeed {
    items_per_partition: u64,
}

impl SyntheticFeed {
    pub fn new(items_per_partition: u64) -> Self {
        Self {
            items_per_partition,
        }
    }
}

impl FeedPageSourceFactory for SyntheticFeed {
    type Source = SyntheticPartition;

    fn create(&self, partition_token: &str) -> SyntheticPartition {
        SyntheticPartition {
            partition: partition_token.to_owned(),
            len: self.items_per_partition,
        }
    }
}

pub struct SyntheticPartition {
    partition: String,
    len: u64,
}

impl FeedPageSource for SyntheticPartition {
    type Item = Change;

    async fn fetch_next(
        &mut self,
        request: &FeedRequest<'_>,
    ) -> std::result::Result<Page<Change>, FeedFault> {
        let start = match request.continuation {
            Some(continuation) => parse_offset(continuation)?,
            None => 0,
        };
        let page_size = request
            .max_item_count
            .map(u64::from)
            .unwrap_or(DEFAULT_PAGE_SIZE);
        let end = self.len.min(start.saturating_add(page_size));
        let items = (start..end)
            .map(|sequence| Change {
                partition: self.partition.clone(),
                sequence,
            })
            .collect();
        Ok(Page {
            items,
            continuation: end.to_string(),
            has_more_results: end < self.len,
            session_token: None,
        })
    }
}

fn parse_offset(continuation: &str) -> std::result::Result<u64, FeedFault> {
    continuation
        .parse()
        .map_err(|_| FeedFault::Undefined(format!("malformed continuation {:?}", continuation)))
}

/// Counts delivered changes across the whole fleet.
pub struct CountingObserver {
    host_name: String,
    processed: Arc<AtomicU64>,
}

impl CountingObserver {
    pub fn new(host_name: impl Into<String>, processed: Arc<AtomicU64>) -> Self {
        Self {
            host_name: host_name.into(),
            processed,
        }
    }
}

impl ChangeFeedObserver<Change> for CountingObserver {
    async fn process_changes(&mut self, context: &ObserverContext, changes: &[Change]) -> Result<()> {
        self.processed
            .fetch_add(changes.len() as u64, Ordering::Relaxed);
        debug!(
            host = %self.host_name,
            partition = context.lease_token(),
            changes = changes.len(),
            "batch"
        );
        Ok(())
    }
}

/// Derives each lease's backlog from its checkpointed offset.
pub struct ContinuationLagEstimator {
    container: InMemoryLeaseContainer,
    items_per_partition: u64,
}

impl ContinuationLagEstimator {
    pub fn new(container: InMemoryLeaseContainer, items_per_partition: u64) -> Self {
        Self {
            container,
            items_per_partition,
        }
    }
}

impl RemainingWorkEstimator for ContinuationLagEstimator {
    async fn estimate(&self) -> Result<Vec<RemainingLeaseWork>> {
        let mut rows = vec![];
        for lease in self.container.list_all().await? {
            let offset = match lease.continuation_token.as_deref() {
                Some(continuation) => parse_offset(continuation)?,
                None => 0,
            };
            rows.push(RemainingLeaseWork {
                remaining_work: self.items_per_partition.saturating_sub(offset),
                lease_token: lease.partition_token,
            });
        }
        Ok(rows)
    }
}
