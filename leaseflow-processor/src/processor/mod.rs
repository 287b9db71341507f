//! Per-partition feed reading.

use std::{future::Future, time::Duration};

use chrono::{DateTime, Utc};

use crate::error::FeedFault;

mod partition_processor;

pub use partition_processor::{PartitionProcessor, DEFAULT_MAX_ITEM_COUNT};

#[cfg(test)]
mod tests;

/// Run parameters for one partition's feed loop.
#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    pub lease_token: String,
    pub max_item_count: Option<u32>,
    pub feed_poll_delay: Duration,
    pub start_continuation: Option<String>,
    pub start_from_beginning: bool,
    pub start_time: Option<DateTime<Utc>>,
    pub session_token: Option<String>,
}

impl ProcessorSettings {
    pub fn new(lease_token: impl Into<String>) -> Self {
        Self {
            lease_token: lease_token.into(),
            max_item_count: None,
            feed_poll_delay: Duration::from_secs(5),
            start_continuation: None,
            start_from_beginning: false,
            start_time: None,
            session_token: None,
        }
    }
}

/// One read of a partition's change feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedRequest<'a> {
    pub partition_token: &'a str,
    /// Where to resume. When unset the start options apply.
    pub continuation: Option<&'a str>,
    pub max_item_count: Option<u32>,
    pub session_token: Option<&'a str>,
    pub start_from_beginning: bool,
    pub start_time: Option<DateTime<Utc>>,
}

/// A page of changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Resumption token positioned after this page.
    pub continuation: String,
    pub has_more_results: bool,
    pub session_token: Option<String>,
}

/// The transport call returning pages of one partition's feed.
pub trait FeedPageSource: Send + 'static {
    type Item: Send + Sync + 'static;

    fn fetch_next(
        &mut self,
        request: &FeedRequest<'_>,
    ) -> impl Future<Output = Result<Page<Self::Item>, FeedFault>> + Send;
}

/// Binds a page source to a partition.
pub trait FeedPageSourceFactory: Send + Sync + 'static {
    type Source: FeedPageSource;

    fn create(&self, partition_token: &str) -> Self::Source;
}
