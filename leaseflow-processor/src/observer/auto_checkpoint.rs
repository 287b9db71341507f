use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::Result;

use super::{ChangeFeedObserver, CloseReason, ObserverContext};

/// When to write checkpoints.
///
/// With neither threshold set and explicit mode off, every delivered batch
/// is checkpointed. Otherwise a checkpoint is written as soon as either
/// threshold is reached.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckpointFrequency {
    /// The observer checkpoints through [`ObserverContext::checkpoint`].
    pub explicit_checkpoint: bool,

    /// Checkpoint after this many delivered batches.
    pub processed_document_count: Option<u64>,

    /// Checkpoint once this much time has passed since the last one.
    pub time_interval: Option<Duration>,
}

impl CheckpointFrequency {
    pub fn explicit() -> Self {
        Self {
            explicit_checkpoint: true,
            ..Default::default()
        }
    }

    pub fn every_batches(count: u64) -> Self {
        Self {
            processed_document_count: Some(count),
            ..Default::default()
        }
    }

    pub fn every(interval: Duration) -> Self {
        Self {
            time_interval: Some(interval),
            ..Default::default()
        }
    }
}

/// Checkpoints on the observer's behalf after successfully delivered
/// batches, according to a [`CheckpointFrequency`].
pub struct AutoCheckpointer<O> {
    inner: O,
    frequency: CheckpointFrequency,
    processed_batch_count: u64,
    last_checkpoint_time: Instant,
}

impl<O> AutoCheckpointer<O> {
    pub fn new(inner: O, frequency: CheckpointFrequency) -> Self {
        Self {
            inner,
            frequency,
            processed_batch_count: 0,
            last_checkpoint_time: Instant::now(),
        }
    }

    pub fn processed_batch_count(&self) -> u64 {
        self.processed_batch_count
    }

    pub fn inner(&self) -> &O {
        &self.inner
    }

    fn is_checkpoint_needed(&self) -> bool {
        let CheckpointFrequency {
            processed_document_count,
            time_interval,
            ..
        } = &self.frequency;
        if processed_document_count.is_none() && time_interval.is_none() {
            return true;
        }
        if let Some(count) = processed_document_count {
            if self.processed_batch_count >= *count {
                return true;
            }
        }
        if let Some(interval) = time_interval {
            if self.last_checkpoint_time.elapsed() >= *interval {
                return true;
            }
        }
        false
    }
}

impl<T, O> ChangeFeedObserver<T> for AutoCheckpointer<O>
where
    T: Sync,
    O: ChangeFeedObserver<T>,
{
    async fn open(&mut self, context: &ObserverContext) -> Result<()> {
        self.inner.open(&context.without_checkpoint()).await
    }

    async fn close(&mut self, context: &ObserverContext, reason: CloseReason) -> Result<()> {
        self.inner.close(&context.without_checkpoint(), reason).await
    }

    async fn process_changes(&mut self, context: &ObserverContext, changes: &[T]) -> Result<()> {
        self.inner
            .process_changes(&context.without_checkpoint(), changes)
            .await?;

        self.processed_batch_count += 1;
        if self.is_checkpoint_needed() {
            context.checkpoint().await?;
            debug!(
                lease = context.lease_token(),
                batches = self.processed_batch_count,
                "checkpointed"
            );
            self.processed_batch_count = 0;
            self.last_checkpoint_time = Instant::now();
        }
        Ok(())
    }
}
