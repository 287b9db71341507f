//! User observers and the checkpointing pipeline wrapped around them.
//!
//! Observers are composed per partition by [`CheckpointerObserverFactory`]:
//! user code is wrapped by [`ObserverExceptionWrapper`] first, so anything
//! it raises reaches the rest of the processor as a single
//! [`ObserverFailure`](crate::error::ObserverFailure), and then, unless
//! checkpointing is explicit, by [`AutoCheckpointer`].

use std::{future::Future, sync::Arc};

use crate::{
    checkpoint::Checkpointer,
    error::{
        as_feed_error, is_cancelled, is_lease_lost, is_observer_failure, CheckpointError,
    },
    Result,
};

mod auto_checkpoint;
mod factory;
mod wrapping;

pub use auto_checkpoint::{AutoCheckpointer, CheckpointFrequency};
pub use factory::{CheckpointerObserverFactory, CheckpointingObserver};
pub use wrapping::ObserverExceptionWrapper;


/// Why an observer is being closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Unknown,
    Shutdown,
    /// The partition was split or no longer exists.
    ResourceGone,
    LeaseLost,
    ObserverError,
}

impl CloseReason {
    pub fn from_result(res: &Result<()>) -> Self {
        let Err(e) = res else {
            return CloseReason::Unknown;
        };
        if is_cancelled(e) {
            CloseReason::Shutdown
        } else if as_feed_error(e).is_some() {
            CloseReason::ResourceGone
        } else if is_lease_lost(e) {
            CloseReason::LeaseLost
        } else if is_observer_failure(e) {
            CloseReason::ObserverError
        } else {
            CloseReason::Unknown
        }
    }
}

#[derive(Clone)]
enum CheckpointCapability {
    Available(Arc<dyn Checkpointer>),
    /// Checkpoints are written by the automatic checkpointer only.
    Managed,
}

/// What an observer knows about the partition it is serving.
#[derive(Clone)]
pub struct ObserverContext {
    lease_token: String,
    session_token: Option<String>,
    continuation: Option<String>,
    checkpoint: CheckpointCapability,
}

impl ObserverContext {
    pub fn new(
        lease_token: impl Into<String>,
        session_token: Option<String>,
        continuation: Option<String>,
        checkpointer: Arc<dyn Checkpointer>,
    ) -> Self {
        Self {
            lease_token: lease_token.into(),
            session_token,
            continuation,
            checkpoint: CheckpointCapability::Available(checkpointer),
        }
    }

    pub fn lease_token(&self) -> &str {
        &self.lease_token
    }

    pub fn session_token(&self) -> Option<&str> {
        self.session_token.as_deref()
    }

    /// Resumption token of the batch being delivered, if any.
    pub fn continuation(&self) -> Option<&str> {
        self.continuation.as_deref()
    }

    /// Persist the current batch's continuation into the lease.
    ///
    /// Only valid with explicit checkpointing; when automatic checkpointing
    /// is active the call is rejected without touching the lease store.
    pub async fn checkpoint(&self) -> Result<()> {
        let checkpointer = match &self.checkpoint {
            CheckpointCapability::Managed => {
                return Err(CheckpointError::AutomaticCheckpointing.into())
            }
            CheckpointCapability::Available(checkpointer) => checkpointer,
        };
        let continuation = self
            .continuation
            .as_deref()
            .ok_or(CheckpointError::NoContinuation)?;
        checkpointer.checkpoint(continuation).await
    }

    pub(crate) fn without_checkpoint(&self) -> Self {
        Self {
            checkpoint: CheckpointCapability::Managed,
            ..self.clone()
        }
    }
}

/// User callbacks receiving a partition's change batches.
pub trait ChangeFeedObserver<T: Sync>: Send {
    fn open(&mut self, context: &ObserverContext) -> impl Future<Output = Result<()>> + Send {
        let _ = context;
        async { Ok(()) }
    }

    fn close(
        &mut self,
        context: &ObserverContext,
        reason: CloseReason,
    ) -> impl Future<Output = Result<()>> + Send {
        let _ = (context, reason);
        async { Ok(()) }
    }

    fn process_changes(
        &mut self,
        context: &ObserverContext,
        changes: &[T],
    ) -> impl Future<Output = Result<()>> + Send;
}

/// Creates one observer per partition.
pub trait ChangeFeedObserverFactory<T: Sync>: Send + Sync + 'static {
    type Observer: ChangeFeedObserver<T> + 'static;

    fn create(&self) -> Self::Observer;
}

impl<T, O, F> ChangeFeedObserverFactory<T> for F
where
    T: Sync,
    O: ChangeFeedObserver<T> + 'static,
    F: Fn() -> O + Send + Sync + 'static,
{
    type Observer = O;

    fn create(&self) -> O {
        self()
    }
}
