use tracing::warn;

use crate::{
    error::{is_cancelled, is_lease_lost, is_observer_failure, ObserverFailure},
    Error, Result,
};

use super::{ChangeFeedObserver, CloseReason, ObserverContext};

/// Normalizes anything raised by user observer code into
/// [`ObserverFailure`], tracing it on the way out.
///
/// Cancellation and lease loss, which user code can only have propagated
/// from the processor's own calls such as [`ObserverContext::checkpoint`],
/// pass through unchanged.
pub struct ObserverExceptionWrapper<O> {
    inner: O,
}

impl<O> ObserverExceptionWrapper<O> {
    pub fn new(inner: O) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &O {
        &self.inner
    }
}

fn wrap(operation: &str, context: &ObserverContext, err: Error) -> Error {
    if is_observer_failure(&err) || is_cancelled(&err) || is_lease_lost(&err) {
        return err;
    }
    warn!(
        lease = context.lease_token(),
        operation,
        err = format!("{:#}", err),
        "observer raised an error"
    );
    ObserverFailure { source: err }.into()
}

impl<T, O> ChangeFeedObserver<T> for ObserverExceptionWrapper<O>
where
    T: Sync,
    O: ChangeFeedObserver<T>,
{
    async fn open(&mut self, context: &ObserverContext) -> Result<()> {
        self.inner
            .open(context)
            .await
            .map_err(|e| wrap("open", context, e))
    }

    async fn close(&mut self, context: &ObserverContext, reason: CloseReason) -> Result<()> {
        self.inner
            .close(context, reason)
            .await
            .map_err(|e| wrap("close", context, e))
    }

    async fn process_changes(&mut self, context: &ObserverContext, changes: &[T]) -> Result<()> {
        self.inner
            .process_changes(context, changes)
            .await
            .map_err(|e| wrap("process_changes", context, e))
    }
}
