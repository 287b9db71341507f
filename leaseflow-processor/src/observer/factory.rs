use crate::Result;

use super::{
    AutoCheckpointer, ChangeFeedObserver, ChangeFeedObserverFactory, CheckpointFrequency,
    CloseReason, ObserverContext, ObserverExceptionWrapper,
};

/// An observer as composed by [`CheckpointerObserverFactory`]. Exception
/// wrapping always sits innermost, next to user code.
pub enum CheckpointingObserver<O> {
    Automatic(AutoCheckpointer<ObserverExceptionWrapper<O>>),
    Explicit(ObserverExceptionWrapper<O>),
}

impl<T, O> ChangeFeedObserver<T> for CheckpointingObserver<O>
where
    T: Sync,
    O: ChangeFeedObserver<T>,
{
    async fn open(&mut self, context: &ObserverContext) -> Result<()> {
        match self {
            CheckpointingObserver::Automatic(observer) => {
                ChangeFeedObserver::<T>::open(observer, context).await
            }
            CheckpointingObserver::Explicit(observer) => {
                ChangeFeedObserver::<T>::open(observer, context).await
            }
        }
    }

    async fn close(&mut self, context: &ObserverContext, reason: CloseReason) -> Result<()> {
        match self {
            CheckpointingObserver::Automatic(observer) => {
                ChangeFeedObserver::<T>::close(observer, context, reason).await
            }
            CheckpointingObserver::Explicit(observer) => {
                ChangeFeedObserver::<T>::close(observer, context, reason).await
            }
        }
    }

    async fn process_changes(&mut self, context: &ObserverContext, changes: &[T]) -> Result<()> {
        match self {
            CheckpointingObserver::Automatic(observer) => {
                observer.process_changes(context, changes).await
            }
            CheckpointingObserver::Explicit(observer) => {
                observer.process_changes(context, changes).await
            }
        }
    }
}

/// Wraps a user factory so every observer it creates gets exception
/// isolation and, unless checkpointing is explicit, automatic
/// checkpointing.
pub struct CheckpointerObserverFactory<F> {
    inner: F,
    frequency: CheckpointFrequency,
}

impl<F> CheckpointerObserverFactory<F> {
    pub fn new(inner: F, frequency: CheckpointFrequency) -> Self {
        Self { inner, frequency }
    }

    pub fn frequency(&self) -> &CheckpointFrequency {
        &self.frequency
    }
}

impl<T, F> ChangeFeedObserverFactory<T> for CheckpointerObserverFactory<F>
where
    T: Sync + 'static,
    F: ChangeFeedObserverFactory<T>,
{
    type Observer = CheckpointingObserver<F::Observer>;

    fn create(&self) -> Self::Observer {
        let observer = ObserverExceptionWrapper::new(self.inner.create());
        if self.frequency.explicit_checkpoint {
            CheckpointingObserver::Explicit(observer)
        } else {
            CheckpointingObserver::Automatic(AutoCheckpointer::new(
                observer,
                self.frequency.clone(),
            ))
        }
    }
}
