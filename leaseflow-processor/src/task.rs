use std::future::Future;

use tokio::{sync::Mutex, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::{error::LifecycleError, Result};

struct Running {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Start/stop state machine for one long-lived background loop.
///
/// Stopping cancels the loop's token and joins the task, so once `stop`
/// returns the loop has fully exited.
#[derive(Default)]
pub(crate) struct LoopTask {
    running: Mutex<Option<Running>>,
}

impl LoopTask {
    pub(crate) async fn start<F, Fut>(&self, run: F) -> Result<()>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(LifecycleError::AlreadyStarted.into());
        }
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(cancel.clone()));
        *running = Some(Running { cancel, task });
        Ok(())
    }

    pub(crate) async fn stop(&self) -> Result<()> {
        let Running { cancel, task } = self
            .running
            .lock()
            .await
            .take()
            .ok_or(LifecycleError::NotStarted)?;
        cancel.cancel();
        if let Err(e) = task.await {
            warn!(err = %e, "background loop did not exit cleanly");
        }
        Ok(())
    }

    pub(crate) async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }
}
