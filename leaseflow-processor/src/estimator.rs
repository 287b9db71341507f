//! Backlog reporting, independent of partition processing.

use std::{future::Future, sync::Arc, time::Duration};

use tokio::{select, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::{health::HealthMonitor, task::LoopTask, Result};

pub const DEFAULT_ESTIMATION_PERIOD: Duration = Duration::from_secs(5);

/// Estimated number of changes not yet delivered for one lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemainingLeaseWork {
    pub lease_token: String,
    pub remaining_work: u64,
}

/// Source of per-lease backlog estimates.
pub trait RemainingWorkEstimator: Send + Sync + 'static {
    fn estimate(&self) -> impl Future<Output = Result<Vec<RemainingLeaseWork>>> + Send;
}

/// Receives the summed backlog on every tick.
pub type EstimationCallback = Arc<dyn Fn(u64) + Send + Sync>;

/// Periodically sums the backlog across leases and hands it to a callback.
///
/// No rows at all is reported as 1: nothing known is not the same as
/// nothing pending. Estimation errors go to the health monitor and never
/// stop the loop.
pub struct FeedEstimator<E> {
    estimator: Arc<E>,
    callback: EstimationCallback,
    health: Arc<dyn HealthMonitor>,
    estimation_period: Duration,
    task: LoopTask,
}

impl<E: RemainingWorkEstimator> FeedEstimator<E> {
    pub fn new(estimator: E, callback: EstimationCallback, health: Arc<dyn HealthMonitor>) -> Self {
        Self {
            estimator: Arc::new(estimator),
            callback,
            health,
            estimation_period: DEFAULT_ESTIMATION_PERIOD,
            task: LoopTask::default(),
        }
    }

    pub fn with_estimation_period(mut self, estimation_period: Duration) -> Self {
        self.estimation_period = estimation_period;
        self
    }

    pub async fn start(&self) -> Result<()> {
        let estimator = self.estimator.clone();
        let callback = self.callback.clone();
        let health = self.health.clone();
        let period = self.estimation_period;
        self.task
            .start(move |cancel| run(estimator, callback, health, period, cancel))
            .await
    }

    pub async fn stop(&self) -> Result<()> {
        self.task.stop().await
    }

    pub async fn is_running(&self) -> bool {
        self.task.is_running().await
    }
}

#[tracing::instrument(skip_all)]
async fn run<E: RemainingWorkEstimator>(
    estimator: Arc<E>,
    callback: EstimationCallback,
    health: Arc<dyn HealthMonitor>,
    period: Duration,
    cancel: CancellationToken,
) {
    info!(?period, "feed estimator started");
    loop {
        select! {
            _ = cancel.cancelled() => break,
            _ = estimate(estimator.as_ref(), callback.as_ref(), health.as_ref()) => {}
        }
        select! {
            _ = cancel.cancelled() => break,
            _ = sleep(period) => {}
        }
    }
    info!("feed estimator stopped");
}

async fn estimate<E: RemainingWorkEstimator>(
    estimator: &E,
    callback: &(dyn Fn(u64) + Send + Sync),
    health: &dyn HealthMonitor,
) {
    match estimator.estimate().await {
        Ok(rows) => {
            let total = total_remaining_work(&rows);
            debug!(leases = rows.len(), total, "estimated backlog");
            callback(total);
        }
        Err(e) => health.notify_error("feed estimator", &e),
    }
}

fn total_remaining_work(rows: &[RemainingLeaseWork]) -> u64 {
    if rows.is_empty() {
        return 1;
    }
    rows.iter()
        .fold(0u64, |total, row| total.saturating_add(row.remaining_work))
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use crate::tests::{RecordingHealthMonitor, StubEstimator};

    use super::*;

    fn row(token: &str, remaining_work: u64) -> RemainingLeaseWork {
        RemainingLeaseWork {
            lease_token: token.to_owned(),
            remaining_work,
        }
    }

    #[test]
    fn test_total() {
        assert_eq!(total_remaining_work(&[]), 1);
        assert_eq!(total_remaining_work(&[row("0", 0)]), 0);
        assert_eq!(total_remaining_work(&[row("0", 3), row("1", 4)]), 7);
        assert_eq!(
            total_remaining_work(&[row("0", u64::MAX), row("1", 4)]),
            u64::MAX
        );
    }

    #[tokio::test]
    async fn test_errors_are_reported_and_loop_continues() {
        let calls = Arc::new(Mutex::new(0usize));
        let mut estimator = StubEstimator::new();
        let calls_clone = calls.clone();
        estimator.estimate_result = Arc::new(Mutex::new(move || {
            let mut calls = calls_clone.lock().unwrap();
            *calls += 1;
            if *calls == 1 {
                anyhow::bail!("lease store unavailable");
            }
            Ok(vec![row("0", 5), row("1", 6)])
        }));

        let reported = Arc::new(Mutex::new(vec![]));
        let reported_clone = reported.clone();
        let health = Arc::new(RecordingHealthMonitor::default());
        let feed_estimator = FeedEstimator::new(
            estimator,
            Arc::new(move |total| reported_clone.lock().unwrap().push(total)),
            health.clone(),
        )
        .with_estimation_period(Duration::from_millis(2));

        feed_estimator.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        feed_estimator.stop().await.unwrap();
        assert!(!feed_estimator.is_running().await);

        let errors = health.errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, "feed estimator");
        let reported = reported.lock().unwrap();
        assert!(!reported.is_empty());
        assert!(reported.iter().all(|total| *total == 11));
    }

    #[tokio::test]
    async fn test_no_rows_reports_one() {
        let mut estimator = StubEstimator::new();
        estimator.estimate_result = Arc::new(Mutex::new(|| -> Result<Vec<RemainingLeaseWork>> {
            Ok(vec![])
        }));
        let reported = Arc::new(Mutex::new(vec![]));
        let reported_clone = reported.clone();
        let feed_estimator = FeedEstimator::new(
            estimator,
            Arc::new(move |total| reported_clone.lock().unwrap().push(total)),
            Arc::new(RecordingHealthMonitor::default()),
        )
        .with_estimation_period(Duration::from_millis(2));

        feed_estimator.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        feed_estimator.stop().await.unwrap();

        let reported = reported.lock().unwrap();
        assert!(!reported.is_empty());
        assert!(reported.iter().all(|total| *total == 1));
    }
}
