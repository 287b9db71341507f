use tracing::{debug, error, info};

use crate::Error;

/// Observability hooks for the processor. Calls must not block; the
/// processor invokes them inline from its loops.
pub trait HealthMonitor: Send + Sync {
    /// A component identified by `identifier` hit an error it recovered
    /// from or that ended a single partition.
    fn notify_error(&self, identifier: &str, error: &Error);

    fn notify_lease_acquire(&self, lease_token: &str) {
        let _ = lease_token;
    }

    fn notify_lease_release(&self, lease_token: &str) {
        let _ = lease_token;
    }
}

/// Default monitor that just traces.
#[derive(Debug, Clone, Default)]
pub struct TracingHealthMonitor;

impl HealthMonitor for TracingHealthMonitor {
    fn notify_error(&self, identifier: &str, error: &Error) {
        error!(identifier, err = format!("{:#}", error), "processor error");
    }

    fn notify_lease_acquire(&self, lease_token: &str) {
        info!(lease = lease_token, "lease acquired");
    }

    fn notify_lease_release(&self, lease_token: &str) {
        debug!(lease = lease_token, "lease released");
    }
}
