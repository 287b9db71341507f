use std::{fmt, time::Duration};

use thiserror::Error as ThisError;

pub type Error = anyhow::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Raised when a task stops because its owner asked it to.
pub struct CancelError;

impl std::error::Error for CancelError {}

impl fmt::Display for CancelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cancelled")
    }
}

impl fmt::Debug for CancelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cancelled")
    }
}

pub fn is_cancelled(e: &Error) -> bool {
    for cause in e.chain() {
        if cause.downcast_ref::<CancelError>().is_some() {
            return true;
        }
    }
    false
}

/// Classified fault returned by a feed page source.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum FeedFault {
    #[error("partition not found")]
    PartitionNotFound,

    #[error("partition split")]
    PartitionSplit,

    /// Throttling or any other retriable service condition.
    #[error("transient service error: {reason}")]
    Transient {
        reason: String,
        retry_after: Option<Duration>,
    },

    #[error("response page too large")]
    PageTooLarge,

    /// The transport gave up on a request that nobody asked to stop.
    #[error("request cancelled by transport")]
    Cancelled,

    #[error("undefined service error: {0}")]
    Undefined(String),
}

/// Terminal outcome of a partition's feed loop. The lease needs lifecycle
/// action from the controller before anyone can read the partition again.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum FeedError {
    #[error("partition feed not found (last continuation {continuation:?})")]
    NotFound { continuation: Option<String> },

    #[error("partition feed split (last continuation {continuation:?})")]
    Split { continuation: Option<String> },
}

impl FeedError {
    pub fn continuation(&self) -> Option<&str> {
        match self {
            FeedError::NotFound { continuation } | FeedError::Split { continuation } => {
                continuation.as_deref()
            }
        }
    }
}

pub fn as_feed_error(e: &Error) -> Option<&FeedError> {
    for cause in e.chain() {
        if let Some(err) = cause.downcast_ref::<FeedError>() {
            return Some(err);
        }
    }
    None
}

/// Raw outcome of a conditional write against the lease store.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum LeaseStoreError {
    #[error("lease {token} version conflict")]
    VersionConflict { token: String },

    #[error("lease {token} not found")]
    NotFound { token: String },
}

pub fn as_store_error(e: &Error) -> Option<&LeaseStoreError> {
    for cause in e.chain() {
        if let Some(err) = cause.downcast_ref::<LeaseStoreError>() {
            return Some(err);
        }
    }
    None
}

/// Another host acquired the lease, or its record is gone.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
#[error("lease {token} lost")]
pub struct LeaseLost {
    pub token: String,
}

pub fn is_lease_lost(e: &Error) -> bool {
    for cause in e.chain() {
        if cause.downcast_ref::<LeaseLost>().is_some() {
            return true;
        }
    }
    false
}

/// Uniform wrapper for any error raised by user observer code.
#[derive(Debug, ThisError)]
#[error("observer failed: {source}")]
pub struct ObserverFailure {
    #[source]
    pub source: anyhow::Error,
}

pub fn is_observer_failure(e: &Error) -> bool {
    for cause in e.chain() {
        if cause.downcast_ref::<ObserverFailure>().is_some() {
            return true;
        }
    }
    false
}

#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum CheckpointError {
    #[error("explicit checkpoint requested while automatic checkpointing is enabled")]
    AutomaticCheckpointing,

    #[error("no continuation to checkpoint")]
    NoContinuation,
}

/// Start/stop called out of order on a long-lived loop.
#[derive(Debug, Clone, PartialEq, Eq, ThisError)]
pub enum LifecycleError {
    #[error("already started")]
    AlreadyStarted,

    #[error("start has to be called before stop")]
    NotStarted,
}
