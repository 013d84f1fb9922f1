//! Deferred (submit → poll → fetch) operations.
//!
//! Some providers cannot answer synchronously: a search job has to be
//! submitted and polled before its results can be paged through, and an
//! offline product has to be ordered before its bytes can be fetched. Both
//! workflows implement [`DeferredWorkflow`] and are driven by the single
//! [`DeferredEngine`].
//!
//! ```text
//!   submit ──► Submitted ──► poll ──► Pending ──(sleep interval)──► poll ...
//!                              │                       │
//!                              ├──► Ready ──► fetch    └──► Expired (Timeout)
//!                              └──► Failed (Rejected)
//! ```

mod engine;

use std::fmt;
use std::time::Duration;

use futures::future::BoxFuture;

use crate::error::GatewayResult;

pub use engine::DeferredEngine;

/// Default spacing between two status polls (seconds).
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;

/// Default overall wait before giving up (minutes).
pub const DEFAULT_DEADLINE_MINS: u64 = 20;

/// What is being waited for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    SearchJob,
    DownloadOrder,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SearchJob => f.write_str("search job"),
            Self::DownloadOrder => f.write_str("download order"),
        }
    }
}

/// Lifecycle of a deferred operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationStatus {
    Submitted,
    Pending,
    Ready,
    Failed,
    Expired,
}

/// Snapshot of a running deferred operation.
#[derive(Debug, Clone)]
pub struct DeferredOperation {
    pub kind: OperationKind,
    pub provider: String,
    /// Remote job or order handle, as displayed by the workflow.
    pub handle: Option<String>,
    pub status: OperationStatus,
    pub interval: Duration,
    pub deadline: Option<Duration>,
    pub attempts: u32,
    pub last_message: Option<String>,
}

impl DeferredOperation {
    fn new(kind: OperationKind, provider: &str, policy: &PollPolicy) -> Self {
        Self {
            kind,
            provider: provider.to_string(),
            handle: None,
            status: OperationStatus::Submitted,
            interval: policy.interval,
            deadline: policy.deadline,
            attempts: 0,
            last_message: None,
        }
    }

    /// Human readable last known state, used in timeout errors.
    pub fn describe(&self) -> String {
        let state = match self.kind {
            OperationKind::SearchJob => "job still running",
            OperationKind::DownloadOrder => "order still pending",
        };
        match &self.last_message {
            Some(msg) => format!("{} after {} attempts: {}", state, self.attempts, msg),
            None => format!("{} after {} attempts", state, self.attempts),
        }
    }
}

/// Result of one status poll.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Pending {
        /// Percentage reported by the provider, if any.
        progress: Option<u8>,
        message: Option<String>,
    },
    Ready,
    /// The provider reports the job/order as failed.
    Failed(String),
}

impl PollOutcome {
    pub fn pending() -> Self {
        Self::Pending {
            progress: None,
            message: None,
        }
    }
}

/// Poll spacing and overall deadline.
///
/// `deadline = None` disables waiting: the status is checked once and the
/// operation fails with `NotAvailable` if it is not ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub deadline: Option<Duration>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            deadline: Some(Duration::from_secs(DEFAULT_DEADLINE_MINS * 60)),
        }
    }
}

impl PollPolicy {
    pub fn new(interval: Duration, deadline: Duration) -> Self {
        Self {
            interval,
            deadline: Some(deadline),
        }
    }

    /// Checks once, never waits.
    pub fn no_wait() -> Self {
        Self {
            interval: Duration::ZERO,
            deadline: None,
        }
    }

    /// Builds a policy from user-facing units (seconds between polls,
    /// minutes overall).
    pub fn from_wait_and_timeout(wait_secs: u64, timeout_mins: u64) -> Self {
        Self::new(
            Duration::from_secs(wait_secs),
            Duration::from_secs(timeout_mins * 60),
        )
    }
}

/// A provider-specific submit/poll/fetch workflow.
pub trait DeferredWorkflow: Send + Sync {
    /// Remote identifier returned by `submit`.
    type Handle: Clone + fmt::Display + Send + Sync;
    type Output: Send;

    fn kind(&self) -> OperationKind;

    fn provider(&self) -> &str;

    /// What the operation is about (product id, query summary).
    fn subject(&self) -> &str;

    /// Sends the job or order. Never retried.
    fn submit(&self) -> BoxFuture<'_, GatewayResult<Self::Handle>>;

    fn poll<'a>(&'a self, handle: &'a Self::Handle) -> BoxFuture<'a, GatewayResult<PollOutcome>>;

    /// Retrieves the payload once the operation is ready.
    fn fetch<'a>(&'a self, handle: &'a Self::Handle) -> BoxFuture<'a, GatewayResult<Self::Output>>;

    /// Best-effort remote cancellation after a timeout or local cancellation.
    fn cancel<'a>(&'a self, _handle: &'a Self::Handle) -> BoxFuture<'a, GatewayResult<()>> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_poll_policy() {
        let policy = PollPolicy::default();
        assert_eq!(policy.interval, Duration::from_secs(30));
        assert_eq!(policy.deadline, Some(Duration::from_secs(1200)));
    }

    #[test]
    fn test_policy_from_user_units() {
        let policy = PollPolicy::from_wait_and_timeout(5, 2);
        assert_eq!(policy.interval, Duration::from_secs(5));
        assert_eq!(policy.deadline, Some(Duration::from_secs(120)));
    }

    #[test]
    fn test_describe_mentions_pending_state() {
        let mut op = DeferredOperation::new(
            OperationKind::DownloadOrder,
            "cop",
            &PollPolicy::default(),
        );
        op.attempts = 3;
        assert_eq!(op.describe(), "order still pending after 3 attempts");
        op.last_message = Some("queued".to_string());
        assert!(op.describe().ends_with("queued"));
    }
}
