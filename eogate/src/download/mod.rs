//! Download orchestration.
//!
//! # Architecture
//!
//! ```text
//! DownloadOrchestrator
//!         │
//!         ├── InFlightTable        one operation per (product, provider, destination)
//!         │
//!         ├── DownloadPlugin       direct source, or order ticket
//!         │       └── OrderWorkflow ──► DeferredEngine (submit / poll / fetch)
//!         │
//!         ├── transfer             .part file, Range resume, RetryPolicy
//!         │
//!         └── checksum             SHA-256, corrupt files removed
//! ```

pub mod checksum;
mod order;
mod orchestrator;
mod retry;
mod transfer;

use crate::deferred::PollPolicy;

pub use orchestrator::DownloadOrchestrator;
pub use retry::{RetryPolicy, DEFAULT_TRANSFER_ATTEMPTS};
pub use transfer::part_path;

/// Default number of products downloaded at once by `download_all`.
pub const DEFAULT_MAX_CONCURRENCY: usize = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct DownloadSettings {
    /// Order polling, unless the caller passes its own policy.
    pub poll_policy: PollPolicy,
    pub max_concurrency: usize,
    /// Retries of interrupted transfers.
    pub retry: RetryPolicy,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            poll_policy: PollPolicy::default(),
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            retry: RetryPolicy::exponential(DEFAULT_TRANSFER_ATTEMPTS),
        }
    }
}
