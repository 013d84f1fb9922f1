//! Search dispatch: provider selection, deferred jobs, pagination and
//! merge-all fan-out.
//!
//! # Single provider
//!
//! ```text
//! Query ──► resolve provider ──► authenticate ──► [job: submit/poll] ──► page 1, 2, ...
//!                                                                           │
//!                              SearchResult ◄── dedup ids ◄── normalize ◄───┘
//! ```
//!
//! Pagination stops on a short page, when a cursor-paginated protocol stops
//! returning a cursor, or when `max_items` is reached. In the last case the
//! result carries a continuation token that resumes exactly where it stopped.
//!
//! # Merge-all
//!
//! Every provider offering the product type is queried concurrently. Their
//! results are concatenated in priority order; a failing provider is
//! reported next to the others' products.

mod dispatcher;

use crate::deferred::PollPolicy;

pub use dispatcher::SearchDispatcher;

/// Default page size when neither the query nor the settings choose one.
pub const DEFAULT_ITEMS_PER_PAGE: usize = 20;

/// Default number of providers queried at once in merge-all mode.
pub const DEFAULT_MAX_CONCURRENCY: usize = 4;

/// Tunables of the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchSettings {
    pub items_per_page: usize,
    /// Upper bound on products per search, unless the query sets its own.
    pub max_items: Option<usize>,
    /// Providers queried concurrently by `search_all`.
    pub max_concurrency: usize,
    /// Timing of deferred search jobs, unless the plugin overrides it.
    pub job_policy: PollPolicy,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            items_per_page: DEFAULT_ITEMS_PER_PAGE,
            max_items: None,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            job_policy: PollPolicy::default(),
        }
    }
}
