//! Settings structs, one per `[section]` of the INI file.

use std::path::PathBuf;

use crate::deferred::{PollPolicy, DEFAULT_DEADLINE_MINS, DEFAULT_POLL_INTERVAL_SECS};
use crate::download::{self, DownloadSettings, RetryPolicy};
use crate::search::{self, SearchSettings};

/// Transfer attempts per product, first one included.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = download::DEFAULT_TRANSFER_ATTEMPTS;

pub const DEFAULT_LOG_FILE: &str = "eogate.log";

/// Complete user configuration loaded from config.ini.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigFile {
    pub search: SearchSection,
    pub download: DownloadSection,
    pub discovery: DiscoverySection,
    pub providers: ProvidersSection,
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchSection {
    pub items_per_page: usize,
    pub max_items: Option<usize>,
    /// Providers queried at once by merge-all searches.
    pub max_concurrency: usize,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            items_per_page: search::DEFAULT_ITEMS_PER_PAGE,
            max_items: None,
            max_concurrency: search::DEFAULT_MAX_CONCURRENCY,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DownloadSection {
    /// Destination when the command line names none.
    pub directory: PathBuf,
    /// Seconds between two status checks of an order or search job.
    pub wait_secs: u64,
    /// Minutes before waiting on an order or job gives up.
    pub timeout_mins: u64,
    pub max_concurrency: usize,
    pub retry_attempts: u32,
}

impl Default for DownloadSection {
    fn default() -> Self {
        Self {
            directory: default_download_directory(),
            wait_secs: DEFAULT_POLL_INTERVAL_SECS,
            timeout_mins: DEFAULT_DEADLINE_MINS,
            max_concurrency: download::DEFAULT_MAX_CONCURRENCY,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
        }
    }
}

/// External product type discovery.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DiscoverySection {
    /// URL, `file://` URI or path of the published discovery document.
    pub external_product_types: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProvidersSection {
    /// JSON array of provider configurations.
    pub config_file: Option<PathBuf>,
    pub preferred: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoggingSection {
    pub file: PathBuf,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            file: super::config_directory().join("logs").join(DEFAULT_LOG_FILE),
        }
    }
}

fn default_download_directory() -> PathBuf {
    dirs::download_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("eogate")
}

impl ConfigFile {
    /// Poll timing shared by orders and search jobs.
    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy::from_wait_and_timeout(self.download.wait_secs, self.download.timeout_mins)
    }

    pub fn search_settings(&self) -> SearchSettings {
        SearchSettings {
            items_per_page: self.search.items_per_page,
            max_items: self.search.max_items,
            max_concurrency: self.search.max_concurrency,
            job_policy: self.poll_policy(),
        }
    }

    pub fn download_settings(&self) -> DownloadSettings {
        let retry = if self.download.retry_attempts <= 1 {
            RetryPolicy::None
        } else {
            RetryPolicy::exponential(self.download.retry_attempts)
        };
        DownloadSettings {
            poll_policy: self.poll_policy(),
            max_concurrency: self.download.max_concurrency,
            retry,
        }
    }
}
