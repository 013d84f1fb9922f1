//! User configuration (`~/.eogate/config.ini`) and provider documents.
//!
//! Settings structs live in [`settings`], INI parsing in `parser`,
//! serialization in `writer`, and file I/O in `file`.
//!
//! ```ini
//! [search]
//! items_per_page = 20
//! max_concurrency = 4
//!
//! [download]
//! directory = ~/eogate-downloads
//! wait_secs = 30
//! timeout_mins = 20
//!
//! [providers]
//! config_file = ~/.eogate/providers.json
//! preferred = earth_search
//! ```

mod file;
mod parser;
mod settings;
mod writer;

pub use file::{
    config_directory, config_file_path, load_provider_configs, ConfigFile, ConfigFileError,
};
pub use settings::{
    DiscoverySection, DownloadSection, LoggingSection, ProvidersSection, SearchSection,
    DEFAULT_LOG_FILE, DEFAULT_RETRY_ATTEMPTS,
};
