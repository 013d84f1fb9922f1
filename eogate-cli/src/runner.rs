//! CLI runner for common setup and operations.
//!
//! Encapsulates config loading, logging initialization, gateway creation and
//! Ctrl+C handling to reduce duplication across command handlers.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use eogate::config::{ConfigFile, DEFAULT_LOG_FILE};
use eogate::logging::{init_logging, LoggingGuard};
use eogate::progress::ProgressSink;
use eogate::{Gateway, GatewayBuilder};
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::CliError;

/// Runner that manages CLI lifecycle and common operations.
pub struct CliRunner {
    /// Logging guard - keeps logging active while runner exists
    #[allow(dead_code)]
    logging_guard: LoggingGuard,
    config: ConfigFile,
}

impl CliRunner {
    /// Loads the config file (defaults when absent) and initializes logging.
    ///
    /// Logs always go to the configured file; `verbose` mirrors them to
    /// stderr so stdout stays clean for results.
    pub fn new(config_path: Option<&Path>, debug: bool, verbose: bool) -> Result<Self, CliError> {
        let config = match config_path {
            Some(path) => ConfigFile::load_from(path)?,
            None => ConfigFile::load()?,
        };

        let log_path = &config.logging.file;
        let log_dir = log_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let log_file = log_path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| DEFAULT_LOG_FILE.to_string());

        let logging_guard = init_logging(&log_dir, &log_file, verbose, debug)
            .map_err(|e| CliError::LoggingInit(e.to_string()))?;

        Ok(Self {
            logging_guard,
            config,
        })
    }

    pub fn config(&self) -> &ConfigFile {
        &self.config
    }

    /// Log startup information for a command.
    pub fn log_startup(&self, command: &str) {
        info!("EOGate v{}", eogate::VERSION);
        info!("EOGate CLI: {} command", command);
    }

    /// Builds a gateway from the loaded config.
    pub fn gateway(&self, progress: Arc<dyn ProgressSink>) -> Result<Gateway, CliError> {
        let gateway = GatewayBuilder::from_config(&self.config)?
            .with_progress(progress)
            .build()?;
        info!(
            providers = gateway.available_providers(None).len(),
            pruned = gateway.registry().pruned().len(),
            "Gateway ready"
        );
        Ok(gateway)
    }

    pub fn runtime(&self) -> Result<Runtime, CliError> {
        tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(CliError::Runtime)
    }

    /// A token cancelled on Ctrl+C. Call at most once per process.
    pub fn interrupt_token(&self) -> Result<CancellationToken, CliError> {
        let token = CancellationToken::new();
        let handler_token = token.clone();
        ctrlc::set_handler(move || {
            eprintln!();
            eprintln!("Interrupted, stopping...");
            handler_token.cancel();
        })
        .map_err(|e| CliError::Config(format!("Failed to set signal handler: {}", e)))?;
        Ok(token)
    }
}
