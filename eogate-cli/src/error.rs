//! CLI error handling with user-friendly messages.
//!
//! Centralizes error handling for the CLI, providing consistent formatting
//! and exit codes that scripts can branch on.

use std::fmt;
use std::process;

use eogate::config::ConfigFileError;
use eogate::GatewayError;

/// Exit code for usage and configuration problems.
pub const EXIT_CONFIG: i32 = 2;
/// Exit code when a product or result is not available yet (retry later).
pub const EXIT_NOT_READY: i32 = 3;
/// Exit code for rejected credentials.
pub const EXIT_AUTH: i32 = 4;
/// Exit code after Ctrl+C.
pub const EXIT_CANCELLED: i32 = 130;

/// CLI-specific errors with user-friendly messages.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(String),
    /// Invalid arguments or configuration
    Config(String),
    /// Config file could not be read or written
    ConfigFile(ConfigFileError),
    /// Failed to start the async runtime
    Runtime(std::io::Error),
    /// Search, discovery or a single download failed
    Gateway(GatewayError),
    /// Some products of a batch could not be downloaded
    Downloads { failed: usize, total: usize },
    /// Failed to write output
    Output(std::io::Error),
}

impl CliError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Config(_) | CliError::ConfigFile(_) => EXIT_CONFIG,
            CliError::Gateway(e) => match e {
                GatewayError::Configuration(_)
                | GatewayError::UnsupportedProvider(_)
                | GatewayError::UnsupportedProductType(_) => EXIT_CONFIG,
                GatewayError::NotAvailable(_) | GatewayError::Timeout { .. } => EXIT_NOT_READY,
                GatewayError::Authentication { .. } => EXIT_AUTH,
                GatewayError::Cancelled { .. } => EXIT_CANCELLED,
                _ => 1,
            },
            _ => 1,
        }
    }

    /// Exit the process with an appropriate error message and code.
    pub fn exit(&self) -> ! {
        eprintln!("Error: {}", self);

        match self {
            CliError::Gateway(GatewayError::UnsupportedProductType(_)) => {
                eprintln!();
                eprintln!("List the product types providers offer with:");
                eprintln!("  eogate product-types --fetch");
            }
            CliError::Gateway(GatewayError::Authentication { provider, .. }) => {
                eprintln!();
                eprintln!("Check the credentials of '{}' in your provider file", provider);
                eprintln!("(see `eogate config show` for its location).");
            }
            CliError::Gateway(GatewayError::NotAvailable(_) | GatewayError::Timeout { .. }) => {
                eprintln!();
                eprintln!("The provider is still preparing the data.");
                eprintln!("Run the command again later, or raise --timeout.");
            }
            _ => {}
        }

        process::exit(self.exit_code())
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(msg) => write!(f, "Failed to initialize logging: {}", msg),
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::ConfigFile(e) => write!(f, "{}", e),
            CliError::Runtime(e) => write!(f, "Failed to start runtime: {}", e),
            CliError::Gateway(e) => write!(f, "{}", e),
            CliError::Downloads { failed, total } => {
                write!(f, "{} of {} downloads failed", failed, total)
            }
            CliError::Output(e) => write!(f, "Failed to write output: {}", e),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::ConfigFile(e) => Some(e),
            CliError::Runtime(e) => Some(e),
            CliError::Gateway(e) => Some(e),
            CliError::Output(e) => Some(e),
            _ => None,
        }
    }
}

impl From<GatewayError> for CliError {
    fn from(e: GatewayError) -> Self {
        CliError::Gateway(e)
    }
}

impl From<ConfigFileError> for CliError {
    fn from(e: ConfigFileError) -> Self {
        CliError::ConfigFile(e)
    }
}
