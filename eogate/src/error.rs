//! Error types for the gateway.
//!
//! Every failure carries enough context (provider, product, phase) to be
//! diagnosed from the message alone. Errors are `Clone` so that one result can
//! be handed to every caller that joined the same in-flight operation.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

/// Result type for gateway operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Phase of a provider interaction in which an error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Search,
    Submit,
    Poll,
    Fetch,
    Transfer,
    Discovery,
    Authentication,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Search => "search",
            Phase::Submit => "submit",
            Phase::Poll => "poll",
            Phase::Fetch => "fetch",
            Phase::Transfer => "transfer",
            Phase::Discovery => "discovery",
            Phase::Authentication => "authentication",
        };
        f.write_str(name)
    }
}

/// Errors that can occur while searching, ordering or downloading.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// Missing or invalid provider/plugin binding. Never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The named provider is not registered (or was pruned).
    #[error("provider '{0}' is not supported")]
    UnsupportedProvider(String),

    /// No active provider offers the product type.
    #[error("no provider offers product type '{0}'")]
    UnsupportedProductType(String),

    /// Credentials were rejected or are missing.
    #[error("authentication failed for {provider}: {reason}")]
    Authentication { provider: String, reason: String },

    /// Transport or protocol failure while talking to a provider.
    #[error("{provider} failed during {phase}: {reason}")]
    Provider {
        provider: String,
        phase: Phase,
        reason: String,
        /// Whether retrying the same idempotent request may succeed.
        transient: bool,
    },

    /// The provider explicitly refused a search job or a download order.
    #[error("{provider} rejected the {phase} request: {reason}")]
    Rejected {
        provider: String,
        phase: Phase,
        reason: String,
    },

    /// A deadline elapsed while waiting on a deferred operation.
    #[error("timeout reached after {elapsed_secs}s waiting for {operation} on {provider} ({last_status})")]
    Timeout {
        provider: String,
        operation: String,
        elapsed_secs: u64,
        last_status: String,
    },

    /// Downloaded bytes do not match the checksum announced by the provider.
    #[error("checksum mismatch for {product}: expected {expected}, got {actual}")]
    Integrity {
        product: String,
        expected: String,
        actual: String,
    },

    /// The requested item exists but cannot be served right now.
    #[error("not available: {0}")]
    NotAvailable(String),

    /// The operation was cancelled by the caller.
    #[error("{operation} was cancelled")]
    Cancelled { operation: String },

    /// Local filesystem failure.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: Arc<io::Error>,
    },
}

impl GatewayError {
    /// Builds a non-transient provider error.
    pub fn provider(provider: impl Into<String>, phase: Phase, reason: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            phase,
            reason: reason.into(),
            transient: false,
        }
    }

    /// Builds a transient provider error (network hiccup, 5xx, 429).
    pub fn transient(provider: impl Into<String>, phase: Phase, reason: impl Into<String>) -> Self {
        Self::Provider {
            provider: provider.into(),
            phase,
            reason: reason.into(),
            transient: true,
        }
    }

    /// Wraps an I/O error with the path it happened on.
    pub fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source: Arc::new(source),
        }
    }

    /// Whether retrying an idempotent request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Provider { transient: true, .. })
    }

    /// The provider involved, when known.
    pub fn provider_name(&self) -> Option<&str> {
        match self {
            Self::Authentication { provider, .. }
            | Self::Provider { provider, .. }
            | Self::Rejected { provider, .. }
            | Self::Timeout { provider, .. } => Some(provider),
            Self::UnsupportedProvider(provider) => Some(provider),
            _ => None,
        }
    }
}
