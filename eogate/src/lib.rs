//! EOGate - federated search and download across Earth-observation providers
//!
//! One query and download interface over many data providers, each with its
//! own wire protocol, pagination, authentication and metadata vocabulary.
//!
//! - [`registry`]: providers, their priorities and plugin bindings
//! - [`catalog`]: product types and discovery of new ones
//! - [`plugins`]: protocol adapters normalizing responses into [`model`]
//! - [`deferred`]: submit / poll / fetch workflows for search jobs and orders
//! - [`search`]: single-provider search with pagination, and merge-all
//! - [`download`]: direct or ordered transfers with resume and checksums
//! - [`gateway`]: the context object tying them together

pub mod auth;
pub mod catalog;
pub mod config;
pub mod deferred;
pub mod download;
pub mod error;
pub mod gateway;
pub mod http;
pub mod inflight;
pub mod logging;
pub mod model;
pub mod plugins;
pub mod progress;
pub mod registry;
pub mod search;

pub use error::{GatewayError, GatewayResult};
pub use gateway::{Gateway, GatewayBuilder};
pub use model::{Product, ProductType, Query};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
