//! CLI command implementations.
//!
//! Each subcommand has its own module with argument definitions and handlers.
//!
//! # Command Modules
//!
//! - [`config`] - Configuration management (init, show, path)
//! - [`download`] - Search, then download the products found
//! - [`product_types`] - Product type catalog, with optional discovery
//! - [`providers`] - Providers in priority order
//! - [`search`] - Single-provider or merged search

pub mod common;
pub mod config;
pub mod download;
pub mod product_types;
pub mod providers;
pub mod search;
