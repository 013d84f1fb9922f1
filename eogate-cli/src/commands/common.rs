//! Common types and utilities shared across CLI commands.

use std::collections::HashMap;
use std::time::Duration;

use clap::{Args, ValueEnum};
use eogate::model::{parse_datetime, Geometry, SortKey};
use eogate::progress::{ProgressEvent, ProgressSink};
use eogate::{Product, Query};
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use parking_lot::Mutex;
use serde_json::Value;

use crate::error::CliError;

/// How results are printed.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// Aligned columns for reading
    #[default]
    Table,
    /// JSON on stdout for scripts
    Json,
}

/// Query arguments shared by `search` and `download`.
#[derive(Debug, Clone, Args)]
pub struct SearchArgs {
    /// Product type identifier (e.g., S2_MSI_L1C)
    #[arg(short = 't', long)]
    pub product_type: String,

    /// Bounding box as "lon_min,lat_min,lon_max,lat_max"
    #[arg(long, allow_hyphen_values = true)]
    pub bbox: Option<String>,

    /// Start of the acquisition window (YYYY-MM-DD or RFC 3339)
    #[arg(long)]
    pub start: Option<String>,

    /// End of the acquisition window (YYYY-MM-DD or RFC 3339)
    #[arg(long)]
    pub end: Option<String>,

    /// Query this provider only
    #[arg(short, long)]
    pub provider: Option<String>,

    /// Search every provider offering the product type and merge results
    #[arg(long, conflicts_with = "provider")]
    pub all: bool,

    /// Products requested per page
    #[arg(long)]
    pub items_per_page: Option<usize>,

    /// Stop after this many products
    #[arg(long)]
    pub max_items: Option<usize>,

    /// Resume a truncated search from its continuation token
    #[arg(long)]
    pub page_token: Option<String>,

    /// Sort by this normalized property (e.g., startTimeFromAscendingNode)
    #[arg(long)]
    pub sort: Option<String>,

    /// Sort in descending order
    #[arg(long, requires = "sort")]
    pub desc: bool,

    /// Provider-specific parameter as key=value (repeatable)
    #[arg(long = "param", value_name = "KEY=VALUE")]
    pub params: Vec<String>,
}

impl SearchArgs {
    /// Builds and validates the query.
    pub fn to_query(&self) -> Result<Query, CliError> {
        let mut query = Query::new(&self.product_type);
        if let Some(bbox) = &self.bbox {
            let geometry = Geometry::parse_bbox(bbox).ok_or_else(|| {
                CliError::Config(format!(
                    "Invalid bounding box '{}'. Expected lon_min,lat_min,lon_max,lat_max",
                    bbox
                ))
            })?;
            query = query.with_geometry(geometry);
        }
        if let Some(start) = &self.start {
            query = query.with_start(parse_datetime(start)?);
        }
        if let Some(end) = &self.end {
            query = query.with_end(parse_datetime(end)?);
        }
        if let Some(provider) = &self.provider {
            query = query.with_provider(provider);
        }
        if let Some(n) = self.items_per_page {
            query = query.with_items_per_page(n);
        }
        if let Some(n) = self.max_items {
            query = query.with_max_items(n);
        }
        if let Some(token) = &self.page_token {
            query = query.with_page_token(token);
        }
        if let Some(key) = &self.sort {
            query = query.with_sort(if self.desc {
                SortKey::descending(key)
            } else {
                SortKey::ascending(key)
            });
        }
        for param in &self.params {
            let (key, value) = parse_param(param)?;
            query = query.with_extra(key, value);
        }
        query.validate()?;
        Ok(query)
    }
}

/// Splits `key=value`; numbers and booleans keep their JSON type.
pub fn parse_param(param: &str) -> Result<(String, Value), CliError> {
    let (key, raw) = param
        .split_once('=')
        .filter(|(k, _)| !k.trim().is_empty())
        .ok_or_else(|| {
            CliError::Config(format!("Invalid parameter '{}'. Expected KEY=VALUE", param))
        })?;
    let value = serde_json::from_str::<Value>(raw)
        .ok()
        .filter(|v| v.is_number() || v.is_boolean())
        .unwrap_or_else(|| Value::String(raw.to_string()));
    Ok((key.trim().to_string(), value))
}

/// One line per product: id, provider, acquisition start, availability.
pub fn print_products(products: &[Product]) {
    if products.is_empty() {
        println!("No products found.");
        return;
    }
    let width = products.iter().map(|p| p.id.len()).max().unwrap_or(2).max(2);
    println!(
        "{:<width$}  {:<16}  {:<20}  {}",
        console::style("ID").bold(),
        console::style("PROVIDER").bold(),
        console::style("START").bold(),
        console::style("STORAGE").bold(),
        width = width
    );
    for product in products {
        println!(
            "{:<width$}  {:<16}  {:<20}  {}",
            product.id,
            product.provider,
            product
                .property_str("startTimeFromAscendingNode")
                .unwrap_or_else(|| "-".to_string()),
            if product.is_offline() { "offline" } else { "online" },
            width = width
        );
    }
}

/// Human readable byte count.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

/// Renders progress events as spinners (waits) and bars (transfers).
///
/// Draws on stderr; hidden when stderr is not a terminal.
pub struct TerminalProgress {
    multi: MultiProgress,
    bars: Mutex<HashMap<String, ProgressBar>>,
}

impl TerminalProgress {
    pub fn new(quiet: bool) -> Self {
        let multi = if quiet {
            MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
        } else {
            MultiProgress::new()
        };
        Self {
            multi,
            bars: Mutex::new(HashMap::new()),
        }
    }

    fn bar(&self, key: &str) -> ProgressBar {
        let mut bars = self.bars.lock();
        bars.entry(key.to_string())
            .or_insert_with(|| {
                let bar = self.multi.add(ProgressBar::new_spinner());
                bar.enable_steady_tick(Duration::from_millis(120));
                bar
            })
            .clone()
    }

    /// Clears bars left behind by waits that ended without a transfer.
    pub fn finish(&self) {
        for (_, bar) in self.bars.lock().drain() {
            bar.finish_and_clear();
        }
    }
}

impl ProgressSink for TerminalProgress {
    fn on_event(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::Waiting { subject, .. } => {
                self.bar(subject).set_message(event.to_string());
            }
            ProgressEvent::Transfer(progress) => {
                let bar = self.bar(&progress.product);
                if let Some(total) = progress.total {
                    if bar.length() != Some(total) {
                        bar.set_length(total);
                        bar.set_style(
                            ProgressStyle::default_bar()
                                .template("{msg:30!} [{bar:30.cyan/blue}] {bytes}/{total_bytes} ({eta})")
                                .expect("hardcoded template is valid")
                                .progress_chars("#>-"),
                        );
                    }
                }
                bar.set_message(progress.product.clone());
                bar.set_position(progress.downloaded);
            }
            ProgressEvent::Completed { product, path } => {
                let bar = self.bars.lock().remove(product);
                if let Some(bar) = bar {
                    bar.finish_with_message(format!("{} -> {}", product, path));
                }
            }
        }
    }
}
