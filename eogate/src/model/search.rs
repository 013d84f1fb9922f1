//! Search results, continuation tokens and merged (multi-provider) results.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::product::Product;
use super::query::{SortKey, SortOrder};
use crate::error::{GatewayError, GatewayResult};

/// How much a provider knows about the size of the full result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum TotalCount {
    Exact(usize),
    Estimated(usize),
    #[default]
    Unknown,
}

impl TotalCount {
    pub fn value(&self) -> Option<usize> {
        match self {
            Self::Exact(n) | Self::Estimated(n) => Some(*n),
            Self::Unknown => None,
        }
    }
}

/// Products of one provider for one query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub products: Vec<Product>,
    pub total: TotalCount,
    /// Opaque token to resume after a `max_items` truncation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_page: Option<String>,
}

impl SearchResult {
    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_empty(&self) -> bool {
        self.products.is_empty()
    }
}

/// Where to resume a truncated search.
///
/// Serialized as hex-encoded JSON so it is URL and shell safe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContinuationToken {
    pub provider: String,
    /// Next page number to request (1-based).
    pub page: usize,
    /// Provider cursor for cursor-paginated protocols.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<String>,
    /// Items of that page already returned to the caller.
    #[serde(default)]
    pub skip: usize,
}

impl ContinuationToken {
    pub fn encode(&self) -> String {
        hex::encode(serde_json::to_vec(self).unwrap_or_default())
    }

    pub fn decode(token: &str) -> GatewayResult<Self> {
        let invalid = || GatewayError::Configuration(format!("invalid continuation token '{}'", token));
        let bytes = hex::decode(token.trim()).map_err(|_| invalid())?;
        serde_json::from_slice(&bytes).map_err(|_| invalid())
    }
}

/// A provider that failed during a merge-all search.
#[derive(Debug, Clone)]
pub struct ProviderFailure {
    pub provider: String,
    pub error: GatewayError,
}

/// Per-provider summary of a merge-all search.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderOutcome {
    pub provider: String,
    pub count: usize,
    pub total: TotalCount,
}

/// Results of a search across every offering provider.
///
/// Products are concatenated per provider in priority order; identical
/// scenes reported by several providers are kept separately.
#[derive(Debug, Clone, Default)]
pub struct MergedSearchResult {
    pub products: Vec<Product>,
    pub outcomes: Vec<ProviderOutcome>,
    pub failures: Vec<ProviderFailure>,
}

impl MergedSearchResult {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn products_of<'a>(&'a self, provider: &'a str) -> impl Iterator<Item = &'a Product> + 'a {
        self.products.iter().filter(move |p| p.provider == provider)
    }
}

/// Stable sort by a normalized property; products missing the key go last.
pub fn sort_products(products: &mut [Product], sort: &SortKey) {
    products.sort_by(|a, b| {
        let ordering = match (a.properties.get(&sort.key), b.properties.get(&sort.key)) {
            (Some(x), Some(y)) => compare_values(x, y),
            (Some(_), None) => return Ordering::Less,
            (None, Some(_)) => return Ordering::Greater,
            (None, None) => return Ordering::Equal,
        };
        match sort.order {
            SortOrder::Ascending => ordering,
            SortOrder::Descending => ordering.reverse(),
        }
    });
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
        _ => match (a.as_str(), b.as_str()) {
            (Some(x), Some(y)) => x.cmp(y),
            _ => a.to_string().cmp(&b.to_string()),
        },
    }
}
