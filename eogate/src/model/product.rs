//! Normalized search result entity.

use std::collections::BTreeMap;
use std::path::PathBuf;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::geometry::Geometry;
use crate::error::{GatewayError, GatewayResult};

/// Property key holding the provider's direct download URL.
pub const DOWNLOAD_LINK: &str = "downloadLink";

/// Property key holding the provider's order URL.
pub const ORDER_LINK: &str = "orderLink";

/// Property key holding the provider's order status URL.
pub const ORDER_STATUS_LINK: &str = "orderStatusLink";

/// Property key for the online/offline status of a product.
pub const STORAGE_STATUS: &str = "storageStatus";

/// A downloadable file attached to a product.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub href: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl Asset {
    pub fn new(href: impl Into<String>) -> Self {
        Self {
            href: Some(href.into()),
            ..Default::default()
        }
    }
}

/// Named assets of a product, ordered by key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AssetMap(BTreeMap<String, Asset>);

impl AssetMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, asset: Asset) {
        self.0.insert(key.into(), asset);
    }

    pub fn get(&self, key: &str) -> Option<&Asset> {
        self.0.get(key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Assets that carry an `href`.
    pub fn downloadable(&self) -> impl Iterator<Item = (&str, &Asset)> {
        self.0
            .iter()
            .filter(|(_, a)| a.href.is_some())
            .map(|(k, a)| (k.as_str(), a))
    }

    /// Returns the downloadable assets whose key fully matches `pattern`.
    ///
    /// Fails with `NotAvailable` when the pattern is invalid or nothing
    /// downloadable matches.
    pub fn matching(&self, pattern: &str) -> GatewayResult<Vec<(&str, &Asset)>> {
        let regex = Regex::new(&format!("^(?:{})$", pattern)).map_err(|e| {
            GatewayError::Configuration(format!("invalid asset filter '{}': {}", pattern, e))
        })?;
        let found: Vec<_> = self
            .downloadable()
            .filter(|(key, _)| regex.is_match(key))
            .collect();
        if found.is_empty() {
            return Err(GatewayError::NotAvailable(format!(
                "no asset key fully matching '{}'",
                pattern
            )));
        }
        Ok(found)
    }
}

/// Download lifecycle of a product within this process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DownloadState {
    #[default]
    NotStarted,
    Ordered,
    Transferring,
    Completed(PathBuf),
    Failed,
}

/// A search result, normalized across providers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub provider: String,
    pub product_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<Geometry>,
    #[serde(default)]
    pub properties: BTreeMap<String, Value>,
    #[serde(default)]
    pub assets: AssetMap,
    #[serde(skip)]
    pub download_state: DownloadState,
}

impl Product {
    pub fn new(
        id: impl Into<String>,
        provider: impl Into<String>,
        product_type: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            provider: provider.into(),
            product_type: product_type.into(),
            geometry: None,
            properties: BTreeMap::new(),
            assets: AssetMap::new(),
            download_state: DownloadState::NotStarted,
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn with_geometry(mut self, geometry: Geometry) -> Self {
        self.geometry = Some(geometry);
        self
    }

    /// String view of a property (numbers and booleans are stringified).
    pub fn property_str(&self, key: &str) -> Option<String> {
        match self.properties.get(key)? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// URL of the whole-product download, from properties or the `download` asset.
    pub fn download_link(&self) -> Option<String> {
        self.property_str(DOWNLOAD_LINK).or_else(|| {
            self.assets
                .get("download")
                .and_then(|a| a.href.clone())
        })
    }

    /// Whether the provider reported the product as offline (needs ordering).
    pub fn is_offline(&self) -> bool {
        self.property_str(STORAGE_STATUS)
            .map(|s| s.eq_ignore_ascii_case("OFFLINE") || s.eq_ignore_ascii_case("ORDERABLE"))
            .unwrap_or(false)
    }
}
