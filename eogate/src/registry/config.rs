//! Provider configuration documents and plugin binding.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::auth::{AuthConfig, Authenticator, StaticAuthenticator};
use crate::error::{GatewayError, GatewayResult};
use crate::plugins::{
    DiscoveryPlugin, DiscoveryPluginConfig, DownloadPlugin, DownloadPluginConfig, SearchPlugin,
    SearchPluginConfig,
};

/// How a catalog product type is named and queried on one provider.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductBinding {
    /// Provider-native product type / collection name.
    #[serde(default, alias = "productType", skip_serializing_if = "Option::is_none")]
    pub provider_product_type: Option<String>,
    /// Additional template variables (collection, processing level, ...).
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ProductBinding {
    pub fn new(provider_product_type: impl Into<String>) -> Self {
        Self {
            provider_product_type: Some(provider_product_type.into()),
            extra: BTreeMap::new(),
        }
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// Everything the gateway knows about one provider.
///
/// ```json
/// {
///   "name": "earth_search",
///   "priority": 1,
///   "products": { "S2_MSI_L2A": { "provider_product_type": "sentinel-2-l2a" } },
///   "search": { "type": "stac", "api_endpoint": "https://earth-search.example/v1/search" },
///   "download": { "type": "http" }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    /// Lower value = higher precedence.
    #[serde(default)]
    pub priority: i64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default)]
    pub products: BTreeMap<String, ProductBinding>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search: Option<SearchPluginConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download: Option<DownloadPluginConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discovery: Option<DiscoveryPluginConfig>,
    /// Set when the user edited this provider; external discovery documents
    /// are then ignored in favour of live discovery.
    #[serde(default)]
    pub user_modified: bool,
}

impl ProviderConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            priority: 0,
            description: String::new(),
            products: BTreeMap::new(),
            search: None,
            download: None,
            auth: None,
            discovery: None,
            user_modified: false,
        }
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_product(mut self, id: impl Into<String>, binding: ProductBinding) -> Self {
        self.products.insert(id.into(), binding);
        self
    }

    /// Parses a JSON array of provider configurations.
    pub fn list_from_json(text: &str) -> GatewayResult<Vec<ProviderConfig>> {
        serde_json::from_str(text)
            .map_err(|e| GatewayError::Configuration(format!("invalid provider configuration: {}", e)))
    }
}

/// Plugin instances bound to a provider.
#[derive(Clone, Default)]
pub struct PluginSet {
    pub search: Option<Arc<dyn SearchPlugin>>,
    pub download: Option<Arc<dyn DownloadPlugin>>,
    pub auth: Option<Arc<dyn Authenticator>>,
    pub discovery: Option<Arc<dyn DiscoveryPlugin>>,
}

impl PluginSet {
    /// Instantiates the plugins declared in `config`.
    ///
    /// Credentials may be overridden through `EOGATE__<PROVIDER>__AUTH__<KEY>`
    /// environment variables.
    pub fn from_config(config: &ProviderConfig) -> GatewayResult<Self> {
        let wrap = |e: GatewayError| match e {
            GatewayError::Configuration(reason) => {
                GatewayError::Configuration(format!("provider '{}': {}", config.name, reason))
            }
            other => other,
        };
        let search = config
            .search
            .as_ref()
            .map(|c| c.build())
            .transpose()
            .map_err(wrap)?;
        let download = config
            .download
            .as_ref()
            .map(|c| c.build())
            .transpose()
            .map_err(wrap)?;
        let discovery = config
            .discovery
            .as_ref()
            .map(|c| c.build())
            .transpose()
            .map_err(wrap)?;
        let auth = config.auth.as_ref().map(|c| {
            let c = c.clone().with_env_overrides(&config.name, std::env::vars());
            Arc::new(StaticAuthenticator::new(config.name.clone(), c)) as Arc<dyn Authenticator>
        });
        Ok(Self {
            search,
            download,
            auth,
            discovery,
        })
    }

    pub fn with_search(mut self, plugin: Arc<dyn SearchPlugin>) -> Self {
        self.search = Some(plugin);
        self
    }

    pub fn with_download(mut self, plugin: Arc<dyn DownloadPlugin>) -> Self {
        self.download = Some(plugin);
        self
    }

    pub fn with_auth(mut self, auth: Arc<dyn Authenticator>) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn with_discovery(mut self, plugin: Arc<dyn DiscoveryPlugin>) -> Self {
        self.discovery = Some(plugin);
        self
    }

    fn has_credentials(&self) -> bool {
        self.auth.as_ref().is_some_and(|a| a.has_credentials())
    }

    /// Why this plugin set cannot serve requests, if it cannot.
    pub(crate) fn prune_reason(&self) -> Option<String> {
        if self.search.is_none() && self.download.is_none() {
            return Some("no search or download plugin configured".to_string());
        }
        if self.search.as_ref().is_some_and(|s| s.need_auth()) && !self.has_credentials() {
            return Some("search requires credentials that are not configured".to_string());
        }
        if self.download.as_ref().is_some_and(|d| d.need_auth()) && !self.has_credentials() {
            return Some("download requires credentials that are not configured".to_string());
        }
        None
    }
}

impl fmt::Debug for PluginSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginSet")
            .field("search", &self.search.as_ref().map(|s| s.protocol()))
            .field("download", &self.download.is_some())
            .field("auth", &self.auth.is_some())
            .field("discovery", &self.discovery.is_some())
            .finish()
    }
}
