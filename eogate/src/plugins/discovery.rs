//! Product type discovery: asking a provider what it offers.
//!
//! Discovered types get a generic catalog id derived from the provider's
//! own name (`sentinel-2-l2a` → `SENTINEL_2_L2A`) and a [`ProductBinding`]
//! pointing back at the provider name, so they become searchable right away.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use super::template::value_to_param;
use super::{json_path, require_url};
use crate::auth::Credentials;
use crate::error::{GatewayError, GatewayResult, Phase};
use crate::http::{send_json, AsyncHttpClient, HttpRequest};
use crate::model::ProductType;
use crate::registry::ProductBinding;

/// Guard against catalogs whose `next` links loop.
const MAX_COLLECTION_PAGES: usize = 50;

#[derive(Clone)]
pub struct DiscoveryContext {
    pub provider: String,
    pub http: Arc<dyn AsyncHttpClient>,
    pub credentials: Credentials,
}

impl DiscoveryContext {
    pub fn new(provider: impl Into<String>, http: Arc<dyn AsyncHttpClient>) -> Self {
        Self {
            provider: provider.into(),
            http,
            credentials: Credentials::None,
        }
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    async fn fetch(&self, url: &str) -> GatewayResult<Value> {
        let request = self.credentials.apply(HttpRequest::get(url));
        send_json(self.http.as_ref(), &self.provider, Phase::Discovery, request).await
    }
}

/// One product type reported by a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredProductType {
    pub product_type: ProductType,
    pub binding: ProductBinding,
}

impl DiscoveredProductType {
    /// Builds the catalog entry for provider-native type `native_id`.
    pub fn from_native(native_id: &str, fields: Map<String, Value>) -> GatewayResult<Self> {
        let mut fields = fields;
        fields.insert("id".to_string(), Value::String(generic_id(native_id)));
        let product_type: ProductType = serde_json::from_value(Value::Object(fields))
            .map_err(|e| GatewayError::Configuration(format!("product type '{}': {}", native_id, e)))?;
        Ok(Self {
            product_type,
            binding: ProductBinding::new(native_id),
        })
    }
}

/// Catalog id for a provider-native name: uppercase, non-alphanumerics as `_`.
pub fn generic_id(native_id: &str) -> String {
    native_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_uppercase() } else { '_' })
        .collect()
}

pub trait DiscoveryPlugin: Send + Sync {
    fn discover<'a>(
        &'a self,
        ctx: &'a DiscoveryContext,
    ) -> BoxFuture<'a, GatewayResult<Vec<DiscoveredProductType>>>;
}

/// Discovery plugin configuration, tagged by protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DiscoveryPluginConfig {
    HttpJson(HttpJsonDiscoveryConfig),
    StacCollections(StacCollectionsConfig),
}

impl DiscoveryPluginConfig {
    pub fn build(&self) -> GatewayResult<Arc<dyn DiscoveryPlugin>> {
        let plugin: Arc<dyn DiscoveryPlugin> = match self {
            Self::HttpJson(c) => {
                require_url("fetch_url", &c.fetch_url)?;
                Arc::new(HttpJsonDiscovery { config: c.clone() })
            }
            Self::StacCollections(c) => {
                require_url("url", &c.url)?;
                Arc::new(StacCollectionsDiscovery { config: c.clone() })
            }
        };
        Ok(plugin)
    }
}

/// Reads the fields of one entry through `paths` (field → JSON path).
fn read_fields(entry: &Value, paths: &BTreeMap<String, String>) -> Map<String, Value> {
    let mut fields = Map::new();
    for (field, path) in paths {
        let Some(value) = json_path(entry, path).filter(|v| !v.is_null()) else {
            continue;
        };
        let value = match value {
            Value::Array(items) if field == "keywords" => Value::Array(items.clone()),
            Value::Array(items) => match items.first().and_then(value_to_param) {
                Some(first) => Value::String(first),
                None => continue,
            },
            other => match value_to_param(other) {
                Some(s) => Value::String(s),
                None => continue,
            },
        };
        fields.insert(field.clone(), value);
    }
    fields
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpJsonDiscoveryConfig {
    pub fetch_url: String,
    /// Path to the list of entries.
    #[serde(default = "default_results_entry")]
    pub results_entry: String,
    /// Path to the provider-native id inside one entry.
    #[serde(default = "default_id_path")]
    pub id_path: String,
    /// Product type field (`title`, `abstract`, `platform`, ...) → path.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

fn default_results_entry() -> String {
    "$".to_string()
}

fn default_id_path() -> String {
    "$.id".to_string()
}

pub struct HttpJsonDiscovery {
    config: HttpJsonDiscoveryConfig,
}

impl DiscoveryPlugin for HttpJsonDiscovery {
    fn discover<'a>(
        &'a self,
        ctx: &'a DiscoveryContext,
    ) -> BoxFuture<'a, GatewayResult<Vec<DiscoveredProductType>>> {
        Box::pin(async move {
            let document = ctx.fetch(&self.config.fetch_url).await?;
            let entries = match json_path(&document, &self.config.results_entry) {
                Some(Value::Array(items)) => items.clone(),
                Some(Value::Object(map)) => map
                    .iter()
                    .map(|(key, entry)| {
                        let mut entry = entry.clone();
                        if let Value::Object(fields) = &mut entry {
                            fields.entry("id").or_insert_with(|| Value::String(key.clone()));
                        }
                        entry
                    })
                    .collect(),
                _ => {
                    return Err(GatewayError::provider(
                        &ctx.provider,
                        Phase::Discovery,
                        format!("no product type list at '{}'", self.config.results_entry),
                    ))
                }
            };
            let mut found = Vec::new();
            for entry in &entries {
                let Some(native) = json_path(entry, &self.config.id_path).and_then(value_to_param) else {
                    continue;
                };
                found.push(DiscoveredProductType::from_native(
                    &native,
                    read_fields(entry, &self.config.metadata),
                )?);
            }
            debug!(provider = %ctx.provider, count = found.len(), "Discovered product types");
            Ok(found)
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StacCollectionsConfig {
    /// The `/collections` endpoint.
    pub url: String,
}

fn stac_collection_paths() -> BTreeMap<String, String> {
    [
        ("title", "$.title"),
        ("abstract", "$.description"),
        ("license", "$.license"),
        ("keywords", "$.keywords"),
        ("platform", "$.summaries.platform"),
        ("instrument", "$.summaries.instruments"),
        ("processingLevel", "$.summaries.processing:level"),
        ("missionStartDate", "$.extent.temporal.interval[0][0]"),
        ("missionEndDate", "$.extent.temporal.interval[0][1]"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

pub struct StacCollectionsDiscovery {
    config: StacCollectionsConfig,
}

impl DiscoveryPlugin for StacCollectionsDiscovery {
    fn discover<'a>(
        &'a self,
        ctx: &'a DiscoveryContext,
    ) -> BoxFuture<'a, GatewayResult<Vec<DiscoveredProductType>>> {
        Box::pin(async move {
            let paths = stac_collection_paths();
            let mut found = Vec::new();
            let mut next = Some(self.config.url.clone());
            let mut pages = 0;
            while let Some(url) = next.take() {
                pages += 1;
                let document = ctx.fetch(&url).await?;
                if let Some(Value::Array(collections)) = document.get("collections") {
                    for collection in collections {
                        let Some(native) = collection.get("id").and_then(Value::as_str) else {
                            continue;
                        };
                        found.push(DiscoveredProductType::from_native(
                            native,
                            read_fields(collection, &paths),
                        )?);
                    }
                }
                if pages < MAX_COLLECTION_PAGES {
                    next = document
                        .get("links")
                        .and_then(Value::as_array)
                        .and_then(|links| {
                            links
                                .iter()
                                .find(|l| l.get("rel").and_then(Value::as_str) == Some("next"))
                        })
                        .and_then(|l| l.get("href"))
                        .and_then(Value::as_str)
                        .map(str::to_string);
                }
            }
            debug!(provider = %ctx.provider, count = found.len(), pages, "Discovered STAC collections");
            Ok(found)
        })
    }
}
