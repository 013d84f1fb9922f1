//! Product type catalog.
//!
//! The catalog starts from a static list of well-known product types and
//! grows through discovery: providers (or a pre-computed external document)
//! report the types they offer, which are merged in and bound to the
//! provider in the registry. Merging only ever adds entries or fills empty
//! fields of existing ones.
//!
//! Discovery runs at most once per catalog instance.

pub mod external;

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{info, warn};

use crate::error::{GatewayError, GatewayResult};
use crate::http::AsyncHttpClient;
use crate::model::ProductType;
use crate::plugins::{DiscoveredProductType, DiscoveryContext};
use crate::registry::{DiscoveryTarget, ProviderRegistry};

/// Static catalog shipped with the library.
const BUILTIN_PRODUCT_TYPES: &str = include_str!("../../resources/product_types.json");

#[derive(Debug, Default)]
struct CatalogState {
    types: BTreeMap<String, ProductType>,
    fetched: bool,
}

/// What a discovery pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryReport {
    /// Product types that were not in the catalog before.
    pub added: Vec<String>,
    /// Existing product types that gained information.
    pub enriched: Vec<String>,
    /// Providers whose offering came from the external document.
    pub from_document: Vec<String>,
    /// Providers discovered live.
    pub discovered_live: Vec<String>,
    /// Providers whose discovery failed, with the reason.
    pub failures: Vec<(String, String)>,
    /// Set when an earlier pass already ran and nothing was done.
    pub already_fetched: bool,
}

pub struct ProductTypeCatalog {
    state: RwLock<CatalogState>,
    external_source: Option<String>,
    discovery_gate: tokio::sync::Mutex<()>,
}

impl Default for ProductTypeCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl ProductTypeCatalog {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(CatalogState::default()),
            external_source: None,
            discovery_gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Parses a JSON array of product types, or an object keyed by id.
    ///
    /// # Errors
    ///
    /// `Configuration` on invalid JSON or duplicate ids.
    pub fn from_json(text: &str) -> GatewayResult<Self> {
        let invalid = |e: serde_json::Error| {
            GatewayError::Configuration(format!("invalid product type catalog: {}", e))
        };
        let value: serde_json::Value = serde_json::from_str(text).map_err(invalid)?;
        let list: Vec<ProductType> = match value {
            serde_json::Value::Object(map) => map
                .into_iter()
                .map(|(id, mut entry)| {
                    if let serde_json::Value::Object(fields) = &mut entry {
                        fields
                            .entry("id")
                            .or_insert_with(|| serde_json::Value::String(id));
                    }
                    serde_json::from_value(entry)
                })
                .collect::<Result<_, _>>()
                .map_err(invalid)?,
            other => serde_json::from_value(other).map_err(invalid)?,
        };
        let mut types = BTreeMap::new();
        for product_type in list {
            if types.contains_key(&product_type.id) {
                return Err(GatewayError::Configuration(format!(
                    "duplicate product type '{}'",
                    product_type.id
                )));
            }
            types.insert(product_type.id.clone(), product_type);
        }
        let catalog = Self::new();
        catalog.state.write().types = types;
        Ok(catalog)
    }

    /// The catalog shipped with the library.
    pub fn builtin() -> GatewayResult<Self> {
        Self::from_json(BUILTIN_PRODUCT_TYPES)
    }

    /// Sets the external discovery document (URL, `file://` URI or path).
    pub fn with_external_source(mut self, location: impl Into<String>) -> Self {
        self.external_source = Some(location.into());
        self
    }

    pub fn get(&self, id: &str) -> Option<ProductType> {
        self.state.read().types.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.state.read().types.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.state.read().types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().types.is_empty()
    }

    pub fn is_fetched(&self) -> bool {
        self.state.read().fetched
    }

    /// Lists product types, optionally restricted to one provider's offering.
    ///
    /// With `fetch_external`, discovery runs first (once per catalog). Types
    /// a provider offers without a catalog entry are listed with their id
    /// only. The result is sorted by id.
    ///
    /// # Errors
    ///
    /// `Configuration` when `provider` is not a registered, active provider.
    pub async fn list_product_types(
        &self,
        registry: &ProviderRegistry,
        http: &Arc<dyn AsyncHttpClient>,
        provider: Option<&str>,
        fetch_external: bool,
    ) -> GatewayResult<Vec<ProductType>> {
        if let Some(name) = provider {
            if !registry.contains(name) {
                return Err(GatewayError::Configuration(format!(
                    "unknown provider '{}'",
                    name
                )));
            }
        }
        if fetch_external {
            self.fetch_external(registry, http).await;
        }
        let state = self.state.read();
        let listed = match provider {
            None => state.types.values().cloned().collect(),
            Some(name) => registry
                .products_of(name)
                .unwrap_or_default()
                .into_iter()
                .map(|id| state.types.get(&id).cloned().unwrap_or_else(|| ProductType::new(id)))
                .collect(),
        };
        Ok(listed)
    }

    /// Runs discovery over every provider with a discovery plugin.
    ///
    /// For a provider listed in the external document and not edited by the
    /// user, the document entry is used. Otherwise its discovery plugin is
    /// called, except when the document exists but cannot be read: then
    /// only user-edited providers are discovered live. Failures are logged
    /// and skipped. If nothing could be fetched at all, the next call tries
    /// again.
    pub async fn fetch_external(
        &self,
        registry: &ProviderRegistry,
        http: &Arc<dyn AsyncHttpClient>,
    ) -> DiscoveryReport {
        let _gate = self.discovery_gate.lock().await;
        if self.state.read().fetched {
            return DiscoveryReport {
                already_fetched: true,
                ..Default::default()
            };
        }

        let document = match &self.external_source {
            Some(location) => Some(external::load(location, http.as_ref()).await),
            None => None,
        };
        let mut report = DiscoveryReport::default();
        for target in registry.discovery_targets() {
            let listed = match &document {
                Some(Some(doc)) if !target.user_modified => doc.get(&target.provider).cloned(),
                _ => None,
            };
            let found = match listed {
                Some(types) => {
                    report.from_document.push(target.provider.clone());
                    types
                }
                None => {
                    let unreadable = matches!(document, Some(None));
                    if unreadable && !target.user_modified {
                        continue;
                    }
                    match discover(&target, http).await {
                        Ok(types) => {
                            report.discovered_live.push(target.provider.clone());
                            types
                        }
                        Err(e) => {
                            warn!(provider = %target.provider, error = %e, "Product type discovery failed");
                            report.failures.push((target.provider.clone(), e.to_string()));
                            continue;
                        }
                    }
                }
            };
            self.merge(&target.provider, found, registry, &mut report);
        }

        // Retry on the next call when every provider failed.
        let succeeded = !report.from_document.is_empty() || !report.discovered_live.is_empty();
        let document_unreadable = matches!(document, Some(None));
        if succeeded || (report.failures.is_empty() && !document_unreadable) {
            self.state.write().fetched = true;
        }
        info!(
            added = report.added.len(),
            enriched = report.enriched.len(),
            failures = report.failures.len(),
            "Product type discovery finished"
        );
        report
    }

    fn merge(
        &self,
        provider: &str,
        found: Vec<DiscoveredProductType>,
        registry: &ProviderRegistry,
        report: &mut DiscoveryReport,
    ) {
        let mut offered = Vec::with_capacity(found.len());
        {
            let mut state = self.state.write();
            for discovered in found {
                let id = discovered.product_type.id.clone();
                match state.types.get_mut(&id) {
                    Some(existing) => {
                        if existing.enrich(&discovered.product_type) && !report.enriched.contains(&id) {
                            report.enriched.push(id.clone());
                        }
                    }
                    None => {
                        state.types.insert(id.clone(), discovered.product_type);
                        report.added.push(id.clone());
                    }
                }
                offered.push((id, discovered.binding));
            }
        }
        let newly_offered = registry.add_offered_product_types(provider, offered);
        info!(provider = %provider, newly_offered, "Merged discovered product types");
    }
}

async fn discover(
    target: &DiscoveryTarget,
    http: &Arc<dyn AsyncHttpClient>,
) -> GatewayResult<Vec<DiscoveredProductType>> {
    let mut ctx = DiscoveryContext::new(target.provider.clone(), http.clone());
    if let Some(auth) = &target.auth {
        ctx = ctx.with_credentials(auth.authenticate().await?);
    }
    target.plugin.discover(&ctx).await
}
