//! Provider registry and priority resolution.
//!
//! The registry holds every configured provider together with its bound
//! plugins, its priority and the product types it offers. Lower priority
//! values win; ties are broken by registration order.
//!
//! Providers whose search or download plugin needs credentials that are not
//! configured are pruned at registration time. They are reported by
//! [`ProviderRegistry::pruned`] and never take part in resolution.
//!
//! All mutations take the single write lock; lookups share the read lock.

mod config;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

pub use config::{PluginSet, ProductBinding, ProviderConfig};

use crate::auth::Authenticator;
use crate::error::{GatewayError, GatewayResult};
use crate::model::Query;
use crate::plugins::DiscoveryPlugin;

/// Outcome of a registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationStatus {
    Active,
    Pruned { reason: String },
}

/// A registered, active provider.
#[derive(Debug, Clone)]
pub struct ProviderEntry {
    pub name: String,
    pub priority: i64,
    /// Registration order, kept across updates.
    pub seq: u64,
    pub plugins: PluginSet,
    pub user_modified: bool,
    /// Offered product types and how they are named on this provider.
    pub products: BTreeMap<String, ProductBinding>,
}

impl ProviderEntry {
    fn rank(&self) -> (i64, u64) {
        (self.priority, self.seq)
    }

    pub fn offers(&self, product_type: &str) -> bool {
        self.products.contains_key(product_type)
    }

    fn binding_for(&self, product_type: &str) -> ProductBinding {
        self.products.get(product_type).cloned().unwrap_or_default()
    }

    fn resolved(&self, product_type: &str) -> ResolvedProvider {
        ResolvedProvider {
            name: self.name.clone(),
            priority: self.priority,
            plugins: self.plugins.clone(),
            binding: self.binding_for(product_type),
        }
    }
}

/// A provider chosen to serve a request, with its binding for the product type.
#[derive(Debug, Clone)]
pub struct ResolvedProvider {
    pub name: String,
    pub priority: i64,
    pub plugins: PluginSet,
    pub binding: ProductBinding,
}

/// A provider able to report additional product types.
#[derive(Clone)]
pub struct DiscoveryTarget {
    pub provider: String,
    pub plugin: Arc<dyn DiscoveryPlugin>,
    pub auth: Option<Arc<dyn Authenticator>>,
    pub user_modified: bool,
}

#[derive(Default)]
struct RegistryState {
    entries: BTreeMap<String, ProviderEntry>,
    pruned: BTreeMap<String, String>,
    seqs: BTreeMap<String, u64>,
    next_seq: u64,
}

impl RegistryState {
    fn seq_for(&mut self, name: &str) -> u64 {
        if let Some(seq) = self.seqs.get(name) {
            return *seq;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.seqs.insert(name.to_string(), seq);
        seq
    }

    fn ordered(&self) -> Vec<&ProviderEntry> {
        let mut entries: Vec<&ProviderEntry> = self.entries.values().collect();
        entries.sort_by_key(|e| e.rank());
        entries
    }
}

/// Process-wide set of providers.
#[derive(Default)]
pub struct ProviderRegistry {
    state: RwLock<RegistryState>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from configurations; the first invalid one aborts.
    pub fn from_configs(configs: Vec<ProviderConfig>) -> GatewayResult<Self> {
        let registry = Self::new();
        for config in configs {
            registry.register(config)?;
        }
        Ok(registry)
    }

    /// Registers or replaces a provider, instantiating its plugins.
    ///
    /// # Errors
    ///
    /// `Configuration` when a plugin cannot be built. A provider lacking
    /// credentials is not an error; it is pruned.
    pub fn register(&self, config: ProviderConfig) -> GatewayResult<RegistrationStatus> {
        let plugins = PluginSet::from_config(&config)?;
        self.register_with_plugins(config, plugins)
    }

    /// Registers a provider with caller-supplied plugin instances.
    pub fn register_with_plugins(
        &self,
        config: ProviderConfig,
        plugins: PluginSet,
    ) -> GatewayResult<RegistrationStatus> {
        let name = config.name.trim().to_string();
        if name.is_empty() {
            return Err(GatewayError::Configuration(
                "provider configuration has no name".to_string(),
            ));
        }
        let mut reason = plugins.prune_reason();
        if reason.is_none() && config.products.is_empty() && plugins.discovery.is_none() {
            reason = Some("offers no product type and cannot discover any".to_string());
        }

        let mut state = self.state.write();
        let seq = state.seq_for(&name);
        if let Some(reason) = reason {
            warn!(provider = %name, reason = %reason, "provider pruned");
            state.entries.remove(&name);
            state.pruned.insert(name, reason.clone());
            return Ok(RegistrationStatus::Pruned { reason });
        }

        // Types added by discovery survive a configuration update.
        let mut products = state
            .entries
            .get(&name)
            .map(|e| e.products.clone())
            .unwrap_or_default();
        products.extend(config.products);

        state.pruned.remove(&name);
        let replaced = state
            .entries
            .insert(
                name.clone(),
                ProviderEntry {
                    name: name.clone(),
                    priority: config.priority,
                    seq,
                    plugins,
                    user_modified: config.user_modified,
                    products,
                },
            )
            .is_some();
        info!(provider = %name, priority = config.priority, replaced, "provider registered");
        Ok(RegistrationStatus::Active)
    }

    /// Active providers, optionally restricted to those offering `product_type`,
    /// ordered by priority then registration order.
    pub fn available_providers(&self, product_type: Option<&str>) -> Vec<String> {
        let state = self.state.read();
        state
            .ordered()
            .into_iter()
            .filter(|e| product_type.map_or(true, |pt| e.offers(pt)))
            .map(|e| e.name.clone())
            .collect()
    }

    /// Makes `name` the strict first choice.
    ///
    /// The provider gets priority 0. If any other provider has a priority
    /// of 0 or less, all others are shifted up by the same amount so they
    /// all rank after it and keep their relative order.
    pub fn set_preferred_provider(&self, name: &str) -> GatewayResult<()> {
        let mut state = self.state.write();
        if !state.entries.contains_key(name) {
            return Err(GatewayError::UnsupportedProvider(name.to_string()));
        }
        let lowest_other = state
            .entries
            .values()
            .filter(|e| e.name != name)
            .map(|e| e.priority)
            .min();
        if let Some(lowest) = lowest_other.filter(|p| *p <= 0) {
            let shift = 1 - lowest;
            for entry in state.entries.values_mut().filter(|e| e.name != name) {
                entry.priority += shift;
            }
        }
        if let Some(entry) = state.entries.get_mut(name) {
            entry.priority = 0;
        }
        info!(provider = %name, "preferred provider set");
        Ok(())
    }

    /// The provider ranked first, with its priority.
    pub fn preferred_provider(&self) -> Option<(String, i64)> {
        let state = self.state.read();
        state
            .ordered()
            .first()
            .map(|e| (e.name.clone(), e.priority))
    }

    pub fn set_priority(&self, name: &str, priority: i64) -> GatewayResult<()> {
        let mut state = self.state.write();
        let entry = state
            .entries
            .get_mut(name)
            .ok_or_else(|| GatewayError::UnsupportedProvider(name.to_string()))?;
        entry.priority = priority;
        debug!(provider = %name, priority, "priority changed");
        Ok(())
    }

    pub fn priority(&self, name: &str) -> Option<i64> {
        self.state.read().entries.get(name).map(|e| e.priority)
    }

    /// Picks the provider that serves `query`.
    ///
    /// An explicit `query.provider` is used as is (and must exist, search and
    /// offer the type); otherwise the best-ranked offering provider wins.
    pub fn resolve(&self, query: &Query) -> GatewayResult<ResolvedProvider> {
        let state = self.state.read();
        let product_type = query.product_type.as_str();
        if let Some(name) = &query.provider {
            let entry = state
                .entries
                .get(name)
                .ok_or_else(|| GatewayError::UnsupportedProvider(name.clone()))?;
            if entry.plugins.search.is_none() {
                return Err(GatewayError::Configuration(format!(
                    "provider '{}' has no search capability",
                    name
                )));
            }
            if !entry.offers(product_type) {
                return Err(GatewayError::Configuration(format!(
                    "provider '{}' does not offer product type '{}'",
                    name, product_type
                )));
            }
            return Ok(entry.resolved(product_type));
        }
        state
            .ordered()
            .into_iter()
            .find(|e| e.plugins.search.is_some() && e.offers(product_type))
            .map(|e| e.resolved(product_type))
            .ok_or_else(|| GatewayError::UnsupportedProductType(product_type.to_string()))
    }

    /// Every searchable provider offering `product_type`, best-ranked first.
    pub fn providers_offering(&self, product_type: &str) -> Vec<ResolvedProvider> {
        let state = self.state.read();
        state
            .ordered()
            .into_iter()
            .filter(|e| e.plugins.search.is_some() && e.offers(product_type))
            .map(|e| e.resolved(product_type))
            .collect()
    }

    /// The provider that must serve downloads for products it returned.
    pub fn download_provider(&self, name: &str, product_type: &str) -> GatewayResult<ResolvedProvider> {
        let state = self.state.read();
        let entry = state
            .entries
            .get(name)
            .ok_or_else(|| GatewayError::UnsupportedProvider(name.to_string()))?;
        if entry.plugins.download.is_none() {
            return Err(GatewayError::Configuration(format!(
                "provider '{}' has no download capability",
                name
            )));
        }
        Ok(entry.resolved(product_type))
    }

    pub fn discovery_targets(&self) -> Vec<DiscoveryTarget> {
        let state = self.state.read();
        state
            .ordered()
            .into_iter()
            .filter_map(|e| {
                e.plugins.discovery.as_ref().map(|plugin| DiscoveryTarget {
                    provider: e.name.clone(),
                    plugin: plugin.clone(),
                    auth: e.plugins.auth.clone(),
                    user_modified: e.user_modified,
                })
            })
            .collect()
    }

    /// Extends a provider's offering. Existing bindings are kept.
    ///
    /// Returns the number of product types newly offered.
    pub fn add_offered_product_types(
        &self,
        provider: &str,
        types: impl IntoIterator<Item = (String, ProductBinding)>,
    ) -> usize {
        let mut state = self.state.write();
        let Some(entry) = state.entries.get_mut(provider) else {
            return 0;
        };
        let mut added = 0;
        for (id, binding) in types {
            if !entry.products.contains_key(&id) {
                entry.products.insert(id, binding);
                added += 1;
            }
        }
        added
    }

    /// Product types offered by `provider`, if it is active.
    pub fn products_of(&self, provider: &str) -> Option<BTreeSet<String>> {
        self.state
            .read()
            .entries
            .get(provider)
            .map(|e| e.products.keys().cloned().collect())
    }

    pub fn contains(&self, provider: &str) -> bool {
        self.state.read().entries.contains_key(provider)
    }

    /// Providers removed at registration, with the reason.
    pub fn pruned(&self) -> Vec<(String, String)> {
        self.state
            .read()
            .pruned
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    /// Snapshot of active entries, best-ranked first.
    pub fn entries(&self) -> Vec<ProviderEntry> {
        self.state.read().ordered().into_iter().cloned().collect()
    }
}
