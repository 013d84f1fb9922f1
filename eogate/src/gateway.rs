//! The gateway context object.
//!
//! A [`Gateway`] owns everything a session needs: the provider registry, the
//! product type catalog, the search dispatcher and the download
//! orchestrator with their in-flight tables. Nothing is global; two gateways
//! in one process are fully independent.
//!
//! ```ignore
//! let gateway = GatewayBuilder::new()
//!     .with_providers(load_provider_configs(&path)?)
//!     .with_preferred_provider("earth_search")
//!     .build()?;
//! let result = gateway.search(&Query::new("S2_MSI_L1C"), &cancel).await?;
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::catalog::{DiscoveryReport, ProductTypeCatalog};
use crate::config::{load_provider_configs, ConfigFile, ConfigFileError};
use crate::deferred::{DeferredEngine, PollPolicy};
use crate::download::{DownloadOrchestrator, DownloadSettings};
use crate::error::{GatewayError, GatewayResult};
use crate::http::{AsyncHttpClient, ReqwestClient};
use crate::model::{MergedSearchResult, Product, ProductType, Query, SearchResult};
use crate::progress::{NoProgress, ProgressSink};
use crate::registry::{ProviderConfig, ProviderRegistry, RegistrationStatus};
use crate::search::{SearchDispatcher, SearchSettings};

/// Assembles a [`Gateway`].
pub struct GatewayBuilder {
    providers: Vec<ProviderConfig>,
    catalog: Option<ProductTypeCatalog>,
    external_product_types: Option<String>,
    preferred: Option<String>,
    http: Option<Arc<dyn AsyncHttpClient>>,
    progress: Arc<dyn ProgressSink>,
    search: SearchSettings,
    download: DownloadSettings,
}

impl Default for GatewayBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GatewayBuilder {
    pub fn new() -> Self {
        Self {
            providers: Vec::new(),
            catalog: None,
            external_product_types: None,
            preferred: None,
            http: None,
            progress: Arc::new(NoProgress),
            search: SearchSettings::default(),
            download: DownloadSettings::default(),
        }
    }

    /// Starts from user configuration, reading the provider document it names.
    pub fn from_config(config: &ConfigFile) -> Result<Self, ConfigFileError> {
        let mut builder = Self::new()
            .with_search_settings(config.search_settings())
            .with_download_settings(config.download_settings());
        if let Some(path) = &config.providers.config_file {
            builder = builder.with_providers(load_provider_configs(path)?);
        }
        if let Some(name) = &config.providers.preferred {
            builder = builder.with_preferred_provider(name.clone());
        }
        if let Some(location) = &config.discovery.external_product_types {
            builder = builder.with_external_product_types(location.clone());
        }
        Ok(builder)
    }

    pub fn with_providers(mut self, providers: Vec<ProviderConfig>) -> Self {
        self.providers.extend(providers);
        self
    }

    pub fn with_provider(mut self, provider: ProviderConfig) -> Self {
        self.providers.push(provider);
        self
    }

    /// Replaces the built-in product type catalog.
    pub fn with_catalog(mut self, catalog: ProductTypeCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn with_external_product_types(mut self, location: impl Into<String>) -> Self {
        self.external_product_types = Some(location.into());
        self
    }

    pub fn with_preferred_provider(mut self, name: impl Into<String>) -> Self {
        self.preferred = Some(name.into());
        self
    }

    pub fn with_http_client(mut self, http: Arc<dyn AsyncHttpClient>) -> Self {
        self.http = Some(http);
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_search_settings(mut self, settings: SearchSettings) -> Self {
        self.search = settings;
        self
    }

    pub fn with_download_settings(mut self, settings: DownloadSettings) -> Self {
        self.download = settings;
        self
    }

    /// Registers the providers and wires the services together.
    ///
    /// # Errors
    ///
    /// `Configuration` when a provider configuration is invalid, the
    /// catalog cannot be loaded or the HTTP client cannot be created;
    /// `UnsupportedProvider` when the preferred provider is unknown.
    pub fn build(self) -> GatewayResult<Gateway> {
        let registry = Arc::new(ProviderRegistry::from_configs(self.providers)?);
        if let Some(name) = &self.preferred {
            registry.set_preferred_provider(name)?;
        }

        let mut catalog = match self.catalog {
            Some(catalog) => catalog,
            None => ProductTypeCatalog::builtin()?,
        };
        if let Some(location) = self.external_product_types {
            catalog = catalog.with_external_source(location);
        }

        let http: Arc<dyn AsyncHttpClient> = match self.http {
            Some(http) => http,
            None => Arc::new(
                ReqwestClient::new().map_err(|e| GatewayError::Configuration(e.to_string()))?,
            ),
        };
        let engine = DeferredEngine::new(self.progress.clone());
        let search = SearchDispatcher::new(registry.clone(), http.clone(), engine.clone(), self.search);
        let download = DownloadOrchestrator::new(
            registry.clone(),
            http.clone(),
            engine,
            self.progress,
            self.download,
        );

        info!(
            providers = registry.available_providers(None).len(),
            pruned = registry.pruned().len(),
            product_types = catalog.len(),
            "Gateway ready"
        );
        Ok(Gateway {
            registry,
            catalog: Arc::new(catalog),
            http,
            search,
            download,
        })
    }
}

/// One search/download session over a set of providers.
pub struct Gateway {
    registry: Arc<ProviderRegistry>,
    catalog: Arc<ProductTypeCatalog>,
    http: Arc<dyn AsyncHttpClient>,
    search: SearchDispatcher,
    download: DownloadOrchestrator,
}

impl Gateway {
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::new()
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn catalog(&self) -> &ProductTypeCatalog {
        &self.catalog
    }

    /// Registers or replaces a provider at runtime.
    pub fn register_provider(&self, config: ProviderConfig) -> GatewayResult<RegistrationStatus> {
        self.registry.register(config)
    }

    pub fn available_providers(&self, product_type: Option<&str>) -> Vec<String> {
        self.registry.available_providers(product_type)
    }

    pub fn set_preferred_provider(&self, name: &str) -> GatewayResult<()> {
        self.registry.set_preferred_provider(name)
    }

    pub fn preferred_provider(&self) -> Option<(String, i64)> {
        self.registry.preferred_provider()
    }

    /// Known product types, optionally only those `provider` offers.
    ///
    /// With `fetch_external`, providers are asked for additional types first
    /// (once per gateway).
    pub async fn list_product_types(
        &self,
        provider: Option<&str>,
        fetch_external: bool,
    ) -> GatewayResult<Vec<ProductType>> {
        self.catalog
            .list_product_types(&self.registry, &self.http, provider, fetch_external)
            .await
    }

    /// Runs product type discovery now and reports what changed.
    pub async fn discover_product_types(&self) -> DiscoveryReport {
        self.catalog.fetch_external(&self.registry, &self.http).await
    }

    pub async fn search(&self, query: &Query, cancel: &CancellationToken) -> GatewayResult<SearchResult> {
        self.search.search(query, cancel).await
    }

    /// Searches every provider offering the product type and merges the results.
    pub async fn search_all(
        &self,
        query: &Query,
        cancel: &CancellationToken,
    ) -> GatewayResult<MergedSearchResult> {
        self.search.search_all(query, cancel).await
    }

    /// Downloads a product; `policy` overrides the configured order polling.
    pub async fn download(
        &self,
        product: &Product,
        destination: &Path,
        policy: Option<PollPolicy>,
        cancel: &CancellationToken,
    ) -> GatewayResult<PathBuf> {
        let policy = policy.unwrap_or(self.download.settings().poll_policy);
        self.download.download(product, destination, &policy, cancel).await
    }

    pub async fn download_all(
        &self,
        products: &[Product],
        destination: &Path,
        policy: Option<PollPolicy>,
        cancel: &CancellationToken,
    ) -> Vec<GatewayResult<PathBuf>> {
        let policy = policy.unwrap_or(self.download.settings().poll_policy);
        self.download
            .download_all(products, destination, &policy, cancel)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::tests::MockHttpClient;
    use serde_json::json;

    fn provider(name: &str, priority: i64) -> ProviderConfig {
        serde_json::from_value(json!({
            "name": name,
            "priority": priority,
            "products": {"S2_MSI_L1C": {}},
            "search": {"type": "stac", "api_endpoint": format!("https://{}.example/search", name)},
            "download": {"type": "http"}
        }))
        .unwrap()
    }

    #[test]
    fn test_build_registers_and_prefers() {
        let gateway = Gateway::builder()
            .with_http_client(Arc::new(MockHttpClient::new()))
            .with_providers(vec![provider("a", 1), provider("b", 2)])
            .with_preferred_provider("b")
            .build()
            .unwrap();
        assert_eq!(gateway.available_providers(Some("S2_MSI_L1C")), vec!["b", "a"]);
        assert_eq!(gateway.preferred_provider(), Some(("b".to_string(), 0)));
        assert!(gateway.catalog().contains("S2_MSI_L1C"));
    }

    #[test]
    fn test_unknown_preferred_provider_fails() {
        let result = Gateway::builder()
            .with_http_client(Arc::new(MockHttpClient::new()))
            .with_provider(provider("a", 1))
            .with_preferred_provider("nobody")
            .build();
        assert!(matches!(result, Err(GatewayError::UnsupportedProvider(_))));
    }

    #[test]
    fn test_from_config_reads_provider_document() {
        let temp = tempfile::TempDir::new().unwrap();
        let path = temp.path().join("providers.json");
        std::fs::write(&path, json!([provider("a", 3)]).to_string()).unwrap();
        let mut config = ConfigFile::default();
        config.providers.config_file = Some(path);
        config.search.items_per_page = 7;

        let gateway = GatewayBuilder::from_config(&config)
            .unwrap()
            .with_http_client(Arc::new(MockHttpClient::new()))
            .build()
            .unwrap();
        assert_eq!(gateway.available_providers(None), vec!["a"]);
        assert_eq!(gateway.search.settings().items_per_page, 7);
    }

    #[tokio::test]
    async fn test_gateways_are_independent() {
        let first = Gateway::builder()
            .with_http_client(Arc::new(MockHttpClient::new()))
            .with_provider(provider("a", 1))
            .build()
            .unwrap();
        let second = Gateway::builder()
            .with_http_client(Arc::new(MockHttpClient::new()))
            .build()
            .unwrap();
        assert_eq!(first.available_providers(None).len(), 1);
        assert!(second.available_providers(None).is_empty());
        assert!(second.list_product_types(Some("a"), false).await.is_err());
    }
}
