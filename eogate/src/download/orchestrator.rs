//! The download orchestrator.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::checksum::{self, Verification};
use super::order::OrderWorkflow;
use super::transfer::transfer;
use super::DownloadSettings;
use crate::deferred::{DeferredEngine, PollPolicy};
use crate::error::{GatewayError, GatewayResult};
use crate::http::AsyncHttpClient;
use crate::inflight::InFlightTable;
use crate::model::Product;
use crate::plugins::{DownloadContext, DownloadRoute};
use crate::progress::{ProgressEvent, ProgressSink};
use crate::registry::ProviderRegistry;

/// (product id, provider, destination directory).
type DownloadKey = (String, String, PathBuf);

/// Downloads products through their provider's download plugin.
///
/// Concurrent requests for the same product into the same directory share
/// one order and one transfer; every caller gets the same path or the same
/// error.
pub struct DownloadOrchestrator {
    registry: Arc<ProviderRegistry>,
    http: Arc<dyn AsyncHttpClient>,
    engine: DeferredEngine,
    progress: Arc<dyn ProgressSink>,
    in_flight: InFlightTable<DownloadKey, GatewayResult<PathBuf>>,
    settings: DownloadSettings,
}

impl DownloadOrchestrator {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        http: Arc<dyn AsyncHttpClient>,
        engine: DeferredEngine,
        progress: Arc<dyn ProgressSink>,
        settings: DownloadSettings,
    ) -> Self {
        Self {
            registry,
            http,
            engine,
            progress,
            in_flight: InFlightTable::new(),
            settings,
        }
    }

    pub fn settings(&self) -> &DownloadSettings {
        &self.settings
    }

    /// Number of downloads currently running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Downloads `product` into `destination`, returning the file path.
    ///
    /// Offline products are ordered first and polled with `policy`. A file
    /// already present with the expected size and checksum is returned
    /// without any transfer.
    ///
    /// # Errors
    ///
    /// - `NotAvailable` when the product cannot be downloaded or the order
    ///   is not ready and waiting is disabled
    /// - `Rejected` / `Timeout` from the order workflow
    /// - `Integrity` when the payload does not match its checksum
    /// - `Cancelled` when `cancel` fires; a partial file is kept for resume
    pub async fn download(
        &self,
        product: &Product,
        destination: &Path,
        policy: &PollPolicy,
        cancel: &CancellationToken,
    ) -> GatewayResult<PathBuf> {
        let key = (
            product.id.clone(),
            product.provider.clone(),
            destination.to_path_buf(),
        );
        self.in_flight
            .run_shared(key, cancel, || self.download_once(product, destination, policy, cancel))
            .await
    }

    /// Downloads several products, at most `max_concurrency` at a time.
    ///
    /// Results are in input order.
    pub async fn download_all(
        &self,
        products: &[Product],
        destination: &Path,
        policy: &PollPolicy,
        cancel: &CancellationToken,
    ) -> Vec<GatewayResult<PathBuf>> {
        stream::iter(products)
            .map(|product| self.download(product, destination, policy, cancel))
            .buffered(self.settings.max_concurrency.max(1))
            .collect()
            .await
    }

    async fn download_once(
        &self,
        product: &Product,
        destination: &Path,
        policy: &PollPolicy,
        cancel: &CancellationToken,
    ) -> GatewayResult<PathBuf> {
        let provider = self
            .registry
            .download_provider(&product.provider, &product.product_type)?;
        let plugin = provider.plugins.download.clone().ok_or_else(|| {
            GatewayError::Configuration(format!(
                "provider '{}' has no download capability",
                provider.name
            ))
        })?;
        let route = plugin.resolve(product)?;

        let (file_name, published, size) = match &route {
            DownloadRoute::Direct(source) => (&source.file_name, &source.checksum, source.size),
            DownloadRoute::Order(ticket) => (&ticket.file_name, &ticket.checksum, None),
        };
        tokio::fs::create_dir_all(destination)
            .await
            .map_err(|e| GatewayError::io(destination, e))?;
        let path = destination.join(file_name);
        if self.already_complete(&path, published.as_deref(), size).await? {
            info!(provider = %product.provider, product = %product.id, path = %path.display(), "Already downloaded");
            self.completed(product, &path);
            return Ok(path);
        }

        let mut ctx = DownloadContext::new(provider.name.clone(), self.http.clone());
        if let Some(auth) = &provider.plugins.auth {
            ctx = ctx.with_credentials(auth.authenticate().await?);
        }
        let source = match route {
            DownloadRoute::Direct(source) => source,
            DownloadRoute::Order(ticket) => {
                let workflow = OrderWorkflow {
                    plugin: plugin.as_ref(),
                    ctx: &ctx,
                    ticket: &ticket,
                };
                self.engine.run(&workflow, policy, cancel).await?
            }
        };

        let path = destination.join(&source.file_name);
        debug!(provider = %ctx.provider, product = %product.id, url = %source.url, "Starting transfer");
        transfer(
            &ctx,
            &source,
            &path,
            &product.id,
            &self.settings.retry,
            self.progress.as_ref(),
            cancel,
        )
        .await?;
        checksum::verify_or_remove(&path, source.checksum.as_deref(), &product.id).await?;
        self.completed(product, &path);
        Ok(path)
    }

    /// Whether `path` already holds the finished payload.
    async fn already_complete(&self, path: &Path, published: Option<&str>, size: Option<u64>) -> GatewayResult<bool> {
        let Ok(meta) = tokio::fs::metadata(path).await else {
            return Ok(false);
        };
        if !meta.is_file() || size.is_some_and(|s| s != meta.len()) {
            return Ok(false);
        }
        match checksum::check(path, published).await? {
            Verification::Matched | Verification::Unchecked => Ok(true),
            Verification::Mismatched { .. } => {
                warn!(path = %path.display(), "Existing file does not match its checksum, downloading again");
                tokio::fs::remove_file(path)
                    .await
                    .map_err(|e| GatewayError::io(path, e))?;
                Ok(false)
            }
        }
    }

    fn completed(&self, product: &Product, path: &Path) {
        self.progress.on_event(&ProgressEvent::Completed {
            product: product.id.clone(),
            path: path.display().to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::RetryPolicy;
    use crate::http::tests::{MockHttpClient, MockReply};
    use crate::http::Method;
    use crate::model::{ORDER_LINK, ORDER_STATUS_LINK, STORAGE_STATUS};
    use crate::progress::NoProgress;
    use crate::registry::ProviderConfig;
    use serde_json::json;
    use std::time::Duration;

    const HELLO_WORLD: &str = "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";

    fn orchestrator(mock: Arc<MockHttpClient>) -> DownloadOrchestrator {
        let registry = ProviderRegistry::new();
        let config: ProviderConfig = serde_json::from_value(json!({
            "name": "p",
            "products": {"S2_MSI_L1C": {}},
            "download": {"type": "http"}
        }))
        .unwrap();
        registry.register(config).unwrap();
        DownloadOrchestrator::new(
            Arc::new(registry),
            mock,
            DeferredEngine::default(),
            Arc::new(NoProgress),
            DownloadSettings {
                retry: RetryPolicy::fixed(2, Duration::from_millis(1)),
                ..Default::default()
            },
        )
    }

    fn online(id: &str) -> Product {
        Product::new(id, "p", "S2_MSI_L1C")
            .with_property("downloadLink", format!("https://p.example/files/{}", id))
    }

    fn offline(id: &str) -> Product {
        online(id)
            .with_property(STORAGE_STATUS, "OFFLINE")
            .with_property(ORDER_LINK, format!("https://p.example/order/{}", id))
            .with_property(ORDER_STATUS_LINK, format!("https://p.example/status/{}", id))
    }

    fn policy() -> PollPolicy {
        PollPolicy::new(Duration::from_secs(1), Duration::from_secs(10))
    }

    #[tokio::test]
    async fn test_direct_download_then_reuse() {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockHttpClient::new());
        mock.always(Method::Get, "https://p.example/files/A", MockReply::bytes(200, "hello world"));
        let o = orchestrator(mock.clone());
        let product = online("A").with_property("checksum", format!("sha256:{}", HELLO_WORLD));
        let cancel = CancellationToken::new();

        let path = o.download(&product, dir.path(), &policy(), &cancel).await.unwrap();
        assert_eq!(path, dir.path().join("A"));
        assert_eq!(std::fs::read(&path).unwrap(), b"hello world");

        let again = o.download(&product, dir.path(), &policy(), &cancel).await.unwrap();
        assert_eq!(again, path);
        assert_eq!(mock.count(Method::Get, "https://p.example/files"), 1);
    }

    #[tokio::test]
    async fn test_checksum_mismatch_fails_and_removes() {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockHttpClient::new());
        mock.always(Method::Get, "https://p.example/files/B", MockReply::bytes(200, "tampered"));
        let o = orchestrator(mock.clone());
        let product = online("B").with_property("checksum", HELLO_WORLD);

        let result = o
            .download(&product, dir.path(), &policy(), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(GatewayError::Integrity { .. })));
        assert!(!dir.path().join("B").exists());
        // not retried
        assert_eq!(mock.count(Method::Get, "https://p.example/files"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_product_is_ordered_polled_and_fetched() {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockHttpClient::new());
        mock.always(Method::Post, "https://p.example/order/C", MockReply::json(200, json!({})));
        mock.on(Method::Get, "https://p.example/status/C", MockReply::json(200, json!({"status": "running"})));
        mock.always(Method::Get, "https://p.example/status/C", MockReply::json(200, json!({"status": "succeeded"})));
        mock.always(Method::Get, "https://p.example/files/C", MockReply::bytes(200, "payload"));
        let o = orchestrator(mock.clone());

        let path = o
            .download(&offline("C"), dir.path(), &policy(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"payload");
        assert_eq!(mock.count(Method::Post, "https://p.example/order"), 1);
        assert_eq!(mock.count(Method::Get, "https://p.example/status"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_requests_share_one_order_and_transfer() {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockHttpClient::new());
        mock.always(Method::Post, "https://p.example/order/D", MockReply::json(200, json!({})));
        mock.on(Method::Get, "https://p.example/status/D", MockReply::json(200, json!({"status": "queued"})));
        mock.always(Method::Get, "https://p.example/status/D", MockReply::json(200, json!({"status": "done"})));
        mock.always(Method::Get, "https://p.example/files/D", MockReply::bytes(200, "shared"));
        let o = orchestrator(mock.clone());
        let product = offline("D");
        let cancel = CancellationToken::new();
        let p = policy();

        let results = futures::future::join_all(
            (0..5).map(|_| o.download(&product, dir.path(), &p, &cancel)),
        )
        .await;
        for result in &results {
            assert_eq!(result.as_ref().unwrap(), &dir.path().join("D"));
        }
        assert_eq!(mock.count(Method::Post, "https://p.example/order"), 1);
        assert_eq!(mock.count(Method::Get, "https://p.example/files"), 1);
        assert_eq!(o.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_order_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockHttpClient::new());
        mock.always(Method::Post, "https://p.example/order/E", MockReply::json(200, json!({})));
        mock.always(Method::Get, "https://p.example/status/E", MockReply::bytes(202, ""));
        let o = orchestrator(mock.clone());

        let short = PollPolicy::new(Duration::from_secs(1), Duration::from_secs(3));
        let result = o
            .download(&offline("E"), dir.path(), &short, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(GatewayError::Timeout { .. })));
        assert_eq!(mock.count(Method::Get, "https://p.example/status"), 4);
        assert_eq!(mock.count(Method::Get, "https://p.example/files"), 0);
    }

    #[tokio::test]
    async fn test_download_all_keeps_order_and_errors() {
        let dir = tempfile::tempdir().unwrap();
        let mock = Arc::new(MockHttpClient::new());
        mock.always(Method::Get, "https://p.example/files/F1", MockReply::bytes(200, "one"));
        mock.always(Method::Get, "https://p.example/files/F3", MockReply::bytes(200, "three"));
        let o = orchestrator(mock);
        let products = vec![
            online("F1"),
            Product::new("F2", "p", "S2_MSI_L1C"),
            online("F3"),
        ];

        let results = o
            .download_all(&products, dir.path(), &policy(), &CancellationToken::new())
            .await;
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap(), &dir.path().join("F1"));
        assert!(matches!(results[1], Err(GatewayError::NotAvailable(_))));
        assert_eq!(results[2].as_ref().unwrap(), &dir.path().join("F3"));
    }

    #[tokio::test]
    async fn test_unknown_provider() {
        let dir = tempfile::tempdir().unwrap();
        let o = orchestrator(Arc::new(MockHttpClient::new()));
        let product = Product::new("X", "nobody", "S2_MSI_L1C");
        let result = o
            .download(&product, dir.path(), &policy(), &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(GatewayError::UnsupportedProvider(_))));
    }
}
