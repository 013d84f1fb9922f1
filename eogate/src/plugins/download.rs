//! Download plugins: where a product's bytes live and how to obtain them.
//!
//! A download plugin does not move bytes itself. It resolves a product to a
//! [`DownloadRoute`]: either a [`TransferSource`] the orchestrator can stream
//! right away, or an [`OrderTicket`] for offline products that must first be
//! ordered, polled and then fetched.
//!
//! Order status documents are read through configurable paths:
//!
//! ```json
//! {"status": "running", "progress": 40, "message": "staging from tape"}
//! ```
//!
//! An HTTP 202 answer from the status endpoint always means "not ready".

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use super::json_path;
use super::template::{render_with, value_to_param};
use crate::auth::Credentials;
use crate::deferred::PollOutcome;
use crate::error::{GatewayError, GatewayResult, Phase};
use crate::http::{status_error, transport_error, AsyncHttpClient, HttpRequest, HttpResponse, Method};
use crate::model::{Product, ORDER_LINK, ORDER_STATUS_LINK};

/// Everything a download plugin needs to reach its provider.
#[derive(Clone)]
pub struct DownloadContext {
    pub provider: String,
    pub http: Arc<dyn AsyncHttpClient>,
    pub credentials: Credentials,
}

impl DownloadContext {
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

    async fn send(&self, phase: Phase, request: HttpRequest) -> GatewayResult<HttpResponse> {
        self.http
            .send(self.credentials.apply(request))
            .await
            .map_err(|e| transport_error(&self.provider, phase, e))
    }
}

/// Where to stream a product from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSource {
    pub url: String,
    /// `sha256:<hex>` or bare hex digest of the payload.
    pub checksum: Option<String>,
    /// File name under the destination directory.
    pub file_name: String,
    pub size: Option<u64>,
}

/// What is needed to order an offline product.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderTicket {
    pub product_id: String,
    pub order_url: String,
    /// Status endpoint known before submission (`orderStatusLink`).
    pub status_url: Option<String>,
    /// Link to fetch once the order completes, if known in advance.
    pub download_url: Option<String>,
    pub file_name: String,
    pub checksum: Option<String>,
    /// Product properties, for rendering order and status templates.
    pub properties: BTreeMap<String, Value>,
}

/// A submitted order.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderHandle {
    /// Provider order id, when the order answer carries one.
    pub order_id: Option<String>,
    pub status_url: String,
    pub ticket: OrderTicket,
}

impl fmt::Display for OrderHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.order_id {
            Some(id) => f.write_str(id),
            None => f.write_str(&self.status_url),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DownloadRoute {
    Direct(TransferSource),
    Order(OrderTicket),
}

/// A provider's download protocol.
pub trait DownloadPlugin: Send + Sync {
    fn need_auth(&self) -> bool;

    /// Decides how `product` is obtained.
    ///
    /// # Errors
    ///
    /// `NotAvailable` when the product carries neither a download link nor
    /// an orderable link.
    fn resolve(&self, product: &Product) -> GatewayResult<DownloadRoute>;

    /// Sends the order. Never retried.
    fn submit_order<'a>(
        &'a self,
        ctx: &'a DownloadContext,
        ticket: &'a OrderTicket,
    ) -> BoxFuture<'a, GatewayResult<OrderHandle>>;

    fn poll_order<'a>(
        &'a self,
        ctx: &'a DownloadContext,
        handle: &'a OrderHandle,
    ) -> BoxFuture<'a, GatewayResult<PollOutcome>>;

    /// Final transfer source of a completed order.
    fn fetch_order<'a>(
        &'a self,
        ctx: &'a DownloadContext,
        handle: &'a OrderHandle,
    ) -> BoxFuture<'a, GatewayResult<TransferSource>>;
}

/// Download plugin configuration, tagged by protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DownloadPluginConfig {
    Http(HttpDownloadConfig),
}

impl DownloadPluginConfig {
    pub fn build(&self) -> GatewayResult<Arc<dyn DownloadPlugin>> {
        match self {
            Self::Http(c) => Ok(Arc::new(HttpDownload::new(c.clone())?)),
        }
    }
}

/// How the order status document is read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderStatusConfig {
    /// Status URL template (`{orderId}` plus product properties), used when
    /// the product has no `orderStatusLink`.
    pub url: Option<String>,
    pub status_path: String,
    pub success_values: Vec<String>,
    pub error_values: Vec<String>,
    pub message_path: Option<String>,
    pub percent_path: Option<String>,
    /// Path to the download URI in the completed status document.
    pub location_path: Option<String>,
}

impl Default for OrderStatusConfig {
    fn default() -> Self {
        Self {
            url: None,
            status_path: "$.status".to_string(),
            success_values: vec![
                "succeeded".to_string(),
                "completed".to_string(),
                "done".to_string(),
            ],
            error_values: vec!["failed".to_string(), "error".to_string()],
            message_path: Some("$.message".to_string()),
            percent_path: Some("$.progress".to_string()),
            location_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpDownloadConfig {
    #[serde(default)]
    pub need_auth: bool,
    /// Order offline products instead of failing on them.
    #[serde(default = "default_true")]
    pub order_enabled: bool,
    #[serde(default = "default_order_method")]
    pub order_method: String,
    /// Order body key (dotted) → template over product properties.
    #[serde(default)]
    pub order_body: BTreeMap<String, String>,
    /// Path to the order id in the order answer.
    #[serde(default)]
    pub order_id_path: Option<String>,
    #[serde(default)]
    pub order_status: OrderStatusConfig,
    /// Appended to the product id to name the downloaded file (`.zip`).
    #[serde(default)]
    pub file_extension: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_order_method() -> String {
    "POST".to_string()
}

/// Plain HTTP(S) downloads with optional ordering of offline products.
pub struct HttpDownload {
    config: HttpDownloadConfig,
    order_method: Method,
}

impl HttpDownload {
    pub fn new(config: HttpDownloadConfig) -> GatewayResult<Self> {
        let order_method = match config.order_method.to_ascii_uppercase().as_str() {
            "GET" => Method::Get,
            "POST" => Method::Post,
            other => {
                return Err(GatewayError::Configuration(format!(
                    "unsupported order_method '{}'",
                    other
                )))
            }
        };
        Ok(Self {
            config,
            order_method,
        })
    }

    fn file_name(&self, product: &Product) -> String {
        let base: String = product
            .id
            .chars()
            .map(|c| if matches!(c, '/' | '\\' | ':') { '_' } else { c })
            .collect();
        match &self.config.file_extension {
            Some(ext) if !base.ends_with(ext.as_str()) => format!("{}{}", base, ext),
            _ => base,
        }
    }

    fn checksum(product: &Product) -> Option<String> {
        product.property_str("checksum").or_else(|| {
            product
                .assets
                .get("download")
                .and_then(|a| a.checksum.clone())
        })
    }

    fn render(template: &str, ticket: &OrderTicket, order_id: Option<&str>) -> Option<String> {
        render_with(template, |name| match name {
            "orderId" => order_id.map(str::to_string),
            "id" => Some(ticket.product_id.clone()),
            other => ticket.properties.get(other).and_then(value_to_param),
        })
    }

    fn read_status(&self, document: &Value) -> PollOutcome {
        let status = &self.config.order_status;
        let message = status
            .message_path
            .as_deref()
            .and_then(|p| json_path(document, p))
            .and_then(value_to_param);
        let Some(value) = json_path(document, &status.status_path).and_then(value_to_param) else {
            return PollOutcome::Ready;
        };
        let is = |values: &[String]| values.iter().any(|v| v.eq_ignore_ascii_case(&value));
        if is(&status.success_values) {
            PollOutcome::Ready
        } else if is(&status.error_values) {
            PollOutcome::Failed(message.unwrap_or(value))
        } else {
            let progress = status
                .percent_path
                .as_deref()
                .and_then(|p| json_path(document, p))
                .and_then(Value::as_f64)
                .map(|p| p.clamp(0.0, 100.0) as u8);
            PollOutcome::Pending {
                progress,
                message: message.or(Some(value)),
            }
        }
    }
}

impl DownloadPlugin for HttpDownload {
    fn need_auth(&self) -> bool {
        self.config.need_auth
    }

    fn resolve(&self, product: &Product) -> GatewayResult<DownloadRoute> {
        let file_name = self.file_name(product);
        let checksum = Self::checksum(product);
        let order_link = product.property_str(ORDER_LINK);
        if product.is_offline() && self.config.order_enabled {
            if let Some(order_url) = order_link {
                return Ok(DownloadRoute::Order(OrderTicket {
                    product_id: product.id.clone(),
                    order_url,
                    status_url: product.property_str(ORDER_STATUS_LINK),
                    download_url: product.download_link(),
                    file_name,
                    checksum,
                    properties: product.properties.clone(),
                }));
            }
        }
        match product.download_link() {
            Some(url) => Ok(DownloadRoute::Direct(TransferSource {
                url,
                checksum,
                file_name,
                size: product
                    .properties
                    .get("size")
                    .and_then(super::value_as_count)
                    .map(|n| n as u64),
            })),
            None => Err(GatewayError::NotAvailable(format!(
                "product {} from {} has no download link",
                product.id, product.provider
            ))),
        }
    }

    fn submit_order<'a>(
        &'a self,
        ctx: &'a DownloadContext,
        ticket: &'a OrderTicket,
    ) -> BoxFuture<'a, GatewayResult<OrderHandle>> {
        Box::pin(async move {
            let mut request = HttpRequest::new(self.order_method, ticket.order_url.clone());
            if self.order_method == Method::Post {
                let mut body = serde_json::Map::new();
                for (key, template) in &self.config.order_body {
                    if let Some(v) = Self::render(template, ticket, None) {
                        let v = serde_json::from_str(&v).unwrap_or(Value::String(v));
                        super::template::insert_dotted(&mut body, key, v);
                    }
                }
                request = request.with_json(Value::Object(body));
            }
            info!(provider = %ctx.provider, product = %ticket.product_id, "Ordering offline product");
            let response = ctx.send(Phase::Submit, request).await?;
            if !response.is_success() {
                // Only a definite 4xx is a refusal; outages stay provider errors.
                return Err(match status_error(&ctx.provider, Phase::Submit, response.status, &ticket.order_url) {
                    GatewayError::Provider {
                        provider,
                        reason,
                        transient: false,
                        ..
                    } => GatewayError::Rejected {
                        provider,
                        phase: Phase::Submit,
                        reason,
                    },
                    other => other,
                });
            }
            let document: Value = response.json().unwrap_or(Value::Null);
            let order_id = self
                .config
                .order_id_path
                .as_deref()
                .and_then(|p| json_path(&document, p))
                .and_then(value_to_param);
            let status_url = ticket
                .status_url
                .clone()
                .or_else(|| {
                    self.config
                        .order_status
                        .url
                        .as_deref()
                        .and_then(|t| Self::render(t, ticket, order_id.as_deref()))
                })
                .or_else(|| ticket.download_url.clone())
                .ok_or_else(|| {
                    GatewayError::provider(
                        &ctx.provider,
                        Phase::Submit,
                        format!("no way to follow the order of {}", ticket.product_id),
                    )
                })?;
            debug!(provider = %ctx.provider, status_url = %status_url, "Order accepted");
            Ok(OrderHandle {
                order_id,
                status_url,
                ticket: ticket.clone(),
            })
        })
    }

    fn poll_order<'a>(
        &'a self,
        ctx: &'a DownloadContext,
        handle: &'a OrderHandle,
    ) -> BoxFuture<'a, GatewayResult<PollOutcome>> {
        Box::pin(async move {
            // Without a status endpoint the download link itself is checked.
            let probing_link = Some(&handle.status_url) == handle.ticket.download_url.as_ref()
                && handle.ticket.status_url.is_none();
            let method = if probing_link { Method::Head } else { Method::Get };
            let response = ctx
                .send(Phase::Poll, HttpRequest::new(method, handle.status_url.clone()))
                .await?;
            if response.status == 202 {
                return Ok(PollOutcome::pending());
            }
            if !response.is_success() {
                return Err(status_error(&ctx.provider, Phase::Poll, response.status, &handle.status_url));
            }
            if probing_link {
                return Ok(PollOutcome::Ready);
            }
            match response.json::<Value>() {
                Ok(document) => Ok(self.read_status(&document)),
                Err(_) => Ok(PollOutcome::Ready),
            }
        })
    }

    fn fetch_order<'a>(
        &'a self,
        ctx: &'a DownloadContext,
        handle: &'a OrderHandle,
    ) -> BoxFuture<'a, GatewayResult<TransferSource>> {
        Box::pin(async move {
            let mut url = None;
            if let Some(path) = &self.config.order_status.location_path {
                let response = ctx
                    .send(Phase::Fetch, HttpRequest::get(handle.status_url.clone()))
                    .await?;
                if !response.is_success() {
                    return Err(status_error(&ctx.provider, Phase::Fetch, response.status, &handle.status_url));
                }
                let document: Value = response.json().map_err(|e| {
                    GatewayError::provider(&ctx.provider, Phase::Fetch, format!("invalid status document: {}", e))
                })?;
                url = json_path(&document, path).and_then(value_to_param);
            }
            let url = url.or_else(|| handle.ticket.download_url.clone()).ok_or_else(|| {
                GatewayError::NotAvailable(format!(
                    "order {} completed without a download location",
                    handle
                ))
            })?;
            Ok(TransferSource {
                url,
                checksum: handle.ticket.checksum.clone(),
                file_name: handle.ticket.file_name.clone(),
                size: None,
            })
        })
    }
}
