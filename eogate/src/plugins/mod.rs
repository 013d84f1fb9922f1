//! Protocol plugins.
//!
//! Each provider is served by up to three plugins selected from its
//! configuration:
//!
//! - a [`SearchPlugin`] speaking the provider's search protocol,
//! - a [`DownloadPlugin`] resolving and, if needed, ordering payloads,
//! - a [`DiscoveryPlugin`] reporting product types the provider offers.
//!
//! Search plugins are chosen by the `type` tag of [`SearchPluginConfig`]:
//!
//! | tag            | wire behavior                                           |
//! |----------------|---------------------------------------------------------|
//! | `query_string` | GET with templated URL parameters                       |
//! | `odata`        | OData v4 `$filter` / `$top` / `$skip`, `@odata.nextLink`|
//! | `json_post`    | POST with a templated JSON body                         |
//! | `stac`         | STAC item-search, `links[rel=next]` paging              |
//! | `static_stac`  | fixed item collection filtered locally                  |
//! | `object_store` | S3 ListObjectsV2 under a templated prefix               |
//! | `prebuilt`     | items already normalized, or synthesized from the query |
//! | `data_request` | submit a job, poll it, page through its results         |
//! | `csw`          | OGC CSW `GetRecords` with JSON output                   |
//!
//! # Example
//!
//! ```ignore
//! let config: SearchPluginConfig = serde_json::from_str(
//!     r#"{"type": "stac", "api_endpoint": "https://earth-search.example/v1/search"}"#,
//! )?;
//! let plugin = config.build()?;
//! assert_eq!(plugin.protocol(), "stac");
//! ```

pub mod csw;
pub mod data_request;
pub mod discovery;
pub mod download;
pub mod json_post;
pub mod mapping;
pub mod object_store;
pub mod odata;
pub mod prebuilt;
pub mod query_string;
pub mod stac;
pub mod template;

use std::sync::Arc;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::auth::Credentials;
use crate::deferred::{PollOutcome, PollPolicy};
use crate::error::{GatewayError, GatewayResult, Phase};
use crate::http::AsyncHttpClient;
use crate::model::{Product, Query, TotalCount};
use crate::registry::ProductBinding;

pub use discovery::{DiscoveredProductType, DiscoveryContext, DiscoveryPlugin, DiscoveryPluginConfig};
pub use download::{
    DownloadContext, DownloadPlugin, DownloadPluginConfig, DownloadRoute, OrderHandle, OrderTicket,
    TransferSource,
};
pub use mapping::{json_path, FieldMapping};

/// Everything a search plugin needs to reach its provider.
#[derive(Clone)]
pub struct SearchContext {
    pub provider: String,
    pub http: Arc<dyn AsyncHttpClient>,
    pub credentials: Credentials,
    pub binding: ProductBinding,
    /// Remote job id once a deferred search job is ready.
    pub job_id: Option<String>,
}

impl SearchContext {
    pub fn new(provider: impl Into<String>, http: Arc<dyn AsyncHttpClient>) -> Self {
        Self {
            provider: provider.into(),
            http,
            credentials: Credentials::None,
            binding: ProductBinding::default(),
            job_id: None,
        }
    }

    pub fn with_binding(mut self, binding: ProductBinding) -> Self {
        self.binding = binding;
        self
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub(crate) fn error(&self, reason: impl Into<String>) -> GatewayError {
        GatewayError::provider(&self.provider, Phase::Search, reason)
    }
}

/// One page to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    /// 1-based page number.
    pub page: usize,
    pub items_per_page: usize,
    /// Cursor returned with the previous page, if the protocol has one.
    pub cursor: Option<String>,
}

impl PageRequest {
    pub fn first(items_per_page: usize) -> Self {
        Self {
            page: 1,
            items_per_page,
            cursor: None,
        }
    }

    pub fn next(&self, cursor: Option<String>) -> Self {
        Self {
            page: self.page + 1,
            items_per_page: self.items_per_page,
            cursor,
        }
    }

    /// Items before this page.
    pub fn skip(&self) -> usize {
        (self.page.saturating_sub(1)) * self.items_per_page
    }
}

/// Provider-native items of one page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawPage {
    pub items: Vec<Value>,
    pub total: TotalCount,
    pub next_cursor: Option<String>,
}

/// A search protocol adapter.
pub trait SearchPlugin: Send + Sync {
    /// Configuration tag of this plugin (`stac`, `odata`, ...).
    fn protocol(&self) -> &'static str;

    fn mapping(&self) -> &FieldMapping;

    fn need_auth(&self) -> bool;

    /// Whether the end of results is signalled by a missing cursor rather
    /// than by a short page.
    fn paginates_by_cursor(&self) -> bool {
        false
    }

    /// Upper bound on `items_per_page` accepted by the provider.
    fn max_items_per_page(&self) -> Option<usize> {
        None
    }

    /// The job workflow, for providers that answer asynchronously.
    fn deferred(&self) -> Option<&dyn DeferredSearch> {
        None
    }

    /// Fetches one page of provider-native items.
    fn execute<'a>(
        &'a self,
        ctx: &'a SearchContext,
        query: &'a Query,
        page: &'a PageRequest,
    ) -> BoxFuture<'a, GatewayResult<RawPage>>;

    /// Turns one provider item into a product.
    fn normalize(&self, ctx: &SearchContext, query: &Query, item: &Value) -> GatewayResult<Product> {
        self.mapping()
            .to_product(&ctx.provider, &query.product_type, item)
    }
}

/// Job submission side of a deferred search.
pub trait DeferredSearch: Send + Sync {
    /// Submits the query; returns the remote job id.
    fn submit<'a>(&'a self, ctx: &'a SearchContext, query: &'a Query) -> BoxFuture<'a, GatewayResult<String>>;

    fn status<'a>(&'a self, ctx: &'a SearchContext, job_id: &'a str) -> BoxFuture<'a, GatewayResult<PollOutcome>>;

    fn cancel<'a>(&'a self, ctx: &'a SearchContext, job_id: &'a str) -> BoxFuture<'a, GatewayResult<()>>;

    /// Provider-specific timing overriding the gateway defaults.
    fn poll_policy(&self) -> Option<PollPolicy> {
        None
    }
}

/// Pagination parameters shared by the request/response protocols.
///
/// Fields left out of a configuration keep their default (`page` / `limit`
/// parameters, first page numbered 1).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaginationConfig {
    /// Parameter carrying the page number.
    pub page_param: Option<String>,
    /// Parameter carrying the page size.
    pub size_param: Option<String>,
    /// Parameter carrying the number of items to skip.
    pub skip_param: Option<String>,
    /// Number of the first page on the provider side (0 or 1).
    pub start_page: usize,
    pub max_items_per_page: Option<usize>,
    /// JSON path to the total number of matches.
    pub total_items_path: Option<String>,
    /// JSON path to a next-page URL, for cursor-style providers.
    pub next_page_path: Option<String>,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            page_param: Some("page".to_string()),
            size_param: Some("limit".to_string()),
            skip_param: None,
            start_page: 1,
            max_items_per_page: None,
            total_items_path: None,
            next_page_path: None,
        }
    }
}

impl PaginationConfig {
    /// Paging key/value pairs for `page`.
    pub fn params(&self, page: &PageRequest) -> Vec<(String, String)> {
        let mut params = Vec::new();
        if let Some(name) = &self.page_param {
            params.push((name.clone(), (self.start_page + page.page - 1).to_string()));
        }
        if let Some(name) = &self.size_param {
            params.push((name.clone(), page.items_per_page.to_string()));
        }
        if let Some(name) = &self.skip_param {
            params.push((name.clone(), page.skip().to_string()));
        }
        params
    }

    /// Reads the total count hint from a response document.
    pub fn total(&self, response: &Value) -> TotalCount {
        self.total_items_path
            .as_deref()
            .and_then(|path| json_path(response, path))
            .and_then(value_as_count)
            .map(TotalCount::Exact)
            .unwrap_or(TotalCount::Unknown)
    }

    /// Reads the next page URL from a response document.
    pub fn next_cursor(&self, response: &Value) -> Option<String> {
        self.next_page_path
            .as_deref()
            .and_then(|path| json_path(response, path))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    }
}

pub(crate) fn value_as_count(value: &Value) -> Option<usize> {
    match value {
        Value::Number(n) => n.as_u64().map(|n| n as usize),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

/// Extracts the item list found at `path` in `response`.
pub(crate) fn items_at(ctx: &SearchContext, response: &Value, path: &str) -> GatewayResult<Vec<Value>> {
    match json_path(response, path) {
        Some(Value::Array(items)) => Ok(items.clone()),
        Some(Value::Null) | None => Ok(Vec::new()),
        Some(_) => Err(ctx.error(format!("results at '{}' are not a list", path))),
    }
}

fn default_results_path() -> String {
    "$.features".to_string()
}

/// Search plugin configuration, tagged by protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SearchPluginConfig {
    QueryString(query_string::QueryStringConfig),
    Odata(odata::ODataConfig),
    JsonPost(json_post::JsonPostConfig),
    Stac(stac::StacConfig),
    StaticStac(stac::StaticStacConfig),
    ObjectStore(object_store::ObjectStoreConfig),
    Prebuilt(prebuilt::PrebuiltConfig),
    DataRequest(data_request::DataRequestConfig),
    Csw(csw::CswConfig),
}

impl SearchPluginConfig {
    /// Instantiates the plugin.
    pub fn build(&self) -> GatewayResult<Arc<dyn SearchPlugin>> {
        let plugin: Arc<dyn SearchPlugin> = match self {
            Self::QueryString(c) => Arc::new(query_string::QueryStringSearch::new(c.clone())?),
            Self::Odata(c) => Arc::new(odata::ODataSearch::new(c.clone())?),
            Self::JsonPost(c) => Arc::new(json_post::JsonPostSearch::new(c.clone())?),
            Self::Stac(c) => Arc::new(stac::StacSearch::new(c.clone())?),
            Self::StaticStac(c) => Arc::new(stac::StaticStacSearch::new(c.clone())?),
            Self::ObjectStore(c) => Arc::new(object_store::ObjectStoreSearch::new(c.clone())?),
            Self::Prebuilt(c) => Arc::new(prebuilt::PrebuiltSearch::new(c.clone())?),
            Self::DataRequest(c) => Arc::new(data_request::DataRequestSearch::new(c.clone())?),
            Self::Csw(c) => Arc::new(csw::CswSearch::new(c.clone())?),
        };
        Ok(plugin)
    }
}

pub(crate) fn require_url(name: &str, url: &str) -> GatewayResult<()> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(GatewayError::Configuration(format!(
            "{} must be an http(s) URL, got '{}'",
            name, url
        )))
    }
}
