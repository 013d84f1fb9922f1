//! Query-string REST search (OpenSearch / resto style catalogs).
//!
//! # URL Pattern
//!
//! ```text
//! GET {api_endpoint}?productType=S2MSI1C&startDate=2021-01-01T00:00:00Z&box=1,43,2,44&page=1&limit=20
//! ```
//!
//! Parameters come from `params` templates; without any, a resto-compatible
//! set is used. Query extras that no template consumes are appended as is.

use std::collections::BTreeMap;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use super::template::{passthrough_extras, value_to_param, TemplateContext};
use super::{
    items_at, require_url, FieldMapping, PageRequest, PaginationConfig, RawPage, SearchContext,
    SearchPlugin,
};
use crate::error::{GatewayResult, Phase};
use crate::http::{send_json, HttpRequest};
use crate::model::Query;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryStringConfig {
    pub api_endpoint: String,
    /// Parameter name → template.
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    #[serde(default = "super::default_results_path")]
    pub results_path: String,
    #[serde(default)]
    pub pagination: PaginationConfig,
    #[serde(default)]
    pub need_auth: bool,
    #[serde(default)]
    pub metadata_mapping: FieldMapping,
}

fn default_params() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("productType".to_string(), "{providerProductType}".to_string()),
        ("startDate".to_string(), "{start}".to_string()),
        ("completionDate".to_string(), "{end}".to_string()),
        ("box".to_string(), "{bbox}".to_string()),
    ])
}

fn default_mapping() -> FieldMapping {
    FieldMapping::from_pairs(&[
        ("id", "$.id"),
        ("geometry", "$.geometry"),
        ("title", "$.properties.title"),
        ("startTimeFromAscendingNode", "$.properties.startDate"),
        ("completionTimeFromAscendingNode", "$.properties.completionDate"),
        ("cloudCover", "$.properties.cloudCover"),
        ("storageStatus", "$.properties.storage.mode"),
        ("downloadLink", "$.properties.services.download.url"),
        ("quicklook", "$.properties.quicklook"),
    ])
}

pub struct QueryStringSearch {
    config: QueryStringConfig,
    params: BTreeMap<String, String>,
    mapping: FieldMapping,
}

impl QueryStringSearch {
    pub fn new(config: QueryStringConfig) -> GatewayResult<Self> {
        require_url("api_endpoint", &config.api_endpoint)?;
        let params = if config.params.is_empty() {
            default_params()
        } else {
            config.params.clone()
        };
        let mapping = config.metadata_mapping.over(default_mapping());
        Ok(Self {
            config,
            params,
            mapping,
        })
    }

    fn request(&self, ctx: &SearchContext, query: &Query, page: &PageRequest) -> HttpRequest {
        if let Some(next) = &page.cursor {
            return ctx.credentials.apply(HttpRequest::get(next.clone()));
        }
        let vars = TemplateContext::for_search(query, &ctx.binding, page);
        let mut request = HttpRequest::get(self.config.api_endpoint.clone());
        request.query = vars.render_params(&self.params);
        for (key, value) in passthrough_extras(query, &self.params) {
            if let Some(v) = value_to_param(value) {
                request.query.push((key.clone(), v));
            }
        }
        request.query.extend(self.config.pagination.params(page));
        ctx.credentials.apply(request)
    }
}

impl SearchPlugin for QueryStringSearch {
    fn protocol(&self) -> &'static str {
        "query_string"
    }

    fn mapping(&self) -> &FieldMapping {
        &self.mapping
    }

    fn need_auth(&self) -> bool {
        self.config.need_auth
    }

    fn max_items_per_page(&self) -> Option<usize> {
        self.config.pagination.max_items_per_page
    }

    fn execute<'a>(
        &'a self,
        ctx: &'a SearchContext,
        query: &'a Query,
        page: &'a PageRequest,
    ) -> BoxFuture<'a, GatewayResult<RawPage>> {
        Box::pin(async move {
            let request = self.request(ctx, query, page);
            let response = send_json(ctx.http.as_ref(), &ctx.provider, Phase::Search, request).await?;
            Ok(RawPage {
                items: items_at(ctx, &response, &self.config.results_path)?,
                total: self.config.pagination.total(&response),
                next_cursor: self.config.pagination.next_cursor(&response),
            })
        })
    }
}
