//! OData v4 catalogue search.
//!
//! # URL Pattern
//!
//! ```text
//! GET {api_endpoint}?$filter=<clause> and <clause>&$top=20&$skip=40&$count=true
//! ```
//!
//! Each entry of `filters` renders to one clause, joined in clause-name
//! order; clauses whose placeholders are unresolved (no end date, no geometry) are left out. When the response
//! carries `@odata.nextLink`, the next page is fetched from that link
//! verbatim.

use std::collections::BTreeMap;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use super::template::TemplateContext;
use super::{items_at, require_url, value_as_count, FieldMapping, PageRequest, RawPage, SearchContext, SearchPlugin};
use crate::error::{GatewayResult, Phase};
use crate::http::{send_json, HttpRequest};
use crate::model::{Query, TotalCount};

const DEFAULT_MAX_TOP: usize = 1000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ODataConfig {
    pub api_endpoint: String,
    /// Clause name → `$filter` clause template.
    #[serde(default)]
    pub filters: BTreeMap<String, String>,
    /// Additional parameters (`$expand`, `$orderby`, ...), templated.
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    #[serde(default = "default_true")]
    pub count: bool,
    #[serde(default)]
    pub max_items_per_page: Option<usize>,
    #[serde(default)]
    pub need_auth: bool,
    #[serde(default)]
    pub metadata_mapping: FieldMapping,
}

fn default_true() -> bool {
    true
}

fn default_filters() -> BTreeMap<String, String> {
    BTreeMap::from([
        (
            "collection".to_string(),
            "Collection/Name eq '{collection}'".to_string(),
        ),
        (
            "productType".to_string(),
            "Attributes/OData.CSC.StringAttribute/any(att:att/Name eq 'productType' and att/OData.CSC.StringAttribute/Value eq '{providerProductType}')".to_string(),
        ),
        (
            "start".to_string(),
            "ContentDate/Start ge {start}".to_string(),
        ),
        ("end".to_string(), "ContentDate/Start le {end}".to_string()),
        (
            "geometry".to_string(),
            "OData.CSC.Intersects(area=geography'SRID=4326;{geometry_wkt}')".to_string(),
        ),
    ])
}

fn default_mapping() -> FieldMapping {
    FieldMapping::from_pairs(&[
        ("id", "$.Name"),
        ("uid", "$.Id"),
        ("geometry", "$.GeoFootprint"),
        ("startTimeFromAscendingNode", "$.ContentDate.Start"),
        ("completionTimeFromAscendingNode", "$.ContentDate.End"),
        ("publicationDate", "$.PublicationDate"),
        ("size", "$.ContentLength"),
        ("checksum", "$.Checksum[0].Value"),
        ("online", "$.Online"),
    ])
}

pub struct ODataSearch {
    config: ODataConfig,
    filters: BTreeMap<String, String>,
    mapping: FieldMapping,
}

impl ODataSearch {
    pub fn new(config: ODataConfig) -> GatewayResult<Self> {
        require_url("api_endpoint", &config.api_endpoint)?;
        let filters = if config.filters.is_empty() {
            default_filters()
        } else {
            config.filters.clone()
        };
        let mapping = config.metadata_mapping.over(default_mapping());
        Ok(Self {
            config,
            filters,
            mapping,
        })
    }

    /// `$filter` expression for `query`, clauses sorted by clause name.
    pub fn filter(&self, vars: &TemplateContext) -> Option<String> {
        let clauses: Vec<String> = vars
            .render_params(&self.filters)
            .into_iter()
            .map(|(_, clause)| clause)
            .collect();
        (!clauses.is_empty()).then(|| clauses.join(" and "))
    }

    fn request(&self, ctx: &SearchContext, query: &Query, page: &PageRequest) -> HttpRequest {
        if let Some(next) = &page.cursor {
            return ctx.credentials.apply(HttpRequest::get(next.clone()));
        }
        let vars = TemplateContext::for_search(query, &ctx.binding, page);
        let mut request = HttpRequest::get(self.config.api_endpoint.clone());
        if let Some(filter) = self.filter(&vars) {
            request = request.with_query("$filter", filter);
        }
        request.query.extend(vars.render_params(&self.config.params));
        request = request
            .with_query("$top", page.items_per_page.to_string())
            .with_query("$skip", page.skip().to_string());
        if self.config.count {
            request = request.with_query("$count", "true");
        }
        ctx.credentials.apply(request)
    }
}

impl SearchPlugin for ODataSearch {
    fn protocol(&self) -> &'static str {
        "odata"
    }

    fn mapping(&self) -> &FieldMapping {
        &self.mapping
    }

    fn need_auth(&self) -> bool {
        self.config.need_auth
    }

    fn max_items_per_page(&self) -> Option<usize> {
        Some(self.config.max_items_per_page.unwrap_or(DEFAULT_MAX_TOP))
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
            let total = response
                .get("@odata.count")
                .and_then(value_as_count)
                .map(TotalCount::Exact)
                .unwrap_or(TotalCount::Unknown);
            let next_cursor = response
                .get("@odata.nextLink")
                .and_then(|v| v.as_str())
                .map(str::to_string);
            Ok(RawPage {
                items: items_at(ctx, &response, "$.value")?,
                total,
                next_cursor,
            })
        })
    }
}
