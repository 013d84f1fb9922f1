//! Search by POSTing a templated JSON document.
//!
//! The body is rendered from `body` templates (dotted keys nest), query
//! extras no template consumes are added at the top level, and paging keys
//! from `pagination` are written into the body as numbers.

use std::collections::BTreeMap;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::template::{insert_dotted, passthrough_extras, TemplateContext};
use super::{
    items_at, require_url, FieldMapping, PageRequest, PaginationConfig, RawPage, SearchContext,
    SearchPlugin,
};
use crate::error::{GatewayResult, Phase};
use crate::http::{send_json, HttpRequest};
use crate::model::Query;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonPostConfig {
    pub api_endpoint: String,
    /// Body key (dotted) → template.
    #[serde(default)]
    pub body: BTreeMap<String, String>,
    #[serde(default = "super::default_results_path")]
    pub results_path: String,
    #[serde(default)]
    pub pagination: PaginationConfig,
    #[serde(default)]
    pub need_auth: bool,
    #[serde(default)]
    pub metadata_mapping: FieldMapping,
}

fn default_body() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("productType".to_string(), "{providerProductType}".to_string()),
        ("startDate".to_string(), "{start}".to_string()),
        ("endDate".to_string(), "{end}".to_string()),
        ("geometry".to_string(), "{geometry_geojson}".to_string()),
    ])
}

pub struct JsonPostSearch {
    config: JsonPostConfig,
    body: BTreeMap<String, String>,
    mapping: FieldMapping,
}

impl JsonPostSearch {
    pub fn new(config: JsonPostConfig) -> GatewayResult<Self> {
        require_url("api_endpoint", &config.api_endpoint)?;
        let body = if config.body.is_empty() {
            default_body()
        } else {
            config.body.clone()
        };
        let mapping = config
            .metadata_mapping
            .over(FieldMapping::from_pairs(&[("id", "$.id"), ("geometry", "$.geometry")]));
        Ok(Self {
            config,
            body,
            mapping,
        })
    }

    /// The JSON document sent for `page`.
    pub fn body(&self, query: &Query, ctx: &SearchContext, page: &PageRequest) -> Value {
        let vars = TemplateContext::for_search(query, &ctx.binding, page);
        let mut body = vars.render_json(&self.body);
        if let Value::Object(map) = &mut body {
            for (key, value) in passthrough_extras(query, &self.body) {
                map.insert(key.clone(), value.clone());
            }
            for (key, value) in self.config.pagination.params(page) {
                let value = value.parse::<u64>().map(Value::from).unwrap_or(Value::String(value));
                insert_dotted(map, &key, value);
            }
        }
        body
    }
}

impl SearchPlugin for JsonPostSearch {
    fn protocol(&self) -> &'static str {
        "json_post"
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
            let request = HttpRequest::post(self.config.api_endpoint.clone())
                .with_json(self.body(query, ctx, page));
            let request = ctx.credentials.apply(request);
            let response = send_json(ctx.http.as_ref(), &ctx.provider, Phase::Search, request).await?;
            Ok(RawPage {
                items: items_at(ctx, &response, &self.config.results_path)?,
                total: self.config.pagination.total(&response),
                next_cursor: None,
            })
        })
    }
}
