//! Providers whose "search" result is built from the query itself.
//!
//! Data-on-request services (climate reanalyses, model outputs) have nothing
//! to search: any valid request describes exactly one product that will be
//! produced at download time. Without an `api_endpoint` this plugin
//! synthesizes that product; with one, it fetches items that are already in
//! normalized form.

use std::collections::BTreeMap;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::template::TemplateContext;
use super::{items_at, require_url, FieldMapping, PageRequest, RawPage, SearchContext, SearchPlugin};
use crate::error::{GatewayResult, Phase};
use crate::http::{send_json, HttpRequest, Method};
use crate::model::{Product, Query, TotalCount};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrebuiltConfig {
    #[serde(default)]
    pub api_endpoint: Option<String>,
    /// `true` to POST the rendered `params` as JSON instead of a GET query.
    #[serde(default)]
    pub post: bool,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
    #[serde(default = "super::default_results_path")]
    pub results_path: String,
    /// Template of the synthesized product's download link.
    #[serde(default)]
    pub download_link: Option<String>,
    #[serde(default)]
    pub need_auth: bool,
    #[serde(default)]
    pub metadata_mapping: FieldMapping,
}

pub struct PrebuiltSearch {
    config: PrebuiltConfig,
    mapping: FieldMapping,
}

impl PrebuiltSearch {
    pub fn new(config: PrebuiltConfig) -> GatewayResult<Self> {
        if let Some(url) = &config.api_endpoint {
            require_url("api_endpoint", url)?;
        }
        let mapping = config.metadata_mapping.over(FieldMapping::from_pairs(&[
            ("id", "$.id"),
            ("geometry", "$.geometry"),
        ]));
        Ok(Self { config, mapping })
    }

    /// The single product described by `query`.
    ///
    /// Its id is stable for a given query: the product type, the start date
    /// and a prefix of the query fingerprint.
    pub fn synthesize(&self, ctx: &SearchContext, query: &Query) -> Value {
        let vars = TemplateContext::for_query(query, &ctx.binding);
        let date = vars.get("start_date").unwrap_or("any").replace('-', "");
        let fingerprint = query.fingerprint();
        let id = format!("{}_{}_{}", query.product_type, date, &fingerprint[..8]);

        let mut item = Map::new();
        item.insert("id".to_string(), Value::String(id));
        if let Some(geometry) = &query.geometry {
            item.insert("geometry".to_string(), geometry.to_geojson());
        }
        for (key, value) in vars.render_params(&self.config.params) {
            item.insert(key, Value::String(value));
        }
        if let Some(start) = vars.get("start") {
            item.insert("startTimeFromAscendingNode".to_string(), Value::String(start.to_string()));
        }
        if let Some(end) = vars.get("end") {
            item.insert("completionTimeFromAscendingNode".to_string(), Value::String(end.to_string()));
        }
        for (key, value) in &query.extra {
            item.entry(key.clone()).or_insert_with(|| value.clone());
        }
        if let Some(link) = self.config.download_link.as_deref().and_then(|t| vars.render(t)) {
            item.insert("downloadLink".to_string(), Value::String(link));
        }
        item.insert("storageStatus".to_string(), Value::String("OFFLINE".to_string()));
        Value::Object(item)
    }
}

impl SearchPlugin for PrebuiltSearch {
    fn protocol(&self) -> &'static str {
        "prebuilt"
    }

    fn mapping(&self) -> &FieldMapping {
        &self.mapping
    }

    fn need_auth(&self) -> bool {
        self.config.need_auth
    }

    fn execute<'a>(
        &'a self,
        ctx: &'a SearchContext,
        query: &'a Query,
        page: &'a PageRequest,
    ) -> BoxFuture<'a, GatewayResult<RawPage>> {
        Box::pin(async move {
            let Some(endpoint) = &self.config.api_endpoint else {
                let items = if page.page == 1 {
                    vec![self.synthesize(ctx, query)]
                } else {
                    Vec::new()
                };
                return Ok(RawPage {
                    items,
                    total: TotalCount::Exact(1),
                    next_cursor: None,
                });
            };
            let vars = TemplateContext::for_search(query, &ctx.binding, page);
            let request = if self.config.post {
                HttpRequest::new(Method::Post, endpoint.clone())
                    .with_json(vars.render_json(&self.config.params))
            } else {
                let mut request = HttpRequest::get(endpoint.clone());
                request.query = vars.render_params(&self.config.params);
                request
            };
            let response = send_json(
                ctx.http.as_ref(),
                &ctx.provider,
                Phase::Search,
                ctx.credentials.apply(request),
            )
            .await?;
            Ok(RawPage {
                items: items_at(ctx, &response, &self.config.results_path)?,
                total: TotalCount::Unknown,
                next_cursor: None,
            })
        })
    }

    /// Items are already normalized: every top-level field that is not
    /// structural becomes a property.
    fn normalize(&self, ctx: &SearchContext, query: &Query, item: &Value) -> GatewayResult<Product> {
        let mut product = self
            .mapping
            .to_product(&ctx.provider, &query.product_type, item)?;
        if let Value::Object(map) = item {
            for (key, value) in map {
                if !matches!(key.as_str(), "id" | "geometry" | "assets") && !value.is_null() {
                    product.properties.entry(key.clone()).or_insert_with(|| value.clone());
                }
            }
        }
        Ok(product)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::tests::{MockHttpClient, MockReply};
    use crate::model::{parse_datetime, Geometry};
    use serde_json::json;
    use std::sync::Arc;

    fn query() -> Query {
        Query::new("ERA5_SL")
            .with_start(parse_datetime("2020-01-01").unwrap())
            .with_geometry(Geometry::bbox(0.0, 0.0, 10.0, 10.0))
            .with_extra("variable", "2m_temperature")
    }

    #[tokio::test]
    async fn test_synthesized_product_is_stable() {
        let plugin = PrebuiltSearch::new(
            serde_json::from_value(json!({
                "download_link": "https://cds.example/retrieve?product={productType}&date={start_date}"
            }))
            .unwrap(),
        )
        .unwrap();
        let ctx = SearchContext::new("cds", Arc::new(MockHttpClient::new()));

        let page = plugin.execute(&ctx, &query(), &PageRequest::first(20)).await.unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.total, TotalCount::Exact(1));
        let again = plugin.execute(&ctx, &query(), &PageRequest::first(20)).await.unwrap();
        assert_eq!(page.items, again.items);

        let product = plugin.normalize(&ctx, &query(), &page.items[0]).unwrap();
        assert!(product.id.starts_with("ERA5_SL_20200101_"));
        assert_eq!(product.properties["variable"], json!("2m_temperature"));
        assert!(product.is_offline());
        assert_eq!(
            product.download_link().as_deref(),
            Some("https://cds.example/retrieve?product=ERA5_SL&date=2020-01-01")
        );
        assert!(product.geometry.is_some());

        let second = plugin
            .execute(&ctx, &query(), &PageRequest::first(20).next(None))
            .await
            .unwrap();
        assert!(second.items.is_empty());
    }

    #[tokio::test]
    async fn test_endpoint_items_keep_their_fields() {
        let mock = Arc::new(MockHttpClient::new());
        mock.always(
            crate::http::Method::Post,
            "https://prebuilt.example",
            MockReply::json(200, json!({"features": [{"id": "x1", "cloudCover": 3}]})),
        );
        let plugin = PrebuiltSearch::new(
            serde_json::from_value(json!({
                "api_endpoint": "https://prebuilt.example/search",
                "post": true,
                "params": {"product": "{productType}"}
            }))
            .unwrap(),
        )
        .unwrap();
        let ctx = SearchContext::new("p", mock.clone());
        let page = plugin.execute(&ctx, &query(), &PageRequest::first(5)).await.unwrap();
        let product = plugin.normalize(&ctx, &query(), &page.items[0]).unwrap();
        assert_eq!(product.properties["cloudCover"], json!(3));
        assert_eq!(mock.calls()[0].body, Some(json!({"product": "ERA5_SL"})));
    }
}
