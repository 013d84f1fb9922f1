//! STAC catalogs: the item-search API and static item collections.
//!
//! [`StacSearch`] POSTs an item-search body:
//!
//! ```text
//! POST {api_endpoint}
//! {"collections": ["sentinel-2-l1c"], "limit": 20, "bbox": [1, 43, 2, 44],
//!  "datetime": "2021-01-01T00:00:00Z/..", "query": {"eo:cloud_cover": {"eq": 10}}}
//! ```
//!
//! and follows the `links[rel=next]` object of each answer (its `href`,
//! `method` and `body`) until there is none.
//!
//! [`StaticStacSearch`] downloads a fixed item collection once and filters
//! it locally by collection, footprint and acquisition date.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::sync::OnceCell;
use tracing::debug;

use super::template::{value_to_param, TemplateContext};
use super::{items_at, require_url, value_as_count, FieldMapping, PageRequest, RawPage, SearchContext, SearchPlugin};
use crate::error::{GatewayError, GatewayResult, Phase};
use crate::http::{send_json, HttpRequest, Method};
use crate::model::{Geometry, Query, TotalCount};

fn default_mapping() -> FieldMapping {
    FieldMapping::from_pairs(&[
        ("id", "$.id"),
        ("geometry", "$.geometry"),
        ("assets", "$.assets"),
        ("title", "$.id"),
        ("collection", "$.collection"),
        ("startTimeFromAscendingNode", "$.properties.datetime"),
        ("completionTimeFromAscendingNode", "$.properties.end_datetime"),
        ("platform", "$.properties.platform"),
        ("instrument", "$.properties.instruments"),
        ("cloudCover", "$.properties.eo:cloud_cover"),
        ("storageStatus", "$.properties.storage:status"),
    ])
}

/// Collection requested for a query: the binding's `collection`, else the
/// provider product type.
fn collection(vars: &TemplateContext) -> Option<String> {
    vars.get("collection")
        .or_else(|| vars.get("providerProductType"))
        .map(str::to_string)
}

fn datetime_range(start: Option<&DateTime<Utc>>, end: Option<&DateTime<Utc>>) -> Option<String> {
    let fmt = |d: &DateTime<Utc>| d.to_rfc3339_opts(chrono::SecondsFormat::Secs, true);
    match (start, end) {
        (None, None) => None,
        (s, e) => Some(format!(
            "{}/{}",
            s.map(fmt).unwrap_or_else(|| "..".to_string()),
            e.map(fmt).unwrap_or_else(|| "..".to_string())
        )),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StacConfig {
    pub api_endpoint: String,
    /// Extra body fields (dotted keys nest), templated.
    #[serde(default)]
    pub body: BTreeMap<String, String>,
    /// Send the footprint as `intersects` GeoJSON instead of `bbox`.
    #[serde(default)]
    pub use_intersects: bool,
    #[serde(default)]
    pub max_items_per_page: Option<usize>,
    #[serde(default)]
    pub need_auth: bool,
    #[serde(default)]
    pub metadata_mapping: FieldMapping,
}

/// Serialized form of a `rel=next` link, used as the page cursor.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct NextLink {
    href: String,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    body: Option<Value>,
    #[serde(default)]
    merge: bool,
}

pub struct StacSearch {
    config: StacConfig,
    mapping: FieldMapping,
}

impl StacSearch {
    pub fn new(config: StacConfig) -> GatewayResult<Self> {
        require_url("api_endpoint", &config.api_endpoint)?;
        let mapping = config.metadata_mapping.over(default_mapping());
        Ok(Self { config, mapping })
    }

    /// Item-search body for the first page.
    pub fn body(&self, ctx: &SearchContext, query: &Query, page: &PageRequest) -> Value {
        let vars = TemplateContext::for_search(query, &ctx.binding, page);
        let mut body = match vars.render_json(&self.config.body) {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        if let Some(collection) = collection(&vars) {
            body.insert("collections".to_string(), json!([collection]));
        }
        body.insert("limit".to_string(), json!(page.items_per_page));
        if let Some(geometry) = &query.geometry {
            if self.config.use_intersects {
                body.insert("intersects".to_string(), geometry.to_geojson());
            } else {
                let (a, b, c, d) = geometry.bounds();
                body.insert("bbox".to_string(), json!([a, b, c, d]));
            }
        }
        if let Some(range) = datetime_range(query.start.as_ref(), query.end.as_ref()) {
            body.insert("datetime".to_string(), Value::String(range));
        }
        let consumed: Vec<String> = self
            .config
            .body
            .values()
            .flat_map(|t| super::template::placeholders(t))
            .collect();
        let filters: Map<String, Value> = query
            .extra
            .iter()
            .filter(|(key, _)| !consumed.contains(key))
            .map(|(key, value)| (key.clone(), json!({ "eq": value })))
            .collect();
        if !filters.is_empty() {
            body.insert("query".to_string(), Value::Object(filters));
        }
        Value::Object(body)
    }

    fn request(&self, ctx: &SearchContext, query: &Query, page: &PageRequest) -> GatewayResult<HttpRequest> {
        let request = match &page.cursor {
            None => HttpRequest::post(self.config.api_endpoint.clone())
                .with_json(self.body(ctx, query, page)),
            Some(cursor) => {
                let link: NextLink = serde_json::from_str(cursor)
                    .map_err(|e| ctx.error(format!("invalid next link: {}", e)))?;
                let method = match link.method.as_deref() {
                    Some(m) if m.eq_ignore_ascii_case("POST") => Method::Post,
                    _ => Method::Get,
                };
                let mut request = HttpRequest::new(method, link.href);
                if method == Method::Post {
                    let body = match (link.body, link.merge) {
                        (Some(Value::Object(extra)), true) => {
                            let mut base = self.body(ctx, query, page);
                            if let Value::Object(map) = &mut base {
                                map.extend(extra);
                            }
                            base
                        }
                        (Some(body), _) => body,
                        (None, _) => self.body(ctx, query, page),
                    };
                    request = request.with_json(body);
                }
                request
            }
        };
        Ok(ctx.credentials.apply(request))
    }
}

fn next_link(response: &Value) -> Option<String> {
    let link = response
        .get("links")?
        .as_array()?
        .iter()
        .find(|l| l.get("rel").and_then(Value::as_str) == Some("next"))?;
    let link: NextLink = serde_json::from_value(link.clone()).ok()?;
    serde_json::to_string(&link).ok()
}

fn matched(response: &Value) -> TotalCount {
    response
        .get("numberMatched")
        .or_else(|| response.get("context").and_then(|c| c.get("matched")))
        .and_then(value_as_count)
        .map(TotalCount::Exact)
        .unwrap_or(TotalCount::Unknown)
}

impl SearchPlugin for StacSearch {
    fn protocol(&self) -> &'static str {
        "stac"
    }

    fn mapping(&self) -> &FieldMapping {
        &self.mapping
    }

    fn need_auth(&self) -> bool {
        self.config.need_auth
    }

    fn paginates_by_cursor(&self) -> bool {
        true
    }

    fn max_items_per_page(&self) -> Option<usize> {
        self.config.max_items_per_page
    }

    fn execute<'a>(
        &'a self,
        ctx: &'a SearchContext,
        query: &'a Query,
        page: &'a PageRequest,
    ) -> BoxFuture<'a, GatewayResult<RawPage>> {
        Box::pin(async move {
            let request = self.request(ctx, query, page)?;
            let response = send_json(ctx.http.as_ref(), &ctx.provider, Phase::Search, request).await?;
            Ok(RawPage {
                items: items_at(ctx, &response, "$.features")?,
                total: matched(&response),
                next_cursor: next_link(&response),
            })
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticStacConfig {
    /// Location of a GeoJSON `FeatureCollection` of STAC items.
    pub url: String,
    #[serde(default)]
    pub need_auth: bool,
    #[serde(default)]
    pub metadata_mapping: FieldMapping,
}

pub struct StaticStacSearch {
    config: StaticStacConfig,
    mapping: FieldMapping,
    items: OnceCell<Vec<Value>>,
}

impl StaticStacSearch {
    pub fn new(config: StaticStacConfig) -> GatewayResult<Self> {
        require_url("url", &config.url)?;
        let mapping = config.metadata_mapping.over(default_mapping());
        Ok(Self {
            config,
            mapping,
            items: OnceCell::new(),
        })
    }

    async fn load(&self, ctx: &SearchContext) -> GatewayResult<&Vec<Value>> {
        self.items
            .get_or_try_init(|| async {
                let request = ctx.credentials.apply(HttpRequest::get(self.config.url.clone()));
                let document =
                    send_json(ctx.http.as_ref(), &ctx.provider, Phase::Search, request).await?;
                let items = items_at(ctx, &document, "$.features")?;
                debug!(provider = %ctx.provider, count = items.len(), "Loaded static item collection");
                Ok::<_, GatewayError>(items)
            })
            .await
    }
}

/// Local filter applied to each static item.
fn item_matches(item: &Value, collection: Option<&str>, query: &Query) -> bool {
    if let (Some(wanted), Some(actual)) = (collection, item.get("collection").and_then(Value::as_str)) {
        if wanted != actual {
            return false;
        }
    }
    if let Some(area) = &query.geometry {
        let footprint = item
            .get("geometry")
            .and_then(Geometry::from_json)
            .or_else(|| item.get("bbox").and_then(Geometry::from_json));
        if let Some(footprint) = footprint {
            if !footprint.intersects_bbox(area) {
                return false;
            }
        }
    }
    let when = item
        .pointer("/properties/datetime")
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|d| d.with_timezone(&Utc));
    if let Some(when) = when {
        if query.start.is_some_and(|start| when < start) || query.end.is_some_and(|end| when > end) {
            return false;
        }
    }
    true
}

impl SearchPlugin for StaticStacSearch {
    fn protocol(&self) -> &'static str {
        "static_stac"
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
            let items = self.load(ctx).await?;
            let vars = TemplateContext::for_query(query, &ctx.binding);
            let wanted = vars
                .get("collection")
                .map(str::to_string)
                .or_else(|| ctx.binding.provider_product_type.clone());
            let matching: Vec<&Value> = items
                .iter()
                .filter(|item| item_matches(item, wanted.as_deref(), query))
                .filter(|item| {
                    query.extra.iter().all(|(key, value)| {
                        match item.get("properties").and_then(|p| p.get(key)) {
                            Some(found) => value_to_param(found) == value_to_param(value),
                            None => true,
                        }
                    })
                })
                .collect();
            Ok(RawPage {
                total: TotalCount::Exact(matching.len()),
                items: matching
                    .into_iter()
                    .skip(page.skip())
                    .take(page.items_per_page)
                    .cloned()
                    .collect(),
                next_cursor: None,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::tests::{MockHttpClient, MockReply};
    use crate::model::parse_datetime;
    use crate::registry::ProductBinding;
    use std::sync::Arc;

    const ENDPOINT: &str = "https://stac.example/v1/search";

    fn stac() -> StacSearch {
        StacSearch::new(serde_json::from_value(json!({"api_endpoint": ENDPOINT})).unwrap()).unwrap()
    }

    #[test]
    fn test_search_body() {
        let mock = Arc::new(MockHttpClient::new());
        let ctx = SearchContext::new("es", mock).with_binding(ProductBinding::new("sentinel-2-l1c"));
        let query = Query::new("S2_MSI_L1C")
            .with_geometry(Geometry::bbox(1.0, 43.0, 2.0, 44.0))
            .with_start(parse_datetime("2021-01-01").unwrap())
            .with_extra("eo:cloud_cover", 10);
        let body = stac().body(&ctx, &query, &PageRequest::first(20));
        assert_eq!(body["collections"], json!(["sentinel-2-l1c"]));
        assert_eq!(body["limit"], json!(20));
        assert_eq!(body["bbox"], json!([1.0, 43.0, 2.0, 44.0]));
        assert_eq!(body["datetime"], json!("2021-01-01T00:00:00Z/.."));
        assert_eq!(body["query"]["eo:cloud_cover"], json!({"eq": 10}));
    }

    #[tokio::test]
    async fn test_follows_next_link_until_absent() {
        let mock = Arc::new(MockHttpClient::new());
        mock.on(
            Method::Post,
            ENDPOINT,
            MockReply::json(
                200,
                json!({
                    "numberMatched": 3,
                    "features": [{"id": "a"}, {"id": "b"}],
                    "links": [{"rel": "next", "href": "https://stac.example/v1/search", "method": "POST", "body": {"token": "next:b"}, "merge": true}]
                }),
            ),
        );
        mock.on(
            Method::Post,
            ENDPOINT,
            MockReply::json(200, json!({"features": [{"id": "c"}], "links": []})),
        );
        let ctx = SearchContext::new("es", mock.clone()).with_binding(ProductBinding::new("c1"));
        let plugin = stac();
        let query = Query::new("X");

        let first = plugin.execute(&ctx, &query, &PageRequest::first(2)).await.unwrap();
        assert_eq!(first.total, TotalCount::Exact(3));
        let cursor = first.next_cursor.clone();
        assert!(cursor.is_some());

        let second = plugin
            .execute(&ctx, &query, &PageRequest::first(2).next(cursor))
            .await
            .unwrap();
        assert_eq!(second.items.len(), 1);
        assert!(second.next_cursor.is_none());

        let body = mock.calls()[1].body.clone().unwrap();
        assert_eq!(body["token"], json!("next:b"));
        assert_eq!(body["collections"], json!(["c1"]));
    }

    #[test]
    fn test_mapping_reads_assets_and_cloud_cover() {
        let item = json!({
            "id": "S2B_1",
            "collection": "sentinel-2-l1c",
            "geometry": {"type": "Polygon", "coordinates": [[[0, 0], [1, 0], [1, 1], [0, 0]]]},
            "properties": {"datetime": "2021-01-02T10:00:00Z", "eo:cloud_cover": 4.5},
            "assets": {"B01": {"href": "https://x/B01.jp2", "type": "image/jp2", "file:checksum": "1220ab"}}
        });
        let p = stac().mapping().to_product("es", "S2_MSI_L1C", &item).unwrap();
        assert_eq!(p.properties["cloudCover"], json!(4.5));
        assert_eq!(p.assets.get("B01").unwrap().checksum.as_deref(), Some("1220ab"));
        assert!(p.geometry.is_some());
    }

    #[tokio::test]
    async fn test_static_collection_is_filtered_locally_and_fetched_once() {
        let mock = Arc::new(MockHttpClient::new());
        mock.always(
            Method::Get,
            "https://static.example/items.json",
            MockReply::json(
                200,
                json!({"type": "FeatureCollection", "features": [
                    {"id": "in-1", "collection": "c1", "bbox": [0, 0, 1, 1], "properties": {"datetime": "2021-05-01T00:00:00Z"}},
                    {"id": "far", "collection": "c1", "bbox": [50, 50, 51, 51], "properties": {"datetime": "2021-05-01T00:00:00Z"}},
                    {"id": "old", "collection": "c1", "bbox": [0, 0, 1, 1], "properties": {"datetime": "2019-01-01T00:00:00Z"}},
                    {"id": "other", "collection": "c2", "bbox": [0, 0, 1, 1], "properties": {"datetime": "2021-05-01T00:00:00Z"}},
                    {"id": "in-2", "collection": "c1", "bbox": [0.5, 0.5, 2, 2], "properties": {"datetime": "2021-06-01T00:00:00Z"}}
                ]}),
            ),
        );
        let plugin = StaticStacSearch::new(
            serde_json::from_value(json!({"url": "https://static.example/items.json"})).unwrap(),
        )
        .unwrap();
        let ctx = SearchContext::new("local", mock.clone()).with_binding(ProductBinding::new("c1"));
        let query = Query::new("X")
            .with_geometry(Geometry::bbox(0.0, 0.0, 1.0, 1.0))
            .with_start(parse_datetime("2021-01-01").unwrap());

        let first = plugin.execute(&ctx, &query, &PageRequest::first(1)).await.unwrap();
        let second = plugin
            .execute(&ctx, &query, &PageRequest::first(1).next(None))
            .await
            .unwrap();
        assert_eq!(first.total, TotalCount::Exact(2));
        assert_eq!(first.items[0]["id"], json!("in-1"));
        assert_eq!(second.items[0]["id"], json!("in-2"));
        assert_eq!(mock.count(Method::Get, "https://static.example"), 1);
    }
}
