//! End-to-end search through a gateway with scripted providers.

mod common;

use common::{gateway, provider, stac_item, Reply, ScriptedHttp};
use eogate::http::Method;
use eogate::model::{Geometry, TotalCount};
use eogate::registry::RegistrationStatus;
use eogate::{GatewayError, Query};
use serde_json::json;
use tokio_util::sync::CancellationToken;

const EARTH: &str = "https://earth.example/search";
const RESTO: &str = "https://resto.example/search.json";
const BROKEN: &str = "https://broken.example/search";

fn earth(priority: i64) -> eogate::registry::ProviderConfig {
    provider(json!({
        "name": "earth",
        "priority": priority,
        "products": {"S2_MSI_L1C": {"provider_product_type": "sentinel-2-l1c"}},
        "search": {"type": "stac", "api_endpoint": EARTH},
        "download": {"type": "http"}
    }))
}

fn resto(priority: i64) -> eogate::registry::ProviderConfig {
    provider(json!({
        "name": "resto",
        "priority": priority,
        "products": {"S2_MSI_L1C": {"provider_product_type": "S2MSI1C"}},
        "search": {"type": "query_string", "api_endpoint": RESTO},
        "download": {"type": "http"}
    }))
}

fn broken(priority: i64) -> eogate::registry::ProviderConfig {
    provider(json!({
        "name": "broken",
        "priority": priority,
        "products": {"S2_MSI_L1C": {}},
        "search": {"type": "stac", "api_endpoint": BROKEN}
    }))
}

fn stac_page(ids: &[&str], next: Option<&str>) -> Reply {
    let mut page = json!({
        "type": "FeatureCollection",
        "features": ids.iter().map(|id| stac_item(id)).collect::<Vec<_>>(),
        "numberMatched": 3,
        "links": []
    });
    if let Some(token) = next {
        page["links"] = json!([{
            "rel": "next",
            "href": format!("{}?next={}", EARTH, token),
            "method": "POST",
            "body": {"next": token}
        }]);
    }
    Reply::json(200, page)
}

fn resto_page(ids: &[&str]) -> Reply {
    let features: Vec<_> = ids
        .iter()
        .map(|id| {
            json!({
                "id": id,
                "properties": {
                    "title": id,
                    "startDate": "2021-06-02T10:00:00Z",
                    "services": {"download": {"url": format!("https://resto.example/dl/{}", id)}}
                }
            })
        })
        .collect();
    Reply::json(200, json!({"features": features}))
}

fn s2_query() -> Query {
    Query::new("S2_MSI_L1C").with_geometry(Geometry::bbox(1.0, 43.0, 2.0, 44.0))
}

#[tokio::test]
async fn test_cursor_pages_are_followed_in_order() {
    let http = ScriptedHttp::new();
    http.once(Method::Post, EARTH, stac_page(&["A", "B"], Some("p2")));
    http.once(Method::Post, EARTH, stac_page(&["C"], None));
    let gateway = gateway(http.clone(), vec![earth(1)]);

    let result = gateway
        .search(&s2_query().with_items_per_page(2), &CancellationToken::new())
        .await
        .unwrap();
    let ids: Vec<_> = result.products.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, vec!["A", "B", "C"]);
    assert_eq!(result.total, TotalCount::Exact(3));
    assert!(result.next_page.is_none());

    let calls = http.calls();
    assert_eq!(calls.len(), 2);
    let first = calls[0].body.as_ref().unwrap();
    assert_eq!(first["collections"], json!(["sentinel-2-l1c"]));
    assert_eq!(first["bbox"], json!([1.0, 43.0, 2.0, 44.0]));
    assert_eq!(calls[1].url, format!("{}?next=p2", EARTH));
    assert_eq!(calls[1].body, Some(json!({"next": "p2"})));
}

#[tokio::test]
async fn test_truncated_search_resumes_from_token() {
    let http = ScriptedHttp::new();
    http.once(Method::Post, EARTH, stac_page(&["A", "B"], Some("p2")));
    http.once(Method::Post, EARTH, stac_page(&["C"], None));
    let gateway = gateway(http.clone(), vec![earth(1)]);
    let cancel = CancellationToken::new();
    let query = s2_query().with_items_per_page(2).with_max_items(2);

    let first = gateway.search(&query, &cancel).await.unwrap();
    assert_eq!(first.len(), 2);
    let token = first.next_page.expect("truncated result carries a token");
    assert_eq!(http.calls().len(), 1);

    let rest = gateway
        .search(&query.clone().with_page_token(token), &cancel)
        .await
        .unwrap();
    let ids: Vec<_> = rest.products.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, vec!["C"]);
    assert!(rest.next_page.is_none());
    assert_eq!(http.calls()[1].url, format!("{}?next=p2", EARTH));
}

#[tokio::test]
async fn test_priority_and_preferred_provider() {
    let http = ScriptedHttp::new();
    http.always(Method::Post, EARTH, stac_page(&["A"], None));
    http.always(Method::Get, RESTO, resto_page(&["R1"]));
    let gateway = gateway(http.clone(), vec![earth(1), resto(2)]);
    let cancel = CancellationToken::new();

    let result = gateway.search(&s2_query(), &cancel).await.unwrap();
    assert_eq!(result.products[0].provider, "earth");

    gateway.set_preferred_provider("resto").unwrap();
    let result = gateway.search(&s2_query(), &cancel).await.unwrap();
    assert_eq!(result.products[0].provider, "resto");
    assert_eq!(
        result.products[0].download_link().as_deref(),
        Some("https://resto.example/dl/R1")
    );
    assert_eq!(http.calls()[1].query_param("productType"), Some("S2MSI1C"));
    assert_eq!(gateway.available_providers(Some("S2_MSI_L1C")), vec!["resto", "earth"]);
}

#[tokio::test]
async fn test_merge_all_keeps_partial_results() {
    let http = ScriptedHttp::new();
    http.always(Method::Post, EARTH, stac_page(&["A", "B"], None));
    http.always(Method::Get, RESTO, resto_page(&["R1"]));
    http.always(Method::Post, BROKEN, Reply::json(500, json!({"error": "down"})));
    let gateway = gateway(http, vec![broken(3), resto(2), earth(1)]);

    let merged = gateway
        .search_all(&s2_query(), &CancellationToken::new())
        .await
        .unwrap();
    let providers: Vec<_> = merged.products.iter().map(|p| p.provider.as_str()).collect();
    assert_eq!(providers, vec!["earth", "earth", "resto"]);
    assert_eq!(merged.outcomes.len(), 2);
    assert_eq!(merged.failures.len(), 1);
    assert_eq!(merged.failures[0].provider, "broken");
    assert!(!merged.is_complete());
}

#[tokio::test]
async fn test_explicit_provider_errors() {
    let http = ScriptedHttp::new();
    let gateway = gateway(http.clone(), vec![earth(1)]);
    let cancel = CancellationToken::new();

    let unknown = gateway.search(&s2_query().with_provider("nowhere"), &cancel).await;
    assert!(matches!(unknown, Err(GatewayError::UnsupportedProvider(_))));

    let unoffered = gateway.search(&Query::new("ERA5_SL"), &cancel).await;
    assert!(matches!(unoffered, Err(GatewayError::UnsupportedProductType(_))));
    assert!(http.calls().is_empty());
}

#[tokio::test]
async fn test_provider_without_credentials_is_pruned() {
    let http = ScriptedHttp::new();
    let gateway = gateway(http, vec![earth(1)]);
    let status = gateway
        .register_provider(provider(json!({
            "name": "locked",
            "products": {"S2_MSI_L1C": {}},
            "search": {"type": "stac", "api_endpoint": "https://locked.example/search", "need_auth": true}
        })))
        .unwrap();
    assert!(matches!(status, RegistrationStatus::Pruned { .. }));
    assert_eq!(gateway.available_providers(None), vec!["earth"]);
    assert_eq!(gateway.registry().pruned()[0].0, "locked");
}
