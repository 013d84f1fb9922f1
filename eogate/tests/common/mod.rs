//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use eogate::http::{AsyncHttpClient, HttpError, HttpRequest, HttpResponse, HttpStream, Method};
use eogate::registry::ProviderConfig;
use eogate::{Gateway, GatewayBuilder};
use futures::future::BoxFuture;
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::Value;

#[derive(Clone)]
pub struct Reply {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl Reply {
    pub fn json(status: u16, value: Value) -> Self {
        Self {
            status,
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: Bytes::from(value.to_string()),
        }
    }

    pub fn bytes(status: u16, body: &'static [u8]) -> Self {
        Self {
            status,
            headers: vec![("content-length".to_string(), body.len().to_string())],
            body: Bytes::from_static(body),
        }
    }
}

struct Route {
    method: Method,
    prefix: String,
    queued: VecDeque<Reply>,
    sticky: Option<Reply>,
}

/// Scripted HTTP client: routes by method and longest URL prefix.
///
/// Queued replies are served once, then the sticky reply; unknown routes
/// answer 404.
#[derive(Default)]
pub struct ScriptedHttp {
    routes: Mutex<Vec<Route>>,
    calls: Mutex<Vec<HttpRequest>>,
}

impl ScriptedHttp {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn once(&self, method: Method, prefix: &str, reply: Reply) {
        self.route(method, prefix, |r| r.queued.push_back(reply));
    }

    pub fn always(&self, method: Method, prefix: &str, reply: Reply) {
        self.route(method, prefix, |r| r.sticky = Some(reply));
    }

    fn route(&self, method: Method, prefix: &str, edit: impl FnOnce(&mut Route)) {
        let mut routes = self.routes.lock();
        if let Some(route) = routes
            .iter_mut()
            .find(|r| r.method == method && r.prefix == prefix)
        {
            edit(route);
            return;
        }
        let mut route = Route {
            method,
            prefix: prefix.to_string(),
            queued: VecDeque::new(),
            sticky: None,
        };
        edit(&mut route);
        routes.push(route);
    }

    pub fn calls(&self) -> Vec<HttpRequest> {
        self.calls.lock().clone()
    }

    pub fn count(&self, method: Method, prefix: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.method == method && c.url.starts_with(prefix))
            .count()
    }

    fn reply(&self, request: &HttpRequest) -> Reply {
        self.calls.lock().push(request.clone());
        let mut routes = self.routes.lock();
        routes
            .iter_mut()
            .filter(|r| r.method == request.method && request.url.starts_with(&r.prefix))
            .max_by_key(|r| r.prefix.len())
            .and_then(|r| r.queued.pop_front().or_else(|| r.sticky.clone()))
            .unwrap_or_else(|| Reply::bytes(404, b"no route"))
    }
}

impl AsyncHttpClient for ScriptedHttp {
    fn send(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse, HttpError>> {
        let reply = self.reply(&request);
        Box::pin(async move {
            Ok(HttpResponse {
                status: reply.status,
                headers: reply.headers,
                body: reply.body,
            })
        })
    }

    fn open(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpStream, HttpError>> {
        let reply = self.reply(&request);
        Box::pin(async move {
            let chunks: Vec<Result<Bytes, HttpError>> = reply
                .body
                .chunks(3)
                .map(|c| Ok(Bytes::copy_from_slice(c)))
                .collect();
            Ok(HttpStream {
                status: reply.status,
                headers: reply.headers,
                body: futures::stream::iter(chunks).boxed(),
            })
        })
    }
}

pub fn provider(value: Value) -> ProviderConfig {
    serde_json::from_value(value).expect("valid provider configuration")
}

pub fn gateway(http: Arc<ScriptedHttp>, providers: Vec<ProviderConfig>) -> Gateway {
    GatewayBuilder::new()
        .with_http_client(http)
        .with_providers(providers)
        .build()
        .expect("gateway builds")
}

/// A STAC item with a `download` asset.
pub fn stac_item(id: &str) -> Value {
    serde_json::json!({
        "type": "Feature",
        "id": id,
        "collection": "sentinel-2-l1c",
        "geometry": {"type": "Polygon", "coordinates": [[[1.0, 43.0], [2.0, 43.0], [2.0, 44.0], [1.0, 44.0], [1.0, 43.0]]]},
        "properties": {"datetime": "2021-06-01T10:00:00Z", "platform": "sentinel-2a"},
        "assets": {"download": {"href": format!("https://files.example/{}.zip", id)}}
    })
}
