//! Pre-computed discovery results published as a JSON document.
//!
//! ```json
//! {
//!   "earth_search": {
//!     "product_types": [
//!       {"id": "SENTINEL_2_L2A", "provider_product_type": "sentinel-2-l2a", "title": "..."}
//!     ]
//!   }
//! }
//! ```
//!
//! The document may live behind `http(s)://`, a `file://` URI or a plain
//! path. Any failure to read it is logged and reported as `None`; callers
//! degrade to live discovery.

use std::collections::BTreeMap;
use std::path::Path;

use serde_json::Value;
use tracing::{debug, warn};

use crate::http::{AsyncHttpClient, HttpRequest};
use crate::model::ProductType;
use crate::plugins::discovery::generic_id;
use crate::plugins::DiscoveredProductType;
use crate::registry::ProductBinding;

/// Provider name → product types listed for it.
pub type ExternalDocument = BTreeMap<String, Vec<DiscoveredProductType>>;

/// Reads and parses the document at `location`.
pub async fn load(location: &str, http: &dyn AsyncHttpClient) -> Option<ExternalDocument> {
    let text = match read(location, http).await {
        Ok(text) => text,
        Err(reason) => {
            warn!(location = %location, "Cannot read external product types: {}", reason);
            return None;
        }
    };
    match parse(&text) {
        Ok(doc) => {
            debug!(location = %location, providers = doc.len(), "Loaded external product types");
            Some(doc)
        }
        Err(reason) => {
            warn!(location = %location, "Invalid external product types document: {}", reason);
            None
        }
    }
}

async fn read(location: &str, http: &dyn AsyncHttpClient) -> Result<String, String> {
    if location.starts_with("http://") || location.starts_with("https://") {
        let response = http
            .send(HttpRequest::get(location))
            .await
            .map_err(|e| e.to_string())?;
        if !response.is_success() {
            return Err(format!("HTTP {}", response.status));
        }
        return Ok(response.text());
    }
    let path = location.strip_prefix("file://").unwrap_or(location);
    tokio::fs::read_to_string(Path::new(path))
        .await
        .map_err(|e| e.to_string())
}

/// Parses the document text.
pub fn parse(text: &str) -> Result<ExternalDocument, String> {
    let root: BTreeMap<String, Value> = serde_json::from_str(text).map_err(|e| e.to_string())?;
    let mut doc = ExternalDocument::new();
    for (provider, section) in root {
        let entries = section
            .get("product_types")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let mut types = Vec::with_capacity(entries.len());
        for entry in entries {
            let native = ["provider_product_type", "productType"]
                .iter()
                .find_map(|k| entry.get(*k).and_then(Value::as_str))
                .map(str::to_string);
            let id = entry
                .get("id")
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| native.as_deref().map(generic_id));
            let (Some(id), Value::Object(mut fields)) = (id, entry) else {
                continue;
            };
            fields.insert("id".to_string(), Value::String(id.clone()));
            let product_type: ProductType = serde_json::from_value(Value::Object(fields))
                .map_err(|e| format!("{} / {}: {}", provider, id, e))?;
            types.push(DiscoveredProductType {
                binding: ProductBinding::new(native.unwrap_or_else(|| id.clone())),
                product_type,
            });
        }
        doc.insert(provider, types);
    }
    Ok(doc)
}
