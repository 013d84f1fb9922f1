//! Declarative mapping from provider-native items to [`Product`]s.
//!
//! A mapping associates each normalized key with either a JSON path into the
//! provider item (`$.properties.datetime`, `$.links[0].href`) or a literal.
//! Literals may reference other normalized properties with `{name}`
//! placeholders, which is how download links are built from identifiers:
//!
//! ```text
//! "id":           "$.Name",
//! "uid":          "$.Id",
//! "downloadLink": "https://catalogue.example/odata/v1/Products({uid})/$value"
//! ```
//!
//! Three keys are structural rather than properties: `id`, `geometry` and
//! `assets`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::template::{placeholders, render_with, value_to_param};
use crate::error::{GatewayError, GatewayResult, Phase};
use crate::model::{Asset, Geometry, Product};

const ID_KEY: &str = "id";
const GEOMETRY_KEY: &str = "geometry";
const ASSETS_KEY: &str = "assets";

/// Resolves a `$.a.b[0].c` path inside a JSON value.
///
/// `$` alone is the value itself. Segments may contain `:` (as in
/// `eo:cloud_cover`).
pub fn json_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let rest = path.strip_prefix('$')?;
    let mut current = value;
    for segment in rest.split('.').filter(|s| !s.is_empty()) {
        let (name, indexes) = match segment.find('[') {
            Some(pos) => (&segment[..pos], &segment[pos..]),
            None => (segment, ""),
        };
        if !name.is_empty() {
            current = current.get(name)?;
        }
        for index in indexes.split('[').filter(|s| !s.is_empty()) {
            let index: usize = index.trim_end_matches(']').parse().ok()?;
            current = current.get(index)?;
        }
    }
    Some(current)
}

/// How one normalized key is obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappingRule {
    Path(String),
    Literal(String),
}

impl MappingRule {
    fn parse(text: &str) -> Self {
        if text.starts_with("$.") || text == "$" {
            Self::Path(text.to_string())
        } else {
            Self::Literal(text.to_string())
        }
    }

    fn as_str(&self) -> &str {
        match self {
            Self::Path(p) | Self::Literal(p) => p,
        }
    }
}

impl Serialize for MappingRule {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MappingRule {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Ok(Self::parse(&text))
    }
}

/// Normalized key → rule table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldMapping(BTreeMap<String, MappingRule>);

impl FieldMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a mapping from `(key, rule)` pairs.
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        Self(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), MappingRule::parse(v)))
                .collect(),
        )
    }

    pub fn insert(&mut self, key: impl Into<String>, rule: &str) {
        self.0.insert(key.into(), MappingRule::parse(rule));
    }

    pub fn get(&self, key: &str) -> Option<&MappingRule> {
        self.0.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns `defaults` overridden entry by entry with `self`.
    pub fn over(&self, defaults: FieldMapping) -> FieldMapping {
        let mut merged = defaults.0;
        merged.extend(self.0.clone());
        FieldMapping(merged)
    }

    /// Normalizes one provider item.
    ///
    /// Fails when the item has no identifier. Paths that resolve to nothing
    /// (or to `null`) simply leave the property out.
    pub fn to_product(&self, provider: &str, product_type: &str, item: &Value) -> GatewayResult<Product> {
        let id = self
            .resolve_structural(ID_KEY, item)
            .and_then(value_to_param)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                GatewayError::provider(provider, Phase::Search, "result item has no identifier")
            })?;
        let mut product = Product::new(id.clone(), provider, product_type);

        product.geometry = self
            .resolve_structural(GEOMETRY_KEY, item)
            .and_then(Geometry::from_json);

        if let Some(Value::Object(assets)) = self.resolve_structural(ASSETS_KEY, item) {
            for (key, raw) in assets {
                if let Ok(asset) = serde_json::from_value::<Asset>(read_asset(raw)) {
                    product.assets.insert(key.clone(), asset);
                }
            }
        }

        let mut templated = Vec::new();
        for (key, rule) in &self.0 {
            if [ID_KEY, GEOMETRY_KEY, ASSETS_KEY].contains(&key.as_str()) {
                continue;
            }
            match rule {
                MappingRule::Path(path) => {
                    if let Some(value) = json_path(item, path).filter(|v| !v.is_null()) {
                        product.properties.insert(key.clone(), value.clone());
                    }
                }
                MappingRule::Literal(text) if placeholders(text).is_empty() => {
                    product
                        .properties
                        .insert(key.clone(), Value::String(text.clone()));
                }
                MappingRule::Literal(text) => templated.push((key, text)),
            }
        }

        // Templates see first-pass properties and the id.
        let rendered: Vec<(String, String)> = templated
            .into_iter()
            .filter_map(|(key, text)| {
                render_with(text, |name| {
                    if name == ID_KEY {
                        return Some(id.clone());
                    }
                    product.properties.get(name).and_then(value_to_param)
                })
                .map(|v| (key.clone(), v))
            })
            .collect();
        for (key, value) in rendered {
            product.properties.insert(key, Value::String(value));
        }

        product
            .properties
            .insert("productType".to_string(), Value::String(product_type.to_string()));
        Ok(product)
    }

    fn resolve_structural<'a>(&self, key: &str, item: &'a Value) -> Option<&'a Value> {
        match self.0.get(key) {
            Some(MappingRule::Path(path)) => json_path(item, path),
            Some(MappingRule::Literal(_)) => None,
            None => item.get(key),
        }
        .filter(|v| !v.is_null())
    }
}

/// Accepts STAC-style asset objects, normalizing `file:checksum`.
fn read_asset(raw: &Value) -> Value {
    let mut asset = raw.clone();
    if let Value::Object(map) = &mut asset {
        if !map.contains_key("checksum") {
            if let Some(sum) = map.get("file:checksum").cloned() {
                map.insert("checksum".to_string(), sum);
            }
        }
    }
    asset
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item() -> Value {
        json!({
            "Id": "8a1c-44",
            "Name": "S1A_IW_GRDH_1SDV_20210101",
            "ContentDate": {"Start": "2021-01-01T05:00:00Z"},
            "Attributes": [{"Name": "orbit", "Value": 42}],
            "Footprint": {"type": "Polygon", "coordinates": [[[0, 0], [1, 0], [1, 1], [0, 0]]]},
            "empty": null
        })
    }

    #[test]
    fn test_json_path() {
        let v = item();
        assert_eq!(json_path(&v, "$.Name").and_then(Value::as_str), Some("S1A_IW_GRDH_1SDV_20210101"));
        assert_eq!(json_path(&v, "$.Attributes[0].Value"), Some(&json!(42)));
        assert_eq!(json_path(&v, "$.ContentDate.Start").and_then(Value::as_str), Some("2021-01-01T05:00:00Z"));
        assert!(json_path(&v, "$.Attributes[3].Value").is_none());
        assert!(json_path(&v, "Name").is_none());
        assert_eq!(json_path(&v, "$"), Some(&v));
    }

    #[test]
    fn test_to_product_paths_literals_and_templates() {
        let mapping = FieldMapping::from_pairs(&[
            ("id", "$.Name"),
            ("uid", "$.Id"),
            ("geometry", "$.Footprint"),
            ("startTimeFromAscendingNode", "$.ContentDate.Start"),
            ("orbitNumber", "$.Attributes[0].Value"),
            ("platform", "SENTINEL1"),
            ("downloadLink", "https://dl.example/Products({uid})/$value"),
            ("missing", "$.empty"),
            ("unresolvable", "https://x/{nope}"),
        ]);
        let p = mapping.to_product("cop", "S1_SAR_GRD", &item()).unwrap();
        assert_eq!(p.id, "S1A_IW_GRDH_1SDV_20210101");
        assert_eq!(p.properties["orbitNumber"], json!(42));
        assert_eq!(p.properties["platform"], json!("SENTINEL1"));
        assert_eq!(
            p.download_link().as_deref(),
            Some("https://dl.example/Products(8a1c-44)/$value")
        );
        assert!(!p.properties.contains_key("missing"));
        assert!(!p.properties.contains_key("unresolvable"));
        assert_eq!(p.properties["productType"], json!("S1_SAR_GRD"));
        assert_eq!(p.geometry.unwrap().bounds(), (0.0, 0.0, 1.0, 1.0));
    }

    #[test]
    fn test_missing_id_is_provider_error() {
        let mapping = FieldMapping::from_pairs(&[("id", "$.nothing")]);
        let err = mapping.to_product("cop", "X", &item()).unwrap_err();
        assert!(matches!(err, GatewayError::Provider { .. }));
    }

    #[test]
    fn test_assets_are_read_with_checksum_alias() {
        let mapping = FieldMapping::new();
        let stac = json!({
            "id": "item-1",
            "assets": {
                "B04": {"href": "s3://b/B04.tif", "type": "image/tiff", "file:checksum": "abcd"},
                "info": {"title": "no href"}
            }
        });
        let p = mapping.to_product("es", "S2_MSI_L2A", &stac).unwrap();
        assert_eq!(p.assets.len(), 2);
        assert_eq!(p.assets.get("B04").unwrap().checksum.as_deref(), Some("abcd"));
        assert_eq!(p.assets.downloadable().count(), 1);
    }

    #[test]
    fn test_over_prefers_overrides() {
        let defaults = FieldMapping::from_pairs(&[("id", "$.id"), ("title", "$.title")]);
        let overrides = FieldMapping::from_pairs(&[("id", "$.Name")]);
        let merged = overrides.over(defaults);
        assert_eq!(merged.get("id"), Some(&MappingRule::Path("$.Name".to_string())));
        assert!(merged.get("title").is_some());
    }
}
