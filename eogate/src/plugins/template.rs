//! `{name}` placeholder rendering for request parameters and bodies.
//!
//! Provider configurations describe requests as templates such as
//! `"{start}/{end}"` or `"Collection/Name eq '{providerProductType}'"`. A
//! template whose placeholders cannot all be resolved is dropped from the
//! request rather than sent half-filled.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use chrono::{DateTime, Datelike, SecondsFormat, Utc};
use regex::Regex;
use serde_json::{Map, Value};

use super::PageRequest;
use crate::model::Query;
use crate::registry::ProductBinding;

fn placeholder_regex() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\{([A-Za-z_][A-Za-z0-9_.:\-]*)\}").expect("placeholder pattern is valid")
    })
}

/// Names of the placeholders in `template`, in order of appearance.
pub fn placeholders(template: &str) -> Vec<String> {
    placeholder_regex()
        .captures_iter(template)
        .map(|c| c[1].to_string())
        .collect()
}

/// Renders `template`, or `None` if any placeholder is unresolved.
pub fn render_with<F>(template: &str, lookup: F) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(template.len());
    let mut last = 0;
    for caps in placeholder_regex().captures_iter(template) {
        let whole = caps.get(0)?;
        out.push_str(&template[last..whole.start()]);
        out.push_str(&lookup(&caps[1])?);
        last = whole.end();
    }
    out.push_str(&template[last..]);
    Some(out)
}

/// Stringifies a JSON value for URL parameters (strings are not quoted).
pub fn value_to_param(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Variables available to request templates.
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    vars: BTreeMap<String, String>,
}

impl TemplateContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the variables for one page of a search.
    pub fn for_search(query: &Query, binding: &ProductBinding, page: &PageRequest) -> Self {
        let mut ctx = Self::for_query(query, binding);
        ctx.set("items_per_page", page.items_per_page.to_string());
        ctx.set("page", page.page.to_string());
        ctx.set("skip", page.skip().to_string());
        ctx
    }

    /// Builds the variables describing a query, without paging state.
    pub fn for_query(query: &Query, binding: &ProductBinding) -> Self {
        let mut ctx = Self::new();
        for (key, value) in &binding.extra {
            if let Some(v) = value_to_param(value) {
                ctx.set(key, v);
            }
        }
        ctx.set("productType", query.product_type.clone());
        ctx.set(
            "providerProductType",
            binding
                .provider_product_type
                .clone()
                .unwrap_or_else(|| query.product_type.clone()),
        );
        if let Some(start) = &query.start {
            ctx.set("start", format_datetime(start));
            ctx.set("start_date", start.format("%Y-%m-%d").to_string());
            ctx.set("start_year", start.year().to_string());
            ctx.set("start_month", format!("{:02}", start.month()));
            ctx.set("start_day", format!("{:02}", start.day()));
        }
        if let Some(end) = &query.end {
            ctx.set("end", format_datetime(end));
            ctx.set("end_date", end.format("%Y-%m-%d").to_string());
        }
        if let Some(geometry) = &query.geometry {
            let (min_x, min_y, max_x, max_y) = geometry.bounds();
            ctx.set("bbox", geometry.bbox_string());
            ctx.set("minx", min_x.to_string());
            ctx.set("miny", min_y.to_string());
            ctx.set("maxx", max_x.to_string());
            ctx.set("maxy", max_y.to_string());
            ctx.set("geometry_wkt", geometry.to_wkt());
            ctx.set("geometry_geojson", geometry.to_geojson().to_string());
        }
        for (key, value) in &query.extra {
            if let Some(v) = value_to_param(value) {
                ctx.set(key, v);
            }
        }
        ctx
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn render(&self, template: &str) -> Option<String> {
        render_with(template, |name| self.vars.get(name).cloned())
    }

    /// Renders each template; unresolved ones are omitted.
    pub fn render_params(&self, templates: &BTreeMap<String, String>) -> Vec<(String, String)> {
        templates
            .iter()
            .filter_map(|(key, template)| self.render(template).map(|v| (key.clone(), v)))
            .collect()
    }

    /// Renders templates into a JSON object.
    ///
    /// Rendered text that parses as JSON is embedded as JSON (numbers, arrays,
    /// objects); anything else becomes a string. Dotted keys nest:
    /// `"query.cloudCover"` becomes `{"query": {"cloudCover": ...}}`.
    pub fn render_json(&self, templates: &BTreeMap<String, String>) -> Value {
        let mut root = Map::new();
        for (key, template) in templates {
            let Some(rendered) = self.render(template) else {
                continue;
            };
            let value = serde_json::from_str::<Value>(&rendered).unwrap_or(Value::String(rendered));
            insert_dotted(&mut root, key, value);
        }
        Value::Object(root)
    }
}

/// Query extras that no template consumes, to be passed through as is.
pub fn passthrough_extras<'a>(
    query: &'a Query,
    templates: &BTreeMap<String, String>,
) -> Vec<(&'a String, &'a Value)> {
    let used: Vec<String> = templates
        .iter()
        .flat_map(|(key, template)| {
            let mut names = placeholders(template);
            names.push(key.clone());
            names
        })
        .collect();
    query
        .extra
        .iter()
        .filter(|(key, _)| !used.contains(key))
        .collect()
}

/// Inserts `value` at a dotted path, creating intermediate objects.
pub fn insert_dotted(root: &mut Map<String, Value>, key: &str, value: Value) {
    match key.split_once('.') {
        None => {
            root.insert(key.to_string(), value);
        }
        Some((head, rest)) => {
            let child = root
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !child.is_object() {
                *child = Value::Object(Map::new());
            }
            if let Value::Object(map) = child {
                insert_dotted(map, rest, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{parse_datetime, Geometry};
    use serde_json::json;

    fn query() -> Query {
        Query::new("S2_MSI_L1C")
            .with_geometry(Geometry::bbox(1.0, 43.0, 2.0, 44.0))
            .with_start(parse_datetime("2021-03-04").unwrap())
            .with_extra("cloudCover", 20)
    }

    fn binding() -> ProductBinding {
        ProductBinding::new("S2MSI1C").with_extra("collection", "SENTINEL-2")
    }

    #[test]
    fn test_placeholders_and_render() {
        assert_eq!(placeholders("{a}/{b.c}"), vec!["a", "b.c"]);
        let rendered = render_with("x={a}", |n| (n == "a").then(|| "1".to_string()));
        assert_eq!(rendered.as_deref(), Some("x=1"));
        assert!(render_with("x={missing}", |_| None).is_none());
        // JSON braces are not placeholders
        assert_eq!(
            render_with(r#"{"a": 1}"#, |_| None).as_deref(),
            Some(r#"{"a": 1}"#)
        );
    }

    #[test]
    fn test_search_context_variables() {
        let ctx = TemplateContext::for_search(&query(), &binding(), &PageRequest::first(10).next(None));
        assert_eq!(ctx.get("providerProductType"), Some("S2MSI1C"));
        assert_eq!(ctx.get("collection"), Some("SENTINEL-2"));
        assert_eq!(ctx.get("start"), Some("2021-03-04T00:00:00Z"));
        assert_eq!(ctx.get("start_month"), Some("03"));
        assert_eq!(ctx.get("bbox"), Some("1,43,2,44"));
        assert_eq!(ctx.get("page"), Some("2"));
        assert_eq!(ctx.get("skip"), Some("10"));
        assert_eq!(ctx.get("cloudCover"), Some("20"));
        assert!(ctx.get("end").is_none());
    }

    #[test]
    fn test_render_params_omits_unresolved() {
        let ctx = TemplateContext::for_query(&query(), &binding());
        let templates = BTreeMap::from([
            ("startDate".to_string(), "{start}".to_string()),
            ("completionDate".to_string(), "{end}".to_string()),
            ("productType".to_string(), "{providerProductType}".to_string()),
        ]);
        let params = ctx.render_params(&templates);
        assert_eq!(params.len(), 2);
        assert!(params.iter().all(|(k, _)| k != "completionDate"));
    }

    #[test]
    fn test_passthrough_extras_skips_consumed_keys() {
        let q = query().with_extra("sensorMode", "IW");
        let templates = BTreeMap::from([("cloud".to_string(), "[0,{cloudCover}]".to_string())]);
        let extras: Vec<&str> = passthrough_extras(&q, &templates)
            .into_iter()
            .map(|(k, _)| k.as_str())
            .collect();
        assert_eq!(extras, vec!["sensorMode"]);
    }

    #[test]
    fn test_render_json_nests_and_parses() {
        let ctx = TemplateContext::for_query(&query(), &binding());
        let templates = BTreeMap::from([
            ("query.cloudCover".to_string(), "{cloudCover}".to_string()),
            ("query.type".to_string(), "{providerProductType}".to_string()),
            ("bbox".to_string(), "[{bbox}]".to_string()),
        ]);
        let body = ctx.render_json(&templates);
        assert_eq!(
            body,
            json!({
                "query": {"cloudCover": 20, "type": "S2MSI1C"},
                "bbox": [1, 43, 2, 44]
            })
        );
    }
}
