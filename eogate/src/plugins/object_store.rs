//! Search by listing an S3-compatible bucket.
//!
//! # URL Pattern
//!
//! ```text
//! GET {bucket_url}?list-type=2&prefix=<rendered prefix>&max-keys=20[&continuation-token=...]
//! ```
//!
//! Every listed object becomes one item: its id is the key's basename
//! without extension and its `href` is the object URL. Listing continues with
//! `NextContinuationToken` until the bucket says it is done.

use futures::future::BoxFuture;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::template::TemplateContext;
use super::{require_url, FieldMapping, PageRequest, RawPage, SearchContext, SearchPlugin};
use crate::error::{GatewayError, GatewayResult, Phase};
use crate::http::{send_checked, HttpRequest};
use crate::model::{Query, TotalCount};

/// S3 caps a single listing at 1000 keys.
const MAX_KEYS: usize = 1000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectStoreConfig {
    pub bucket_url: String,
    /// Key prefix template, e.g. `{providerProductType}/{start_year}/{start_month}/`.
    pub prefix: String,
    /// Only keys fully matching this pattern are reported.
    #[serde(default)]
    pub key_filter: Option<String>,
    #[serde(default)]
    pub need_auth: bool,
    #[serde(default)]
    pub metadata_mapping: FieldMapping,
}

/// One object of a ListObjectsV2 answer.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ListedObject {
    pub key: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub last_modified: Option<String>,
    #[serde(default, rename = "ETag")]
    pub etag: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListBucketResult {
    #[serde(default)]
    is_truncated: bool,
    #[serde(default)]
    next_continuation_token: Option<String>,
    #[serde(default)]
    contents: Vec<ListedObject>,
}

/// Parses a ListObjectsV2 document into objects and the continuation token.
pub fn parse_listing(xml: &str) -> Result<(Vec<ListedObject>, Option<String>), quick_xml::DeError> {
    let listing: ListBucketResult = quick_xml::de::from_str(xml)?;
    let objects = listing
        .contents
        .into_iter()
        .map(|mut o| {
            o.etag = o.etag.map(|e| e.trim_matches('"').to_string());
            o
        })
        .collect();
    let token = if listing.is_truncated {
        listing.next_continuation_token
    } else {
        None
    };
    Ok((objects, token))
}

fn default_mapping() -> FieldMapping {
    FieldMapping::from_pairs(&[
        ("id", "$.id"),
        ("key", "$.key"),
        ("size", "$.size"),
        ("publicationDate", "$.last_modified"),
        ("etag", "$.etag"),
        ("downloadLink", "$.href"),
    ])
}

pub struct ObjectStoreSearch {
    config: ObjectStoreConfig,
    key_filter: Option<Regex>,
    mapping: FieldMapping,
}

impl ObjectStoreSearch {
    pub fn new(config: ObjectStoreConfig) -> GatewayResult<Self> {
        require_url("bucket_url", &config.bucket_url)?;
        let key_filter = config
            .key_filter
            .as_deref()
            .map(|p| Regex::new(&format!("^(?:{})$", p)))
            .transpose()
            .map_err(|e| GatewayError::Configuration(format!("invalid key_filter: {}", e)))?;
        let mapping = config.metadata_mapping.over(default_mapping());
        Ok(Self {
            config,
            key_filter,
            mapping,
        })
    }

    fn item(&self, object: ListedObject) -> Value {
        let basename = object.key.rsplit('/').next().unwrap_or(&object.key);
        let id = basename.split('.').next().unwrap_or(basename).to_string();
        let href = format!("{}/{}", self.config.bucket_url.trim_end_matches('/'), object.key);
        json!({
            "id": id,
            "key": object.key,
            "size": object.size,
            "last_modified": object.last_modified,
            "etag": object.etag,
            "href": href,
        })
    }
}

impl SearchPlugin for ObjectStoreSearch {
    fn protocol(&self) -> &'static str {
        "object_store"
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
        Some(MAX_KEYS)
    }

    fn execute<'a>(
        &'a self,
        ctx: &'a SearchContext,
        query: &'a Query,
        page: &'a PageRequest,
    ) -> BoxFuture<'a, GatewayResult<RawPage>> {
        Box::pin(async move {
            let vars = TemplateContext::for_query(query, &ctx.binding);
            let prefix = vars.render(&self.config.prefix).ok_or_else(|| {
                ctx.error(format!(
                    "query does not provide every variable of prefix '{}'",
                    self.config.prefix
                ))
            })?;
            let mut request = HttpRequest::get(self.config.bucket_url.clone())
                .with_query("list-type", "2")
                .with_query("prefix", prefix)
                .with_query("max-keys", page.items_per_page.to_string());
            if let Some(token) = &page.cursor {
                request = request.with_query("continuation-token", token.clone());
            }
            let response = send_checked(
                ctx.http.as_ref(),
                &ctx.provider,
                Phase::Search,
                ctx.credentials.apply(request),
            )
            .await?;
            let (objects, next_cursor) = parse_listing(&response.text())
                .map_err(|e| ctx.error(format!("malformed bucket listing: {}", e)))?;
            let items = objects
                .into_iter()
                .filter(|o| !o.key.ends_with('/'))
                .filter(|o| self.key_filter.as_ref().map_or(true, |re| re.is_match(&o.key)))
                .map(|o| self.item(o))
                .collect();
            Ok(RawPage {
                items,
                total: TotalCount::Unknown,
                next_cursor,
            })
        })
    }
}
