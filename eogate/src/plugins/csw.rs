//! OGC Catalogue Service for the Web, `GetRecords` in KVP encoding.
//!
//! # URL Pattern
//!
//! ```text
//! GET {api_endpoint}?service=CSW&version=2.0.2&request=GetRecords&typeNames=csw:Record
//!     &resultType=results&elementSetName=full&outputFormat=application/json
//!     &startPosition=1&maxRecords=20&constraintLanguage=CQL_TEXT
//!     &constraint=dc:type='S2MSI1C' AND dct:modified >= '2021-01-01T00:00:00Z'
//! ```

use std::collections::BTreeMap;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

use super::template::TemplateContext;
use super::{
    items_at, json_path, require_url, value_as_count, FieldMapping, PageRequest, RawPage,
    SearchContext, SearchPlugin,
};
use crate::error::{GatewayResult, Phase};
use crate::http::{send_json, HttpRequest};
use crate::model::{Query, TotalCount};

const CSW_VERSION: &str = "2.0.2";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CswConfig {
    pub api_endpoint: String,
    #[serde(default = "default_type_names")]
    pub type_names: String,
    /// Clause name → CQL clause template, joined with `AND`.
    #[serde(default)]
    pub constraints: BTreeMap<String, String>,
    #[serde(default = "default_records_path")]
    pub records_path: String,
    #[serde(default = "default_matched_path")]
    pub matched_path: String,
    #[serde(default)]
    pub need_auth: bool,
    #[serde(default)]
    pub metadata_mapping: FieldMapping,
}

fn default_type_names() -> String {
    "csw:Record".to_string()
}

fn default_records_path() -> String {
    "$.records".to_string()
}

fn default_matched_path() -> String {
    "$.numberOfRecordsMatched".to_string()
}

fn default_constraints() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("1_type".to_string(), "dc:type = '{providerProductType}'".to_string()),
        ("2_start".to_string(), "dct:modified >= '{start}'".to_string()),
        ("3_end".to_string(), "dct:modified <= '{end}'".to_string()),
        (
            "4_bbox".to_string(),
            "BBOX(ows:BoundingBox, {minx}, {miny}, {maxx}, {maxy})".to_string(),
        ),
    ])
}

fn default_mapping() -> FieldMapping {
    FieldMapping::from_pairs(&[
        ("id", "$.identifier"),
        ("geometry", "$.bbox"),
        ("title", "$.title"),
        ("abstract", "$.abstract"),
        ("publicationDate", "$.modified"),
        ("downloadLink", "$.references[0].url"),
    ])
}

pub struct CswSearch {
    config: CswConfig,
    constraints: BTreeMap<String, String>,
    mapping: FieldMapping,
}

impl CswSearch {
    pub fn new(config: CswConfig) -> GatewayResult<Self> {
        require_url("api_endpoint", &config.api_endpoint)?;
        let constraints = if config.constraints.is_empty() {
            default_constraints()
        } else {
            config.constraints.clone()
        };
        let mapping = config.metadata_mapping.over(default_mapping());
        Ok(Self {
            config,
            constraints,
            mapping,
        })
    }

    fn request(&self, ctx: &SearchContext, query: &Query, page: &PageRequest) -> HttpRequest {
        let vars = TemplateContext::for_search(query, &ctx.binding, page);
        let mut request = HttpRequest::get(self.config.api_endpoint.clone())
            .with_query("service", "CSW")
            .with_query("version", CSW_VERSION)
            .with_query("request", "GetRecords")
            .with_query("typeNames", self.config.type_names.clone())
            .with_query("resultType", "results")
            .with_query("elementSetName", "full")
            .with_query("outputFormat", "application/json")
            .with_query("startPosition", (page.skip() + 1).to_string())
            .with_query("maxRecords", page.items_per_page.to_string());
        let clauses: Vec<String> = vars
            .render_params(&self.constraints)
            .into_iter()
            .map(|(_, clause)| clause)
            .collect();
        if !clauses.is_empty() {
            request = request
                .with_query("constraintLanguage", "CQL_TEXT")
                .with_query("constraint", clauses.join(" AND "));
        }
        ctx.credentials.apply(request)
    }
}

impl SearchPlugin for CswSearch {
    fn protocol(&self) -> &'static str {
        "csw"
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
            let request = self.request(ctx, query, page);
            let response = send_json(ctx.http.as_ref(), &ctx.provider, Phase::Search, request).await?;
            let total = json_path(&response, &self.config.matched_path)
                .and_then(value_as_count)
                .map(TotalCount::Exact)
                .unwrap_or(TotalCount::Unknown);
            Ok(RawPage {
                items: items_at(ctx, &response, &self.config.records_path)?,
                total,
                next_cursor: None,
            })
        })
    }
}
