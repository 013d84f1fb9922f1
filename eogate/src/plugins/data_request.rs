//! Job-based search: submit a data request, wait for it, page its results.
//!
//! ```text
//! POST {data_request_url}             {"productType": ..., ...}  → {"jobId": "j-1"}
//! GET  {status_url}j-1                → {"status": "running" | "completed" | "failed", "message": ...}
//! GET  {result_url with {jobId}, {items_per_page}, {page}}  → {"content": [...], "totalElements": n}
//! DELETE {data_request_url}/j-1       (on timeout or cancellation)
//! ```
//!
//! Submission and polling are driven by the deferred engine through
//! [`DeferredSearch`]; [`SearchPlugin::execute`] only pages through the
//! results of a job that is ready.

use std::collections::BTreeMap;
use std::time::Duration;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use super::template::TemplateContext;
use super::{
    items_at, require_url, value_as_count, DeferredSearch, FieldMapping, PageRequest, RawPage,
    SearchContext, SearchPlugin,
};
use crate::deferred::{PollOutcome, PollPolicy, DEFAULT_DEADLINE_MINS, DEFAULT_POLL_INTERVAL_SECS};
use crate::error::{GatewayError, GatewayResult, Phase};
use crate::http::{send_checked, send_json, HttpRequest, Method};
use crate::model::{Product, Query, TotalCount};

/// Placeholder in mapped properties replaced by the job id.
const JOB_ID_PLACEHOLDER: &str = "requestJobId";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataRequestConfig {
    pub data_request_url: String,
    /// Prefix the job id is appended to.
    pub status_url: String,
    /// Template with `{jobId}`, `{items_per_page}` and `{page}`.
    pub result_url: String,
    /// Body key (dotted) → template.
    #[serde(default)]
    pub body: BTreeMap<String, String>,
    #[serde(default = "default_results_path")]
    pub results_path: String,
    #[serde(default = "default_total_path")]
    pub total_items_path: String,
    /// Provider number of the first result page.
    #[serde(default = "default_start_page")]
    pub start_page: usize,
    #[serde(default)]
    pub poll_interval_secs: Option<u64>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub need_auth: bool,
    #[serde(default)]
    pub metadata_mapping: FieldMapping,
}

fn default_results_path() -> String {
    "$.content".to_string()
}

fn default_total_path() -> String {
    "$.totalElements".to_string()
}

fn default_start_page() -> usize {
    1
}

fn default_body() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("productType".to_string(), "{providerProductType}".to_string()),
        ("startDate".to_string(), "{start}".to_string()),
        ("endDate".to_string(), "{end}".to_string()),
        ("geometry".to_string(), "{geometry_geojson}".to_string()),
    ])
}

pub struct DataRequestSearch {
    config: DataRequestConfig,
    body: BTreeMap<String, String>,
    mapping: FieldMapping,
}

impl DataRequestSearch {
    pub fn new(config: DataRequestConfig) -> GatewayResult<Self> {
        require_url("data_request_url", &config.data_request_url)?;
        require_url("status_url", &config.status_url)?;
        require_url("result_url", &config.result_url)?;
        let body = if config.body.is_empty() {
            default_body()
        } else {
            config.body.clone()
        };
        let mapping = config
            .metadata_mapping
            .over(FieldMapping::from_pairs(&[("id", "$.id"), ("geometry", "$.footprint")]));
        Ok(Self {
            config,
            body,
            mapping,
        })
    }

    fn result_url(&self, ctx: &SearchContext, query: &Query, page: &PageRequest, job_id: &str) -> GatewayResult<String> {
        let mut vars = TemplateContext::for_search(query, &ctx.binding, page);
        vars.set("jobId", job_id);
        vars.set("page", (self.config.start_page + page.page - 1).to_string());
        vars.render(&self.config.result_url).ok_or_else(|| {
            GatewayError::Configuration(format!(
                "result_url '{}' has unknown placeholders",
                self.config.result_url
            ))
        })
    }
}

impl SearchPlugin for DataRequestSearch {
    fn protocol(&self) -> &'static str {
        "data_request"
    }

    fn mapping(&self) -> &FieldMapping {
        &self.mapping
    }

    fn need_auth(&self) -> bool {
        self.config.need_auth
    }

    fn deferred(&self) -> Option<&dyn DeferredSearch> {
        Some(self)
    }

    fn execute<'a>(
        &'a self,
        ctx: &'a SearchContext,
        query: &'a Query,
        page: &'a PageRequest,
    ) -> BoxFuture<'a, GatewayResult<RawPage>> {
        Box::pin(async move {
            let job_id = ctx
                .job_id
                .as_deref()
                .ok_or_else(|| ctx.error("search job has not been submitted"))?;
            let url = self.result_url(ctx, query, page, job_id)?;
            let request = ctx.credentials.apply(HttpRequest::get(url));
            let response = send_json(ctx.http.as_ref(), &ctx.provider, Phase::Search, request).await?;
            let total = super::json_path(&response, &self.config.total_items_path)
                .and_then(value_as_count)
                .map(TotalCount::Exact)
                .unwrap_or(TotalCount::Unknown);
            Ok(RawPage {
                items: items_at(ctx, &response, &self.config.results_path)?,
                total,
                next_cursor: None,
            })
        })
    }

    /// Fills a missing footprint from the query and binds `requestJobId`
    /// placeholders in string properties (order links) to the job.
    fn normalize(&self, ctx: &SearchContext, query: &Query, item: &Value) -> GatewayResult<Product> {
        let mut product = self
            .mapping
            .to_product(&ctx.provider, &query.product_type, item)?;
        if product.geometry.is_none() {
            product.geometry = query.geometry.clone();
        }
        if let Some(job_id) = &ctx.job_id {
            for value in product.properties.values_mut() {
                if let Value::String(s) = value {
                    if s.contains(JOB_ID_PLACEHOLDER) {
                        *s = s.replace(JOB_ID_PLACEHOLDER, job_id);
                    }
                }
            }
        }
        Ok(product)
    }
}

impl DeferredSearch for DataRequestSearch {
    fn submit<'a>(&'a self, ctx: &'a SearchContext, query: &'a Query) -> BoxFuture<'a, GatewayResult<String>> {
        Box::pin(async move {
            if query.sort.is_some() {
                return Err(ctx.error("sorting is not supported by job-based search"));
            }
            let vars = TemplateContext::for_query(query, &ctx.binding);
            let body = vars.render_json(&self.body);
            debug!(provider = %ctx.provider, url = %self.config.data_request_url, "Submitting search job");
            let request = ctx
                .credentials
                .apply(HttpRequest::post(self.config.data_request_url.clone()).with_json(body));
            let response = send_json(ctx.http.as_ref(), &ctx.provider, Phase::Submit, request).await?;
            let job_id = response
                .get("jobId")
                .and_then(super::template::value_to_param)
                .ok_or_else(|| {
                    GatewayError::provider(&ctx.provider, Phase::Submit, "response has no jobId")
                })?;
            info!(provider = %ctx.provider, job = %job_id, "Search job created");
            Ok(job_id)
        })
    }

    fn status<'a>(&'a self, ctx: &'a SearchContext, job_id: &'a str) -> BoxFuture<'a, GatewayResult<PollOutcome>> {
        Box::pin(async move {
            let url = format!("{}{}", self.config.status_url, job_id);
            let request = ctx.credentials.apply(HttpRequest::get(url));
            let status = send_json(ctx.http.as_ref(), &ctx.provider, Phase::Poll, request).await?;
            if let Some(code) = status.get("status_code").and_then(Value::as_u64) {
                if code == 403 || code == 404 {
                    return Err(GatewayError::Authentication {
                        provider: ctx.provider.clone(),
                        reason: "authentication token expired during request".to_string(),
                    });
                }
            }
            let message = status
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string);
            Ok(match status.get("status").and_then(Value::as_str) {
                Some("completed") => PollOutcome::Ready,
                Some("failed") => PollOutcome::Failed(
                    message.unwrap_or_else(|| "data request job has failed".to_string()),
                ),
                other => PollOutcome::Pending {
                    progress: None,
                    message: message.or_else(|| other.map(str::to_string)),
                },
            })
        })
    }

    fn cancel<'a>(&'a self, ctx: &'a SearchContext, job_id: &'a str) -> BoxFuture<'a, GatewayResult<()>> {
        Box::pin(async move {
            let url = format!("{}/{}", self.config.data_request_url.trim_end_matches('/'), job_id);
            info!(provider = %ctx.provider, job = %job_id, "Deleting search job");
            let request = ctx.credentials.apply(HttpRequest::new(Method::Delete, url));
            send_checked(ctx.http.as_ref(), &ctx.provider, Phase::Poll, request).await?;
            Ok(())
        })
    }

    fn poll_policy(&self) -> Option<PollPolicy> {
        if self.config.poll_interval_secs.is_none() && self.config.timeout_secs.is_none() {
            return None;
        }
        Some(PollPolicy::new(
            Duration::from_secs(self.config.poll_interval_secs.unwrap_or(DEFAULT_POLL_INTERVAL_SECS)),
            Duration::from_secs(self.config.timeout_secs.unwrap_or(DEFAULT_DEADLINE_MINS * 60)),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::tests::{MockHttpClient, MockReply};
    use crate::model::Geometry;
    use crate::registry::ProductBinding;
    use serde_json::json;
    use std::sync::Arc;

    fn plugin() -> DataRequestSearch {
        DataRequestSearch::new(
            serde_json::from_value(json!({
                "data_request_url": "https://wekeo.example/dataaccess/datarequest",
                "status_url": "https://wekeo.example/dataaccess/datarequest/status/",
                "result_url": "https://wekeo.example/dataaccess/datarequest/jobs/{jobId}/result?size={items_per_page}&page={page}",
                "start_page": 0,
                "poll_interval_secs": 1,
                "metadata_mapping": {
                    "id": "$.productInfo.product",
                    "orderLink": "https://wekeo.example/dataaccess/dataorder?job=requestJobId&uri={id}"
                }
            }))
            .unwrap(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_submit_reads_job_id() {
        let mock = Arc::new(MockHttpClient::new());
        mock.on(
            Method::Post,
            "https://wekeo.example/dataaccess/datarequest",
            MockReply::json(200, json!({"jobId": "job-7"})),
        );
        let ctx = SearchContext::new("wekeo", mock.clone()).with_binding(ProductBinding::new("EO:ESA:DAT:SENTINEL-1"));
        let job = plugin().submit(&ctx, &Query::new("S1_SAR_GRD")).await.unwrap();
        assert_eq!(job, "job-7");
        let body = mock.calls()[0].body.clone().unwrap();
        assert_eq!(body["productType"], json!("EO:ESA:DAT:SENTINEL-1"));
    }

    #[tokio::test]
    async fn test_status_values() {
        let mock = Arc::new(MockHttpClient::new());
        let status = "https://wekeo.example/dataaccess/datarequest/status/";
        mock.on(Method::Get, status, MockReply::json(200, json!({"status": "running"})));
        mock.on(Method::Get, status, MockReply::json(200, json!({"status": "completed"})));
        mock.on(Method::Get, status, MockReply::json(200, json!({"status": "failed", "message": "quota"})));
        mock.on(Method::Get, status, MockReply::json(200, json!({"status_code": 403})));
        let ctx = SearchContext::new("wekeo", mock.clone());
        let plugin = plugin();

        assert!(matches!(plugin.status(&ctx, "j").await.unwrap(), PollOutcome::Pending { .. }));
        assert_eq!(plugin.status(&ctx, "j").await.unwrap(), PollOutcome::Ready);
        assert_eq!(
            plugin.status(&ctx, "j").await.unwrap(),
            PollOutcome::Failed("quota".to_string())
        );
        assert!(matches!(
            plugin.status(&ctx, "j").await,
            Err(GatewayError::Authentication { .. })
        ));
        assert!(mock.calls()[0].url.ends_with("/status/j"));
    }

    #[tokio::test]
    async fn test_results_are_paged_and_bound_to_job() {
        let mock = Arc::new(MockHttpClient::new());
        mock.always(
            Method::Get,
            "https://wekeo.example/dataaccess/datarequest/jobs/",
            MockReply::json(
                200,
                json!({"totalElements": 1, "content": [{"productInfo": {"product": "S1A_X"}}]}),
            ),
        );
        let mut ctx = SearchContext::new("wekeo", mock.clone());
        ctx.job_id = Some("job-7".to_string());
        let query = Query::new("S1_SAR_GRD").with_geometry(Geometry::bbox(0.0, 0.0, 1.0, 1.0));
        let plugin = plugin();

        let page = plugin.execute(&ctx, &query, &PageRequest::first(20)).await.unwrap();
        assert_eq!(page.total, TotalCount::Exact(1));
        assert!(mock.calls()[0].url.ends_with("/jobs/job-7/result?size=20&page=0"));

        let product = plugin.normalize(&ctx, &query, &page.items[0]).unwrap();
        assert_eq!(product.id, "S1A_X");
        assert_eq!(
            product.property_str("orderLink").as_deref(),
            Some("https://wekeo.example/dataaccess/dataorder?job=job-7&uri=S1A_X")
        );
        assert!(product.geometry.is_some());
    }

    #[tokio::test]
    async fn test_results_need_a_job() {
        let ctx = SearchContext::new("wekeo", Arc::new(MockHttpClient::new()));
        let err = plugin()
            .execute(&ctx, &Query::new("X"), &PageRequest::first(1))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("not been submitted"));
    }

    #[tokio::test]
    async fn test_cancel_deletes_job() {
        let mock = Arc::new(MockHttpClient::new());
        mock.always(
            Method::Delete,
            "https://wekeo.example/dataaccess/datarequest/",
            MockReply::bytes(204, ""),
        );
        let ctx = SearchContext::new("wekeo", mock.clone());
        plugin().cancel(&ctx, "job-7").await.unwrap();
        assert_eq!(mock.calls()[0].url, "https://wekeo.example/dataaccess/datarequest/job-7");
    }

    #[test]
    fn test_policy_from_config() {
        let policy = plugin().poll_policy().unwrap();
        assert_eq!(policy.interval, Duration::from_secs(1));
        assert_eq!(policy.deadline, Some(Duration::from_secs(1200)));
    }
}
