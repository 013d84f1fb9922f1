//! The search dispatcher.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::{self, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::SearchSettings;
use crate::deferred::{DeferredEngine, DeferredWorkflow, OperationKind, PollOutcome};
use crate::error::{GatewayError, GatewayResult};
use crate::http::AsyncHttpClient;
use crate::inflight::InFlightTable;
use crate::model::{
    sort_products, ContinuationToken, MergedSearchResult, ProviderFailure, ProviderOutcome, Query,
    SearchResult, TotalCount,
};
use crate::plugins::{DeferredSearch, PageRequest, SearchContext, SearchPlugin};
use crate::registry::{ProviderRegistry, ResolvedProvider};

/// (provider, query fingerprint, kind) of a running search job.
type JobKey = (String, String, OperationKind);

pub struct SearchDispatcher {
    registry: Arc<ProviderRegistry>,
    http: Arc<dyn AsyncHttpClient>,
    engine: DeferredEngine,
    jobs: InFlightTable<JobKey, GatewayResult<String>>,
    settings: SearchSettings,
}

impl SearchDispatcher {
    pub fn new(
        registry: Arc<ProviderRegistry>,
        http: Arc<dyn AsyncHttpClient>,
        engine: DeferredEngine,
        settings: SearchSettings,
    ) -> Self {
        Self {
            registry,
            http,
            engine,
            jobs: InFlightTable::new(),
            settings,
        }
    }

    pub fn settings(&self) -> &SearchSettings {
        &self.settings
    }

    /// Searches the best-ranked provider offering the product type, or the
    /// one named by the query.
    ///
    /// A failure is returned as is; no other provider is tried.
    ///
    /// # Errors
    ///
    /// - `Configuration` for an invalid query or continuation token
    /// - `UnsupportedProvider` / `UnsupportedProductType` from resolution
    /// - any provider error raised while searching
    pub async fn search(&self, query: &Query, cancel: &CancellationToken) -> GatewayResult<SearchResult> {
        query.validate()?;
        let resume = query
            .page_token
            .as_deref()
            .map(ContinuationToken::decode)
            .transpose()?;
        let mut query = query.clone();
        if let Some(token) = &resume {
            match &query.provider {
                Some(name) if name != &token.provider => {
                    return Err(GatewayError::Configuration(format!(
                        "continuation token belongs to provider '{}', not '{}'",
                        token.provider, name
                    )))
                }
                _ => query.provider = Some(token.provider.clone()),
            }
        }
        let provider = self.registry.resolve(&query)?;
        let mut result = self.search_provider(&provider, &query, resume, cancel).await?;
        if let Some(sort) = &query.sort {
            sort_products(&mut result.products, sort);
        }
        Ok(result)
    }

    /// Searches every provider offering the product type.
    ///
    /// Products are concatenated in provider priority order (then sorted
    /// when the query asks for it). Identical scenes from different
    /// providers are all kept. A provider failure is recorded and does not
    /// affect the others.
    pub async fn search_all(
        &self,
        query: &Query,
        cancel: &CancellationToken,
    ) -> GatewayResult<MergedSearchResult> {
        query.validate()?;
        if query.page_token.is_some() {
            return Err(GatewayError::Configuration(
                "continuation tokens only apply to single-provider searches".to_string(),
            ));
        }
        let providers = match &query.provider {
            Some(_) => vec![self.registry.resolve(query)?],
            None => self.registry.providers_offering(&query.product_type),
        };
        if providers.is_empty() {
            return Err(GatewayError::UnsupportedProductType(query.product_type.clone()));
        }

        let outcomes: Vec<(String, GatewayResult<SearchResult>)> = stream::iter(providers.iter())
            .map(|provider| async move {
                let outcome = self.search_provider(provider, query, None, cancel).await;
                (provider.name.clone(), outcome)
            })
            .buffered(self.settings.max_concurrency.max(1))
            .collect()
            .await;
        if cancel.is_cancelled() {
            return Err(GatewayError::Cancelled {
                operation: format!("search of {}", query.product_type),
            });
        }

        let mut merged = MergedSearchResult::default();
        for (provider, outcome) in outcomes {
            match outcome {
                Ok(result) => {
                    merged.outcomes.push(ProviderOutcome {
                        provider,
                        count: result.len(),
                        total: result.total,
                    });
                    merged.products.extend(result.products);
                }
                Err(error) => {
                    warn!(provider = %provider, error = %error, "provider failed during merged search");
                    merged.failures.push(ProviderFailure { provider, error });
                }
            }
        }
        if let Some(sort) = &query.sort {
            sort_products(&mut merged.products, sort);
        }
        info!(
            product_type = %query.product_type,
            products = merged.products.len(),
            providers = merged.outcomes.len(),
            failures = merged.failures.len(),
            "merged search finished"
        );
        Ok(merged)
    }

    async fn search_provider(
        &self,
        provider: &ResolvedProvider,
        query: &Query,
        resume: Option<ContinuationToken>,
        cancel: &CancellationToken,
    ) -> GatewayResult<SearchResult> {
        let plugin = provider.plugins.search.clone().ok_or_else(|| {
            GatewayError::Configuration(format!(
                "provider '{}' has no search capability",
                provider.name
            ))
        })?;
        let mut ctx = SearchContext::new(provider.name.clone(), self.http.clone())
            .with_binding(provider.binding.clone());
        if let Some(auth) = &provider.plugins.auth {
            ctx = ctx.with_credentials(auth.authenticate().await?);
        }
        if let Some(deferred) = plugin.deferred() {
            ctx.job_id = Some(self.run_job(deferred, &ctx, query, cancel).await?);
        }
        self.paginate(plugin.as_ref(), &ctx, query, resume, cancel).await
    }

    /// Submits (or joins) the search job and waits until it is ready.
    async fn run_job(
        &self,
        deferred: &dyn DeferredSearch,
        ctx: &SearchContext,
        query: &Query,
        cancel: &CancellationToken,
    ) -> GatewayResult<String> {
        let policy = deferred.poll_policy().unwrap_or(self.settings.job_policy);
        let workflow = SearchJob {
            deferred,
            ctx,
            query,
            subject: format!("{} search", query.product_type),
        };
        let key = (ctx.provider.clone(), query.fingerprint(), OperationKind::SearchJob);
        self.jobs
            .run_shared(key, cancel, || self.engine.run(&workflow, &policy, cancel))
            .await
    }

    async fn paginate(
        &self,
        plugin: &dyn SearchPlugin,
        ctx: &SearchContext,
        query: &Query,
        resume: Option<ContinuationToken>,
        cancel: &CancellationToken,
    ) -> GatewayResult<SearchResult> {
        let mut per_page = query
            .items_per_page
            .unwrap_or(self.settings.items_per_page)
            .max(1);
        if let Some(limit) = plugin.max_items_per_page() {
            per_page = per_page.min(limit.max(1));
        }
        let max_items = query.max_items.or(self.settings.max_items);
        let (mut page, mut skip) = match resume {
            Some(token) => (
                PageRequest {
                    page: token.page.max(1),
                    items_per_page: per_page,
                    cursor: token.cursor,
                },
                token.skip,
            ),
            None => (PageRequest::first(per_page), 0),
        };
        let continuation = |page: usize, cursor: Option<String>, skip: usize| {
            ContinuationToken {
                provider: ctx.provider.clone(),
                page,
                cursor,
                skip,
            }
            .encode()
        };
        let full = |count: usize| max_items.is_some_and(|max| count >= max);

        let mut products = Vec::new();
        let mut seen = HashSet::new();
        let mut total = TotalCount::Unknown;
        let mut next_page = None;
        'pages: loop {
            let raw = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(GatewayError::Cancelled {
                        operation: format!("search of {} on {}", query.product_type, ctx.provider),
                    })
                }
                raw = plugin.execute(ctx, query, &page) => raw?,
            };
            if total == TotalCount::Unknown {
                total = raw.total;
            }

            let received = raw.items.len();
            let mut fresh = 0;
            for (index, item) in raw.items.iter().enumerate().skip(skip) {
                if full(products.len()) {
                    next_page = Some(continuation(page.page, page.cursor.clone(), index));
                    break 'pages;
                }
                let product = plugin.normalize(ctx, query, item)?;
                if seen.insert(product.id.clone()) {
                    products.push(product);
                    fresh += 1;
                } else {
                    debug!(provider = %ctx.provider, product = %product.id, "dropping duplicate product");
                }
            }
            skip = 0;
            debug!(provider = %ctx.provider, page = page.page, received, fresh, "search page");

            let last = if plugin.paginates_by_cursor() {
                raw.next_cursor.is_none() || raw.next_cursor == page.cursor
            } else {
                received < page.items_per_page || fresh == 0
            };
            if last {
                break;
            }
            let next = page.next(raw.next_cursor);
            if full(products.len()) {
                next_page = Some(continuation(next.page, next.cursor, 0));
                break;
            }
            page = next;
        }

        info!(
            provider = %ctx.provider,
            product_type = %query.product_type,
            count = products.len(),
            truncated = next_page.is_some(),
            "search finished"
        );
        Ok(SearchResult {
            products,
            total,
            next_page,
        })
    }
}

/// A deferred search job seen as a workflow; its output is the job id.
struct SearchJob<'a> {
    deferred: &'a dyn DeferredSearch,
    ctx: &'a SearchContext,
    query: &'a Query,
    subject: String,
}

impl DeferredWorkflow for SearchJob<'_> {
    type Handle = String;
    type Output = String;

    fn kind(&self) -> OperationKind {
        OperationKind::SearchJob
    }

    fn provider(&self) -> &str {
        &self.ctx.provider
    }

    fn subject(&self) -> &str {
        &self.subject
    }

    fn submit(&self) -> BoxFuture<'_, GatewayResult<String>> {
        self.deferred.submit(self.ctx, self.query)
    }

    fn poll<'a>(&'a self, handle: &'a String) -> BoxFuture<'a, GatewayResult<PollOutcome>> {
        self.deferred.status(self.ctx, handle)
    }

    fn fetch<'a>(&'a self, handle: &'a String) -> BoxFuture<'a, GatewayResult<String>> {
        let job_id = handle.clone();
        Box::pin(async move { Ok(job_id) })
    }

    fn cancel<'a>(&'a self, handle: &'a String) -> BoxFuture<'a, GatewayResult<()>> {
        self.deferred.cancel(self.ctx, handle)
    }
}
