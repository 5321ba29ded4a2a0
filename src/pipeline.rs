use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::breaker::BreakerRegistry;
use crate::cache::CacheManager;
use crate::error::{PipelineError, UpstreamError};
use crate::queue::WorkItem;
use crate::retry::RetryExecutor;

/// Upstream system of record: discovers reviewable accounts and serves
/// their raw detail. Must be idempotent and safe to retry.
#[async_trait]
pub trait DataSource: Send + Sync {
    async fn fetch_work_candidates(&self, scope: &str) -> Result<Vec<WorkItem>, UpstreamError>;
    async fn fetch_item_detail(&self, id: &str) -> Result<Value, UpstreamError>;
}

/// Second stage: enriches an account's detail with historical context.
#[async_trait]
pub trait ContextProvider: Send + Sync {
    async fn fetch_context(&self, id: &str, detail: &Value) -> Result<Value, UpstreamError>;
}

/// Third stage: turns detail + context into candidate recommendations.
/// Must not mutate its inputs.
#[async_trait]
pub trait OutputGenerator: Send + Sync {
    async fn generate(
        &self,
        detail: &Value,
        context: &Value,
    ) -> Result<Vec<Recommendation>, UpstreamError>;
}

/// A candidate action produced for one account, subject to approval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub id: String,
    pub item_id: String,
    pub category: String,
    pub summary: String,
    /// Generator confidence, clamped to [0, 1].
    pub confidence: f64,
}

impl Recommendation {
    pub fn new(
        item_id: impl Into<String>,
        category: impl Into<String>,
        summary: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            item_id: item_id.into(),
            category: category.into(),
            summary: summary.into(),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }
}

/// Outcome of running one item through the three stages.
/// Immutable once produced; consumed by the session manager and the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingResult {
    pub item_id: String,
    pub success: bool,
    pub output: Vec<Recommendation>,
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// The fixed three-stage review pipeline.
///
/// Every upstream call runs inside retry + breaker; the two fetch stages are
/// additionally cache-backed. Generation is never cached; each cycle's
/// outputs must be fresh for approval.
pub struct ReviewPipeline {
    data_source: Arc<dyn DataSource>,
    context_provider: Arc<dyn ContextProvider>,
    generator: Arc<dyn OutputGenerator>,
    cache: Arc<CacheManager>,
    retry: RetryExecutor,
    breakers: Arc<BreakerRegistry>,
    cache_ttl: Duration,
}

pub const OP_FETCH_CANDIDATES: &str = "fetch_candidates";
pub const OP_FETCH_DETAIL: &str = "fetch_detail";
pub const OP_FETCH_CONTEXT: &str = "fetch_context";
pub const OP_GENERATE: &str = "generate";

impl ReviewPipeline {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        data_source: Arc<dyn DataSource>,
        context_provider: Arc<dyn ContextProvider>,
        generator: Arc<dyn OutputGenerator>,
        cache: Arc<CacheManager>,
        retry: RetryExecutor,
        breakers: Arc<BreakerRegistry>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            data_source,
            context_provider,
            generator,
            cache,
            retry,
            breakers,
            cache_ttl,
        }
    }

    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.cache
    }

    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }

    /// Discover reviewable accounts. Never cached, since discovery must see the
    /// current upstream state.
    pub async fn discover(&self, scope: &str) -> Result<Vec<WorkItem>, PipelineError> {
        self.protected_call(OP_FETCH_CANDIDATES, || {
            self.data_source.fetch_work_candidates(scope)
        })
        .await
    }

    /// Run one item through retrieve → context → synthesize, capturing the
    /// outcome either way.
    pub async fn process(&self, item: &WorkItem) -> ProcessingResult {
        let started = Instant::now();
        match self.run_stages(&item.id).await {
            Ok(output) => ProcessingResult {
                item_id: item.id.clone(),
                success: true,
                output,
                error: None,
                duration_ms: started.elapsed().as_millis() as u64,
            },
            Err(err) => ProcessingResult {
                item_id: item.id.clone(),
                success: false,
                output: Vec::new(),
                error: Some(err.to_string()),
                duration_ms: started.elapsed().as_millis() as u64,
            },
        }
    }

    async fn run_stages(&self, id: &str) -> Result<Vec<Recommendation>, PipelineError> {
        let detail = self
            .cached_call(OP_FETCH_DETAIL, &format!("acct:{id}:detail"), || {
                self.data_source.fetch_item_detail(id)
            })
            .await?;

        let context = self
            .cached_call(OP_FETCH_CONTEXT, &format!("acct:{id}:context"), || {
                self.context_provider.fetch_context(id, &detail)
            })
            .await?;

        self.protected_call(OP_GENERATE, || self.generator.generate(&detail, &context))
            .await
    }

    async fn cached_call<F, Fut>(
        &self,
        operation: &str,
        key: &str,
        op: F,
    ) -> Result<Value, PipelineError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Value, UpstreamError>>,
    {
        if let Some(value) = self.cache.get(key) {
            return Ok(value);
        }
        let value = self.protected_call(operation, op).await?;
        self.cache.set(key, value.clone(), self.cache_ttl);
        Ok(value)
    }

    async fn protected_call<T, F, Fut>(&self, operation: &str, op: F) -> Result<T, PipelineError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
    {
        let breaker = self.breakers.breaker(operation);
        self.retry
            .execute(operation, || breaker.call(&op))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::BreakerConfig;
    use crate::retry::{BackoffStrategy, RetryPolicy};
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Scriptable collaborator: fails the first `fail_first` calls of each
    /// method, then succeeds.
    struct StubUpstream {
        fail_first: u32,
        failure: UpstreamError,
        detail_calls: AtomicU32,
        context_calls: AtomicU32,
        generate_calls: AtomicU32,
    }

    impl StubUpstream {
        fn reliable() -> Self {
            Self::failing(0, UpstreamError::Timeout)
        }

        fn failing(fail_first: u32, failure: UpstreamError) -> Self {
            Self {
                fail_first,
                failure,
                detail_calls: AtomicU32::new(0),
                context_calls: AtomicU32::new(0),
                generate_calls: AtomicU32::new(0),
            }
        }

        fn outcome<T>(&self, calls: &AtomicU32, value: T) -> Result<T, UpstreamError> {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                Err(self.failure.clone())
            } else {
                Ok(value)
            }
        }
    }

    #[async_trait]
    impl DataSource for StubUpstream {
        async fn fetch_work_candidates(&self, _scope: &str) -> Result<Vec<WorkItem>, UpstreamError> {
            Ok(vec![WorkItem::new("acct-1", 1)])
        }

        async fn fetch_item_detail(&self, id: &str) -> Result<Value, UpstreamError> {
            self.outcome(&self.detail_calls, json!({"id": id, "tier": "gold"}))
        }
    }

    #[async_trait]
    impl ContextProvider for StubUpstream {
        async fn fetch_context(&self, id: &str, _detail: &Value) -> Result<Value, UpstreamError> {
            self.outcome(&self.context_calls, json!({"id": id, "notes": 3}))
        }
    }

    #[async_trait]
    impl OutputGenerator for StubUpstream {
        async fn generate(
            &self,
            detail: &Value,
            _context: &Value,
        ) -> Result<Vec<Recommendation>, UpstreamError> {
            let id = detail["id"].as_str().unwrap_or("unknown").to_string();
            self.outcome(
                &self.generate_calls,
                vec![Recommendation::new(id, "engagement", "Schedule QBR", 0.9)],
            )
        }
    }

    fn pipeline_with(upstream: Arc<StubUpstream>, max_retries: u32) -> ReviewPipeline {
        ReviewPipeline::new(
            upstream.clone(),
            upstream.clone(),
            upstream,
            Arc::new(CacheManager::default()),
            RetryExecutor::new(RetryPolicy {
                max_retries,
                base_delay_ms: 1,
                multiplier: 2.0,
                max_delay_ms: 5,
                strategy: BackoffStrategy::Fixed,
            }),
            Arc::new(BreakerRegistry::new(BreakerConfig::default())),
            Duration::from_secs(60),
        )
    }

    #[tokio::test]
    async fn happy_path_produces_recommendations() {
        let upstream = Arc::new(StubUpstream::reliable());
        let pipeline = pipeline_with(upstream.clone(), 3);

        let result = pipeline.process(&WorkItem::new("acct-1", 1)).await;

        assert!(result.success);
        assert_eq!(result.output.len(), 1);
        assert_eq!(result.output[0].item_id, "acct-1");
        assert_eq!(result.output[0].category, "engagement");
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn transient_stage_failures_are_retried_through() {
        let upstream = Arc::new(StubUpstream::failing(1, UpstreamError::Timeout));
        let pipeline = pipeline_with(upstream.clone(), 3);

        let result = pipeline.process(&WorkItem::new("acct-1", 1)).await;

        assert!(result.success);
        // First detail call failed, second succeeded.
        assert_eq!(upstream.detail_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn exhausted_retries_surface_as_failed_result() {
        let upstream = Arc::new(StubUpstream::failing(100, UpstreamError::Timeout));
        let pipeline = pipeline_with(upstream.clone(), 2);

        let result = pipeline.process(&WorkItem::new("acct-1", 1)).await;

        assert!(!result.success);
        assert!(result.output.is_empty());
        let error = result.error.unwrap();
        assert!(error.contains("exhausted"), "unexpected error: {error}");
        assert_eq!(upstream.detail_calls.load(Ordering::SeqCst), 2);
        // Later stages never ran.
        assert_eq!(upstream.context_calls.load(Ordering::SeqCst), 0);
        assert_eq!(upstream.generate_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn permanent_failure_skips_retries() {
        let upstream = Arc::new(StubUpstream::failing(
            100,
            UpstreamError::Http {
                status: 404,
                message: "gone".into(),
                retry_after_ms: None,
            },
        ));
        let pipeline = pipeline_with(upstream.clone(), 5);

        let result = pipeline.process(&WorkItem::new("acct-1", 1)).await;

        assert!(!result.success);
        assert_eq!(upstream.detail_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fetch_stages_are_cache_backed() {
        let upstream = Arc::new(StubUpstream::reliable());
        let pipeline = pipeline_with(upstream.clone(), 3);
        let item = WorkItem::new("acct-1", 1);

        pipeline.process(&item).await;
        pipeline.process(&item).await;

        // Detail and context served from cache the second time round;
        // generation always runs fresh.
        assert_eq!(upstream.detail_calls.load(Ordering::SeqCst), 1);
        assert_eq!(upstream.context_calls.load(Ordering::SeqCst), 1);
        assert_eq!(upstream.generate_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn discover_returns_candidates() {
        let upstream = Arc::new(StubUpstream::reliable());
        let pipeline = pipeline_with(upstream, 3);

        let items = pipeline.discover("all-accounts").await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].id, "acct-1");
    }

    #[test]
    fn confidence_is_clamped() {
        assert_eq!(Recommendation::new("a", "c", "s", 1.7).confidence, 1.0);
        assert_eq!(Recommendation::new("a", "c", "s", -0.2).confidence, 0.0);
    }
}
