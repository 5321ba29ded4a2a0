//! Built-in demonstration of the review loop with simulated collaborators.
//!
//! The sample upstream mimics a flaky CRM: a slice of accounts fails its
//! first detail fetch with a transient error (exercising retry), and the
//! rest respond after a short simulated latency. The demo reviewer
//! auto-approves everything through the in-memory channel; the `cycle`
//! command swaps in the file or webhook channel from configuration.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use tokio::time::sleep;

use crate::approval::{ApprovalGate, FileChannel, InMemoryChannel, NotificationChannel, WebhookChannel};
use crate::breaker::BreakerRegistry;
use crate::config::CadenceConfig;
use crate::dispatcher::{BatchDispatcher, CycleOutcome};
use crate::error::{CadenceError, UpstreamError};
use crate::pipeline::{ContextProvider, DataSource, OutputGenerator, Recommendation, ReviewPipeline};
use crate::queue::{WorkItem, WorkQueue};
use crate::retry::RetryExecutor;
use crate::session::SessionManager;
use crate::store::FileStore;
use crate::ui::CycleProgress;

/// Simulated CRM backing the demo and the stub `cycle` mode.
pub struct SampleUpstream {
    accounts: usize,
    flaky: std::sync::Mutex<std::collections::HashSet<String>>,
}

impl SampleUpstream {
    pub fn new(accounts: usize) -> Self {
        // Every fourth account fails its first detail fetch.
        let flaky = (0..accounts)
            .filter(|i| i % 4 == 3)
            .map(|i| format!("acct-{i:03}"))
            .collect();
        Self {
            accounts,
            flaky: std::sync::Mutex::new(flaky),
        }
    }
}

#[async_trait]
impl DataSource for SampleUpstream {
    async fn fetch_work_candidates(&self, _scope: &str) -> Result<Vec<WorkItem>, UpstreamError> {
        sleep(Duration::from_millis(20)).await;
        Ok((0..self.accounts)
            .map(|i| WorkItem::new(format!("acct-{i:03}"), (i % 7) as i32))
            .collect())
    }

    async fn fetch_item_detail(&self, id: &str) -> Result<Value, UpstreamError> {
        sleep(Duration::from_millis(10)).await;
        // First fetch for a flaky account times out; the retry succeeds.
        if self.flaky.lock().unwrap().remove(id) {
            return Err(UpstreamError::Timeout);
        }
        Ok(json!({
            "id": id,
            "name": format!("Account {id}"),
            "tier": if id.ends_with('0') { "enterprise" } else { "standard" },
            "open_tickets": id.len() % 5,
        }))
    }
}

#[async_trait]
impl ContextProvider for SampleUpstream {
    async fn fetch_context(&self, id: &str, detail: &Value) -> Result<Value, UpstreamError> {
        sleep(Duration::from_millis(10)).await;
        Ok(json!({
            "id": id,
            "tier": detail["tier"],
            "last_meeting_days_ago": 45,
            "sentiment": "neutral",
        }))
    }
}

#[async_trait]
impl OutputGenerator for SampleUpstream {
    async fn generate(
        &self,
        detail: &Value,
        context: &Value,
    ) -> Result<Vec<Recommendation>, UpstreamError> {
        sleep(Duration::from_millis(5)).await;
        let id = detail["id"].as_str().unwrap_or("unknown");
        let mut outputs = vec![Recommendation::new(
            id,
            "engagement",
            format!("Schedule a check-in for {id}"),
            0.82,
        )];
        if context["last_meeting_days_ago"].as_u64().unwrap_or(0) > 30 {
            outputs.push(Recommendation::new(
                id,
                "risk",
                format!("Flag {id} for renewal review"),
                0.64,
            ));
        }
        Ok(outputs)
    }
}

/// Build the full loop from configuration around the given collaborators
/// and notification channel.
pub fn build_dispatcher(
    config: &CadenceConfig,
    data_source: Arc<dyn DataSource>,
    context_provider: Arc<dyn ContextProvider>,
    generator: Arc<dyn OutputGenerator>,
    channel: NotificationChannel,
) -> BatchDispatcher {
    let store = Arc::new(FileStore::new(&config.data_dir));
    let pipeline = Arc::new(ReviewPipeline::new(
        data_source,
        context_provider,
        generator,
        Arc::new(config.cache()),
        RetryExecutor::new(config.retry_policy()),
        Arc::new(BreakerRegistry::new(config.breaker())),
        config.cache_ttl(),
    ));
    let gate = ApprovalGate::new(channel, config.approval_window_ms, config.approval_poll_ms);
    let sessions = SessionManager::new(store.clone())
        .with_archive_on_complete(config.archive_on_complete);
    BatchDispatcher::new(pipeline, gate, sessions, store, config.dispatcher())
}

/// The notification channel the `cycle` command should use: webhook when
/// configured, file outbox/inbox otherwise.
pub fn channel_from_config(config: &CadenceConfig) -> NotificationChannel {
    match &config.webhook_url {
        Some(url) => NotificationChannel::Webhook(WebhookChannel::new(
            url.clone(),
            config.webhook_token.clone(),
        )),
        None => {
            let root = Path::new(&config.data_dir).join("approvals");
            NotificationChannel::FileBased(FileChannel::new(
                root.join("outbox"),
                root.join("inbox"),
            ))
        }
    }
}

/// Run one cycle against the sample upstream with the given channel.
pub async fn run(
    config: &CadenceConfig,
    accounts: usize,
    channel: NotificationChannel,
    verbose: bool,
) -> Result<CycleOutcome, CadenceError> {
    let upstream = Arc::new(SampleUpstream::new(accounts));
    let dispatcher = build_dispatcher(
        config,
        upstream.clone(),
        upstream.clone(),
        upstream,
        channel,
    );

    let candidates = dispatcher
        .pipeline()
        .discover(&config.scope)
        .await
        .map_err(CadenceError::Pipeline)?;
    let mut queue = WorkQueue::new();
    for item in candidates {
        queue.enqueue(item);
    }

    let progress = CycleProgress::start("review");
    progress.batch(1, queue.len().min(config.batch_size));
    let outcome = dispatcher.run_cycle(&mut queue).await?;
    progress.complete(&outcome.session);
    if verbose {
        progress.print_report(&outcome.session);
    }
    Ok(outcome)
}

/// The `demo` subcommand: seeded accounts, auto-approving reviewer.
pub async fn run_demo(
    config: &CadenceConfig,
    accounts: usize,
    verbose: bool,
) -> Result<CycleOutcome, CadenceError> {
    run(
        config,
        accounts,
        NotificationChannel::InMemory(InMemoryChannel::auto_approving()),
        verbose,
    )
    .await
}
