use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::sleep;

use crate::approval::{ApprovalGate, ApprovalOutcome, DecisionKind};
use crate::audit::{AuditEventType, AuditLedger};
use crate::error::CadenceError;
use crate::pipeline::{ProcessingResult, Recommendation, ReviewPipeline};
use crate::queue::{WorkItem, WorkQueue};
use crate::session::{SessionManager, SessionState, SessionStatus};
use crate::store::PersistenceStore;

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Items drained from the queue per batch.
    pub batch_size: usize,
    /// Hard limit on simultaneously executing item pipelines.
    pub concurrency: usize,
    /// Cycle halts once failed / (processed + failed) exceeds this.
    pub error_rate_threshold: f64,
    /// Floor for the adaptive pause between batches.
    pub pause_base_ms: u64,
    /// Ceiling for the adaptive pause between batches.
    pub pause_max_ms: u64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            concurrency: 4,
            error_rate_threshold: 0.5,
            pause_base_ms: 200,
            pause_max_ms: 10_000,
        }
    }
}

/// A finished cycle: the finalized session plus its audit ledger.
pub struct CycleOutcome {
    pub session: SessionState,
    pub ledger: AuditLedger,
}

/// Drains the work queue in bounded batches and drives each item through
/// the review pipeline.
///
/// One semaphore of size K caps concurrent item pipelines across the whole
/// cycle. A single item's failure never aborts its batch; the cycle halts
/// only when the session-wide error rate breaches the configured threshold
/// (that halt stops draining but lets in-flight items finish), and is
/// independent of the per-operation breakers inside the pipeline.
pub struct BatchDispatcher {
    pipeline: Arc<ReviewPipeline>,
    gate: ApprovalGate,
    sessions: SessionManager,
    audit_store: Arc<dyn PersistenceStore>,
    limiter: Arc<Semaphore>,
    config: DispatcherConfig,
}

impl BatchDispatcher {
    pub fn new(
        pipeline: Arc<ReviewPipeline>,
        gate: ApprovalGate,
        sessions: SessionManager,
        audit_store: Arc<dyn PersistenceStore>,
        config: DispatcherConfig,
    ) -> Self {
        let limiter = Arc::new(Semaphore::new(config.concurrency.max(1)));
        Self {
            pipeline,
            gate,
            sessions,
            audit_store,
            limiter,
            config,
        }
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn pipeline(&self) -> &Arc<ReviewPipeline> {
        &self.pipeline
    }

    /// Run one full cycle: drain the queue batch by batch, gate outputs,
    /// apply decisions, and finalize the session.
    ///
    /// Deferred items go back on the queue only after draining stops, so
    /// they wait for the next cycle rather than looping inside this one.
    pub async fn run_cycle(&self, queue: &mut WorkQueue) -> Result<CycleOutcome, CadenceError> {
        let mut session = self.sessions.create()?;
        let ledger = AuditLedger::new(&session.session_id, self.audit_store.clone());
        ledger.record(
            AuditEventType::SessionStarted,
            &session.session_id,
            true,
            json!({ "queued": queue.len() }),
        );

        let mut halted = false;
        let mut deferred: Vec<WorkItem> = Vec::new();

        while !queue.is_empty() {
            let batch = queue.dequeue_batch(self.config.batch_size);
            let results = self.run_batch(&batch).await;

            for result in &results {
                session.record_result(result);
                self.record_result_audit(result, &ledger);
            }
            ledger.add_expected_data_accesses(
                2 * results.iter().filter(|r| r.success).count() as u64,
            );
            session.counters.batches += 1;

            if session.error_rate() > self.config.error_rate_threshold {
                halted = true;
                ledger.record(
                    AuditEventType::CycleHalted,
                    &session.session_id,
                    false,
                    json!({
                        "error_rate": session.error_rate(),
                        "threshold": self.config.error_rate_threshold,
                    }),
                );
                self.sessions.persist(&session)?;
                break;
            }

            let outputs: Vec<Recommendation> = results
                .iter()
                .filter(|r| r.success)
                .flat_map(|r| r.output.iter().cloned())
                .collect();
            if !outputs.is_empty() {
                let outcome = self.gate.submit(&outputs, &ledger).await;
                self.apply_decisions(
                    &outcome,
                    &outputs,
                    &batch,
                    &mut deferred,
                    &mut session,
                    &ledger,
                );
            }

            self.sessions.persist(&session)?;

            if !queue.is_empty() {
                sleep(self.adaptive_pause(&results)).await;
            }
        }

        for item in deferred {
            queue.enqueue(item);
        }

        let outcome = if halted {
            SessionStatus::Failed
        } else {
            session.outcome_from_counters()
        };
        self.sessions
            .complete(&mut session, outcome, self.pipeline.cache().stats())?;
        // The session tier is scoped to one cycle.
        self.pipeline.cache().clear_session();
        ledger.record(
            AuditEventType::SessionCompleted,
            &session.session_id,
            !halted,
            json!({
                "status": session.status.to_string(),
                "processed": session.counters.processed,
                "failed": session.counters.failed,
            }),
        );
        Ok(CycleOutcome { session, ledger })
    }

    /// Run one batch under the concurrency limiter. Completion order is
    /// whatever finishes first.
    async fn run_batch(&self, batch: &[WorkItem]) -> Vec<ProcessingResult> {
        let mut tasks = JoinSet::new();
        for item in batch.iter().cloned() {
            let pipeline = self.pipeline.clone();
            let limiter = self.limiter.clone();
            tasks.spawn(async move {
                let _permit = limiter
                    .acquire_owned()
                    .await
                    .expect("concurrency limiter closed");
                pipeline.process(&item).await
            });
        }

        let mut results = Vec::with_capacity(batch.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(err) => eprintln!("  ✗ batch task failed to join: {err}"),
            }
        }
        results
    }

    /// Ledger entries backing one processing result: the two data accesses,
    /// the generation, or the captured error.
    fn record_result_audit(&self, result: &ProcessingResult, ledger: &AuditLedger) {
        if result.success {
            let recommendation_ids: Vec<&str> =
                result.output.iter().map(|r| r.id.as_str()).collect();
            ledger.record(
                AuditEventType::DataAccess,
                &result.item_id,
                true,
                json!({ "stage": "detail", "recommendation_ids": recommendation_ids }),
            );
            ledger.record(
                AuditEventType::DataAccess,
                &result.item_id,
                true,
                json!({ "stage": "context", "recommendation_ids": recommendation_ids }),
            );
            ledger.record(
                AuditEventType::Generation,
                &result.item_id,
                true,
                json!({
                    "recommendation_ids": recommendation_ids,
                    "duration_ms": result.duration_ms,
                }),
            );
        } else {
            ledger.record(
                AuditEventType::Error,
                &result.item_id,
                false,
                json!({
                    "error": result.error,
                    "duration_ms": result.duration_ms,
                }),
            );
        }
    }

    fn apply_decisions(
        &self,
        outcome: &ApprovalOutcome,
        outputs: &[Recommendation],
        batch: &[WorkItem],
        deferred: &mut Vec<WorkItem>,
        session: &mut SessionState,
        ledger: &AuditLedger,
    ) {
        let by_output: HashMap<&str, &Recommendation> =
            outputs.iter().map(|o| (o.id.as_str(), o)).collect();
        let by_item: HashMap<&str, &WorkItem> =
            batch.iter().map(|i| (i.id.as_str(), i)).collect();

        for decision in &outcome.decisions {
            match &decision.decision {
                DecisionKind::Approved => {
                    session.counters.approved += 1;
                    ledger.record(
                        AuditEventType::Execution,
                        &decision.output_id,
                        true,
                        json!({ "kind": "approved" }),
                    );
                }
                DecisionKind::Modified { overrides } => {
                    session.counters.modified += 1;
                    ledger.record(
                        AuditEventType::Execution,
                        &decision.output_id,
                        true,
                        json!({ "kind": "modified", "overrides": overrides }),
                    );
                }
                DecisionKind::Rejected { .. } => {
                    session.counters.rejected += 1;
                }
                DecisionKind::Deferred => {
                    session.counters.deferred += 1;
                    // Return the owning item to the queue at unchanged
                    // priority, once draining is over.
                    let item = by_output
                        .get(decision.output_id.as_str())
                        .and_then(|rec| by_item.get(rec.item_id.as_str()));
                    if let Some(item) = item {
                        if !deferred.iter().any(|d| d.id == item.id) {
                            deferred.push((*item).clone());
                        }
                        ledger.record(
                            AuditEventType::Deferral,
                            &decision.output_id,
                            true,
                            json!({ "item_id": item.id, "priority": item.priority }),
                        );
                    }
                }
                DecisionKind::Expired { .. } => {
                    session.counters.expired += 1;
                }
            }
        }
    }

    /// Pause between batches scaled by what the last batch looked like:
    /// slow batches and failing batches push the pause up.
    fn adaptive_pause(&self, results: &[ProcessingResult]) -> Duration {
        if results.is_empty() {
            return Duration::from_millis(self.config.pause_base_ms);
        }
        let avg_ms = results.iter().map(|r| r.duration_ms).sum::<u64>() / results.len() as u64;
        let failures = results.iter().filter(|r| !r.success).count() as u64;
        let pause =
            self.config.pause_base_ms + avg_ms / 2 + failures * self.config.pause_base_ms;
        Duration::from_millis(pause.min(self.config.pause_max_ms))
    }
}
