use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::time::sleep;

use super::channel::{DeliveryStatus, NotificationChannel};
use super::types::{ApprovalDecision, ApprovalRequest, ApprovalStatus, DecisionKind};
use crate::audit::{AuditEventType, AuditLedger};
use crate::pipeline::Recommendation;

/// The terminal result of one approval round: the request in its final
/// state plus exactly one decision per item.
#[derive(Debug, Clone)]
pub struct ApprovalOutcome {
    pub request: ApprovalRequest,
    pub decisions: Vec<ApprovalDecision>,
}

/// Gates generated outputs behind an asynchronous human decision.
///
/// One request per batch of outputs: Pending → Completed when the channel
/// reports decisions before the deadline, Pending → Expired otherwise. The
/// wait is a cooperative poll loop: re-checks spaced by `poll_interval`,
/// never sleeping past `expires_at`, no thread parked per request. Every
/// transition lands in the audit ledger.
pub struct ApprovalGate {
    channel: NotificationChannel,
    window: chrono::Duration,
    poll_interval: Duration,
}

impl ApprovalGate {
    pub fn new(channel: NotificationChannel, window_ms: u64, poll_interval_ms: u64) -> Self {
        Self {
            channel,
            window: chrono::Duration::milliseconds(window_ms as i64),
            poll_interval: Duration::from_millis(poll_interval_ms),
        }
    }

    /// Submit a batch of outputs for review and wait for its terminal state.
    pub async fn submit(
        &self,
        outputs: &[Recommendation],
        ledger: &AuditLedger,
    ) -> ApprovalOutcome {
        let items: Vec<String> = outputs.iter().map(|o| o.id.clone()).collect();
        let request = ApprovalRequest::new(items, Utc::now() + self.window);

        ledger.record(
            AuditEventType::ApprovalRequested,
            &request.request_id,
            true,
            json!({
                "items": request.items,
                "expires_at": request.expires_at,
            }),
        );

        let delivery_id = match self.channel.send(&request, outputs).await {
            Ok(id) => id,
            Err(err) => {
                ledger.record(
                    AuditEventType::Error,
                    &request.request_id,
                    false,
                    json!({"error": err.to_string(), "phase": "send"}),
                );
                return self.expire(
                    request,
                    Vec::new(),
                    ledger,
                    format!("notification delivery failed: {err}"),
                );
            }
        };

        loop {
            if Utc::now() >= request.expires_at {
                return self.expire(
                    request,
                    Vec::new(),
                    ledger,
                    "approval window elapsed with no decision".to_string(),
                );
            }

            match self.channel.check_status(&delivery_id).await {
                Ok(DeliveryStatus::Decided(decisions)) => {
                    return self.complete(request, decisions, ledger);
                }
                Ok(DeliveryStatus::Pending) => {}
                Err(err) => {
                    // A poll failure is not a decision; keep polling until
                    // the window closes.
                    ledger.record(
                        AuditEventType::Error,
                        &request.request_id,
                        false,
                        json!({"error": err.to_string(), "phase": "poll"}),
                    );
                }
            }

            let remaining = (request.expires_at - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO);
            sleep(remaining.min(self.poll_interval)).await;
        }
    }

    fn complete(
        &self,
        mut request: ApprovalRequest,
        decisions: Vec<ApprovalDecision>,
        ledger: &AuditLedger,
    ) -> ApprovalOutcome {
        // Keep only decisions for items actually in the request, then give
        // every undecided item a synthetic terminal decision.
        let mut decisions: Vec<ApprovalDecision> = decisions
            .into_iter()
            .filter(|d| request.items.contains(&d.output_id))
            .collect();
        for item in &request.items {
            if !decisions.iter().any(|d| &d.output_id == item) {
                decisions.push(ApprovalDecision::synthetic_expired(
                    item.clone(),
                    "no decision received for this output",
                ));
            }
        }
        request.status = ApprovalStatus::Completed;
        self.record_decisions(&request, &decisions, ledger);
        ApprovalOutcome { request, decisions }
    }

    fn expire(
        &self,
        mut request: ApprovalRequest,
        mut decisions: Vec<ApprovalDecision>,
        ledger: &AuditLedger,
        reason: String,
    ) -> ApprovalOutcome {
        for item in &request.items {
            if !decisions.iter().any(|d| &d.output_id == item) {
                decisions.push(ApprovalDecision::synthetic_expired(item.clone(), &reason));
            }
        }
        request.status = ApprovalStatus::Expired;
        self.record_decisions(&request, &decisions, ledger);
        ApprovalOutcome { request, decisions }
    }

    fn record_decisions(
        &self,
        request: &ApprovalRequest,
        decisions: &[ApprovalDecision],
        ledger: &AuditLedger,
    ) {
        for decision in decisions {
            let expired = matches!(decision.decision, DecisionKind::Expired { .. });
            ledger.record(
                AuditEventType::ApprovalDecision,
                &decision.output_id,
                !expired,
                json!({
                    "request_id": request.request_id,
                    "kind": decision.decision.label(),
                    "decided_by": decision.decided_by,
                }),
            );
        }
    }
}
