use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Lifecycle of one approval request. Terminal states are final: a request
/// is never mutated after completing or expiring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApprovalStatus {
    Pending,
    Completed,
    Expired,
}

/// A batch of recommendation ids awaiting a human decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub request_id: String,
    pub items: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: ApprovalStatus,
}

impl ApprovalRequest {
    pub fn new(items: Vec<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            items,
            created_at: Utc::now(),
            expires_at,
            status: ApprovalStatus::Pending,
        }
    }
}

/// What the reviewer decided for one output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DecisionKind {
    /// Execute as generated.
    Approved,
    /// Execute with reviewer-supplied overrides.
    Modified { overrides: Value },
    /// Log and discard.
    Rejected { reason: String },
    /// Return to the queue for a later cycle, priority unchanged.
    Deferred,
    /// Synthetic terminal decision for outputs nobody decided in time.
    Expired { reason: String },
}

impl DecisionKind {
    pub fn label(&self) -> &'static str {
        match self {
            DecisionKind::Approved => "approved",
            DecisionKind::Modified { .. } => "modified",
            DecisionKind::Rejected { .. } => "rejected",
            DecisionKind::Deferred => "deferred",
            DecisionKind::Expired { .. } => "expired",
        }
    }
}

/// One immutable decision for one output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub output_id: String,
    pub decision: DecisionKind,
    pub decided_at: DateTime<Utc>,
    pub decided_by: String,
}

impl ApprovalDecision {
    pub fn new(output_id: impl Into<String>, decision: DecisionKind, decided_by: impl Into<String>) -> Self {
        Self {
            output_id: output_id.into(),
            decision,
            decided_at: Utc::now(),
            decided_by: decided_by.into(),
        }
    }

    /// The system-generated decision assigned when a request expires before
    /// anyone decided this output.
    pub fn synthetic_expired(output_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(
            output_id,
            DecisionKind::Expired {
                reason: reason.into(),
            },
            "system",
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_request_starts_pending() {
        let request = ApprovalRequest::new(
            vec!["rec-1".into(), "rec-2".into()],
            Utc::now() + chrono::Duration::minutes(30),
        );
        assert_eq!(request.status, ApprovalStatus::Pending);
        assert_eq!(request.items.len(), 2);
        assert!(request.expires_at > request.created_at);
    }

    #[test]
    fn decision_kind_serializes_with_tag() {
        let decision = DecisionKind::Modified {
            overrides: json!({"summary": "shorter"}),
        };
        let text = serde_json::to_string(&decision).unwrap();
        assert!(text.contains("\"kind\":\"modified\""));

        let parsed: DecisionKind = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, decision);
    }

    #[test]
    fn synthetic_expired_is_attributed_to_system() {
        let decision = ApprovalDecision::synthetic_expired("rec-1", "window elapsed");
        assert_eq!(decision.decided_by, "system");
        assert_eq!(decision.decision.label(), "expired");
    }

    #[test]
    fn decision_roundtrip() {
        let decision = ApprovalDecision::new("rec-9", DecisionKind::Deferred, "ana");
        let json = serde_json::to_string(&decision).unwrap();
        let parsed: ApprovalDecision = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, decision);
    }
}
