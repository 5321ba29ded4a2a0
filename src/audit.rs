use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use console::Style;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::store::PersistenceStore;

/// What happened, as recorded in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditEventType {
    SessionStarted,
    SessionCompleted,
    /// An upstream read (account detail or context fetch).
    DataAccess,
    Generation,
    ApprovalRequested,
    ApprovalDecision,
    /// A write-type event: an approved recommendation being executed.
    Execution,
    Deferral,
    Error,
    CycleHalted,
}

impl AuditEventType {
    fn is_write(self) -> bool {
        matches!(self, AuditEventType::Execution)
    }
}

/// One immutable ledger entry. Never updated or deleted within a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub entry_id: String,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: AuditEventType,
    pub entity_id: String,
    pub success: bool,
    pub details: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationSeverity {
    Critical,
    High,
    Medium,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceViolation {
    pub severity: ViolationSeverity,
    pub category: String,
    pub message: String,
}

/// Result of a compliance pass. Violations are data, not errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceReport {
    pub compliant: bool,
    pub violations: Vec<ComplianceViolation>,
    pub entries_checked: usize,
    pub checked_at: DateTime<Utc>,
}

/// Detail keys that must never appear with a raw value.
const SENSITIVE_KEYS: &[&str] = &["ssn", "password", "credit_card", "api_key", "secret", "token"];
const REDACTED: &str = "[REDACTED]";

/// Append-only, session-scoped operation log.
///
/// Recording never fails the caller: a durable-write failure is surfaced as
/// an operations alert and counted, while the in-memory ledger keeps the
/// entry. Each successful persist also stores a SHA-256 checksum of the
/// serialized entries for later tamper detection.
pub struct AuditLedger {
    session_id: String,
    store: Arc<dyn PersistenceStore>,
    entries: Mutex<Vec<AuditEntry>>,
    write_failures: Mutex<u64>,
    expected_data_accesses: Mutex<u64>,
}

impl AuditLedger {
    pub fn new(session_id: impl Into<String>, store: Arc<dyn PersistenceStore>) -> Self {
        Self {
            session_id: session_id.into(),
            store,
            entries: Mutex::new(Vec::new()),
            write_failures: Mutex::new(0),
            expected_data_accesses: Mutex::new(0),
        }
    }

    fn entries_key(&self) -> String {
        format!("audit/{}/entries", self.session_id)
    }

    fn checksum_key(&self) -> String {
        format!("audit/{}/checksum", self.session_id)
    }

    /// Append an entry and persist the ledger.
    ///
    /// A failed durable write is alerted and counted but does not abort the
    /// in-flight operation; business logic never stops for audit plumbing.
    pub fn record(
        &self,
        event_type: AuditEventType,
        entity_id: impl Into<String>,
        success: bool,
        details: Value,
    ) -> AuditEntry {
        let entry = AuditEntry {
            entry_id: Uuid::new_v4().to_string(),
            session_id: self.session_id.clone(),
            timestamp: Utc::now(),
            event_type,
            entity_id: entity_id.into(),
            success,
            details,
        };

        let serialized = {
            let mut entries = self.entries.lock().unwrap();
            entries.push(entry.clone());
            serde_json::to_vec(&*entries)
        };

        match serialized {
            Ok(blob) => {
                let checksum = hex::encode(Sha256::digest(&blob));
                let write = self
                    .store
                    .write(&self.entries_key(), &blob)
                    .and_then(|_| self.store.write(&self.checksum_key(), checksum.as_bytes()));
                if let Err(err) = write {
                    self.alert_write_failure(&err.to_string());
                }
            }
            Err(err) => self.alert_write_failure(&err.to_string()),
        }

        entry
    }

    fn alert_write_failure(&self, reason: &str) {
        *self.write_failures.lock().unwrap() += 1;
        let red = Style::new().red().bold();
        eprintln!(
            "{} audit write failed for session {}: {reason}",
            red.apply_to("⚠ OPS ALERT"),
            self.session_id
        );
    }

    /// Count of durable writes that failed. Non-zero values are an
    /// operations signal, not a business failure.
    pub fn write_failures(&self) -> u64 {
        *self.write_failures.lock().unwrap()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }

    /// Snapshot of the full entry list, in append order.
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().unwrap().clone()
    }

    /// Tell the ledger how many data accesses the cycle is expected to make,
    /// so the compliance pass can compare observed against expected.
    pub fn add_expected_data_accesses(&self, n: u64) {
        *self.expected_data_accesses.lock().unwrap() += n;
    }

    /// Ordered entries touching one recommendation, across
    /// fetch → context → decision → execution.
    pub fn build_trail(&self, recommendation_id: &str) -> Vec<AuditEntry> {
        let entries = self.entries.lock().unwrap();
        entries
            .iter()
            .filter(|entry| {
                entry.entity_id == recommendation_id
                    || entry.details["recommendation_id"] == Value::from(recommendation_id)
                    || entry.details["recommendation_ids"]
                        .as_array()
                        .is_some_and(|ids| ids.iter().any(|v| v.as_str() == Some(recommendation_id)))
            })
            .cloned()
            .collect()
    }

    /// Run the four compliance checks and return a structured report.
    /// Violations are returned, never raised.
    pub fn verify_compliance(&self) -> ComplianceReport {
        let entries = self.entries.lock().unwrap().clone();
        let mut violations = Vec::new();

        // (a) Every write-type event needs a preceding approval decision
        // for the same entity.
        for (index, entry) in entries.iter().enumerate() {
            if !entry.event_type.is_write() {
                continue;
            }
            let approved_before = entries[..index].iter().any(|earlier| {
                earlier.event_type == AuditEventType::ApprovalDecision
                    && earlier.entity_id == entry.entity_id
            });
            if !approved_before {
                violations.push(ComplianceViolation {
                    severity: ViolationSeverity::Critical,
                    category: "unapproved_write".into(),
                    message: format!(
                        "execution for {} has no preceding approval decision",
                        entry.entity_id
                    ),
                });
            }
        }

        // (b) No unredacted sensitive fields anywhere in entry details.
        for entry in &entries {
            scan_sensitive(&entry.details, &entry.entry_id, &mut violations);
        }

        // (c) Observed data-access count within 10% of expected.
        let expected = *self.expected_data_accesses.lock().unwrap();
        if expected > 0 {
            let observed = entries
                .iter()
                .filter(|e| e.event_type == AuditEventType::DataAccess)
                .count() as u64;
            let tolerance = expected / 10;
            if observed.abs_diff(expected) > tolerance {
                violations.push(ComplianceViolation {
                    severity: ViolationSeverity::Medium,
                    category: "access_count_drift".into(),
                    message: format!(
                        "observed {observed} data accesses, expected {expected} (±{tolerance})"
                    ),
                });
            }
        }

        // (d) Stored blob still matches its stored checksum.
        match (
            self.store.read(&self.entries_key()),
            self.store.read(&self.checksum_key()),
        ) {
            (Ok(Some(blob)), Ok(Some(stored))) => {
                let recomputed = hex::encode(Sha256::digest(&blob));
                if recomputed.as_bytes() != stored.as_slice() {
                    violations.push(ComplianceViolation {
                        severity: ViolationSeverity::Critical,
                        category: "checksum_mismatch".into(),
                        message: "persisted ledger does not match its stored checksum".into(),
                    });
                }
            }
            (Ok(None), Ok(None)) if entries.is_empty() => {}
            _ => violations.push(ComplianceViolation {
                severity: ViolationSeverity::Critical,
                category: "checksum_missing".into(),
                message: "persisted ledger or checksum could not be read".into(),
            }),
        }

        ComplianceReport {
            compliant: violations.is_empty(),
            violations,
            entries_checked: entries.len(),
            checked_at: Utc::now(),
        }
    }
}

/// Recursive scan for denylisted keys carrying raw values.
fn scan_sensitive(value: &Value, entry_id: &str, violations: &mut Vec<ComplianceViolation>) {
    match value {
        Value::Object(map) => {
            for (key, nested) in map {
                let lower = key.to_lowercase();
                let sensitive = SENSITIVE_KEYS.iter().any(|k| lower.contains(k));
                if sensitive && nested != &Value::from(REDACTED) {
                    violations.push(ComplianceViolation {
                        severity: ViolationSeverity::High,
                        category: "unredacted_field".into(),
                        message: format!("entry {entry_id} carries unredacted field '{key}'"),
                    });
                }
                scan_sensitive(nested, entry_id, violations);
            }
        }
        Value::Array(items) => {
            for item in items {
                scan_sensitive(item, entry_id, violations);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CadenceError;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn ledger() -> (AuditLedger, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (AuditLedger::new("sess-1", store.clone()), store)
    }

    #[test]
    fn record_appends_and_persists() {
        let (ledger, store) = ledger();
        ledger.record(AuditEventType::SessionStarted, "sess-1", true, json!({}));
        ledger.record(
            AuditEventType::DataAccess,
            "acct-1",
            true,
            json!({"stage": "detail"}),
        );

        assert_eq!(ledger.len(), 2);
        let blob = store.read("audit/sess-1/entries").unwrap().unwrap();
        let persisted: Vec<AuditEntry> = serde_json::from_slice(&blob).unwrap();
        assert_eq!(persisted.len(), 2);
        assert!(store.read("audit/sess-1/checksum").unwrap().is_some());
    }

    struct BrokenStore;

    impl PersistenceStore for BrokenStore {
        fn write(&self, _key: &str, _blob: &[u8]) -> Result<(), CadenceError> {
            Err(CadenceError::Store("disk full".into()))
        }
        fn read(&self, _key: &str) -> Result<Option<Vec<u8>>, CadenceError> {
            Ok(None)
        }
        fn list(&self, _prefix: &str) -> Result<Vec<String>, CadenceError> {
            Ok(Vec::new())
        }
        fn delete(&self, _key: &str) -> Result<(), CadenceError> {
            Ok(())
        }
    }

    #[test]
    fn store_failure_is_alerted_not_fatal() {
        let ledger = AuditLedger::new("sess-1", Arc::new(BrokenStore));
        let entry = ledger.record(AuditEventType::DataAccess, "acct-1", true, json!({}));

        // The entry exists in memory and the failure was counted.
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.write_failures(), 1);
        assert_eq!(entry.entity_id, "acct-1");
    }

    #[test]
    fn build_trail_returns_ordered_entries_for_one_output() {
        let (ledger, _) = ledger();
        ledger.record(
            AuditEventType::DataAccess,
            "acct-1",
            true,
            json!({"recommendation_id": "rec-1"}),
        );
        ledger.record(AuditEventType::DataAccess, "acct-2", true, json!({}));
        ledger.record(AuditEventType::ApprovalDecision, "rec-1", true, json!({}));
        ledger.record(AuditEventType::Execution, "rec-1", true, json!({}));

        let trail = ledger.build_trail("rec-1");
        assert_eq!(trail.len(), 3);
        assert_eq!(trail[0].event_type, AuditEventType::DataAccess);
        assert_eq!(trail[1].event_type, AuditEventType::ApprovalDecision);
        assert_eq!(trail[2].event_type, AuditEventType::Execution);
    }

    #[test]
    fn compliant_ledger_passes_all_checks() {
        let (ledger, _) = ledger();
        ledger.add_expected_data_accesses(2);
        ledger.record(AuditEventType::DataAccess, "acct-1", true, json!({}));
        ledger.record(AuditEventType::DataAccess, "acct-1", true, json!({}));
        ledger.record(AuditEventType::ApprovalDecision, "rec-1", true, json!({}));
        ledger.record(AuditEventType::Execution, "rec-1", true, json!({}));

        let report = ledger.verify_compliance();
        assert!(report.compliant, "violations: {:?}", report.violations);
        assert_eq!(report.entries_checked, 4);
    }

    #[test]
    fn write_without_approval_is_critical() {
        let (ledger, _) = ledger();
        ledger.record(AuditEventType::Execution, "rec-1", true, json!({}));

        let report = ledger.verify_compliance();
        assert!(!report.compliant);
        let violation = &report.violations[0];
        assert_eq!(violation.severity, ViolationSeverity::Critical);
        assert_eq!(violation.category, "unapproved_write");
    }

    #[test]
    fn approval_after_write_does_not_count() {
        let (ledger, _) = ledger();
        ledger.record(AuditEventType::Execution, "rec-1", true, json!({}));
        ledger.record(AuditEventType::ApprovalDecision, "rec-1", true, json!({}));

        let report = ledger.verify_compliance();
        assert!(report
            .violations
            .iter()
            .any(|v| v.category == "unapproved_write"));
    }

    #[test]
    fn unredacted_sensitive_field_is_flagged() {
        let (ledger, _) = ledger();
        ledger.record(
            AuditEventType::DataAccess,
            "acct-1",
            true,
            json!({"contact": {"ssn": "123-45-6789"}}),
        );

        let report = ledger.verify_compliance();
        let violation = report
            .violations
            .iter()
            .find(|v| v.category == "unredacted_field")
            .expect("expected a redaction violation");
        assert_eq!(violation.severity, ViolationSeverity::High);
    }

    #[test]
    fn redacted_sensitive_field_is_fine() {
        let (ledger, _) = ledger();
        ledger.record(
            AuditEventType::DataAccess,
            "acct-1",
            true,
            json!({"ssn": "[REDACTED]"}),
        );

        let report = ledger.verify_compliance();
        assert!(report
            .violations
            .iter()
            .all(|v| v.category != "unredacted_field"));
    }

    #[test]
    fn access_count_drift_beyond_tolerance_is_flagged() {
        let (ledger, _) = ledger();
        ledger.add_expected_data_accesses(20);
        for _ in 0..15 {
            ledger.record(AuditEventType::DataAccess, "acct", true, json!({}));
        }

        let report = ledger.verify_compliance();
        let violation = report
            .violations
            .iter()
            .find(|v| v.category == "access_count_drift")
            .expect("expected drift violation");
        assert_eq!(violation.severity, ViolationSeverity::Medium);
    }

    #[test]
    fn access_count_within_tolerance_passes() {
        let (ledger, _) = ledger();
        ledger.add_expected_data_accesses(20);
        for _ in 0..19 {
            ledger.record(AuditEventType::DataAccess, "acct", true, json!({}));
        }

        let report = ledger.verify_compliance();
        assert!(report
            .violations
            .iter()
            .all(|v| v.category != "access_count_drift"));
    }

    #[test]
    fn tampered_persisted_ledger_fails_checksum() {
        let (ledger, store) = ledger();
        ledger.record(AuditEventType::DataAccess, "acct-1", true, json!({}));

        // Tamper with the persisted blob after the fact.
        let mut blob = store.read("audit/sess-1/entries").unwrap().unwrap();
        blob.extend_from_slice(b" ");
        store.write("audit/sess-1/entries", &blob).unwrap();

        let report = ledger.verify_compliance();
        let violation = report
            .violations
            .iter()
            .find(|v| v.category == "checksum_mismatch")
            .expect("expected checksum violation");
        assert_eq!(violation.severity, ViolationSeverity::Critical);
    }
}
