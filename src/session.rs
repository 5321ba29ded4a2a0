use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use console::Style;
use serde::{Deserialize, Serialize};

use crate::cache::CacheStats;
use crate::error::CadenceError;
use crate::pipeline::ProcessingResult;
use crate::store::PersistenceStore;

/// Lifecycle status of one review cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionStatus {
    Running,
    Completed,
    Failed,
    PartialSuccess,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Running => write!(f, "RUNNING"),
            SessionStatus::Completed => write!(f, "COMPLETED"),
            SessionStatus::Failed => write!(f, "FAILED"),
            SessionStatus::PartialSuccess => write!(f, "PARTIAL_SUCCESS"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionCounters {
    pub processed: u64,
    pub failed: u64,
    pub recommendations: u64,
    pub approved: u64,
    pub modified: u64,
    pub rejected: u64,
    pub deferred: u64,
    pub expired: u64,
    pub batches: u64,
}

/// Aggregates computed at finalize time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionMetrics {
    pub duration_ms: u64,
    pub avg_item_ms: u64,
    pub success_rate: f64,
    pub cache: CacheStats,
}

/// Aggregate state of one cycle. Mutated only by the dispatcher between
/// batches, persisted on every mutation and once more at finalize.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub counters: SessionCounters,
    pub errors: Vec<String>,
    pub metrics: SessionMetrics,
    // Running sum backing avg_item_ms.
    total_item_ms: u64,
}

impl SessionState {
    fn new() -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            status: SessionStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            counters: SessionCounters::default(),
            errors: Vec::new(),
            metrics: SessionMetrics::default(),
            total_item_ms: 0,
        }
    }

    /// Fold one item outcome into the counters and error list.
    pub fn record_result(&mut self, result: &ProcessingResult) {
        self.total_item_ms += result.duration_ms;
        if result.success {
            self.counters.processed += 1;
            self.counters.recommendations += result.output.len() as u64;
        } else {
            self.counters.failed += 1;
            if let Some(error) = &result.error {
                self.errors.push(format!("{}: {error}", result.item_id));
            }
        }
    }

    /// Error rate over everything attempted so far.
    pub fn error_rate(&self) -> f64 {
        let total = self.counters.processed + self.counters.failed;
        if total == 0 {
            0.0
        } else {
            self.counters.failed as f64 / total as f64
        }
    }

    /// The natural final status from the counters: all clean → Completed,
    /// some failures → PartialSuccess.
    pub fn outcome_from_counters(&self) -> SessionStatus {
        if self.counters.failed == 0 {
            SessionStatus::Completed
        } else {
            SessionStatus::PartialSuccess
        }
    }
}

/// Creates, persists, restores, and retires cycle state.
///
/// Writes go to the primary store (failure is fatal) and, when configured, a
/// secondary store (failure is logged and swallowed). Restores walk fast
/// cache → primary → secondary, back-filling the faster tiers on a hit.
pub struct SessionManager {
    primary: Arc<dyn PersistenceStore>,
    secondary: Option<Arc<dyn PersistenceStore>>,
    fast_cache: Mutex<HashMap<String, SessionState>>,
    active: Mutex<Option<String>>,
    archive_on_complete: bool,
}

fn live_key(id: &str) -> String {
    format!("sessions/{id}")
}

fn archive_key(id: &str) -> String {
    format!("archive/sessions/{id}")
}

impl SessionManager {
    pub fn new(primary: Arc<dyn PersistenceStore>) -> Self {
        Self {
            primary,
            secondary: None,
            fast_cache: Mutex::new(HashMap::new()),
            active: Mutex::new(None),
            archive_on_complete: false,
        }
    }

    pub fn with_secondary(mut self, secondary: Arc<dyn PersistenceStore>) -> Self {
        self.secondary = Some(secondary);
        self
    }

    pub fn with_archive_on_complete(mut self, archive: bool) -> Self {
        self.archive_on_complete = archive;
        self
    }

    /// Start a new cycle. Only one Running session may exist per process.
    pub fn create(&self) -> Result<SessionState, CadenceError> {
        {
            let active = self.active.lock().unwrap();
            if let Some(id) = active.as_ref() {
                return Err(CadenceError::SessionActive(id.clone()));
            }
        }
        let state = SessionState::new();
        self.persist(&state)?;
        *self.active.lock().unwrap() = Some(state.session_id.clone());
        Ok(state)
    }

    /// Write the state to the primary store, the fast cache, and (best
    /// effort) the secondary store.
    pub fn persist(&self, state: &SessionState) -> Result<(), CadenceError> {
        let blob = serde_json::to_vec(state)?;
        self.primary.write(&live_key(&state.session_id), &blob)?;

        if let Some(secondary) = &self.secondary {
            if let Err(err) = secondary.write(&live_key(&state.session_id), &blob) {
                let yellow = Style::new().yellow();
                eprintln!(
                    "{} secondary store write failed for session {}: {err}",
                    yellow.apply_to("⚠"),
                    state.session_id
                );
            }
        }

        self.fast_cache
            .lock()
            .unwrap()
            .insert(state.session_id.clone(), state.clone());
        Ok(())
    }

    /// Look a session up in fast cache → primary → secondary, populating the
    /// faster tiers on a slower-tier hit.
    pub fn restore(&self, id: &str) -> Result<Option<SessionState>, CadenceError> {
        if let Some(state) = self.fast_cache.lock().unwrap().get(id) {
            return Ok(Some(state.clone()));
        }

        if let Some(blob) = self.primary.read(&live_key(id))? {
            let state: SessionState = serde_json::from_slice(&blob)?;
            self.fast_cache
                .lock()
                .unwrap()
                .insert(id.to_string(), state.clone());
            return Ok(Some(state));
        }

        if let Some(secondary) = &self.secondary {
            if let Some(blob) = secondary.read(&live_key(id))? {
                let state: SessionState = serde_json::from_slice(&blob)?;
                // Back-fill the tiers the primary lookup missed.
                self.primary.write(&live_key(id), &blob)?;
                self.fast_cache
                    .lock()
                    .unwrap()
                    .insert(id.to_string(), state.clone());
                return Ok(Some(state));
            }
        }

        Ok(None)
    }

    /// Finalize the cycle: set the outcome, compute aggregate metrics,
    /// persist, and archive when configured.
    pub fn complete(
        &self,
        state: &mut SessionState,
        outcome: SessionStatus,
        cache_stats: CacheStats,
    ) -> Result<(), CadenceError> {
        let now = Utc::now();
        state.status = outcome;
        state.completed_at = Some(now);

        let items = state.counters.processed + state.counters.failed;
        state.metrics = SessionMetrics {
            duration_ms: (now - state.started_at).num_milliseconds().max(0) as u64,
            avg_item_ms: if items == 0 {
                0
            } else {
                state.total_item_ms / items
            },
            success_rate: if items == 0 {
                1.0
            } else {
                state.counters.processed as f64 / items as f64
            },
            cache: cache_stats,
        };

        self.persist(state)?;

        if self.archive_on_complete {
            let blob = serde_json::to_vec(state)?;
            self.primary.write(&archive_key(&state.session_id), &blob)?;
            self.primary.delete(&live_key(&state.session_id))?;
        }

        let mut active = self.active.lock().unwrap();
        if active.as_deref() == Some(state.session_id.as_str()) {
            *active = None;
        }
        Ok(())
    }

    /// The most recently started persisted session, for status reporting.
    pub fn latest(&self) -> Result<Option<SessionState>, CadenceError> {
        let mut newest: Option<SessionState> = None;
        for key in self.primary.list("sessions/")? {
            let Some(blob) = self.primary.read(&key)? else {
                continue;
            };
            let Ok(state) = serde_json::from_slice::<SessionState>(&blob) else {
                continue;
            };
            if newest
                .as_ref()
                .map(|n| state.started_at > n.started_at)
                .unwrap_or(true)
            {
                newest = Some(state);
            }
        }
        Ok(newest)
    }

    /// Retire sessions older than the cutoff: archive them when configured,
    /// delete them otherwise. Individual failures are skipped, not fatal.
    /// Returns how many sessions were examined and acted on.
    pub fn cleanup(&self, retention_days: i64) -> Result<usize, CadenceError> {
        let cutoff = Utc::now() - Duration::days(retention_days);
        let mut processed = 0;

        for key in self.primary.list("sessions/")? {
            let Ok(Some(blob)) = self.primary.read(&key) else {
                continue;
            };
            let Ok(state) = serde_json::from_slice::<SessionState>(&blob) else {
                // Unparseable blobs are skipped, not fatal.
                continue;
            };
            if state.status == SessionStatus::Running || state.started_at >= cutoff {
                continue;
            }

            let retired = if self.archive_on_complete {
                self.primary
                    .write(&archive_key(&state.session_id), &blob)
                    .and_then(|_| self.primary.delete(&key))
            } else {
                self.primary.delete(&key)
            };
            match retired {
                Ok(()) => processed += 1,
                Err(err) => {
                    let yellow = Style::new().yellow();
                    eprintln!(
                        "{} cleanup skipped session {}: {err}",
                        yellow.apply_to("⚠"),
                        state.session_id
                    );
                }
            }
            self.fast_cache.lock().unwrap().remove(&state.session_id);
        }

        Ok(processed)
    }
}
