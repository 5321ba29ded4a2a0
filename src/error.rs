use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CadenceError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("No persisted session found. Run `cadence cycle` first.")]
    NoSession,

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("A session is already running: {0}")]
    SessionActive(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Classifies an upstream failure for retry policy decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorClass {
    /// Network hiccup, timeout, 5xx. Safe to retry with backoff.
    Transient,
    /// 429/503 or rate-limit text. Retry after the hinted or a longer pause.
    RateLimited,
    /// 401/403. One credential refresh, one retry, then give up.
    Authentication,
    /// 400/404/422. Retrying cannot help.
    Permanent,
    /// Anything unclassifiable, treated like Transient.
    Unknown,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorClass::Transient => write!(f, "transient"),
            ErrorClass::RateLimited => write!(f, "rate_limited"),
            ErrorClass::Authentication => write!(f, "authentication"),
            ErrorClass::Permanent => write!(f, "permanent"),
            ErrorClass::Unknown => write!(f, "unknown"),
        }
    }
}

/// A failure reported by one of the upstream collaborators.
///
/// Collaborators surface whatever their transport gives them; classification
/// into an [`ErrorClass`] happens here so the retry policy has one place to
/// inspect status codes and message text.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum UpstreamError {
    /// HTTP-shaped failure with an optional Retry-After hint in milliseconds.
    #[error("upstream returned status {status}: {message}")]
    Http {
        status: u16,
        message: String,
        retry_after_ms: Option<u64>,
    },

    /// The call did not complete within its deadline.
    #[error("upstream request timed out")]
    Timeout,

    /// Failure below HTTP (DNS, connection refused, reset).
    #[error("network error: {0}")]
    Network(String),

    /// Free-text failure from a non-HTTP collaborator.
    #[error("upstream error: {0}")]
    Other(String),
}

impl UpstreamError {
    /// Map this failure onto the retry taxonomy.
    ///
    /// Status codes win over message text; message text is only consulted
    /// for [`UpstreamError::Other`], where "rate limit" and timeout wording
    /// are the recognizable signals.
    pub fn classify(&self) -> ErrorClass {
        match self {
            UpstreamError::Timeout | UpstreamError::Network(_) => ErrorClass::Transient,
            UpstreamError::Http { status, .. } => match status {
                429 | 503 => ErrorClass::RateLimited,
                401 | 403 => ErrorClass::Authentication,
                400 | 404 | 422 => ErrorClass::Permanent,
                500..=599 => ErrorClass::Transient,
                _ => ErrorClass::Unknown,
            },
            UpstreamError::Other(message) => {
                let lower = message.to_lowercase();
                if lower.contains("rate limit") || lower.contains("too many requests") {
                    ErrorClass::RateLimited
                } else if lower.contains("timeout") || lower.contains("timed out") {
                    ErrorClass::Transient
                } else {
                    ErrorClass::Unknown
                }
            }
        }
    }

    /// Explicit retry-after hint, when the upstream provided one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            UpstreamError::Http {
                retry_after_ms: Some(ms),
                ..
            } => Some(Duration::from_millis(*ms)),
            _ => None,
        }
    }
}

/// Outcome of a protected pipeline call.
///
/// `CircuitOpen` and `RetryExhausted` are expected states, returned so the
/// dispatcher handles them in typed control flow rather than catching them.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    #[error("{operation} failed: {source}")]
    Upstream {
        operation: String,
        #[source]
        source: UpstreamError,
    },

    /// The breaker for this operation refused the call without executing it.
    #[error("circuit open for {operation}")]
    CircuitOpen { operation: String },

    /// All retry attempts failed; carries the last underlying error.
    #[error("retries exhausted for {operation} after {attempts} attempts: {last}")]
    RetryExhausted {
        operation: String,
        attempts: u32,
        last: Box<PipelineError>,
    },
}

impl PipelineError {
    pub fn upstream(operation: &str, source: UpstreamError) -> Self {
        PipelineError::Upstream {
            operation: operation.to_string(),
            source,
        }
    }

    /// The error class driving retry policy, if this failure carries one.
    pub fn class(&self) -> Option<ErrorClass> {
        match self {
            PipelineError::Upstream { source, .. } => Some(source.classify()),
            PipelineError::CircuitOpen { .. } => None,
            PipelineError::RetryExhausted { last, .. } => last.class(),
        }
    }
}
