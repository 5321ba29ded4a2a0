use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;

use crate::error::{ErrorClass, PipelineError};

/// How the delay between attempts grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackoffStrategy {
    /// Same delay every attempt.
    Fixed,
    /// attempt × base.
    Linear,
    /// base × multiplier^(attempt-1).
    Exponential,
    /// Exponential plus uniform random jitter up to 25% of the value.
    ExponentialWithJitter,
}

/// Retry budget and backoff shape for protected operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempt budget (first call included).
    pub max_retries: u32,
    /// Base delay in milliseconds.
    pub base_delay_ms: u64,
    /// Growth factor for the exponential strategies.
    pub multiplier: f64,
    /// Ceiling applied to every computed delay.
    pub max_delay_ms: u64,
    pub strategy: BackoffStrategy,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            multiplier: 2.0,
            max_delay_ms: 30_000,
            strategy: BackoffStrategy::ExponentialWithJitter,
        }
    }
}

impl RetryPolicy {
    /// Delay in milliseconds after the given (1-based) failed attempt,
    /// capped at `max_delay_ms`.
    pub fn delay_for_attempt(&self, attempt: u32) -> u64 {
        let attempt = attempt.max(1);
        let raw = match self.strategy {
            BackoffStrategy::Fixed => self.base_delay_ms as f64,
            BackoffStrategy::Linear => (self.base_delay_ms * attempt as u64) as f64,
            BackoffStrategy::Exponential => {
                self.base_delay_ms as f64 * self.multiplier.powi(attempt as i32 - 1)
            }
            BackoffStrategy::ExponentialWithJitter => {
                let exp = self.base_delay_ms as f64 * self.multiplier.powi(attempt as i32 - 1);
                exp + rand::thread_rng().gen_range(0.0..=exp * 0.25)
            }
        };
        (raw as u64).min(self.max_delay_ms)
    }
}

/// Hook invoked once when an operation fails with an authentication error,
/// giving the caller a chance to refresh credentials before the single
/// allowed retry.
pub type CredentialRefresh = Arc<dyn Fn() + Send + Sync>;

/// Applies the classified retry policy around any fallible async operation.
///
/// Policy per [`ErrorClass`]:
/// - `Transient` / `Unknown`: retry up to the budget with backoff.
/// - `RateLimited`: honor the upstream retry-after hint when present,
///   otherwise wait twice the backoff delay; same attempt budget.
/// - `Authentication`: one credential refresh, one retry, then give up.
/// - `Permanent`: fail immediately.
///
/// `CircuitOpen` failures carry no class and are returned untouched: the
/// breaker already decided this operation should not run.
pub struct RetryExecutor {
    policy: RetryPolicy,
    on_credential_refresh: Option<CredentialRefresh>,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            on_credential_refresh: None,
        }
    }

    pub fn with_credential_refresh(mut self, hook: CredentialRefresh) -> Self {
        self.on_credential_refresh = Some(hook);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `op` until it succeeds, its error class forbids another attempt,
    /// or the attempt budget runs out. Exhaustion returns
    /// [`PipelineError::RetryExhausted`] wrapping the last error.
    pub async fn execute<T, F, Fut>(
        &self,
        operation: &str,
        mut op: F,
    ) -> Result<T, PipelineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, PipelineError>>,
    {
        let mut attempt: u32 = 0;
        let mut auth_refreshed = false;

        loop {
            attempt += 1;
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            match err.class() {
                // Breaker refusal: nothing was executed, nothing to retry.
                None => return Err(err),
                Some(ErrorClass::Permanent) => return Err(err),
                Some(ErrorClass::Authentication) => {
                    if auth_refreshed {
                        return Err(err);
                    }
                    auth_refreshed = true;
                    if let Some(hook) = &self.on_credential_refresh {
                        hook();
                    }
                    // The single post-refresh retry runs even if the budget
                    // is already spent.
                    continue;
                }
                Some(ErrorClass::RateLimited) => {
                    if attempt >= self.policy.max_retries {
                        return Err(exhausted(operation, attempt, err));
                    }
                    let hinted = match &err {
                        PipelineError::Upstream { source, .. } => source.retry_after(),
                        _ => None,
                    };
                    let delay = hinted.unwrap_or_else(|| {
                        let ms = self
                            .policy
                            .delay_for_attempt(attempt)
                            .saturating_mul(2)
                            .min(self.policy.max_delay_ms);
                        Duration::from_millis(ms)
                    });
                    sleep(delay).await;
                }
                Some(ErrorClass::Transient) | Some(ErrorClass::Unknown) => {
                    if attempt >= self.policy.max_retries {
                        return Err(exhausted(operation, attempt, err));
                    }
                    sleep(Duration::from_millis(self.policy.delay_for_attempt(attempt))).await;
                }
            }
        }
    }
}

fn exhausted(operation: &str, attempts: u32, last: PipelineError) -> PipelineError {
    PipelineError::RetryExhausted {
        operation: operation.to_string(),
        attempts,
        last: Box::new(last),
    }
}
