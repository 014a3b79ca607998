//! Retry logic with exponential backoff
//!
//! The budget for a retried operation is the total time spent *waiting*
//! between attempts, not the number of attempts. The wait before retry `n`
//! (zero-based) is `base_wait * 2^n`, capped at whatever remains of
//! `max_wait`. Once the budget is spent no further attempt is made.
//!
//! # Example
//!
//! ```no_run
//! use sp_reports::config::RetryConfig;
//! use sp_reports::retry::{IsRetryable, retry_with_backoff};
//! use sp_reports::types::Stage;
//!
//! #[derive(Debug)]
//! enum MyError {
//!     Transient,
//!     Permanent,
//! }
//!
//! impl std::fmt::Display for MyError {
//!     fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
//!         write!(f, "{:?}", self)
//!     }
//! }
//!
//! impl IsRetryable for MyError {
//!     fn is_retryable(&self) -> bool {
//!         matches!(self, MyError::Transient)
//!     }
//! }
//!
//! # async fn example() {
//! let config = RetryConfig::default();
//! let result = retry_with_backoff(&config, Stage::Submit, || async {
//!     Ok::<_, MyError>(42)
//! })
//! .await;
//! # }
//! ```

use crate::config::RetryConfig;
use crate::error::Error;
use crate::types::Stage;
use rand::Rng;
use std::future::Future;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (network errors, non-success statuses, a report that
/// is still processing) should return `true`. Permanent failures (bad
/// configuration, a report the API gave up on) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for Error {
    fn is_retryable(&self) -> bool {
        match self {
            // Any transport failure, except a request that could not be built
            Error::Network(e) => !e.is_builder(),
            // The reports API answers non-success statuses for throttling and
            // transient outages alike
            Error::HttpStatus { .. } => true,
            // See PipelineConfig::malformed_token_is_fatal for the token endpoint
            Error::MalformedResponse { .. } => true,
            Error::Config { .. } => false,
            Error::AuthenticationFailed { .. } => false,
            Error::DuplicateReportName(_) | Error::EmptyReportName | Error::EmptyBatch => false,
        }
    }
}

/// Wait bookkeeping for one retried operation
///
/// Created fresh for each operation and discarded when it resolves.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BackoffState {
    total_waited: Duration,
    attempt: u32,
}

impl BackoffState {
    /// A state with nothing waited yet
    pub fn new() -> Self {
        Self::default()
    }

    /// Total time waited so far
    pub fn total_waited(&self) -> Duration {
        self.total_waited
    }

    /// Number of waits taken so far
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Budget left before the operation is declared exhausted
    pub fn remaining(&self, config: &RetryConfig) -> Duration {
        config.max_wait.saturating_sub(self.total_waited)
    }

    /// Whether the budget is spent
    pub fn is_exhausted(&self, config: &RetryConfig) -> bool {
        self.remaining(config).is_zero()
    }

    /// The next wait, or `None` once the budget is spent
    pub fn next_wait(&self, config: &RetryConfig) -> Option<Duration> {
        let remaining = self.remaining(config);
        if remaining.is_zero() {
            return None;
        }
        let factor = 2u32.checked_pow(self.attempt).unwrap_or(u32::MAX);
        Some(config.base_wait.saturating_mul(factor).min(remaining))
    }

    /// Account for a completed wait
    pub fn record_wait(&mut self, waited: Duration) {
        self.total_waited = self.total_waited.saturating_add(waited);
        self.attempt = self.attempt.saturating_add(1);
    }
}

/// Why a retried operation gave up
#[derive(Debug, thiserror::Error)]
pub enum RetryError<E>
where
    E: std::fmt::Display + std::fmt::Debug,
{
    /// The operation reported a failure that retrying cannot fix
    #[error("{0}")]
    Permanent(E),

    /// The wait budget ran out before the operation succeeded
    #[error("retry budget exhausted after {:.1}s ({attempts} attempts)", .waited.as_secs_f64())]
    BudgetExhausted {
        /// Total time spent waiting
        waited: Duration,
        /// Number of times the operation was invoked
        attempts: u32,
        /// The last attempt's error; `None` when no attempt was made
        last_error: Option<E>,
    },
}

impl<E> RetryError<E>
where
    E: std::fmt::Display + std::fmt::Debug,
{
    /// Description of the underlying failure
    pub fn last_error_message(&self) -> String {
        match self {
            RetryError::Permanent(e) => e.to_string(),
            RetryError::BudgetExhausted {
                last_error: Some(e),
                ..
            } => e.to_string(),
            RetryError::BudgetExhausted {
                last_error: None, ..
            } => "no attempt was made".to_string(),
        }
    }
}

/// Execute an async operation with exponential backoff retry logic
///
/// # Arguments
///
/// * `config` - Wait budget (base wait, max total wait, jitter)
/// * `stage` - Label used in log records
/// * `operation` - Async closure that performs one attempt
///
/// # Returns
///
/// The first success, [`RetryError::Permanent`] for a non-retryable error, or
/// [`RetryError::BudgetExhausted`] once the total wait reaches `max_wait`.
/// A first-attempt success never sleeps.
pub async fn retry_with_backoff<F, Fut, T, E>(
    config: &RetryConfig,
    stage: Stage,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: IsRetryable + std::fmt::Display + std::fmt::Debug,
{
    let mut state = BackoffState::new();
    let mut attempts = 0u32;
    let mut last_error = None;

    loop {
        if state.is_exhausted(config) {
            return Err(exhausted(stage, &state, attempts, last_error));
        }

        attempts += 1;
        match operation().await {
            Ok(result) => {
                if attempts > 1 {
                    tracing::info!(
                        stage = %stage,
                        attempts,
                        waited_secs = state.total_waited().as_secs_f64(),
                        "Operation succeeded after retry"
                    );
                }
                return Ok(result);
            }
            Err(e) if e.is_retryable() => {
                let Some(wait) = state.next_wait(config) else {
                    return Err(exhausted(stage, &state, attempts, Some(e)));
                };
                let wait = if config.jitter {
                    add_jitter(wait).min(state.remaining(config))
                } else {
                    wait
                };

                tracing::warn!(
                    stage = %stage,
                    error = %e,
                    attempt = attempts,
                    waited_secs = state.total_waited().as_secs_f64(),
                    wait_secs = wait.as_secs_f64(),
                    "Operation failed, retrying"
                );

                tokio::time::sleep(wait).await;
                state.record_wait(wait);
                last_error = Some(e);
            }
            Err(e) => {
                tracing::error!(
                    stage = %stage,
                    error = %e,
                    "Operation failed with non-retryable error"
                );
                return Err(RetryError::Permanent(e));
            }
        }
    }
}

fn exhausted<E>(
    stage: Stage,
    state: &BackoffState,
    attempts: u32,
    last_error: Option<E>,
) -> RetryError<E>
where
    E: std::fmt::Display + std::fmt::Debug,
{
    tracing::error!(
        stage = %stage,
        attempts,
        waited_secs = state.total_waited().as_secs_f64(),
        error = last_error.as_ref().map(|e| e.to_string()),
        "Retry budget exhausted"
    );
    RetryError::BudgetExhausted {
        waited: state.total_waited(),
        attempts,
        last_error,
    }
}

/// Add random jitter to a delay to prevent thundering herd
///
/// Jitter is uniformly distributed between 0% and 100% of the delay.
/// This means the actual delay will be between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    Duration::from_secs_f64(delay.as_secs_f64() * (1.0 + jitter_factor))
}
