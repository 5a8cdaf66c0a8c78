//! # Retry Executor
//!
//! Exponential-backoff bookkeeping keyed per logical error occurrence, plus
//! the caller-facing wrapper that actually sleeps between attempts.
//!
//! The executor's role for reported errors is policy, not execution: it
//! increments the attempt counter and returns the delay the caller should
//! wait before retrying the underlying operation. Delay computation is pure,
//! which keeps the schedule deterministic under test; only
//! [`RetryExecutor::execute_with_retry`] performs the wait, and that is the
//! caller's runtime sleeping, not an engine-owned timer.

use std::collections::HashMap;
use std::future::Future;
use std::sync::RwLock;
use std::time::Duration;

use metrics::counter;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::types::{EngineError, Result};

/// Configuration for retry policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retries per key before the failure is terminal
    pub max_retries: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Multiplier applied per attempt
    pub backoff_factor: f64,
    /// Jitter ratio (0.0 - 1.0) applied only when the wrapper sleeps
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            backoff_factor: 2.0,
            jitter_factor: 0.1,
        }
    }
}

/// One granted retry: the attempt number and the delay to wait before it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryTicket {
    /// 1-based attempt number
    pub retry_count: u32,
    /// How long the caller should wait before re-invoking the operation
    pub delay: Duration,
}

/// Keyed retry bookkeeping
pub struct RetryExecutor {
    config: RetryConfig,
    attempts: RwLock<HashMap<String, u32>>,
}

impl RetryExecutor {
    /// Creates an executor with the given policy
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            attempts: RwLock::new(HashMap::new()),
        }
    }

    /// Grants or denies the next retry for a key.
    ///
    /// Each call increments the key's attempt counter in a single atomic
    /// step, so concurrent reports under the same key never lose updates.
    /// Exceeding `max_retries` is terminal: the key's state is cleared so
    /// the next report starts fresh, and an error is returned instead of a
    /// ticket.
    pub fn execute_retry(&self, retry_key: &str) -> Result<RetryTicket> {
        let mut attempts = self.attempts.write().unwrap();
        let count = attempts.entry(retry_key.to_string()).or_insert(0);
        *count += 1;

        if *count > self.config.max_retries {
            let attempts_made = self.config.max_retries;
            attempts.remove(retry_key);
            warn!(
                retry_key = %retry_key,
                max_retries = %attempts_made,
                "retry budget exhausted, failure is terminal"
            );
            counter!("resilience.retries_exhausted", 1);
            return Err(EngineError::RetriesExhausted {
                operation: retry_key.to_string(),
                attempts: attempts_made,
                last_error: "retry budget exhausted".to_string(),
            });
        }

        let ticket = RetryTicket {
            retry_count: *count,
            delay: self.delay_for_attempt(*count),
        };
        debug!(
            retry_key = %retry_key,
            attempt = %ticket.retry_count,
            delay_ms = %ticket.delay.as_millis(),
            "retry scheduled"
        );
        Ok(ticket)
    }

    /// Pure exponential backoff: `base * factor^(attempt-1)`, no cap beyond
    /// the attempt bound itself.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        self.config
            .base_delay
            .mul_f64(self.config.backoff_factor.powi(exponent))
    }

    /// Retries left for a key
    pub fn remaining(&self, retry_key: &str) -> u32 {
        let attempts = self.attempts.read().unwrap();
        let used = attempts.get(retry_key).copied().unwrap_or(0);
        self.config.max_retries.saturating_sub(used)
    }

    /// True if the key still has retry budget
    pub fn has_budget(&self, retry_key: &str) -> bool {
        self.remaining(retry_key) > 0
    }

    /// Clears the attempt counter for a key
    pub fn clear(&self, retry_key: &str) {
        self.attempts.write().unwrap().remove(retry_key);
    }

    /// Runs an operation, retrying failed attempts with backoff and jitter
    /// until it succeeds or the budget (the configured `max_retries`, or the
    /// override) is spent.
    ///
    /// This wrapper owns its own attempt counter rather than the keyed map;
    /// it is for protecting arbitrary caller operations, not for reported
    /// errors.
    pub async fn execute_with_retry<F, Fut, T>(
        &self,
        operation_name: &str,
        max_retries: Option<u32>,
        mut operation: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let budget = max_retries.unwrap_or(self.config.max_retries);
        let mut attempt: u32 = 0;

        loop {
            match operation().await {
                Ok(value) => {
                    if attempt > 0 {
                        info!(
                            operation = %operation_name,
                            attempt = %attempt,
                            "operation succeeded after retries"
                        );
                    }
                    return Ok(value);
                }
                Err(error) => {
                    attempt += 1;
                    if attempt > budget {
                        warn!(
                            operation = %operation_name,
                            attempts = %budget,
                            error = %error,
                            "giving up after retries"
                        );
                        counter!("resilience.retries_exhausted", 1);
                        return Err(EngineError::RetriesExhausted {
                            operation: operation_name.to_string(),
                            attempts: budget,
                            last_error: error.to_string(),
                        });
                    }

                    let delay = self.jittered(self.delay_for_attempt(attempt));
                    debug!(
                        operation = %operation_name,
                        attempt = %attempt,
                        delay_ms = %delay.as_millis(),
                        error = %error,
                        "retrying after error"
                    );
                    sleep(delay).await;
                }
            }
        }
    }

    // Jitter avoids a thundering herd when many widgets retry at once.
    fn jittered(&self, delay: Duration) -> Duration {
        if self.config.jitter_factor <= 0.0 {
            return delay;
        }
        let jitter = rand::thread_rng().gen_range(0.0..self.config.jitter_factor);
        delay.mul_f64(1.0 + jitter)
    }
}
