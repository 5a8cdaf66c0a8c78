//! # Circuit Breaker Manager
//!
//! Per-service-key failure counting and the CLOSED/OPEN/HALF_OPEN state
//! machine that stops the dashboard from hammering a known-down dependency.
//!
//! Cooldowns are evaluated lazily on the next check rather than by a
//! background timer, so the manager owns no tasks and no timers. State
//! transitions are observable through a registered callback so dependent UI
//! can react without polling.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Normal operation, requests allowed
    Closed,
    /// Failing, requests blocked until the cooldown elapses
    Open,
    /// Cooldown elapsed, a single probe is allowed
    HalfOpen,
}

impl CircuitState {
    /// Static label used in logs, metrics and serialized payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Configuration for the breaker state machine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures required to trip the circuit
    pub failure_threshold: u32,
    /// Time to keep the circuit open before allowing a probe
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

/// Caller-facing view of one breaker
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStatus {
    /// The protected dependency this breaker guards
    pub service_key: String,
    /// Current state (after any lazy OPEN → HALF_OPEN transition)
    pub state: CircuitState,
    /// True iff the state is not OPEN
    pub can_proceed: bool,
    /// Consecutive failures since the last reset
    pub failure_count: u32,
    /// When the most recent failure was recorded
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_failure: Option<DateTime<Utc>>,
    /// When the next probe will be allowed, while the circuit is open
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_attempt: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct BreakerEntry {
    state: CircuitState,
    failure_count: u32,
    last_failure: Option<Instant>,
    next_attempt: Option<Instant>,
}

impl BreakerEntry {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure: None,
            next_attempt: None,
        }
    }
}

/// Callback invoked on every observable state transition:
/// `(service_key, old_state, new_state)`.
pub type StateChangeCallback = dyn Fn(&str, CircuitState, CircuitState) + Send + Sync;

/// Tracks one breaker per service key
pub struct CircuitBreakerManager {
    config: CircuitBreakerConfig,
    breakers: RwLock<HashMap<String, BreakerEntry>>,
    on_state_change: RwLock<Option<Arc<StateChangeCallback>>>,
}

impl CircuitBreakerManager {
    /// Creates a manager with the given configuration
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: RwLock::new(HashMap::new()),
            on_state_change: RwLock::new(None),
        }
    }

    /// Registers the state-change callback. The callback runs after the
    /// state mutation completes, outside the breaker lock, so it may call
    /// back into the manager.
    pub fn set_state_change_callback<F>(&self, callback: F)
    where
        F: Fn(&str, CircuitState, CircuitState) + Send + Sync + 'static,
    {
        *self.on_state_change.write().unwrap() = Some(Arc::new(callback));
    }

    /// Checks the breaker for a service key.
    ///
    /// An OPEN breaker whose cooldown has elapsed silently reports
    /// HALF_OPEN, allowing a single probe; repeated checks never touch the
    /// failure counter. Same-key callers are expected to serialize their
    /// probe, matching the engine's cooperative scheduling model.
    pub fn check(&self, service_key: &str) -> BreakerStatus {
        let mut transition = None;
        let status = {
            let mut breakers = self.breakers.write().unwrap();
            match breakers.get_mut(service_key) {
                None => BreakerStatus {
                    service_key: service_key.to_string(),
                    state: CircuitState::Closed,
                    can_proceed: true,
                    failure_count: 0,
                    last_failure: None,
                    next_attempt: None,
                },
                Some(entry) => {
                    if entry.state == CircuitState::Open {
                        let elapsed = entry
                            .next_attempt
                            .map(|at| Instant::now() >= at)
                            .unwrap_or(true);
                        if elapsed {
                            entry.state = CircuitState::HalfOpen;
                            transition = Some((CircuitState::Open, CircuitState::HalfOpen));
                            info!(
                                circuit = %service_key,
                                "circuit HALF_OPEN: cooldown elapsed, allowing one probe"
                            );
                        }
                    }

                    BreakerStatus {
                        service_key: service_key.to_string(),
                        state: entry.state,
                        can_proceed: entry.state != CircuitState::Open,
                        failure_count: entry.failure_count,
                        last_failure: entry.last_failure.map(instant_to_utc),
                        next_attempt: entry.next_attempt.map(instant_to_utc),
                    }
                }
            }
        };

        if let Some((old, new)) = transition {
            self.notify(service_key, old, new);
        }

        status
    }

    /// Records a failed call against a service key.
    ///
    /// Reaching the failure threshold trips the circuit; a failed probe in
    /// HALF_OPEN reopens it with a refreshed cooldown.
    pub fn record_failure(&self, service_key: &str) {
        let transition = {
            let mut breakers = self.breakers.write().unwrap();
            let entry = breakers
                .entry(service_key.to_string())
                .or_insert_with(BreakerEntry::new);

            entry.failure_count += 1;
            entry.last_failure = Some(Instant::now());

            match entry.state {
                CircuitState::Closed => {
                    if entry.failure_count >= self.config.failure_threshold {
                        entry.state = CircuitState::Open;
                        entry.next_attempt = Some(Instant::now() + self.config.cooldown);
                        warn!(
                            circuit = %service_key,
                            failures = %entry.failure_count,
                            cooldown_secs = %self.config.cooldown.as_secs(),
                            "circuit OPEN: failure threshold reached"
                        );
                        Some((CircuitState::Closed, CircuitState::Open))
                    } else {
                        None
                    }
                }
                CircuitState::HalfOpen => {
                    entry.state = CircuitState::Open;
                    entry.next_attempt = Some(Instant::now() + self.config.cooldown);
                    warn!(
                        circuit = %service_key,
                        "circuit REOPENED: probe failed"
                    );
                    Some((CircuitState::HalfOpen, CircuitState::Open))
                }
                CircuitState::Open => None,
            }
        };

        if let Some((old, new)) = transition {
            counter!(
                "resilience.breaker_transitions",
                1,
                "service" => service_key.to_string(),
                "state" => new.as_str()
            );
            self.notify(service_key, old, new);
        }
    }

    /// Records a successful call, resetting the breaker to CLOSED
    pub fn record_success(&self, service_key: &str) {
        let transition = {
            let mut breakers = self.breakers.write().unwrap();
            match breakers.get_mut(service_key) {
                Some(entry) if entry.state != CircuitState::Closed || entry.failure_count > 0 => {
                    let old = entry.state;
                    entry.state = CircuitState::Closed;
                    entry.failure_count = 0;
                    entry.next_attempt = None;
                    if old != CircuitState::Closed {
                        info!(circuit = %service_key, "circuit CLOSED: service recovered");
                        Some((old, CircuitState::Closed))
                    } else {
                        None
                    }
                }
                _ => None,
            }
        };

        if let Some((old, new)) = transition {
            counter!(
                "resilience.breaker_transitions",
                1,
                "service" => service_key.to_string(),
                "state" => new.as_str()
            );
            self.notify(service_key, old, new);
        }
    }

    /// Manual operator override: returns the breaker to CLOSED regardless of
    /// its current state
    pub fn reset(&self, service_key: &str) {
        let transition = {
            let mut breakers = self.breakers.write().unwrap();
            let entry = breakers
                .entry(service_key.to_string())
                .or_insert_with(BreakerEntry::new);
            let old = entry.state;
            entry.state = CircuitState::Closed;
            entry.failure_count = 0;
            entry.next_attempt = None;
            info!(
                circuit = %service_key,
                previous_state = %old,
                "circuit manually reset to CLOSED"
            );
            (old != CircuitState::Closed).then_some((old, CircuitState::Closed))
        };

        if let Some((old, new)) = transition {
            self.notify(service_key, old, new);
        }
    }

    /// Read-only view of every known breaker for the dashboard.
    ///
    /// An OPEN breaker past its cooldown is reported as HALF_OPEN without
    /// mutating it; the transition itself happens on the next `check`.
    pub fn snapshot(&self) -> Vec<BreakerStatus> {
        let breakers = self.breakers.read().unwrap();
        let mut statuses: Vec<BreakerStatus> = breakers
            .iter()
            .map(|(key, entry)| {
                let effective = match entry.state {
                    CircuitState::Open
                        if entry
                            .next_attempt
                            .map(|at| Instant::now() >= at)
                            .unwrap_or(true) =>
                    {
                        CircuitState::HalfOpen
                    }
                    state => state,
                };
                BreakerStatus {
                    service_key: key.clone(),
                    state: effective,
                    can_proceed: effective != CircuitState::Open,
                    failure_count: entry.failure_count,
                    last_failure: entry.last_failure.map(instant_to_utc),
                    next_attempt: entry.next_attempt.map(instant_to_utc),
                }
            })
            .collect();
        statuses.sort_by(|a, b| a.service_key.cmp(&b.service_key));
        statuses
    }

    /// Count of breakers whose effective state is not CLOSED
    pub fn degraded_count(&self) -> usize {
        self.snapshot()
            .iter()
            .filter(|s| s.state != CircuitState::Closed)
            .count()
    }

    fn notify(&self, service_key: &str, old: CircuitState, new: CircuitState) {
        let callback = self.on_state_change.read().unwrap().clone();
        if let Some(callback) = callback {
            callback(service_key, old, new);
        }
    }
}

fn instant_to_utc(at: Instant) -> DateTime<Utc> {
    let now = Instant::now();
    if at > now {
        Utc::now() + chrono::Duration::from_std(at - now).unwrap_or_else(|_| chrono::Duration::zero())
    } else {
        Utc::now() - chrono::Duration::from_std(now - at).unwrap_or_else(|_| chrono::Duration::zero())
    }
}
