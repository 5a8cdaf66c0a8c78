//! # Resilience Engine Facade
//!
//! The single entry point composing classification, strategy selection,
//! retry bookkeeping, circuit breaking, fallbacks, degradation control and
//! the error history. One engine instance is created per process and passed
//! to whoever reports failures; tests create their own throwaway instances.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use futures::future::BoxFuture;
use metrics::counter;
use serde::Serialize;
use serde_json::json;
use tracing::debug;

use crate::circuit_breaker::{
    BreakerStatus, CircuitBreakerConfig, CircuitBreakerManager, CircuitState,
};
use crate::classifier;
use crate::degradation::{DegradationController, DegradationState};
use crate::fallback::{FallbackDisposition, FallbackRegistry};
use crate::logging;
use crate::monitoring::{calculate_system_health, ErrorHistory, ErrorStatistics, SystemHealth};
use crate::retry::{RetryConfig, RetryExecutor};
use crate::sanitization;
use crate::strategy::{select_strategy, StrategyInputs};
use crate::types::{
    EngineError, ErrorRecord, ErrorReport, ErrorType, RecoveryResult, RecoveryStrategy, Result,
    Severity,
};

/// Top-level engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Bounded history capacity
    pub history_capacity: usize,
    /// Window used for dashboard statistics
    pub statistics_window: Duration,
    /// How many recent errors the dashboard shows
    pub recent_errors_limit: usize,
    /// Circuit breaker policy
    pub breaker: CircuitBreakerConfig,
    /// Retry policy
    pub retry: RetryConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            history_capacity: 1000,
            statistics_window: Duration::from_secs(3600),
            recent_errors_limit: 20,
            breaker: CircuitBreakerConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl TryFrom<config::Config> for EngineConfig {
    type Error = config::ConfigError;

    fn try_from(cfg: config::Config) -> std::result::Result<Self, Self::Error> {
        let mut base = EngineConfig::default();

        if let Ok(capacity) = cfg.get::<usize>("resilience.history_capacity") {
            base.history_capacity = capacity;
        }
        if let Ok(secs) = cfg.get::<u64>("resilience.statistics_window_secs") {
            base.statistics_window = Duration::from_secs(secs);
        }
        if let Ok(limit) = cfg.get::<usize>("resilience.recent_errors_limit") {
            base.recent_errors_limit = limit;
        }
        if let Ok(threshold) = cfg.get::<u32>("resilience.breaker.failure_threshold") {
            base.breaker.failure_threshold = threshold;
        }
        if let Ok(secs) = cfg.get::<u64>("resilience.breaker.cooldown_secs") {
            base.breaker.cooldown = Duration::from_secs(secs);
        }
        if let Ok(max_retries) = cfg.get::<u32>("resilience.retry.max_retries") {
            base.retry.max_retries = max_retries;
        }
        if let Ok(ms) = cfg.get::<u64>("resilience.retry.base_delay_ms") {
            base.retry.base_delay = Duration::from_millis(ms);
        }
        if let Ok(jitter) = cfg.get::<f64>("resilience.retry.jitter_factor") {
            base.retry.jitter_factor = jitter;
        }

        Ok(base)
    }
}

/// Options for [`ResilienceEngine::execute_with_retry`]
#[derive(Debug, Default)]
pub struct RetryOptions {
    /// Overrides the engine's configured retry budget for this call
    pub max_retries: Option<u32>,
    /// Context attached to the report if the operation exhausts its budget
    pub context: serde_json::Map<String, serde_json::Value>,
}

/// Read-only aggregate for the operator dashboard, recomputed on demand
#[derive(Debug, Clone, Serialize)]
pub struct RecoveryDashboard {
    pub statistics: ErrorStatistics,
    pub circuit_states: Vec<BreakerStatus>,
    pub system_health: SystemHealth,
    pub degradation: DegradationState,
    pub recent_errors: Vec<ErrorRecord>,
    pub recovery_recommendations: Vec<String>,
}

/// A failed transaction, carrying the recovery outcome and the *uninvoked*
/// rollback.
///
/// Rollback stays a separate, explicit call so partial-failure semantics
/// remain caller-controlled.
pub struct TransactionFailure {
    /// The recovery outcome for the reported failure
    pub recovery: RecoveryResult,
    rollback: Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>,
}

impl TransactionFailure {
    /// Invokes the rollback the caller supplied to `execute_transaction`
    pub async fn rollback(self) -> Result<()> {
        (self.rollback)().await
    }
}

impl fmt::Debug for TransactionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionFailure")
            .field("recovery", &self.recovery)
            .finish_non_exhaustive()
    }
}

/// The process-wide resilience engine
pub struct ResilienceEngine {
    config: EngineConfig,
    breakers: CircuitBreakerManager,
    retries: RetryExecutor,
    fallbacks: FallbackRegistry,
    degradation: DegradationController,
    history: ErrorHistory,
}

impl ResilienceEngine {
    /// Creates an engine with the given configuration
    pub fn new(config: EngineConfig) -> Self {
        Self {
            breakers: CircuitBreakerManager::new(config.breaker.clone()),
            retries: RetryExecutor::new(config.retry.clone()),
            fallbacks: FallbackRegistry::new(),
            degradation: DegradationController::new(),
            history: ErrorHistory::new(config.history_capacity),
            config,
        }
    }

    /// Reports a failure and runs the selected recovery strategy.
    ///
    /// This never fails from the caller's point of view: bad input yields an
    /// UNKNOWN/MEDIUM classification, and internal faults during recovery
    /// are reclassified as UNKNOWN/HIGH and surfaced in the returned result
    /// rather than propagated.
    pub async fn handle_error(
        &self,
        report: impl Into<ErrorReport>,
        context: serde_json::Map<String, serde_json::Value>,
    ) -> RecoveryResult {
        let report = report.into();

        // Redact before anything is stored or logged.
        let mut context = context;
        sanitization::redact_context(&mut context);
        let message = sanitization::sanitize_message(&report.message);

        // Classification examines the message and the underlying error, but
        // caller-asserted type/severity win.
        let signal = match &report.source {
            Some(source) => format!("{} {}", message, source),
            None => message.clone(),
        };
        let (classified_type, classified_severity) = classifier::classify(&signal, &context);
        let error_type = report.error_type.unwrap_or(classified_type);
        let severity = report.severity.unwrap_or(classified_severity);

        let mut record = ErrorRecord::new(error_type, severity, message).with_context(context);
        if let Some(source) = &report.source {
            let rendered = sanitization::sanitize_message(&source.to_string());
            record.context.insert("source_error".into(), json!(rendered));
        }

        logging::log_error_record(&record);
        counter!(
            "resilience.errors_reported",
            1,
            "type" => record.error_type.as_str(),
            "severity" => record.severity.as_str()
        );

        let error_id = record.id;
        let retry_key = record.retry_key();
        let retries_remaining = self.retries.has_budget(&retry_key);
        if !retries_remaining
            && matches!(record.error_type, ErrorType::Network | ErrorType::Timeout)
        {
            // This occurrence is terminal for the retry key; the next report
            // starts fresh.
            self.retries.clear(&retry_key);
        }
        let inputs = StrategyInputs {
            circuit_state: record
                .breaker_key()
                .map(|key| self.breakers.check(key).state)
                .unwrap_or(CircuitState::Closed),
            retries_remaining,
            fallback_registered: record
                .service_type()
                .map(|t| self.fallbacks.is_registered(t))
                .unwrap_or(false),
        };
        let strategy = select_strategy(&record, inputs);
        counter!(
            "resilience.strategy_selected",
            1,
            "strategy" => strategy.as_str()
        );
        debug!(
            error_id = %error_id,
            strategy = %strategy,
            "recovery strategy selected"
        );

        // The record enters the history before execution so the dashboard
        // sees in-flight errors; the result is attached exactly once after.
        self.history.record(record.clone());

        let result = self.execute_strategy(strategy, &record).await;
        self.history.attach_result(error_id, result.clone());
        result
    }

    fn execute_strategy<'a>(
        &'a self,
        strategy: RecoveryStrategy,
        record: &'a ErrorRecord,
    ) -> Pin<Box<dyn Future<Output = RecoveryResult> + Send + 'a>> {
        Box::pin(async move {
        match strategy {
            RecoveryStrategy::UserIntervention => RecoveryResult {
                error_id: record.id,
                strategy,
                can_recover: false,
                details: json!({
                    "action": "user_intervention_required",
                    "severity": record.severity,
                    "error_type": record.error_type,
                }),
            },

            RecoveryStrategy::CircuitBreaker => {
                let key = record.breaker_key().unwrap_or("unknown-service").to_string();
                self.breakers.record_failure(&key);
                let status = self.breakers.check(&key);
                RecoveryResult {
                    error_id: record.id,
                    strategy,
                    can_recover: status.can_proceed,
                    details: json!({
                        "service_key": status.service_key,
                        "state": status.state,
                        "failure_count": status.failure_count,
                        "next_attempt": status.next_attempt,
                    }),
                }
            }

            RecoveryStrategy::Retry => match self.retries.execute_retry(&record.retry_key()) {
                Ok(ticket) => RecoveryResult {
                    error_id: record.id,
                    strategy,
                    can_recover: true,
                    details: json!({
                        "retry_count": ticket.retry_count,
                        "delay_ms": ticket.delay.as_millis() as u64,
                    }),
                },
                Err(error) => RecoveryResult {
                    error_id: record.id,
                    strategy,
                    can_recover: false,
                    details: json!({
                        "reason": "retries_exhausted",
                        "error": error.to_string(),
                    }),
                },
            },

            RecoveryStrategy::Fallback => match self.fallbacks.execute(record).await {
                FallbackDisposition::Executed {
                    service_type,
                    result,
                } => RecoveryResult {
                    error_id: record.id,
                    strategy,
                    can_recover: true,
                    details: json!({
                        "service_type": service_type,
                        "result": result,
                    }),
                },
                FallbackDisposition::NotRegistered => RecoveryResult {
                    error_id: record.id,
                    strategy,
                    can_recover: false,
                    details: json!({ "reason": "no fallback registered" }),
                },
                FallbackDisposition::Failed {
                    service_type,
                    error,
                } => {
                    // A failing fallback is itself a fault inside recovery:
                    // reclassify as UNKNOWN/HIGH and surface it as a new
                    // reported error rather than swallowing it. The nested
                    // report carries no service type, so it cannot re-enter
                    // this path.
                    let nested_report = ErrorReport::new(format!(
                        "fallback for '{}' failed: {}",
                        service_type, error
                    ))
                    .error_type(ErrorType::Unknown)
                    .severity(Severity::High);
                    let mut nested_context = serde_json::Map::new();
                    nested_context.insert("component".into(), json!("fallback_registry"));
                    nested_context.insert("failed_fallback".into(), json!(service_type));

                    let nested: Pin<Box<dyn Future<Output = RecoveryResult> + Send + '_>> =
                        Box::pin(self.handle_error(nested_report, nested_context));
                    let nested_result = nested.await;

                    RecoveryResult {
                        error_id: record.id,
                        strategy,
                        can_recover: false,
                        details: json!({
                            "reason": "fallback failed",
                            "service_type": service_type,
                            "follow_up_error_id": nested_result.error_id,
                        }),
                    }
                }
            },

            RecoveryStrategy::GracefulDegradation => {
                let state = self.degradation.escalate(record.severity);
                RecoveryResult {
                    error_id: record.id,
                    strategy,
                    can_recover: true,
                    details: json!({
                        "level": state.level,
                        "restrictions": state.restrictions,
                    }),
                }
            }
        }
        })
    }

    /// Queries a breaker without reporting anything
    pub fn check_circuit_breaker(&self, service_key: &str) -> BreakerStatus {
        self.breakers.check(service_key)
    }

    /// Runs an operation under circuit breaker protection.
    ///
    /// Fails fast with [`EngineError::CircuitOpen`] while the circuit is
    /// open; otherwise the outcome is recorded against the breaker, so a
    /// successful half-open probe closes it.
    pub async fn execute_protected<F, Fut, T>(&self, service_key: &str, operation: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let status = self.breakers.check(service_key);
        if !status.can_proceed {
            return Err(EngineError::CircuitOpen {
                service_key: service_key.to_string(),
                next_attempt_in: status
                    .next_attempt
                    .and_then(|at| (at - chrono::Utc::now()).to_std().ok()),
            });
        }

        match operation().await {
            Ok(value) => {
                self.breakers.record_success(service_key);
                Ok(value)
            }
            Err(error) => {
                self.breakers.record_failure(service_key);
                Err(error)
            }
        }
    }

    /// Records a successful call against a breaker (e.g. a probe that
    /// worked)
    pub fn record_service_success(&self, service_key: &str) {
        self.breakers.record_success(service_key);
    }

    /// Operator override: forces a breaker back to CLOSED
    pub fn reset_circuit_breaker(&self, service_key: &str) {
        self.breakers.reset(service_key);
    }

    /// Registers the breaker state-change callback
    pub fn on_breaker_state_change<F>(&self, callback: F)
    where
        F: Fn(&str, CircuitState, CircuitState) + Send + Sync + 'static,
    {
        self.breakers.set_state_change_callback(callback);
    }

    /// Registers a fallback operation for a service type
    pub fn register_fallback_service<F, Fut>(&self, service_type: &str, operation: F)
    where
        F: Fn(ErrorRecord) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value>> + Send + 'static,
    {
        self.fallbacks.register(service_type, operation);
    }

    /// Explicitly returns the dashboard to full functionality
    pub fn restore_service(&self) -> DegradationState {
        self.degradation.restore_service()
    }

    /// The current degradation level and feature restrictions
    pub fn degradation_state(&self) -> DegradationState {
        self.degradation.current()
    }

    /// Runs an arbitrary operation with retry protection.
    ///
    /// Exhaustion is reported through the engine (so it shows up in the
    /// history and statistics) and then returned to the caller.
    pub async fn execute_with_retry<F, Fut, T>(
        &self,
        operation_name: &str,
        options: RetryOptions,
        operation: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        match self
            .retries
            .execute_with_retry(operation_name, options.max_retries, operation)
            .await
        {
            Ok(value) => Ok(value),
            Err(error) => {
                let mut context = options.context;
                context.insert("operation".into(), json!(operation_name));
                context.insert("retry_exhausted".into(), json!(true));
                self.handle_error(ErrorReport::new(error.to_string()), context)
                    .await;
                Err(error)
            }
        }
    }

    /// Runs a transaction-shaped operation; on failure the error is
    /// reported and the rollback is handed back *uninvoked*.
    pub async fn execute_transaction<T, F, Fut, R, RFut>(
        &self,
        operation: F,
        rollback: R,
        context: serde_json::Map<String, serde_json::Value>,
    ) -> std::result::Result<T, TransactionFailure>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
        R: FnOnce() -> RFut + Send + 'static,
        RFut: Future<Output = Result<()>> + Send + 'static,
    {
        match operation().await {
            Ok(value) => Ok(value),
            Err(error) => {
                let recovery = self
                    .handle_error(ErrorReport::new(error.to_string()), context)
                    .await;
                Err(TransactionFailure {
                    recovery,
                    rollback: Box::new(move || Box::pin(rollback())),
                })
            }
        }
    }

    /// Builds the operator dashboard read model; recomputed on demand,
    /// never cached.
    pub fn dashboard(&self) -> RecoveryDashboard {
        let statistics = self.history.statistics(self.config.statistics_window);
        let circuit_states = self.breakers.snapshot();
        let degraded_circuits = circuit_states
            .iter()
            .filter(|s| s.state != CircuitState::Closed)
            .count();
        let system_health = calculate_system_health(&statistics, degraded_circuits);
        let degradation = self.degradation.current();
        let recent_errors = self.history.recent(self.config.recent_errors_limit);
        let recovery_recommendations = self.recommendations(
            &statistics,
            &circuit_states,
            &degradation,
        );

        RecoveryDashboard {
            statistics,
            circuit_states,
            system_health,
            degradation,
            recent_errors,
            recovery_recommendations,
        }
    }

    fn recommendations(
        &self,
        statistics: &ErrorStatistics,
        circuit_states: &[BreakerStatus],
        degradation: &DegradationState,
    ) -> Vec<String> {
        let mut recommendations = Vec::new();

        for status in circuit_states.iter().filter(|s| s.state != CircuitState::Closed) {
            recommendations.push(format!(
                "Circuit for '{}' is {}; verify the dependency and reset the breaker once it is healthy.",
                status.service_key, status.state
            ));
        }

        let critical = statistics
            .by_severity
            .get(&Severity::Critical)
            .copied()
            .unwrap_or(0);
        if critical > 0 {
            recommendations.push(format!(
                "{} critical error(s) in the window require manual review.",
                critical
            ));
        }

        if statistics.total > 0 && statistics.recovery_success_rate < 0.5 {
            if let Some(top) = statistics.top_errors.first() {
                recommendations.push(format!(
                    "Automated recovery is succeeding for less than half of recent errors; investigate the top offender: \"{}\".",
                    top.message
                ));
            }
        }

        if degradation.level != crate::degradation::DegradationLevel::None {
            recommendations.push(format!(
                "Dashboard is running at {} degradation; restore service after verifying dependencies.",
                degradation.level
            ));
        }

        if recommendations.is_empty() {
            recommendations.push("System operating normally; no action required.".to_string());
        }

        recommendations
    }
}

impl Default for ResilienceEngine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::degradation::DegradationLevel;
    use crate::monitoring::HealthBand;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn ctx(pairs: &[(&str, serde_json::Value)]) -> serde_json::Map<String, serde_json::Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[tokio::test]
    async fn test_critical_errors_always_reach_a_human() {
        let engine = ResilienceEngine::default();

        let result = engine
            .handle_error(
                ErrorReport::new("ledger write failed").severity(Severity::Critical),
                serde_json::Map::new(),
            )
            .await;

        assert_eq!(result.strategy, RecoveryStrategy::UserIntervention);
        assert!(!result.can_recover);
    }

    #[tokio::test]
    async fn test_network_error_schedules_retry_with_backoff() {
        let engine = ResilienceEngine::default();
        let context = ctx(&[("component", json!("BalanceCard"))]);

        let result = engine
            .handle_error("network connection refused", context.clone())
            .await;
        assert_eq!(result.strategy, RecoveryStrategy::Retry);
        assert!(result.can_recover);
        assert_eq!(result.details["retry_count"], json!(1));
        assert_eq!(result.details["delay_ms"], json!(1000));

        let result = engine
            .handle_error("network connection refused", context)
            .await;
        assert_eq!(result.details["retry_count"], json!(2));
        assert_eq!(result.details["delay_ms"], json!(2000));
    }

    #[tokio::test]
    async fn test_retry_exhaustion_is_terminal() {
        let engine = ResilienceEngine::default();
        let context = ctx(&[("component", json!("QuoteBoard"))]);

        for _ in 0..3 {
            let result = engine
                .handle_error("request timed out", context.clone())
                .await;
            assert!(result.can_recover);
        }

        // Budget spent: the selector no longer picks RETRY for this report.
        let result = engine
            .handle_error("request timed out", context.clone())
            .await;
        assert_ne!(result.strategy, RecoveryStrategy::Retry);

        // The terminal report cleared the key; the next occurrence starts
        // fresh at attempt 1.
        let result = engine.handle_error("request timed out", context).await;
        assert_eq!(result.strategy, RecoveryStrategy::Retry);
        assert_eq!(result.details["retry_count"], json!(1));
    }

    #[tokio::test]
    async fn test_fallback_round_trip() {
        let engine = ResilienceEngine::default();
        let calls = Arc::new(AtomicU32::new(0));

        let seen = calls.clone();
        engine.register_fallback_service("api", move |_record| {
            let seen = seen.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(json!({"source": "cache"}))
            }
        });

        let context = ctx(&[("service_type", json!("api"))]);
        let result = engine.handle_error("card declined", context).await;

        assert_eq!(result.strategy, RecoveryStrategy::Fallback);
        assert!(result.can_recover);
        assert_eq!(result.details["service_type"], json!("api"));
        assert_eq!(result.details["result"], json!({"source": "cache"}));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fallback_failure_is_re_reported() {
        let engine = ResilienceEngine::default();
        engine.register_fallback_service("api", |_record| async {
            Err(EngineError::operation("cached_read", "cache empty"))
        });

        let context = ctx(&[("service_type", json!("api"))]);
        let result = engine.handle_error("card declined", context).await;

        assert_eq!(result.strategy, RecoveryStrategy::Fallback);
        assert!(!result.can_recover);
        assert_eq!(result.details["reason"], json!("fallback failed"));
        assert!(result.details["follow_up_error_id"].is_string());

        // The follow-up error landed in the history as UNKNOWN/HIGH.
        let dashboard = engine.dashboard();
        let follow_up = dashboard
            .recent_errors
            .iter()
            .find(|r| r.error_type == ErrorType::Unknown && r.severity == Severity::High)
            .expect("follow-up error should be recorded");
        assert!(follow_up.message.contains("fallback"));
    }

    #[test_log::test(tokio::test)]
    async fn test_service_unavailable_trips_breaker_and_surfaces_state() {
        let engine = ResilienceEngine::default();
        let context = ctx(&[("service_key", json!("payments-api"))]);

        for i in 0..5 {
            let result = engine
                .handle_error("503 service unavailable", context.clone())
                .await;
            assert_eq!(result.strategy, RecoveryStrategy::CircuitBreaker);
            let expected_open = i >= 4;
            assert_eq!(!result.can_recover, expected_open, "report {}", i);
        }

        let status = engine.check_circuit_breaker("payments-api");
        assert_eq!(status.state, CircuitState::Open);
        assert!(!status.can_proceed);

        engine.reset_circuit_breaker("payments-api");
        assert_eq!(
            engine.check_circuit_breaker("payments-api").state,
            CircuitState::Closed
        );
    }

    #[tokio::test]
    async fn test_execute_protected_fails_fast_when_open() {
        let engine = ResilienceEngine::default();

        for _ in 0..5 {
            let _ = engine
                .execute_protected("fx-api", || async {
                    Err::<(), _>(EngineError::operation("fx_rates", "connection refused"))
                })
                .await;
        }
        assert_eq!(
            engine.check_circuit_breaker("fx-api").state,
            CircuitState::Open
        );

        // The operation must not run while the circuit is open.
        let ran = Arc::new(AtomicU32::new(0));
        let seen = ran.clone();
        let outcome = engine
            .execute_protected("fx-api", move || {
                let seen = seen.clone();
                async move {
                    seen.fetch_add(1, Ordering::SeqCst);
                    Ok::<(), EngineError>(())
                }
            })
            .await;
        assert!(matches!(outcome, Err(EngineError::CircuitOpen { .. })));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_degradation_path_and_restore() {
        let engine = ResilienceEngine::default();

        let result = engine
            .handle_error(
                ErrorReport::new("widget render crashed").severity(Severity::High),
                serde_json::Map::new(),
            )
            .await;

        assert_eq!(result.strategy, RecoveryStrategy::GracefulDegradation);
        assert!(result.can_recover);
        assert_eq!(result.details["level"], json!("MODERATE"));
        assert_eq!(
            engine.degradation_state().level,
            DegradationLevel::Moderate
        );

        let state = engine.restore_service();
        assert_eq!(state.level, DegradationLevel::None);
    }

    #[tokio::test]
    async fn test_sensitive_context_never_reaches_history() {
        let engine = ResilienceEngine::default();
        let context = ctx(&[
            ("component", json!("PaymentForm")),
            ("card_number", json!("4111111111111111")),
        ]);

        engine.handle_error("payment failed", context).await;

        let recent = engine.dashboard().recent_errors;
        let stored = recent.first().unwrap();
        assert_eq!(stored.context["card_number"], json!("[REDACTED]"));
        assert_eq!(stored.context["component"], json!("PaymentForm"));
    }

    #[tokio::test]
    async fn test_recovery_result_attached_to_stored_record() {
        let engine = ResilienceEngine::default();
        let result = engine
            .handle_error("network connection refused", serde_json::Map::new())
            .await;

        let recent = engine.dashboard().recent_errors;
        let stored = recent.iter().find(|r| r.id == result.error_id).unwrap();
        let attached = stored.recovery_result.as_ref().unwrap();
        assert_eq!(attached.strategy, result.strategy);
        assert_eq!(attached.can_recover, result.can_recover);
    }

    #[tokio::test]
    async fn test_execute_with_retry_reports_exhaustion() {
        let engine = ResilienceEngine::new(EngineConfig {
            retry: RetryConfig {
                base_delay: Duration::from_millis(1),
                jitter_factor: 0.0,
                ..RetryConfig::default()
            },
            ..EngineConfig::default()
        });

        let outcome: Result<()> = engine
            .execute_with_retry("sync_positions", RetryOptions::default(), || async {
                Err(EngineError::operation("sync_positions", "backend down"))
            })
            .await;

        assert!(matches!(outcome, Err(EngineError::RetriesExhausted { .. })));
        // The exhaustion is visible in the history.
        assert_eq!(engine.dashboard().statistics.total, 1);
    }

    #[tokio::test]
    async fn test_transaction_failure_does_not_auto_rollback() {
        let engine = ResilienceEngine::default();
        let rolled_back = Arc::new(AtomicU32::new(0));

        let seen = rolled_back.clone();
        let outcome: std::result::Result<(), TransactionFailure> = engine
            .execute_transaction(
                || async { Err(EngineError::operation("transfer", "debit failed")) },
                move || {
                    let seen = seen.clone();
                    async move {
                        seen.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                },
                serde_json::Map::new(),
            )
            .await;

        let failure = outcome.unwrap_err();
        // Reported, but rollback was NOT invoked.
        assert_eq!(rolled_back.load(Ordering::SeqCst), 0);

        // Rollback is the caller's explicit choice.
        failure.rollback().await.unwrap();
        assert_eq!(rolled_back.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dashboard_read_model() {
        let engine = ResilienceEngine::default();

        engine
            .handle_error(
                ErrorReport::new("ledger corruption detected").severity(Severity::Critical),
                serde_json::Map::new(),
            )
            .await;
        for _ in 0..5 {
            engine
                .handle_error(
                    "503 service unavailable",
                    ctx(&[("service_key", json!("quotes-api"))]),
                )
                .await;
        }

        let dashboard = engine.dashboard();
        assert_eq!(dashboard.statistics.total, 6);
        assert_eq!(dashboard.circuit_states.len(), 1);
        assert_eq!(dashboard.circuit_states[0].state, CircuitState::Open);
        assert!(dashboard.system_health.score < 100);
        assert!(dashboard
            .recovery_recommendations
            .iter()
            .any(|r| r.contains("quotes-api")));
        assert!(dashboard
            .recovery_recommendations
            .iter()
            .any(|r| r.contains("critical error")));
    }

    #[tokio::test]
    async fn test_caller_asserted_type_wins_over_classification() {
        let engine = ResilienceEngine::default();

        let result = engine
            .handle_error(
                ErrorReport::new("network connection refused")
                    .error_type(ErrorType::Authentication),
                serde_json::Map::new(),
            )
            .await;

        // AUTHENTICATION short-circuits to a human even though the message
        // would classify as NETWORK.
        assert_eq!(result.strategy, RecoveryStrategy::UserIntervention);
    }

    #[tokio::test]
    async fn test_handle_error_is_total_for_junk_input() {
        let engine = ResilienceEngine::default();
        let result = engine.handle_error("", serde_json::Map::new()).await;
        assert_eq!(result.strategy, RecoveryStrategy::GracefulDegradation);

        let stored = engine.dashboard().recent_errors;
        assert_eq!(stored.first().unwrap().error_type, ErrorType::Unknown);
        assert_eq!(stored.first().unwrap().severity, Severity::Medium);
    }

    #[test]
    fn test_engine_config_from_config_crate() {
        let cfg = config::Config::builder()
            .set_override("resilience.history_capacity", 50i64)
            .unwrap()
            .set_override("resilience.breaker.failure_threshold", 2i64)
            .unwrap()
            .set_override("resilience.retry.max_retries", 1i64)
            .unwrap()
            .build()
            .unwrap();

        let engine_config = EngineConfig::try_from(cfg).unwrap();
        assert_eq!(engine_config.history_capacity, 50);
        assert_eq!(engine_config.breaker.failure_threshold, 2);
        assert_eq!(engine_config.retry.max_retries, 1);
        // Untouched keys keep their defaults.
        assert_eq!(engine_config.recent_errors_limit, 20);
    }

    #[tokio::test]
    async fn test_health_band_reflects_breaker_state() {
        let engine = ResilienceEngine::default();
        let healthy = engine.dashboard();
        assert_eq!(healthy.system_health.band, HealthBand::Excellent);

        for _ in 0..5 {
            engine
                .handle_error(
                    "503 service unavailable",
                    ctx(&[("service_key", json!("fx-api"))]),
                )
                .await;
        }

        let degraded = engine.dashboard();
        assert!(degraded.system_health.score < healthy.system_health.score);
    }
}
