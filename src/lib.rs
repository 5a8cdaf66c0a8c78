//! # Error Recovery Engine
//!
//! The error recovery and resilience engine for the Meridian finance
//! dashboard: it classifies failures, decides how to react to them, and
//! protects the rest of the application from cascading breakage.
//!
//! ## Features
//!
//! - Canonical error taxonomy with ordered severities
//! - Pure, total classification of raw failure signals
//! - Per-service circuit breakers with observable state transitions
//! - Exponential-backoff retry bookkeeping and a sleeping retry wrapper
//! - Service-type keyed fallback registry
//! - Monotonic graceful-degradation levels with implied feature flags
//! - Bounded error history, windowed statistics and a system health score
//! - Context sanitization so secrets never reach storage or logs
//!
//! The engine performs none of the protected operations itself, persists no
//! state across restarts, and does not guarantee exactly-once execution;
//! retried operations must be idempotent by contract of the caller.

pub mod circuit_breaker;
pub mod classifier;
pub mod degradation;
pub mod engine;
pub mod fallback;
pub mod logging;
pub mod monitoring;
pub mod retry;
pub mod sanitization;
pub mod strategy;
pub mod types;

// Re-export commonly used types
pub use circuit_breaker::{BreakerStatus, CircuitBreakerConfig, CircuitState};
pub use degradation::{DegradationLevel, DegradationState, FeatureRestrictions};
pub use engine::{
    EngineConfig, RecoveryDashboard, ResilienceEngine, RetryOptions, TransactionFailure,
};
pub use logging::{init_logging, LoggingConfig};
pub use monitoring::{ErrorStatistics, HealthBand, SystemHealth};
pub use retry::{RetryConfig, RetryTicket};
pub use types::{
    EngineError, ErrorRecord, ErrorReport, ErrorType, RecoveryResult, RecoveryStrategy, Result,
    Severity,
};

/// Initializes logging with defaults and returns a default-configured engine
pub fn init() -> Result<ResilienceEngine> {
    logging::init_logging(None)?;
    Ok(ResilienceEngine::default())
}

/// Initializes logging and the engine from a loaded configuration
pub fn init_with_config(config: config::Config) -> Result<ResilienceEngine> {
    let logging_config = config.clone().try_into().ok();
    logging::init_logging(logging_config)?;

    let engine_config = EngineConfig::try_from(config)
        .map_err(|e| EngineError::Initialization(e.to_string()))?;
    Ok(ResilienceEngine::new(engine_config))
}
