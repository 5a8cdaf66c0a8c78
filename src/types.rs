//! # Core Types
//!
//! This module provides the canonical error taxonomy and the data model
//! shared by every component of the recovery engine: error records, recovery
//! results, and the engine's own error type.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// A type alias for Result with the error type defaulting to [`EngineError`]
pub type Result<T, E = EngineError> = std::result::Result<T, E>;

/// The severity level of a reported error
///
/// Severities are ordered; `Critical` compares greater than `High`, which is
/// what the degradation controller and the strategy selector rely on.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    /// A minor issue that doesn't affect overall functionality
    Low,
    /// A significant issue that may impact some functionality
    Medium,
    /// A serious issue that impacts a core flow
    High,
    /// An issue that severely impacts system functionality
    Critical,
}

impl Severity {
    /// Static label used in logs, metrics and serialized payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Default for Severity {
    fn default() -> Self {
        Severity::Medium
    }
}

/// Categorizes the kinds of failures the dashboard can encounter
///
/// This is a closed enumeration: the classifier never produces a value
/// outside this set, and `Unknown` is the total fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorType {
    /// Connectivity failure between the dashboard and a backend
    Network,
    /// Input or data validation failure
    Validation,
    /// Authentication or authorization failure
    Authentication,
    /// Failure inside a financial transaction flow (payment, transfer)
    Transaction,
    /// An operation exceeded its deadline
    Timeout,
    /// Rate limiting or throttling by a dependency
    RateLimit,
    /// A dependency reported itself unavailable
    ServiceUnavailable,
    /// Malformed or unparsable data
    DataCorruption,
    /// Unclassified failure
    Unknown,
}

impl ErrorType {
    /// Static label used in logs, metrics and serialized payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::Network => "NETWORK",
            ErrorType::Validation => "VALIDATION",
            ErrorType::Authentication => "AUTHENTICATION",
            ErrorType::Transaction => "TRANSACTION",
            ErrorType::Timeout => "TIMEOUT",
            ErrorType::RateLimit => "RATE_LIMIT",
            ErrorType::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ErrorType::DataCorruption => "DATA_CORRUPTION",
            ErrorType::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The recovery strategies the engine can select for a reported error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecoveryStrategy {
    /// Schedule another attempt with exponential backoff
    Retry,
    /// Invoke the registered alternate operation for the service type
    Fallback,
    /// Record the failure against the service's circuit breaker
    CircuitBreaker,
    /// Reduce dashboard functionality to protect core operation
    GracefulDegradation,
    /// No automated recovery; a human must act
    UserIntervention,
}

impl RecoveryStrategy {
    /// Static label used in logs, metrics and serialized payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryStrategy::Retry => "RETRY",
            RecoveryStrategy::Fallback => "FALLBACK",
            RecoveryStrategy::CircuitBreaker => "CIRCUIT_BREAKER",
            RecoveryStrategy::GracefulDegradation => "GRACEFUL_DEGRADATION",
            RecoveryStrategy::UserIntervention => "USER_INTERVENTION",
        }
    }
}

impl fmt::Display for RecoveryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The outcome of executing a recovery strategy for one reported error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryResult {
    /// Id of the [`ErrorRecord`] this result belongs to
    pub error_id: Uuid,
    /// The strategy the selector chose
    pub strategy: RecoveryStrategy,
    /// Whether automated recovery is possible; `false` means the failure is
    /// terminal from the engine's point of view and must reach the user
    pub can_recover: bool,
    /// Strategy-specific payload (retry delay, fallback result, breaker
    /// state, degradation flags)
    pub details: serde_json::Value,
}

/// One reported failure, as stored in the bounded error history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Unique identifier, generated at report time
    pub id: Uuid,
    /// Canonical error type assigned by the classifier (or the caller)
    pub error_type: ErrorType,
    /// Severity assigned by the classifier (or the caller)
    pub severity: Severity,
    /// Human-readable description, already scrubbed of sensitive data
    pub message: String,
    /// Caller-supplied key/value context (component, service key, argument
    /// summary); sensitive entries are redacted before the record is stored
    #[serde(default)]
    pub context: serde_json::Map<String, serde_json::Value>,
    /// Creation time
    pub timestamp: DateTime<Utc>,
    /// Attached after strategy execution; set at most once
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery_result: Option<RecoveryResult>,
}

impl ErrorRecord {
    /// Creates a new record with a fresh id and the current timestamp
    pub fn new<S: Into<String>>(error_type: ErrorType, severity: Severity, message: S) -> Self {
        Self {
            id: Uuid::new_v4(),
            error_type,
            severity,
            message: message.into(),
            context: serde_json::Map::new(),
            timestamp: Utc::now(),
            recovery_result: None,
        }
    }

    /// Adds a context key/value pair
    pub fn context<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Serialize,
    {
        if let Ok(value) = serde_json::to_value(value) {
            self.context.insert(key.into(), value);
        }
        self
    }

    /// Replaces the whole context map
    pub fn with_context(mut self, context: serde_json::Map<String, serde_json::Value>) -> Self {
        self.context = context;
        self
    }

    /// The service type used for fallback lookup, if the caller supplied one
    pub fn service_type(&self) -> Option<&str> {
        self.context.get("service_type").and_then(|v| v.as_str())
    }

    /// The key identifying the protected dependency for circuit breaking.
    /// Falls back to the service type when no explicit key was supplied.
    pub fn breaker_key(&self) -> Option<&str> {
        self.context
            .get("service_key")
            .and_then(|v| v.as_str())
            .or_else(|| self.service_type())
    }

    /// Opaque key identifying the logical error occurrence for retry
    /// bookkeeping: error type plus a fingerprint of the reporting site.
    pub fn retry_key(&self) -> String {
        let component = self
            .context
            .get("component")
            .and_then(|v| v.as_str())
            .unwrap_or("-");
        let service = self.breaker_key().unwrap_or("-");
        format!("{}:{}:{}", self.error_type, component, service)
    }
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {} ({})",
            self.severity, self.error_type, self.message, self.id
        )
    }
}

/// A raw failure signal as supplied by a caller to the facade
///
/// Everything except the message is optional; whatever the caller omits is
/// filled in by the classifier.
#[derive(Debug)]
pub struct ErrorReport {
    /// Human-readable description of the failure
    pub message: String,
    /// Caller-asserted error type; wins over classification when present
    pub error_type: Option<ErrorType>,
    /// Caller-asserted severity; wins over classification when present
    pub severity: Option<Severity>,
    /// The underlying error, if the caller has one
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl ErrorReport {
    /// Creates a report carrying only a message
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self {
            message: message.into(),
            error_type: None,
            severity: None,
            source: None,
        }
    }

    /// Asserts the error type, bypassing classification for it
    pub fn error_type(mut self, error_type: ErrorType) -> Self {
        self.error_type = Some(error_type);
        self
    }

    /// Asserts the severity, bypassing classification for it
    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    /// Attaches the underlying error
    pub fn source<E>(mut self, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }
}

impl From<&str> for ErrorReport {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

impl From<String> for ErrorReport {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

/// Errors returned by the engine's fallible caller-facing APIs
///
/// The facade itself (`handle_error`) never returns these; they surface from
/// the retry wrapper, the transaction helper, fallback invocation and
/// initialization.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The retry budget for an operation is spent
    #[error("operation '{operation}' exhausted {attempts} retry attempts: {last_error}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        last_error: String,
    },

    /// The circuit for a service is open; the call was not attempted
    #[error("circuit breaker open for service '{service_key}', next attempt in {next_attempt_in:?}")]
    CircuitOpen {
        service_key: String,
        next_attempt_in: Option<Duration>,
    },

    /// A registered fallback operation itself failed
    #[error("fallback for service type '{service_type}' failed: {reason}")]
    FallbackFailed {
        service_type: String,
        reason: String,
    },

    /// A protected operation failed
    #[error("operation '{operation}' failed: {reason}")]
    Operation { operation: String, reason: String },

    /// Engine or logging initialization failed
    #[error("initialization failed: {0}")]
    Initialization(String),
}

impl EngineError {
    /// Shorthand for wrapping an arbitrary operation failure
    pub fn operation<S1: Into<String>, S2: Into<String>>(operation: S1, reason: S2) -> Self {
        EngineError::Operation {
            operation: operation.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
        assert_eq!(Severity::default(), Severity::Medium);
    }

    #[test]
    fn test_record_builder() {
        let record = ErrorRecord::new(ErrorType::Network, Severity::Medium, "connection refused")
            .context("component", "BalanceCard")
            .context("service_key", "accounts-api");

        assert_eq!(record.error_type, ErrorType::Network);
        assert_eq!(record.breaker_key(), Some("accounts-api"));
        assert!(record.recovery_result.is_none());
        assert_eq!(record.retry_key(), "NETWORK:BalanceCard:accounts-api");
    }

    #[test]
    fn test_breaker_key_falls_back_to_service_type() {
        let record = ErrorRecord::new(ErrorType::Timeout, Severity::Medium, "deadline exceeded")
            .context("service_type", "quotes");

        assert_eq!(record.breaker_key(), Some("quotes"));
        assert_eq!(record.service_type(), Some("quotes"));
    }

    #[test]
    fn test_report_builder_keeps_caller_assertions() {
        let report = ErrorReport::new("card declined")
            .error_type(ErrorType::Transaction)
            .severity(Severity::High);

        assert_eq!(report.error_type, Some(ErrorType::Transaction));
        assert_eq!(report.severity, Some(Severity::High));
        assert!(report.source.is_none());
    }

    #[test]
    fn test_record_display() {
        let record = ErrorRecord::new(ErrorType::RateLimit, Severity::Medium, "429 from quotes");
        let rendered = format!("{}", record);
        assert!(rendered.contains("MEDIUM"));
        assert!(rendered.contains("RATE_LIMIT"));
        assert!(rendered.contains("429 from quotes"));
    }

    #[test]
    fn test_serialized_enum_names() {
        let json = serde_json::to_string(&ErrorType::ServiceUnavailable).unwrap();
        assert_eq!(json, "\"SERVICE_UNAVAILABLE\"");
        let json = serde_json::to_string(&RecoveryStrategy::GracefulDegradation).unwrap();
        assert_eq!(json, "\"GRACEFUL_DEGRADATION\"");
    }
}
