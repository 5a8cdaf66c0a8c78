//! # Recovery Strategy Selector
//!
//! Decides which recovery component handles a classified error. Selection
//! is a pure function of the record, the relevant circuit state, the
//! remaining retry budget and fallback availability, so it can be tested
//! without touching any engine state.

use crate::circuit_breaker::CircuitState;
use crate::types::{ErrorRecord, ErrorType, RecoveryStrategy, Severity};

/// Everything the selector needs to know about the world
#[derive(Debug, Clone, Copy)]
pub struct StrategyInputs {
    /// Effective circuit state for the record's service key
    pub circuit_state: CircuitState,
    /// Whether the record's retry key still has budget
    pub retries_remaining: bool,
    /// Whether a fallback is registered for the record's service type
    pub fallback_registered: bool,
}

/// Selects the recovery strategy for a record.
///
/// Rules are evaluated in priority order. Safety-affecting errors (critical
/// severity, authentication) short-circuit to a human before any automated
/// strategy; an open circuit is surfaced instead of silently retried
/// against a known-down dependency.
pub fn select_strategy(record: &ErrorRecord, inputs: StrategyInputs) -> RecoveryStrategy {
    if record.severity == Severity::Critical {
        return RecoveryStrategy::UserIntervention;
    }

    // Credentials cannot be silently refreshed, regardless of severity.
    if record.error_type == ErrorType::Authentication {
        return RecoveryStrategy::UserIntervention;
    }

    if record.error_type == ErrorType::ServiceUnavailable {
        return RecoveryStrategy::CircuitBreaker;
    }

    if inputs.circuit_state == CircuitState::Open {
        return RecoveryStrategy::CircuitBreaker;
    }

    if matches!(record.error_type, ErrorType::Network | ErrorType::Timeout)
        && inputs.retries_remaining
    {
        return RecoveryStrategy::Retry;
    }

    if inputs.fallback_registered {
        return RecoveryStrategy::Fallback;
    }

    RecoveryStrategy::GracefulDegradation
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs() -> StrategyInputs {
        StrategyInputs {
            circuit_state: CircuitState::Closed,
            retries_remaining: true,
            fallback_registered: false,
        }
    }

    fn record(error_type: ErrorType, severity: Severity) -> ErrorRecord {
        ErrorRecord::new(error_type, severity, "test failure")
    }

    #[test]
    fn test_critical_always_needs_a_human() {
        for error_type in [
            ErrorType::Network,
            ErrorType::Timeout,
            ErrorType::Transaction,
            ErrorType::ServiceUnavailable,
            ErrorType::Unknown,
        ] {
            let strategy = select_strategy(&record(error_type, Severity::Critical), inputs());
            assert_eq!(strategy, RecoveryStrategy::UserIntervention);
        }
    }

    #[test]
    fn test_authentication_needs_a_human_at_any_severity() {
        for severity in [Severity::Low, Severity::Medium, Severity::High] {
            let strategy = select_strategy(&record(ErrorType::Authentication, severity), inputs());
            assert_eq!(strategy, RecoveryStrategy::UserIntervention);
        }
    }

    #[test]
    fn test_service_unavailable_goes_to_breaker() {
        let strategy = select_strategy(
            &record(ErrorType::ServiceUnavailable, Severity::High),
            inputs(),
        );
        assert_eq!(strategy, RecoveryStrategy::CircuitBreaker);
    }

    #[test]
    fn test_open_circuit_is_surfaced_not_retried() {
        let strategy = select_strategy(
            &record(ErrorType::Network, Severity::Medium),
            StrategyInputs {
                circuit_state: CircuitState::Open,
                ..inputs()
            },
        );
        assert_eq!(strategy, RecoveryStrategy::CircuitBreaker);
    }

    #[test]
    fn test_transient_types_retry_while_budget_remains() {
        for error_type in [ErrorType::Network, ErrorType::Timeout] {
            let strategy = select_strategy(&record(error_type, Severity::Medium), inputs());
            assert_eq!(strategy, RecoveryStrategy::Retry);
        }
    }

    #[test]
    fn test_exhausted_retries_fall_through_to_fallback() {
        let strategy = select_strategy(
            &record(ErrorType::Network, Severity::Medium),
            StrategyInputs {
                retries_remaining: false,
                fallback_registered: true,
                ..inputs()
            },
        );
        assert_eq!(strategy, RecoveryStrategy::Fallback);
    }

    #[test]
    fn test_fallback_for_non_transient_types() {
        let strategy = select_strategy(
            &record(ErrorType::Transaction, Severity::Medium),
            StrategyInputs {
                fallback_registered: true,
                ..inputs()
            },
        );
        assert_eq!(strategy, RecoveryStrategy::Fallback);
    }

    #[test]
    fn test_degradation_is_the_last_resort() {
        let strategy = select_strategy(
            &record(ErrorType::DataCorruption, Severity::High),
            StrategyInputs {
                retries_remaining: false,
                ..inputs()
            },
        );
        assert_eq!(strategy, RecoveryStrategy::GracefulDegradation);
    }
}
