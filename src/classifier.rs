//! # Error Classifier
//!
//! Maps a raw failure signal plus optional context hints to a canonical
//! `(ErrorType, Severity)` pair. Classification is an ordered, data-driven
//! rule table evaluated top to bottom, so individual rules stay testable and
//! new patterns can be added without touching control flow.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;

use crate::types::{ErrorType, Severity};

/// One classification rule: a message predicate and the pair it yields.
#[derive(Debug)]
struct ClassificationRule {
    pattern: Regex,
    error_type: ErrorType,
    severity: Severity,
}

impl ClassificationRule {
    fn new(pattern: &str, error_type: ErrorType, severity: Severity) -> Self {
        Self {
            pattern: Regex::new(pattern).expect("classification rule pattern must compile"),
            error_type,
            severity,
        }
    }
}

// Evaluated in order; the first matching rule wins. Timeout must precede the
// network rule so "connection timeout" classifies as TIMEOUT.
static RULES: Lazy<Vec<ClassificationRule>> = Lazy::new(|| {
    vec![
        ClassificationRule::new(
            r"(?i)timeout|timed\s*out|deadline\s+exceeded",
            ErrorType::Timeout,
            Severity::Medium,
        ),
        ClassificationRule::new(
            r"(?i)network|connection|offline|unreachable|dns|socket",
            ErrorType::Network,
            Severity::Medium,
        ),
        ClassificationRule::new(
            r"(?i)declined|insufficient\s+funds|card\s+(expired|invalid|blocked)|payment\s+failed",
            ErrorType::Transaction,
            Severity::High,
        ),
        ClassificationRule::new(
            r"(?i)unauthorized|forbidden|permission|credential|session\s+expired|\b401\b|\b403\b",
            ErrorType::Authentication,
            Severity::High,
        ),
        ClassificationRule::new(
            r"(?i)rate\s*limit|too\s+many\s+requests|throttl|\b429\b",
            ErrorType::RateLimit,
            Severity::Medium,
        ),
        ClassificationRule::new(
            r"(?i)service\s+unavailable|maintenance|bad\s+gateway|\b502\b|\b503\b",
            ErrorType::ServiceUnavailable,
            Severity::High,
        ),
        ClassificationRule::new(
            r"(?i)json|parse|syntax|malformed|corrupt",
            ErrorType::DataCorruption,
            Severity::High,
        ),
        // Null-dereference style messages come from broken business logic
        // rather than a failing dependency.
        ClassificationRule::new(
            r"(?i)undefined|null\s*(pointer|reference)|cannot\s+read\s+propert",
            ErrorType::Unknown,
            Severity::High,
        ),
        ClassificationRule::new(
            r"(?i)validation|invalid\s+(input|value|format)|required\s+field|out\s+of\s+range",
            ErrorType::Validation,
            Severity::Low,
        ),
    ]
});

// Fallback hints for messages no rule matches, keyed by the transaction kind
// and the UI step reported in the context.
static STEP_HINTS: Lazy<HashMap<(&'static str, &'static str), (ErrorType, Severity)>> =
    Lazy::new(|| {
        HashMap::from([
            (
                ("payment", "authorization"),
                (ErrorType::Transaction, Severity::High),
            ),
            (
                ("payment", "processing"),
                (ErrorType::Transaction, Severity::High),
            ),
            (
                ("payment", "validation"),
                (ErrorType::Validation, Severity::Medium),
            ),
            (
                ("transfer", "validation"),
                (ErrorType::Validation, Severity::Medium),
            ),
            (
                ("transfer", "submission"),
                (ErrorType::Network, Severity::Medium),
            ),
            (
                ("withdrawal", "authorization"),
                (ErrorType::Authentication, Severity::High),
            ),
            (
                ("deposit", "settlement"),
                (ErrorType::Transaction, Severity::Medium),
            ),
        ])
    });

/// Classifies a failure signal into a canonical `(type, severity)` pair.
///
/// Pure and total: no pattern match plus no usable hint yields
/// `(Unknown, Medium)`, never a panic or an unmapped value.
pub fn classify(
    message: &str,
    context: &serde_json::Map<String, serde_json::Value>,
) -> (ErrorType, Severity) {
    for rule in RULES.iter() {
        if rule.pattern.is_match(message) {
            return (rule.error_type, rule.severity);
        }
    }

    if let Some(hint) = hint_for(context) {
        return hint;
    }

    (ErrorType::Unknown, Severity::Medium)
}

fn hint_for(
    context: &serde_json::Map<String, serde_json::Value>,
) -> Option<(ErrorType, Severity)> {
    let transaction = context.get("transaction_type")?.as_str()?;
    let step = context.get("step")?.as_str()?;
    STEP_HINTS.get(&(transaction, step)).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(pairs: &[(&str, &str)]) -> serde_json::Map<String, serde_json::Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.to_string())))
            .collect()
    }

    #[test]
    fn test_network_and_timeout_split() {
        let empty = serde_json::Map::new();
        // Timeout wins whenever the substring is present, even alongside
        // network wording.
        let (t, _) = classify("network connection timeout while fetching quotes", &empty);
        assert_eq!(t, ErrorType::Timeout);

        let (t, s) = classify("network connection refused", &empty);
        assert_eq!(t, ErrorType::Network);
        assert_eq!(s, Severity::Medium);

        let (t, _) = classify("Connection reset by peer", &empty);
        assert_eq!(t, ErrorType::Network);
    }

    #[test]
    fn test_payment_class_messages() {
        let empty = serde_json::Map::new();
        let (t, s) = classify("card declined by issuer", &empty);
        assert_eq!(t, ErrorType::Transaction);
        assert_eq!(s, Severity::High);

        let (t, _) = classify("insufficient funds for transfer", &empty);
        assert_eq!(t, ErrorType::Transaction);
    }

    #[test]
    fn test_authentication_messages() {
        let empty = serde_json::Map::new();
        let (t, s) = classify("403 Forbidden: permission denied", &empty);
        assert_eq!(t, ErrorType::Authentication);
        assert_eq!(s, Severity::High);

        let (t, _) = classify("session expired, please sign in", &empty);
        assert_eq!(t, ErrorType::Authentication);
    }

    #[test]
    fn test_data_corruption_messages() {
        let empty = serde_json::Map::new();
        let (t, s) = classify("Unexpected token in JSON at position 12", &empty);
        assert_eq!(t, ErrorType::DataCorruption);
        assert_eq!(s, Severity::High);
    }

    #[test]
    fn test_null_reference_is_high_severity() {
        let empty = serde_json::Map::new();
        let (t, s) = classify("cannot read properties of undefined", &empty);
        assert_eq!(t, ErrorType::Unknown);
        assert_eq!(s, Severity::High);
    }

    #[test]
    fn test_step_hint_used_when_no_pattern_matches() {
        let context = ctx(&[("transaction_type", "payment"), ("step", "authorization")]);
        let (t, s) = classify("operation failed", &context);
        assert_eq!(t, ErrorType::Transaction);
        assert_eq!(s, Severity::High);
    }

    #[test]
    fn test_pattern_beats_hint() {
        let context = ctx(&[("transaction_type", "payment"), ("step", "authorization")]);
        let (t, _) = classify("request timed out", &context);
        assert_eq!(t, ErrorType::Timeout);
    }

    #[test]
    fn test_total_fallback() {
        let empty = serde_json::Map::new();
        let (t, s) = classify("", &empty);
        assert_eq!(t, ErrorType::Unknown);
        assert_eq!(s, Severity::Medium);

        let (t, s) = classify("zorp blarg \u{1F4A5}", &empty);
        assert_eq!(t, ErrorType::Unknown);
        assert_eq!(s, Severity::Medium);
    }

    #[test]
    fn test_hint_with_unknown_step_falls_through() {
        let context = ctx(&[("transaction_type", "payment"), ("step", "confetti")]);
        let (t, s) = classify("operation failed", &context);
        assert_eq!(t, ErrorType::Unknown);
        assert_eq!(s, Severity::Medium);
    }
}
