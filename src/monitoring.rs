//! # Error Metrics Aggregation
//!
//! Bounded error history plus the derived read models: windowed statistics,
//! top offenders and the 0-100 system health score the dashboard renders.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::RwLock;
use std::time::Duration;

use chrono::Utc;
use metrics::gauge;
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::types::{ErrorRecord, ErrorType, RecoveryResult, RecoveryStrategy, Severity};

/// Health score penalty per error, by severity
const PENALTY_CRITICAL: i64 = 20;
const PENALTY_HIGH: i64 = 10;
const PENALTY_MEDIUM: i64 = 5;
const PENALTY_LOW: i64 = 2;
/// Flat penalty applied when any circuit breaker is not CLOSED
const PENALTY_DEGRADED_CIRCUIT: i64 = 15;

/// How many top offenders the statistics carry
const TOP_ERRORS_LIMIT: usize = 5;

/// Capacity-bounded store of reported errors, oldest evicted first
pub struct ErrorHistory {
    records: RwLock<VecDeque<ErrorRecord>>,
    capacity: usize,
}

impl ErrorHistory {
    /// Creates a history bounded to `capacity` records
    pub fn new(capacity: usize) -> Self {
        Self {
            records: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Appends a record, evicting the oldest when at capacity
    pub fn record(&self, record: ErrorRecord) {
        let mut records = self.records.write().unwrap();
        if records.len() >= self.capacity {
            records.pop_front();
        }
        records.push_back(record);
        gauge!("resilience.history_size", records.len() as f64);
    }

    /// Attaches a recovery result to a stored record; set at most once.
    pub fn attach_result(&self, error_id: Uuid, result: RecoveryResult) {
        let mut records = self.records.write().unwrap();
        // Recent records live at the back.
        if let Some(record) = records.iter_mut().rev().find(|r| r.id == error_id) {
            if record.recovery_result.is_none() {
                record.recovery_result = Some(result);
            } else {
                debug!(error_id = %error_id, "recovery result already attached, ignoring");
            }
        }
    }

    /// The `n` most recent records, newest first
    pub fn recent(&self, n: usize) -> Vec<ErrorRecord> {
        let records = self.records.read().unwrap();
        records.iter().rev().take(n).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Aggregates the records whose timestamp falls inside the window
    pub fn statistics(&self, window: Duration) -> ErrorStatistics {
        // A window too large for chrono means "everything".
        let cutoff = chrono::Duration::from_std(window)
            .ok()
            .map(|w| Utc::now() - w);

        let records = self.records.read().unwrap();
        let mut by_type: HashMap<ErrorType, usize> = HashMap::new();
        let mut by_severity: HashMap<Severity, usize> = HashMap::new();
        let mut by_message: HashMap<&str, usize> = HashMap::new();
        let mut total = 0usize;
        let mut recovered = 0usize;

        for record in records
            .iter()
            .filter(|r| cutoff.map_or(true, |c| r.timestamp >= c))
        {
            total += 1;
            *by_type.entry(record.error_type).or_default() += 1;
            *by_severity.entry(record.severity).or_default() += 1;
            *by_message.entry(record.message.as_str()).or_default() += 1;

            // Recovery succeeded when an automated strategy (retry or
            // fallback) reported the error as recoverable.
            if let Some(result) = &record.recovery_result {
                let automated = matches!(
                    result.strategy,
                    RecoveryStrategy::Retry | RecoveryStrategy::Fallback
                );
                if automated && result.can_recover {
                    recovered += 1;
                }
            }
        }

        let mut top_errors: Vec<TopError> = by_message
            .into_iter()
            .map(|(message, count)| TopError {
                message: message.to_string(),
                count,
            })
            .collect();
        top_errors.sort_by(|a, b| b.count.cmp(&a.count).then(a.message.cmp(&b.message)));
        top_errors.truncate(TOP_ERRORS_LIMIT);

        let recovery_success_rate = if total > 0 {
            recovered as f64 / total as f64
        } else {
            0.0
        };

        ErrorStatistics {
            total,
            by_type,
            by_severity,
            top_errors,
            recovery_success_rate,
        }
    }
}

/// One ranked offender in the statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopError {
    pub message: String,
    pub count: usize,
}

/// Aggregate snapshot over a time window
#[derive(Debug, Clone, Serialize)]
pub struct ErrorStatistics {
    /// Records in the window
    pub total: usize,
    /// Counts per error type
    pub by_type: HashMap<ErrorType, usize>,
    /// Counts per severity
    pub by_severity: HashMap<Severity, usize>,
    /// Most frequent messages, ranked
    pub top_errors: Vec<TopError>,
    /// Share of windowed errors recovered by an automated strategy
    pub recovery_success_rate: f64,
}

impl ErrorStatistics {
    fn severity_count(&self, severity: Severity) -> usize {
        self.by_severity.get(&severity).copied().unwrap_or(0)
    }
}

/// Qualitative band derived from the health score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthBand {
    Excellent,
    Good,
    Fair,
    Poor,
    Critical,
}

impl HealthBand {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthBand::Excellent => "excellent",
            HealthBand::Good => "good",
            HealthBand::Fair => "fair",
            HealthBand::Poor => "poor",
            HealthBand::Critical => "critical",
        }
    }
}

impl fmt::Display for HealthBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The 0-100 system health summary
#[derive(Debug, Clone, Copy, Serialize)]
pub struct SystemHealth {
    pub score: u32,
    pub band: HealthBand,
}

/// Computes the health score from windowed statistics and circuit state.
///
/// Starts at 100 and subtracts weighted penalties per error severity, plus a
/// flat penalty when any breaker is not CLOSED; the result is floored at 0.
pub fn calculate_system_health(
    statistics: &ErrorStatistics,
    degraded_circuits: usize,
) -> SystemHealth {
    let mut score: i64 = 100;
    score -= statistics.severity_count(Severity::Critical) as i64 * PENALTY_CRITICAL;
    score -= statistics.severity_count(Severity::High) as i64 * PENALTY_HIGH;
    score -= statistics.severity_count(Severity::Medium) as i64 * PENALTY_MEDIUM;
    score -= statistics.severity_count(Severity::Low) as i64 * PENALTY_LOW;

    if degraded_circuits > 0 {
        score -= PENALTY_DEGRADED_CIRCUIT;
    }

    let score = score.clamp(0, 100) as u32;
    let band = match score {
        90..=100 => HealthBand::Excellent,
        75..=89 => HealthBand::Good,
        60..=74 => HealthBand::Fair,
        40..=59 => HealthBand::Poor,
        _ => HealthBand::Critical,
    };

    SystemHealth { score, band }
}
