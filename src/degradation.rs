//! # Degradation Controller
//!
//! Tracks the single process-wide degradation level and the feature
//! restrictions it implies. Escalation is monotonic: the controller never
//! auto-heals on a timer, because reduced functionality is safer than
//! silently resuming full functionality after an unconfirmed recovery.
//! Returning to normal operation requires an explicit
//! [`DegradationController::restore_service`] call.

use std::fmt;
use std::sync::RwLock;

use metrics::gauge;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::types::Severity;

/// Degradation levels, ordered by how much functionality is shed
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DegradationLevel {
    /// Full functionality
    None,
    /// Cosmetic and high-churn features shed
    Moderate,
    /// Only essential functionality, offline-safe mode
    Severe,
}

impl DegradationLevel {
    /// Static label used in logs, metrics and serialized payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            DegradationLevel::None => "NONE",
            DegradationLevel::Moderate => "MODERATE",
            DegradationLevel::Severe => "SEVERE",
        }
    }
}

impl fmt::Display for DegradationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Feature flags implied by a degradation level.
///
/// SEVERE restrictions are a strict superset of MODERATE restrictions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureRestrictions {
    /// Stop UI animations and transitions
    pub disable_animations: bool,
    /// Pause live quote and balance streaming
    pub pause_live_updates: bool,
    /// Hide non-essential dashboard widgets
    pub essential_widgets_only: bool,
    /// Serve cached data only; no new outbound requests
    pub force_offline_mode: bool,
}

impl FeatureRestrictions {
    /// The restrictions implied by a level
    pub fn for_level(level: DegradationLevel) -> Self {
        match level {
            DegradationLevel::None => Self {
                disable_animations: false,
                pause_live_updates: false,
                essential_widgets_only: false,
                force_offline_mode: false,
            },
            DegradationLevel::Moderate => Self {
                disable_animations: true,
                pause_live_updates: true,
                essential_widgets_only: false,
                force_offline_mode: false,
            },
            DegradationLevel::Severe => Self {
                disable_animations: true,
                pause_live_updates: true,
                essential_widgets_only: true,
                force_offline_mode: true,
            },
        }
    }
}

/// Snapshot of the current degradation state
#[derive(Debug, Clone, Copy, Serialize)]
pub struct DegradationState {
    pub level: DegradationLevel,
    pub restrictions: FeatureRestrictions,
}

/// Owns the process-wide degradation level
pub struct DegradationController {
    level: RwLock<DegradationLevel>,
}

impl DegradationController {
    pub fn new() -> Self {
        Self {
            level: RwLock::new(DegradationLevel::None),
        }
    }

    /// Escalates the level according to the severity of a reported error:
    /// CRITICAL forces SEVERE, HIGH forces at least MODERATE, anything lower
    /// leaves the current level untouched. Escalation never lowers the
    /// level.
    pub fn escalate(&self, severity: Severity) -> DegradationState {
        let target = match severity {
            Severity::Critical => DegradationLevel::Severe,
            Severity::High => DegradationLevel::Moderate,
            _ => DegradationLevel::None,
        };

        let mut level = self.level.write().unwrap();
        let new_level = (*level).max(target);
        if new_level != *level {
            warn!(
                from = %*level,
                to = %new_level,
                severity = %severity,
                "degradation level escalated"
            );
            *level = new_level;
            gauge!("resilience.degradation_level", level_gauge(new_level));
        }

        DegradationState {
            level: *level,
            restrictions: FeatureRestrictions::for_level(*level),
        }
    }

    /// Explicit operator/caller action returning the dashboard to full
    /// functionality
    pub fn restore_service(&self) -> DegradationState {
        let mut level = self.level.write().unwrap();
        if *level != DegradationLevel::None {
            info!(from = %*level, "service restored to full functionality");
            *level = DegradationLevel::None;
            gauge!("resilience.degradation_level", 0.0);
        }

        DegradationState {
            level: *level,
            restrictions: FeatureRestrictions::for_level(*level),
        }
    }

    /// The current level and its restrictions
    pub fn current(&self) -> DegradationState {
        let level = *self.level.read().unwrap();
        DegradationState {
            level,
            restrictions: FeatureRestrictions::for_level(level),
        }
    }
}

impl Default for DegradationController {
    fn default() -> Self {
        Self::new()
    }
}

fn level_gauge(level: DegradationLevel) -> f64 {
    match level {
        DegradationLevel::None => 0.0,
        DegradationLevel::Moderate => 1.0,
        DegradationLevel::Severe => 2.0,
    }
}
