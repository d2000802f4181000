//! Decision types handed back to the step engine

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Adjustments applied to the next attempt
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RetryParams {
    /// Replace the locator's confidence floor for the next attempt
    pub relaxed_floor: Option<f64>,

    /// Delay before the next attempt starts
    pub wait_before: Duration,

    /// Replace the step timeout for the next attempt
    pub extended_timeout: Option<Duration>,

    /// Skip vision inference and locate from page structure
    pub force_fallback: bool,
}

/// What the engine should do with the failed step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RecoveryDecision {
    /// Run the whole attempt again with the given adjustments
    Retry(RetryParams),

    /// Re-run the action, resuming the strategy chain past the
    /// strategies already tried
    Substitute {
        /// 1-based substitution count; advisory, since the engine
        /// tracks the actual chain progress and owns the resume index
        skip_strategies: usize,
    },

    /// Terminal failure; the step is reported as failed
    Abort { reason: String },
}

impl RecoveryDecision {
    pub fn is_abort(&self) -> bool {
        matches!(self, RecoveryDecision::Abort { .. })
    }

    /// Short name used in recovery history entries
    pub fn strategy_name(&self) -> &'static str {
        match self {
            RecoveryDecision::Retry(params) if params.force_fallback => "retry_fallback",
            RecoveryDecision::Retry(params) if params.relaxed_floor.is_some() => {
                "retry_relaxed_floor"
            }
            RecoveryDecision::Retry(params) if params.extended_timeout.is_some() => {
                "retry_extended_timeout"
            }
            RecoveryDecision::Retry(_) => "retry_backoff",
            RecoveryDecision::Substitute { .. } => "substitute_strategy",
            RecoveryDecision::Abort { .. } => "abort",
        }
    }
}
