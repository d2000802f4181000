//! Per-step execution report
//!
//! The engine produces one report per step and hands it to the caller;
//! persistence and presentation are downstream concerns.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use visionflow_core_types::{
    ActionResult, ActionStep, ElementCandidate, ErrorKind, RecoveryAttempt, RunId, StepId,
    ValidationResult,
};

/// Everything that happened during one attempt of the loop
#[derive(Debug, Clone, Serialize)]
pub struct AttemptRecord {
    /// 1-based attempt index
    pub index: u8,

    /// Candidates the locator produced, best first
    pub candidates: Vec<ElementCandidate>,

    /// Action execution details, if the attempt got that far
    pub action: Option<ActionResult>,

    /// Validation verdict, if the attempt got that far
    pub validation: Option<ValidationResult>,

    /// The failure that ended this attempt, if any
    pub error: Option<String>,

    /// The recovery decision made after the failure, if any
    pub recovery: Option<RecoveryAttempt>,
}

impl AttemptRecord {
    pub(crate) fn new(index: u8) -> Self {
        Self {
            index,
            candidates: Vec::new(),
            action: None,
            validation: None,
            error: None,
            recovery: None,
        }
    }
}

/// Terminal state of a step
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Completed,
    Failed { error: ErrorKind, reason: String },
}

/// The full record of one step's execution
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub run_id: RunId,
    pub step_id: StepId,
    pub step: ActionStep,
    pub attempts: Vec<AttemptRecord>,
    pub outcome: StepOutcome,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
}

impl StepReport {
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, StepOutcome::Completed)
    }

    /// Error kind of a failed step, if it failed
    pub fn failure_kind(&self) -> Option<ErrorKind> {
        match &self.outcome {
            StepOutcome::Completed => None,
            StepOutcome::Failed { error, .. } => Some(*error),
        }
    }
}
