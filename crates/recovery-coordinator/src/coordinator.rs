//! The decision table

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use visionflow_core_types::{ActionStep, EngineError, ErrorKind, RecoveryAttempt};

use crate::types::{RecoveryDecision, RetryParams};

/// Tunable recovery policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// First inference-backoff delay; doubles per retry
    pub backoff_base: Duration,

    /// Ceiling on any single backoff delay
    pub backoff_cap: Duration,

    /// Inference retries before switching to the fallback locator path
    pub max_inference_retries: u32,

    /// How much the confidence floor is lowered per retry
    pub relax_delta: f64,

    /// The floor is never relaxed below this
    pub min_confidence_floor: f64,

    /// Floor the locator starts from, used to derive relaxed values
    pub base_confidence_floor: f64,

    /// Pause before a relaxed-floor retry, lets transient UI settle
    pub wait_before_retry: Duration,

    /// Multiplier applied to the step timeout on a timeout retry
    pub timeout_extension_factor: f64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            backoff_base: Duration::from_millis(500),
            backoff_cap: Duration::from_secs(8),
            max_inference_retries: 2,
            relax_delta: 0.1,
            min_confidence_floor: 0.1,
            base_confidence_floor: 0.3,
            wait_before_retry: Duration::from_millis(300),
            timeout_extension_factor: 2.0,
        }
    }
}

/// Maps a classified failure plus recovery history to a decision
///
/// Pure over its inputs and config: the same error, step, and history
/// always produce the same decision. Side effects (waiting, re-running
/// the locator or performer) belong to the engine.
pub struct RecoveryCoordinator {
    config: RecoveryConfig,
}

impl RecoveryCoordinator {
    pub fn new(config: RecoveryConfig) -> Self {
        Self { config }
    }

    pub fn recover(
        &self,
        error: &EngineError,
        step: &ActionStep,
        history: &[RecoveryAttempt],
    ) -> RecoveryDecision {
        // Attempt bound comes before everything else. The attempt that
        // just failed plus the ones already recovered from must leave
        // room for one more run.
        let attempts_so_far = history.len() + 1;
        if attempts_so_far >= step.max_attempts as usize {
            warn!(
                target_desc = %step.target,
                attempts = attempts_so_far,
                max = step.max_attempts,
                "attempt budget exhausted"
            );
            return RecoveryDecision::Abort {
                reason: format!(
                    "attempt budget exhausted ({attempts_so_far} of {})",
                    step.max_attempts
                ),
            };
        }

        if !error.is_retryable() {
            return RecoveryDecision::Abort {
                reason: format!("non-retryable failure: {error}"),
            };
        }

        let kind = error.kind();
        let prior = |k: ErrorKind| history.iter().filter(|a| a.error == k).count();

        let decision = match kind {
            ErrorKind::ElementNotFound => {
                let retries = prior(ErrorKind::ElementNotFound) + 1;
                let relaxed = (self.config.base_confidence_floor
                    - self.config.relax_delta * retries as f64)
                    .max(self.config.min_confidence_floor);
                RecoveryDecision::Retry(RetryParams {
                    relaxed_floor: Some(relaxed),
                    wait_before: self.config.wait_before_retry,
                    ..Default::default()
                })
            }

            ErrorKind::ActionRejected => {
                // The engine resumes the strategy chain past what was
                // already tried; it aborts on its own once the chain
                // has no strategies left.
                let substitutions = prior(ErrorKind::ActionRejected);
                RecoveryDecision::Substitute {
                    skip_strategies: substitutions + 1,
                }
            }

            ErrorKind::Timeout => {
                if prior(ErrorKind::Timeout) > 0 {
                    RecoveryDecision::Abort {
                        reason: "timed out twice".into(),
                    }
                } else {
                    let extended = step.timeout.mul_f64(self.config.timeout_extension_factor);
                    RecoveryDecision::Retry(RetryParams {
                        extended_timeout: Some(extended),
                        ..Default::default()
                    })
                }
            }

            ErrorKind::InferenceService => {
                let retries = prior(ErrorKind::InferenceService) as u32;
                if retries < self.config.max_inference_retries {
                    let backoff = self
                        .config
                        .backoff_base
                        .saturating_mul(1 << retries.min(16))
                        .min(self.config.backoff_cap);
                    RecoveryDecision::Retry(RetryParams {
                        wait_before: backoff,
                        ..Default::default()
                    })
                } else if retries == self.config.max_inference_retries {
                    // Service keeps failing, stop paying for it
                    RecoveryDecision::Retry(RetryParams {
                        force_fallback: true,
                        ..Default::default()
                    })
                } else {
                    RecoveryDecision::Abort {
                        reason: "inference service unavailable and fallback failed".into(),
                    }
                }
            }

            // The page moved under us; deciding what to do next is the
            // planner's call, not a recovery retry.
            ErrorKind::UnexpectedStateChange => RecoveryDecision::Abort {
                reason: format!("page state diverged: {error}"),
            },

            ErrorKind::InvalidStep | ErrorKind::CacheCorruption => RecoveryDecision::Abort {
                reason: format!("non-retryable failure: {error}"),
            },
        };

        info!(
            error = %kind,
            decision = decision.strategy_name(),
            attempt = attempts_so_far,
            "recovery decision"
        );
        decision
    }
}
