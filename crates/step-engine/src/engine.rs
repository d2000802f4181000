//! The engine loop

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use action_performer::{chain_for, ActionPerformer};
use element_locator::{ElementLocator, LocateOptions};
use outcome_validator::OutcomeValidator;
use recovery_coordinator::{RecoveryCoordinator, RecoveryDecision};
use response_cache::ResponseCache;
use visionflow_core_types::{
    ActionKind, ActionStep, AttemptOutcome, BrowserSession, EngineError, ErrorKind,
    InferenceMeter, MeterSnapshot, RecoveryAttempt, RunId, StepId, StrategyOutcome,
    VisionInference,
};

use crate::config::EngineConfig;
use crate::report::{AttemptRecord, StepOutcome, StepReport};

/// Retry adjustments carried across loop iterations
#[derive(Default)]
struct RetryState {
    floor_override: Option<f64>,
    force_fallback: bool,
    timeout_override: Option<Duration>,
    /// Strategy-chain resume index for Substitute decisions
    resume_at: usize,
}

/// Drives one browser session through the detect, act, validate,
/// recover loop
pub struct StepEngine {
    session: Arc<dyn BrowserSession>,
    locator: ElementLocator,
    performer: ActionPerformer,
    validator: OutcomeValidator,
    coordinator: RecoveryCoordinator,
    cache: Arc<ResponseCache>,
    meter: Arc<InferenceMeter>,
    run_id: RunId,
}

impl StepEngine {
    /// Build an engine with its own private cache
    pub fn new(
        session: Arc<dyn BrowserSession>,
        inference: Arc<dyn VisionInference>,
        config: EngineConfig,
    ) -> Self {
        let cache = Arc::new(ResponseCache::new(config.cache.capacity, config.cache.ttl));
        Self::with_cache(session, inference, cache, config)
    }

    /// Build an engine around an existing cache, for sharing cached
    /// detections between sessions pointed at the same pages
    pub fn with_cache(
        session: Arc<dyn BrowserSession>,
        inference: Arc<dyn VisionInference>,
        cache: Arc<ResponseCache>,
        config: EngineConfig,
    ) -> Self {
        let meter = Arc::new(InferenceMeter::new());
        let locator = ElementLocator::new(
            inference.clone(),
            session.clone(),
            cache.clone(),
            meter.clone(),
            config.locator,
        );
        let performer = ActionPerformer::new(session.clone(), config.performer);
        let validator =
            OutcomeValidator::new(inference, cache.clone(), meter.clone(), config.validator);
        let coordinator = RecoveryCoordinator::new(config.recovery);
        Self {
            session,
            locator,
            performer,
            validator,
            coordinator,
            cache,
            meter,
            run_id: RunId::new(),
        }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    /// Inference usage so far on this engine
    pub fn meter_snapshot(&self) -> MeterSnapshot {
        self.meter.snapshot()
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    /// Execute one step to its terminal state
    ///
    /// Never panics on failure; terminal failure is a report value
    /// carrying the full attempt history.
    pub async fn run_step(&self, step: &ActionStep) -> StepReport {
        let step_id = StepId::new();
        let started_at = Utc::now();
        let started = Instant::now();
        info!(run = %self.run_id, step = %step_id, kind = ?step.kind, target_desc = %step.target, "step started");

        let mut attempts: Vec<AttemptRecord> = Vec::new();
        let mut history: Vec<RecoveryAttempt> = Vec::new();
        let mut retry = RetryState::default();

        // Malformed steps fail before the first attempt
        if let Err(err) = step.validate() {
            let mut record = AttemptRecord::new(1);
            record.error = Some(err.to_string());
            attempts.push(record);
            return self.finish(
                step_id,
                step,
                attempts,
                StepOutcome::Failed {
                    error: err.kind(),
                    reason: err.to_string(),
                },
                started_at,
                started,
            );
        }

        loop {
            let index = (attempts.len() + 1) as u8;
            let mut record = AttemptRecord::new(index);

            match self.attempt_once(step, &mut record, &mut retry).await {
                Ok(()) => {
                    attempts.push(record);
                    return self.finish(
                        step_id,
                        step,
                        attempts,
                        StepOutcome::Completed,
                        started_at,
                        started,
                    );
                }
                Err(err) => {
                    warn!(step = %step_id, attempt = index, error = %err, "attempt failed");
                    record.error = Some(err.to_string());

                    let decision = self.coordinator.recover(&err, step, &history);
                    let recovery = RecoveryAttempt {
                        error: err.kind(),
                        strategy: decision.strategy_name().to_string(),
                        attempt_index: index,
                        outcome: if decision.is_abort() {
                            AttemptOutcome::Aborted
                        } else {
                            AttemptOutcome::Retried
                        },
                    };
                    history.push(recovery.clone());
                    record.recovery = Some(recovery);
                    attempts.push(record);

                    match decision {
                        RecoveryDecision::Abort { reason } => {
                            return self.finish(
                                step_id,
                                step,
                                attempts,
                                StepOutcome::Failed {
                                    error: err.kind(),
                                    reason,
                                },
                                started_at,
                                started,
                            );
                        }
                        RecoveryDecision::Retry(params) => {
                            if !params.wait_before.is_zero() {
                                tokio::time::sleep(params.wait_before).await;
                            }
                            retry.floor_override = params.relaxed_floor.or(retry.floor_override);
                            retry.force_fallback |= params.force_fallback;
                            retry.timeout_override =
                                params.extended_timeout.or(retry.timeout_override);
                            retry.resume_at = 0;
                        }
                        RecoveryDecision::Substitute { .. } => {
                            // The engine owns the resume index: it
                            // counts only conclusively rejected
                            // strategies, so a transport-errored one is
                            // retried. The coordinator does not know
                            // the chain; exhaustion is checked here.
                            if retry.resume_at >= chain_for(step.kind).len() {
                                return self.finish(
                                    step_id,
                                    step,
                                    attempts,
                                    StepOutcome::Failed {
                                        error: ErrorKind::ActionRejected,
                                        reason: "strategy chain exhausted".into(),
                                    },
                                    started_at,
                                    started,
                                );
                            }
                        }
                    }
                }
            }
        }
    }

    /// One pass through detect, act, validate
    ///
    /// Every inference and browser operation runs under the step's
    /// timeout (or the recovery-extended one), so a Timeout surfacing
    /// from any stage can be retried with a longer deadline.
    async fn attempt_once(
        &self,
        step: &ActionStep,
        record: &mut AttemptRecord,
        retry: &mut RetryState,
    ) -> Result<(), EngineError> {
        let deadline = retry.timeout_override.unwrap_or(step.timeout);

        // Wait steps are a plain timed pause, nothing to find or judge
        if step.kind == ActionKind::Wait {
            let result = tokio::time::timeout(
                deadline,
                self.performer
                    .execute(None, step.kind, step.input_data.as_deref()),
            )
            .await
            .map_err(|_| {
                EngineError::Timeout(format!("wait exceeded step timeout {deadline:?}"))
            })??;
            record.action = Some(result);
            return Ok(());
        }

        let screenshot = self.session.screenshot().await.map_err(EngineError::from)?;
        let context = self
            .session
            .current_context()
            .await
            .map_err(EngineError::from)?;

        let options = LocateOptions {
            floor_override: retry.floor_override,
            force_fallback: retry.force_fallback,
            timeout_override: Some(deadline),
        };
        let outcome = self
            .locator
            .locate_with(&screenshot, &step.target, &context, options)
            .await?;
        record.candidates = outcome.candidates().to_vec();
        let Some(best) = record.candidates.first().cloned() else {
            return Err(EngineError::ElementNotFound(step.target.clone()));
        };

        let result = tokio::time::timeout(
            deadline,
            self.performer.execute_from(
                Some(&best),
                step.kind,
                step.input_data.as_deref(),
                retry.resume_at,
            ),
        )
        .await
        .map_err(|_| EngineError::Timeout(format!("action exceeded step timeout {deadline:?}")))??;
        // An errored strategy stopped the chain without a verdict; it
        // runs again on resume, so only conclusive rejections advance
        // the resume index.
        retry.resume_at += result
            .strategies_tried
            .iter()
            .filter(|a| !matches!(a.outcome, StrategyOutcome::Errored(_)))
            .count();
        let success = result.success;
        let failure = result.error.clone();
        let before = result.before.clone();
        let after = result.after.clone();
        record.action = Some(result);
        if !success {
            return Err(EngineError::ActionRejected(
                failure.unwrap_or_else(|| "action not accepted".to_string()),
            ));
        }

        if let (Some(before), Some(after)) = (before, after) {
            let validation = tokio::time::timeout(
                deadline,
                self.validator
                    .validate(&before, &after, step.expected_outcome.as_deref()),
            )
            .await
            .map_err(|_| {
                EngineError::Timeout(format!("validation exceeded step timeout {deadline:?}"))
            })??;
            let achieved = validation.achieved;
            let rationale = validation.rationale.clone();
            record.validation = Some(validation);
            if !achieved {
                return Err(EngineError::UnexpectedStateChange(rationale));
            }
        }
        Ok(())
    }

    fn finish(
        &self,
        step_id: StepId,
        step: &ActionStep,
        attempts: Vec<AttemptRecord>,
        outcome: StepOutcome,
        started_at: DateTime<Utc>,
        started: Instant,
    ) -> StepReport {
        let duration = started.elapsed();
        match &outcome {
            StepOutcome::Completed => {
                info!(step = %step_id, attempts = attempts.len(), ?duration, "step completed");
            }
            StepOutcome::Failed { error, reason } => {
                warn!(step = %step_id, attempts = attempts.len(), %error, reason = %reason, "step failed");
            }
        }
        StepReport {
            run_id: self.run_id.clone(),
            step_id,
            step: step.clone(),
            attempts,
            outcome,
            started_at,
            duration,
        }
    }
}
