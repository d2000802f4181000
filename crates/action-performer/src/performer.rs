//! Strategy-chain execution of physical actions

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use visionflow_core_types::{
    ActionKind, ActionResult, BrowserError, BrowserSession, ClickOptions, ElementCandidate,
    EngineError, Screenshot, ScrollDirection, StrategyAttempt, StrategyOutcome,
};

use crate::strategies::{chain_for, Strategy};

/// Tunable performer parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformerConfig {
    /// Pause after an accepted strategy so asynchronous UI updates can
    /// land before the after-screenshot
    pub settle_delay: Duration,

    /// Scroll distance for scroll strategies, in device pixels
    pub scroll_amount: i64,

    /// Pause for wait steps when the step carries no explicit duration
    pub default_wait: Duration,
}

impl Default for PerformerConfig {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(500),
            scroll_amount: 600,
            default_wait: Duration::from_secs(1),
        }
    }
}

/// Execution state for one action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ActionState {
    NotStarted,
    StrategyAttempted,
    Success,
    StrategyExhausted,
}

/// Executes a single physical action against a located target
pub struct ActionPerformer {
    session: Arc<dyn BrowserSession>,
    config: PerformerConfig,
}

impl ActionPerformer {
    pub fn new(session: Arc<dyn BrowserSession>, config: PerformerConfig) -> Self {
        Self { session, config }
    }

    /// Execute the full strategy chain for `kind`
    pub async fn execute(
        &self,
        candidate: Option<&ElementCandidate>,
        kind: ActionKind,
        input: Option<&str>,
    ) -> Result<ActionResult, EngineError> {
        self.execute_from(candidate, kind, input, 0).await
    }

    /// Execute the chain starting at `skip`, for resuming past
    /// strategies a previous attempt already burned
    pub async fn execute_from(
        &self,
        candidate: Option<&ElementCandidate>,
        kind: ActionKind,
        input: Option<&str>,
        skip: usize,
    ) -> Result<ActionResult, EngineError> {
        if kind.requires_target() && candidate.is_none() {
            return Err(EngineError::InvalidStep(format!(
                "{kind:?} action needs a located target"
            )));
        }
        if kind.requires_input() && input.map(str::trim).map_or(true, str::is_empty) {
            return Err(EngineError::InvalidStep(format!(
                "{kind:?} action needs input data"
            )));
        }

        let chain = chain_for(kind);
        let started = Instant::now();
        let mut state = ActionState::NotStarted;
        debug!(?state, ?kind, skip, "executing action");
        let mut tried: Vec<StrategyAttempt> = Vec::new();
        let mut last_before: Option<Arc<Screenshot>> = None;
        let mut last_error: Option<String> = None;

        for strategy in chain.iter().skip(skip) {
            state = ActionState::StrategyAttempted;
            debug!(?state, strategy = strategy.name(), ?kind, "attempting strategy");

            let before = Arc::new(self.session.screenshot().await.map_err(EngineError::from)?);
            last_before = Some(before.clone());

            match self.attempt(*strategy, candidate, input).await {
                Ok(()) => {
                    state = ActionState::Success;
                    tried.push(StrategyAttempt {
                        strategy: strategy.name().to_string(),
                        outcome: StrategyOutcome::Accepted,
                    });
                    // Let asynchronous UI updates complete
                    tokio::time::sleep(self.config.settle_delay).await;
                    let after =
                        Arc::new(self.session.screenshot().await.map_err(EngineError::from)?);

                    info!(
                        ?state,
                        strategy = strategy.name(),
                        latency_ms = started.elapsed().as_millis() as u64,
                        "action accepted"
                    );
                    return Ok(ActionResult {
                        success: true,
                        strategy_used: Some(strategy.name().to_string()),
                        strategies_tried: tried,
                        duration: started.elapsed(),
                        before: Some(before),
                        after: Some(after),
                        error: None,
                    });
                }
                Err(BrowserError::Rejected(msg)) => {
                    warn!(strategy = strategy.name(), %msg, "runtime rejected strategy");
                    last_error = Some(msg.clone());
                    tried.push(StrategyAttempt {
                        strategy: strategy.name().to_string(),
                        outcome: StrategyOutcome::Rejected(msg),
                    });
                    // Advance to the next strategy in the chain
                }
                Err(BrowserError::Timeout(msg)) => {
                    return Err(EngineError::Timeout(format!(
                        "{} timed out: {msg}",
                        strategy.name()
                    )));
                }
                Err(BrowserError::Io(msg)) => {
                    // Transport trouble is not a rejection; stop here so
                    // recovery can decide whether to resume the chain
                    warn!(strategy = strategy.name(), %msg, "strategy errored, stopping chain");
                    last_error = Some(msg.clone());
                    tried.push(StrategyAttempt {
                        strategy: strategy.name().to_string(),
                        outcome: StrategyOutcome::Errored(msg),
                    });
                    break;
                }
            }
        }

        state = ActionState::StrategyExhausted;
        debug!(?state, ?kind, tried = tried.len(), "no strategy accepted");
        Ok(ActionResult {
            success: false,
            strategy_used: None,
            strategies_tried: tried,
            duration: started.elapsed(),
            before: last_before,
            after: None,
            error: Some(last_error.unwrap_or_else(|| "no strategies remaining".to_string())),
        })
    }

    async fn attempt(
        &self,
        strategy: Strategy,
        candidate: Option<&ElementCandidate>,
        input: Option<&str>,
    ) -> Result<(), BrowserError> {
        let (x, y) = candidate.map(|c| c.bounds.center()).unwrap_or((0.0, 0.0));

        match strategy {
            Strategy::CoordinateClick => {
                self.session.click(x, y, &ClickOptions::default()).await
            }
            Strategy::ScrollAndRetry => {
                self.session
                    .scroll(ScrollDirection::Down, self.config.scroll_amount)
                    .await?;
                self.session.click(x, y, &ClickOptions::default()).await
            }
            Strategy::ScriptClick => {
                let src = format!(
                    "(() => {{ const el = document.elementFromPoint({x:.0}, {y:.0}); \
                     if (!el) throw new Error('no element at point'); el.click(); }})()"
                );
                self.session.execute_script(&src).await.map(|_| ())
            }
            Strategy::DirectType => {
                let text = input.unwrap_or_default();
                self.session.type_text(text, x, y).await
            }
            Strategy::ScriptSetValue => {
                let value = serde_json::to_string(input.unwrap_or_default())
                    .unwrap_or_else(|_| "\"\"".to_string());
                let src = format!(
                    "(() => {{ const el = document.elementFromPoint({x:.0}, {y:.0}); \
                     if (!el) throw new Error('no element at point'); \
                     el.value = {value}; \
                     el.dispatchEvent(new Event('input', {{ bubbles: true }})); \
                     el.dispatchEvent(new Event('change', {{ bubbles: true }})); }})()"
                );
                self.session.execute_script(&src).await.map(|_| ())
            }
            Strategy::WheelScroll => {
                let direction = parse_direction(input);
                self.session
                    .scroll(direction, self.config.scroll_amount)
                    .await
            }
            Strategy::ScriptScroll => {
                let (dx, dy) = scroll_delta(parse_direction(input), self.config.scroll_amount);
                let src = format!("window.scrollBy({dx}, {dy})");
                self.session.execute_script(&src).await.map(|_| ())
            }
            Strategy::TimedWait => {
                tokio::time::sleep(wait_duration(input, self.config.default_wait)).await;
                Ok(())
            }
            Strategy::ScriptUpload => {
                let path = serde_json::to_string(input.unwrap_or_default())
                    .unwrap_or_else(|_| "\"\"".to_string());
                // Populate input.files with a DataTransfer so the page's
                // change handlers see a real FileList entry
                let src = format!(
                    "(() => {{ const el = document.elementFromPoint({x:.0}, {y:.0}); \
                     const target = el && el.closest('input[type=\"file\"]'); \
                     if (!target) throw new Error('no file input at point'); \
                     const name = {path}.split(/[\\\\/]/).pop() || 'upload'; \
                     const transfer = new DataTransfer(); \
                     transfer.items.add(new File([''], name)); \
                     target.files = transfer.files; \
                     target.dispatchEvent(new Event('change', {{ bubbles: true }})); }})()"
                );
                self.session.execute_script(&src).await.map(|_| ())
            }
        }
    }
}

fn parse_direction(input: Option<&str>) -> ScrollDirection {
    match input.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
        Some("up") => ScrollDirection::Up,
        Some("left") => ScrollDirection::Left,
        Some("right") => ScrollDirection::Right,
        _ => ScrollDirection::Down,
    }
}

fn scroll_delta(direction: ScrollDirection, amount: i64) -> (i64, i64) {
    match direction {
        ScrollDirection::Up => (0, -amount),
        ScrollDirection::Down => (0, amount),
        ScrollDirection::Left => (-amount, 0),
        ScrollDirection::Right => (amount, 0),
    }
}

fn wait_duration(input: Option<&str>, default: Duration) -> Duration {
    input
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}
