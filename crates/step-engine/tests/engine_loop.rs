//! End-to-end engine loop tests with a scripted browser and vision
//! service

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use image::{ImageBuffer, Rgba};
use parking_lot::Mutex;
use serde_json::{json, Value};

use action_performer::PerformerConfig;
use recovery_coordinator::RecoveryConfig;
use step_engine::{EngineConfig, StepEngine, StepOutcome};
use visionflow_core_types::{
    ActionKind, ActionStep, BrowserError, BrowserSession, CandidateSource, ClickOptions,
    ErrorKind, ImageFormat, InferenceError, PageContext, Screenshot, ScrollDirection,
    VisionInference,
};

fn encode(width: u32, height: u32, pixel: impl Fn(u32, u32) -> Rgba<u8>) -> Screenshot {
    let img = ImageBuffer::from_fn(width, height, pixel);
    let mut buf = Vec::new();
    img.write_to(
        &mut std::io::Cursor::new(&mut buf),
        image::ImageFormat::Png,
    )
    .unwrap();
    Screenshot::new(buf, ImageFormat::Png, width, height)
}

fn page() -> Screenshot {
    encode(128, 128, |_, _| Rgba([235, 235, 235, 255]))
}

fn page_with_banner() -> Screenshot {
    encode(128, 128, |x, y| {
        if y < 40 && x > 8 {
            Rgba([40, 120, 40, 255])
        } else {
            Rgba([235, 235, 235, 255])
        }
    })
}

struct MockBrowser {
    /// Screenshots returned in order; the last one repeats
    screenshots: Mutex<VecDeque<Screenshot>>,
    fallback_screenshot: Screenshot,
    /// Scripted click results; Ok once exhausted
    click_results: Mutex<VecDeque<Result<(), BrowserError>>>,
    /// Scripted script results; Ok(null) once exhausted
    script_results: Mutex<VecDeque<Result<Value, BrowserError>>>,
    /// Pause before every click resolves, for deadline tests
    click_delay: Duration,
    clicks: AtomicUsize,
    scrolls: AtomicUsize,
}

impl MockBrowser {
    fn steady(shot: Screenshot) -> Self {
        Self {
            screenshots: Mutex::new(VecDeque::new()),
            fallback_screenshot: shot,
            click_results: Mutex::new(VecDeque::new()),
            script_results: Mutex::new(VecDeque::new()),
            click_delay: Duration::ZERO,
            clicks: AtomicUsize::new(0),
            scrolls: AtomicUsize::new(0),
        }
    }

    fn with_screenshots(shots: Vec<Screenshot>, then: Screenshot) -> Self {
        Self {
            screenshots: Mutex::new(shots.into()),
            ..Self::steady(then)
        }
    }

    fn with_click_delay(mut self, delay: Duration) -> Self {
        self.click_delay = delay;
        self
    }

    fn script_clicks(self, results: Vec<Result<(), BrowserError>>) -> Self {
        *self.click_results.lock() = results.into();
        self
    }

    fn script_scripts(self, results: Vec<Result<Value, BrowserError>>) -> Self {
        *self.script_results.lock() = results.into();
        self
    }

    fn clicks(&self) -> usize {
        self.clicks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrowserSession for MockBrowser {
    async fn navigate(&self, _: &str) -> Result<(), BrowserError> {
        Ok(())
    }

    async fn screenshot(&self) -> Result<Screenshot, BrowserError> {
        Ok(self
            .screenshots
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback_screenshot.clone()))
    }

    async fn click(&self, _: f64, _: f64, _: &ClickOptions) -> Result<(), BrowserError> {
        self.clicks.fetch_add(1, Ordering::SeqCst);
        if !self.click_delay.is_zero() {
            tokio::time::sleep(self.click_delay).await;
        }
        self.click_results.lock().pop_front().unwrap_or(Ok(()))
    }

    async fn type_text(&self, _: &str, _: f64, _: f64) -> Result<(), BrowserError> {
        Ok(())
    }

    async fn scroll(&self, _: ScrollDirection, _: i64) -> Result<(), BrowserError> {
        self.scrolls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn execute_script(&self, _: &str) -> Result<Value, BrowserError> {
        self.script_results
            .lock()
            .pop_front()
            .unwrap_or(Ok(Value::Null))
    }

    async fn current_context(&self) -> Result<PageContext, BrowserError> {
        Ok(PageContext::new("https://shop.example/checkout", "Checkout"))
    }
}

struct MockVision {
    /// Responses returned in order; the last one repeats
    responses: Mutex<VecDeque<Result<Value, InferenceError>>>,
    fallback: Result<Value, InferenceError>,
    calls: AtomicUsize,
}

impl MockVision {
    fn scripted(responses: Vec<Result<Value, InferenceError>>) -> Self {
        let fallback = responses
            .last()
            .cloned()
            .unwrap_or_else(|| Err(InferenceError::Service("no scripted response".into())));
        Self {
            responses: Mutex::new(responses.into()),
            fallback,
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VisionInference for MockVision {
    async fn analyze(&self, _: &Screenshot, _: &str) -> Result<Value, InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut queue = self.responses.lock();
        if queue.len() > 1 {
            queue.pop_front().unwrap_or_else(|| self.fallback.clone())
        } else {
            queue.front().cloned().unwrap_or_else(|| self.fallback.clone())
        }
    }
}

fn detection(confidence: f64) -> Value {
    json!({
        "found": true,
        "confidence": confidence,
        "bounding_box": {"x": 40, "y": 60, "width": 80, "height": 30},
        "element_type": "button",
        "visible_text": "Place order"
    })
}

fn not_found() -> Value {
    json!({"found": false, "confidence": 0.0})
}

fn verdict(achieved: bool) -> Value {
    json!({
        "achieved": achieved,
        "confidence": 0.9,
        "rationale": if achieved { "confirmation visible" } else { "page unchanged" }
    })
}

fn click_step(max_attempts: u8) -> ActionStep {
    ActionStep {
        kind: ActionKind::Click,
        target: "the Place order button".into(),
        input_data: None,
        expected_outcome: Some("an order confirmation appears".into()),
        timeout: Duration::from_secs(5),
        max_attempts,
    }
}

/// Fast-running config for tests
fn test_config() -> EngineConfig {
    EngineConfig {
        performer: PerformerConfig {
            settle_delay: Duration::from_millis(1),
            ..Default::default()
        },
        recovery: RecoveryConfig {
            wait_before_retry: Duration::ZERO,
            backoff_base: Duration::ZERO,
            ..Default::default()
        },
        ..Default::default()
    }
}

fn engine_with(browser: Arc<MockBrowser>, vision: Arc<MockVision>) -> StepEngine {
    StepEngine::new(browser, vision, test_config())
}

#[tokio::test]
async fn click_that_changes_the_page_completes_in_one_attempt() {
    let browser = Arc::new(MockBrowser::with_screenshots(
        vec![page(), page()],
        page_with_banner(),
    ));
    let vision = Arc::new(MockVision::scripted(vec![
        Ok(detection(0.9)),
        Ok(verdict(true)),
    ]));
    let engine = engine_with(browser.clone(), vision.clone());

    let report = engine.run_step(&click_step(3)).await;

    assert!(report.succeeded());
    assert_eq!(report.attempts.len(), 1);
    assert_eq!(browser.clicks(), 1);
    // One detection call, one judgment call
    assert_eq!(vision.calls(), 2);

    let attempt = &report.attempts[0];
    assert_eq!(
        attempt.action.as_ref().unwrap().strategy_used.as_deref(),
        Some("coordinate_click")
    );
    assert!(attempt.validation.as_ref().unwrap().achieved);

    // The report serializes whole, with a millisecond timestamp
    let json = serde_json::to_value(&report).unwrap();
    assert!(json["started_at"].is_i64());
}

#[tokio::test]
async fn slow_click_times_out_then_succeeds_under_the_extended_deadline() {
    // 75ms clicks against a 50ms step timeout; the extension doubles
    // the deadline to 100ms, which the second attempt fits into.
    let browser = Arc::new(
        MockBrowser::steady(page()).with_click_delay(Duration::from_millis(75)),
    );
    let vision = Arc::new(MockVision::scripted(vec![Ok(detection(0.9))]));
    let engine = engine_with(browser.clone(), vision);

    let mut step = click_step(3);
    step.timeout = Duration::from_millis(50);
    step.expected_outcome = None;
    let report = engine.run_step(&step).await;

    assert!(report.succeeded());
    assert_eq!(report.attempts.len(), 2);

    let first = &report.attempts[0];
    assert_eq!(
        first.recovery.as_ref().unwrap().error,
        ErrorKind::Timeout
    );
    assert_eq!(
        first.recovery.as_ref().unwrap().strategy,
        "retry_extended_timeout"
    );
    let action = report.attempts[1].action.as_ref().unwrap();
    assert_eq!(action.strategy_used.as_deref(), Some("coordinate_click"));
}

#[tokio::test]
async fn transport_errored_strategy_is_retried_on_resume() {
    // Coordinate click is rejected outright; scroll_and_retry then
    // dies on transport. The resumed attempt must re-run
    // scroll_and_retry rather than skip past it.
    let browser = Arc::new(MockBrowser::steady(page()).script_clicks(vec![
        Err(BrowserError::Rejected("overlay in the way".into())),
        Err(BrowserError::Io("socket closed".into())),
    ]));
    let vision = Arc::new(MockVision::scripted(vec![Ok(detection(0.9))]));
    let engine = engine_with(browser, vision);

    let mut step = click_step(3);
    step.expected_outcome = None;
    let report = engine.run_step(&step).await;

    assert!(report.succeeded());
    assert_eq!(report.attempts.len(), 2);
    assert_eq!(
        report.attempts[0].recovery.as_ref().unwrap().strategy,
        "substitute_strategy"
    );

    let resumed = report.attempts[1].action.as_ref().unwrap();
    assert_eq!(resumed.strategy_used.as_deref(), Some("scroll_and_retry"));
    // scroll_and_retry ran first in the resumed chain
    assert_eq!(resumed.strategies_tried.len(), 1);
}

#[tokio::test]
async fn ghost_element_fails_terminally_after_two_attempts() {
    let browser = Arc::new(MockBrowser::steady(page()));
    let vision = Arc::new(MockVision::scripted(vec![Ok(not_found())]));
    let engine = engine_with(browser.clone(), vision);

    let report = engine.run_step(&click_step(2)).await;

    assert!(!report.succeeded());
    assert_eq!(report.failure_kind(), Some(ErrorKind::ElementNotFound));
    // One original attempt plus exactly one relaxed retry
    assert_eq!(report.attempts.len(), 2);
    assert_eq!(browser.clicks(), 0);

    let first = report.attempts[0].recovery.as_ref().unwrap();
    assert_eq!(first.strategy, "retry_relaxed_floor");
    let last = report.attempts[1].recovery.as_ref().unwrap();
    assert_eq!(last.strategy, "abort");
}

#[tokio::test]
async fn rejected_click_succeeds_through_scroll_and_retry() {
    let browser = Arc::new(
        MockBrowser::with_screenshots(vec![page(), page(), page()], page_with_banner())
            .script_clicks(vec![Err(BrowserError::Rejected("overlay in the way".into()))]),
    );
    let vision = Arc::new(MockVision::scripted(vec![
        Ok(detection(0.9)),
        Ok(verdict(true)),
    ]));
    let engine = engine_with(browser.clone(), vision);

    let report = engine.run_step(&click_step(3)).await;

    assert!(report.succeeded());
    assert_eq!(report.attempts.len(), 1);

    let action = report.attempts[0].action.as_ref().unwrap();
    assert_eq!(action.strategy_used.as_deref(), Some("scroll_and_retry"));
    assert_eq!(action.strategies_tried.len(), 2);
}

#[tokio::test]
async fn fully_rejected_chain_is_a_terminal_rejection() {
    let browser = Arc::new(
        MockBrowser::steady(page())
            .script_clicks(vec![
                Err(BrowserError::Rejected("not clickable".into())),
                Err(BrowserError::Rejected("still not clickable".into())),
            ])
            .script_scripts(vec![Err(BrowserError::Rejected(
                "script click refused".into(),
            ))]),
    );
    let vision = Arc::new(MockVision::scripted(vec![Ok(detection(0.9))]));
    let engine = engine_with(browser, vision);

    let report = engine.run_step(&click_step(5)).await;

    assert!(!report.succeeded());
    assert_eq!(report.failure_kind(), Some(ErrorKind::ActionRejected));
    match &report.outcome {
        StepOutcome::Failed { reason, .. } => {
            assert_eq!(reason, "strategy chain exhausted")
        }
        StepOutcome::Completed => panic!("expected failure"),
    }
    // The whole chain was burned within the first attempt
    assert_eq!(report.attempts.len(), 1);
    assert_eq!(
        report.attempts[0]
            .action
            .as_ref()
            .unwrap()
            .strategies_tried
            .len(),
        3
    );
}

#[tokio::test]
async fn identical_page_and_instruction_skip_inference_on_the_second_run() {
    let browser = Arc::new(MockBrowser::steady(page()));
    let vision = Arc::new(MockVision::scripted(vec![Ok(detection(0.9))]));
    let engine = engine_with(browser, vision.clone());

    // No expected outcome: validation passes without a judgment call
    let mut step = click_step(3);
    step.expected_outcome = None;

    let first = engine.run_step(&step).await;
    let second = engine.run_step(&step).await;

    assert!(first.succeeded());
    assert!(second.succeeded());
    assert_eq!(vision.calls(), 1);
    assert_eq!(
        second.attempts[0].candidates[0].source,
        CandidateSource::Cache
    );
}

#[tokio::test]
async fn attempts_never_exceed_the_step_budget() {
    let browser = Arc::new(MockBrowser::steady(page()));
    let vision = Arc::new(MockVision::scripted(vec![Ok(not_found())]));
    let engine = engine_with(browser, vision);

    let report = engine.run_step(&click_step(3)).await;

    assert!(!report.succeeded());
    assert_eq!(report.attempts.len(), 3);
    for (i, attempt) in report.attempts.iter().enumerate() {
        assert_eq!(attempt.index as usize, i + 1);
        assert!(attempt.recovery.is_some());
    }
}

#[tokio::test]
async fn wait_steps_pause_without_detection_or_validation() {
    let browser = Arc::new(MockBrowser::steady(page()));
    let vision = Arc::new(MockVision::scripted(vec![Ok(detection(0.9))]));
    let engine = engine_with(browser, vision.clone());

    let step = ActionStep {
        kind: ActionKind::Wait,
        target: String::new(),
        input_data: Some("10".into()),
        expected_outcome: None,
        timeout: Duration::from_secs(5),
        max_attempts: 1,
    };
    let report = engine.run_step(&step).await;

    assert!(report.succeeded());
    assert_eq!(vision.calls(), 0);
    assert!(report.attempts[0].candidates.is_empty());
    assert!(report.attempts[0].validation.is_none());
}

#[tokio::test]
async fn lying_judgment_on_an_unchanged_page_fails_the_step() {
    // The page never changes, yet the judge claims success; the
    // structural guard overrules it and the step fails terminally.
    let browser = Arc::new(MockBrowser::steady(page()));
    let vision = Arc::new(MockVision::scripted(vec![
        Ok(detection(0.9)),
        Ok(verdict(true)),
    ]));
    let engine = engine_with(browser, vision);

    let report = engine.run_step(&click_step(3)).await;

    assert!(!report.succeeded());
    assert_eq!(
        report.failure_kind(),
        Some(ErrorKind::UnexpectedStateChange)
    );
    let validation = report.attempts[0].validation.as_ref().unwrap();
    assert!(!validation.achieved);
    assert!(validation.confidence <= 0.2);
}

#[tokio::test]
async fn malformed_steps_fail_before_any_browser_traffic() {
    let browser = Arc::new(MockBrowser::steady(page()));
    let vision = Arc::new(MockVision::scripted(vec![Ok(detection(0.9))]));
    let engine = engine_with(browser.clone(), vision.clone());

    let step = ActionStep {
        kind: ActionKind::Type,
        target: "the search box".into(),
        input_data: None,
        expected_outcome: None,
        timeout: Duration::from_secs(5),
        max_attempts: 3,
    };
    let report = engine.run_step(&step).await;

    assert!(!report.succeeded());
    assert_eq!(report.failure_kind(), Some(ErrorKind::InvalidStep));
    assert_eq!(report.attempts.len(), 1);
    assert_eq!(vision.calls(), 0);
    assert_eq!(browser.clicks(), 0);
}
