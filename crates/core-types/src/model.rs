//! Core data model for the step execution engine

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::EngineError;

/// How many prior actions a [`PageContext`] keeps
pub const RECENT_ACTION_WINDOW: usize = 3;

/// Bounding box in page coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Center point of the box
    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn area(&self) -> f64 {
        self.width * self.height
    }

    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.x < other.x + other.width
            && other.x < self.x + self.width
            && self.y < other.y + other.height
            && other.y < self.y + self.height
    }

    /// Uniformly scale the box (used to map boxes detected on a
    /// downscaled screenshot back to source resolution)
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            x: self.x * factor,
            y: self.y * factor,
            width: self.width * factor,
            height: self.height * factor,
        }
    }
}

/// Image format for screenshots
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Jpeg,
}

/// Screenshot captured from a browser session
///
/// Immutable once captured; later comparisons hold `Arc` references to
/// it, the buffer is never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Screenshot {
    /// Unique identifier for the screenshot
    pub id: String,

    /// Raw encoded image data (PNG or JPEG)
    pub data: Vec<u8>,

    /// Image format
    pub format: ImageFormat,

    /// Image dimensions
    pub width: u32,
    pub height: u32,

    /// Capture timestamp
    pub timestamp: SystemTime,
}

impl Screenshot {
    pub fn new(data: Vec<u8>, format: ImageFormat, width: u32, height: u32) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            data,
            format,
            width,
            height,
            timestamp: SystemTime::now(),
        }
    }
}

/// Read-only page context supplied by the browser collaborator
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageContext {
    /// Current URL
    pub url: String,

    /// Page title
    pub title: String,

    /// Last few actions performed on this page, oldest first
    pub recent_actions: Vec<String>,
}

impl PageContext {
    pub fn new(url: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            title: title.into(),
            recent_actions: Vec::new(),
        }
    }

    /// Record an action, keeping only the last [`RECENT_ACTION_WINDOW`]
    pub fn push_action(&mut self, action: impl Into<String>) {
        self.recent_actions.push(action.into());
        while self.recent_actions.len() > RECENT_ACTION_WINDOW {
            self.recent_actions.remove(0);
        }
    }
}

/// Kind of UI element a candidate was classified as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    Button,
    Link,
    Input,
    Checkbox,
    Dropdown,
    Icon,
    Text,
    Unknown,
}

impl ElementKind {
    /// Parse the loose element-type strings the vision service returns
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "button" | "submit" => ElementKind::Button,
            "link" | "a" | "anchor" => ElementKind::Link,
            "input" | "textbox" | "text_field" | "field" | "textarea" => ElementKind::Input,
            "checkbox" | "radio" | "toggle" => ElementKind::Checkbox,
            "dropdown" | "select" | "combobox" => ElementKind::Dropdown,
            "icon" | "image" => ElementKind::Icon,
            "text" | "label" | "heading" => ElementKind::Text,
            _ => ElementKind::Unknown,
        }
    }
}

/// Where a candidate came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateSource {
    Cache,
    Inference,
    Fallback,
}

/// A detected UI element candidate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElementCandidate {
    /// Bounding box in source-screenshot coordinates
    pub bounds: BoundingBox,

    /// Classified element kind
    pub kind: ElementKind,

    /// Visible text on or near the element, if any
    pub visible_text: Option<String>,

    /// Detection confidence in [0, 1]
    pub confidence: f64,

    /// Where this candidate came from
    pub source: CandidateSource,
}

impl ElementCandidate {
    /// Copy with bounds scaled back to source resolution
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            bounds: self.bounds.scaled(factor),
            ..self.clone()
        }
    }

    /// Copy re-tagged with a different source
    pub fn with_source(&self, source: CandidateSource) -> Self {
        Self {
            source,
            ..self.clone()
        }
    }
}

/// Tagged action kind, dispatched via an explicit strategy table per kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Click,
    Type,
    Scroll,
    Wait,
    Upload,
}

impl ActionKind {
    /// Whether this kind needs a located target element
    pub fn requires_target(&self) -> bool {
        !matches!(self, ActionKind::Wait)
    }

    /// Whether this kind needs input data to be meaningful
    pub fn requires_input(&self) -> bool {
        matches!(self, ActionKind::Type | ActionKind::Upload)
    }
}

/// Scroll direction for the browser capability
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScrollDirection {
    Up,
    Down,
    Left,
    Right,
}

/// One atomic action step issued by the upstream planner
///
/// Immutable once issued; the engine never mutates a step, retry
/// parameters travel separately.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionStep {
    /// What to do
    pub kind: ActionKind,

    /// Natural-language description of the target element
    pub target: String,

    /// Input data for type/upload actions
    pub input_data: Option<String>,

    /// Natural-language description of the expected outcome, if any
    pub expected_outcome: Option<String>,

    /// Per-step timeout for each browser/inference operation
    pub timeout: Duration,

    /// Attempt budget across all recovery cycles
    pub max_attempts: u8,
}

impl ActionStep {
    /// Reject malformed steps up front; these are configuration errors
    /// and are never retried.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.max_attempts == 0 {
            return Err(EngineError::InvalidStep(
                "max_attempts must be at least 1".to_string(),
            ));
        }
        if self.kind.requires_target() && self.target.trim().is_empty() {
            return Err(EngineError::InvalidStep(format!(
                "{:?} step requires a target description",
                self.kind
            )));
        }
        if self.kind.requires_input()
            && self
                .input_data
                .as_deref()
                .map(|s| s.trim().is_empty())
                .unwrap_or(true)
        {
            return Err(EngineError::InvalidStep(format!(
                "{:?} step requires input data",
                self.kind
            )));
        }
        Ok(())
    }
}

/// Outcome of one strategy attempt inside the performer chain
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyOutcome {
    /// Runtime accepted the operation
    Accepted,

    /// Runtime rejected the operation; the chain advances
    Rejected(String),

    /// Strategy failed for a non-rejection reason; the chain stops
    Errored(String),
}

/// Record of one strategy attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyAttempt {
    pub strategy: String,
    pub outcome: StrategyOutcome,
}

/// Result of executing a single physical action
#[derive(Debug, Clone, Serialize)]
pub struct ActionResult {
    /// Whether any strategy in the chain was accepted
    pub success: bool,

    /// Name of the accepted strategy, if any
    pub strategy_used: Option<String>,

    /// Every strategy tried, in chain order
    pub strategies_tried: Vec<StrategyAttempt>,

    /// Wall-clock duration of the whole execution
    pub duration: Duration,

    /// Screenshot captured immediately before the accepted (or last)
    /// strategy attempt
    pub before: Option<Arc<Screenshot>>,

    /// Screenshot captured after the settle delay
    pub after: Option<Arc<Screenshot>>,

    /// Terminal error detail when the chain was exhausted
    pub error: Option<String>,
}

/// Result of validating an action outcome
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    /// Whether the expected outcome was judged achieved
    pub achieved: bool,

    /// Confidence of the verdict in [0, 1]
    pub confidence: f64,

    /// Visual-change regions observed between before/after
    pub changed_regions: Vec<BoundingBox>,

    /// Human-readable rationale for the verdict
    pub rationale: String,
}

/// Outcome of a single recovery attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// A retry or substitution was issued
    Retried,

    /// The coordinator declared the step terminally failed
    Aborted,
}

/// Record of one recovery decision for a step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryAttempt {
    /// Classified error kind that triggered recovery
    pub error: crate::errors::ErrorKind,

    /// Name of the chosen recovery strategy
    pub strategy: String,

    /// 1-based attempt index; never exceeds the step's max_attempts
    pub attempt_index: u8,

    /// What the coordinator decided
    pub outcome: AttemptOutcome,
}
