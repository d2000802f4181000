//! Unified error taxonomy for the step execution engine

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Classified error kind, used by recovery to pick a strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ElementNotFound,
    ActionRejected,
    Timeout,
    InferenceService,
    UnexpectedStateChange,
    CacheCorruption,
    InvalidStep,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::ElementNotFound => "element_not_found",
            ErrorKind::ActionRejected => "action_rejected",
            ErrorKind::Timeout => "timeout",
            ErrorKind::InferenceService => "inference_service",
            ErrorKind::UnexpectedStateChange => "unexpected_state_change",
            ErrorKind::CacheCorruption => "cache_corruption",
            ErrorKind::InvalidStep => "invalid_step",
        };
        write!(f, "{name}")
    }
}

/// Engine-level error shared across all components
#[derive(Debug, Error, Clone)]
pub enum EngineError {
    /// No candidate for the target description could be located
    #[error("element not found: {0}")]
    ElementNotFound(String),

    /// The browser runtime rejected the physical operation
    #[error("action rejected by runtime: {0}")]
    ActionRejected(String),

    /// A browser or inference operation exceeded its deadline
    #[error("timeout: {0}")]
    Timeout(String),

    /// The vision-inference capability failed or rate-limited
    #[error("inference service error: {0}")]
    InferenceService(String),

    /// Validation found the page in a state the step did not expect
    #[error("unexpected state change: {0}")]
    UnexpectedStateChange(String),

    /// A cache entry could not be interpreted; treated as a miss by the
    /// cache itself, surfaced only for logging
    #[error("cache corruption: {0}")]
    CacheCorruption(String),

    /// Malformed action step; configuration error, never retried
    #[error("invalid step: {0}")]
    InvalidStep(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::ElementNotFound(_) => ErrorKind::ElementNotFound,
            EngineError::ActionRejected(_) => ErrorKind::ActionRejected,
            EngineError::Timeout(_) => ErrorKind::Timeout,
            EngineError::InferenceService(_) => ErrorKind::InferenceService,
            EngineError::UnexpectedStateChange(_) => ErrorKind::UnexpectedStateChange,
            EngineError::CacheCorruption(_) => ErrorKind::CacheCorruption,
            EngineError::InvalidStep(_) => ErrorKind::InvalidStep,
        }
    }

    /// Whether local recovery may be attempted for this error
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            EngineError::InvalidStep(_) | EngineError::CacheCorruption(_)
        )
    }
}

/// Errors raised by the browser capability
#[derive(Debug, Error, Clone)]
pub enum BrowserError {
    /// The runtime refused the operation (obscured element, detached
    /// node, intercepted pointer event)
    #[error("operation rejected by runtime: {0}")]
    Rejected(String),

    /// The operation exceeded its deadline
    #[error("browser timeout: {0}")]
    Timeout(String),

    /// Transport or protocol failure talking to the browser
    #[error("browser i/o error: {0}")]
    Io(String),
}

impl From<BrowserError> for EngineError {
    fn from(err: BrowserError) -> Self {
        match err {
            BrowserError::Rejected(msg) => EngineError::ActionRejected(msg),
            BrowserError::Timeout(msg) => EngineError::Timeout(msg),
            BrowserError::Io(msg) => EngineError::ActionRejected(format!("browser i/o: {msg}")),
        }
    }
}

/// Errors raised by the vision-inference capability
#[derive(Debug, Error, Clone)]
pub enum InferenceError {
    #[error("inference rate limited: {0}")]
    RateLimited(String),

    #[error("inference timeout: {0}")]
    Timeout(String),

    #[error("inference service failure: {0}")]
    Service(String),

    #[error("malformed inference response: {0}")]
    MalformedResponse(String),
}

impl From<InferenceError> for EngineError {
    fn from(err: InferenceError) -> Self {
        EngineError::InferenceService(err.to_string())
    }
}
