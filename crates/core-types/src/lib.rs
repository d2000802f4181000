//! Shared types for the vision-driven step execution engine
//!
//! This crate holds everything the component crates exchange:
//! - the data model (screenshots, candidates, steps, results)
//! - the unified error taxonomy
//! - the capability traits for the browser and the vision service

pub mod capabilities;
pub mod errors;
pub mod model;

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// Re-exports
pub use capabilities::{
    BrowserSession, ClickOptions, InferenceMeter, MeterSnapshot, VisionInference,
};
pub use errors::{BrowserError, EngineError, ErrorKind, InferenceError};
pub use model::*;

/// Identifier for one automation run (one browser session)
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier for one action step within a run
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct StepId(pub String);

impl StepId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for StepId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
