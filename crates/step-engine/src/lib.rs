//! Step engine - the detect, act, validate, recover loop
//!
//! One engine instance drives one browser session. Steps run strictly
//! sequentially; the response cache may be shared between engines.

pub mod config;
pub mod engine;
pub mod report;

pub use config::EngineConfig;
pub use engine::StepEngine;
pub use report::{AttemptRecord, StepOutcome, StepReport};
