//! Outcome validator - did the action do what the step expected?
//!
//! Combines a structural before/after comparison with a semantic
//! judgment from the vision service. The structural pass also guards
//! the semantic pass: a judgment that claims success over a visually
//! static screen is treated as hallucination and downgraded.

pub mod diff;
pub mod validator;

pub use diff::{compare, DiffConfig, StructuralDiff};
pub use validator::{OutcomeValidator, ValidatorConfig, ValidatorStats};
