//! Recovery coordinator - decides what to do when a step attempt fails
//!
//! Pure decision logic: the coordinator inspects the classified error,
//! the step, and the recovery history, and returns a decision. It never
//! touches the browser or the inference service itself.

pub mod coordinator;
pub mod types;

pub use coordinator::{RecoveryConfig, RecoveryCoordinator};
pub use types::{RecoveryDecision, RetryParams};
