//! Action performer - executes one physical action against a located
//! target
//!
//! Each action kind has an ordered strategy chain; strategies are tried
//! in declared order until the runtime accepts one. The performer only
//! cares about acceptance; whether the action actually achieved its
//! intended outcome is the validator's job.

pub mod performer;
pub mod strategies;

pub use performer::{ActionPerformer, PerformerConfig};
pub use strategies::{chain_for, Strategy};
