//! Response cache for expensive inference results
//!
//! Maps (image fingerprint, instruction fingerprint) pairs to prior
//! detection or validation results so the same question is never asked
//! of the vision service twice within the TTL. Shared across concurrent
//! runs; writes are idempotent and last-writer-wins.

pub mod cache;
pub mod fingerprint;

pub use cache::{CacheStats, CachedOutcome, ResponseCache};
pub use fingerprint::Fingerprint;
