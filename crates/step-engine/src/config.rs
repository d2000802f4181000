//! Aggregated engine configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

use action_performer::PerformerConfig;
use element_locator::LocatorConfig;
use outcome_validator::ValidatorConfig;
use recovery_coordinator::RecoveryConfig;

/// All per-component tunables in one place
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct EngineConfig {
    pub cache: CacheConfig,
    pub locator: LocatorConfig,
    pub performer: PerformerConfig,
    pub validator: ValidatorConfig,
    pub recovery: RecoveryConfig,
}

/// Sizing for the shared response cache
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of cached entries
    pub capacity: usize,

    /// Default entry lifetime
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 256,
            ttl: Duration::from_secs(300),
        }
    }
}
