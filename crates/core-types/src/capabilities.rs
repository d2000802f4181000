//! Capability traits consumed by the engine
//!
//! The browser process and the remote vision-inference service are
//! collaborators, not part of this engine. They are reached through
//! these seams; the engine itself never spawns a browser or calls a
//! model API directly.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::{BrowserError, InferenceError};
use crate::model::{PageContext, Screenshot, ScrollDirection};

/// Options for a click operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClickOptions {
    /// Number of clicks (2 for double-click)
    pub click_count: u32,
}

impl Default for ClickOptions {
    fn default() -> Self {
        Self { click_count: 1 }
    }
}

/// One live browser session
///
/// All calls are fallible: the runtime may reject an operation or time
/// out, and both conditions are distinguishable in [`BrowserError`].
#[async_trait]
pub trait BrowserSession: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<(), BrowserError>;

    async fn screenshot(&self) -> Result<Screenshot, BrowserError>;

    async fn click(&self, x: f64, y: f64, options: &ClickOptions) -> Result<(), BrowserError>;

    async fn type_text(&self, text: &str, x: f64, y: f64) -> Result<(), BrowserError>;

    async fn scroll(&self, direction: ScrollDirection, amount: i64) -> Result<(), BrowserError>;

    async fn execute_script(&self, src: &str) -> Result<Value, BrowserError>;

    async fn current_context(&self) -> Result<PageContext, BrowserError>;
}

/// Remote vision-inference capability
///
/// `analyze` returns the raw structured JSON from the model; parsing
/// into typed results is the caller's concern.
#[async_trait]
pub trait VisionInference: Send + Sync {
    async fn analyze(&self, image: &Screenshot, prompt: &str) -> Result<Value, InferenceError>;
}

/// Observable per-process counters for inference usage
///
/// Incremented by the locator and the validator after each inference
/// call. The engine exposes the numbers; budget policy lives upstream.
#[derive(Debug, Default)]
pub struct InferenceMeter {
    calls: AtomicU64,
    total_latency_ms: AtomicU64,
}

impl InferenceMeter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one completed inference call
    pub fn record(&self, latency: Duration) {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ms
            .fetch_add(latency.as_millis() as u64, Ordering::Relaxed);
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MeterSnapshot {
        MeterSnapshot {
            calls: self.calls.load(Ordering::Relaxed),
            total_latency_ms: self.total_latency_ms.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the meter counters
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MeterSnapshot {
    pub calls: u64,
    pub total_latency_ms: u64,
}
