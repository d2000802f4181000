//! The element locator proper

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use response_cache::{Fingerprint, ResponseCache};
use visionflow_core_types::{
    BrowserSession, CandidateSource, ElementCandidate, EngineError, InferenceMeter, PageContext,
    Screenshot, VisionInference,
};

use crate::fallback::fallback_candidates;
use crate::parse::parse_candidates;
use crate::preprocess::preprocess;
use crate::prompt::detection_prompt;

/// Tunable locator parameters
///
/// The numeric defaults are starting points, not validated constants;
/// deployments are expected to tune them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocatorConfig {
    /// Largest allowed screenshot dimension before downscaling
    pub max_dimension: u32,

    /// Candidates below this confidence are discarded
    pub confidence_floor: f64,

    /// Results at or above this confidence are written to the cache
    pub promotion_threshold: f64,

    /// Deadline for one inference call
    pub inference_timeout: Duration,

    /// Upper bound on fallback-path confidence
    pub fallback_confidence_cap: f64,
}

impl Default for LocatorConfig {
    fn default() -> Self {
        Self {
            max_dimension: 1568,
            confidence_floor: 0.3,
            promotion_threshold: 0.7,
            inference_timeout: Duration::from_secs(30),
            fallback_confidence_cap: 0.6,
        }
    }
}

/// Per-call overrides, used by recovery to relax detection
#[derive(Debug, Clone, Copy, Default)]
pub struct LocateOptions {
    /// Replace the configured confidence floor
    pub floor_override: Option<f64>,

    /// Skip inference entirely and go straight to the fallback path
    pub force_fallback: bool,

    /// Replace the configured inference timeout
    pub timeout_override: Option<Duration>,
}

/// Outcome of a locate call; NotFound is a normal result, not an error
#[derive(Debug, Clone)]
pub enum LocateOutcome {
    /// Candidates ranked by descending confidence
    Found(Vec<ElementCandidate>),
    NotFound,
}

impl LocateOutcome {
    pub fn is_found(&self) -> bool {
        matches!(self, LocateOutcome::Found(_))
    }

    pub fn candidates(&self) -> &[ElementCandidate] {
        match self {
            LocateOutcome::Found(candidates) => candidates,
            LocateOutcome::NotFound => &[],
        }
    }

    /// The best candidate, if any
    pub fn best(&self) -> Option<&ElementCandidate> {
        self.candidates().first()
    }
}

/// Counters for locator activity
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct LocatorStats {
    pub locates: u64,
    pub cache_hits: u64,
    pub fallback_used: u64,
    pub not_found: u64,
}

/// Locates UI elements from a screenshot and a natural-language
/// description
pub struct ElementLocator {
    inference: Arc<dyn VisionInference>,
    session: Arc<dyn BrowserSession>,
    cache: Arc<ResponseCache>,
    meter: Arc<InferenceMeter>,
    config: LocatorConfig,
    locates: AtomicU64,
    cache_hits: AtomicU64,
    fallback_used: AtomicU64,
    not_found: AtomicU64,
}

impl ElementLocator {
    pub fn new(
        inference: Arc<dyn VisionInference>,
        session: Arc<dyn BrowserSession>,
        cache: Arc<ResponseCache>,
        meter: Arc<InferenceMeter>,
        config: LocatorConfig,
    ) -> Self {
        Self {
            inference,
            session,
            cache,
            meter,
            config,
            locates: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            fallback_used: AtomicU64::new(0),
            not_found: AtomicU64::new(0),
        }
    }

    /// Locate with the configured defaults
    pub async fn locate(
        &self,
        screenshot: &Screenshot,
        instruction: &str,
        context: &PageContext,
    ) -> Result<LocateOutcome, EngineError> {
        self.locate_with(screenshot, instruction, context, LocateOptions::default())
            .await
    }

    /// Locate with per-call overrides
    pub async fn locate_with(
        &self,
        screenshot: &Screenshot,
        instruction: &str,
        context: &PageContext,
        options: LocateOptions,
    ) -> Result<LocateOutcome, EngineError> {
        self.locates.fetch_add(1, Ordering::Relaxed);
        let prepared = preprocess(screenshot, self.config.max_dimension)?;
        let floor = options
            .floor_override
            .unwrap_or(self.config.confidence_floor);
        let timeout = options
            .timeout_override
            .unwrap_or(self.config.inference_timeout);

        // Cache check: an unexpired hit answers without inference
        let key = Fingerprint::for_detection(&prepared.screenshot.data, instruction);
        if let Some(cached) = self.cache.get_candidates(&key) {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            debug!(instruction, "detection answered from cache");
            let candidates: Vec<ElementCandidate> = cached
                .iter()
                .map(|c| c.with_source(CandidateSource::Cache))
                .collect();
            return Ok(LocateOutcome::Found(candidates));
        }

        if options.force_fallback {
            self.fallback_used.fetch_add(1, Ordering::Relaxed);
            let candidates = fallback_candidates(
                self.session.as_ref(),
                instruction,
                self.config.fallback_confidence_cap,
            )
            .await?;
            return Ok(self.finish(instruction, candidates, floor));
        }

        match self.infer(&prepared, instruction, context, timeout).await {
            Ok(mut candidates) => {
                candidates.retain(|c| c.confidence >= floor);
                if candidates.is_empty() {
                    self.not_found.fetch_add(1, Ordering::Relaxed);
                    info!(instruction, "no candidate above confidence floor");
                    return Ok(LocateOutcome::NotFound);
                }
                // Map boxes back to source resolution
                if prepared.scale != 1.0 {
                    let inverse = 1.0 / prepared.scale;
                    candidates = candidates.iter().map(|c| c.scaled(inverse)).collect();
                }
                // High-confidence results are worth remembering
                if candidates[0].confidence >= self.config.promotion_threshold {
                    self.cache.put_candidates(key, candidates.clone());
                }
                Ok(LocateOutcome::Found(candidates))
            }
            Err(err) => {
                // Lower-fidelity path before giving up on the step;
                // if it also finds nothing, surface the service error
                // so recovery can back off and retry inference.
                warn!(instruction, error = %err, "inference failed, trying page-structure fallback");
                self.fallback_used.fetch_add(1, Ordering::Relaxed);
                match fallback_candidates(
                    self.session.as_ref(),
                    instruction,
                    self.config.fallback_confidence_cap,
                )
                .await
                {
                    Ok(candidates) => match self.finish(instruction, candidates, floor) {
                        found @ LocateOutcome::Found(_) => Ok(found),
                        LocateOutcome::NotFound => Err(err),
                    },
                    Err(_) => Err(err),
                }
            }
        }
    }

    pub fn stats(&self) -> LocatorStats {
        LocatorStats {
            locates: self.locates.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            fallback_used: self.fallback_used.load(Ordering::Relaxed),
            not_found: self.not_found.load(Ordering::Relaxed),
        }
    }

    fn finish(
        &self,
        instruction: &str,
        candidates: Vec<ElementCandidate>,
        floor: f64,
    ) -> LocateOutcome {
        let mut candidates = candidates;
        candidates.retain(|c| c.confidence >= floor);
        if candidates.is_empty() {
            self.not_found.fetch_add(1, Ordering::Relaxed);
            info!(instruction, "fallback path found nothing above floor");
            LocateOutcome::NotFound
        } else {
            LocateOutcome::Found(candidates)
        }
    }

    async fn infer(
        &self,
        prepared: &crate::preprocess::Preprocessed,
        instruction: &str,
        context: &PageContext,
        timeout: Duration,
    ) -> Result<Vec<ElementCandidate>, EngineError> {
        let prompt = detection_prompt(instruction, context);
        let started = Instant::now();
        let outcome =
            tokio::time::timeout(timeout, self.inference.analyze(&prepared.screenshot, &prompt))
                .await;
        self.meter.record(started.elapsed());

        let value = match outcome {
            Err(_) => {
                return Err(EngineError::InferenceService(format!(
                    "inference timed out after {timeout:?}"
                )))
            }
            Ok(Err(err)) => return Err(err.into()),
            Ok(Ok(value)) => value,
        };
        parse_candidates(&value)
    }
}
