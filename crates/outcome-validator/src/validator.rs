//! Semantic outcome judgment on top of the structural diff

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use response_cache::{Fingerprint, ResponseCache};
use visionflow_core_types::{
    EngineError, InferenceMeter, Screenshot, ValidationResult, VisionInference,
};

use crate::diff::{compare, DiffConfig, StructuralDiff};

/// Tunable validator parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorConfig {
    /// Structural-pass parameters
    pub diff: DiffConfig,

    /// Similarity at or above which the page is treated as unchanged
    pub no_change_similarity: f64,

    /// Confidence ceiling applied to verdicts contradicted by pixels
    pub suspicion_cap: f64,

    /// Deadline for one judgment call
    pub inference_timeout: Duration,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            diff: DiffConfig::default(),
            no_change_similarity: 0.995,
            suspicion_cap: 0.2,
            inference_timeout: Duration::from_secs(30),
        }
    }
}

/// Counters for validator activity
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ValidatorStats {
    pub validations: u64,
    pub cache_hits: u64,
    pub verdicts_capped: u64,
}

/// Judges whether an action produced the outcome the step expected
///
/// Two passes: a structural diff that cannot lie, then a semantic
/// judgment from the vision service. When the judgment claims success
/// but the pixels say nothing changed, the pixels win.
pub struct OutcomeValidator {
    inference: Arc<dyn VisionInference>,
    cache: Arc<ResponseCache>,
    meter: Arc<InferenceMeter>,
    config: ValidatorConfig,
    validations: AtomicU64,
    cache_hits: AtomicU64,
    verdicts_capped: AtomicU64,
}

impl OutcomeValidator {
    pub fn new(
        inference: Arc<dyn VisionInference>,
        cache: Arc<ResponseCache>,
        meter: Arc<InferenceMeter>,
        config: ValidatorConfig,
    ) -> Self {
        Self {
            inference,
            cache,
            meter,
            config,
            validations: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
            verdicts_capped: AtomicU64::new(0),
        }
    }

    pub async fn validate(
        &self,
        before: &Screenshot,
        after: &Screenshot,
        expected: Option<&str>,
    ) -> Result<ValidationResult, EngineError> {
        self.validations.fetch_add(1, Ordering::Relaxed);
        let diff = compare(before, after, &self.config.diff)?;

        // A step with no declared expectation validates trivially; the
        // structural regions still travel in the result for reporting.
        let Some(expected) = expected else {
            return Ok(ValidationResult {
                achieved: true,
                confidence: 1.0,
                changed_regions: diff.changed_regions,
                rationale: "no expected outcome declared".into(),
            });
        };

        let key = Fingerprint::for_validation(&before.data, &after.data, expected);
        if let Some(cached) = self.cache.get_validation(&key) {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            debug!(expected, "validation answered from cache");
            return Ok(cached);
        }

        let verdict = self.judge(after, expected, &diff).await?;
        let result = self.reconcile(verdict, &diff, expected);
        self.cache.put_validation(key, result.clone());
        Ok(result)
    }

    pub fn stats(&self) -> ValidatorStats {
        ValidatorStats {
            validations: self.validations.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            verdicts_capped: self.verdicts_capped.load(Ordering::Relaxed),
        }
    }

    /// Cross-check the semantic verdict against the structural pass
    fn reconcile(&self, verdict: Verdict, diff: &StructuralDiff, expected: &str) -> ValidationResult {
        let unchanged = diff.changed_regions.is_empty()
            && diff.similarity >= self.config.no_change_similarity;

        if verdict.achieved && unchanged {
            self.verdicts_capped.fetch_add(1, Ordering::Relaxed);
            warn!(
                expected,
                similarity = diff.similarity,
                "judgment claims success but the page did not change"
            );
            return ValidationResult {
                achieved: false,
                confidence: verdict.confidence.min(self.config.suspicion_cap),
                changed_regions: Vec::new(),
                rationale: format!(
                    "judgment reported success but no visual change was observed \
                     (similarity {:.4}): {}",
                    diff.similarity, verdict.rationale
                ),
            };
        }

        info!(
            expected,
            achieved = verdict.achieved,
            confidence = verdict.confidence,
            regions = diff.changed_regions.len(),
            "outcome validated"
        );
        ValidationResult {
            achieved: verdict.achieved,
            confidence: verdict.confidence,
            changed_regions: diff.changed_regions.clone(),
            rationale: verdict.rationale,
        }
    }

    async fn judge(
        &self,
        after: &Screenshot,
        expected: &str,
        diff: &StructuralDiff,
    ) -> Result<Verdict, EngineError> {
        let prompt = judgment_prompt(expected, diff);
        let started = Instant::now();
        let outcome = tokio::time::timeout(
            self.config.inference_timeout,
            self.inference.analyze(after, &prompt),
        )
        .await;
        self.meter.record(started.elapsed());

        let value = match outcome {
            Err(_) => {
                return Err(EngineError::InferenceService(format!(
                    "judgment timed out after {:?}",
                    self.config.inference_timeout
                )))
            }
            Ok(Err(err)) => return Err(err.into()),
            Ok(Ok(value)) => value,
        };
        parse_verdict(&value)
    }
}

struct Verdict {
    achieved: bool,
    confidence: f64,
    rationale: String,
}

fn judgment_prompt(expected: &str, diff: &StructuralDiff) -> String {
    let regions = if diff.changed_regions.is_empty() {
        "none".to_string()
    } else {
        diff.changed_regions
            .iter()
            .map(|r| {
                format!(
                    "({:.0},{:.0} {:.0}x{:.0})",
                    r.x, r.y, r.width, r.height
                )
            })
            .collect::<Vec<_>>()
            .join(", ")
    };
    format!(
        "You are verifying the outcome of a browser action.\n\
         Expected outcome: \"{expected}\"\n\n\
         This screenshot was taken after the action. A pixel comparison \
         against the pre-action screenshot measured structural similarity \
         {:.4}. Changed regions (x,y wxh): {regions}.\n\n\
         Judge whether the expected outcome was achieved. Respond with ONLY \
         a JSON object, no prose:\n\
         {{\n\
           \"achieved\": true or false,\n\
           \"confidence\": 0.0 to 1.0,\n\
           \"rationale\": \"one sentence explaining the verdict\"\n\
         }}",
        diff.similarity,
    )
}

fn parse_verdict(value: &Value) -> Result<Verdict, EngineError> {
    let achieved = value
        .get("achieved")
        .and_then(Value::as_bool)
        .ok_or_else(|| {
            EngineError::InferenceService("judgment response missing boolean 'achieved'".into())
        })?;
    let confidence = value
        .get("confidence")
        .and_then(Value::as_f64)
        .unwrap_or(0.5)
        .clamp(0.0, 1.0);
    let rationale = value
        .get("rationale")
        .and_then(Value::as_str)
        .unwrap_or("no rationale given")
        .to_string();
    Ok(Verdict {
        achieved,
        confidence,
        rationale,
    })
}
