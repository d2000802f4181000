//! Parsing of structured detection responses

use serde::Deserialize;
use serde_json::Value;

use visionflow_core_types::{
    BoundingBox, CandidateSource, ElementCandidate, ElementKind, EngineError,
};

#[derive(Debug, Deserialize)]
struct WireBox {
    x: f64,
    y: f64,
    width: f64,
    height: f64,
}

impl From<WireBox> for BoundingBox {
    fn from(b: WireBox) -> Self {
        BoundingBox::new(b.x, b.y, b.width, b.height)
    }
}

#[derive(Debug, Deserialize)]
struct WireAlternative {
    #[serde(default)]
    confidence: f64,
    bounding_box: Option<WireBox>,
    element_type: Option<String>,
    visible_text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireDetection {
    found: bool,
    #[serde(default)]
    confidence: f64,
    bounding_box: Option<WireBox>,
    element_type: Option<String>,
    visible_text: Option<String>,
    #[serde(default)]
    alternatives: Vec<WireAlternative>,
}

/// Parse a raw inference response into ranked candidates
///
/// Returns an empty list for a well-formed "found: false" response;
/// a response that cannot be interpreted at all is an inference
/// service error. The returned list is sorted by descending
/// confidence.
pub fn parse_candidates(value: &Value) -> Result<Vec<ElementCandidate>, EngineError> {
    let wire: WireDetection = serde_json::from_value(value.clone())
        .map_err(|e| EngineError::InferenceService(format!("malformed detection response: {e}")))?;

    if !wire.found {
        return Ok(Vec::new());
    }

    let primary_box = wire.bounding_box.ok_or_else(|| {
        EngineError::InferenceService("detection claims found but has no bounding box".to_string())
    })?;

    let mut candidates = vec![ElementCandidate {
        bounds: primary_box.into(),
        kind: wire
            .element_type
            .as_deref()
            .map(ElementKind::parse)
            .unwrap_or(ElementKind::Unknown),
        visible_text: wire.visible_text.filter(|t| !t.is_empty()),
        confidence: wire.confidence.clamp(0.0, 1.0),
        source: CandidateSource::Inference,
    }];

    for alt in wire.alternatives {
        // Alternatives without a box cannot be acted on; skip them
        let Some(bounds) = alt.bounding_box else {
            continue;
        };
        candidates.push(ElementCandidate {
            bounds: bounds.into(),
            kind: alt
                .element_type
                .as_deref()
                .map(ElementKind::parse)
                .unwrap_or(ElementKind::Unknown),
            visible_text: alt.visible_text.filter(|t| !t.is_empty()),
            confidence: alt.confidence.clamp(0.0, 1.0),
            source: CandidateSource::Inference,
        });
    }

    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_primary_and_alternatives_ranked() {
        let value = json!({
            "found": true,
            "confidence": 0.82,
            "bounding_box": {"x": 120, "y": 340, "width": 96, "height": 32},
            "element_type": "button",
            "visible_text": "Submit",
            "alternatives": [
                {"confidence": 0.91, "bounding_box": {"x": 10, "y": 10, "width": 40, "height": 20},
                 "element_type": "link", "visible_text": "Submit form"},
                {"confidence": 0.4, "bounding_box": {"x": 0, "y": 0, "width": 5, "height": 5}}
            ]
        });

        let candidates = parse_candidates(&value).unwrap();
        assert_eq!(candidates.len(), 3);
        // Confidence is monotonically non-increasing
        for pair in candidates.windows(2) {
            assert!(pair[0].confidence >= pair[1].confidence);
        }
        assert_eq!(candidates[0].kind, ElementKind::Link);
        assert_eq!(candidates[1].visible_text.as_deref(), Some("Submit"));
    }

    #[test]
    fn not_found_is_an_empty_list() {
        let value = json!({"found": false, "confidence": 0.0});
        assert!(parse_candidates(&value).unwrap().is_empty());
    }

    #[test]
    fn found_without_box_is_a_service_error() {
        let value = json!({"found": true, "confidence": 0.9});
        assert!(parse_candidates(&value).is_err());
    }

    #[test]
    fn confidence_is_clamped() {
        let value = json!({
            "found": true,
            "confidence": 1.7,
            "bounding_box": {"x": 0, "y": 0, "width": 10, "height": 10}
        });
        let candidates = parse_candidates(&value).unwrap();
        assert_eq!(candidates[0].confidence, 1.0);
    }
}
