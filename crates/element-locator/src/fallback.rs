//! Low-fidelity detection over the accessible page structure
//!
//! Used when the vision service errors or times out: collect visible
//! interactive elements from the live page and score their text against
//! the instruction. Much weaker than vision detection, so confidence is
//! capped.

use serde::Deserialize;
use tracing::debug;

use visionflow_core_types::{
    BoundingBox, BrowserSession, CandidateSource, ElementCandidate, ElementKind, EngineError,
};

/// Script collecting visible interactive elements with their text and
/// bounding rects
const COLLECT_INTERACTIVE: &str = r#"(() => {
    const selector = 'a, button, input, select, textarea, [role="button"], [onclick]';
    return Array.from(document.querySelectorAll(selector))
        .map(el => ({ el, rect: el.getBoundingClientRect() }))
        .filter(({ rect }) => rect.width > 0 && rect.height > 0)
        .slice(0, 200)
        .map(({ el, rect }) => ({
            text: (el.innerText || el.value || el.getAttribute('aria-label') || '')
                .trim().slice(0, 120),
            tag: el.tagName.toLowerCase(),
            x: rect.x, y: rect.y, width: rect.width, height: rect.height
        }));
})()"#;

#[derive(Debug, Deserialize)]
struct PageElement {
    #[serde(default)]
    text: String,
    #[serde(default)]
    tag: String,
    x: f64,
    y: f64,
    width: f64,
    height: f64,
}

/// Collect interactive page elements and score them against the
/// instruction; candidates come back ranked, confidence capped at
/// `confidence_cap`.
pub async fn fallback_candidates(
    session: &dyn BrowserSession,
    instruction: &str,
    confidence_cap: f64,
) -> Result<Vec<ElementCandidate>, EngineError> {
    let value = session
        .execute_script(COLLECT_INTERACTIVE)
        .await
        .map_err(EngineError::from)?;

    let elements: Vec<PageElement> = serde_json::from_value(value).map_err(|e| {
        EngineError::ElementNotFound(format!("unreadable page structure response: {e}"))
    })?;

    let mut candidates: Vec<ElementCandidate> = elements
        .into_iter()
        .filter_map(|el| {
            let score = text_match_score(instruction, &el.text);
            if score <= 0.0 {
                return None;
            }
            Some(ElementCandidate {
                bounds: BoundingBox::new(el.x, el.y, el.width, el.height),
                kind: kind_for_tag(&el.tag),
                visible_text: (!el.text.is_empty()).then_some(el.text),
                // Text overlap alone is weak evidence
                confidence: (0.3 + 0.5 * score).min(confidence_cap),
                source: CandidateSource::Fallback,
            })
        })
        .collect();

    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    debug!(
        matches = candidates.len(),
        "fallback detection over page structure"
    );
    Ok(candidates)
}

/// Fraction of instruction tokens found in the element text
fn text_match_score(instruction: &str, text: &str) -> f64 {
    if text.is_empty() {
        return 0.0;
    }
    let text = text.to_lowercase();
    // Short filler words ("the", "to", "of") carry no signal
    let tokens: Vec<&str> = instruction
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 3)
        .collect();
    if tokens.is_empty() {
        return 0.0;
    }
    let lowered: Vec<String> = tokens.iter().map(|t| t.to_lowercase()).collect();
    let matched = lowered.iter().filter(|t| text.contains(t.as_str())).count();
    matched as f64 / lowered.len() as f64
}

fn kind_for_tag(tag: &str) -> ElementKind {
    match tag {
        "button" => ElementKind::Button,
        "a" => ElementKind::Link,
        "input" | "textarea" => ElementKind::Input,
        "select" => ElementKind::Dropdown,
        _ => ElementKind::Unknown,
    }
}
