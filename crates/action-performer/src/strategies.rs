//! Strategy tables per action kind
//!
//! An explicit ordered table, not virtual dispatch: every kind maps to
//! a fixed chain tried in declared order.

use serde::{Deserialize, Serialize};

use visionflow_core_types::ActionKind;

/// One technique for performing a logical action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Direct click at the candidate's center point
    CoordinateClick,

    /// Scroll the target into view, then click again
    ScrollAndRetry,

    /// Script-level click dispatched at the resolved point
    ScriptClick,

    /// Keystroke input at the candidate's center
    DirectType,

    /// Programmatic value assignment when keystrokes are rejected
    ScriptSetValue,

    /// Mouse-wheel scroll through the input device
    WheelScroll,

    /// window.scrollBy from script
    ScriptScroll,

    /// Plain timed pause
    TimedWait,

    /// Drive the file input programmatically
    ScriptUpload,
}

impl Strategy {
    pub fn name(&self) -> &'static str {
        match self {
            Strategy::CoordinateClick => "coordinate_click",
            Strategy::ScrollAndRetry => "scroll_and_retry",
            Strategy::ScriptClick => "script_click",
            Strategy::DirectType => "direct_type",
            Strategy::ScriptSetValue => "script_set_value",
            Strategy::WheelScroll => "wheel_scroll",
            Strategy::ScriptScroll => "script_scroll",
            Strategy::TimedWait => "timed_wait",
            Strategy::ScriptUpload => "script_upload",
        }
    }
}

/// The ordered strategy chain for an action kind
pub fn chain_for(kind: ActionKind) -> &'static [Strategy] {
    match kind {
        ActionKind::Click => &[
            Strategy::CoordinateClick,
            Strategy::ScrollAndRetry,
            Strategy::ScriptClick,
        ],
        ActionKind::Type => &[Strategy::DirectType, Strategy::ScriptSetValue],
        ActionKind::Scroll => &[Strategy::WheelScroll, Strategy::ScriptScroll],
        ActionKind::Wait => &[Strategy::TimedWait],
        ActionKind::Upload => &[Strategy::ScriptUpload],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn click_chain_is_in_declared_order() {
        let chain = chain_for(ActionKind::Click);
        assert_eq!(
            chain
                .iter()
                .map(|s| s.name())
                .collect::<Vec<_>>(),
            vec!["coordinate_click", "scroll_and_retry", "script_click"]
        );
    }

    #[test]
    fn every_kind_has_a_non_empty_chain() {
        for kind in [
            ActionKind::Click,
            ActionKind::Type,
            ActionKind::Scroll,
            ActionKind::Wait,
            ActionKind::Upload,
        ] {
            assert!(!chain_for(kind).is_empty());
        }
    }
}
