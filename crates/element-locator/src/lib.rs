//! Element locator - screenshot + description -> ranked element candidates
//!
//! Turns (screenshot, instruction, page context) into an ordered list of
//! candidate UI elements with bounding boxes and confidence scores.
//! Consults the response cache before paying for inference, and falls
//! back to text matching over the accessible page structure when the
//! vision service is unavailable.

pub mod fallback;
pub mod locator;
pub mod parse;
pub mod preprocess;
pub mod prompt;

pub use locator::{ElementLocator, LocateOptions, LocateOutcome, LocatorConfig, LocatorStats};
pub use preprocess::{preprocess, Preprocessed};
