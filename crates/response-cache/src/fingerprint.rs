//! Stable cache keys over image bytes and instruction text

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stable hash key over an (image, instruction) pair
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Key for a detection result: hash(image) + hash(instruction)
    pub fn for_detection(image: &[u8], instruction: &str) -> Self {
        let img = blake3::hash(image);
        let text = blake3::hash(instruction.trim().to_lowercase().as_bytes());
        Self(format!("det:{}:{}", img.to_hex(), text.to_hex()))
    }

    /// Key for a validation result over a (before, after, expectation)
    /// triple
    pub fn for_validation(before: &[u8], after: &[u8], expected: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(before);
        hasher.update(after);
        let pair = hasher.finalize();
        let text = blake3::hash(expected.trim().to_lowercase().as_bytes());
        Self(format!("val:{}:{}", pair.to_hex(), text.to_hex()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
