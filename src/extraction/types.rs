use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One fetchable stream option.
///
/// `id` is only meaningful within the result set that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    pub id: String,
    /// Pixel height; absent for audio-only or non-visual streams
    pub height: Option<u32>,
    pub extension: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl Variant {
    pub fn new(id: impl Into<String>, height: Option<u32>, extension: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            height,
            extension: extension.into(),
            note: None,
        }
    }
}

/// Variants discovered by a single successful probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantSet {
    pub url: String,
    /// Display string, may be empty
    pub title: String,
    pub variants: Vec<Variant>,
}

/// Request to write one variant (plus companion audio) to `destination`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub url: String,
    pub format_selector: String,
    pub destination: PathBuf,
}
