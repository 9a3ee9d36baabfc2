//! Classification of backend error text

use serde::Serialize;
use std::fmt;

const MAX_DETAIL_CHARS: usize = 500;

/// What a failed backend call tells us about the next strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureClass {
    /// Sign-in, bot check, rate limit or similar challenge
    AccessRestricted,
    /// Backend answered but nothing usable came back
    Degenerate,
    /// Network trouble, timeouts, anything unrecognised
    Transient,
    /// Not a fetchable URL
    MalformedInput,
    /// No extractor for this source, or DRM protected
    Unsupported,
    /// The extraction tool itself is not available
    BackendMissing,
    /// Local disk full, read-only or not writable
    StorageFailure,
}

impl FailureClass {
    /// Recoverable failures advance the chain; the rest abort it.
    pub fn is_recoverable(self) -> bool {
        matches!(
            self,
            FailureClass::AccessRestricted | FailureClass::Degenerate | FailureClass::Transient
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FailureClass::AccessRestricted => "access_restricted",
            FailureClass::Degenerate => "degenerate",
            FailureClass::Transient => "transient",
            FailureClass::MalformedInput => "malformed_input",
            FailureClass::Unsupported => "unsupported",
            FailureClass::BackendMissing => "backend_missing",
            FailureClass::StorageFailure => "storage_failure",
        }
    }
}

impl fmt::Display for FailureClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// A missing binary normally surfaces as a spawn error; this covers wrapper scripts
const BACKEND_MISSING: &[&str] = &["command not found"];

const STORAGE: &[&str] = &[
    "no space left on device",
    "[errno 28]",
    "disk quota exceeded",
    "permission denied",
    "[errno 13]",
    "read-only file system",
];

const MALFORMED: &[&str] = &["is not a valid url", "invalid url"];

const UNSUPPORTED: &[&str] = &["unsupported url", "drm protected", "this video is drm"];

const ACCESS_RESTRICTED: &[&str] = &[
    "sign in to confirm",
    "not a bot",
    "captcha",
    "http error 403",
    "http error 429",
    "too many requests",
    "po token",
    "confirm your age",
    "age-restricted",
    "age restricted",
    "private video",
    "members-only",
    "join this channel",
    "login required",
    "use --cookies",
];

const DEGENERATE: &[&str] = &[
    "only images are available",
    "requested format is not available",
    "video unavailable",
    "no video formats",
    "no formats",
];

/// Map backend error text to a [`FailureClass`]
pub fn classify(text: &str) -> FailureClass {
    let lower = text.to_lowercase();
    let contains_any = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if contains_any(BACKEND_MISSING) {
        FailureClass::BackendMissing
    } else if contains_any(STORAGE) {
        FailureClass::StorageFailure
    } else if contains_any(MALFORMED) {
        FailureClass::MalformedInput
    } else if contains_any(UNSUPPORTED) {
        FailureClass::Unsupported
    } else if contains_any(ACCESS_RESTRICTED) {
        FailureClass::AccessRestricted
    } else if contains_any(DEGENERATE) {
        FailureClass::Degenerate
    } else {
        FailureClass::Transient
    }
}

/// Most telling line of backend output, bounded in length.
///
/// Prefers the first `ERROR:` line, falling back to the last non-empty one.
pub fn summarize(text: &str) -> String {
    let line = text
        .lines()
        .map(str::trim)
        .find(|l| l.starts_with("ERROR:"))
        .or_else(|| text.lines().map(str::trim).rev().find(|l| !l.is_empty()))
        .unwrap_or("");

    let line = line.strip_prefix("ERROR:").map(str::trim).unwrap_or(line);

    match line.char_indices().nth(MAX_DETAIL_CHARS) {
        Some((cut, _)) => format!("{}…", &line[..cut]),
        None => line.to_string(),
    }
}
