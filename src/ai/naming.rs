//! Filename recommendation values
//!
//! Raw provider text is never trusted: it goes through [`sanitize`] and only
//! survives as a [`FilenameRecommendation`] when the result is usable.

use serde::Serialize;
use std::fmt;

/// Longest stem a recommendation may have
pub const MAX_RECOMMENDATION_LEN: usize = 50;

/// A sanitized filename stem suggested by a vision provider
///
/// Guaranteed non-empty, at most [`MAX_RECOMMENDATION_LEN`] characters, and
/// made only of ASCII alphanumerics, `_` and `-`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct FilenameRecommendation(String);

impl FilenameRecommendation {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for FilenameRecommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for FilenameRecommendation {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Normalize raw provider text into a filename stem
///
/// 1. Trim whitespace, drop every `"` and `'`, trim again
/// 2. Map spaces to `_`
/// 3. Strip everything outside `[A-Za-z0-9_-]`
/// 4. Reject empty or over-long results
///
/// Length is checked on the fully sanitized string.
pub fn sanitize(raw: &str) -> Option<FilenameRecommendation> {
    let unquoted: String = raw.trim().chars().filter(|c| *c != '"' && *c != '\'').collect();

    let cleaned: String = unquoted
        .trim()
        .chars()
        .map(|c| if c == ' ' { '_' } else { c })
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect();

    if cleaned.is_empty() || cleaned.len() > MAX_RECOMMENDATION_LEN {
        return None;
    }

    Some(FilenameRecommendation(cleaned))
}
