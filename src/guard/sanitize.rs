//! Destructive-pattern removal and task validation.

use once_cell::sync::Lazy;
use regex::Regex;

use super::Guard;
use crate::error::ApiError;

/// Minimum accepted description length after trimming.
pub const MIN_DESCRIPTION_LEN: usize = 3;

static SCRIPT_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)<\s*script").expect("script marker pattern"));

impl Guard {
    /// Apply each rule once, left-to-right, replacing matches with the
    /// rule's neutral placeholder.  Returns a new string; the input is
    /// never mutated.  Placeholders cannot re-match any rule, so the
    /// operation is idempotent.
    pub fn sanitize(&self, text: &str) -> String {
        if self.definitely_clean(text) {
            return text.to_string();
        }
        let mut out = text.to_string();
        for rule in self.rules() {
            if rule.pattern.is_match(&out) {
                out = rule.pattern.replace_all(&out, rule.placeholder).into_owned();
            }
        }
        out
    }
}

/// Reject descriptions that are too short or carry an unescaped script
/// tag marker.  Succeeds with no side effect otherwise.
pub fn validate_description(description: &str) -> Result<(), ApiError> {
    let trimmed = description.trim();
    if trimmed.chars().count() < MIN_DESCRIPTION_LEN {
        return Err(ApiError::Validation(format!(
            "description must be at least {} characters",
            MIN_DESCRIPTION_LEN
        )));
    }
    if SCRIPT_MARKER.is_match(trimmed) {
        return Err(ApiError::Validation(
            "description must not contain script tags".into(),
        ));
    }
    Ok(())
}
