//! Username glob patterns attached to hosts.

use core::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Errors that can occur when compiling a [`Glob`].
#[derive(thiserror::Error, Debug, Clone)]
pub enum GlobError {
    #[error("glob pattern cannot be empty")]
    Empty,
    #[error("invalid glob pattern {pattern:?}: {reason}")]
    Invalid { pattern: String, reason: String },
}

/// A shell-style pattern matched against a whole username.
///
/// `*` matches any run of characters (including none); every other
/// character matches itself.
///
/// ```
/// use portcullis_core::Glob;
///
/// let glob = Glob::new("*@example.com").unwrap();
/// assert!(glob.matches("alice@example.com"));
/// assert!(!glob.matches("alice@example.org"));
/// ```
#[derive(Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Glob {
    pattern: String,
    regex: Regex,
}

impl Glob {
    /// Compile a glob pattern.
    ///
    /// # Errors
    ///
    /// Returns [`GlobError`] if the pattern is empty or cannot be compiled.
    pub fn new(pattern: &str) -> Result<Self, GlobError> {
        if pattern.is_empty() {
            return Err(GlobError::Empty);
        }

        let body = pattern
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");

        let regex = Regex::new(&format!("^{body}$")).map_err(|e| GlobError::Invalid {
            pattern: pattern.to_owned(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            pattern: pattern.to_owned(),
            regex,
        })
    }

    /// Whether `input` matches this pattern in full.
    #[must_use]
    pub fn matches(&self, input: &str) -> bool {
        self.regex.is_match(input)
    }

    /// The pattern as originally written.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.pattern
    }
}

impl fmt::Debug for Glob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Glob").field(&self.pattern).finish()
    }
}

impl fmt::Display for Glob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pattern)
    }
}

impl PartialEq for Glob {
    fn eq(&self, other: &Self) -> bool {
        self.pattern == other.pattern
    }
}

impl Eq for Glob {}

impl TryFrom<String> for Glob {
    type Error = GlobError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(&value)
    }
}

impl From<Glob> for String {
    fn from(glob: Glob) -> Self {
        glob.pattern
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_pattern() {
        let glob = Glob::new("alice@example.com").unwrap();
        assert!(glob.matches("alice@example.com"));
        assert!(!glob.matches("xalice@example.com"));
        assert!(!glob.matches("alice@example.com.evil"));
    }

    #[test]
    fn test_star_matches_any_run() {
        let glob = Glob::new("*@example.com").unwrap();
        assert!(glob.matches("@example.com"));
        assert!(glob.matches("bob@example.com"));
        assert!(!glob.matches("bob@example.co"));
    }

    #[test]
    fn test_regex_metacharacters_are_literal() {
        let glob = Glob::new("a.b@example.com").unwrap();
        assert!(glob.matches("a.b@example.com"));
        assert!(!glob.matches("axb@example.com"));
    }

    #[test]
    fn test_lone_star_matches_everything() {
        let glob = Glob::new("*").unwrap();
        assert!(glob.matches("anyone"));
    }

    #[test]
    fn test_empty_pattern_rejected() {
        assert!(matches!(Glob::new(""), Err(GlobError::Empty)));
    }

    #[test]
    fn test_serde_as_string() {
        let glob = Glob::new("*@corp").unwrap();
        let json = serde_json::to_string(&glob).unwrap();
        assert_eq!(json, "\"*@corp\"");
        let back: Glob = serde_json::from_str(&json).unwrap();
        assert_eq!(back, glob);
    }
}
