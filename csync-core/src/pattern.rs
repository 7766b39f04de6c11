//! Compiled path patterns.
//!
//! A pattern is a regex-flavoured rule over normalized slash-separated
//! paths. Patterns whose text begins with `/` are anchored to the full
//! path; all others are relative and match a suffix starting at any
//! segment boundary under a filter root.

use crate::filter::ConfigError;
use crate::path::PathMapping;
use regex::Regex;

/// Regex metacharacters that end the literal path prefix of a pattern.
const META: &[char] = &[
    '\\', '^', '$', '.', '|', '?', '*', '+', '(', ')', '[', ']', '{', '}',
];

/// A compiled matcher over normalized slash-separated paths.
///
/// Immutable once compiled; a pattern that fails to compile is rejected
/// at construction time and never surfaces during a walk.
#[derive(Debug, Clone)]
pub struct PathPattern {
    source: String,
    regex: Regex,
    relative: bool,
}

impl PathPattern {
    /// Compile a pattern. The match is fully anchored.
    pub fn new(pattern: &str) -> Result<Self, ConfigError> {
        let relative = !pattern.starts_with('/');
        let anchored = format!("^(?:{})$", pattern);
        let regex = Regex::new(&anchored).map_err(|e| ConfigError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            source: pattern.to_string(),
            regex,
            relative,
        })
    }

    /// The original pattern text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// True if the pattern text does not begin with `/`.
    pub fn is_relative(&self) -> bool {
        self.relative
    }

    /// Full anchored match against `text`.
    pub fn matches(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }

    /// Match `path` in the context of a filter root.
    ///
    /// Absolute patterns match the whole path verbatim. Relative patterns
    /// are tried against every suffix of `path` that starts at a segment
    /// boundary at or below `root`, so one relative rule catches matches
    /// regardless of nesting depth.
    pub fn matches_under(&self, root: &str, path: &str) -> bool {
        if !self.relative {
            return self.matches(path);
        }
        let mut idx = if root == "/" { 0 } else { root.len() };
        while idx < path.len() {
            let suffix = &path[idx + 1..];
            if self.matches(suffix) {
                return true;
            }
            match suffix.find('/') {
                Some(off) => idx += 1 + off,
                None => break,
            }
        }
        false
    }

    /// Rewrite the literal path prefix of the pattern through `mapping`.
    ///
    /// Only the leading span free of regex metacharacters is considered;
    /// everything after it is preserved untouched. Relative patterns are
    /// returned unchanged.
    pub fn translate(&self, mapping: &PathMapping) -> Result<Self, ConfigError> {
        if self.relative {
            return Ok(self.clone());
        }
        let split = self.source.find(META).unwrap_or(self.source.len());
        let (literal, rest) = self.source.split_at(split);
        let mapped = map_literal_prefix(mapping, literal);
        if mapped == literal {
            return Ok(self.clone());
        }
        Self::new(&format!("{}{}", mapped, rest))
    }
}

impl PartialEq for PathPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for PathPattern {}

/// Map the literal prefix, keeping any trailing slash in place.
fn map_literal_prefix(mapping: &PathMapping, literal: &str) -> String {
    let trimmed = literal.trim_end_matches('/');
    if trimmed.is_empty() {
        return literal.to_string();
    }
    let mapped = mapping.map(trimmed);
    format!("{}{}", mapped, &literal[trimmed.len()..])
}
