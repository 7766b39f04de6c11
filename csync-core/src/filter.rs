//! Ordered include/exclude filtering under a root path.
//!
//! A [`PathFilterSet`] scopes a selection: a root path plus an ordered
//! list of include/exclude rules evaluated linearly, last match wins.
//! Sets are built once through [`PathFilterSetBuilder`] and are immutable
//! afterwards, so post-seal mutation is impossible by construction.

use crate::path::{self, PathMapping};
use crate::pattern::PathPattern;

/// Errors raised while building filters, patterns or mappings.
///
/// All configuration problems fail fast at construction time and never
/// surface during a walk.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Invalid pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// One include or exclude rule.
///
/// Insertion order is evaluation order and is preserved exactly.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterEntry {
    pattern: PathPattern,
    include: bool,
}

impl FilterEntry {
    pub fn include(pattern: PathPattern) -> Self {
        Self {
            pattern,
            include: true,
        }
    }

    pub fn exclude(pattern: PathPattern) -> Self {
        Self {
            pattern,
            include: false,
        }
    }

    pub fn pattern(&self) -> &PathPattern {
        &self.pattern
    }

    pub fn is_include(&self) -> bool {
        self.include
    }
}

/// An ordered list of include/exclude rules scoped under one root path.
///
/// With no entries every path at or under the root is selected; entries
/// layer targeted exclusions (and re-inclusions) on that permissive base.
#[derive(Debug, Clone, PartialEq)]
pub struct PathFilterSet {
    root: String,
    entries: Vec<FilterEntry>,
}

impl PathFilterSet {
    /// Start building a set rooted at `root`.
    pub fn builder(root: &str) -> PathFilterSetBuilder {
        PathFilterSetBuilder {
            root: root.to_string(),
            rules: Vec::new(),
        }
    }

    /// A set with no entries: everything under `root` is selected.
    pub fn everything(root: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            root: path::normalize(root)?,
            entries: Vec::new(),
        })
    }

    pub(crate) fn from_parts(root: String, entries: Vec<FilterEntry>) -> Self {
        Self { root, entries }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn entries(&self) -> &[FilterEntry] {
        &self.entries
    }

    /// True iff every entry's pattern is relative.
    pub fn has_only_relative_patterns(&self) -> bool {
        self.entries.iter().all(|e| e.pattern.is_relative())
    }

    /// Whether `path` is selected by this set.
    ///
    /// Only meaningful for paths at or under the root (anything else is
    /// reported unselected; gate on [`covers`](Self::covers) first). The
    /// entries are evaluated in order and the polarity of the last
    /// matching entry wins; no matching entry selects the path.
    pub fn matches(&self, p: &str) -> bool {
        if !path::is_ancestor_or_equal(&self.root, p) {
            return false;
        }
        let mut selected = true;
        for entry in &self.entries {
            if entry.pattern.matches_under(&self.root, p) {
                selected = entry.include;
            }
        }
        selected
    }

    /// Whether a walk must visit `path` to reach selected content.
    ///
    /// Ancestors of the root, the root itself and every descendant are
    /// covered, independent of [`matches`](Self::matches): a branch must
    /// not be pruned merely because the node itself is excluded.
    pub fn covers(&self, p: &str) -> bool {
        path::is_ancestor_or_equal(&self.root, p) || path::is_ancestor(p, &self.root)
    }

    /// Rewrite the set through `mapping`: the root is mapped and every
    /// pattern's literal path prefix is rewritten the same way.
    pub fn translate(&self, mapping: &PathMapping) -> Result<Self, ConfigError> {
        let root = mapping.map(&self.root);
        let mut entries = Vec::with_capacity(self.entries.len());
        for e in &self.entries {
            entries.push(FilterEntry {
                pattern: e.pattern.translate(mapping)?,
                include: e.include,
            });
        }
        Ok(Self { root, entries })
    }
}

/// Accumulates rules for a [`PathFilterSet`].
///
/// Patterns are compiled in [`build`](Self::build); a malformed rule
/// fails the whole build rather than being dropped.
#[derive(Debug)]
pub struct PathFilterSetBuilder {
    root: String,
    rules: Vec<(String, bool)>,
}

impl PathFilterSetBuilder {
    pub fn include(mut self, pattern: &str) -> Self {
        self.rules.push((pattern.to_string(), true));
        self
    }

    pub fn exclude(mut self, pattern: &str) -> Self {
        self.rules.push((pattern.to_string(), false));
        self
    }

    /// Compile all rules and seal the set.
    pub fn build(self) -> Result<PathFilterSet, ConfigError> {
        let root = path::normalize(&self.root)?;
        let mut entries = Vec::with_capacity(self.rules.len());
        for (pat, include) in self.rules {
            entries.push(FilterEntry {
                pattern: PathPattern::new(&pat)?,
                include,
            });
        }
        Ok(PathFilterSet { root, entries })
    }
}
