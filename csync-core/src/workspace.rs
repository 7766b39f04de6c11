//! Workspace-level filtering.
//!
//! A [`WorkspaceFilter`] is an ordered collection of [`PathFilterSet`]s:
//! one list selecting nodes and a parallel list gating properties. The
//! persisted form is a plain serde structure; load/save goes through JSON
//! with a write-to-tmp-then-rename, and round-trips preserve `contains`
//! and `covers` results.

use crate::filter::{ConfigError, PathFilterSet};
use crate::path::{self, PathMapping};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Ordered node and property filter sets, paired 1:1 by construction.
#[derive(Debug, Clone, Default)]
pub struct WorkspaceFilter {
    node_sets: Vec<PathFilterSet>,
    prop_sets: Vec<PathFilterSet>,
}

impl WorkspaceFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node set; properties under the same root are all selected.
    pub fn add(&mut self, set: PathFilterSet) {
        let props = PathFilterSet::from_parts(set.root().to_string(), Vec::new());
        self.add_with_properties(set, props);
    }

    /// Add a node set with an explicit property set.
    pub fn add_with_properties(&mut self, nodes: PathFilterSet, props: PathFilterSet) {
        self.node_sets.push(nodes);
        self.prop_sets.push(props);
    }

    pub fn node_sets(&self) -> &[PathFilterSet] {
        &self.node_sets
    }

    pub fn property_sets(&self) -> &[PathFilterSet] {
        &self.prop_sets
    }

    pub fn is_empty(&self) -> bool {
        self.node_sets.is_empty()
    }

    /// Whether `path` is selected.
    ///
    /// A path is included iff it lies under at least one node set's root
    /// (the innermost enclosing root wins on overlap) and that set
    /// matches it. Paths covered by no set at all are excluded.
    pub fn contains(&self, path: &str) -> bool {
        Self::lookup(&self.node_sets, path)
    }

    /// Whether a walk must visit `path` to reach selected content.
    pub fn covers(&self, path: &str) -> bool {
        self.node_sets.iter().any(|s| s.covers(path))
    }

    /// Whether the property at `prop_path` is replicated once its owning
    /// node is selected. Identical algorithm, over the property sets.
    pub fn includes_property(&self, prop_path: &str) -> bool {
        Self::lookup(&self.prop_sets, prop_path)
    }

    fn lookup(sets: &[PathFilterSet], p: &str) -> bool {
        let mut best: Option<&PathFilterSet> = None;
        for set in sets {
            if path::is_ancestor_or_equal(set.root(), p) {
                let better = match best {
                    None => true,
                    Some(b) => set.root().len() > b.root().len(),
                };
                if better {
                    best = Some(set);
                }
            }
        }
        best.map(|s| s.matches(p)).unwrap_or(false)
    }

    /// Rewrite every contained set through `mapping`.
    pub fn translate(&self, mapping: &PathMapping) -> Result<Self, ConfigError> {
        let mut out = Self::new();
        for (nodes, props) in self.node_sets.iter().zip(&self.prop_sets) {
            out.node_sets.push(nodes.translate(mapping)?);
            out.prop_sets.push(props.translate(mapping)?);
        }
        Ok(out)
    }

    /// Append another filter's sets after this one's.
    pub fn merge(&mut self, other: WorkspaceFilter) {
        self.node_sets.extend(other.node_sets);
        self.prop_sets.extend(other.prop_sets);
    }

    /// Build a filter from its persisted form.
    ///
    /// Includes are replayed first, then excludes, each in listed order.
    /// Property specs pair with node specs by position; a missing tail
    /// defaults to everything under the node set's root.
    pub fn from_spec(spec: &WorkspaceFilterSpec) -> Result<Self, ConfigError> {
        let mut filter = Self::new();
        for (i, node_spec) in spec.nodes.iter().enumerate() {
            let nodes = build_set(node_spec)?;
            let props = match spec.properties.get(i) {
                Some(prop_spec) => build_set(prop_spec)?,
                None => PathFilterSet::everything(&node_spec.root)?,
            };
            filter.add_with_properties(nodes, props);
        }
        Ok(filter)
    }

    /// The persisted form of this filter.
    pub fn to_spec(&self) -> WorkspaceFilterSpec {
        WorkspaceFilterSpec {
            nodes: self.node_sets.iter().map(set_spec).collect(),
            properties: self.prop_sets.iter().map(set_spec).collect(),
        }
    }

    /// Load a filter from a JSON file.
    pub fn load_json(file: &Path) -> Result<Self> {
        let data = fs::read_to_string(file)
            .with_context(|| format!("Failed to read filter from {:?}", file))?;
        let spec: WorkspaceFilterSpec =
            serde_json::from_str(&data).with_context(|| "Failed to parse filter JSON")?;
        Self::from_spec(&spec).with_context(|| "Failed to build filter from spec")
    }

    /// Save a filter to a JSON file.
    pub fn save_json(&self, file: &Path) -> Result<()> {
        let tmp = file.with_extension("tmp");
        let data = serde_json::to_string_pretty(&self.to_spec())?;
        fs::write(&tmp, &data)?;
        fs::rename(&tmp, file)?;
        Ok(())
    }
}

fn build_set(spec: &FilterSetSpec) -> Result<PathFilterSet, ConfigError> {
    let mut builder = PathFilterSet::builder(&spec.root);
    for pat in &spec.includes {
        builder = builder.include(pat);
    }
    for pat in &spec.excludes {
        builder = builder.exclude(pat);
    }
    builder.build()
}

fn set_spec(set: &PathFilterSet) -> FilterSetSpec {
    let mut spec = FilterSetSpec {
        root: set.root().to_string(),
        includes: Vec::new(),
        excludes: Vec::new(),
    };
    for entry in set.entries() {
        let pattern = entry.pattern().source().to_string();
        if entry.is_include() {
            spec.includes.push(pattern);
        } else {
            spec.excludes.push(pattern);
        }
    }
    spec
}

/// Serialized form of one filter set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterSetSpec {
    pub root: String,
    #[serde(default)]
    pub includes: Vec<String>,
    #[serde(default)]
    pub excludes: Vec<String>,
}

/// Serialized form of a workspace filter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkspaceFilterSpec {
    pub nodes: Vec<FilterSetSpec>,
    #[serde(default)]
    pub properties: Vec<FilterSetSpec>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn site_filter() -> WorkspaceFilter {
        let mut filter = WorkspaceFilter::new();
        filter.add(
            PathFilterSet::builder("/content/site")
                .exclude("tmp(/.*)?")
                .build()
                .unwrap(),
        );
        filter.add(PathFilterSet::everything("/assets").unwrap());
        filter
    }

    #[test]
    fn test_contains_is_closed_world() {
        let filter = site_filter();
        assert!(filter.contains("/content/site"));
        assert!(filter.contains("/content/site/page"));
        assert!(filter.contains("/assets/logo"));
        assert!(!filter.contains("/content/site/tmp"));
        // not under any declared root
        assert!(!filter.contains("/etc"));
        assert!(!filter.contains("/content/other"));
    }

    #[test]
    fn test_covers_any_set() {
        let filter = site_filter();
        assert!(filter.covers("/"));
        assert!(filter.covers("/content"));
        assert!(filter.covers("/content/site/tmp/x"));
        assert!(filter.covers("/assets"));
        assert!(!filter.covers("/etc"));
    }

    #[test]
    fn test_innermost_root_wins_on_overlap() {
        let mut filter = WorkspaceFilter::new();
        filter.add(
            PathFilterSet::builder("/content")
                .exclude("/content/site(/.*)?")
                .build()
                .unwrap(),
        );
        // the inner set re-opens a subtree the outer set excludes
        filter.add(PathFilterSet::everything("/content/site/public").unwrap());
        assert!(filter.contains("/content/a"));
        assert!(!filter.contains("/content/site/private"));
        assert!(filter.contains("/content/site/public/page"));
    }

    #[test]
    fn test_property_sets_default_to_everything() {
        let filter = site_filter();
        assert!(filter.includes_property("/content/site/page/title"));
        assert!(!filter.includes_property("/etc/title"));
    }

    #[test]
    fn test_explicit_property_set_gates_properties() {
        let mut filter = WorkspaceFilter::new();
        filter.add_with_properties(
            PathFilterSet::everything("/content").unwrap(),
            PathFilterSet::builder("/content")
                .exclude(".*:hidden")
                .build()
                .unwrap(),
        );
        assert!(filter.contains("/content/page"));
        assert!(filter.includes_property("/content/page/title"));
        assert!(!filter.includes_property("/content/page/meta:hidden"));
    }

    #[test]
    fn test_translate_round_trip_preserves_selection() {
        let mapping = PathMapping::new("/content", "/backup").unwrap();
        let filter = site_filter();
        let back = filter
            .translate(&mapping)
            .unwrap()
            .translate(&mapping.inverse())
            .unwrap();
        let probes = [
            "/content/site",
            "/content/site/page",
            "/content/site/tmp",
            "/content/site/deep/tmp/x",
            "/assets/logo",
            "/etc",
        ];
        for p in probes {
            assert_eq!(filter.contains(p), back.contains(p), "contains({})", p);
            assert_eq!(filter.covers(p), back.covers(p), "covers({})", p);
        }
    }

    #[test]
    fn test_spec_round_trip_preserves_selection() {
        let filter = site_filter();
        let reloaded = WorkspaceFilter::from_spec(&filter.to_spec()).unwrap();
        let probes = [
            "/content/site",
            "/content/site/page",
            "/content/site/tmp",
            "/content/site/a/tmp/b",
            "/assets",
            "/assets/logo",
            "/unrelated",
        ];
        for p in probes {
            assert_eq!(filter.contains(p), reloaded.contains(p), "contains({})", p);
            assert_eq!(filter.covers(p), reloaded.covers(p), "covers({})", p);
            assert_eq!(
                filter.includes_property(&format!("{}/prop", p)),
                reloaded.includes_property(&format!("{}/prop", p)),
                "includes_property({})",
                p
            );
        }
    }

    #[test]
    fn test_save_load_json() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("filter.json");
        let filter = site_filter();
        filter.save_json(&file).unwrap();

        let loaded = WorkspaceFilter::load_json(&file).unwrap();
        assert_eq!(loaded.node_sets().len(), 2);
        assert!(loaded.contains("/content/site/page"));
        assert!(!loaded.contains("/content/site/tmp"));
    }

    #[test]
    fn test_merge_appends_sets() {
        let mut a = site_filter();
        let mut b = WorkspaceFilter::new();
        b.add(PathFilterSet::everything("/etc/designs").unwrap());
        a.merge(b);
        assert_eq!(a.node_sets().len(), 3);
        assert!(a.contains("/etc/designs/theme"));
    }

    proptest! {
        // Mapping two disjoint mounts back and forth never changes what
        // the filter selects.
        #[test]
        fn prop_translate_inverse_is_identity(
            seg in "[a-z]{1,8}",
            tail in proptest::collection::vec("[a-z]{1,8}", 0..4),
        ) {
            let root = format!("/src/{}", seg);
            let mapping = PathMapping::new("/src", "/dst").unwrap();
            let filter = {
                let mut f = WorkspaceFilter::new();
                f.add(
                    PathFilterSet::builder(&root)
                        .exclude("skip(/.*)?")
                        .build()
                        .unwrap(),
                );
                f
            };
            let back = filter
                .translate(&mapping)
                .unwrap()
                .translate(&mapping.inverse())
                .unwrap();
            let mut probe = root.clone();
            for t in &tail {
                probe.push('/');
                probe.push_str(t);
            }
            prop_assert_eq!(filter.contains(&probe), back.contains(&probe));
            prop_assert_eq!(filter.covers(&probe), back.covers(&probe));
        }
    }
}
