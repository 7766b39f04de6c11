//! Tree traversal and reconciliation.
//!
//! Walks a source subtree depth-first with an explicit work stack and
//! reconciles the destination subtree to mirror it: node creation and
//! deletion, mixin and property mirroring, child reordering, batched
//! commits with optional throttling, and checkpoint-based resume.

use crate::filter::ConfigError;
use crate::path;
use crate::store::{well_known, ContentStore, StoreError};
use crate::workspace::WorkspaceFilter;
use regex::Regex;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Cooperative cancellation token polled between nodes.
///
/// A request is observed at the next poll point, never mid-node, so a
/// node's reconciliation is atomic relative to cancellation.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Tuning knobs for a copy run.
#[derive(Debug, Clone)]
pub struct CopyOptions {
    /// Exclude patterns applied on top of the workspace filter.
    pub excludes: Vec<Regex>,
    /// Descend into children; false copies only the root node.
    pub recursive: bool,
    /// Allow destructive reconciliation: overwrites and removals.
    pub update: bool,
    /// Skip resource content whose destination stamp is not older.
    pub only_newer: bool,
    /// Traverse children alphabetically and skip destination reordering.
    pub no_ordering: bool,
    /// Selected nodes per destination commit.
    pub batch_size: usize,
    /// Pause after each batch commit.
    pub throttle: Duration,
    /// Checkpoint path to resume from, inclusive.
    pub resume_from: Option<String>,
}

impl Default for CopyOptions {
    fn default() -> Self {
        Self {
            excludes: Vec::new(),
            recursive: true,
            update: true,
            only_newer: false,
            no_ordering: false,
            batch_size: 1024,
            throttle: Duration::ZERO,
            resume_from: None,
        }
    }
}

impl CopyOptions {
    /// Compile and install exclude patterns. Matches are fully anchored.
    pub fn with_excludes(mut self, patterns: &[&str]) -> Result<Self, ConfigError> {
        for p in patterns {
            let anchored = format!("^(?:{})$", p);
            let regex = Regex::new(&anchored).map_err(|e| ConfigError::InvalidPattern {
                pattern: (*p).to_string(),
                reason: e.to_string(),
            })?;
            self.excludes.push(regex);
        }
        Ok(self)
    }

    pub fn with_recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }

    pub fn with_update(mut self, update: bool) -> Self {
        self.update = update;
        self
    }

    pub fn with_only_newer(mut self, only_newer: bool) -> Self {
        self.only_newer = only_newer;
        self
    }

    pub fn with_no_ordering(mut self, no_ordering: bool) -> Self {
        self.no_ordering = no_ordering;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_throttle(mut self, throttle: Duration) -> Self {
        self.throttle = throttle;
        self
    }

    pub fn with_resume_from(mut self, resume_from: &str) -> Self {
        self.resume_from = Some(resume_from.to_string());
        self
    }
}

/// What the copier did at a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyAction {
    Created,
    Updated,
    Excluded,
    ContentSkipped,
    Removed,
}

/// Best-effort progress observer.
///
/// Listener failures are logged and never interrupt the walk.
pub trait CopyListener: Send + Sync {
    fn on_node(&self, path: &str, action: CopyAction) -> anyhow::Result<()>;

    fn on_batch(&self, batches: u64, last_path: &str) -> anyhow::Result<()>;
}

/// Statistics from a copy run.
#[derive(Debug, Clone, Default)]
pub struct CopySummary {
    pub nodes_visited: u64,
    pub nodes_created: u64,
    pub nodes_updated: u64,
    pub nodes_removed: u64,
    pub properties_set: u64,
    pub properties_removed: u64,
    pub content_skipped: u64,
    pub batches_committed: u64,
    pub duration_ms: u64,
    /// Last selected path processed, in traversal order.
    pub last_path: Option<String>,
    /// True when the walk ended on an observed stop request.
    pub stopped: bool,
}

impl CopySummary {
    /// Format a human-readable summary.
    pub fn summary(&self) -> String {
        format!(
            "Visited {} nodes: {} created, {} updated, {} removed ({} content skips)\n\
             Properties: {} set, {} removed\n\
             Batches: {}, Time: {}ms{}",
            self.nodes_visited,
            self.nodes_created,
            self.nodes_updated,
            self.nodes_removed,
            self.content_skipped,
            self.properties_set,
            self.properties_removed,
            self.batches_committed,
            self.duration_ms,
            if self.stopped { " (stopped)" } else { "" },
        )
    }
}

enum WorkItem {
    Visit { src: String, dst: String },
    Reorder { dst: String, order: Vec<String> },
}

struct NodeOutcome {
    content_skipped: bool,
}

/// Walks a source subtree and reconciles the destination to match.
pub struct TreeCopier {
    filter: WorkspaceFilter,
    options: CopyOptions,
    listeners: Vec<Arc<dyn CopyListener>>,
}

impl TreeCopier {
    pub fn new(filter: WorkspaceFilter, options: CopyOptions) -> Self {
        Self {
            filter,
            options,
            listeners: Vec::new(),
        }
    }

    pub fn add_listener(&mut self, listener: Arc<dyn CopyListener>) {
        self.listeners.push(listener);
    }

    /// Run the copy from `src_root` to `dst_root`.
    ///
    /// A commit failure aborts the walk; batches committed before it stay
    /// committed. An observed stop request commits the current batch and
    /// returns a summary with `stopped` set.
    pub async fn copy(
        &self,
        source: &dyn ContentStore,
        destination: &dyn ContentStore,
        src_root: &str,
        dst_root: &str,
        cancel: &CancelToken,
    ) -> Result<CopySummary, StoreError> {
        if !source.exists(src_root).await? {
            return Err(StoreError::NotFound(src_root.to_string()));
        }
        let start = Instant::now();
        let batch_size = self.options.batch_size.max(1);
        let mut stats = CopySummary::default();
        let mut resume_pending = self.options.resume_from.is_some();
        let mut batch_count = 0usize;
        let mut stack = vec![WorkItem::Visit {
            src: src_root.to_string(),
            dst: dst_root.to_string(),
        }];

        while let Some(item) = stack.pop() {
            if cancel.is_cancelled() {
                destination.commit().await?;
                stats.batches_committed += 1;
                if let Some(last) = stats.last_path.clone() {
                    self.notify_batch(stats.batches_committed, &last);
                }
                stats.stopped = true;
                stats.duration_ms = start.elapsed().as_millis() as u64;
                info!(last_path = ?stats.last_path, "copy stopped on request");
                return Ok(stats);
            }
            match item {
                WorkItem::Reorder { dst, order } => {
                    self.mirror_order(destination, &dst, &order).await?;
                }
                WorkItem::Visit { src, dst } => {
                    if !self.filter.covers(&src) {
                        debug!(path = %src, "pruned: outside filter coverage");
                        continue;
                    }
                    stats.nodes_visited += 1;

                    if resume_pending && self.options.resume_from.as_deref() == Some(src.as_str())
                    {
                        // the checkpoint path itself is processed again
                        resume_pending = false;
                    }

                    let selected = !resume_pending
                        && self.filter.contains(&src)
                        && !self.is_excluded(&src);

                    let mut skip_content_child = false;
                    if selected {
                        let outcome = self
                            .reconcile_node(source, destination, &src, &dst, &mut stats)
                            .await?;
                        skip_content_child = outcome.content_skipped;
                        stats.last_path = Some(src.clone());
                        batch_count += 1;
                        if batch_count >= batch_size {
                            destination.commit().await?;
                            batch_count = 0;
                            stats.batches_committed += 1;
                            self.notify_batch(stats.batches_committed, &src);
                            if !self.options.throttle.is_zero() {
                                tokio::time::sleep(self.options.throttle).await;
                            }
                        }
                    } else if !resume_pending {
                        self.notify_node(&src, CopyAction::Excluded);
                    }

                    if self.options.recursive {
                        let mut names = source.children(&src).await?;
                        if self.options.no_ordering {
                            names.sort();
                        }
                        if selected && self.options.update && destination.exists(&dst).await? {
                            self.remove_vanished(destination, &src, &dst, &names, &mut stats)
                                .await?;
                        }
                        if skip_content_child {
                            names.retain(|n| n != well_known::CONTENT_CHILD);
                        }
                        if !self.options.no_ordering && names.len() > 1 {
                            stack.push(WorkItem::Reorder {
                                dst: dst.clone(),
                                order: names.clone(),
                            });
                        }
                        for name in names.iter().rev() {
                            stack.push(WorkItem::Visit {
                                src: path::join(&src, name),
                                dst: path::join(&dst, name),
                            });
                        }
                    }
                }
            }
        }

        destination.commit().await?;
        stats.batches_committed += 1;
        if batch_count > 0 {
            let last = stats.last_path.clone().unwrap_or_default();
            self.notify_batch(stats.batches_committed, &last);
        }
        stats.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            created = stats.nodes_created,
            updated = stats.nodes_updated,
            removed = stats.nodes_removed,
            batches = stats.batches_committed,
            "copy finished"
        );
        Ok(stats)
    }

    fn is_excluded(&self, path: &str) -> bool {
        self.options.excludes.iter().any(|re| re.is_match(path))
    }

    /// Mirror one node: ensure it exists, then reconcile mixins and
    /// properties. Destructive steps run only in update mode.
    async fn reconcile_node(
        &self,
        source: &dyn ContentStore,
        destination: &dyn ContentStore,
        src: &str,
        dst: &str,
        stats: &mut CopySummary,
    ) -> Result<NodeOutcome, StoreError> {
        let existed = destination.exists(dst).await?;
        if !existed {
            self.ensure_ancestors(source, destination, src, dst, stats)
                .await?;
            let primary_type = source.primary_type(src).await?;
            destination.create_node(dst, &primary_type).await?;
            stats.nodes_created += 1;
        } else {
            stats.nodes_updated += 1;
        }

        // the stamp comparison must see the destination's previous state
        let mut content_skipped = false;
        if self.options.only_newer {
            let src_content = path::join(src, well_known::CONTENT_CHILD);
            if source.exists(&src_content).await? {
                let src_stamp = source.last_modified(&src_content).await?;
                let dst_stamp = destination
                    .last_modified(&path::join(dst, well_known::CONTENT_CHILD))
                    .await?;
                content_skipped = match (src_stamp, dst_stamp) {
                    // a stampless source is treated as not newer
                    (None, _) => true,
                    (Some(s), Some(d)) => d >= s,
                    (Some(_), None) => false,
                };
            }
        }

        let src_mixins = source.mixins(src).await?;
        let dst_mixins = destination.mixins(dst).await?;
        for m in &src_mixins {
            if !dst_mixins.contains(m) {
                destination.add_mixin(dst, m).await?;
            }
        }
        if self.options.update {
            for m in &dst_mixins {
                if !src_mixins.contains(m) {
                    destination.remove_mixin(dst, m).await?;
                }
            }
        }

        let src_props = source.properties(src).await?;
        let dst_props = destination.properties(dst).await?;
        for (name, value) in &src_props {
            if well_known::is_protected(name) {
                continue;
            }
            if !self.filter.includes_property(&path::join(src, name)) {
                continue;
            }
            match dst_props.get(name) {
                Some(existing) if existing == value => {}
                Some(_) if !self.options.update => {}
                _ => {
                    destination.set_property(dst, name, value.clone()).await?;
                    stats.properties_set += 1;
                }
            }
        }
        if self.options.update {
            for name in dst_props.keys() {
                if well_known::is_protected(name) {
                    continue;
                }
                let still_wanted = src_props.contains_key(name)
                    && self.filter.includes_property(&path::join(src, name));
                if !still_wanted {
                    destination.remove_property(dst, name).await?;
                    stats.properties_removed += 1;
                }
            }
        }

        if content_skipped {
            stats.content_skipped += 1;
            self.notify_node(src, CopyAction::ContentSkipped);
        }
        self.notify_node(
            src,
            if existed {
                CopyAction::Updated
            } else {
                CopyAction::Created
            },
        );
        Ok(NodeOutcome { content_skipped })
    }

    /// Create missing destination ancestors, copying source primary types
    /// where a corresponding source node exists.
    async fn ensure_ancestors(
        &self,
        source: &dyn ContentStore,
        destination: &dyn ContentStore,
        src: &str,
        dst: &str,
        stats: &mut CopySummary,
    ) -> Result<(), StoreError> {
        let mut missing: Vec<(String, String)> = Vec::new();
        let mut s = src.to_string();
        let mut d = dst.to_string();
        loop {
            let (sp, dp) = match (path::parent(&s), path::parent(&d)) {
                (Some(sp), Some(dp)) => (sp.to_string(), dp.to_string()),
                _ => break,
            };
            if destination.exists(&dp).await? {
                break;
            }
            missing.push((sp.clone(), dp.clone()));
            s = sp;
            d = dp;
        }
        for (sp, dp) in missing.into_iter().rev() {
            let primary_type = if source.exists(&sp).await? {
                source.primary_type(&sp).await?
            } else {
                well_known::FALLBACK_TYPE.to_string()
            };
            destination.create_node(&dp, &primary_type).await?;
            stats.nodes_created += 1;
        }
        Ok(())
    }

    /// Remove destination children that vanished at the source, provided
    /// the filter selects their mapped source path.
    async fn remove_vanished(
        &self,
        destination: &dyn ContentStore,
        src: &str,
        dst: &str,
        src_names: &[String],
        stats: &mut CopySummary,
    ) -> Result<(), StoreError> {
        for name in destination.children(dst).await? {
            if src_names.iter().any(|n| *n == name) {
                continue;
            }
            let src_equiv = path::join(src, &name);
            if self.filter.contains(&src_equiv) && !self.is_excluded(&src_equiv) {
                destination.remove_node(&path::join(dst, &name)).await?;
                stats.nodes_removed += 1;
                self.notify_node(&src_equiv, CopyAction::Removed);
            }
        }
        Ok(())
    }

    /// Reorder destination children to mirror source child order.
    async fn mirror_order(
        &self,
        destination: &dyn ContentStore,
        dst: &str,
        order: &[String],
    ) -> Result<(), StoreError> {
        if !destination.exists(dst).await? {
            return Ok(());
        }
        let existing = destination.children(dst).await?;
        let mut before: Option<String> = None;
        for name in order.iter().rev() {
            if existing.iter().any(|n| n == name) {
                destination.reorder_child(dst, name, before.as_deref()).await?;
                before = Some(name.clone());
            }
        }
        Ok(())
    }

    fn notify_node(&self, path: &str, action: CopyAction) {
        for listener in &self.listeners {
            if let Err(e) = listener.on_node(path, action) {
                warn!(path = %path, error = %e, "copy listener failed");
            }
        }
    }

    fn notify_batch(&self, batches: u64, last_path: &str) {
        for listener in &self.listeners {
            if let Err(e) = listener.on_batch(batches, last_path) {
                warn!(batches, error = %e, "copy listener failed");
            }
        }
    }
}

/// Result of comparing source and destination subtrees.
#[derive(Debug, Default)]
pub struct VerifyResult {
    pub checked: usize,
    pub mismatched: Vec<String>,
    pub missing: Vec<String>,
    pub extra: Vec<String>,
    pub ok: bool,
}

impl fmt::Display for VerifyResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Verified {} selected nodes:", self.checked)?;
        if self.ok {
            writeln!(f, "  Status: OK")?;
        } else {
            if !self.mismatched.is_empty() {
                writeln!(f, "  Mismatched ({}):", self.mismatched.len())?;
                for p in &self.mismatched {
                    writeln!(f, "    {}", p)?;
                }
            }
            if !self.missing.is_empty() {
                writeln!(f, "  Missing in destination ({}):", self.missing.len())?;
                for p in &self.missing {
                    writeln!(f, "    {}", p)?;
                }
            }
            if !self.extra.is_empty() {
                writeln!(f, "  Extra in destination ({}):", self.extra.len())?;
                for p in &self.extra {
                    writeln!(f, "    {}", p)?;
                }
            }
            writeln!(f, "  Status: FAILED")?;
        }
        Ok(())
    }
}

/// Compare source and destination subtrees under `filter`.
///
/// Checks primary types and the filtered, unprotected property sets of
/// every selected node, and reports destination nodes the source lacks.
pub async fn verify(
    source: &dyn ContentStore,
    destination: &dyn ContentStore,
    src_root: &str,
    dst_root: &str,
    filter: &WorkspaceFilter,
) -> Result<VerifyResult, StoreError> {
    let mut result = VerifyResult::default();
    let mut stack = vec![(src_root.to_string(), dst_root.to_string())];
    while let Some((src, dst)) = stack.pop() {
        if !filter.covers(&src) {
            continue;
        }
        if filter.contains(&src) {
            result.checked += 1;
            if !destination.exists(&dst).await? {
                result.missing.push(src.clone());
            } else {
                let same_type =
                    source.primary_type(&src).await? == destination.primary_type(&dst).await?;
                let mut src_props = source.properties(&src).await?;
                let mut dst_props = destination.properties(&dst).await?;
                src_props.retain(|k, _| {
                    !well_known::is_protected(k)
                        && filter.includes_property(&path::join(&src, k))
                });
                dst_props.retain(|k, _| !well_known::is_protected(k));
                if !same_type || src_props != dst_props {
                    result.mismatched.push(src.clone());
                }
            }
        }
        let src_children = source.children(&src).await?;
        if destination.exists(&dst).await? {
            for name in destination.children(&dst).await? {
                if !src_children.contains(&name) && filter.contains(&path::join(&src, &name)) {
                    result.extra.push(path::join(&dst, &name));
                }
            }
        }
        for name in src_children {
            stack.push((path::join(&src, &name), path::join(&dst, &name)));
        }
    }
    result.ok = result.mismatched.is_empty() && result.missing.is_empty() && result.extra.is_empty();
    Ok(result)
}
