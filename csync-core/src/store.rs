//! Content tree store abstraction.
//!
//! Both ends of a replication are driven through the [`ContentStore`]
//! trait: an ordered, path-addressed tree of typed nodes carrying
//! properties and mixins, with session-like commit/refresh semantics.
//! [`MemoryStore`] is the in-memory implementation used for embedding
//! and tests.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::path;

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors raised while talking to a content store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Node not found: {0}")]
    NotFound(String),

    #[error("Node already exists: {0}")]
    AlreadyExists(String),

    #[error("No parent node for: {0}")]
    NoParent(String),

    #[error("Commit failed: {0}")]
    Commit(String),

    #[error("Store backend error: {0}")]
    Backend(String),
}

/// A typed property value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Long(i64),
    Double(f64),
    Boolean(bool),
    Instant(DateTime<Utc>),
    Binary(Bytes),
}

/// Well-known names shared by all store implementations.
pub mod well_known {
    /// Child node carrying the actual content of a resource node.
    pub const CONTENT_CHILD: &str = "content";

    /// Last-modified property on a content child.
    pub const LAST_MODIFIED: &str = "lastModified";

    /// Primary type used when an ancestor has to be synthesized.
    pub const FALLBACK_TYPE: &str = "folder";

    /// Prefix of internal properties managed by the store itself.
    pub const SYSTEM_PREFIX: &str = "sys:";

    /// True for properties the engine must never diff or copy.
    pub fn is_protected(name: &str) -> bool {
        name.starts_with(SYSTEM_PREFIX)
    }
}

/// Interface of a content tree store handle.
///
/// Mutations accumulate in the handle's session until [`commit`]
/// persists them as one unit; [`refresh`] discards pending changes.
///
/// [`commit`]: ContentStore::commit
/// [`refresh`]: ContentStore::refresh
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn exists(&self, path: &str) -> Result<bool>;

    /// Ordered names of the children of `path`.
    async fn children(&self, path: &str) -> Result<Vec<String>>;

    async fn primary_type(&self, path: &str) -> Result<String>;

    async fn mixins(&self, path: &str) -> Result<Vec<String>>;

    async fn add_mixin(&self, path: &str, name: &str) -> Result<()>;

    async fn remove_mixin(&self, path: &str, name: &str) -> Result<()>;

    async fn properties(&self, path: &str) -> Result<BTreeMap<String, Value>>;

    async fn set_property(&self, path: &str, name: &str, value: Value) -> Result<()>;

    async fn remove_property(&self, path: &str, name: &str) -> Result<()>;

    /// Create a node; the parent must already exist.
    async fn create_node(&self, path: &str, primary_type: &str) -> Result<()>;

    /// Remove a node and its entire subtree.
    async fn remove_node(&self, path: &str) -> Result<()>;

    /// Move `child` directly before `before`, or to the end when `None`.
    async fn reorder_child(&self, path: &str, child: &str, before: Option<&str>) -> Result<()>;

    /// Durably persist pending changes as one unit.
    async fn commit(&self) -> Result<()>;

    /// Discard pending changes.
    async fn refresh(&self) -> Result<()>;

    /// Last-modified stamp of `path`, if it exists and carries one.
    async fn last_modified(&self, path: &str) -> Result<Option<DateTime<Utc>>> {
        if !self.exists(path).await? {
            return Ok(None);
        }
        let props = self.properties(path).await?;
        Ok(match props.get(well_known::LAST_MODIFIED) {
            Some(Value::Instant(t)) => Some(*t),
            _ => None,
        })
    }
}

#[derive(Debug, Clone, Default)]
struct Node {
    primary_type: String,
    mixins: Vec<String>,
    properties: BTreeMap<String, Value>,
    children: Vec<String>,
}

#[derive(Debug, Default)]
struct StoreState {
    live: HashMap<String, Node>,
    durable: HashMap<String, Node>,
    commits: u64,
    fail_commits_after: Option<u64>,
}

/// In-memory [`ContentStore`] with session-like commit semantics.
///
/// Mutations land in a live tree; `commit` copies it to the durable tree
/// and `refresh` discards anything uncommitted. A commit-failure knob is
/// exposed for exercising partial-failure paths.
#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<RwLock<StoreState>>,
}

impl MemoryStore {
    /// Create a store holding only the root node.
    pub fn new() -> Self {
        let root = Node {
            primary_type: well_known::FALLBACK_TYPE.to_string(),
            ..Node::default()
        };
        let mut live = HashMap::new();
        live.insert("/".to_string(), root);
        let durable = live.clone();
        Self {
            state: Arc::new(RwLock::new(StoreState {
                live,
                durable,
                commits: 0,
                fail_commits_after: None,
            })),
        }
    }

    /// Number of successful commits so far.
    pub async fn commit_count(&self) -> u64 {
        self.state.read().await.commits
    }

    /// Make every commit after the first `limit` fail.
    pub async fn fail_commits_after(&self, limit: u64) {
        self.state.write().await.fail_commits_after = Some(limit);
    }

    /// Convenience: create a node, synthesizing missing ancestors.
    pub async fn create_tree(&self, node_path: &str, primary_type: &str) -> Result<()> {
        let mut missing = Vec::new();
        let mut cur = node_path.to_string();
        while !self.exists(&cur).await? {
            missing.push(cur.clone());
            match path::parent(&cur) {
                Some(p) => cur = p.to_string(),
                None => break,
            }
        }
        for (i, p) in missing.iter().rev().enumerate() {
            let ptype = if i == missing.len() - 1 {
                primary_type
            } else {
                well_known::FALLBACK_TYPE
            };
            self.create_node(p, ptype).await?;
        }
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.state.read().await.live.contains_key(path))
    }

    async fn children(&self, path: &str) -> Result<Vec<String>> {
        let state = self.state.read().await;
        state
            .live
            .get(path)
            .map(|n| n.children.clone())
            .ok_or_else(|| StoreError::NotFound(path.to_string()))
    }

    async fn primary_type(&self, path: &str) -> Result<String> {
        let state = self.state.read().await;
        state
            .live
            .get(path)
            .map(|n| n.primary_type.clone())
            .ok_or_else(|| StoreError::NotFound(path.to_string()))
    }

    async fn mixins(&self, path: &str) -> Result<Vec<String>> {
        let state = self.state.read().await;
        state
            .live
            .get(path)
            .map(|n| n.mixins.clone())
            .ok_or_else(|| StoreError::NotFound(path.to_string()))
    }

    async fn add_mixin(&self, path: &str, name: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let node = state
            .live
            .get_mut(path)
            .ok_or_else(|| StoreError::NotFound(path.to_string()))?;
        if !node.mixins.iter().any(|m| m == name) {
            node.mixins.push(name.to_string());
        }
        Ok(())
    }

    async fn remove_mixin(&self, path: &str, name: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let node = state
            .live
            .get_mut(path)
            .ok_or_else(|| StoreError::NotFound(path.to_string()))?;
        node.mixins.retain(|m| m != name);
        Ok(())
    }

    async fn properties(&self, path: &str) -> Result<BTreeMap<String, Value>> {
        let state = self.state.read().await;
        state
            .live
            .get(path)
            .map(|n| n.properties.clone())
            .ok_or_else(|| StoreError::NotFound(path.to_string()))
    }

    async fn set_property(&self, path: &str, name: &str, value: Value) -> Result<()> {
        let mut state = self.state.write().await;
        let node = state
            .live
            .get_mut(path)
            .ok_or_else(|| StoreError::NotFound(path.to_string()))?;
        node.properties.insert(name.to_string(), value);
        Ok(())
    }

    async fn remove_property(&self, path: &str, name: &str) -> Result<()> {
        let mut state = self.state.write().await;
        let node = state
            .live
            .get_mut(path)
            .ok_or_else(|| StoreError::NotFound(path.to_string()))?;
        node.properties.remove(name);
        Ok(())
    }

    async fn create_node(&self, node_path: &str, primary_type: &str) -> Result<()> {
        let mut state = self.state.write().await;
        if state.live.contains_key(node_path) {
            return Err(StoreError::AlreadyExists(node_path.to_string()));
        }
        let parent = path::parent(node_path)
            .ok_or_else(|| StoreError::NoParent(node_path.to_string()))?
            .to_string();
        let name = path::name(node_path)
            .ok_or_else(|| StoreError::NoParent(node_path.to_string()))?
            .to_string();
        let parent_node = state
            .live
            .get_mut(&parent)
            .ok_or_else(|| StoreError::NoParent(node_path.to_string()))?;
        parent_node.children.push(name);
        state.live.insert(
            node_path.to_string(),
            Node {
                primary_type: primary_type.to_string(),
                ..Node::default()
            },
        );
        Ok(())
    }

    async fn remove_node(&self, node_path: &str) -> Result<()> {
        if node_path == "/" {
            return Err(StoreError::Backend("cannot remove the root".to_string()));
        }
        let mut state = self.state.write().await;
        if !state.live.contains_key(node_path) {
            return Err(StoreError::NotFound(node_path.to_string()));
        }
        let prefix = format!("{}/", node_path);
        state
            .live
            .retain(|p, _| p != node_path && !p.starts_with(&prefix));
        if let (Some(parent), Some(name)) = (path::parent(node_path), path::name(node_path)) {
            let name = name.to_string();
            if let Some(parent_node) = state.live.get_mut(parent) {
                parent_node.children.retain(|c| *c != name);
            }
        }
        Ok(())
    }

    async fn reorder_child(&self, path: &str, child: &str, before: Option<&str>) -> Result<()> {
        let mut state = self.state.write().await;
        let node = state
            .live
            .get_mut(path)
            .ok_or_else(|| StoreError::NotFound(path.to_string()))?;
        let from = node
            .children
            .iter()
            .position(|c| c == child)
            .ok_or_else(|| StoreError::NotFound(format!("{}/{}", path, child)))?;
        let name = node.children.remove(from);
        match before {
            Some(b) => {
                let to = node
                    .children
                    .iter()
                    .position(|c| c == b)
                    .ok_or_else(|| StoreError::NotFound(format!("{}/{}", path, b)))?;
                node.children.insert(to, name);
            }
            None => node.children.push(name),
        }
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(limit) = state.fail_commits_after {
            if state.commits >= limit {
                return Err(StoreError::Commit("injected commit failure".to_string()));
            }
        }
        state.durable = state.live.clone();
        state.commits += 1;
        Ok(())
    }

    async fn refresh(&self) -> Result<()> {
        let mut state = self.state.write().await;
        state.live = state.durable.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[tokio::test]
    async fn test_create_and_read_nodes() {
        let store = MemoryStore::new();
        store.create_node("/a", "folder").await.unwrap();
        store.create_node("/a/b", "file").await.unwrap();
        assert!(store.exists("/a/b").await.unwrap());
        assert_eq!(store.primary_type("/a/b").await.unwrap(), "file");
        assert_eq!(store.children("/a").await.unwrap(), vec!["b"]);
        assert_eq!(store.children("/").await.unwrap(), vec!["a"]);
    }

    #[tokio::test]
    async fn test_create_requires_parent() {
        let store = MemoryStore::new();
        let err = store.create_node("/a/b", "file").await.unwrap_err();
        assert!(matches!(err, StoreError::NoParent(_)));
    }

    #[tokio::test]
    async fn test_children_keep_insertion_order() {
        let store = MemoryStore::new();
        for name in ["z", "a", "m"] {
            store.create_node(&format!("/{}", name), "folder").await.unwrap();
        }
        assert_eq!(store.children("/").await.unwrap(), vec!["z", "a", "m"]);
    }

    #[tokio::test]
    async fn test_reorder_child() {
        let store = MemoryStore::new();
        for name in ["a", "b", "c"] {
            store.create_node(&format!("/{}", name), "folder").await.unwrap();
        }
        store.reorder_child("/", "c", Some("a")).await.unwrap();
        assert_eq!(store.children("/").await.unwrap(), vec!["c", "a", "b"]);
        store.reorder_child("/", "c", None).await.unwrap();
        assert_eq!(store.children("/").await.unwrap(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_remove_node_drops_subtree() {
        let store = MemoryStore::new();
        store.create_tree("/a/b/c", "file").await.unwrap();
        store.create_node("/a/d", "file").await.unwrap();
        store.remove_node("/a/b").await.unwrap();
        assert!(!store.exists("/a/b").await.unwrap());
        assert!(!store.exists("/a/b/c").await.unwrap());
        assert!(store.exists("/a/d").await.unwrap());
        assert_eq!(store.children("/a").await.unwrap(), vec!["d"]);
    }

    #[tokio::test]
    async fn test_commit_and_refresh() {
        let store = MemoryStore::new();
        store.create_node("/a", "folder").await.unwrap();
        store.commit().await.unwrap();

        store.create_node("/b", "folder").await.unwrap();
        store.refresh().await.unwrap();
        assert!(store.exists("/a").await.unwrap());
        assert!(!store.exists("/b").await.unwrap());
        assert_eq!(store.commit_count().await, 1);
    }

    #[tokio::test]
    async fn test_injected_commit_failure() {
        let store = MemoryStore::new();
        store.fail_commits_after(1).await;
        store.create_node("/a", "folder").await.unwrap();
        store.commit().await.unwrap();
        store.create_node("/b", "folder").await.unwrap();
        let err = store.commit().await.unwrap_err();
        assert!(matches!(err, StoreError::Commit(_)));
    }

    #[tokio::test]
    async fn test_mixins_and_properties() {
        let store = MemoryStore::new();
        store.create_node("/n", "file").await.unwrap();
        store.add_mixin("/n", "versionable").await.unwrap();
        store.add_mixin("/n", "versionable").await.unwrap();
        assert_eq!(store.mixins("/n").await.unwrap(), vec!["versionable"]);
        store.remove_mixin("/n", "versionable").await.unwrap();
        assert!(store.mixins("/n").await.unwrap().is_empty());

        store
            .set_property("/n", "title", Value::String("hello".to_string()))
            .await
            .unwrap();
        store
            .set_property("/n", "data", Value::Binary(Bytes::from_static(b"\x00\x01")))
            .await
            .unwrap();
        store
            .set_property("/n", "ratio", Value::Double(0.5))
            .await
            .unwrap();
        store
            .set_property("/n", "hidden", Value::Boolean(false))
            .await
            .unwrap();
        let props = store.properties("/n").await.unwrap();
        assert_eq!(props.get("title"), Some(&Value::String("hello".to_string())));
        assert_eq!(props.get("data"), Some(&Value::Binary(Bytes::from_static(b"\x00\x01"))));
        assert_eq!(props.get("hidden"), Some(&Value::Boolean(false)));
        store.remove_property("/n", "title").await.unwrap();
        assert!(store.properties("/n").await.unwrap().get("title").is_none());
    }

    #[tokio::test]
    async fn test_last_modified_reads_instant() {
        let store = MemoryStore::new();
        store.create_node("/n", "resource").await.unwrap();
        assert_eq!(store.last_modified("/n").await.unwrap(), None);
        assert_eq!(store.last_modified("/missing").await.unwrap(), None);

        let stamp = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        store
            .set_property("/n", well_known::LAST_MODIFIED, Value::Instant(stamp))
            .await
            .unwrap();
        assert_eq!(store.last_modified("/n").await.unwrap(), Some(stamp));
    }

    #[test]
    fn test_protected_property_names() {
        assert!(well_known::is_protected("sys:createdBy"));
        assert!(!well_known::is_protected("title"));
        assert!(!well_known::is_protected("meta:hidden"));
    }
}
