//! CSync Core Library
//!
//! Content-selection and tree-replication engine:
//! - Path helpers and prefix mappings between mount points
//! - Compiled path patterns and ordered include/exclude filter sets
//! - Workspace filters with translate/merge and a persisted JSON form
//! - Content tree store abstraction with an in-memory implementation
//! - Batched, throttled, resumable tree copier with mirror reconciliation
//! - Replication task lifecycle and task manager

pub mod path;
pub mod pattern;
pub mod filter;
pub mod workspace;
pub mod store;
pub mod copier;
pub mod checkpoint;
pub mod task;


pub use path::PathMapping;
pub use pattern::PathPattern;
pub use filter::{ConfigError, FilterEntry, PathFilterSet, PathFilterSetBuilder};
pub use workspace::{FilterSetSpec, WorkspaceFilter, WorkspaceFilterSpec};
pub use store::{ContentStore, MemoryStore, StoreError, Value};
pub use copier::{
    verify, CancelToken, CopyAction, CopyListener, CopyOptions, CopySummary, TreeCopier,
    VerifyResult,
};
pub use checkpoint::{Checkpoint, CheckpointWriter};
pub use task::{ReplicationTask, TaskError, TaskManager, TaskResult, TaskState};
