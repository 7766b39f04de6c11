//! Replication task lifecycle and the task manager control surface.
//!
//! A [`ReplicationTask`] is the stateful unit of work: locations, filter,
//! copy options and a lifecycle state machine. The [`TaskManager`] is the
//! registry an external transport drives: add, start on a worker, stop,
//! inspect, remove.

use crate::copier::{CancelToken, CopyListener, CopyOptions, CopySummary, TreeCopier};
use crate::filter::ConfigError;
use crate::path;
use crate::store::ContentStore;
use crate::workspace::WorkspaceFilter;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Lifecycle states of a replication task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    New,
    Running,
    Stopping,
    Stopped,
    Ended,
}

impl TaskState {
    /// True for states no transition leaves; a new task must be created
    /// to retry.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Ended | TaskState::Stopped)
    }
}

/// Errors raised by the task registry.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("Task already registered: {0}")]
    Duplicate(String),

    #[error("Task not found: {0}")]
    NotFound(String),

    #[error("Task is running: {0}")]
    Running(String),
}

/// Outcome snapshot exposed through the control surface.
#[derive(Debug, Clone)]
pub struct TaskResult {
    pub state: TaskState,
    pub error: Option<String>,
    pub summary: Option<CopySummary>,
}

/// A single configured replication run.
///
/// The lifecycle field and `last_error` are shared between the worker
/// and the controlling caller; both go through the state lock, so a
/// `stop` request and the worker's own transitions cannot race.
pub struct ReplicationTask {
    id: String,
    source_root: String,
    destination_root: String,
    filter: WorkspaceFilter,
    options: CopyOptions,
    state: Arc<RwLock<TaskState>>,
    cancel: CancelToken,
    last_error: Arc<RwLock<Option<String>>>,
    summary: Arc<RwLock<Option<CopySummary>>>,
    listeners: RwLock<Vec<Arc<dyn CopyListener>>>,
}

impl ReplicationTask {
    /// Create a task with a generated id.
    pub fn new(
        source_root: &str,
        destination_root: &str,
        filter: WorkspaceFilter,
        options: CopyOptions,
    ) -> Result<Self, ConfigError> {
        Self::with_id(
            &uuid::Uuid::new_v4().to_string(),
            source_root,
            destination_root,
            filter,
            options,
        )
    }

    /// Create a task with an explicit id.
    pub fn with_id(
        id: &str,
        source_root: &str,
        destination_root: &str,
        filter: WorkspaceFilter,
        options: CopyOptions,
    ) -> Result<Self, ConfigError> {
        Ok(Self {
            id: id.to_string(),
            source_root: path::normalize(source_root)?,
            destination_root: path::normalize(destination_root)?,
            filter,
            options,
            state: Arc::new(RwLock::new(TaskState::New)),
            cancel: CancelToken::new(),
            last_error: Arc::new(RwLock::new(None)),
            summary: Arc::new(RwLock::new(None)),
            listeners: RwLock::new(Vec::new()),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn source_root(&self) -> &str {
        &self.source_root
    }

    pub fn destination_root(&self) -> &str {
        &self.destination_root
    }

    pub async fn state(&self) -> TaskState {
        *self.state.read().await
    }

    /// Attach a progress listener; must happen before `start`.
    pub async fn add_listener(&self, listener: Arc<dyn CopyListener>) {
        self.listeners.write().await.push(listener);
    }

    /// Run the task to completion on the calling worker.
    ///
    /// Returns false without doing anything unless the task is `New`.
    pub async fn start(
        &self,
        source: Arc<dyn ContentStore>,
        destination: Arc<dyn ContentStore>,
    ) -> bool {
        {
            let mut state = self.state.write().await;
            if *state != TaskState::New {
                return false;
            }
            *state = TaskState::Running;
        }
        info!(
            task = %self.id,
            source = %self.source_root,
            destination = %self.destination_root,
            "replication task started"
        );

        let mut copier = TreeCopier::new(self.filter.clone(), self.options.clone());
        for listener in self.listeners.read().await.iter() {
            copier.add_listener(listener.clone());
        }
        let outcome = copier
            .copy(
                source.as_ref(),
                destination.as_ref(),
                &self.source_root,
                &self.destination_root,
                &self.cancel,
            )
            .await;

        let mut state = self.state.write().await;
        match outcome {
            Ok(stats) => {
                let stopped = stats.stopped;
                info!(task = %self.id, stopped, "replication task finished");
                *self.summary.write().await = Some(stats);
                *state = if stopped {
                    TaskState::Stopped
                } else {
                    TaskState::Ended
                };
            }
            Err(e) => {
                warn!(task = %self.id, error = %e, "replication task failed");
                *self.last_error.write().await = Some(e.to_string());
                *state = TaskState::Ended;
            }
        }
        true
    }

    /// Request a cooperative stop; returns false unless `Running`.
    ///
    /// The worker observes the request between nodes, commits the batch
    /// in flight and transitions to `Stopped`.
    pub async fn stop(&self) -> bool {
        let mut state = self.state.write().await;
        if *state != TaskState::Running {
            return false;
        }
        *state = TaskState::Stopping;
        self.cancel.cancel();
        info!(task = %self.id, "stop requested");
        true
    }

    /// Current state, terminal error and summary.
    pub async fn result(&self) -> TaskResult {
        TaskResult {
            state: *self.state.read().await,
            error: self.last_error.read().await.clone(),
            summary: self.summary.read().await.clone(),
        }
    }
}

/// Registry of replication tasks; each started task runs on its own
/// worker. Tasks sharing a destination subtree are the caller's problem
/// to serialize.
#[derive(Default)]
pub struct TaskManager {
    tasks: Arc<RwLock<HashMap<String, Arc<ReplicationTask>>>>,
}

impl TaskManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task; fails if the id is already taken.
    pub async fn add_task(&self, task: ReplicationTask) -> Result<Arc<ReplicationTask>, TaskError> {
        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(task.id()) {
            return Err(TaskError::Duplicate(task.id().to_string()));
        }
        let task = Arc::new(task);
        tasks.insert(task.id().to_string(), task.clone());
        Ok(task)
    }

    pub async fn get(&self, id: &str) -> Option<Arc<ReplicationTask>> {
        self.tasks.read().await.get(id).cloned()
    }

    pub async fn list(&self) -> Vec<Arc<ReplicationTask>> {
        self.tasks.read().await.values().cloned().collect()
    }

    /// Start a registered task on its own worker.
    pub async fn spawn(
        &self,
        id: &str,
        source: Arc<dyn ContentStore>,
        destination: Arc<dyn ContentStore>,
    ) -> Result<tokio::task::JoinHandle<bool>, TaskError> {
        let task = self
            .get(id)
            .await
            .ok_or_else(|| TaskError::NotFound(id.to_string()))?;
        Ok(tokio::spawn(
            async move { task.start(source, destination).await },
        ))
    }

    /// Drop a task that is not currently running.
    pub async fn remove(&self, id: &str) -> Result<(), TaskError> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get(id)
            .ok_or_else(|| TaskError::NotFound(id.to_string()))?;
        let state = task.state().await;
        if !(state == TaskState::New || state.is_terminal()) {
            return Err(TaskError::Running(id.to_string()));
        }
        tasks.remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::PathFilterSet;
    use crate::store::{MemoryStore, Value};
    use std::time::Duration;

    fn everything(root: &str) -> WorkspaceFilter {
        let mut filter = WorkspaceFilter::new();
        filter.add(PathFilterSet::everything(root).unwrap());
        filter
    }

    async fn seeded_source(node_count: usize) -> Arc<MemoryStore> {
        let store = MemoryStore::new();
        store.create_tree("/site", "folder").await.unwrap();
        for i in 0..node_count {
            let p = format!("/site/n{:03}", i);
            store.create_node(&p, "page").await.unwrap();
            store
                .set_property(&p, "idx", Value::Long(i as i64))
                .await
                .unwrap();
        }
        store.commit().await.unwrap();
        Arc::new(store)
    }

    #[tokio::test]
    async fn test_task_runs_to_ended() {
        let source = seeded_source(3).await;
        let destination = Arc::new(MemoryStore::new());
        let task = ReplicationTask::with_id(
            "t1",
            "/site",
            "/site",
            everything("/site"),
            CopyOptions::default(),
        )
        .unwrap();

        assert_eq!(task.state().await, TaskState::New);
        assert!(task.start(source.clone(), destination.clone()).await);

        let result = task.result().await;
        assert_eq!(result.state, TaskState::Ended);
        assert!(result.state.is_terminal());
        assert!(result.error.is_none());
        assert_eq!(result.summary.unwrap().nodes_created, 4);
        assert!(destination.exists("/site/n002").await.unwrap());
    }

    #[tokio::test]
    async fn test_start_is_noop_outside_new() {
        let source = seeded_source(1).await;
        let destination = Arc::new(MemoryStore::new());
        let task = ReplicationTask::with_id(
            "t1",
            "/site",
            "/site",
            everything("/site"),
            CopyOptions::default(),
        )
        .unwrap();

        assert!(task.start(source.clone(), destination.clone()).await);
        assert_eq!(task.state().await, TaskState::Ended);
        // terminal: no restart
        assert!(!task.start(source, destination).await);
        assert_eq!(task.state().await, TaskState::Ended);
    }

    #[tokio::test]
    async fn test_stop_is_noop_outside_running() {
        let task = ReplicationTask::with_id(
            "t1",
            "/site",
            "/site",
            everything("/site"),
            CopyOptions::default(),
        )
        .unwrap();
        assert!(!task.stop().await);
        assert_eq!(task.state().await, TaskState::New);
    }

    #[tokio::test]
    async fn test_failed_task_records_error() {
        let source = seeded_source(3).await;
        let destination = Arc::new(MemoryStore::new());
        destination.fail_commits_after(0).await;
        let task = ReplicationTask::with_id(
            "t1",
            "/site",
            "/site",
            everything("/site"),
            CopyOptions::default(),
        )
        .unwrap();

        task.start(source, destination).await;
        let result = task.result().await;
        assert_eq!(result.state, TaskState::Ended);
        assert!(result.error.unwrap().contains("Commit failed"));
    }

    #[tokio::test]
    async fn test_missing_source_root_fails() {
        let source = Arc::new(MemoryStore::new());
        let destination = Arc::new(MemoryStore::new());
        let task = ReplicationTask::with_id(
            "t1",
            "/absent",
            "/absent",
            everything("/absent"),
            CopyOptions::default(),
        )
        .unwrap();
        task.start(source, destination).await;
        let result = task.result().await;
        assert_eq!(result.state, TaskState::Ended);
        assert!(result.error.unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn test_stop_while_running_transitions_to_stopped() {
        let source = seeded_source(10).await;
        let destination = Arc::new(MemoryStore::new());
        let manager = TaskManager::new();
        let task = ReplicationTask::with_id(
            "t1",
            "/site",
            "/site",
            everything("/site"),
            CopyOptions::default()
                .with_batch_size(1)
                .with_throttle(Duration::from_millis(500)),
        )
        .unwrap();
        let task = manager.add_task(task).await.unwrap();
        let handle = manager.spawn("t1", source, destination).await.unwrap();

        // the first batch commit parks the worker in the throttle sleep;
        // request the stop while it is parked
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(task.stop().await);
        assert!(handle.await.unwrap());

        let result = task.result().await;
        assert_eq!(result.state, TaskState::Stopped);
        assert!(result.summary.unwrap().stopped);
        // a stopped task is terminal
        assert!(!task.stop().await);
    }

    #[tokio::test]
    async fn test_manager_add_get_remove() {
        let manager = TaskManager::new();
        let task = ReplicationTask::with_id(
            "t1",
            "/site",
            "/site",
            everything("/site"),
            CopyOptions::default(),
        )
        .unwrap();
        manager.add_task(task).await.unwrap();
        assert!(manager.get("t1").await.is_some());
        assert_eq!(manager.list().await.len(), 1);

        let dup = ReplicationTask::with_id(
            "t1",
            "/site",
            "/site",
            everything("/site"),
            CopyOptions::default(),
        )
        .unwrap();
        assert!(matches!(
            manager.add_task(dup).await,
            Err(TaskError::Duplicate(_))
        ));

        manager.remove("t1").await.unwrap();
        assert!(manager.get("t1").await.is_none());
        assert!(matches!(
            manager.remove("t1").await,
            Err(TaskError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_manager_refuses_to_remove_running_task() {
        let source = seeded_source(10).await;
        let destination = Arc::new(MemoryStore::new());
        let manager = TaskManager::new();
        let task = ReplicationTask::with_id(
            "t1",
            "/site",
            "/site",
            everything("/site"),
            CopyOptions::default()
                .with_batch_size(1)
                .with_throttle(Duration::from_millis(300)),
        )
        .unwrap();
        let task = manager.add_task(task).await.unwrap();
        let handle = manager.spawn("t1", source, destination).await.unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(matches!(
            manager.remove("t1").await,
            Err(TaskError::Running(_))
        ));

        task.stop().await;
        handle.await.unwrap();
        manager.remove("t1").await.unwrap();
    }

    #[tokio::test]
    async fn test_generated_ids_are_unique() {
        let a = ReplicationTask::new("/s", "/d", everything("/s"), CopyOptions::default()).unwrap();
        let b = ReplicationTask::new("/s", "/d", everything("/s"), CopyOptions::default()).unwrap();
        assert_ne!(a.id(), b.id());
    }

    #[tokio::test]
    async fn test_task_rejects_invalid_roots() {
        assert!(matches!(
            ReplicationTask::with_id("t", "relative", "/d", everything("/s"), CopyOptions::default()),
            Err(ConfigError::InvalidPath(_))
        ));
    }
}
