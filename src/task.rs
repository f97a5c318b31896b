//! Task records and the task store consumed by the executor.
//!
//! The store owns task state; the executor only reads it to resolve a
//! queued run into the script it should evaluate.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;

use crate::error::StoreError;
use crate::id::Id;

/// A stored task: the owning org and user plus the script to evaluate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub id: Id,
    pub org: Id,
    pub user: Id,
    pub script: String,
}

/// Inputs for creating a task.
#[derive(Debug, Clone)]
pub struct CreateTaskRequest {
    pub org: Id,
    pub user: Id,
    pub script: String,
}

/// Store of task records, read by the executor to resolve queued runs.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create_task(&self, req: CreateTaskRequest) -> Result<Id, StoreError>;

    async fn find_task(&self, id: Id) -> Result<Task, StoreError>;
}

/// In-memory task store backed by a mutex-guarded map.
#[derive(Default)]
pub struct InMemTaskStore {
    tasks: Mutex<HashMap<Id, Task>>,
    next_id: AtomicU64,
}

impl InMemTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for InMemTaskStore {
    async fn create_task(&self, req: CreateTaskRequest) -> Result<Id, StoreError> {
        let id = Id(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let task = Task {
            id,
            org: req.org,
            user: req.user,
            script: req.script,
        };
        self.tasks
            .lock()
            .expect("task store lock poisoned")
            .insert(id, task);
        Ok(id)
    }

    async fn find_task(&self, id: Id) -> Result<Task, StoreError> {
        self.tasks
            .lock()
            .expect("task store lock poisoned")
            .get(&id)
            .cloned()
            .ok_or(StoreError::TaskNotFound(id))
    }
}
