//! Error taxonomy for the run executor.
//!
//! Promise outcomes are handed verbatim to every waiter, so everything that
//! can surface through a promise is cheap to clone and comparable by value.

use thiserror::Error;

use crate::id::Id;
use crate::lang::CompileError;

/// Failure value reported by a query service.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct QueryError {
    message: String,
}

impl QueryError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Errors surfaced by the task store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("task {0} not found")]
    TaskNotFound(Id),
}

/// Errors surfaced by `Executor::execute` and `RunPromise::wait`.
///
/// `RunCanceled` is the canonical sentinel for a run canceled through its
/// promise; a run canceled by the execution context reports
/// `ContextCanceled` instead. The two differ only in identity.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutorError {
    /// The run was canceled through its promise.
    #[error("run canceled")]
    RunCanceled,

    /// The execution context passed to `execute` was canceled.
    #[error("execution context canceled")]
    ContextCanceled,

    /// The task store could not resolve the queued run's task.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The script could not be compiled into a query specification.
    #[error(transparent)]
    Compile(#[from] CompileError),

    /// The query service refused the request or reported a failure.
    #[error(transparent)]
    Query(#[from] QueryError),
}
