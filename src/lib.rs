//! Windlass - a task run executor over a query service
//!
//! Given a queued run of a user-authored script task, the executor drives
//! the underlying query service to evaluate the script, hands the caller a
//! [`RunPromise`] to await or cancel the outcome, and tracks every
//! in-flight run so [`Executor::wait`] can block until quiescence.
//!
//! ## Core pieces
//!
//! - [`Executor`]: accepts queued runs and spawns one worker per run
//! - [`RunPromise`]: multi-waiter handle with `wait`, `cancel`, and `run`
//! - [`AsyncQueryService`] / [`QueryService`]: the two upstream shapes
//! - [`QueryServiceBridge`]: exposes an async upstream through the blocking shape
//!
//! ## Collaborators
//!
//! - [`TaskStore`]: resolves task records for queued runs
//! - [`lang`]: compiles scripts into query specifications

pub mod bridge;
pub mod error;
pub mod executor;
pub mod id;
pub mod lang;
pub mod promise;
pub mod query;
pub mod task;

// Cancellation plumbing for execute contexts and query handles.
pub use tokio_util::sync::CancellationToken;

// Executor surface
pub use error::{ExecutorError, QueryError, StoreError};
pub use executor::Executor;
pub use promise::{QueuedRun, RunPromise, RunResult};

// Identifiers
pub use id::{Id, IdError};

// Query service facade
pub use bridge::QueryServiceBridge;
pub use query::{
    AsyncQueryService, Authorization, QueryCompletion, QueryHandle, QueryService, Request,
    ResultIterator, ResultSet, ResultSets, Statistics,
};

// Script compilation
pub use lang::{CompileError, Spec, compile};

// Task store
pub use task::{CreateTaskRequest, InMemTaskStore, Task, TaskStore};
