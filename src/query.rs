//! Query service facade: the two upstream shapes and the in-flight handle.
//!
//! Two service shapes exist upstream. The asynchronous shape returns a
//! [`QueryHandle`] immediately and the caller then blocks on the handle; the
//! synchronous shape does not resolve until results are materialized.
//! [`crate::bridge::QueryServiceBridge`] converts the former into the
//! latter; the executor drives either shape directly.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::QueryError;
use crate::id::Id;
use crate::lang::Spec;

/// Authorization minted for a single query request, derived from the task's
/// owning user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorization {
    pub user: Id,
    pub token: Uuid,
}

impl Authorization {
    pub fn for_user(user: Id) -> Self {
        Self {
            user,
            token: Uuid::new_v4(),
        }
    }
}

/// A query request: the owning organization, the compiled specification,
/// and a per-request authorization.
#[derive(Debug, Clone)]
pub struct Request {
    pub org: Id,
    pub spec: Spec,
    pub authorization: Authorization,
}

/// Summary statistics reported by the query engine. Opaque to the executor;
/// carried through on successful runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistics {
    pub total_duration: Duration,
    pub compile_duration: Duration,
    pub execute_duration: Duration,
    pub concurrency: usize,
    pub max_allocated: u64,
}

impl Statistics {
    /// Merge another set of statistics into this one. Durations accumulate;
    /// concurrency and allocation report the high-water mark.
    pub fn add(&mut self, other: &Statistics) {
        self.total_duration += other.total_duration;
        self.compile_duration += other.compile_duration;
        self.execute_duration += other.execute_duration;
        self.concurrency = self.concurrency.max(other.concurrency);
        self.max_allocated = self.max_allocated.max(other.max_allocated);
    }
}

/// One named result set. Rows are drained and discarded upstream of this
/// layer; only the name and statistics survive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultSet {
    pub name: String,
    pub statistics: Statistics,
}

/// Named result sets delivered when a query becomes ready.
pub type ResultSets = BTreeMap<String, ResultSet>;

/// Materialized outcome of a blocking query.
///
/// A request the service refused never produces an iterator; a query that
/// ran and failed produces one whose [`ResultIterator::err`] is set.
#[derive(Debug)]
pub struct ResultIterator {
    results: ResultSets,
    err: Option<QueryError>,
}

impl ResultIterator {
    pub fn from_results(results: ResultSets) -> Self {
        Self { results, err: None }
    }

    pub fn from_error(err: QueryError) -> Self {
        Self {
            results: ResultSets::new(),
            err: Some(err),
        }
    }

    /// Drain the remaining result sets, discarding row payloads and merging
    /// their statistics.
    pub fn drain(&mut self) -> Statistics {
        let mut statistics = Statistics::default();
        for result in std::mem::take(&mut self.results).values() {
            statistics.add(&result.statistics);
        }
        statistics
    }

    /// The error the query reported, if it ran and failed.
    pub fn err(&self) -> Option<QueryError> {
        self.err.clone()
    }

    /// Release the iterator.
    pub fn release(self) {}
}

struct HandleState {
    err: Mutex<Option<QueryError>>,
    cancel: CancellationToken,
}

/// An in-flight query returned by [`AsyncQueryService::submit`].
///
/// Dropping a handle releases it; a handle dropped before its ready channel
/// resolved also requests cancellation of the underlying query.
pub struct QueryHandle {
    ready: oneshot::Receiver<ResultSets>,
    resolved: bool,
    state: Arc<HandleState>,
}

/// Service-side resolver for a pending [`QueryHandle`].
pub struct QueryCompletion {
    ready: oneshot::Sender<ResultSets>,
    state: Arc<HandleState>,
}

impl QueryHandle {
    /// Create a pending handle plus the completion the service resolves it
    /// through.
    pub fn pending() -> (QueryCompletion, QueryHandle) {
        let (tx, rx) = oneshot::channel();
        let state = Arc::new(HandleState {
            err: Mutex::new(None),
            cancel: CancellationToken::new(),
        });
        (
            QueryCompletion {
                ready: tx,
                state: Arc::clone(&state),
            },
            QueryHandle {
                ready: rx,
                resolved: false,
                state,
            },
        )
    }

    /// Wait on the one-shot ready channel. `None` means the channel closed
    /// without delivering results; consult [`QueryHandle::err`] afterwards.
    pub async fn ready(&mut self) -> Option<ResultSets> {
        let results = (&mut self.ready).await.ok();
        self.resolved = true;
        results
    }

    /// The query's error, if any. Meaningful once the ready channel has
    /// resolved.
    pub fn err(&self) -> Option<QueryError> {
        self.state
            .err
            .lock()
            .expect("query handle lock poisoned")
            .clone()
    }

    /// Ask the service to stop the query. The service closes the ready
    /// channel promptly.
    pub fn cancel(&self) {
        self.state.cancel.cancel();
    }

    /// Release the handle.
    pub fn done(self) {}
}

impl Drop for QueryHandle {
    fn drop(&mut self) {
        // Only an abandoned handle propagates cancellation; a handle whose
        // ready channel already resolved is just released.
        if !self.resolved {
            self.state.cancel.cancel();
        }
    }
}

impl QueryCompletion {
    /// Deliver results on the ready channel.
    pub fn succeed(self, results: ResultSets) {
        let _ = self.ready.send(results);
    }

    /// Latch an error and close the ready channel undelivered.
    pub fn fail(self, err: QueryError) {
        *self
            .state
            .err
            .lock()
            .expect("query handle lock poisoned") = Some(err);
    }

    /// Close the ready channel with neither results nor an error.
    pub fn close(self) {}

    /// Token fired when the handle side requests cancellation.
    pub fn cancel_token(&self) -> CancellationToken {
        self.state.cancel.clone()
    }
}

/// Query service shape that returns an in-flight handle immediately.
#[async_trait]
pub trait AsyncQueryService: Send + Sync {
    /// Submit a query for evaluation. Returns promptly; the caller then
    /// blocks on the handle.
    async fn submit(&self, req: Request) -> Result<QueryHandle, QueryError>;
}

/// Query service shape that does not resolve until results are materialized
/// or a hard error occurs.
///
/// A refused request surfaces as `Err`; a query that ran and failed
/// surfaces through the iterator's `err`.
#[async_trait]
pub trait QueryService: Send + Sync {
    async fn query(&self, req: Request) -> Result<ResultIterator, QueryError>;
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{QueryHandle, ResultIterator, ResultSet, ResultSets, Statistics};
    use crate::error::QueryError;

    fn results_named(names: &[&str]) -> ResultSets {
        names
            .iter()
            .map(|name| {
                (
                    name.to_string(),
                    ResultSet {
                        name: name.to_string(),
                        statistics: Statistics {
                            total_duration: Duration::from_millis(5),
                            concurrency: 2,
                            ..Default::default()
                        },
                    },
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn succeed_delivers_results() {
        let (completion, mut handle) = QueryHandle::pending();
        completion.succeed(results_named(&["res"]));
        let results = handle.ready().await.expect("results should be delivered");
        assert!(results.contains_key("res"));
        assert_eq!(handle.err(), None);
    }

    #[tokio::test]
    async fn fail_closes_ready_and_latches_error() {
        let (completion, mut handle) = QueryHandle::pending();
        completion.fail(QueryError::new("boom"));
        assert_eq!(handle.ready().await, None);
        assert_eq!(handle.err(), Some(QueryError::new("boom")));
    }

    #[tokio::test]
    async fn close_resolves_without_error() {
        let (completion, mut handle) = QueryHandle::pending();
        completion.close();
        assert_eq!(handle.ready().await, None);
        assert_eq!(handle.err(), None);
    }

    #[tokio::test]
    async fn cancel_reaches_the_service_side() {
        let (completion, handle) = QueryHandle::pending();
        let token = completion.cancel_token();
        assert!(!token.is_cancelled());
        handle.cancel();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn dropping_an_unresolved_handle_cancels() {
        let (completion, handle) = QueryHandle::pending();
        let token = completion.cancel_token();
        drop(handle);
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn dropping_a_resolved_handle_does_not_cancel() {
        let (completion, mut handle) = QueryHandle::pending();
        let token = completion.cancel_token();
        completion.succeed(results_named(&["res"]));
        handle.ready().await;
        drop(handle);
        assert!(!token.is_cancelled());
    }

    #[test]
    fn iterator_drain_merges_statistics() {
        let mut iter = ResultIterator::from_results(results_named(&["a", "b"]));
        let statistics = iter.drain();
        assert_eq!(statistics.total_duration, Duration::from_millis(10));
        assert_eq!(statistics.concurrency, 2);
        assert_eq!(iter.err(), None);
        iter.release();
    }

    #[test]
    fn iterator_from_error_reports_it() {
        let iter = ResultIterator::from_error(QueryError::new("forced"));
        assert_eq!(iter.err(), Some(QueryError::new("forced")));
    }
}
