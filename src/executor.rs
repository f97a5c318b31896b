//! The run executor: accepts queued runs, drives them through the query
//! service, and tracks in-flight workers for orderly shutdown.
//!
//! Each `execute` call resolves the task, registers a live worker, and
//! spawns a task that carries the run to completion. The executor-level
//! `wait` blocks until every worker has finished; it is the shutdown
//! barrier for the surrounding scheduling system.

use std::sync::{Arc, Mutex};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::ExecutorError;
use crate::lang;
use crate::promise::{QueuedRun, RunPromise, RunResult};
use crate::query::{
    AsyncQueryService, Authorization, QueryService, Request, ResultSets, Statistics,
};
use crate::task::{Task, TaskStore};

/// The upstream the workers drive. Both shapes surface submission errors
/// through the promise, never from `execute`.
#[derive(Clone)]
enum Service {
    Async(Arc<dyn AsyncQueryService>),
    Blocking(Arc<dyn QueryService>),
}

pub struct Executor {
    service: Service,
    store: Arc<dyn TaskStore>,
    live: LiveWorkers,
}

impl Executor {
    /// Executor over the asynchronous query service shape.
    pub fn new(service: Arc<dyn AsyncQueryService>, store: Arc<dyn TaskStore>) -> Self {
        Self {
            service: Service::Async(service),
            store,
            live: LiveWorkers::new(),
        }
    }

    /// Executor over the synchronous query service shape. The worker task
    /// performs the blocking call, so `execute` still returns promptly.
    pub fn with_query_service(service: Arc<dyn QueryService>, store: Arc<dyn TaskStore>) -> Self {
        Self {
            service: Service::Blocking(service),
            store,
            live: LiveWorkers::new(),
        }
    }

    /// Start executing a queued run and return its promise.
    ///
    /// Task store errors surface here; everything downstream (compilation,
    /// submission, evaluation, cancellation) is delivered through the
    /// promise's `wait`. The returned promise does not imply the query has
    /// been submitted yet.
    pub async fn execute(
        &self,
        ctx: CancellationToken,
        run: QueuedRun,
    ) -> Result<RunPromise, ExecutorError> {
        let task = self.store.find_task(run.task_id).await?;
        let promise = RunPromise::new(run);

        // Register before spawning so a `wait` issued immediately after
        // `execute` returns cannot miss this worker.
        let guard = self.live.register();
        let worker = RunWorker {
            service: self.service.clone(),
            task,
            promise: promise.clone(),
            ctx,
        };
        tokio::spawn(async move {
            let _guard = guard;
            worker.drive().await;
        });

        Ok(promise)
    }

    /// Block until every worker launched by prior `execute` calls has
    /// finished. Returns immediately when nothing is running.
    ///
    /// Callers must not issue further `execute` calls once `wait` has been
    /// invoked; the executor does not refuse new runs during shutdown.
    pub async fn wait(&self) {
        self.live.quiesce().await;
    }
}

struct RunWorker {
    service: Service,
    task: Task,
    promise: RunPromise,
    ctx: CancellationToken,
}

enum HandleEvent {
    Canceled(ExecutorError),
    Ready(Option<ResultSets>),
}

impl RunWorker {
    async fn drive(self) {
        let RunWorker {
            service,
            task,
            promise,
            ctx,
        } = self;
        let run = promise.run();

        let spec = match lang::compile(&task.script, run.now) {
            Ok(spec) => spec,
            Err(err) => {
                warn!(
                    task_id = %run.task_id,
                    run_id = %run.run_id,
                    error = %err,
                    "script compilation failed",
                );
                promise.resolve(Ok(RunResult::failed(err.into())));
                return;
            }
        };

        let request = Request {
            org: task.org,
            spec,
            authorization: Authorization::for_user(task.user),
        };

        match service {
            Service::Async(svc) => follow_query(svc, request, &promise, &ctx).await,
            Service::Blocking(svc) => run_blocking_query(svc, request, &promise, &ctx).await,
        }
    }
}

/// Async-shape worker body: submit, then follow the returned handle until
/// it resolves or a cancellation source fires.
async fn follow_query(
    service: Arc<dyn AsyncQueryService>,
    request: Request,
    promise: &RunPromise,
    ctx: &CancellationToken,
) {
    let run = promise.run();

    let mut handle = match service.submit(request).await {
        Ok(handle) => handle,
        Err(err) => {
            warn!(
                task_id = %run.task_id,
                run_id = %run.run_id,
                error = %err,
                "query submission refused",
            );
            promise.resolve(Err(err.into()));
            return;
        }
    };

    let cancel = promise.cancel_token();
    let event = tokio::select! {
        _ = cancel.cancelled() => HandleEvent::Canceled(ExecutorError::RunCanceled),
        _ = ctx.cancelled() => HandleEvent::Canceled(ExecutorError::ContextCanceled),
        results = handle.ready() => HandleEvent::Ready(results),
    };

    match event {
        HandleEvent::Canceled(err) => {
            handle.cancel();
            // The service closes the ready channel promptly after a
            // cancellation request; drain it so the handle is fully settled
            // before release.
            let _ = handle.ready().await;
            promise.resolve(Err(err));
        }
        HandleEvent::Ready(results) => match handle.err() {
            Some(err) => {
                debug!(
                    task_id = %run.task_id,
                    run_id = %run.run_id,
                    error = %err,
                    "query finished with error",
                );
                promise.resolve(Ok(RunResult::failed(err.into())));
            }
            None => {
                let mut statistics = Statistics::default();
                for result in results.unwrap_or_default().values() {
                    statistics.add(&result.statistics);
                }
                promise.resolve(Ok(RunResult::success(statistics)));
            }
        },
    }

    handle.done();
}

/// Blocking-shape worker body: this task is the background activity the
/// blocking call runs on. Cancellation abandons the call, which releases
/// the underlying query.
async fn run_blocking_query(
    service: Arc<dyn QueryService>,
    request: Request,
    promise: &RunPromise,
    ctx: &CancellationToken,
) {
    let run = promise.run();
    let cancel = promise.cancel_token();

    let outcome = tokio::select! {
        _ = cancel.cancelled() => Err(ExecutorError::RunCanceled),
        _ = ctx.cancelled() => Err(ExecutorError::ContextCanceled),
        res = service.query(request) => match res {
            Err(err) => {
                warn!(
                    task_id = %run.task_id,
                    run_id = %run.run_id,
                    error = %err,
                    "query submission refused",
                );
                Err(ExecutorError::Query(err))
            }
            Ok(mut results) => {
                let statistics = results.drain();
                let outcome = match results.err() {
                    Some(err) => Ok(RunResult::failed(err.into())),
                    None => Ok(RunResult::success(statistics)),
                };
                results.release();
                outcome
            }
        },
    };

    promise.resolve(outcome);
}

/// Counting barrier over in-flight run workers.
///
/// Registration happens inside `execute`, so the count is visible by the
/// time `execute` returns; the guard drops only after the worker has fully
/// cleaned up, so `quiesce` cannot wake early.
struct LiveWorkers {
    inner: Arc<LiveWorkersInner>,
}

struct LiveWorkersInner {
    count: Mutex<usize>,
    idle_tx: watch::Sender<bool>,
}

impl LiveWorkers {
    fn new() -> Self {
        let (idle_tx, _) = watch::channel(true);
        Self {
            inner: Arc::new(LiveWorkersInner {
                count: Mutex::new(0),
                idle_tx,
            }),
        }
    }

    fn register(&self) -> WorkerGuard {
        let mut count = self.inner.count.lock().expect("worker count lock poisoned");
        *count += 1;
        self.inner.idle_tx.send_replace(false);
        drop(count);
        WorkerGuard {
            inner: Arc::clone(&self.inner),
        }
    }

    async fn quiesce(&self) {
        let mut idle = self.inner.idle_tx.subscribe();
        let _ = idle.wait_for(|idle| *idle).await;
    }
}

struct WorkerGuard {
    inner: Arc<LiveWorkersInner>,
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        let mut count = self.inner.count.lock().expect("worker count lock poisoned");
        *count -= 1;
        if *count == 0 {
            self.inner.idle_tx.send_replace(true);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::LiveWorkers;

    #[tokio::test]
    async fn quiesce_with_no_workers_returns_immediately() {
        let live = LiveWorkers::new();
        timeout(Duration::from_millis(100), live.quiesce())
            .await
            .expect("quiesce should not block with no workers");
    }

    #[tokio::test]
    async fn quiesce_waits_for_every_guard() {
        let live = LiveWorkers::new();
        let first = live.register();
        let second = live.register();

        assert!(
            timeout(Duration::from_millis(20), live.quiesce())
                .await
                .is_err()
        );
        drop(first);
        assert!(
            timeout(Duration::from_millis(20), live.quiesce())
                .await
                .is_err()
        );
        drop(second);
        timeout(Duration::from_millis(100), live.quiesce())
            .await
            .expect("quiesce should return once all guards dropped");
    }

    #[tokio::test]
    async fn registration_after_idle_blocks_again() {
        let live = LiveWorkers::new();
        let guard = live.register();
        drop(guard);
        timeout(Duration::from_millis(100), live.quiesce())
            .await
            .expect("quiesce should return after the worker finished");

        let guard = live.register();
        assert!(
            timeout(Duration::from_millis(20), live.quiesce())
                .await
                .is_err()
        );
        drop(guard);
    }
}
