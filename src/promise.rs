//! Run promises: caller-facing handles for queued runs.

use std::fmt;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::error::ExecutorError;
use crate::id::Id;
use crate::query::Statistics;

/// One scheduled attempt to evaluate a task's script at a logical "now".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedRun {
    pub task_id: Id,
    pub run_id: Id,
    /// Logical wall-clock for the run, in seconds.
    pub now: i64,
}

/// Terminal observation of a run that executed.
///
/// A query that ran and failed yields a `RunResult` describing the failure;
/// a canceled or refused run yields no result (`wait` returns the error
/// directly instead).
#[derive(Debug, Clone, PartialEq)]
pub struct RunResult {
    err: Option<ExecutorError>,
    statistics: Statistics,
}

impl RunResult {
    pub(crate) fn success(statistics: Statistics) -> Self {
        Self {
            err: None,
            statistics,
        }
    }

    pub(crate) fn failed(err: ExecutorError) -> Self {
        Self {
            err: Some(err),
            statistics: Statistics::default(),
        }
    }

    /// The error the run reported, if it ran and failed.
    pub fn error(&self) -> Option<&ExecutorError> {
        self.err.as_ref()
    }

    /// Summary statistics reported by the query engine.
    pub fn statistics(&self) -> &Statistics {
        &self.statistics
    }
}

type Outcome = Result<RunResult, ExecutorError>;

struct PromiseState {
    outcome: Mutex<Option<Outcome>>,
    done_tx: watch::Sender<bool>,
    cancel: CancellationToken,
}

/// The live handle for one queued run.
///
/// Cloning is cheap; all clones share one outcome. Any number of waiters
/// may call [`RunPromise::wait`], concurrently or repeatedly, and all
/// observe the same terminal value.
#[derive(Clone)]
pub struct RunPromise {
    run: QueuedRun,
    state: Arc<PromiseState>,
}

impl fmt::Debug for RunPromise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunPromise")
            .field("run", &self.run)
            .finish_non_exhaustive()
    }
}

impl RunPromise {
    pub(crate) fn new(run: QueuedRun) -> Self {
        let (done_tx, _) = watch::channel(false);
        Self {
            run,
            state: Arc::new(PromiseState {
                outcome: Mutex::new(None),
                done_tx,
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// The queued run this promise tracks, verbatim.
    pub fn run(&self) -> QueuedRun {
        self.run
    }

    /// Block until the run reaches a terminal state, then return it.
    ///
    /// Idempotent: every call, including calls begun before the transition,
    /// returns the same outcome.
    pub async fn wait(&self) -> Result<RunResult, ExecutorError> {
        let mut done = self.state.done_tx.subscribe();
        // wait_for checks the current value first, so a promise resolved
        // before this call returns immediately.
        let _ = done.wait_for(|done| *done).await;
        self.state
            .outcome
            .lock()
            .expect("promise lock poisoned")
            .clone()
            .expect("done signal fired without an outcome")
    }

    /// Cancel the run.
    ///
    /// Idempotent, and a no-op on a terminal promise. A still-pending
    /// promise resolves to the canonical canceled error immediately; a
    /// worker holding an upstream handle observes the signal and propagates
    /// the cancellation.
    pub fn cancel(&self) {
        self.state.cancel.cancel();
        self.resolve(Err(ExecutorError::RunCanceled));
    }

    /// Token fired by [`RunPromise::cancel`], observed by the run worker.
    pub(crate) fn cancel_token(&self) -> CancellationToken {
        self.state.cancel.clone()
    }

    /// Record the outcome. The first resolution wins; later calls are
    /// no-ops.
    pub(crate) fn resolve(&self, outcome: Outcome) -> bool {
        {
            let mut slot = self.state.outcome.lock().expect("promise lock poisoned");
            if slot.is_some() {
                return false;
            }
            *slot = Some(outcome);
        }
        self.state.done_tx.send_replace(true);
        true
    }
}
