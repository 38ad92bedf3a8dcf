//! Worker pool executor.
//!
//! `workers` loops pull tasks from a shared submission channel, drive each
//! through [`retry_until`] against the dispatcher and push exactly one
//! [`WorkerResult`] per task onto the result channel. A supervisor bounds the
//! whole batch: when `batch_timeout` elapses every worker is aborted and the
//! batch is reported as `TIMEOUT`, whatever had already finished.
//!
//! Workers share nothing but the two channels and whatever the dispatcher
//! carries (the named locks).

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;

use mirror_core::defaults::{DEFAULT_BACKOFF, DEFAULT_BATCH_TIMEOUT, DEFAULT_WORKERS};
use mirror_core::{BatchOutcome, BatchStatus, Task, TaskState, TaskStatus, WorkerResult};

use crate::dispatch::{Dispatch, Progress};
use crate::error::SyncError;
use crate::worker_log::WorkerLog;

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PoolOptions {
    pub workers: usize,
    /// Budget for one task's poll loop, checked between attempts.
    pub task_timeout: Duration,
    /// Budget for the whole batch.
    pub batch_timeout: Duration,
    /// Delay between attempts that report `Pending`.
    pub backoff: Duration,
    /// Cap on attempts per task; `None` polls until `task_timeout`.
    pub max_attempts: Option<u32>,
    pub log_dir: PathBuf,
}

impl PoolOptions {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            task_timeout: DEFAULT_BATCH_TIMEOUT,
            batch_timeout: DEFAULT_BATCH_TIMEOUT,
            backoff: DEFAULT_BACKOFF,
            max_attempts: None,
            log_dir: log_dir.into(),
        }
    }

    fn limits(&self) -> Limits {
        Limits {
            task_timeout: self.task_timeout,
            backoff: self.backoff,
            max_attempts: self.max_attempts,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Limits {
    task_timeout: Duration,
    backoff: Duration,
    max_attempts: Option<u32>,
}

// ---------------------------------------------------------------------------
// Retry combinator
// ---------------------------------------------------------------------------

/// How a poll loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempted {
    Done(String),
    Failed(String),
    TimedOut,
    Exhausted(u32),
}

/// Call `attempt` until it reports [`Progress::Done`], returns an error,
/// `timeout` has elapsed or `max_attempts` are used up.
///
/// The deadline is checked before each attempt; a running attempt is never
/// interrupted. Attempts reporting `Pending` are followed by `backoff`.
pub async fn retry_until<F, Fut>(
    timeout: Duration,
    backoff: Duration,
    max_attempts: Option<u32>,
    mut attempt: F,
) -> Attempted
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Progress, SyncError>>,
{
    let started = Instant::now();
    let mut attempts = 0u32;
    loop {
        if started.elapsed() >= timeout {
            return Attempted::TimedOut;
        }
        if max_attempts.is_some_and(|max| attempts >= max) {
            return Attempted::Exhausted(attempts);
        }
        attempts += 1;
        match attempt().await {
            Ok(Progress::Done(output)) => return Attempted::Done(output),
            Ok(Progress::Pending) => {}
            Err(e) => return Attempted::Failed(e.to_string()),
        }
        tokio::time::sleep(backoff).await;
    }
}

// ---------------------------------------------------------------------------
// run
// ---------------------------------------------------------------------------

/// Run `tasks` on a pool of `opts.workers` workers.
///
/// Only setup failures (log directory) are errors; everything a task does
/// ends up in its result.
pub async fn run<D: Dispatch>(
    tasks: Vec<Task>,
    dispatch: Arc<D>,
    opts: &PoolOptions,
) -> Result<BatchOutcome, SyncError> {
    if tasks.is_empty() {
        tracing::info!("no tasks submitted; nothing to do");
        return Ok(BatchOutcome::empty());
    }
    let started = Instant::now();
    let submitted = tasks.len();
    let workers = opts.workers.max(1);
    tracing::info!(
        "running {submitted} tasks on {workers} workers (task timeout {:?}, batch timeout {:?})",
        opts.task_timeout,
        opts.batch_timeout
    );

    let (task_tx, task_rx) = mpsc::unbounded_channel::<Task>();
    for task in tasks {
        if task_tx.send(task).is_err() {
            break;
        }
    }
    drop(task_tx);
    let queue = Arc::new(Mutex::new(task_rx));
    let (result_tx, mut result_rx) = mpsc::unbounded_channel::<WorkerResult>();

    let mut pool = JoinSet::new();
    for worker in 0..workers {
        let log = WorkerLog::open(&opts.log_dir, worker)?;
        pool.spawn(worker_loop(
            worker,
            Arc::clone(&queue),
            Arc::clone(&dispatch),
            result_tx.clone(),
            log,
            opts.limits(),
        ));
    }
    drop(result_tx);

    let supervised = tokio::time::timeout(opts.batch_timeout, async {
        while let Some(joined) = pool.join_next().await {
            if let Err(e) = joined {
                tracing::error!("worker exited abnormally: {e}");
            }
        }
    })
    .await;

    let timed_out = supervised.is_err();
    if timed_out {
        tracing::warn!(
            "batch timeout of {:?} reached; terminating all workers",
            opts.batch_timeout
        );
        pool.shutdown().await;
    }

    let mut results = Vec::with_capacity(submitted);
    while let Ok(result) = result_rx.try_recv() {
        results.push(result);
    }
    let overall_status = BatchStatus::aggregate(&results, timed_out);
    tracing::info!(
        "batch finished: {overall_status} ({}/{submitted} results)",
        results.len()
    );

    Ok(BatchOutcome {
        overall_status,
        results,
        elapsed: started.elapsed(),
    })
}

async fn worker_loop<D: Dispatch>(
    worker: usize,
    queue: Arc<Mutex<mpsc::UnboundedReceiver<Task>>>,
    dispatch: Arc<D>,
    results: mpsc::UnboundedSender<WorkerResult>,
    log: WorkerLog,
    limits: Limits,
) {
    loop {
        let next = queue.lock().await.recv().await;
        let Some(task) = next else {
            break;
        };
        log.info(&format!("worker {worker} picked up {}", task.id));

        let job = AbortOnDrop(tokio::spawn(execute_task(
            Arc::clone(&dispatch),
            task.clone(),
            log.clone(),
            limits,
        )));
        let result = match job.join().await {
            Ok(result) => result,
            Err(e) => {
                log.error(&format!("{} handler crashed: {e}", task.id));
                WorkerResult {
                    reference: task.id.clone(),
                    status: TaskStatus::Failed,
                    output: None,
                    error: Some(format!("handler crashed: {e}")),
                    log_ref: log.path().to_path_buf(),
                    elapsed: Duration::ZERO,
                    task,
                }
            }
        };
        if results.send(result).is_err() {
            break;
        }
    }
}

async fn execute_task<D: Dispatch>(
    dispatch: Arc<D>,
    task: Task,
    log: WorkerLog,
    limits: Limits,
) -> WorkerResult {
    let started = Instant::now();
    let mut state = advance(&log, &task, TaskState::Pending, TaskState::Running);

    let attempted = {
        let (dispatch, task, log) = (dispatch.as_ref(), &task, &log);
        retry_until(limits.task_timeout, limits.backoff, limits.max_attempts, move || {
            dispatch.attempt(task, log)
        })
        .await
    };

    let (status, output, error) = match attempted {
        Attempted::Done(output) => (TaskStatus::Success, Some(output), None),
        Attempted::Failed(error) => (TaskStatus::Failed, None, Some(error)),
        Attempted::TimedOut => (
            TaskStatus::Timeout,
            None,
            Some(format!("timed out after {:?}", limits.task_timeout)),
        ),
        Attempted::Exhausted(n) => (
            TaskStatus::Failed,
            None,
            Some(format!("gave up after {n} attempts")),
        ),
    };
    state = advance(&log, &task, state, TaskState::Finished(status));
    match (&state, &error) {
        (TaskState::Finished(TaskStatus::Success), _) => {
            log.info(&format!("{} finished: SUCCESS", task.id))
        }
        (_, Some(e)) => log.error(&format!("{} finished: {status}: {e}", task.id)),
        _ => log.error(&format!("{} finished: {status}", task.id)),
    }

    WorkerResult {
        reference: task.id.clone(),
        status,
        output,
        error,
        log_ref: log.path().to_path_buf(),
        elapsed: started.elapsed(),
        task,
    }
}

fn advance(log: &WorkerLog, task: &Task, from: TaskState, to: TaskState) -> TaskState {
    match from.advance(to) {
        Some(next) => next,
        None => {
            log.error(&format!("{}: invalid transition {from:?} -> {to:?}", task.id));
            from
        }
    }
}

/// Aborts the spawned task if the owner is dropped, e.g. when the batch
/// supervisor aborts the worker awaiting it.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> AbortOnDrop<T> {
    async fn join(mut self) -> Result<T, tokio::task::JoinError> {
        (&mut self.0).await
    }
}

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}
