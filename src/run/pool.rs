//! Task pool for independent SQL steps.
//!
//! Analyses and phase A heel rules are independent: each writes its own
//! scratch table and reads only CDM data. The pool runs a batch of such
//! tasks either sequentially on the persistent session or fanned out over
//! `concurrency` workers, each holding its own session. Outcomes come back in
//! submission order regardless of which worker ran them.

use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, info_span, warn, Instrument};

use super::cancel::CancellationToken;
use super::error::{RunError, RunResult, StepId};
use super::options::{FailurePolicy, StorageMode};
use super::{acquire_with_retries, RunContext};
use crate::session::{Session, SessionFactory};

/// One unit of work: the translated statements of a single step.
#[derive(Debug, Clone)]
pub struct SqlTask {
    step: StepId,
    body: Result<Vec<String>, RunError>,
}

impl SqlTask {
    pub fn ready(step: StepId, statements: Vec<String>) -> Self {
        Self {
            step,
            body: Ok(statements),
        }
    }

    /// A task that could not be prepared; it fails without touching the database.
    pub fn invalid(step: StepId, error: RunError) -> Self {
        Self {
            step,
            body: Err(error),
        }
    }

    pub fn step(&self) -> &StepId {
        &self.step
    }

    pub fn statements(&self) -> Option<&[String]> {
        self.body.as_deref().ok()
    }
}

/// How a task ended.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskStatus {
    Completed,
    Failed(RunError),
    /// Not started because the run or phase was cancelled.
    Skipped,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutcome {
    pub step: StepId,
    pub status: TaskStatus,
}

impl TaskOutcome {
    fn new(step: StepId, status: TaskStatus) -> Self {
        Self { step, status }
    }

    pub fn is_completed(&self) -> bool {
        self.status == TaskStatus::Completed
    }

    pub fn error(&self) -> Option<&RunError> {
        match &self.status {
            TaskStatus::Failed(e) => Some(e),
            _ => None,
        }
    }
}

/// Run `tasks` and return one outcome per task, in submission order.
///
/// `concurrency` caps the worker count in shared-scratch mode; session-scoped
/// runs are always sequential. A lost persistent session skips the
/// remaining tasks.
pub async fn run_tasks(ctx: &RunContext, tasks: Vec<SqlTask>, concurrency: usize) -> Vec<TaskOutcome> {
    if tasks.is_empty() {
        return Vec::new();
    }
    let phase = CancellationToken::new();
    match ctx.mode() {
        StorageMode::SessionScoped => run_on_persistent(ctx, tasks, &phase).await,
        StorageMode::SharedScratch => run_fan_out(ctx, tasks, concurrency, phase).await,
    }
}

async fn run_on_persistent(
    ctx: &RunContext,
    tasks: Vec<SqlTask>,
    phase: &CancellationToken,
) -> Vec<TaskOutcome> {
    let policy = ctx.options().failure_policy;
    let mut outcomes = Vec::with_capacity(tasks.len());
    let mut tasks = tasks.into_iter();

    let first_step = tasks
        .as_slice()
        .first()
        .map(|t| t.step.clone())
        .unwrap_or(StepId::Setup);
    let mut lease = match ctx.lease(&first_step).await {
        Ok(lease) => lease,
        Err(e) => {
            return tasks
                .map(|t| {
                    let error = with_step(&e, &t.step);
                    TaskOutcome::new(t.step, TaskStatus::Failed(error))
                })
                .collect();
        }
    };

    let mut lost = false;
    for task in tasks.by_ref() {
        if ctx.cancellation().is_cancelled() || phase.is_cancelled() {
            outcomes.push(TaskOutcome::new(task.step, TaskStatus::Skipped));
            continue;
        }
        let Some(session) = lease.session() else {
            outcomes.push(TaskOutcome::new(task.step, TaskStatus::Skipped));
            continue;
        };
        let outcome = run_task(session, task).await;
        if let Some(e) = outcome.error() {
            if e.is_connection() {
                lost = true;
            }
            if lost || policy == FailurePolicy::FailFast {
                phase.cancel();
            }
        }
        outcomes.push(outcome);
    }

    ctx.give_back(lease, lost).await;
    outcomes
}

async fn run_fan_out(
    ctx: &RunContext,
    tasks: Vec<SqlTask>,
    concurrency: usize,
    phase: CancellationToken,
) -> Vec<TaskOutcome> {
    let total = tasks.len();
    let workers = concurrency.clamp(1, total);
    let steps: Vec<StepId> = tasks.iter().map(|t| t.step.clone()).collect();
    let queues = partition(tasks.into_iter().enumerate().collect(), workers);

    let mut set = JoinSet::new();
    for (worker, queue) in queues.into_iter().enumerate() {
        let job = WorkerJob {
            worker,
            queue,
            factory: Arc::clone(ctx.factory()),
            retries: ctx.options().acquire_retries,
            policy: ctx.options().failure_policy,
            run: ctx.cancellation().clone(),
            phase: phase.clone(),
        };
        set.spawn(job.run().instrument(info_span!("worker", worker)));
    }

    let mut indexed = Vec::with_capacity(total);
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(results) => indexed.extend(results),
            Err(e) => warn!(error = %e, "pool worker panicked"),
        }
    }

    // A panicked worker leaves holes; its items fail under their own step.
    let mut outcomes: Vec<Option<TaskOutcome>> = vec![None; total];
    for (index, outcome) in indexed {
        outcomes[index] = Some(outcome);
    }
    outcomes
        .into_iter()
        .zip(steps)
        .map(|(outcome, step)| {
            outcome.unwrap_or_else(|| {
                let error = RunError::Execution {
                    step: step.clone(),
                    message: "worker terminated abnormally".to_string(),
                };
                TaskOutcome::new(step, TaskStatus::Failed(error))
            })
        })
        .collect()
}

struct WorkerJob {
    worker: usize,
    queue: Vec<(usize, SqlTask)>,
    factory: Arc<dyn SessionFactory>,
    retries: u32,
    policy: FailurePolicy,
    run: CancellationToken,
    phase: CancellationToken,
}

impl WorkerJob {
    async fn run(self) -> Vec<(usize, TaskOutcome)> {
        let mut results = Vec::with_capacity(self.queue.len());
        let mut session: Option<Box<dyn Session>> = None;
        // Set once acquisition exhausted its retries; the rest of the queue fails.
        let mut gave_up: Option<RunError> = None;

        for (index, task) in self.queue {
            if self.run.is_cancelled() || self.phase.is_cancelled() {
                results.push((index, TaskOutcome::new(task.step, TaskStatus::Skipped)));
                continue;
            }

            if let Some(e) = &gave_up {
                let error = with_step(e, &task.step);
                results.push((index, TaskOutcome::new(task.step, TaskStatus::Failed(error))));
                continue;
            }

            if task.body.is_ok() && session.is_none() {
                match acquire_with_retries(self.factory.as_ref(), self.retries, &task.step).await {
                    Ok(s) => session = Some(s),
                    Err(e) => {
                        debug!(worker = self.worker, error = %e, "worker could not acquire a session");
                        gave_up = Some(e.clone());
                        results.push((index, TaskOutcome::new(task.step, TaskStatus::Failed(e))));
                        if self.policy == FailurePolicy::FailFast {
                            self.phase.cancel();
                        }
                        continue;
                    }
                }
            }

            let outcome = match session.as_deref_mut() {
                Some(s) => run_task(s, task).await,
                None => run_invalid(task),
            };
            if let Some(e) = outcome.error() {
                if e.is_connection() {
                    // Broken; the next item gets a fresh session.
                    session = None;
                }
                if self.policy == FailurePolicy::FailFast {
                    self.phase.cancel();
                }
            }
            results.push((index, outcome));
        }

        if let Some(s) = session {
            if let Err(e) = self.factory.release(s).await {
                warn!(worker = self.worker, error = %e, "failed to release session");
            }
        }
        results
    }
}

/// Execute one task's statements in order, stopping at the first failure.
async fn run_task(session: &mut dyn Session, task: SqlTask) -> TaskOutcome {
    let statements = match task.body {
        Ok(statements) => statements,
        Err(e) => return TaskOutcome::new(task.step, TaskStatus::Failed(e)),
    };
    match execute_all(session, &task.step, &statements).await {
        Ok(()) => TaskOutcome::new(task.step, TaskStatus::Completed),
        Err(e) => {
            warn!(step = %task.step, error = %e, "step failed");
            TaskOutcome::new(task.step, TaskStatus::Failed(e))
        }
    }
}

fn run_invalid(task: SqlTask) -> TaskOutcome {
    let error = match task.body {
        Err(e) => e,
        Ok(_) => RunError::Connection {
            step: task.step.clone(),
            message: "no session".to_string(),
        },
    };
    TaskOutcome::new(task.step, TaskStatus::Failed(error))
}

/// Execute `statements` in order on `session`.
pub async fn execute_all(
    session: &mut dyn Session,
    step: &StepId,
    statements: &[String],
) -> RunResult<()> {
    for sql in statements {
        session
            .execute(sql)
            .await
            .map_err(|e| RunError::from_session(step, e))?;
    }
    Ok(())
}

/// Deal `items` round-robin into `n` non-empty queues.
pub fn partition<T>(items: Vec<T>, n: usize) -> Vec<Vec<T>> {
    let n = n.clamp(1, items.len().max(1));
    let mut queues: Vec<Vec<T>> = (0..n).map(|_| Vec::new()).collect();
    for (i, item) in items.into_iter().enumerate() {
        queues[i % n].push(item);
    }
    queues.retain(|q| !q.is_empty());
    queues
}

fn with_step(error: &RunError, step: &StepId) -> RunError {
    match error {
        RunError::Connection { message, .. } => RunError::Connection {
            step: step.clone(),
            message: message.clone(),
        },
        other => other.clone(),
    }
}
