//! The run state machine.
//!
//! ```text
//! Init → AnalysesRunning → AnalysesMerged → HeelIndependentRunning
//!      → HeelIndependentMerged → HeelDependentRunning → Cleanup → Done
//! ```
//!
//! No state is skipped; with the heel disabled the heel states are entered
//! and left without work. A phase that ends with failures moves the run to
//! `Failed` after cleanup. Cleanup always runs and never changes the status.

use std::fmt;
use std::sync::Arc;

use tracing::{info, info_span, warn, Instrument};

use super::error::{RunError, RunResult, StepId};
use super::options::{RunOptions, StorageMode};
use super::pool::{run_tasks, SqlTask, TaskOutcome, TaskStatus};
use super::report::{RunReport, RunStatus};
use super::{CancellationToken, RunContext};
use crate::analysis;
use crate::catalog::{Catalog, RuleKind};
use crate::heel;
use crate::merge::{self, DetailTableShape, MergeSettings, TargetMode};
use crate::session::SessionFactory;
use crate::sql::SqlDialect;

/// States of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Init,
    AnalysesRunning,
    AnalysesMerged,
    HeelIndependentRunning,
    HeelIndependentMerged,
    HeelDependentRunning,
    Cleanup,
    Done,
    Failed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Init => "init",
            RunState::AnalysesRunning => "analyses running",
            RunState::AnalysesMerged => "analyses merged",
            RunState::HeelIndependentRunning => "heel phase A running",
            RunState::HeelIndependentMerged => "heel phase A merged",
            RunState::HeelDependentRunning => "heel phase B running",
            RunState::Cleanup => "cleanup",
            RunState::Done => "done",
            RunState::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

/// Drives one run from `Init` to `Done` or `Failed`.
pub struct Orchestrator {
    ctx: RunContext,
    catalog: Arc<Catalog>,
}

impl Orchestrator {
    /// Validate `options` against the catalog and backend.
    ///
    /// Every configuration error surfaces here, before any database work.
    pub fn new(
        options: RunOptions,
        catalog: Arc<Catalog>,
        factory: Arc<dyn SessionFactory>,
    ) -> RunResult<Self> {
        let options = options.validated()?;

        if factory.dialect() != options.dialect {
            return Err(RunError::Configuration(format!(
                "run dialect {} does not match the backend dialect {}",
                options.dialect,
                factory.dialect()
            )));
        }
        if options.storage_mode() == StorageMode::SessionScoped
            && !factory.supports_session_scope()
        {
            return Err(RunError::Configuration(
                "this backend cannot keep temporary tables between statements; \
                 set a scratch schema and concurrency > 1"
                    .to_string(),
            ));
        }

        analysis::select_analyses(&catalog, &options)?;
        if options.run_heel {
            heel::dependent_order(&heel::rules_of(&catalog, &[RuleKind::Dependent]))?;
        }

        Ok(Self {
            ctx: RunContext::new(options, factory),
            catalog,
        })
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    /// Token that cancels the run at the next item boundary.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.ctx.cancellation().clone()
    }

    /// Execute the run. Failures are reported, never raised.
    pub async fn run(&self) -> RunReport {
        let mut run = Progress::new(RunReport::new(self.ctx.run_id()));
        run.enter(RunState::Init);
        info!(
            run_id = %self.ctx.run_id(),
            dialect = %self.ctx.dialect(),
            mode = ?self.ctx.mode(),
            concurrency = self.ctx.options().concurrency,
            "run started"
        );

        let ok = self.execute_phases(&mut run).await;

        run.enter(RunState::Cleanup);
        self.cleanup(&mut run)
            .instrument(info_span!("phase", name = "cleanup"))
            .await;

        let final_state = if ok { RunState::Done } else { RunState::Failed };
        run.enter(final_state);
        run.report.status = if ok { RunStatus::Done } else { RunStatus::Failed };
        info!(
            run_id = %self.ctx.run_id(),
            status = %run.report.status,
            failures = run.report.failures.len(),
            "run finished"
        );
        run.report
    }

    /// Run every phase until one fails. Returns whether all succeeded.
    async fn execute_phases(&self, run: &mut Progress) -> bool {
        if self.ctx.mode() == StorageMode::SessionScoped {
            if let Err(e) = self.ctx.open_persistent().await {
                run.fail(e);
                return false;
            }
        }

        let options = self.ctx.options();
        let selected = match analysis::select_analyses(&self.catalog, options) {
            Ok(selected) => selected,
            Err(e) => {
                run.fail(e);
                return false;
            }
        };

        // Analyses
        run.enter(RunState::AnalysesRunning);
        let tasks = analysis::build_tasks(&self.ctx, &self.catalog, &selected);
        let ok = self
            .run_phase(run, tasks, options.concurrency)
            .instrument(info_span!("phase", name = "analyses"))
            .await;
        if !ok {
            return false;
        }

        let settings = MergeSettings {
            results_schema: options.results_schema.clone(),
            target: if options.create_tables {
                TargetMode::Create
            } else if options.update_given_analyses_only {
                TargetMode::Replace(selected.iter().map(|a| a.id).collect())
            } else {
                TargetMode::Append
            },
            small_cell_count: options.small_cell_count,
            create_indices: options.create_indices,
        };
        let shapes = analysis::detail_shapes(&self.catalog, &selected, self.ctx.naming());
        let mut extra = Vec::new();
        if options.create_tables {
            match merge::analysis_catalog_statements(
                self.catalog.analyses().iter().collect::<Vec<_>>().as_slice(),
                &options.results_schema,
                self.ctx.dialect(),
            ) {
                Ok(sql) => extra = sql,
                Err(e) => {
                    run.fail(e);
                    return false;
                }
            }
        }
        let ok = self
            .merge_phase(run, &shapes, &settings, &extra)
            .instrument(info_span!("phase", name = "merge"))
            .await;
        if !ok {
            return false;
        }
        run.enter(RunState::AnalysesMerged);

        // Heel phase A
        run.enter(RunState::HeelIndependentRunning);
        if options.run_heel {
            let tasks = heel::phase_a_tasks(&self.ctx, &self.catalog);
            let ok = self
                .run_phase(run, tasks, options.concurrency)
                .instrument(info_span!("phase", name = "heel_independent"))
                .await;
            if !ok {
                return false;
            }

            let shapes = heel::phase_a_shapes(&self.catalog, self.ctx.naming());
            let settings = heel::phase_a_merge_settings(options);
            let ok = self
                .merge_phase(run, &shapes, &settings, &[])
                .instrument(info_span!("phase", name = "heel_merge"))
                .await;
            if !ok {
                return false;
            }
        }
        run.enter(RunState::HeelIndependentMerged);

        // Heel phase B
        run.enter(RunState::HeelDependentRunning);
        if options.run_heel {
            let tasks = match heel::phase_b_tasks(&self.ctx, &self.catalog) {
                Ok(tasks) => tasks,
                Err(e) => {
                    run.fail(e);
                    return false;
                }
            };
            let ok = self
                .run_phase(run, tasks, 1)
                .instrument(info_span!("phase", name = "heel_dependent"))
                .await;
            if !ok {
                return false;
            }
        }

        true
    }

    /// Run a batch of tasks through the pool and record the outcomes.
    async fn run_phase(&self, run: &mut Progress, tasks: Vec<SqlTask>, concurrency: usize) -> bool {
        if tasks.is_empty() {
            return true;
        }
        if self.ctx.cancellation().is_cancelled() {
            let step = tasks.first().map(|t| t.step().clone()).unwrap_or(StepId::Setup);
            run.report.skipped.extend(tasks.iter().map(|t| t.step().clone()));
            run.fail(RunError::Cancelled { step });
            return false;
        }
        let outcomes = run_tasks(&self.ctx, tasks, concurrency).await;
        run.record(outcomes, self.ctx.cancellation().is_cancelled())
    }

    /// Merge `shapes` (and run `extra` statements) on one session.
    async fn merge_phase(
        &self,
        run: &mut Progress,
        shapes: &[DetailTableShape],
        settings: &MergeSettings,
        extra: &[String],
    ) -> bool {
        let Some(first) = shapes.first() else {
            return true;
        };
        let step = StepId::Merge(first.table_name().to_string());
        if self.ctx.cancellation().is_cancelled() {
            run.report
                .skipped
                .extend(shapes.iter().map(|s| StepId::Merge(s.table_name().to_string())));
            run.fail(RunError::Cancelled { step });
            return false;
        }
        let mut lease = match self.ctx.lease(&step).await {
            Ok(lease) => lease,
            Err(e) => {
                run.fail(e);
                return false;
            }
        };

        let mut ok = true;
        let mut lost = false;
        if let Some(session) = lease.session() {
            for shape in shapes {
                match merge::merge_shape(session, shape, settings, self.ctx.dialect()).await {
                    Ok(summary) => run.report.merges.push(summary),
                    Err(e) => {
                        warn!(table = shape.table_name(), error = %e, "merge failed");
                        lost |= e.is_connection();
                        ok = false;
                        run.fail(e);
                        if lost {
                            break;
                        }
                    }
                }
            }
            if ok && !extra.is_empty() {
                let step = StepId::Merge(merge::ANALYSIS_CATALOG_TABLE.to_string());
                if let Err(e) = super::pool::execute_all(session, &step, extra).await {
                    lost |= e.is_connection();
                    ok = false;
                    run.fail(e);
                }
            }
        }

        self.ctx.give_back(lease, lost).await;
        ok
    }

    /// Best-effort removal of scratch tables; problems become warnings.
    async fn cleanup(&self, run: &mut Progress) {
        let options = self.ctx.options();
        match self.ctx.mode() {
            StorageMode::SessionScoped => {
                if let Err(e) = self.ctx.close_persistent().await {
                    run.warn(format!("closing the session: {}", e));
                }
            }
            StorageMode::SharedScratch if options.drop_scratch_tables => {
                let statements = self.scratch_drop_statements();
                let mut lease = match self.ctx.lease(&StepId::Cleanup).await {
                    Ok(lease) => lease,
                    Err(e) => {
                        run.warn(format!("acquiring a session for cleanup: {}", e));
                        return;
                    }
                };
                let mut lost = false;
                if let Some(session) = lease.session() {
                    for sql in &statements {
                        if let Err(e) = session.execute(sql).await {
                            lost = e.is_connection();
                            run.warn(format!("{}: {}", sql, e));
                            if lost {
                                break;
                            }
                        }
                    }
                }
                self.ctx.give_back(lease, lost).await;
            }
            StorageMode::SharedScratch => {
                info!("keeping scratch tables");
            }
        }
    }

    /// Drop statements for every scratch table the run may have created.
    fn scratch_drop_statements(&self) -> Vec<String> {
        let options = self.ctx.options();
        let dialect = self.ctx.dialect();
        let naming = self.ctx.naming();
        let mut sql = Vec::new();

        if let Ok(selected) = analysis::select_analyses(&self.catalog, options) {
            for a in selected {
                for kind in analysis::scratch_kinds(a) {
                    let handle = naming.handle(kind, a.id);
                    sql.push(dialect.emit_drop_table_if_exists(&handle.qualified()));
                }
            }
        }
        if options.run_heel {
            sql.extend(heel::scratch_drop_statements(&self.catalog, naming, dialect));
        }
        sql
    }
}

/// Accumulates the report while the run advances.
struct Progress {
    report: RunReport,
}

impl Progress {
    fn new(report: RunReport) -> Self {
        Self { report }
    }

    fn enter(&mut self, state: RunState) {
        info!(state = %state, "entering state");
        self.report.transitions.push(state);
    }

    fn fail(&mut self, error: RunError) {
        self.report.failures.push(error);
    }

    fn warn(&mut self, message: String) {
        warn!(message = %message, "cleanup problem");
        self.report.cleanup_warnings.push(message);
    }

    /// Record pool outcomes. Returns whether the phase succeeded.
    fn record(&mut self, outcomes: Vec<TaskOutcome>, cancelled: bool) -> bool {
        let mut ok = true;
        let mut first_skipped = None;
        let had_failures = outcomes.iter().any(|o| o.error().is_some());

        for outcome in outcomes {
            match outcome.status {
                TaskStatus::Completed => {}
                TaskStatus::Failed(e) => {
                    ok = false;
                    self.fail(e);
                }
                TaskStatus::Skipped => {
                    ok = false;
                    first_skipped.get_or_insert_with(|| outcome.step.clone());
                    self.report.skipped.push(outcome.step);
                }
            }
        }

        if let Some(step) = first_skipped {
            if cancelled && !had_failures {
                self.fail(RunError::Cancelled { step });
            }
        }
        ok
    }
}
