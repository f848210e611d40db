//! Run-wide state: options, naming, sessions and cancellation.
//!
//! A [`RunContext`] is created once per run and shared read-only by every
//! phase. In session-scoped mode it owns the persistent session that all
//! steps execute on; in shared-scratch mode it only hands out fresh sessions.

pub mod cancel;
pub mod error;
pub mod naming;
pub mod options;
pub mod orchestrator;
pub mod pool;
pub mod report;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::session::{Session, SessionFactory};
use crate::sql::{Dialect, Params};

pub use cancel::CancellationToken;
pub use error::{RunError, RunResult, StepId};
pub use naming::{scratch_name, ScratchKind, ScratchNaming, ScratchTableHandle, SessionOwner};
pub use options::{FailurePolicy, HeelThresholds, RunOptions, StorageMode, SESSION_SCOPED_SENTINEL};
pub use orchestrator::{Orchestrator, RunState};
pub use report::{MergeSummary, RunReport, RunStatus};

/// Base delay between session acquisition attempts; grows linearly.
const ACQUIRE_BACKOFF: Duration = Duration::from_millis(200);

/// Shared state of one run.
pub struct RunContext {
    run_id: Uuid,
    options: RunOptions,
    naming: ScratchNaming,
    factory: Arc<dyn SessionFactory>,
    cancel: CancellationToken,
    persistent: Mutex<Option<Box<dyn Session>>>,
    params: Params,
}

impl RunContext {
    /// Build the context for validated `options`.
    pub fn new(options: RunOptions, factory: Arc<dyn SessionFactory>) -> Self {
        let naming = ScratchNaming::new(
            options.storage_mode(),
            options.scratch_schema.clone(),
            options.analysis_prefix.clone(),
            options.heel_prefix.clone(),
        );
        let params = base_params(&options, &naming);
        Self {
            run_id: Uuid::new_v4(),
            options,
            naming,
            factory,
            cancel: CancellationToken::new(),
            persistent: Mutex::new(None),
            params,
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    pub fn naming(&self) -> &ScratchNaming {
        &self.naming
    }

    pub fn dialect(&self) -> Dialect {
        self.options.dialect
    }

    pub fn mode(&self) -> StorageMode {
        self.naming.mode()
    }

    pub fn factory(&self) -> &Arc<dyn SessionFactory> {
        &self.factory
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Parameters bound into every template of the run.
    pub fn base_params(&self) -> &Params {
        &self.params
    }

    /// Open the persistent session (session-scoped mode only).
    pub async fn open_persistent(&self) -> RunResult<()> {
        let session = acquire_with_retries(
            self.factory.as_ref(),
            self.options.acquire_retries,
            &StepId::Setup,
        )
        .await?;
        *self.persistent.lock().await = Some(session);
        debug!(run_id = %self.run_id, "persistent session opened");
        Ok(())
    }

    /// Close the persistent session if one is open. Its temp tables go with it.
    pub async fn close_persistent(&self) -> RunResult<()> {
        let session = self.persistent.lock().await.take();
        match session {
            Some(session) => self
                .factory
                .release(session)
                .await
                .map_err(|e| RunError::from_session(&StepId::Cleanup, e)),
            None => Ok(()),
        }
    }

    /// Whether the persistent session is still usable.
    pub async fn has_persistent(&self) -> bool {
        self.persistent.lock().await.is_some()
    }

    /// A session for `step`: the persistent one in session-scoped mode,
    /// otherwise a freshly acquired one.
    pub async fn lease(&self, step: &StepId) -> RunResult<SessionLease<'_>> {
        match self.mode() {
            StorageMode::SessionScoped => {
                let guard = self.persistent.lock().await;
                if guard.is_none() {
                    return Err(RunError::Connection {
                        step: step.clone(),
                        message: "the persistent session is not open".to_string(),
                    });
                }
                Ok(SessionLease::Persistent(guard))
            }
            StorageMode::SharedScratch => {
                let session = acquire_with_retries(
                    self.factory.as_ref(),
                    self.options.acquire_retries,
                    step,
                )
                .await?;
                Ok(SessionLease::Owned(Some(session)))
            }
        }
    }

    /// Return a lease. Owned sessions are released to the factory; a lease
    /// whose connection was lost drops the persistent session.
    pub async fn give_back(&self, lease: SessionLease<'_>, lost: bool) {
        match lease {
            SessionLease::Persistent(mut guard) => {
                if lost {
                    warn!(run_id = %self.run_id, "persistent session lost");
                    guard.take();
                }
            }
            SessionLease::Owned(Some(session)) => {
                if lost {
                    return;
                }
                if let Err(e) = self.factory.release(session).await {
                    warn!(error = %e, "failed to release session");
                }
            }
            SessionLease::Owned(None) => {}
        }
    }
}

/// A session borrowed for the duration of one or more steps.
pub enum SessionLease<'a> {
    Persistent(MutexGuard<'a, Option<Box<dyn Session>>>),
    Owned(Option<Box<dyn Session>>),
}

impl SessionLease<'_> {
    /// The leased session, if it is still present.
    pub fn session(&mut self) -> Option<&mut (dyn Session + 'static)> {
        match self {
            SessionLease::Persistent(guard) => guard.as_deref_mut(),
            SessionLease::Owned(session) => session.as_deref_mut(),
        }
    }
}

/// Acquire a session, retrying with linear backoff.
pub async fn acquire_with_retries(
    factory: &dyn SessionFactory,
    retries: u32,
    step: &StepId,
) -> RunResult<Box<dyn Session>> {
    let attempts = retries.max(1);
    let mut attempt = 1;
    loop {
        match factory.acquire().await {
            Ok(session) => return Ok(session),
            Err(e) if attempt < attempts => {
                warn!(attempt, error = %e, "session acquisition failed; retrying");
                tokio::time::sleep(ACQUIRE_BACKOFF * attempt).await;
                attempt += 1;
            }
            Err(e) => {
                return Err(RunError::Connection {
                    step: step.clone(),
                    message: e.to_string(),
                })
            }
        }
    }
}

fn base_params(options: &RunOptions, naming: &ScratchNaming) -> Params {
    let mut params = Params::new();
    params
        .set("cdmDatabaseSchema", &options.cdm_schema)
        .set("resultsDatabaseSchema", &options.results_schema)
        .set("vocabDatabaseSchema", &options.vocab_schema)
        .set("scratchDatabaseSchema", naming.schema_param())
        .set("schemaDelim", naming.schema_delim())
        .set("tempAchillesPrefix", &options.analysis_prefix)
        .set("tempHeelPrefix", &options.heel_prefix)
        .set("source_name", options.source_name.replace('\'', "''"))
        .set("achilles_version", env!("CARGO_PKG_VERSION"))
        .set("cdmVersion", &options.cdm_version)
        .set("ThresholdAgeWarning", options.thresholds.age_warning)
        .set(
            "ThresholdOutpatientVisitPerc",
            options.thresholds.outpatient_visit_perc,
        )
        .set(
            "ThresholdMinimalPtMeasDrugRatio",
            options.thresholds.minimal_pt_meas_drug_ratio,
        )
        .set("smallCellCount", options.small_cell_count.unwrap_or(0));
    params
}
