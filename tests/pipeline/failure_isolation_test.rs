//! One failing step must not take down its siblings, and every failure is
//! attributed to the step that caused it.

#[path = "../support/mod.rs"]
mod support;

use std::sync::Arc;

use achilles::catalog::Distribution;
use achilles::run::{
    FailurePolicy, Orchestrator, RunError, RunOptions, RunState, RunStatus, StepId,
};
use achilles::sql::{Dialect, TemplateError};

use support::*;

fn recording() -> RecordingFactory {
    RecordingFactory::new(Dialect::Sqlite)
}

#[tokio::test]
async fn test_collect_keeps_running_siblings() {
    let factory = Arc::new(recording().fail_on("s_tmpach_2"));
    let report = Orchestrator::new(sqlite_options(), Arc::new(catalog()), factory.clone())
        .unwrap()
        .run()
        .await;

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.failed_steps(), vec![&StepId::Analysis(2)]);
    assert!(matches!(report.failures[0], RunError::Execution { .. }));
    assert!(factory.contains("CREATE TEMP TABLE s_tmpach_3 AS"));
    assert!(factory.contains("CREATE TEMP TABLE s_tmpach_dist_4 AS"));

    // Nothing is merged after a failed phase.
    assert!(!factory.contains("INSERT INTO main.achilles_results"));
    assert_eq!(
        report.transitions,
        vec![
            RunState::Init,
            RunState::AnalysesRunning,
            RunState::Cleanup,
            RunState::Failed,
        ]
    );
}

#[tokio::test]
async fn test_fail_fast_skips_queued_steps() {
    let factory = Arc::new(recording().fail_on("s_tmpach_1"));
    let options = RunOptions {
        failure_policy: FailurePolicy::FailFast,
        ..sqlite_options()
    };
    let report = Orchestrator::new(options, Arc::new(catalog()), factory.clone())
        .unwrap()
        .run()
        .await;

    assert!(!report.is_success());
    assert_eq!(report.failed_steps(), vec![&StepId::Analysis(1)]);
    assert_eq!(
        report.skipped,
        vec![StepId::Analysis(2), StepId::Analysis(3), StepId::Analysis(4)]
    );
    assert!(!factory.contains("s_tmpach_2"));
}

#[tokio::test]
async fn test_lost_persistent_session_skips_the_rest() {
    let factory = Arc::new(recording().lose_connection_on("s_tmpach_2"));
    let report = Orchestrator::new(sqlite_options(), Arc::new(catalog()), factory.clone())
        .unwrap()
        .run()
        .await;

    assert!(!report.is_success());
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].is_connection());
    assert_eq!(report.failures[0].step(), Some(&StepId::Analysis(2)));
    assert_eq!(report.skipped, vec![StepId::Analysis(3), StepId::Analysis(4)]);
    assert!(!factory.contains("s_tmpach_3"));
}

#[tokio::test]
async fn test_template_error_fails_only_its_step() {
    let broken = "SELECT @analysisId AS analysis_id INTO @scratchTable FROM @nowhere.person;";
    let catalog = analyses_only(vec![
        (analysis(1, Distribution::None, "count"), count_template()),
        (analysis(2, Distribution::None, "broken"), broken.to_string()),
        (analysis(3, Distribution::None, "by_year"), count_by_template("year_of_birth")),
    ]);
    let factory = Arc::new(recording());
    let report = Orchestrator::new(sqlite_options(), Arc::new(catalog), factory.clone())
        .unwrap()
        .run()
        .await;

    assert_eq!(
        report.failures,
        vec![RunError::Template {
            step: StepId::Analysis(2),
            source: TemplateError::UnboundParameter {
                name: "nowhere".into()
            },
        }]
    );
    // The broken step never reached the database.
    assert!(!factory.contains("s_tmpach_2"));
    assert!(factory.contains("s_tmpach_1"));
    assert!(factory.contains("s_tmpach_3"));
}

#[tokio::test]
async fn test_missing_scratch_table_fails_the_merge() {
    let factory = Arc::new(recording().missing_table("s_tmpach_3"));
    let report = Orchestrator::new(sqlite_options(), Arc::new(catalog()), factory.clone())
        .unwrap()
        .run()
        .await;

    assert!(!report.is_success());
    assert_eq!(
        report.failures,
        vec![RunError::MergeIntegrity {
            table: "achilles_results".into(),
            member: StepId::Analysis(3),
            scratch: "#s_tmpach_3".into(),
        }]
    );
    assert!(report.merge("achilles_results").is_none());
    assert!(!factory.contains("INSERT INTO main.achilles_results ("));
    assert!(!report.transitions.contains(&RunState::AnalysesMerged));
}

#[tokio::test]
async fn test_unreachable_database_in_session_scoped_mode() {
    let factory = Arc::new(recording().failing_acquisitions(100));
    let options = RunOptions {
        acquire_retries: 1,
        ..sqlite_options()
    };
    let report = Orchestrator::new(options, Arc::new(catalog()), factory.clone())
        .unwrap()
        .run()
        .await;

    assert_eq!(report.failed_steps(), vec![&StepId::Setup]);
    assert!(report.failures[0].is_connection());
    assert_eq!(
        report.transitions,
        vec![RunState::Init, RunState::Cleanup, RunState::Failed]
    );
    assert!(factory.statements().is_empty());
}

#[tokio::test]
async fn test_unreachable_database_with_workers() {
    let factory = Arc::new(recording().failing_acquisitions(100));
    let options = RunOptions {
        scratch_schema: "main".into(),
        concurrency: 2,
        acquire_retries: 1,
        ..sqlite_options()
    };
    let report = Orchestrator::new(options, Arc::new(catalog()), factory.clone())
        .unwrap()
        .run()
        .await;

    assert!(!report.is_success());
    assert_eq!(report.failures.len(), 4);
    assert!(report.failures.iter().all(RunError::is_connection));
    assert_eq!(
        report.failed_steps(),
        vec![
            &StepId::Analysis(1),
            &StepId::Analysis(2),
            &StepId::Analysis(3),
            &StepId::Analysis(4),
        ]
    );
    // Cleanup could not get a session either; that is only a warning.
    assert_eq!(report.cleanup_warnings.len(), 1);
}

#[tokio::test]
async fn test_cleanup_problems_are_warnings() {
    let factory = Arc::new(recording().fail_on("main.tmpach_2"));
    let options = RunOptions {
        scratch_schema: "main".into(),
        concurrency: 2,
        run_heel: false,
        ..sqlite_options()
    };
    let report = Orchestrator::new(options, Arc::new(catalog()), factory.clone())
        .unwrap()
        .run()
        .await;

    assert_eq!(report.failed_steps(), vec![&StepId::Analysis(2)]);
    assert_eq!(report.cleanup_warnings.len(), 1);
    assert!(report.cleanup_warnings[0].contains("main.tmpach_2"));

    // Cleanup went on past the failing drop.
    let statements = factory.statements();
    let cleanup_drop = statements
        .iter()
        .rposition(|s| s == "DROP TABLE IF EXISTS main.tmpach_3")
        .unwrap();
    let failed_drop = statements
        .iter()
        .rposition(|s| s == "DROP TABLE IF EXISTS main.tmpach_2")
        .unwrap();
    assert!(cleanup_drop > failed_drop);
}
