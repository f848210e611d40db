//! End-to-end runs with session-scoped scratch storage on SQLite.
//!
//! Scratch tables are TEMP tables on one connection; the whole run, merges
//! included, happens on that connection.

#[path = "../support/mod.rs"]
mod support;

use std::sync::Arc;

use achilles::run::{Orchestrator, RunOptions, RunState, RunStatus, StorageMode};
use achilles::session::{SessionFactory, SqliteSessionFactory};

use support::*;

async fn memory_cdm() -> Arc<SqliteSessionFactory> {
    let factory = Arc::new(SqliteSessionFactory::memory().unwrap());
    seed_cdm(factory.as_ref()).await;
    factory
}

#[tokio::test]
async fn test_single_session_run_fills_result_tables() {
    let factory = memory_cdm().await;
    let options = RunOptions {
        run_heel: false,
        small_cell_count: None,
        ..sqlite_options()
    };
    let orchestrator = Orchestrator::new(options, Arc::new(catalog()), factory.clone()).unwrap();
    assert_eq!(orchestrator.context().mode(), StorageMode::SessionScoped);

    let report = orchestrator.run().await;
    assert!(report.is_success(), "{}", report);
    assert_eq!(report.status, RunStatus::Done);

    let rows = query_strings(
        factory.as_ref(),
        "SELECT analysis_id, stratum_1, count_value FROM main.achilles_results ORDER BY analysis_id, stratum_1",
    )
    .await;
    assert_eq!(
        rows,
        vec![
            vec!["1", "NULL", "13"],
            vec!["2", "8507", "10"],
            vec!["2", "8532", "3"],
            vec!["3", "1950", "6"],
            vec!["3", "1980", "4"],
            vec!["3", "2000", "3"],
        ]
    );

    let dist = query_strings(
        factory.as_ref(),
        "SELECT analysis_id, count_value, min_value, max_value FROM main.achilles_results_dist",
    )
    .await;
    assert_eq!(dist, vec![vec!["4", "13", "1950", "2000"]]);

    assert_eq!(report.merge("achilles_results").unwrap().members, 3);
    assert_eq!(report.merge("achilles_results").unwrap().rows, Some(6));
    assert_eq!(report.merge("achilles_results_dist").unwrap().rows, Some(1));
}

#[tokio::test]
async fn test_state_transitions_and_heel_pass_through() {
    let factory = memory_cdm().await;
    let options = RunOptions {
        run_heel: false,
        ..sqlite_options()
    };
    let report = Orchestrator::new(options, Arc::new(catalog()), factory)
        .unwrap()
        .run()
        .await;

    assert_eq!(
        report.transitions,
        vec![
            RunState::Init,
            RunState::AnalysesRunning,
            RunState::AnalysesMerged,
            RunState::HeelIndependentRunning,
            RunState::HeelIndependentMerged,
            RunState::HeelDependentRunning,
            RunState::Cleanup,
            RunState::Done,
        ]
    );
}

#[tokio::test]
async fn test_scratch_tables_do_not_outlive_the_session() {
    let factory = memory_cdm().await;
    let report = Orchestrator::new(sqlite_options(), Arc::new(catalog()), factory.clone())
        .unwrap()
        .run()
        .await;
    assert!(report.is_success(), "{}", report);

    // Scratch tables were TEMP tables on the run's own connection.
    let mut session = factory.acquire().await.unwrap();
    assert!(!session.table_exists("s_tmpach_1").await.unwrap());
    assert!(!session.table_exists("s_tmpach_dist_4").await.unwrap());
    assert!(!session.table_exists("s_tmpheel_hr_10").await.unwrap());
    assert!(!session.table_exists("main.tmpach_1").await.unwrap());
    assert!(session.table_exists("main.achilles_results").await.unwrap());
    assert!(session.table_exists("main.achilles_heel_results").await.unwrap());
}

#[tokio::test]
async fn test_analysis_catalog_export() {
    let factory = memory_cdm().await;
    let options = RunOptions {
        run_heel: false,
        ..sqlite_options()
    };
    let report = Orchestrator::new(options, Arc::new(catalog()), factory.clone())
        .unwrap()
        .run()
        .await;
    assert!(report.is_success(), "{}", report);

    let rows = query_strings(
        factory.as_ref(),
        "SELECT analysis_id, analysis_name FROM main.achilles_analysis ORDER BY analysis_id",
    )
    .await;
    assert_eq!(rows.len(), 4);
    assert_eq!(rows[0], vec!["1", "analysis 1"]);
}

#[tokio::test]
async fn test_explicit_subset_and_append() {
    let factory = memory_cdm().await;
    let first = RunOptions {
        analysis_ids: Some(vec![1]),
        run_heel: false,
        ..sqlite_options()
    };
    let report = Orchestrator::new(first, Arc::new(catalog()), factory.clone())
        .unwrap()
        .run()
        .await;
    assert!(report.is_success(), "{}", report);

    // Append analysis 3 without recreating the table.
    let second = RunOptions {
        analysis_ids: Some(vec![3]),
        create_tables: false,
        run_heel: false,
        ..sqlite_options()
    };
    let report = Orchestrator::new(second, Arc::new(catalog()), factory.clone())
        .unwrap()
        .run()
        .await;
    assert!(report.is_success(), "{}", report);

    let ids = query_strings(
        factory.as_ref(),
        "SELECT DISTINCT analysis_id FROM main.achilles_results ORDER BY analysis_id",
    )
    .await;
    assert_eq!(ids, vec![vec!["1"], vec!["3"]]);

    // Rerunning analysis 3 with update_given_analyses_only replaces its rows.
    let third = RunOptions {
        analysis_ids: Some(vec![3]),
        create_tables: false,
        update_given_analyses_only: true,
        run_heel: false,
        ..sqlite_options()
    };
    let report = Orchestrator::new(third, Arc::new(catalog()), factory.clone())
        .unwrap()
        .run()
        .await;
    assert!(report.is_success(), "{}", report);
    let count = query_strings(
        factory.as_ref(),
        "SELECT COUNT(*) FROM main.achilles_results WHERE analysis_id = 3",
    )
    .await;
    assert_eq!(count, vec![vec!["1"]]);
}

#[tokio::test]
async fn test_unknown_analysis_is_rejected_before_any_work() {
    let factory = Arc::new(RecordingFactory::new(achilles::sql::Dialect::Sqlite));
    let options = RunOptions {
        analysis_ids: Some(vec![1, 404]),
        ..sqlite_options()
    };
    let err = Orchestrator::new(options, Arc::new(catalog()), factory.clone())
        .err()
        .unwrap();
    assert!(err.to_string().contains("404"));
    assert!(err.step().is_none());
    assert!(factory.statements().is_empty());
    assert_eq!(
        factory.acquired.load(std::sync::atomic::Ordering::SeqCst),
        0
    );
}
