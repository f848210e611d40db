//! Heel rules on SQLite: phase A rules and measures, then dependent rules.

#[path = "../support/mod.rs"]
mod support;

use std::path::PathBuf;
use std::sync::Arc;

use achilles::catalog::Catalog;
use achilles::run::{HeelThresholds, Orchestrator, RunOptions};
use achilles::session::{Session, SessionFactory, SqliteSessionFactory};

use support::*;

async fn run_heel(options: RunOptions) -> Arc<SqliteSessionFactory> {
    let factory = Arc::new(SqliteSessionFactory::memory().unwrap());
    seed_cdm(factory.as_ref()).await;
    let report = Orchestrator::new(options, Arc::new(catalog()), factory.clone())
        .unwrap()
        .run()
        .await;
    assert!(report.is_success(), "{}", report);
    factory
}

async fn heel_rows(factory: &SqliteSessionFactory) -> Vec<Vec<String>> {
    query_strings(
        factory,
        "SELECT rule_id, analysis_id, achilles_heel_warning, record_count \
         FROM main.achilles_heel_results ORDER BY rule_id",
    )
    .await
}

#[tokio::test]
async fn test_every_rule_kind_contributes() {
    let factory = run_heel(RunOptions {
        small_cell_count: None,
        ..sqlite_options()
    })
    .await;

    assert_eq!(
        heel_rows(&factory).await,
        vec![
            vec!["10", "2", "WARNING: low count", "3"],
            vec!["30", "NULL", "NOTIFICATION: small population", "13"],
            vec!["31", "NULL", "NOTIFICATION: warnings present", "1"],
        ]
    );

    let derived = query_strings(
        factory.as_ref(),
        "SELECT analysis_id, measure_id, statistic_value FROM main.achilles_results_derived",
    )
    .await;
    assert_eq!(derived, vec![vec!["NULL", "Person:Count", "13"]]);
}

#[tokio::test]
async fn test_rules_see_redacted_results() {
    // The gender cell of 3 is redacted before rule 10 reads the results.
    let factory = run_heel(sqlite_options()).await;
    assert_eq!(
        heel_rows(&factory).await,
        vec![vec!["30", "NULL", "NOTIFICATION: small population", "13"]]
    );
}

#[tokio::test]
async fn test_thresholds_are_bound_into_rules() {
    let factory = run_heel(RunOptions {
        thresholds: HeelThresholds {
            minimal_pt_meas_drug_ratio: 10,
            ..HeelThresholds::default()
        },
        ..sqlite_options()
    })
    .await;
    assert!(heel_rows(&factory).await.is_empty());
}

#[tokio::test]
async fn test_heel_tables_are_rebuilt_on_every_run() {
    let factory = Arc::new(SqliteSessionFactory::memory().unwrap());
    seed_cdm(factory.as_ref()).await;
    let options = RunOptions {
        small_cell_count: None,
        ..sqlite_options()
    };
    for _ in 0..2 {
        let report = Orchestrator::new(options.clone(), Arc::new(catalog()), factory.clone())
            .unwrap()
            .run()
            .await;
        assert!(report.is_success(), "{}", report);
    }
    assert_eq!(heel_rows(&factory).await.len(), 3);

    // An append run of the analyses still rebuilds the heel.
    let append = RunOptions {
        create_tables: false,
        analysis_ids: Some(vec![1]),
        ..options
    };
    let report = Orchestrator::new(append, Arc::new(catalog()), factory.clone())
        .unwrap()
        .run()
        .await;
    assert!(report.is_success(), "{}", report);
    let derived = query_strings(
        factory.as_ref(),
        "SELECT COUNT(*) FROM main.achilles_results_derived",
    )
    .await;
    assert_eq!(derived, vec![vec!["1"]]);
}

fn demo_catalog() -> Catalog {
    let dir = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("catalog");
    Catalog::load(dir).unwrap()
}

async fn seed_observation_periods(factory: &dyn SessionFactory) {
    let mut session: Box<dyn Session> = factory.acquire().await.unwrap();
    session
        .execute("CREATE TABLE observation_period (observation_period_id INTEGER PRIMARY KEY, person_id INTEGER)")
        .await
        .unwrap();
    session
        .execute("INSERT INTO observation_period (person_id) SELECT person_id FROM person")
        .await
        .unwrap();
    factory.release(session).await.unwrap();
}

#[tokio::test]
async fn test_bundled_catalog_end_to_end() {
    let factory = Arc::new(SqliteSessionFactory::memory().unwrap());
    seed_cdm(factory.as_ref()).await;
    seed_observation_periods(factory.as_ref()).await;

    let report = Orchestrator::new(sqlite_options(), Arc::new(demo_catalog()), factory.clone())
        .unwrap()
        .run()
        .await;
    assert!(report.is_success(), "{}", report);

    let metadata = query_strings(
        factory.as_ref(),
        "SELECT stratum_1, stratum_3, count_value FROM main.achilles_results WHERE analysis_id = 0",
    )
    .await;
    assert_eq!(metadata, vec![vec!["source", "5.4", "13"]]);

    let periods = query_strings(
        factory.as_ref(),
        "SELECT stratum_1, count_value FROM main.achilles_results WHERE analysis_id = 113",
    )
    .await;
    assert_eq!(periods, vec![vec!["1", "13"]]);

    let dist = query_strings(
        factory.as_ref(),
        "SELECT analysis_id, count_value FROM main.achilles_results_dist ORDER BY analysis_id",
    )
    .await;
    assert_eq!(dist, vec![vec!["103", "13"], vec!["113", "13"]]);

    // Cost analyses are opt-in.
    let cost = query_strings(
        factory.as_ref(),
        "SELECT COUNT(*) FROM main.achilles_results WHERE analysis_id = 1501",
    )
    .await;
    assert_eq!(cost, vec![vec!["0"]]);

    let heel = heel_rows(&factory).await;
    assert_eq!(heel.len(), 1);
    assert_eq!(heel[0][0], "30");
    assert!(heel[0][2].starts_with("NOTIFICATION: Small population; 13"));
}
