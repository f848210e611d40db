//! Small-cell redaction applied while merging.

#[path = "../support/mod.rs"]
mod support;

use std::collections::HashMap;
use std::sync::Arc;

use achilles::catalog::{Catalog, Distribution, RuleKind, Severity};
use achilles::run::{Orchestrator, RunOptions, RunReport};
use achilles::session::SqliteSessionFactory;

use support::*;

async fn run_with(catalog: Catalog, options: RunOptions) -> (Arc<SqliteSessionFactory>, RunReport) {
    let factory = Arc::new(SqliteSessionFactory::memory().unwrap());
    seed_cdm(factory.as_ref()).await;
    let report = Orchestrator::new(options, Arc::new(catalog), factory.clone())
        .unwrap()
        .run()
        .await;
    assert!(report.is_success(), "{}", report);
    (factory, report)
}

async fn plain_rows(factory: &SqliteSessionFactory, analysis_id: i64) -> Vec<Vec<String>> {
    query_strings(
        factory,
        &format!(
            "SELECT stratum_1, count_value FROM main.achilles_results WHERE analysis_id = {} ORDER BY stratum_1",
            analysis_id
        ),
    )
    .await
}

#[tokio::test]
async fn test_default_threshold_drops_small_cells() {
    let options = RunOptions {
        run_heel: false,
        ..sqlite_options()
    };
    let (factory, report) = run_with(catalog(), options).await;

    assert_eq!(plain_rows(&factory, 1).await, vec![vec!["NULL", "13"]]);
    assert_eq!(plain_rows(&factory, 2).await, vec![vec!["8507", "10"]]);
    assert_eq!(plain_rows(&factory, 3).await, vec![vec!["1950", "6"]]);
    assert_eq!(report.merge("achilles_results").unwrap().rows, Some(3));
}

#[tokio::test]
async fn test_count_equal_to_threshold_is_dropped() {
    let options = RunOptions {
        small_cell_count: Some(4),
        run_heel: false,
        ..sqlite_options()
    };
    let (factory, _) = run_with(catalog(), options).await;
    assert_eq!(plain_rows(&factory, 3).await, vec![vec!["1950", "6"]]);

    let options = RunOptions {
        small_cell_count: Some(3),
        run_heel: false,
        ..sqlite_options()
    };
    let (factory, _) = run_with(catalog(), options).await;
    assert_eq!(
        plain_rows(&factory, 3).await,
        vec![vec!["1950", "6"], vec!["1980", "4"]]
    );
}

#[tokio::test]
async fn test_disabled_redaction_keeps_every_row() {
    let options = RunOptions {
        small_cell_count: None,
        run_heel: false,
        ..sqlite_options()
    };
    let (factory, _) = run_with(catalog(), options).await;
    assert_eq!(
        plain_rows(&factory, 2).await,
        vec![vec!["8507", "10"], vec!["8532", "3"]]
    );
    assert_eq!(plain_rows(&factory, 3).await.len(), 3);
}

#[tokio::test]
async fn test_distribution_rows_are_redacted_on_count() {
    let options = RunOptions {
        small_cell_count: Some(13),
        run_heel: false,
        ..sqlite_options()
    };
    let (factory, report) = run_with(catalog(), options).await;

    let dist = query_strings(factory.as_ref(), "SELECT COUNT(*) FROM main.achilles_results_dist").await;
    assert_eq!(dist, vec![vec!["0"]]);
    assert_eq!(report.merge("achilles_results_dist").unwrap().rows, Some(0));
    // The total of 13 is at the threshold too.
    assert!(plain_rows(&factory, 1).await.is_empty());
}

#[tokio::test]
async fn test_null_counts_survive_redaction() {
    let null_count = "SELECT @analysisId AS analysis_id, CAST('unknown' AS VARCHAR(255)) AS stratum_1, \
         CAST(NULL AS VARCHAR(255)) AS stratum_2, CAST(NULL AS VARCHAR(255)) AS stratum_3, \
         CAST(NULL AS VARCHAR(255)) AS stratum_4, CAST(NULL AS VARCHAR(255)) AS stratum_5, \
         CAST(NULL AS BIGINT) AS count_value INTO @scratchTable;";
    let catalog = analyses_only(vec![
        (analysis(1, Distribution::None, "count"), count_template()),
        (analysis(5, Distribution::None, "null_count"), null_count.to_string()),
    ]);
    let (factory, _) = run_with(catalog, sqlite_options()).await;

    assert_eq!(plain_rows(&factory, 5).await, vec![vec!["unknown", "NULL"]]);
}

#[tokio::test]
async fn test_heel_rows_are_never_redacted() {
    let tiny = "SELECT 1 AS analysis_id, CAST('@rule_severity: tiny' AS VARCHAR(255)) AS achilles_heel_warning, \
         @rule_id AS rule_id, 1 AS record_count INTO @scratchTable;";
    let catalog = Catalog::from_parts(
        vec![analysis(1, Distribution::None, "count")],
        vec![rule(7, RuleKind::Independent, Severity::Warning, "tiny")],
        HashMap::from([
            ("analyses/count".to_string(), count_template()),
            ("heels/tiny".to_string(), tiny.to_string()),
        ]),
    )
    .unwrap();
    let options = RunOptions {
        small_cell_count: Some(100),
        ..sqlite_options()
    };
    let (factory, _) = run_with(catalog, options).await;

    let heel = query_strings(
        factory.as_ref(),
        "SELECT rule_id, achilles_heel_warning, record_count FROM main.achilles_heel_results",
    )
    .await;
    assert_eq!(heel, vec![vec!["7", "WARNING: tiny", "1"]]);
    assert!(plain_rows(&factory, 1).await.is_empty());
}
