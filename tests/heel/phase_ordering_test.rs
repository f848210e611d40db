//! Ordering between analyses, merges and the two heel phases.

#[path = "../support/mod.rs"]
mod support;

use std::collections::HashMap;
use std::sync::Arc;

use achilles::catalog::{Catalog, Distribution, RuleKind, Severity};
use achilles::run::{Orchestrator, RunError, RunOptions, RunState, StepId};
use achilles::sql::Dialect;

use support::*;

fn recording() -> RecordingFactory {
    RecordingFactory::new(Dialect::Sqlite)
}

async fn run(
    factory: &Arc<RecordingFactory>,
    options: RunOptions,
    catalog: Catalog,
) -> achilles::run::RunReport {
    Orchestrator::new(options, Arc::new(catalog), factory.clone())
        .unwrap()
        .run()
        .await
}

#[tokio::test]
async fn test_phases_run_in_order() {
    let factory = Arc::new(recording());
    let report = run(&factory, sqlite_options(), catalog()).await;
    assert!(report.is_success(), "{}", report);

    let at = |needle: &str| {
        factory
            .position(needle)
            .unwrap_or_else(|| panic!("no statement contains {:?}", needle))
    };
    let analyses = at("s_tmpach_dist_4");
    let plain_merge = at("INSERT INTO main.achilles_results (");
    let dist_merge = at("INSERT INTO main.achilles_results_dist (");
    let phase_a = at("s_tmpheel_hr_10");
    let derived_merge = at("INSERT INTO main.achilles_results_derived (");
    let heel_merge = at("INSERT INTO main.achilles_heel_results (");
    let phase_b = at("s_tmpheel_serial_30");

    assert!(analyses < plain_merge);
    assert!(plain_merge < dist_merge);
    assert!(dist_merge < phase_a);
    assert!(phase_a < derived_merge);
    assert!(derived_merge < heel_merge);
    assert!(heel_merge < phase_b);
}

#[tokio::test]
async fn test_dependent_rules_follow_their_dependencies() {
    let factory = Arc::new(recording());
    let report = run(&factory, sqlite_options(), catalog()).await;
    assert!(report.is_success(), "{}", report);
    assert!(factory.position("s_tmpheel_serial_30") < factory.position("s_tmpheel_serial_31"));

    // Reverse the dependency: 30 now waits for 31.
    let mut first = rule(30, RuleKind::Dependent, Severity::Notification, "dep");
    first.depends_on = vec![31];
    let second = rule(31, RuleKind::Dependent, Severity::Notification, "dep");
    let template = "SELECT analysis_id, achilles_heel_warning, @rule_id AS rule_id, record_count \
                    INTO @scratchTable FROM @heelTable;";
    let catalog = Catalog::from_parts(
        Vec::new(),
        vec![first, second],
        HashMap::from([("heels/dep".to_string(), template.to_string())]),
    )
    .unwrap();

    let factory = Arc::new(recording());
    let report = run(&factory, sqlite_options(), catalog).await;
    assert!(report.is_success(), "{}", report);
    assert!(factory.position("s_tmpheel_serial_31") < factory.position("s_tmpheel_serial_30"));
}

#[tokio::test]
async fn test_dependency_cycle_is_rejected() {
    let mut a = rule(40, RuleKind::Dependent, Severity::Warning, "dep");
    a.depends_on = vec![41];
    let mut b = rule(41, RuleKind::Dependent, Severity::Warning, "dep");
    b.depends_on = vec![40];
    let catalog = Catalog::from_parts(
        Vec::new(),
        vec![a, b],
        HashMap::from([("heels/dep".to_string(), String::new())]),
    )
    .unwrap();

    let factory = Arc::new(recording());
    let err = Orchestrator::new(sqlite_options(), Arc::new(catalog), factory.clone())
        .err()
        .unwrap();
    assert_eq!(
        err,
        RunError::Configuration("dependent rules form a cycle: 40, 41".into())
    );

    // Without the heel the cycle is irrelevant.
    let catalog = Catalog::from_parts(
        vec![analysis(1, Distribution::None, "count")],
        Vec::new(),
        HashMap::from([("analyses/count".to_string(), count_template())]),
    )
    .unwrap();
    let options = RunOptions {
        run_heel: false,
        ..sqlite_options()
    };
    assert!(Orchestrator::new(options, Arc::new(catalog), factory).is_ok());
}

#[tokio::test]
async fn test_dependent_rules_read_merged_tables_only() {
    let factory = Arc::new(recording());
    let report = run(&factory, sqlite_options(), catalog()).await;
    assert!(report.is_success(), "{}", report);

    let dependent: Vec<String> = factory
        .statements()
        .into_iter()
        .filter(|s| s.contains("tmpheel_serial_"))
        .collect();
    assert!(!dependent.is_empty());
    for stmt in &dependent {
        assert!(!stmt.contains("tmpheel_hr_"), "{}", stmt);
        assert!(!stmt.contains("tmpheel_rd_"), "{}", stmt);
    }
    assert!(dependent
        .iter()
        .any(|s| s.contains("FROM main.achilles_results_derived")));
    assert!(dependent
        .iter()
        .any(|s| s.starts_with("INSERT INTO main.achilles_heel_results (")));
}

#[tokio::test]
async fn test_heel_disabled_runs_no_rules() {
    let factory = Arc::new(recording());
    let options = RunOptions {
        run_heel: false,
        ..sqlite_options()
    };
    let report = run(&factory, options, catalog()).await;
    assert!(report.is_success(), "{}", report);

    assert!(!factory.contains("tmpheel"));
    assert!(!factory.contains("achilles_heel_results"));
    assert!(report.merge("achilles_heel_results").is_none());
    assert_eq!(report.transitions.len(), 8);
}

#[tokio::test]
async fn test_phase_a_failure_stops_before_phase_b() {
    let factory = Arc::new(recording().fail_on("s_tmpheel_hr_10"));
    let report = run(&factory, sqlite_options(), catalog()).await;

    assert!(!report.is_success());
    assert_eq!(report.failed_steps(), vec![&StepId::Rule(10)]);
    // The derived measure still ran alongside.
    assert!(factory.contains("CREATE TEMP TABLE s_tmpheel_rd_20 AS"));
    assert!(!factory.contains("INSERT INTO main.achilles_heel_results ("));
    assert!(!factory.contains("s_tmpheel_serial_"));
    assert_eq!(
        report.transitions,
        vec![
            RunState::Init,
            RunState::AnalysesRunning,
            RunState::AnalysesMerged,
            RunState::HeelIndependentRunning,
            RunState::Cleanup,
            RunState::Failed,
        ]
    );
}

#[tokio::test]
async fn test_dependent_rules_run_one_at_a_time() {
    let factory = Arc::new(recording());
    let options = RunOptions {
        scratch_schema: "main".into(),
        concurrency: 4,
        ..sqlite_options()
    };
    let report = run(&factory, options, catalog()).await;
    assert!(report.is_success(), "{}", report);

    // Each dependent rule's four statements form one contiguous block.
    let statements = factory.statements();
    let block = |id: i64| -> Vec<usize> {
        let marker = format!("main.tmpheel_serial_{}", id);
        statements
            .iter()
            .enumerate()
            .filter(|(_, s)| s.contains(&marker))
            .map(|(i, _)| i)
            .take(4)
            .collect()
    };
    let first = block(30);
    let second = block(31);
    assert_eq!(first, (first[0]..first[0] + 4).collect::<Vec<_>>());
    assert_eq!(second, (second[0]..second[0] + 4).collect::<Vec<_>>());
    assert!(first[3] < second[0]);
}
