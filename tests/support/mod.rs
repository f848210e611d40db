//! Shared fixtures for the integration tests.
//!
//! - [`catalog`] builds a small catalog with inline templates
//! - [`seed_cdm`] fills a SQLite database with a tiny CDM
//! - [`RecordingFactory`] records statements and injects failures

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use achilles::catalog::{
    AnalysisDefinition, Catalog, Distribution, HeelRuleDefinition, RuleCategory, RuleKind,
    Severity,
};
use achilles::run::RunOptions;
use achilles::session::{Row, Session, SessionError, SessionFactory, SessionResult};
use achilles::sql::Dialect;
use async_trait::async_trait;

// ============================================================================
// Catalog
// ============================================================================

const STRATA_NULL: &str = "CAST(NULL AS VARCHAR(255)) AS stratum_2, \
     CAST(NULL AS VARCHAR(255)) AS stratum_3, CAST(NULL AS VARCHAR(255)) AS stratum_4, \
     CAST(NULL AS VARCHAR(255)) AS stratum_5";

pub fn analysis(id: i64, distribution: Distribution, template: &str) -> AnalysisDefinition {
    AnalysisDefinition {
        id,
        name: format!("analysis {}", id),
        strata: vec![],
        distribution,
        cost: false,
        is_default: true,
        category: None,
        template: template.to_string(),
    }
}

pub fn rule(id: i64, kind: RuleKind, severity: Severity, template: &str) -> HeelRuleDefinition {
    HeelRuleDefinition {
        id,
        name: format!("rule {}", id),
        kind,
        category: RuleCategory::Dq,
        severity,
        linked_measure: None,
        general_population_only: false,
        depends_on: vec![],
        template: template.to_string(),
    }
}

/// Plain analysis counting persons grouped by `column`.
pub fn count_by_template(column: &str) -> String {
    format!(
        "SELECT @analysisId AS analysis_id, CAST({column} AS VARCHAR(255)) AS stratum_1, {STRATA_NULL}, \
         COUNT_BIG(*) AS count_value INTO @scratchTable FROM @cdmDatabaseSchema.person GROUP BY {column};"
    )
}

/// Plain analysis counting all persons.
pub fn count_template() -> String {
    format!(
        "SELECT @analysisId AS analysis_id, CAST(NULL AS VARCHAR(255)) AS stratum_1, {STRATA_NULL}, \
         COUNT_BIG(*) AS count_value INTO @scratchTable FROM @cdmDatabaseSchema.person;"
    )
}

/// Distributional analysis over year of birth.
pub fn distribution_template() -> String {
    format!(
        "SELECT @analysisId AS analysis_id, CAST(NULL AS VARCHAR(255)) AS stratum_1, {STRATA_NULL}, \
         COUNT_BIG(*) AS count_value, MIN(year_of_birth) AS min_value, MAX(year_of_birth) AS max_value, \
         AVG(1.0 * year_of_birth) AS avg_value, NULL AS stdev_value, NULL AS median_value, \
         NULL AS p10_value, NULL AS p25_value, NULL AS p75_value, NULL AS p90_value \
         INTO @scratchTableDist FROM @cdmDatabaseSchema.person;"
    )
}

/// Heel rule flagging an analysis whose total count is below `threshold`.
pub fn low_count_rule_template(analysis_id: i64, threshold: i64) -> String {
    format!(
        "SELECT analysis_id, CAST('@rule_severity: low count' AS VARCHAR(255)) AS achilles_heel_warning, \
         @rule_id AS rule_id, count_value AS record_count INTO @scratchTable \
         FROM @resultsDatabaseSchema.achilles_results WHERE analysis_id = {analysis_id} AND count_value < {threshold};"
    )
}

/// Derived measure: total persons.
pub fn person_measure_template() -> String {
    "SELECT CAST(NULL AS INT) AS analysis_id, CAST(NULL AS VARCHAR(255)) AS stratum_1, \
     CAST(NULL AS VARCHAR(255)) AS stratum_2, 1.0 * SUM(count_value) AS statistic_value, \
     CAST('Person:Count' AS VARCHAR(255)) AS measure_id INTO @scratchTable \
     FROM @resultsDatabaseSchema.achilles_results WHERE analysis_id = 1;"
        .to_string()
}

/// Dependent rule reading the merged derived table.
pub fn small_population_template() -> String {
    "SELECT CAST(NULL AS INT) AS analysis_id, CAST('@rule_severity: small population' AS VARCHAR(255)) AS achilles_heel_warning, \
     @rule_id AS rule_id, CAST(statistic_value AS BIGINT) AS record_count INTO @scratchTable \
     FROM @derivedTable WHERE measure_id = 'Person:Count' AND statistic_value < @ThresholdMinimalPtMeasDrugRatio;"
        .to_string()
}

/// Dependent rule counting `WARNING` rows in the merged heel table.
pub fn warning_summary_template() -> String {
    "SELECT CAST(NULL AS INT) AS analysis_id, CAST('NOTIFICATION: warnings present' AS VARCHAR(255)) AS achilles_heel_warning, \
     @rule_id AS rule_id, COUNT_BIG(*) AS record_count INTO @scratchTable \
     FROM @heelTable WHERE achilles_heel_warning LIKE 'WARNING:%' HAVING COUNT_BIG(*) > 0;"
        .to_string()
}

/// Analyses 1 (count), 2 (by gender), 3 (by year of birth), 4 (distribution)
/// and a heel: rule 10 (independent), 20 (derived), 30 and 31 (dependent,
/// 31 after 30).
pub fn catalog() -> Catalog {
    let analyses = vec![
        analysis(1, Distribution::None, "count"),
        analysis(2, Distribution::None, "by_gender"),
        analysis(3, Distribution::None, "by_year"),
        analysis(4, Distribution::Distributional, "dist"),
    ];
    let mut dependent_summary = rule(31, RuleKind::Dependent, Severity::Notification, "summary");
    dependent_summary.depends_on = vec![30];
    let rules = vec![
        rule(10, RuleKind::Independent, Severity::Warning, "low_gender"),
        rule(20, RuleKind::Derived, Severity::Notification, "measure"),
        rule(30, RuleKind::Dependent, Severity::Notification, "small_population"),
        dependent_summary,
    ];
    let templates = HashMap::from([
        ("analyses/count".to_string(), count_template()),
        ("analyses/by_gender".to_string(), count_by_template("gender_concept_id")),
        ("analyses/by_year".to_string(), count_by_template("year_of_birth")),
        ("analyses/dist".to_string(), distribution_template()),
        ("heels/low_gender".to_string(), low_count_rule_template(2, 5)),
        ("heels/measure".to_string(), person_measure_template()),
        ("heels/small_population".to_string(), small_population_template()),
        ("heels/summary".to_string(), warning_summary_template()),
    ]);
    Catalog::from_parts(analyses, rules, templates).unwrap()
}

/// Catalog with analyses only.
pub fn analyses_only(analyses: Vec<(AnalysisDefinition, String)>) -> Catalog {
    let templates = analyses
        .iter()
        .map(|(a, sql)| (format!("analyses/{}", a.template), sql.clone()))
        .collect();
    Catalog::from_parts(analyses.into_iter().map(|(a, _)| a).collect(), Vec::new(), templates)
        .unwrap()
}

// ============================================================================
// CDM data
// ============================================================================

/// Create `person` with 10 persons of gender 8507 and 3 of gender 8532.
///
/// Years of birth: 1950 (6 persons), 1980 (4), 2000 (3).
pub async fn seed_cdm(factory: &dyn SessionFactory) {
    let mut session = factory.acquire().await.unwrap();
    session
        .execute(
            "CREATE TABLE person (person_id INTEGER PRIMARY KEY, gender_concept_id INTEGER, year_of_birth INTEGER)",
        )
        .await
        .unwrap();
    let mut values = Vec::new();
    for id in 1..=13 {
        let gender = if id <= 10 { 8507 } else { 8532 };
        let year = match id {
            1..=6 => 1950,
            7..=10 => 1980,
            _ => 2000,
        };
        values.push(format!("({}, {}, {})", id, gender, year));
    }
    session
        .execute(&format!("INSERT INTO person VALUES {}", values.join(", ")))
        .await
        .unwrap();
    factory.release(session).await.unwrap();
}

/// Options for a SQLite run in `main`.
pub fn sqlite_options() -> RunOptions {
    RunOptions {
        dialect: Dialect::Sqlite,
        cdm_schema: "main".into(),
        results_schema: "main".into(),
        vocab_schema: "main".into(),
        ..RunOptions::default()
    }
}

/// Rows of `sql`, each rendered as strings for easy comparison.
pub async fn query_strings(factory: &dyn SessionFactory, sql: &str) -> Vec<Vec<String>> {
    let mut session = factory.acquire().await.unwrap();
    let rows = session.query(sql).await.unwrap();
    factory.release(session).await.unwrap();
    rows.into_iter()
        .map(|row| {
            row.into_iter()
                .map(|v| match v {
                    achilles::session::Value::Null => "NULL".to_string(),
                    achilles::session::Value::Int(n) => n.to_string(),
                    achilles::session::Value::Float(x) => x.to_string(),
                    achilles::session::Value::Text(s) => s,
                })
                .collect()
        })
        .collect()
}

// ============================================================================
// Recording factory
// ============================================================================

/// A session factory that records every statement and fails on demand.
///
/// - a statement containing a string in `fail_on` fails with an execution error
/// - a statement containing a string in `lose_on` fails with a lost connection
///   (once per marker)
/// - `table_exists` answers false for names in `missing`
/// - the first `acquire_failures` acquisitions fail
#[derive(Clone, Default)]
pub struct RecordingFactory {
    dialect: Dialect,
    session_scope: bool,
    pub log: Arc<Mutex<Vec<String>>>,
    fail_on: Arc<Mutex<Vec<String>>>,
    lose_on: Arc<Mutex<Vec<String>>>,
    missing: Arc<Mutex<HashSet<String>>>,
    acquire_failures: Arc<AtomicUsize>,
    pub acquired: Arc<AtomicUsize>,
    pub released: Arc<AtomicUsize>,
    pub open: Arc<AtomicUsize>,
    pub max_open: Arc<AtomicUsize>,
}

impl RecordingFactory {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            session_scope: true,
            ..Self::default()
        }
    }

    pub fn without_session_scope(mut self) -> Self {
        self.session_scope = false;
        self
    }

    pub fn fail_on(self, marker: &str) -> Self {
        self.fail_on.lock().unwrap().push(marker.to_string());
        self
    }

    pub fn lose_connection_on(self, marker: &str) -> Self {
        self.lose_on.lock().unwrap().push(marker.to_string());
        self
    }

    pub fn missing_table(self, name: &str) -> Self {
        self.missing.lock().unwrap().insert(name.to_string());
        self
    }

    pub fn failing_acquisitions(self, n: usize) -> Self {
        self.acquire_failures.store(n, Ordering::SeqCst);
        self
    }

    pub fn statements(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    /// Index of the first recorded statement containing `needle`.
    pub fn position(&self, needle: &str) -> Option<usize> {
        self.statements().iter().position(|s| s.contains(needle))
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.position(needle).is_some()
    }
}

#[async_trait]
impl SessionFactory for RecordingFactory {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn supports_session_scope(&self) -> bool {
        self.session_scope
    }

    async fn acquire(&self) -> SessionResult<Box<dyn Session>> {
        let remaining = self.acquire_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.acquire_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(SessionError::Connect("refused".into()));
        }
        self.acquired.fetch_add(1, Ordering::SeqCst);
        let open = self.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_open.fetch_max(open, Ordering::SeqCst);
        Ok(Box::new(RecordingSession {
            factory: self.clone(),
        }))
    }

    async fn release(&self, session: Box<dyn Session>) -> SessionResult<()> {
        self.released.fetch_add(1, Ordering::SeqCst);
        self.open.fetch_sub(1, Ordering::SeqCst);
        session.close().await
    }
}

struct RecordingSession {
    factory: RecordingFactory,
}

impl RecordingSession {
    fn record(&self, sql: &str) -> SessionResult<()> {
        self.factory.log.lock().unwrap().push(sql.to_string());
        if self.factory.fail_on.lock().unwrap().iter().any(|m| sql.contains(m.as_str())) {
            return Err(SessionError::execution(format!("injected failure: {}", sql)));
        }
        let mut lose_on = self.factory.lose_on.lock().unwrap();
        if let Some(i) = lose_on.iter().position(|m| sql.contains(m.as_str())) {
            lose_on.remove(i);
            return Err(SessionError::ConnectionLost("injected disconnect".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Session for RecordingSession {
    async fn execute(&mut self, sql: &str) -> SessionResult<()> {
        self.record(sql)
    }

    async fn query(&mut self, sql: &str) -> SessionResult<Vec<Row>> {
        self.record(sql)?;
        Ok(Vec::new())
    }

    async fn table_exists(&mut self, table: &str) -> SessionResult<bool> {
        Ok(!self.factory.missing.lock().unwrap().contains(table))
    }
}
