//! Rendering and translating the bundled catalog for every dialect.

use std::path::PathBuf;
use std::sync::Arc;

use achilles::analysis::analysis_statements;
use achilles::catalog::{Catalog, RuleKind};
use achilles::heel::{phase_a_statements, phase_b_statements};
use achilles::run::{RunContext, RunOptions};
use achilles::session::ScriptSessionFactory;
use achilles::sql::{render, translate, translate_statements, Dialect, Params, TemplateError};
use sqlparser::dialect::{DuckDbDialect, PostgreSqlDialect, SQLiteDialect};
use sqlparser::parser::Parser;

fn demo_catalog() -> Catalog {
    Catalog::load(PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("catalog")).unwrap()
}

fn context(dialect: Dialect) -> RunContext {
    let options = RunOptions {
        dialect,
        cdm_schema: "cdm".into(),
        results_schema: "results".into(),
        vocab_schema: "vocab".into(),
        ..RunOptions::default()
    }
    .validated()
    .unwrap();
    RunContext::new(options, Arc::new(ScriptSessionFactory::new(dialect)))
}

/// Every statement of every analysis and rule, in catalog order.
fn all_statements(catalog: &Catalog, dialect: Dialect) -> Vec<String> {
    let ctx = context(dialect);
    let mut out = Vec::new();
    for a in catalog.analyses() {
        out.extend(
            analysis_statements(catalog, a, ctx.base_params(), ctx.naming(), dialect).unwrap(),
        );
    }
    for r in catalog.rules() {
        let statements = if r.kind == RuleKind::Dependent {
            phase_b_statements(catalog, r, ctx.base_params(), ctx.naming(), ctx.options())
        } else {
            phase_a_statements(catalog, r, ctx.base_params(), ctx.naming(), ctx.options())
        };
        out.extend(statements.unwrap());
    }
    out
}

#[test]
fn test_bundled_catalog_renders_for_every_dialect() {
    let catalog = demo_catalog();
    for dialect in Dialect::ALL {
        for stmt in all_statements(&catalog, dialect) {
            assert!(!stmt.contains('@'), "{}: unbound parameter in {}", dialect, stmt);
            assert!(!stmt.contains("--"), "{}: comment left in {}", dialect, stmt);
            assert!(!stmt.ends_with(';'), "{}: terminator left in {}", dialect, stmt);
            if dialect != Dialect::TSql {
                assert!(!stmt.contains('#'), "{}: temp spelling left in {}", dialect, stmt);
            }
        }
    }
}

#[test]
fn test_translated_catalog_parses() {
    let catalog = demo_catalog();
    let parsers: [(Dialect, &dyn sqlparser::dialect::Dialect); 3] = [
        (Dialect::Postgres, &PostgreSqlDialect {}),
        (Dialect::Sqlite, &SQLiteDialect {}),
        (Dialect::DuckDb, &DuckDbDialect {}),
    ];
    for (dialect, parser) in parsers {
        for stmt in all_statements(&catalog, dialect) {
            if let Err(e) = Parser::parse_sql(parser, &stmt) {
                panic!("{} rejected by the {} parser: {}", stmt, dialect, e);
            }
        }
    }
}

#[test]
fn test_translation_is_idempotent_on_the_catalog() {
    let catalog = demo_catalog();
    for dialect in Dialect::ALL {
        for stmt in all_statements(&catalog, dialect) {
            assert_eq!(
                translate_statements(&stmt, dialect).unwrap(),
                vec![stmt.clone()],
                "{}",
                dialect
            );
        }
    }
}

#[test]
fn test_temp_table_spelling_per_dialect() {
    let catalog = demo_catalog();
    let person_count = catalog.analysis(1).unwrap();
    let first_create = |dialect: Dialect| -> String {
        let ctx = context(dialect);
        analysis_statements(&catalog, person_count, ctx.base_params(), ctx.naming(), dialect)
            .unwrap()
            .remove(1)
    };

    let tsql = first_create(Dialect::TSql);
    assert!(tsql.starts_with("SELECT"));
    assert!(tsql.contains("INTO #s_tmpach_1"));
    assert!(tsql.contains("FROM cdm.person"));
    assert!(first_create(Dialect::Postgres).starts_with("CREATE TEMP TABLE s_tmpach_1 AS SELECT"));
    assert!(first_create(Dialect::Snowflake).starts_with("CREATE TEMPORARY TABLE s_tmpach_1 AS SELECT"));
    assert!(first_create(Dialect::Sqlite).contains("COUNT(DISTINCT person_id)"));
    assert!(first_create(Dialect::TSql).contains("COUNT_BIG(DISTINCT person_id)"));
}

#[test]
fn test_distribution_and_plain_outputs_of_one_analysis() {
    let catalog = demo_catalog();
    let ctx = context(Dialect::Postgres);
    let both = catalog.analysis(113).unwrap();
    let sql = analysis_statements(&catalog, both, ctx.base_params(), ctx.naming(), Dialect::Postgres)
        .unwrap();

    assert_eq!(sql[0], "DROP TABLE IF EXISTS s_tmpach_113");
    assert_eq!(sql[1], "DROP TABLE IF EXISTS s_tmpach_dist_113");
    assert!(sql[2].starts_with("CREATE TEMP TABLE s_tmpach_113 AS WITH periods AS"));
    assert!(sql[3].starts_with("CREATE TEMP TABLE s_tmpach_dist_113 AS WITH periods AS"));
    assert_eq!(sql.len(), 4);
}

#[test]
fn test_source_metadata_literals() {
    let catalog = demo_catalog();
    let options = RunOptions {
        dialect: Dialect::Postgres,
        source_name: "O'Brien Clinic".into(),
        cdm_version: "5.3".into(),
        ..RunOptions::default()
    }
    .validated()
    .unwrap();
    let ctx = RunContext::new(options, Arc::new(ScriptSessionFactory::new(Dialect::Postgres)));
    let sql = analysis_statements(
        &catalog,
        catalog.analysis(0).unwrap(),
        ctx.base_params(),
        ctx.naming(),
        Dialect::Postgres,
    )
    .unwrap();

    assert!(sql[1].contains("CAST('O''Brien Clinic' AS VARCHAR(255)) AS stratum_1"));
    assert!(sql[1].contains(&format!(
        "CAST('{}' AS VARCHAR(255)) AS stratum_2",
        env!("CARGO_PKG_VERSION")
    )));
    assert!(sql[1].contains("CAST('5.3' AS VARCHAR(255)) AS stratum_3"));
}

#[test]
fn test_render_then_translate() {
    let params = Params::new()
        .with("cdmDatabaseSchema", "cdm")
        .with("scratchTable", "#codes");
    let rendered = render(
        "SELECT TOP 10 [concept_id] INTO @scratchTable FROM @cdmDatabaseSchema.concept WHERE ISNULL(invalid_reason, '') = '';",
        &params,
    )
    .unwrap();

    assert_eq!(
        translate(&rendered, Dialect::Postgres).unwrap(),
        "CREATE TEMP TABLE codes AS SELECT \"concept_id\" FROM cdm.concept WHERE COALESCE(invalid_reason, '') = '' LIMIT 10;"
    );
    assert_eq!(
        translate(&rendered, Dialect::TSql).unwrap(),
        "SELECT TOP 10 [concept_id] INTO #codes FROM cdm.concept WHERE ISNULL(invalid_reason, '') = '';"
    );
}

#[test]
fn test_unbound_parameter_is_reported() {
    let err = render("SELECT * FROM @resultsDatabaseSchema.achilles_results", &Params::new())
        .unwrap_err();
    assert_eq!(
        err,
        TemplateError::UnboundParameter {
            name: "resultsDatabaseSchema".into()
        }
    );
}
