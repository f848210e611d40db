//! Merging scratch tables into the permanent result tables.
//!
//! For one [`DetailTableShape`] the merge:
//!
//! 1. checks that every member's scratch table exists,
//! 2. recreates, trims or keeps the target table,
//! 3. inserts the `UNION ALL` of every member, each column cast to its
//!    declared type, minus small cells,
//! 4. optionally indexes the target and counts its rows.
//!
//! Members are unioned in ascending step order so the generated SQL is the
//! same on every run.

use tracing::{debug, info};

use crate::catalog::{AnalysisDefinition, Field, ResultShape};
use crate::run::{MergeSummary, RunError, RunResult, ScratchTableHandle, StepId};
use crate::session::Session;
use crate::sql::{render_union_all, translate_statements, Dialect, Params, SqlDialect};

/// Permanent table holding the analysis catalog.
pub const ANALYSIS_CATALOG_TABLE: &str = "achilles_analysis";

/// A scratch table feeding a shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShapeMember {
    pub step: StepId,
    pub handle: ScratchTableHandle,
}

/// One result table and the scratch tables that feed it.
#[derive(Debug, Clone, PartialEq)]
pub struct DetailTableShape {
    pub shape: ResultShape,
    pub fields: Vec<Field>,
    members: Vec<ShapeMember>,
}

impl DetailTableShape {
    pub fn new(shape: ResultShape, fields: Vec<Field>, mut members: Vec<ShapeMember>) -> Self {
        members.sort_by(|a, b| a.step.cmp(&b.step));
        Self {
            shape,
            fields,
            members,
        }
    }

    pub fn members(&self) -> &[ShapeMember] {
        &self.members
    }

    pub fn table_name(&self) -> &'static str {
        self.shape.table_name()
    }

    /// Analysis ids of the members, ascending.
    pub fn analysis_ids(&self) -> Vec<i64> {
        self.members
            .iter()
            .filter_map(|m| match m.step {
                StepId::Analysis(id) => Some(id),
                _ => None,
            })
            .collect()
    }
}

/// How the target table is prepared before the insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetMode {
    /// Drop and recreate with the declared column types.
    Create,
    /// Keep existing rows.
    Append,
    /// Delete the rows of these analyses, then append.
    Replace(Vec<i64>),
}

/// Per-merge settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeSettings {
    pub results_schema: String,
    pub target: TargetMode,
    /// Drop rows whose count is at or below this value.
    pub small_cell_count: Option<i64>,
    pub create_indices: bool,
}

/// Generate the statements that merge `shape`, translated for `dialect`.
///
/// Existence of the members is not checked here; see [`merge_shape`].
pub fn merge_statements(
    shape: &DetailTableShape,
    settings: &MergeSettings,
    dialect: Dialect,
) -> RunResult<Vec<String>> {
    let step = StepId::Merge(shape.table_name().to_string());
    let target = format!("{}.{}", settings.results_schema, shape.table_name());
    let columns: Vec<&str> = shape.fields.iter().map(|f| f.name.as_str()).collect();
    let column_list = columns.join(", ");

    let mut sql = Vec::new();
    match &settings.target {
        TargetMode::Create => {
            sql.push(dialect.emit_drop_table_if_exists(&target));
            sql.push(create_table_sql(&target, &shape.fields, dialect));
        }
        TargetMode::Append => {}
        TargetMode::Replace(ids) if ids.is_empty() => {}
        TargetMode::Replace(ids) => {
            let ids: Vec<String> = ids.iter().map(i64::to_string).collect();
            sql.push(format!(
                "DELETE FROM {} WHERE analysis_id IN ({})",
                target,
                ids.join(", ")
            ));
        }
    }

    if !shape.members.is_empty() {
        let fragments: Vec<String> = shape
            .members
            .iter()
            .map(|member| {
                let casts: Vec<String> = shape
                    .fields
                    .iter()
                    .map(|f| {
                        format!(
                            "CAST({} AS {}) AS {}",
                            f.name,
                            dialect.emit_data_type(&f.data_type),
                            f.name
                        )
                    })
                    .collect();
                format!("SELECT {} FROM {}", casts.join(", "), member.handle.qualified())
            })
            .collect();

        let mut insert = format!(
            "INSERT INTO {} ({}) SELECT {} FROM ({}) merged",
            target,
            column_list,
            column_list,
            fragments.join(" UNION ALL ")
        );
        if let Some(filter) = redaction_filter(shape, settings.small_cell_count) {
            insert.push_str(" WHERE ");
            insert.push_str(&filter);
        }
        sql.push(insert);
    }

    if settings.create_indices
        && settings.target == TargetMode::Create
        && dialect.supports_indexes()
    {
        sql.push(dialect.emit_create_index(
            &settings.results_schema,
            shape.table_name(),
            &format!("idx_{}_analysis_id", shape.table_name()),
            "analysis_id",
        ));
    }

    translate_all(&sql, dialect, &step)
}

/// Merge `shape` into its permanent table on `session`.
pub async fn merge_shape(
    session: &mut dyn Session,
    shape: &DetailTableShape,
    settings: &MergeSettings,
    dialect: Dialect,
) -> RunResult<MergeSummary> {
    let table = shape.table_name().to_string();
    let step = StepId::Merge(table.clone());

    for member in &shape.members {
        let exists = session
            .table_exists(&member.handle.executable(dialect))
            .await
            .map_err(|e| RunError::from_session(&step, e))?;
        if !exists {
            return Err(RunError::MergeIntegrity {
                table,
                member: member.step.clone(),
                scratch: member.handle.qualified(),
            });
        }
    }

    for sql in merge_statements(shape, settings, dialect)? {
        debug!(table = %table, sql = %sql, "merge statement");
        session
            .execute(&sql)
            .await
            .map_err(|e| RunError::from_session(&step, e))?;
    }

    let rows = if session.executes() {
        count_rows(session, &settings.results_schema, &table, dialect, &step).await?
    } else {
        None
    };
    info!(table = %table, members = shape.members.len(), rows = ?rows, "merged");

    Ok(MergeSummary {
        table,
        members: shape.members.len(),
        rows,
    })
}

/// `SELECT COUNT(*)` of a result table; `None` when the engine returns nothing.
async fn count_rows(
    session: &mut dyn Session,
    schema: &str,
    table: &str,
    dialect: Dialect,
    step: &StepId,
) -> RunResult<Option<u64>> {
    let sql = translate_all(
        &[format!("SELECT COUNT_BIG(*) FROM {}.{}", schema, table)],
        dialect,
        step,
    )?;
    let mut rows = Vec::new();
    for stmt in &sql {
        rows = session
            .query(stmt)
            .await
            .map_err(|e| RunError::from_session(step, e))?;
    }
    Ok(rows
        .first()
        .and_then(|row| row.first())
        .and_then(|v| v.as_i64())
        .and_then(|n| u64::try_from(n).ok()))
}

/// Statements that recreate and fill the analysis catalog table.
pub fn analysis_catalog_statements(
    analyses: &[&AnalysisDefinition],
    results_schema: &str,
    dialect: Dialect,
) -> RunResult<Vec<String>> {
    let step = StepId::Merge(ANALYSIS_CATALOG_TABLE.to_string());
    let target = format!("{}.{}", results_schema, ANALYSIS_CATALOG_TABLE);
    let fields = analysis_catalog_fields();
    let columns: Vec<&str> = fields.iter().map(|f| f.name.as_str()).collect();

    let mut sql = vec![
        dialect.emit_drop_table_if_exists(&target),
        create_table_sql(&target, &fields, dialect),
    ];

    if !analyses.is_empty() {
        let template = fields
            .iter()
            .map(|f| {
                format!(
                    "CAST(@{} AS {}) AS {}",
                    f.name,
                    dialect.emit_data_type(&f.data_type),
                    f.name
                )
            })
            .collect::<Vec<_>>()
            .join(", ");
        let template = format!("SELECT {}", template);

        let items: Vec<Params> = analyses
            .iter()
            .map(|a| {
                let mut p = Params::new();
                p.set("analysis_id", a.id)
                    .set("analysis_name", literal(Some(&a.name)))
                    .set("is_default", i64::from(a.is_default))
                    .set("category", literal(a.category.as_deref()));
                for n in 1..=5 {
                    p.set(format!("stratum_{}_name", n), literal(a.stratum_name(n)));
                }
                p
            })
            .collect();

        let union = render_union_all(&template, &Params::new(), &items).map_err(|source| {
            RunError::Template {
                step: step.clone(),
                source,
            }
        })?;
        sql.push(format!(
            "INSERT INTO {} ({}) {}",
            target,
            columns.join(", "),
            union
        ));
    }

    translate_all(&sql, dialect, &step)
}

fn analysis_catalog_fields() -> Vec<Field> {
    use crate::sql::DataType;

    let mut fields = vec![
        Field::new("analysis_id", DataType::Int32),
        Field::new("analysis_name", DataType::Varchar(255)),
    ];
    for n in 1..=5 {
        fields.push(Field::new(
            format!("stratum_{}_name", n),
            DataType::Varchar(255),
        ));
    }
    fields.push(Field::new("is_default", DataType::Int32));
    fields.push(Field::new("category", DataType::Varchar(255)));
    fields
}

/// `WHERE` condition for small-cell redaction, if it applies to `shape`.
fn redaction_filter(shape: &DetailTableShape, small_cell_count: Option<i64>) -> Option<String> {
    let threshold = small_cell_count?;
    let field = shape.shape.count_field()?;
    shape.fields.iter().any(|f| f.name == field).then(|| {
        format!("{} IS NULL OR {} > {}", field, field, threshold)
    })
}

fn create_table_sql(target: &str, fields: &[Field], dialect: Dialect) -> String {
    let columns: Vec<String> = fields
        .iter()
        .map(|f| format!("{} {}", f.name, dialect.emit_data_type(&f.data_type)))
        .collect();
    format!("CREATE TABLE {} ({})", target, columns.join(", "))
}

/// Quoted SQL literal, or `NULL`.
fn literal(value: Option<&str>) -> String {
    match value {
        Some(s) => format!("'{}'", s.replace('\'', "''")),
        None => "NULL".to_string(),
    }
}

fn translate_all(sql: &[String], dialect: Dialect, step: &StepId) -> RunResult<Vec<String>> {
    let mut out = Vec::with_capacity(sql.len());
    for stmt in sql {
        let translated = translate_statements(stmt, dialect).map_err(|source| {
            RunError::Template {
                step: step.clone(),
                source,
            }
        })?;
        out.extend(translated);
    }
    Ok(out)
}
