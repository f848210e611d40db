//! Heel rule engine.
//!
//! Two phases:
//!
//! - **Phase A**: independent rules and derived measures. Each reads only
//!   merged analysis results or CDM tables and writes its own scratch table,
//!   so they run through the task pool like analyses. Their scratch tables
//!   are merged into `achilles_results_derived` and `achilles_heel_results`.
//! - **Phase B**: dependent rules, one at a time in dependency order. They
//!   read the merged derived and heel tables, never a phase A scratch table,
//!   and their rows are appended to `achilles_heel_results`.

pub mod order;

use crate::catalog::{Catalog, HeelRuleDefinition, ResultShape, RuleKind};
use crate::merge::{DetailTableShape, MergeSettings, ShapeMember, TargetMode};
use crate::run::pool::SqlTask;
use crate::run::{RunContext, RunError, RunOptions, RunResult, ScratchKind, ScratchNaming, StepId};
use crate::sql::{render, translate_statements, Dialect, Params, SqlDialect, TemplateError};

pub use order::dependent_order;

/// Scratch kind written by rules of `kind`.
pub fn scratch_kind(kind: RuleKind) -> ScratchKind {
    match kind {
        RuleKind::Independent => ScratchKind::IndependentRule,
        RuleKind::Derived => ScratchKind::DerivedRule,
        RuleKind::Dependent => ScratchKind::DependentRule,
    }
}

/// Rules of the given kinds, ascending by id.
pub fn rules_of<'a>(catalog: &'a Catalog, kinds: &[RuleKind]) -> Vec<&'a HeelRuleDefinition> {
    catalog
        .rules()
        .iter()
        .filter(|r| kinds.contains(&r.kind))
        .collect()
}

/// Parameters specific to one rule.
pub fn rule_params(rule: &HeelRuleDefinition, naming: &ScratchNaming, options: &RunOptions) -> Params {
    let mut params = Params::new()
        .with("rule_id", rule.id)
        .with("rule_name", rule.name.replace('\'', "''"))
        .with("rule_severity", rule.severity.label())
        .with("rule_category", rule.category.label())
        .with("linked_measure", rule.linked_measure.clone().unwrap_or_default())
        .with("general_population_only", rule.general_population_only)
        .with(
            "scratchTable",
            naming.handle(scratch_kind(rule.kind), rule.id).qualified(),
        );
    if rule.kind == RuleKind::Dependent {
        params.set(
            "derivedTable",
            format!("{}.{}", options.results_schema, ResultShape::Derived.table_name()),
        );
        params.set(
            "heelTable",
            format!("{}.{}", options.results_schema, ResultShape::Heel.table_name()),
        );
    }
    params
}

fn rendered_rule(
    catalog: &Catalog,
    rule: &HeelRuleDefinition,
    base: &Params,
    naming: &ScratchNaming,
    options: &RunOptions,
) -> Result<String, TemplateError> {
    let template = catalog
        .rule_template(rule)
        .map_err(|e| TemplateError::Unavailable(e.to_string()))?;
    render(&template, &base.merged(&rule_params(rule, naming, options)))
}

/// Translated statements of a phase A rule: pre-drop, then its template.
pub fn phase_a_statements(
    catalog: &Catalog,
    rule: &HeelRuleDefinition,
    base: &Params,
    naming: &ScratchNaming,
    options: &RunOptions,
) -> Result<Vec<String>, TemplateError> {
    let dialect = options.dialect;
    let rendered = rendered_rule(catalog, rule, base, naming, options)?;
    let handle = naming.handle(scratch_kind(rule.kind), rule.id);

    let mut statements =
        translate_statements(&dialect.emit_drop_table_if_exists(&handle.qualified()), dialect)?;
    statements.extend(translate_statements(&rendered, dialect)?);
    Ok(statements)
}

/// Translated statements of a dependent rule.
///
/// The rule fills its own scratch table; its rows are then appended to the
/// heel results with every column cast, and the scratch table is dropped.
pub fn phase_b_statements(
    catalog: &Catalog,
    rule: &HeelRuleDefinition,
    base: &Params,
    naming: &ScratchNaming,
    options: &RunOptions,
) -> Result<Vec<String>, TemplateError> {
    let dialect = options.dialect;
    let rendered = rendered_rule(catalog, rule, base, naming, options)?;
    let handle = naming.handle(ScratchKind::DependentRule, rule.id);
    let drop = dialect.emit_drop_table_if_exists(&handle.qualified());

    let fields = catalog.fields().fields(ResultShape::Heel);
    let columns: Vec<&str> = fields.iter().map(|f| f.name.as_str()).collect();
    let casts: Vec<String> = fields
        .iter()
        .map(|f| format!("CAST({} AS {}) AS {}", f.name, dialect.emit_data_type(&f.data_type), f.name))
        .collect();
    let append = format!(
        "INSERT INTO {}.{} ({}) SELECT {} FROM {}",
        options.results_schema,
        ResultShape::Heel.table_name(),
        columns.join(", "),
        casts.join(", "),
        handle.qualified()
    );

    let mut statements = translate_statements(&drop, dialect)?;
    statements.extend(translate_statements(&rendered, dialect)?);
    statements.extend(translate_statements(&append, dialect)?);
    statements.extend(translate_statements(&drop, dialect)?);
    Ok(statements)
}

fn to_task(step: StepId, result: Result<Vec<String>, TemplateError>) -> SqlTask {
    match result {
        Ok(statements) => SqlTask::ready(step, statements),
        Err(source) => SqlTask::invalid(step.clone(), RunError::Template { step, source }),
    }
}

/// Phase A tasks: independent and derived rules, ascending by id.
pub fn phase_a_tasks(ctx: &RunContext, catalog: &Catalog) -> Vec<SqlTask> {
    rules_of(catalog, &[RuleKind::Independent, RuleKind::Derived])
        .into_iter()
        .map(|rule| {
            to_task(
                StepId::Rule(rule.id),
                phase_a_statements(catalog, rule, ctx.base_params(), ctx.naming(), ctx.options()),
            )
        })
        .collect()
}

/// Phase B tasks in execution order.
pub fn phase_b_tasks(ctx: &RunContext, catalog: &Catalog) -> RunResult<Vec<SqlTask>> {
    let dependents = rules_of(catalog, &[RuleKind::Dependent]);
    let order = dependent_order(&dependents)?;
    Ok(order
        .into_iter()
        .filter_map(|id| catalog.rule(id))
        .map(|rule| {
            to_task(
                StepId::Rule(rule.id),
                phase_b_statements(catalog, rule, ctx.base_params(), ctx.naming(), ctx.options()),
            )
        })
        .collect())
}

/// The derived and heel shapes fed by phase A.
pub fn phase_a_shapes(catalog: &Catalog, naming: &ScratchNaming) -> [DetailTableShape; 2] {
    let members = |kind: RuleKind| -> Vec<ShapeMember> {
        rules_of(catalog, &[kind])
            .into_iter()
            .map(|r| ShapeMember {
                step: StepId::Rule(r.id),
                handle: naming.handle(scratch_kind(kind), r.id),
            })
            .collect()
    };
    [
        DetailTableShape::new(
            ResultShape::Derived,
            catalog.fields().fields(ResultShape::Derived).to_vec(),
            members(RuleKind::Derived),
        ),
        DetailTableShape::new(
            ResultShape::Heel,
            catalog.fields().fields(ResultShape::Heel).to_vec(),
            members(RuleKind::Independent),
        ),
    ]
}

/// Heel tables are rebuilt on every run and never redacted.
pub fn phase_a_merge_settings(options: &RunOptions) -> MergeSettings {
    MergeSettings {
        results_schema: options.results_schema.clone(),
        target: TargetMode::Create,
        small_cell_count: None,
        create_indices: options.create_indices,
    }
}

/// Statements that drop every phase A scratch table (shared-scratch cleanup).
pub fn scratch_drop_statements(catalog: &Catalog, naming: &ScratchNaming, dialect: Dialect) -> Vec<String> {
    catalog
        .rules()
        .iter()
        .map(|r| naming.handle(scratch_kind(r.kind), r.id))
        .map(|h| dialect.emit_drop_table_if_exists(&h.qualified()))
        .collect()
}
