//! Analysis scheduling.
//!
//! Selects the analyses of a run, turns each into a [`SqlTask`] that pre-drops
//! and then fills its scratch tables, and describes the two detail shapes the
//! merge consumes.

use std::collections::HashSet;

use crate::catalog::{AnalysisDefinition, Catalog, ResultShape};
use crate::merge::{DetailTableShape, ShapeMember};
use crate::run::pool::SqlTask;
use crate::run::{RunContext, RunError, RunOptions, RunResult, ScratchKind, ScratchNaming, StepId};
use crate::sql::{render, translate_statements, Dialect, Params, SqlDialect, TemplateError};

/// Analyses selected by `options`, ascending by id.
///
/// Explicitly requested ids must exist in the catalog. Exclusions, the cost
/// flag and the default-only flag apply on top of the explicit list.
pub fn select_analyses<'a>(
    catalog: &'a Catalog,
    options: &RunOptions,
) -> RunResult<Vec<&'a AnalysisDefinition>> {
    if let Some(ids) = &options.analysis_ids {
        let unknown: Vec<String> = ids
            .iter()
            .filter(|id| catalog.analysis(**id).is_none())
            .map(i64::to_string)
            .collect();
        if !unknown.is_empty() {
            return Err(RunError::Configuration(format!(
                "unknown analysis ids: {}",
                unknown.join(", ")
            )));
        }
    }

    let requested: Option<HashSet<i64>> = options
        .analysis_ids
        .as_ref()
        .map(|ids| ids.iter().copied().collect());
    let excluded: HashSet<i64> = options.exclude_analysis_ids.iter().copied().collect();

    Ok(catalog
        .analyses()
        .iter()
        .filter(|a| requested.as_ref().map_or(true, |ids| ids.contains(&a.id)))
        .filter(|a| !excluded.contains(&a.id))
        .filter(|a| options.include_cost || !a.cost)
        .filter(|a| !options.default_analyses_only || a.is_default)
        .collect())
}

/// Parameters specific to one analysis.
pub fn analysis_params(analysis: &AnalysisDefinition, naming: &ScratchNaming) -> Params {
    Params::new()
        .with("analysisId", analysis.id)
        .with(
            "scratchTable",
            naming.handle(ScratchKind::Analysis, analysis.id).qualified(),
        )
        .with(
            "scratchTableDist",
            naming
                .handle(ScratchKind::AnalysisDist, analysis.id)
                .qualified(),
        )
}

/// Scratch kinds an analysis writes.
pub fn scratch_kinds(analysis: &AnalysisDefinition) -> Vec<ScratchKind> {
    let mut kinds = Vec::with_capacity(2);
    if analysis.distribution.feeds_plain() {
        kinds.push(ScratchKind::Analysis);
    }
    if analysis.distribution.feeds_distribution() {
        kinds.push(ScratchKind::AnalysisDist);
    }
    kinds
}

/// Translated statements of one analysis: pre-drops, then its template.
pub fn analysis_statements(
    catalog: &Catalog,
    analysis: &AnalysisDefinition,
    base: &Params,
    naming: &ScratchNaming,
    dialect: Dialect,
) -> Result<Vec<String>, TemplateError> {
    let template = catalog
        .analysis_template(analysis)
        .map_err(|e| TemplateError::Unavailable(e.to_string()))?;
    let rendered = render(&template, &base.merged(&analysis_params(analysis, naming)))?;

    let mut statements = Vec::new();
    for kind in scratch_kinds(analysis) {
        let handle = naming.handle(kind, analysis.id);
        statements.extend(translate_statements(
            &dialect.emit_drop_table_if_exists(&handle.qualified()),
            dialect,
        )?);
    }
    statements.extend(translate_statements(&rendered, dialect)?);
    Ok(statements)
}

/// One task per analysis; template failures become tasks that fail unexecuted.
pub fn build_tasks(ctx: &RunContext, catalog: &Catalog, analyses: &[&AnalysisDefinition]) -> Vec<SqlTask> {
    analyses
        .iter()
        .map(|analysis| {
            let step = StepId::Analysis(analysis.id);
            match analysis_statements(catalog, analysis, ctx.base_params(), ctx.naming(), ctx.dialect())
            {
                Ok(statements) => SqlTask::ready(step, statements),
                Err(source) => SqlTask::invalid(
                    step.clone(),
                    RunError::Template { step, source },
                ),
            }
        })
        .collect()
}

/// The plain and distributional shapes fed by `analyses`.
pub fn detail_shapes(
    catalog: &Catalog,
    analyses: &[&AnalysisDefinition],
    naming: &ScratchNaming,
) -> [DetailTableShape; 2] {
    let members = |kind: ScratchKind| -> Vec<ShapeMember> {
        analyses
            .iter()
            .filter(|a| scratch_kinds(a).contains(&kind))
            .map(|a| ShapeMember {
                step: StepId::Analysis(a.id),
                handle: naming.handle(kind, a.id),
            })
            .collect()
    };

    [
        DetailTableShape::new(
            ResultShape::Plain,
            catalog.fields().fields(ResultShape::Plain).to_vec(),
            members(ScratchKind::Analysis),
        ),
        DetailTableShape::new(
            ResultShape::Distributional,
            catalog.fields().fields(ResultShape::Distributional).to_vec(),
            members(ScratchKind::AnalysisDist),
        ),
    ]
}
