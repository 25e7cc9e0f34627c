//! Projection lowering

use docpush_ir::{Expr, Field, Op, Projection};
use serde_json::{json, Map, Value as JsonValue};

use crate::accumulator::{PipelineAccumulator, StageKind};
use crate::error::{CompileError, Result};
use crate::expression::{path_segments, ExpressionTranslator};
use crate::literal::BlobResolver;

/// Emit the `$project` stage for `projects` over `row`.
///
/// Unwind markers add a follow-up `$unwind` stage, exclusion lists a separate
/// exclusion `$project` ahead of the main one. Plain same-name inclusions keep
/// a direct form so the query can still run as a find.
pub(crate) fn translate_project(
    acc: &mut PipelineAccumulator,
    row: &[Field],
    projects: &[Projection],
    blobs: &dyn BlobResolver,
) -> Result<()> {
    if acc.is_dml() {
        // Mutations only see the input renamed, never computed
        let mut renames = Vec::with_capacity(projects.len());
        for project in projects {
            let Expr::FieldRef { index } = &project.expr else {
                return Err(CompileError::UnsupportedOperation(
                    "computed projection below a modification".to_string(),
                ));
            };
            renames.push((project.alias.as_str(), acc.resolve_field(row, *index)?));
        }
        for (alias, physical) in renames {
            acc.alias_field(alias, physical);
        }
        return Ok(());
    }

    let mut items = Map::new();
    let mut plain = true;
    let mut exclusions = Map::new();
    let mut unwinds = Vec::new();

    for project in projects {
        let alias = project.alias.as_str();
        match &project.expr {
            Expr::FieldRef { index } => {
                let name = acc.resolve_field(row, *index)?;
                if name == alias {
                    items.insert(alias.to_string(), json!(1));
                } else {
                    items.insert(alias.to_string(), JsonValue::String(format!("${}", name)));
                    plain = false;
                }
            }
            Expr::Call { op: Op::DocUnwind, operands } => {
                let [inner] = operands.as_slice() else {
                    return Err(CompileError::unsupported(&project.expr));
                };
                let value = ExpressionTranslator::new(acc, row, blobs).translate_required(inner)?;
                items.insert(alias.to_string(), value);
                unwinds.push(alias.to_string());
                plain = false;
            }
            Expr::Call { op: Op::DocExclude, operands } => {
                let [Expr::FieldRef { index }, paths] = operands.as_slice() else {
                    return Err(CompileError::unsupported(&project.expr));
                };
                let name = acc.resolve_field(row, *index)?;
                let excluded = path_segments(paths).ok_or_else(|| CompileError::unsupported(&project.expr))?;
                for path in excluded {
                    exclusions.insert(format!("{}.{}", name, path), json!(0));
                }
                items.insert(alias.to_string(), JsonValue::String(format!("${}", name)));
                plain = false;
            }
            expr => {
                let value = ExpressionTranslator::new(acc, row, blobs).translate_required(expr)?;
                items.insert(alias.to_string(), value);
                plain = false;
            }
        }
    }

    if items.is_empty() {
        return Ok(());
    }
    if !items.contains_key("_id") {
        items.insert("_id".to_string(), json!(0));
    }

    if !exclusions.is_empty() {
        acc.add_stage(StageKind::Project, None, json!({ "$project": exclusions }));
    }
    let direct = (plain && unwinds.is_empty()).then(|| JsonValue::Object(items.clone()));
    acc.add_stage(StageKind::Project, direct, json!({ "$project": items }));
    for alias in unwinds {
        acc.add_stage(StageKind::Unwind, None, json!({ "$unwind": format!("${}", alias) }));
    }
    acc.mark_project();
    Ok(())
}
