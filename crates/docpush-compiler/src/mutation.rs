//! INSERT / UPDATE / DELETE lowering

use docpush_ir::{AlgebraNode, DataType, Expr, Field, ModifyOp, NodeKind, Op, Projection, RowMapping, Value};
use docpush_registry as registry;
use serde_json::{json, Map, Value as JsonValue};
use tracing::debug;

use crate::accumulator::{PipelineAccumulator, UpdateForm};
use crate::dynamic;
use crate::error::{CompileError, Result};
use crate::expression::{path_segments, ExpressionTranslator};
use crate::literal::{self, BlobResolver};
use crate::translate::Compiler;

/// Borrowed fields of a `Modify` node
pub(crate) struct ModifyRequest<'n> {
    pub input: &'n AlgebraNode,
    pub entity: &'n str,
    pub mapping: &'n RowMapping,
    pub operation: ModifyOp,
    pub update_columns: &'n [String],
    pub source_expressions: &'n [Expr],
}

/// How one UPDATE assignment is applied
#[derive(Debug)]
enum Assignment {
    /// Plain `$set` of a constant
    Set(JsonValue),
    /// Atomic operator on the previous value (`$inc`, `$mul`, `$min`, `$max`)
    Native { operator: &'static str, value: JsonValue },
    /// Document-model operation on a sub-path of the column
    SubPath {
        operator: &'static str,
        path: String,
        value: JsonValue,
    },
    /// Anything else, evaluated by an update pipeline
    Computed(JsonValue),
}

impl<'a> Compiler<'a> {
    pub(crate) fn translate_modify(&self, acc: &mut PipelineAccumulator, request: ModifyRequest<'_>) -> Result<()> {
        if request.operation == ModifyOp::Merge {
            return Err(merge_unsupported());
        }
        if acc.is_dml() {
            return Err(CompileError::UnsupportedOperation(
                "nested modification".to_string(),
            ));
        }

        let mapping = self.resolve_mapping(request.entity, request.mapping)?;
        let collection = self.collection_name(request.entity);
        acc.begin_dml(request.operation, request.entity, collection, mapping.clone());

        match request.operation {
            ModifyOp::Insert => translate_insert(acc, request.input, &mapping, self.blobs()),
            ModifyOp::Update => {
                self.visit(request.input, acc)?;
                translate_update(
                    acc,
                    &request.input.row_type,
                    request.update_columns,
                    request.source_expressions,
                    &mapping,
                    self.blobs(),
                )
            }
            ModifyOp::Delete => self.visit(request.input, acc),
            ModifyOp::Merge => Err(merge_unsupported()),
        }
    }
}

fn merge_unsupported() -> CompileError {
    CompileError::UnsupportedOperation("MERGE".to_string())
}

fn translate_insert(
    acc: &mut PipelineAccumulator,
    input: &AlgebraNode,
    mapping: &RowMapping,
    blobs: &dyn BlobResolver,
) -> Result<()> {
    match &input.kind {
        NodeKind::Values { tuples } => {
            for tuple in tuples {
                let mut document = Map::new();
                for (position, value) in tuple.iter().enumerate() {
                    let (key, data_type) = column(&input.row_type, mapping, position);
                    document.insert(key, literal::to_native(value, &data_type, blobs)?);
                }
                acc.add_document(JsonValue::Object(document));
            }
            Ok(())
        }
        NodeKind::Project { input: source, projects } => {
            let NodeKind::Values { tuples } = &source.kind else {
                return Err(CompileError::UnsupportedOperation(
                    "INSERT from a computed query".to_string(),
                ));
            };
            for tuple in tuples {
                let document = template(projects, &source.row_type, tuple, mapping, blobs)?;
                acc.add_document(document);
            }
            Ok(())
        }
        NodeKind::Documents { documents } => {
            for source in documents {
                let mut document = Map::new();
                for (name, value) in source {
                    let (key, data_type) = match mapping.fields.iter().find(|f| &f.logical == name) {
                        Some(field) => (field.physical.clone(), field.data_type.clone()),
                        None => (name.clone(), DataType::Unknown),
                    };
                    document.insert(key, literal::to_native(value, &data_type, blobs)?);
                }
                acc.add_document(JsonValue::Object(document));
            }
            Ok(())
        }
        _ => Err(CompileError::UnsupportedOperation(
            "INSERT source must be VALUES, a parameter row or documents".to_string(),
        )),
    }
}

/// Physical key and type for insert column `position`, by name first and
/// by position when the name is not mapped
fn column(row: &[Field], mapping: &RowMapping, position: usize) -> (String, DataType) {
    let named = row
        .get(position)
        .and_then(|f| mapping.fields.iter().find(|m| m.logical == f.name));
    match named.or_else(|| mapping.fields.get(position)) {
        Some(field) => (field.physical.clone(), field.data_type.clone()),
        None => (
            row.get(position)
                .map(|f| f.name.clone())
                .unwrap_or_else(|| position.to_string()),
            DataType::Unknown,
        ),
    }
}

/// One document of literals and placeholders for a parameter row
fn template(
    projects: &[Projection],
    row: &[Field],
    tuple: &[Value],
    mapping: &RowMapping,
    blobs: &dyn BlobResolver,
) -> Result<JsonValue> {
    let mut document = Map::new();
    for project in projects {
        let (key, data_type) = match mapping.fields.iter().find(|f| f.logical == project.alias) {
            Some(field) => (field.physical.clone(), field.data_type.clone()),
            None => (project.alias.clone(), DataType::Unknown),
        };
        let value = template_value(&project.expr, &data_type, row, tuple, blobs)?;
        document.insert(key, value);
    }
    Ok(JsonValue::Object(document))
}

fn template_value(
    expr: &Expr,
    data_type: &DataType,
    row: &[Field],
    tuple: &[Value],
    blobs: &dyn BlobResolver,
) -> Result<JsonValue> {
    match expr {
        Expr::Literal { value, .. } => literal::to_native(value, data_type, blobs),
        Expr::DynamicParam { id, .. } => Ok(dynamic::placeholder(*id)),
        Expr::FieldRef { index } => {
            let value = tuple.get(*index).ok_or_else(|| {
                CompileError::InvalidFieldReference(format!("${} in a row of {} values", index, row.len()))
            })?;
            literal::to_native(value, data_type, blobs)
        }
        Expr::Call { op: Op::Cast, operands } if operands.len() == 1 => {
            template_value(&operands[0], data_type, row, tuple, blobs)
        }
        Expr::Call {
            op: Op::ArrayConstructor,
            operands,
        } => Ok(JsonValue::Array(
            operands
                .iter()
                .map(|o| template_value(o, data_type.component(), row, tuple, blobs))
                .collect::<Result<Vec<_>>>()?,
        )),
        _ => Err(CompileError::unsupported(expr)),
    }
}

fn translate_update(
    acc: &mut PipelineAccumulator,
    row: &[Field],
    columns: &[String],
    sources: &[Expr],
    mapping: &RowMapping,
    blobs: &dyn BlobResolver,
) -> Result<()> {
    if columns.len() != sources.len() {
        return Err(CompileError::UnsupportedOperation(format!(
            "{} update columns for {} source expressions",
            columns.len(),
            sources.len()
        )));
    }

    let mut assignments = Vec::with_capacity(columns.len());
    for (column, source) in columns.iter().zip(sources) {
        let physical = mapping.physical_name(column).unwrap_or(column.as_str()).to_string();
        let data_type = mapping
            .fields
            .iter()
            .find(|f| &f.logical == column)
            .map(|f| f.data_type.clone())
            .unwrap_or(DataType::Unknown);
        let assignment = classify(acc, row, column, &physical, &data_type, source, blobs)?;
        debug!(column = %column, ?assignment, "classified assignment");
        assignments.push((physical, assignment));
    }

    let computed = assignments
        .iter()
        .any(|(_, a)| matches!(a, Assignment::Computed(_)));
    if computed {
        acc.set_update_form(UpdateForm::Pipeline);
        acc.add_document(pipeline_update(assignments)?);
    } else {
        acc.add_document(document_update(assignments));
    }
    Ok(())
}

fn classify(
    acc: &mut PipelineAccumulator,
    row: &[Field],
    column: &str,
    physical: &str,
    data_type: &DataType,
    source: &Expr,
    blobs: &dyn BlobResolver,
) -> Result<Assignment> {
    if let Some(value) = constant(source, data_type, blobs)? {
        return Ok(Assignment::Set(value));
    }

    let is_self = |expr: &Expr| match expr {
        Expr::FieldRef { index } => row.get(*index).is_some_and(|f| f.name == column),
        _ => false,
    };

    if let Expr::Call { op, operands } = source {
        match (op, operands.as_slice()) {
            (Op::Plus | Op::Times | Op::Min | Op::Max, [left, right]) => {
                let other = if is_self(left) {
                    Some(right)
                } else if is_self(right) {
                    Some(left)
                } else {
                    None
                };
                if let (Some(other), Some(operator)) = (other, registry::update_operator(*op)) {
                    if let Some(value) = constant(other, data_type, blobs)? {
                        return Ok(Assignment::Native { operator, value });
                    }
                }
            }
            (Op::Minus, [left, Expr::Literal { value, .. }]) if is_self(left) => {
                if let Some(negated) = negate_number(value) {
                    return Ok(Assignment::Native {
                        operator: "$inc",
                        value: negated,
                    });
                }
            }
            (
                Op::DocUpdateReplace | Op::DocUpdateAdd | Op::DocUpdateRemove | Op::DocUpdateRename,
                [target, path, rest @ ..],
            ) if is_self(target) => {
                return sub_path(*op, physical, source, path, rest, blobs);
            }
            _ => {}
        }
    }

    let value = ExpressionTranslator::new(acc, row, blobs).translate_required(source)?;
    Ok(Assignment::Computed(value))
}

fn sub_path(
    op: Op,
    physical: &str,
    source: &Expr,
    path: &Expr,
    rest: &[Expr],
    blobs: &dyn BlobResolver,
) -> Result<Assignment> {
    let segments = path_segments(path).ok_or_else(|| CompileError::unsupported(source))?;
    let operator = registry::sub_path_operator(op).ok_or_else(|| CompileError::unsupported(source))?;
    let full = std::iter::once(physical.to_string())
        .chain(segments.iter().cloned())
        .collect::<Vec<_>>()
        .join(".");

    let value = match op {
        Op::DocUpdateRemove => JsonValue::String(String::new()),
        Op::DocUpdateRename => {
            let Some(Expr::Literal { value: Value::String(name), .. }) = rest.first() else {
                return Err(CompileError::unsupported(source));
            };
            // Renamed within the same parent document
            let parent = full.rsplit_once('.').map(|(p, _)| p).unwrap_or(physical);
            JsonValue::String(format!("{}.{}", parent, name))
        }
        _ => {
            let operand = rest.first().ok_or_else(|| CompileError::unsupported(source))?;
            constant(operand, &DataType::Unknown, blobs)?.ok_or_else(|| CompileError::unsupported(source))?
        }
    };
    Ok(Assignment::SubPath {
        operator,
        path: full,
        value,
    })
}

/// Native value of a literal, parameter or array of those
fn constant(expr: &Expr, data_type: &DataType, blobs: &dyn BlobResolver) -> Result<Option<JsonValue>> {
    match expr {
        Expr::Literal { value, .. } => Ok(Some(literal::to_native(value, data_type, blobs)?)),
        Expr::DynamicParam { id, .. } => Ok(Some(dynamic::placeholder(*id))),
        Expr::Call { op: Op::Cast, operands } if operands.len() == 1 => constant(&operands[0], data_type, blobs),
        Expr::Call {
            op: Op::ArrayConstructor,
            operands,
        } => {
            let mut items = Vec::with_capacity(operands.len());
            for operand in operands {
                match constant(operand, data_type.component(), blobs)? {
                    Some(item) => items.push(item),
                    None => return Ok(None),
                }
            }
            Ok(Some(JsonValue::Array(items)))
        }
        _ => Ok(None),
    }
}

fn negate_number(value: &Value) -> Option<JsonValue> {
    match value {
        Value::Int(i) => i.checked_neg().map(JsonValue::from),
        Value::Float(f) => serde_json::Number::from_f64(-f).map(JsonValue::Number),
        _ => None,
    }
}

/// `{"$set": {...}, "$inc": {...}}` grouped by operator, in first-use order
fn document_update(assignments: Vec<(String, Assignment)>) -> JsonValue {
    let mut update: Map<String, JsonValue> = Map::new();
    let mut put = |operator: &str, key: String, value: JsonValue| {
        if let JsonValue::Object(fields) = update
            .entry(operator.to_string())
            .or_insert_with(|| JsonValue::Object(Map::new()))
        {
            fields.insert(key, value);
        }
    };

    for (physical, assignment) in assignments {
        match assignment {
            Assignment::Set(value) | Assignment::Computed(value) => put("$set", physical, value),
            Assignment::Native { operator, value } => put(operator, physical, value),
            Assignment::SubPath { operator, path, value } => put(operator, path, value),
        }
    }
    JsonValue::Object(update)
}

/// Single `$set` stage of an update pipeline
fn pipeline_update(assignments: Vec<(String, Assignment)>) -> Result<JsonValue> {
    let mut set = Map::new();
    for (physical, assignment) in assignments {
        let previous = format!("${}", physical);
        let value = match assignment {
            Assignment::Set(value) => json!({ "$literal": value }),
            Assignment::Computed(value) => value,
            Assignment::Native { operator, value } => {
                let expression = match operator {
                    "$inc" => "$add",
                    "$mul" => "$multiply",
                    other => other,
                };
                json!({ expression: [previous, value] })
            }
            Assignment::SubPath { path, .. } => {
                return Err(CompileError::UnsupportedOperation(format!(
                    "sub-path update of '{}' combined with computed assignments",
                    path
                )));
            }
        };
        set.insert(physical, value);
    }
    Ok(json!({ "$set": set }))
}
