//! Scalar expression code generation
//!
//! Lowers [`Expr`] trees to native aggregation-expression fragments. Field
//! references resolve through the accumulator, so the same visitor serves
//! projections (logical names) and update pipelines (physical names).

use docpush_ir::{Expr, Field, Op, Value};
use docpush_registry as registry;
use serde_json::{json, Value as JsonValue};

use crate::accumulator::PipelineAccumulator;
use crate::dynamic;
use crate::error::{CompileError, Result};
use crate::literal::{self, BlobResolver};
use crate::predicate::like_to_regex;

pub struct ExpressionTranslator<'a> {
    acc: &'a mut PipelineAccumulator,
    row: &'a [Field],
    blobs: &'a dyn BlobResolver,
}

impl<'a> ExpressionTranslator<'a> {
    pub fn new(acc: &'a mut PipelineAccumulator, row: &'a [Field], blobs: &'a dyn BlobResolver) -> Self {
        Self { acc, row, blobs }
    }

    /// Translate an expression that must produce a value
    pub fn translate_required(&mut self, expr: &Expr) -> Result<JsonValue> {
        self.translate(expr)?
            .ok_or_else(|| CompileError::unsupported(expr))
    }

    /// Translate an expression. `None` marks document-model forms that the
    /// projection lowers into separate stages instead of a value.
    pub fn translate(&mut self, expr: &Expr) -> Result<Option<JsonValue>> {
        let value = match expr {
            Expr::FieldRef { index } => {
                let name = self.acc.resolve_field(self.row, *index)?;
                JsonValue::String(format!("${}", name))
            }
            Expr::Literal { value: Value::Null, .. } => JsonValue::Null,
            Expr::Literal { value, data_type } => {
                json!({ "$literal": literal::to_native(value, data_type, self.blobs)? })
            }
            Expr::DynamicParam { id, .. } => dynamic::placeholder(*id),
            Expr::Call { op, operands } => return self.translate_call(expr, *op, operands),
        };
        Ok(Some(value))
    }

    fn translate_call(&mut self, expr: &Expr, op: Op, operands: &[Expr]) -> Result<Option<JsonValue>> {
        if let Some(comparison) = registry::comparison(op) {
            let args = self.translate_all(operands)?;
            return Ok(Some(json!({ comparison.expression_key: args })));
        }
        if let Some(key) = registry::arithmetic(op) {
            let args = self.translate_all(operands)?;
            return Ok(Some(json!({ key: args })));
        }

        let value = match op {
            Op::And | Op::Or | Op::Not | Op::Concat | Op::Min | Op::Max | Op::DocSlice => {
                let key = registry::function(op).ok_or_else(|| CompileError::unsupported(expr))?;
                json!({ key: self.translate_all(operands)? })
            }
            Op::CharLength | Op::Upper | Op::Lower => {
                let key = registry::function(op).ok_or_else(|| CompileError::unsupported(expr))?;
                json!({ key: self.operand(expr, operands, 0)? })
            }
            Op::IsNull => json!({ "$lte": [self.operand(expr, operands, 0)?, null] }),
            Op::IsNotNull => json!({ "$gt": [self.operand(expr, operands, 0)?, null] }),
            Op::IsTrue => json!({ "$eq": [self.operand(expr, operands, 0)?, true] }),
            Op::IsNotTrue => json!({ "$ne": [self.operand(expr, operands, 0)?, true] }),
            Op::IsFalse => json!({ "$eq": [self.operand(expr, operands, 0)?, false] }),
            Op::IsNotFalse => json!({ "$ne": [self.operand(expr, operands, 0)?, false] }),
            Op::UnaryMinus => json!({ "$multiply": [self.operand(expr, operands, 0)?, -1] }),
            Op::Sign => {
                let value = self.operand(expr, operands, 0)?;
                json!({
                    "$switch": {
                        "branches": [
                            { "case": { "$lt": [value, 0] }, "then": -1 },
                            { "case": { "$gt": [value, 0] }, "then": 1 }
                        ],
                        "default": 0
                    }
                })
            }
            Op::Substring => self.translate_substring(expr, operands)?,
            Op::Case => self.translate_case(expr, operands)?,
            Op::Cast => self.operand(expr, operands, 0)?,
            Op::ArrayConstructor => JsonValue::Array(self.translate_all(operands)?),
            Op::Item => self.translate_item(expr, operands)?,
            Op::Like => self.translate_like(expr, operands)?,
            Op::DocValue => {
                let (index, path) = doc_path(operands).ok_or_else(|| CompileError::unsupported(expr))?;
                let name = self.acc.resolve_field(self.row, index)?;
                JsonValue::String(join_path(&format!("${}", name), &path))
            }
            Op::DocSize => json!({ "$size": self.operand(expr, operands, 0)? }),
            Op::DocUnwind | Op::DocExclude => return Ok(None),
            _ => return Err(CompileError::unsupported(expr)),
        };
        Ok(Some(value))
    }

    fn translate_all(&mut self, operands: &[Expr]) -> Result<Vec<JsonValue>> {
        operands.iter().map(|o| self.translate_required(o)).collect()
    }

    fn operand(&mut self, expr: &Expr, operands: &[Expr], position: usize) -> Result<JsonValue> {
        let operand = operands
            .get(position)
            .ok_or_else(|| CompileError::unsupported(expr))?;
        self.translate_required(operand)
    }

    fn translate_substring(&mut self, expr: &Expr, operands: &[Expr]) -> Result<JsonValue> {
        let string = self.operand(expr, operands, 0)?;
        let start = match operands.get(1) {
            Some(Expr::Literal { value: Value::Int(k), .. }) => json!(k - 1),
            Some(other) => json!({ "$subtract": [self.translate_required(other)?, 1] }),
            None => json!(0),
        };
        let length = match operands.get(2) {
            Some(length) => self.translate_required(length)?,
            None => json!({ "$strLenCP": string }),
        };
        Ok(json!({ "$substrCP": [string, start, length] }))
    }

    /// `CASE(a, b, c, d, e)` folds from the end into `cond(a, b, cond(c, d, e))`;
    /// an even operand count ends in a null default.
    fn translate_case(&mut self, expr: &Expr, operands: &[Expr]) -> Result<JsonValue> {
        if operands.len() < 2 {
            return Err(CompileError::unsupported(expr));
        }
        let (pairs, default) = if operands.len() % 2 == 1 {
            let default = self.translate_required(&operands[operands.len() - 1])?;
            (&operands[..operands.len() - 1], default)
        } else {
            (operands, JsonValue::Null)
        };

        let mut folded = default;
        for pair in pairs.chunks(2).rev() {
            let when = self.translate_required(&pair[0])?;
            let then = self.translate_required(&pair[1])?;
            folded = json!({ "$cond": [when, then, folded] });
        }
        Ok(folded)
    }

    fn translate_item(&mut self, expr: &Expr, operands: &[Expr]) -> Result<JsonValue> {
        let [target, index] = operands else {
            return Err(CompileError::unsupported(expr));
        };
        match index {
            Expr::Literal { value: Value::String(key), .. } => {
                let Expr::FieldRef { index: field } = target else {
                    return Err(CompileError::unsupported(expr));
                };
                let name = self.acc.resolve_field(self.row, *field)?;
                Ok(JsonValue::String(format!("${}.{}", name, key)))
            }
            Expr::Literal { value: Value::Int(k), .. } => {
                let array = self.translate_required(target)?;
                Ok(json!({ "$arrayElemAt": [array, k - 1] }))
            }
            other => {
                let array = self.translate_required(target)?;
                let position = self.translate_required(other)?;
                Ok(json!({ "$arrayElemAt": [array, { "$add": [position, -1] }] }))
            }
        }
    }

    fn translate_like(&mut self, expr: &Expr, operands: &[Expr]) -> Result<JsonValue> {
        let [input, Expr::Literal { value: Value::String(pattern), .. }] = operands else {
            return Err(CompileError::unsupported(expr));
        };
        let input = self.translate_required(input)?;
        let regex = like_to_regex(pattern);
        Ok(json!({
            "$regexMatch": {
                "input": input,
                "regex": regex["$regex"],
                "options": regex["$options"]
            }
        }))
    }
}

/// `DocValue(field, ["a", "b"])` as the field index and its path segments
pub(crate) fn doc_path(operands: &[Expr]) -> Option<(usize, Vec<String>)> {
    let [Expr::FieldRef { index }, segments] = operands else {
        return None;
    };
    Some((*index, path_segments(segments)?))
}

/// String segments of an array constructor (or of a single string literal)
pub(crate) fn path_segments(expr: &Expr) -> Option<Vec<String>> {
    match expr {
        Expr::Literal { value: Value::String(s), .. } => Some(vec![s.clone()]),
        Expr::Call { op: Op::ArrayConstructor, operands } => operands
            .iter()
            .map(|o| match o {
                Expr::Literal { value: Value::String(s), .. } => Some(s.clone()),
                _ => None,
            })
            .collect(),
        _ => None,
    }
}

pub(crate) fn join_path(base: &str, segments: &[String]) -> String {
    std::iter::once(base.to_string())
        .chain(segments.iter().cloned())
        .collect::<Vec<_>>()
        .join(".")
}
