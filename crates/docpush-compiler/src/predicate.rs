//! Predicate translation
//!
//! Boolean [`Expr`] trees become a [`ConditionMap`] and from there one filter
//! document. Disjuncts and conjuncts are translated in isolated maps and
//! merged; `NOT` is pushed down to the leaves where the operator table allows
//! it and wrapped otherwise. Operands the filter language cannot evaluate
//! inline are materialized as helper fields first. Mutation filters have no
//! pipeline to carry helpers, so they evaluate such leaves under `$expr`.

use docpush_ir::{Expr, Field, Op, Value};
use docpush_registry as registry;
use serde_json::{json, Map, Value as JsonValue};
use tracing::warn;

use crate::accumulator::PipelineAccumulator;
use crate::condition::{ConditionMap, AND, EXPR, OR};
use crate::dynamic;
use crate::error::{CompileError, Result};
use crate::expression::{doc_path, join_path, path_segments, ExpressionTranslator};
use crate::literal::{self, BlobResolver};

pub struct PredicateTranslator<'a> {
    acc: &'a mut PipelineAccumulator,
    row: &'a [Field],
    blobs: &'a dyn BlobResolver,
}

impl<'a> PredicateTranslator<'a> {
    pub fn new(acc: &'a mut PipelineAccumulator, row: &'a [Field], blobs: &'a dyn BlobResolver) -> Self {
        Self { acc, row, blobs }
    }

    /// Translate `condition` and add it to the accumulator as a filter
    pub fn translate_filter(mut self, condition: &Expr) -> Result<()> {
        let map = self.translate(condition)?;
        self.acc.add_filter(map.as_condition_document());
        Ok(())
    }

    pub fn translate(&mut self, expr: &Expr) -> Result<ConditionMap> {
        let disjuncts = expr.disjunctions();
        match disjuncts.as_slice() {
            [] => return Ok(ConditionMap::single(None, EXPR, JsonValue::Bool(false))),
            [single] => return self.translate_conjunction(single),
            _ => {}
        }

        let mut alternatives = ConditionMap::new();
        for disjunct in disjuncts {
            let alternative = self.translate_conjunction(disjunct)?;
            if alternative.is_empty() {
                // One alternative is always true
                return Ok(ConditionMap::new());
            }
            alternatives.merge_or(alternative);
        }
        Ok(alternatives)
    }

    fn translate_conjunction(&mut self, expr: &Expr) -> Result<ConditionMap> {
        let mut map = ConditionMap::new();
        for conjunct in expr.conjunctions() {
            let part = self.translate_node(conjunct)?;
            map.merge_and(part);
        }
        Ok(map)
    }

    fn translate_node(&mut self, expr: &Expr) -> Result<ConditionMap> {
        match expr {
            Expr::Literal { value: Value::Bool(true), .. } => Ok(ConditionMap::new()),
            Expr::Literal { value: Value::Bool(false) | Value::Null, .. } => {
                Ok(ConditionMap::single(None, EXPR, JsonValue::Bool(false)))
            }
            Expr::Literal { .. } => Err(CompileError::unsupported(expr)),
            Expr::DynamicParam { id, .. } => Ok(ConditionMap::single(None, EXPR, dynamic::placeholder(*id))),
            Expr::FieldRef { .. } => {
                let key = self.key_of(expr)?.ok_or_else(|| CompileError::unsupported(expr))?;
                Ok(ConditionMap::single(None, key, JsonValue::Bool(true)))
            }
            Expr::Call { op, operands } => self.translate_call(expr, *op, operands),
        }
    }

    fn translate_call(&mut self, expr: &Expr, op: Op, operands: &[Expr]) -> Result<ConditionMap> {
        match op {
            Op::And => self.translate_conjunction(expr),
            Op::Or => self.translate(expr),
            Op::Not => {
                let operand = operands.first().ok_or_else(|| CompileError::unsupported(expr))?;
                self.translate_not(operand)
            }
            Op::Eq | Op::Ne | Op::Lt | Op::Le | Op::Gt | Op::Ge => match operands {
                [left, right] => self.translate_binary(expr, op, left, right),
                _ => Err(CompileError::unsupported(expr)),
            },
            Op::IsNull | Op::IsNotNull | Op::IsTrue | Op::IsNotTrue | Op::IsFalse | Op::IsNotFalse => {
                self.translate_test(expr, op, operands)
            }
            Op::Like => self.translate_like(expr, operands),
            Op::DocSize => self.translate_size(expr, operands),
            Op::DocType => self.translate_type(expr, operands),
            Op::DocRegex => self.translate_regex(expr, operands),
            Op::DocExists => self.translate_exists(expr, operands),
            Op::DocElemMatch => self.translate_elem_match(expr, operands),
            Op::Cast => match operands {
                [inner] => self.translate_node(inner),
                _ => Err(CompileError::unsupported(expr)),
            },
            Op::DocValue | Op::Item => {
                let key = self.key_of(expr)?.ok_or_else(|| CompileError::unsupported(expr))?;
                Ok(ConditionMap::single(None, key, JsonValue::Bool(true)))
            }
            _ => Err(CompileError::unsupported(expr)),
        }
    }

    fn translate_not(&mut self, operand: &Expr) -> Result<ConditionMap> {
        let inner = self.translate(operand)?;
        if inner.is_empty() {
            return Ok(ConditionMap::single(None, EXPR, JsonValue::Bool(false)));
        }
        match inner.negate() {
            Some(negated) => Ok(negated),
            None => {
                warn!(condition = %operand, "negation push-down failed, wrapping condition");
                Ok(inner.wrap_negation())
            }
        }
    }

    /// Comparison leaf, trying each supported operand shape in turn
    fn translate_binary(&mut self, expr: &Expr, op: Op, left: &Expr, right: &Expr) -> Result<ConditionMap> {
        let mirror = op.mirror().unwrap_or(op);

        if let Some(map) = self.try_constant(op, left, right)? {
            return Ok(map);
        }
        if let Some(map) = self.try_constant(mirror, right, left)? {
            return Ok(map);
        }
        if let Some(map) = self.try_array(op, left, right)? {
            return Ok(map);
        }
        if let Some(map) = self.try_array(mirror, right, left)? {
            return Ok(map);
        }
        if let (Expr::FieldRef { index: a }, Expr::FieldRef { index: b }) = (strip_cast(left), strip_cast(right)) {
            let a = self.acc.resolve_field(self.row, *a)?;
            let b = self.acc.resolve_field(self.row, *b)?;
            let key = comparison_key(op, expr)?.expression_key;
            return Ok(ConditionMap::single(
                None,
                EXPR,
                json!({ key: [format!("${}", a), format!("${}", b)] }),
            ));
        }
        if let Some(map) = self.try_computed(op, left, right)? {
            return Ok(map);
        }
        if let Some(map) = self.try_computed(mirror, right, left)? {
            return Ok(map);
        }
        // Field against computed value, or anything inside a mutation
        self.inline(expr)
    }

    /// `field <op> literal|param`
    fn try_constant(&mut self, op: Op, left: &Expr, right: &Expr) -> Result<Option<ConditionMap>> {
        let Some(value) = self.value_of(right)? else {
            return Ok(None);
        };
        let Some(key) = self.key_of(left)? else {
            return Ok(None);
        };
        Ok(Some(self.comparison(op, key, value)?))
    }

    /// `field <op> [a, b, ...]`
    fn try_array(&mut self, op: Op, left: &Expr, right: &Expr) -> Result<Option<ConditionMap>> {
        if !right.is_call(Op::ArrayConstructor) || !matches!(strip_cast(left), Expr::FieldRef { .. }) {
            return Ok(None);
        }
        let mut items = Vec::new();
        for operand in right.operands() {
            match self.value_of(operand)? {
                Some(value) => items.push(value),
                None => return Ok(None),
            }
        }
        let Some(key) = self.key_of(left)? else {
            return Ok(None);
        };
        Ok(Some(self.comparison(op, key, JsonValue::Array(items))?))
    }

    /// `computed <op> literal|param` through a helper field
    fn try_computed(&mut self, op: Op, left: &Expr, right: &Expr) -> Result<Option<ConditionMap>> {
        if self.acc.is_dml() || !matches!(left, Expr::Call { .. }) {
            return Ok(None);
        }
        let Some(value) = self.value_of(right)? else {
            return Ok(None);
        };
        let helper = self.helper(left)?;
        Ok(Some(self.comparison(op, helper, value)?))
    }

    fn comparison(&self, op: Op, key: String, value: JsonValue) -> Result<ConditionMap> {
        let comparison = registry::comparison(op)
            .ok_or_else(|| CompileError::UnsupportedExpression(format!("{:?} is not a comparison", op)))?;
        // Objects go through $eq so they are never read as operator documents
        if comparison.implicit && !value.is_object() {
            Ok(ConditionMap::single(None, key, value))
        } else {
            Ok(ConditionMap::single(Some(comparison.filter_key), key, value))
        }
    }

    /// IS [NOT] NULL / TRUE / FALSE
    fn translate_test(&mut self, expr: &Expr, op: Op, operands: &[Expr]) -> Result<ConditionMap> {
        let [operand] = operands else {
            return Err(CompileError::unsupported(expr));
        };
        let Some(key) = self.key_or_helper(operand)? else {
            return self.inline(expr);
        };
        let map = match op {
            Op::IsNull => ConditionMap::single(None, key, JsonValue::Null),
            Op::IsNotNull => ConditionMap::single(Some("$ne"), key, JsonValue::Null),
            Op::IsTrue => ConditionMap::single(None, key, JsonValue::Bool(true)),
            Op::IsNotTrue => ConditionMap::single(Some("$ne"), key, JsonValue::Bool(true)),
            Op::IsFalse => ConditionMap::single(None, key, JsonValue::Bool(false)),
            Op::IsNotFalse => ConditionMap::single(Some("$ne"), key, JsonValue::Bool(false)),
            _ => return Err(CompileError::unsupported(expr)),
        };
        Ok(map)
    }

    fn translate_like(&mut self, expr: &Expr, operands: &[Expr]) -> Result<ConditionMap> {
        let [input, pattern] = operands else {
            return Err(CompileError::unsupported(expr));
        };
        let regex = match strip_cast(pattern) {
            Expr::Literal { value: Value::String(pattern), .. } => like_to_regex(pattern),
            Expr::DynamicParam { id, .. } => dynamic::regex_placeholder(*id),
            _ => return Err(CompileError::unsupported(expr)),
        };
        let Some(key) = self.key_or_helper(input)? else {
            return self.inline(expr);
        };
        Ok(ConditionMap::single(None, key, regex))
    }

    fn translate_size(&mut self, expr: &Expr, operands: &[Expr]) -> Result<ConditionMap> {
        let [field, size] = operands else {
            return Err(CompileError::unsupported(expr));
        };
        let value = self.value_of(size)?.ok_or_else(|| CompileError::unsupported(expr))?;
        let key = self.key_of(field)?.ok_or_else(|| CompileError::unsupported(expr))?;
        Ok(ConditionMap::single(None, key, json!({ "$size": value })))
    }

    fn translate_type(&mut self, expr: &Expr, operands: &[Expr]) -> Result<ConditionMap> {
        let [field, types] = operands else {
            return Err(CompileError::unsupported(expr));
        };
        let type_operands: Vec<&Expr> = match types {
            Expr::Call { op: Op::ArrayConstructor, operands } => operands.iter().collect(),
            single => vec![single],
        };
        let mut numbers = Vec::new();
        for operand in type_operands {
            let number = match operand {
                Expr::Literal { value: Value::Int(n), .. } => *n,
                Expr::Literal { value: Value::String(name), .. } => registry::type_number(name)
                    .map(i64::from)
                    .ok_or_else(|| CompileError::UnsupportedExpression(format!("unknown type alias '{}'", name)))?,
                _ => return Err(CompileError::unsupported(expr)),
            };
            numbers.push(json!(number));
        }
        let key = self.key_of(field)?.ok_or_else(|| CompileError::unsupported(expr))?;
        Ok(ConditionMap::single(Some("$type"), key, JsonValue::Array(numbers)))
    }

    /// `DocRegex(field, pattern, insensitive, multiline, extended, dotall)`
    fn translate_regex(&mut self, expr: &Expr, operands: &[Expr]) -> Result<ConditionMap> {
        let (Some(field), Some(Expr::Literal { value: Value::String(pattern), .. })) = (operands.first(), operands.get(1))
        else {
            return Err(CompileError::unsupported(expr));
        };
        let flag = |position: usize| {
            matches!(
                operands.get(position),
                Some(Expr::Literal { value: Value::Bool(true), .. })
            )
        };
        let options: String = [(2, 'i'), (3, 'm'), (4, 'x'), (5, 's')]
            .iter()
            .filter(|(position, _)| flag(*position))
            .map(|(_, letter)| *letter)
            .collect();

        let key = self.key_of(field)?.ok_or_else(|| CompileError::unsupported(expr))?;
        Ok(ConditionMap::single(
            None,
            key,
            json!({ "$regex": pattern, "$options": options }),
        ))
    }

    fn translate_exists(&mut self, expr: &Expr, operands: &[Expr]) -> Result<ConditionMap> {
        let (field, segments) = match operands {
            [field] => (field, Vec::new()),
            [field, path] => (field, path_segments(path).ok_or_else(|| CompileError::unsupported(expr))?),
            _ => return Err(CompileError::unsupported(expr)),
        };
        let key = self.key_of(field)?.ok_or_else(|| CompileError::unsupported(expr))?;
        Ok(ConditionMap::single(
            Some("$exists"),
            join_path(&key, &segments),
            JsonValue::Bool(true),
        ))
    }

    /// `DocElemMatch(field, condition)`: conditions on the field itself apply
    /// to each element, `field.sub` conditions to element members.
    fn translate_elem_match(&mut self, expr: &Expr, operands: &[Expr]) -> Result<ConditionMap> {
        let [field, condition] = operands else {
            return Err(CompileError::unsupported(expr));
        };
        let key = self.key_of(field)?.ok_or_else(|| CompileError::unsupported(expr))?;
        let inner = self.translate(condition)?.as_condition_document();
        let element = element_condition(&inner, &key);
        Ok(ConditionMap::single(Some("$elemMatch"), key, element))
    }

    /// Filter key for a field-like operand, `None` for anything computed
    fn key_of(&mut self, expr: &Expr) -> Result<Option<String>> {
        match expr {
            Expr::FieldRef { index } => Ok(Some(self.acc.resolve_field(self.row, *index)?)),
            Expr::Call { op: Op::Cast, operands } if operands.len() == 1 => self.key_of(&operands[0]),
            Expr::Call { op: Op::Item, operands } => match operands.as_slice() {
                [Expr::FieldRef { index }, Expr::Literal { value: Value::Int(k), .. }] => {
                    let name = self.acc.resolve_field(self.row, *index)?;
                    // 1-based to 0-based
                    Ok(Some(format!("{}.{}", name, k - 1)))
                }
                [Expr::FieldRef { index }, Expr::Literal { value: Value::String(key), .. }] => {
                    let name = self.acc.resolve_field(self.row, *index)?;
                    Ok(Some(format!("{}.{}", name, key)))
                }
                [Expr::FieldRef { .. }, Expr::DynamicParam { .. }] if !self.acc.is_dml() => {
                    Ok(Some(self.helper(expr)?))
                }
                _ => Ok(None),
            },
            Expr::Call { op: Op::DocValue, operands } => match doc_path(operands) {
                Some((index, path)) => {
                    let name = self.acc.resolve_field(self.row, index)?;
                    Ok(Some(join_path(&name, &path)))
                }
                None => Ok(None),
            },
            _ => Ok(None),
        }
    }

    /// Filter key for `expr`, through a helper when computed. `None` inside
    /// a mutation, where the caller evaluates the whole leaf inline.
    fn key_or_helper(&mut self, expr: &Expr) -> Result<Option<String>> {
        match self.key_of(expr)? {
            Some(key) => Ok(Some(key)),
            None if self.acc.is_dml() => Ok(None),
            None => self.helper(expr).map(Some),
        }
    }

    /// Materialize a computed operand as a helper field
    fn helper(&mut self, expr: &Expr) -> Result<String> {
        if self.acc.is_dml() {
            return Err(CompileError::UnsupportedExpression(format!(
                "{} needs a helper field inside a modification",
                expr
            )));
        }
        let value = ExpressionTranslator::new(self.acc, self.row, self.blobs).translate_required(expr)?;
        Ok(self.acc.add_helper(value))
    }

    /// Whole leaf as an aggregation expression under `$expr`
    fn inline(&mut self, expr: &Expr) -> Result<ConditionMap> {
        let value = ExpressionTranslator::new(self.acc, self.row, self.blobs).translate_required(expr)?;
        Ok(ConditionMap::single(None, EXPR, value))
    }

    /// Native value of a literal or parameter operand
    fn value_of(&self, expr: &Expr) -> Result<Option<JsonValue>> {
        match expr {
            Expr::Literal { value, data_type } => Ok(Some(literal::to_native(value, data_type, self.blobs)?)),
            Expr::DynamicParam { id, .. } => Ok(Some(dynamic::placeholder(*id))),
            Expr::Call { op: Op::Cast, operands } if operands.len() == 1 => self.value_of(&operands[0]),
            _ => Ok(None),
        }
    }
}

fn strip_cast(expr: &Expr) -> &Expr {
    match expr {
        Expr::Call { op: Op::Cast, operands } if operands.len() == 1 => strip_cast(&operands[0]),
        other => other,
    }
}

fn comparison_key(op: Op, expr: &Expr) -> Result<&'static registry::ComparisonOperator> {
    registry::comparison(op).ok_or_else(|| CompileError::unsupported(expr))
}

/// Rewrite a condition document on `key` into an `$elemMatch` body
fn element_condition(doc: &JsonValue, key: &str) -> JsonValue {
    let Some(obj) = doc.as_object() else {
        return doc.clone();
    };
    let prefix = format!("{}.", key);
    let mut out = Map::new();

    for (name, condition) in obj {
        if name == key {
            match condition.as_object() {
                Some(ops) if ops.keys().all(|k| k.starts_with('$')) => {
                    out.extend(ops.iter().map(|(k, v)| (k.clone(), v.clone())));
                }
                _ => {
                    out.insert("$eq".to_string(), condition.clone());
                }
            }
        } else if let Some(member) = name.strip_prefix(&prefix) {
            out.insert(member.to_string(), condition.clone());
        } else if name == AND || name == OR {
            let members = condition
                .as_array()
                .map(|items| items.iter().map(|i| element_condition(i, key)).collect())
                .unwrap_or_default();
            out.insert(name.clone(), JsonValue::Array(members));
        } else {
            out.insert(name.clone(), condition.clone());
        }
    }
    JsonValue::Object(out)
}

/// SQL LIKE pattern as a case-insensitive regex condition
pub fn like_to_regex(pattern: &str) -> JsonValue {
    let mut regex = String::with_capacity(pattern.len() + 4);
    if !pattern.starts_with('%') {
        regex.push('^');
    }
    for c in pattern.chars() {
        match c {
            '%' => regex.push_str(".*"),
            '_' => regex.push('.'),
            '\\' | '.' | '^' | '$' | '*' | '+' | '?' | '(' | ')' | '[' | ']' | '{' | '}' | '|' => {
                regex.push('\\');
                regex.push(c);
            }
            _ => regex.push(c),
        }
    }
    if !pattern.ends_with('%') {
        regex.push('$');
    }
    json!({ "$regex": regex, "$options": "i" })
}
