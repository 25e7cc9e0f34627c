//! Scalar and boolean expressions shared by predicates, projections and
//! mutation source lists.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::types::DataType;

/// Expression types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Expr {
    FieldRef { index: usize },
    Literal { value: Value, data_type: DataType },
    DynamicParam { id: u64, data_type: DataType },
    Call { op: Op, operands: Vec<Expr> },
}

/// Closed operator set understood by the compiler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Op {
    // Comparison
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    // Logical
    And,
    Or,
    Not,
    // Null and truth tests
    IsNull,
    IsNotNull,
    IsTrue,
    IsNotTrue,
    IsFalse,
    IsNotFalse,
    // String
    Like,
    CharLength,
    Substring,
    Upper,
    Lower,
    Concat,
    // Arithmetic
    Plus,
    Minus,
    Times,
    Divide,
    Mod,
    UnaryMinus,
    Sign,
    /// Scalar two-argument minimum (LEAST)
    Min,
    /// Scalar two-argument maximum (GREATEST)
    Max,
    // Misc
    Case,
    Cast,
    ArrayConstructor,
    /// 1-based array element or document key access
    Item,
    // Document model
    DocValue,
    DocSize,
    DocType,
    DocRegex,
    DocExists,
    DocElemMatch,
    DocSlice,
    DocExclude,
    DocUnwind,
    DocUpdateReplace,
    DocUpdateAdd,
    DocUpdateRemove,
    DocUpdateRename,
}

impl Op {
    /// Mirror of a comparison when its operands are swapped
    pub fn mirror(self) -> Option<Op> {
        match self {
            Op::Eq => Some(Op::Eq),
            Op::Ne => Some(Op::Ne),
            Op::Lt => Some(Op::Gt),
            Op::Le => Some(Op::Ge),
            Op::Gt => Some(Op::Lt),
            Op::Ge => Some(Op::Le),
            _ => None,
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(self, Op::Eq | Op::Ne | Op::Lt | Op::Le | Op::Gt | Op::Ge)
    }
}

/// Literal payloads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Decimal { decimal: String },
    String(String),
    Bytes { bytes: Vec<u8> },
    Date { date: String },           // ISO format
    Time { time: String },           // ISO format
    Timestamp { timestamp: String }, // ISO format
    Array(Vec<Value>),
    Document(BTreeMap<String, Value>),
}

impl Value {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl Expr {
    pub fn field(index: usize) -> Self {
        Expr::FieldRef { index }
    }

    pub fn literal(value: Value, data_type: DataType) -> Self {
        Expr::Literal { value, data_type }
    }

    pub fn int(i: i64) -> Self {
        Expr::literal(Value::Int(i), DataType::Int32)
    }

    pub fn string(s: impl Into<String>) -> Self {
        Expr::literal(Value::String(s.into()), DataType::Varchar(None))
    }

    pub fn boolean(b: bool) -> Self {
        Expr::literal(Value::Bool(b), DataType::Bool)
    }

    pub fn null() -> Self {
        Expr::literal(Value::Null, DataType::Null)
    }

    pub fn param(id: u64, data_type: DataType) -> Self {
        Expr::DynamicParam { id, data_type }
    }

    pub fn call(op: Op, operands: Vec<Expr>) -> Self {
        Expr::Call { op, operands }
    }

    pub fn binary(op: Op, left: Expr, right: Expr) -> Self {
        Expr::call(op, vec![left, right])
    }

    pub fn unary(op: Op, operand: Expr) -> Self {
        Expr::call(op, vec![operand])
    }

    pub fn and(operands: Vec<Expr>) -> Self {
        Expr::call(Op::And, operands)
    }

    pub fn or(operands: Vec<Expr>) -> Self {
        Expr::call(Op::Or, operands)
    }

    pub fn not(operand: Expr) -> Self {
        Expr::unary(Op::Not, operand)
    }

    /// Array constructor of string literals, used for document paths
    pub fn path(segments: &[&str]) -> Self {
        Expr::call(
            Op::ArrayConstructor,
            segments.iter().map(|s| Expr::string(*s)).collect(),
        )
    }

    pub fn op(&self) -> Option<Op> {
        match self {
            Expr::Call { op, .. } => Some(*op),
            _ => None,
        }
    }

    pub fn operands(&self) -> &[Expr] {
        match self {
            Expr::Call { operands, .. } => operands,
            _ => &[],
        }
    }

    pub fn is_call(&self, expected: Op) -> bool {
        self.op() == Some(expected)
    }

    /// Flattens nested ANDs into their conjuncts
    pub fn conjunctions(&self) -> Vec<&Expr> {
        let mut out = Vec::new();
        collect_flattened(self, Op::And, &mut out);
        out
    }

    /// Flattens nested ORs into their disjuncts
    pub fn disjunctions(&self) -> Vec<&Expr> {
        let mut out = Vec::new();
        collect_flattened(self, Op::Or, &mut out);
        out
    }
}

fn collect_flattened<'a>(expr: &'a Expr, op: Op, out: &mut Vec<&'a Expr>) {
    match expr {
        Expr::Call { op: call_op, operands } if *call_op == op => {
            for operand in operands {
                collect_flattened(operand, op, out);
            }
        }
        other => out.push(other),
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::FieldRef { index } => write!(f, "${}", index),
            Expr::Literal { value, .. } => write!(f, "{:?}", value),
            Expr::DynamicParam { id, .. } => write!(f, "?{}", id),
            Expr::Call { op, operands } => {
                write!(f, "{:?}(", op)?;
                for (i, operand) in operands.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", operand)?;
                }
                write!(f, ")")
            }
        }
    }
}
