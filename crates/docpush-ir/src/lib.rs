//! Algebra Intermediate Representation (IR)
//!
//! Physical operator trees handed over by the optimizer, in a closed,
//! serde-serializable form. All types are deterministically serializable so a
//! plan fingerprint can key caches of compiled pipelines.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

mod expr;
mod mapping;
mod types;

pub use expr::*;
pub use mapping::*;
pub use types::*;

/// Node of the physical algebra tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlgebraNode {
    /// Ordered output fields of this node
    pub row_type: RowType,
    pub kind: NodeKind,
}

/// Operator variants
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum NodeKind {
    Scan {
        entity: String,
        /// Left empty to have the compiler resolve it through the catalog
        #[serde(default)]
        mapping: RowMapping,
    },
    Values {
        tuples: Vec<Vec<Value>>,
    },
    Documents {
        documents: Vec<BTreeMap<String, Value>>,
    },
    Filter {
        input: Box<AlgebraNode>,
        condition: Expr,
    },
    Project {
        input: Box<AlgebraNode>,
        projects: Vec<Projection>,
    },
    Aggregate {
        input: Box<AlgebraNode>,
        group_keys: Vec<usize>,
        agg_calls: Vec<AggCall>,
    },
    Sort {
        input: Box<AlgebraNode>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        collation: Vec<SortKey>,
        #[serde(skip_serializing_if = "Option::is_none")]
        offset: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        fetch: Option<u64>,
    },
    Modify {
        input: Box<AlgebraNode>,
        entity: String,
        #[serde(default)]
        mapping: RowMapping,
        operation: ModifyOp,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        update_columns: Vec<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        source_expressions: Vec<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Projection {
    pub expr: Expr,
    pub alias: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggFunction {
    Count,
    Sum,
    /// SUM that yields zero instead of null over empty input
    Sum0,
    Min,
    Max,
    Avg,
    SingleValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggCall {
    pub func: AggFunction,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<usize>,
    #[serde(default)]
    pub distinct: bool,
    /// Index of a boolean input field filtering the rows fed to this call
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<usize>,
    pub alias: String,
}

impl AggCall {
    pub fn new(func: AggFunction, args: Vec<usize>, alias: impl Into<String>) -> Self {
        Self {
            func,
            args,
            distinct: false,
            filter: None,
            alias: alias.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum NullOrdering {
    #[default]
    Unspecified,
    First,
    Last,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortKey {
    pub field: usize,
    pub direction: Direction,
    #[serde(default)]
    pub nulls: NullOrdering,
}

impl SortKey {
    pub fn asc(field: usize) -> Self {
        Self {
            field,
            direction: Direction::Asc,
            nulls: NullOrdering::Unspecified,
        }
    }

    pub fn desc(field: usize) -> Self {
        Self {
            field,
            direction: Direction::Desc,
            nulls: NullOrdering::Unspecified,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModifyOp {
    Insert,
    Update,
    Delete,
    Merge,
}

impl AlgebraNode {
    /// Calculate fingerprint (SHA-256) for deterministic caching
    pub fn fingerprint(&self) -> String {
        // Plain data with string keys only, so serialization cannot fail
        let json = serde_json::to_string(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(json.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// The single input of this node, if it has one
    pub fn input(&self) -> Option<&AlgebraNode> {
        match &self.kind {
            NodeKind::Scan { .. } | NodeKind::Values { .. } | NodeKind::Documents { .. } => None,
            NodeKind::Filter { input, .. }
            | NodeKind::Project { input, .. }
            | NodeKind::Aggregate { input, .. }
            | NodeKind::Sort { input, .. }
            | NodeKind::Modify { input, .. } => Some(input),
        }
    }

    pub fn field_names(&self) -> Vec<String> {
        field_names(&self.row_type)
    }

    pub fn scan(entity: impl Into<String>, mapping: RowMapping) -> Self {
        AlgebraNode {
            row_type: mapping.row_type(),
            kind: NodeKind::Scan {
                entity: entity.into(),
                mapping,
            },
        }
    }

    pub fn values(row_type: RowType, tuples: Vec<Vec<Value>>) -> Self {
        AlgebraNode {
            row_type,
            kind: NodeKind::Values { tuples },
        }
    }

    pub fn documents(documents: Vec<BTreeMap<String, Value>>) -> Self {
        AlgebraNode {
            row_type: vec![Field::new("d", DataType::Document)],
            kind: NodeKind::Documents { documents },
        }
    }

    pub fn filter(self, condition: Expr) -> Self {
        AlgebraNode {
            row_type: self.row_type.clone(),
            kind: NodeKind::Filter {
                input: Box::new(self),
                condition,
            },
        }
    }

    pub fn project(self, projects: Vec<(Expr, &str)>) -> Self {
        let row_type = projects
            .iter()
            .map(|(expr, alias)| Field::new(*alias, self.infer_type(expr)))
            .collect();
        let projects = projects
            .into_iter()
            .map(|(expr, alias)| Projection {
                expr,
                alias: alias.to_string(),
            })
            .collect();
        AlgebraNode {
            row_type,
            kind: NodeKind::Project {
                input: Box::new(self),
                projects,
            },
        }
    }

    pub fn aggregate(self, group_keys: Vec<usize>, agg_calls: Vec<AggCall>) -> Self {
        let mut row_type: RowType = group_keys
            .iter()
            .filter_map(|k| self.row_type.get(*k).cloned())
            .collect();
        for call in &agg_calls {
            let data_type = match call.func {
                AggFunction::Count => DataType::Int64,
                AggFunction::Avg => DataType::Float64,
                _ => call
                    .args
                    .first()
                    .and_then(|a| self.row_type.get(*a))
                    .map(|f| f.data_type.clone())
                    .unwrap_or(DataType::Unknown),
            };
            row_type.push(Field::new(call.alias.clone(), data_type));
        }
        AlgebraNode {
            row_type,
            kind: NodeKind::Aggregate {
                input: Box::new(self),
                group_keys,
                agg_calls,
            },
        }
    }

    pub fn sort(self, collation: Vec<SortKey>, offset: Option<u64>, fetch: Option<u64>) -> Self {
        AlgebraNode {
            row_type: self.row_type.clone(),
            kind: NodeKind::Sort {
                input: Box::new(self),
                collation,
                offset,
                fetch,
            },
        }
    }

    pub fn modify(
        self,
        entity: impl Into<String>,
        mapping: RowMapping,
        operation: ModifyOp,
        update_columns: Vec<String>,
        source_expressions: Vec<Expr>,
    ) -> Self {
        AlgebraNode {
            row_type: vec![Field::new("ROWCOUNT", DataType::Int64)],
            kind: NodeKind::Modify {
                input: Box::new(self),
                entity: entity.into(),
                mapping,
                operation,
                update_columns,
                source_expressions,
            },
        }
    }

    fn infer_type(&self, expr: &Expr) -> DataType {
        match expr {
            Expr::FieldRef { index } => self
                .row_type
                .get(*index)
                .map(|f| f.data_type.clone())
                .unwrap_or(DataType::Unknown),
            Expr::Literal { data_type, .. } | Expr::DynamicParam { data_type, .. } => data_type.clone(),
            Expr::Call { op: Op::Cast, operands } => operands
                .first()
                .map(|o| self.infer_type(o))
                .unwrap_or(DataType::Unknown),
            Expr::Call { .. } => DataType::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emps() -> RowMapping {
        RowMapping::from_columns([
            ("empno", 1, DataType::Int32),
            ("ename", 2, DataType::Varchar(None)),
            ("deptno", 3, DataType::Int32),
        ])
    }

    #[test]
    fn test_fingerprint_deterministic() {
        let plan1 = AlgebraNode::scan("emps", emps())
            .filter(Expr::binary(Op::Eq, Expr::field(2), Expr::int(20)));
        let plan2 = plan1.clone();

        assert_eq!(plan1.fingerprint(), plan2.fingerprint());

        let plan3 = AlgebraNode::scan("emps", emps())
            .filter(Expr::binary(Op::Eq, Expr::field(2), Expr::int(30)));
        assert_ne!(plan1.fingerprint(), plan3.fingerprint());
    }

    #[test]
    fn test_json_round_trip() {
        let plan = AlgebraNode::scan("emps", emps())
            .project(vec![(Expr::field(2), "deptno"), (Expr::field(0), "empno")])
            .sort(vec![SortKey::desc(0)], None, Some(10));

        let json = serde_json::to_string(&plan).unwrap();
        let parsed: AlgebraNode = serde_json::from_str(&json).unwrap();

        assert_eq!(plan.fingerprint(), parsed.fingerprint());
    }

    #[test]
    fn test_builders_derive_row_types() {
        let agg = AlgebraNode::scan("emps", emps()).aggregate(
            vec![2],
            vec![AggCall::new(AggFunction::Count, vec![], "c")],
        );

        assert_eq!(agg.field_names(), vec!["deptno", "c"]);
        assert_eq!(agg.row_type[1].data_type, DataType::Int64);
        assert!(agg.input().is_some());
    }
}
