//! Native operator registry
//!
//! Constant lookup tables mapping IR operators to the reserved keys of the
//! document-store dialect. Nothing here is mutable; every table is plain data.

use docpush_ir::{AggFunction, Op};

/// A comparison operator as it appears in filter documents and in
/// aggregation expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComparisonOperator {
    pub op: Op,
    /// Key used in filter documents
    pub filter_key: &'static str,
    /// Equality is written as a bare `{field: value}` pair in filters
    pub implicit: bool,
    /// Key used inside `$expr` and computed stages
    pub expression_key: &'static str,
}

pub const COMPARISONS: &[ComparisonOperator] = &[
    ComparisonOperator { op: Op::Eq, filter_key: "$eq", implicit: true, expression_key: "$eq" },
    ComparisonOperator { op: Op::Ne, filter_key: "$ne", implicit: false, expression_key: "$ne" },
    ComparisonOperator { op: Op::Lt, filter_key: "$lt", implicit: false, expression_key: "$lt" },
    ComparisonOperator { op: Op::Le, filter_key: "$lte", implicit: false, expression_key: "$lte" },
    ComparisonOperator { op: Op::Gt, filter_key: "$gt", implicit: false, expression_key: "$gt" },
    ComparisonOperator { op: Op::Ge, filter_key: "$gte", implicit: false, expression_key: "$gte" },
];

/// Filter operator pairs that are each other's complement
pub const NEGATIONS: &[(&str, &str)] = &[
    ("$eq", "$ne"),
    ("$lt", "$gte"),
    ("$lte", "$gt"),
    ("$in", "$nin"),
];

/// Filter operators that cannot be complemented by another operator and are
/// negated by wrapping them in `$not`
pub const NOT_WRAPPED: &[&str] = &["$regex", "$size", "$type", "$elemMatch", "$all", "$mod"];

/// Bounds for which a tighter value can replace a looser one
pub const RANGE_BOUNDS: &[&str] = &["$lt", "$lte", "$gt", "$gte"];

pub const ARITHMETIC: &[(Op, &str)] = &[
    (Op::Plus, "$add"),
    (Op::Minus, "$subtract"),
    (Op::Times, "$multiply"),
    (Op::Divide, "$divide"),
    (Op::Mod, "$mod"),
];

/// Operators that lower to a native function taking an operand array
pub const FUNCTIONS: &[(Op, &str)] = &[
    (Op::And, "$and"),
    (Op::Or, "$or"),
    (Op::Not, "$not"),
    (Op::CharLength, "$strLenCP"),
    (Op::Upper, "$toUpper"),
    (Op::Lower, "$toLower"),
    (Op::Concat, "$concat"),
    (Op::Min, "$min"),
    (Op::Max, "$max"),
    (Op::DocSlice, "$slice"),
];

/// Atomic update operators for `field = field <op> value` assignments
pub const UPDATE_OPERATORS: &[(Op, &str)] = &[
    (Op::Plus, "$inc"),
    (Op::Minus, "$inc"),
    (Op::Times, "$mul"),
    (Op::Min, "$min"),
    (Op::Max, "$max"),
];

/// Update operators for document sub-path modifications
pub const SUB_PATH_OPERATORS: &[(Op, &str)] = &[
    (Op::DocUpdateReplace, "$set"),
    (Op::DocUpdateAdd, "$push"),
    (Op::DocUpdateRemove, "$unset"),
    (Op::DocUpdateRename, "$rename"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregateOperator {
    pub func: AggFunction,
    pub accumulator: &'static str,
    /// Counts rows instead of accumulating an argument
    pub counts_rows: bool,
}

pub const AGGREGATES: &[AggregateOperator] = &[
    AggregateOperator { func: AggFunction::Count, accumulator: "$sum", counts_rows: true },
    AggregateOperator { func: AggFunction::Sum, accumulator: "$sum", counts_rows: false },
    AggregateOperator { func: AggFunction::Sum0, accumulator: "$sum", counts_rows: false },
    AggregateOperator { func: AggFunction::Min, accumulator: "$min", counts_rows: false },
    AggregateOperator { func: AggFunction::Max, accumulator: "$max", counts_rows: false },
    AggregateOperator { func: AggFunction::Avg, accumulator: "$avg", counts_rows: false },
    // Only valid when the input guarantees one row per group
    AggregateOperator { func: AggFunction::SingleValue, accumulator: "$sum", counts_rows: false },
];

/// BSON type aliases accepted by `$type`
pub const TYPE_NUMBERS: &[(&str, i32)] = &[
    ("double", 1),
    ("string", 2),
    ("object", 3),
    ("array", 4),
    ("binData", 5),
    ("objectId", 7),
    ("bool", 8),
    ("date", 9),
    ("null", 10),
    ("regex", 11),
    ("javascript", 13),
    ("int", 16),
    ("timestamp", 17),
    ("long", 18),
    ("decimal", 19),
];

pub fn comparison(op: Op) -> Option<&'static ComparisonOperator> {
    COMPARISONS.iter().find(|c| c.op == op)
}

/// Complement of a filter operator, if one exists
pub fn negated_filter_key(key: &str) -> Option<&'static str> {
    NEGATIONS.iter().find_map(|(a, b)| {
        if *a == key {
            Some(*b)
        } else if *b == key {
            Some(*a)
        } else {
            None
        }
    })
}

pub fn is_not_wrapped(key: &str) -> bool {
    NOT_WRAPPED.contains(&key)
}

pub fn is_range_bound(key: &str) -> bool {
    RANGE_BOUNDS.contains(&key)
}

pub fn arithmetic(op: Op) -> Option<&'static str> {
    lookup(ARITHMETIC, op)
}

pub fn function(op: Op) -> Option<&'static str> {
    lookup(FUNCTIONS, op)
}

pub fn update_operator(op: Op) -> Option<&'static str> {
    lookup(UPDATE_OPERATORS, op)
}

pub fn sub_path_operator(op: Op) -> Option<&'static str> {
    lookup(SUB_PATH_OPERATORS, op)
}

pub fn aggregate(func: AggFunction) -> &'static AggregateOperator {
    // Every AggFunction has exactly one entry
    AGGREGATES
        .iter()
        .find(|a| a.func == func)
        .unwrap_or(&AGGREGATES[1])
}

pub fn type_number(name: &str) -> Option<i32> {
    TYPE_NUMBERS
        .iter()
        .find(|(alias, _)| *alias == name)
        .map(|(_, number)| *number)
}

fn lookup(table: &[(Op, &'static str)], op: Op) -> Option<&'static str> {
    table.iter().find(|(o, _)| *o == op).map(|(_, key)| *key)
}
