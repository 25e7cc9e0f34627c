//! End-to-end query scenarios over an `emps` collection
//!
//! Run with: cargo test --package docpush-compiler --test scenarios

use docpush_compiler::dynamic::{self, ParameterBatch};
use docpush_compiler::{CompileError, CompiledQuery, Compiler, InlineBlobResolver, StageKind};
use docpush_ir::{
    AggCall, AggFunction, AlgebraNode, DataType, Expr, MemoryCatalog, NullOrdering, Op, RowMapping, SortKey, Value,
};
use serde_json::{json, Value as JsonValue};

const EMPNO: usize = 0;
const ENAME: usize = 1;
const JOB: usize = 2;
const SAL: usize = 5;
const COMMISSION: usize = 6;
const DEPTNO: usize = 7;
const SKILLS: usize = 8;

fn emps_mapping() -> RowMapping {
    RowMapping::from_columns([
        ("empno", 1, DataType::Int32),
        ("ename", 2, DataType::Varchar(None)),
        ("job", 3, DataType::Varchar(None)),
        ("mgr", 4, DataType::Int32),
        ("hiredate", 5, DataType::Date),
        ("sal", 6, DataType::Decimal { precision: 7, scale: 2 }),
        ("commission", 7, DataType::Decimal { precision: 7, scale: 2 }),
        ("deptno", 8, DataType::Int32),
        ("skills", 9, DataType::Array(Box::new(DataType::Varchar(None)))),
    ])
}

fn setup_catalog() -> MemoryCatalog {
    let mut catalog = MemoryCatalog::new();
    catalog.add_entity_with_id("emps", 3, emps_mapping());
    catalog
}

fn emps() -> AlgebraNode {
    AlgebraNode::scan("emps", emps_mapping())
}

fn pipeline_of(query: CompiledQuery) -> Vec<JsonValue> {
    match query {
        CompiledQuery::Aggregate { stages, .. } => stages,
        other => panic!("expected an aggregation pipeline, got {:?}", other),
    }
}

#[test]
fn test_or_with_null_test_scenario() {
    let catalog = setup_catalog();
    let compiler = Compiler::new(&catalog);
    let plan = emps().filter(Expr::or(vec![
        Expr::binary(Op::Eq, Expr::field(DEPTNO), Expr::int(20)),
        Expr::unary(Op::IsNull, Expr::field(COMMISSION)),
    ]));

    let acc = compiler.translate(&plan).unwrap();
    assert_eq!(
        acc.get_filter(),
        json!({"$or": [{"deptno": 20}, {"commission": null}]})
    );
    assert_eq!(acc.get_necessary_physical_fields(), vec!["col8", "col7"]);

    match compiler.compile(&plan).unwrap() {
        CompiledQuery::Find {
            collection, filter, ..
        } => {
            assert_eq!(collection, "tab-3");
            assert_eq!(filter, json!({"$or": [{"col8": 20}, {"col7": null}]}));
        }
        other => panic!("expected find, got {:?}", other),
    }
}

#[test]
fn test_repeated_conjunct_collapses() {
    let catalog = setup_catalog();
    let gt = || Expr::binary(Op::Gt, Expr::field(DEPTNO), Expr::int(20));
    let plan = emps().filter(Expr::and(vec![gt(), gt(), gt()]));

    let acc = Compiler::new(&catalog).translate(&plan).unwrap();
    assert_eq!(acc.get_filter(), json!({"deptno": {"$gt": 20}}));
}

#[test]
fn test_range_bounds_merge_per_field() {
    let catalog = setup_catalog();
    let plan = emps().filter(Expr::and(vec![
        Expr::binary(Op::Gt, Expr::field(DEPTNO), Expr::int(10)),
        Expr::binary(Op::Lt, Expr::field(DEPTNO), Expr::int(40)),
        Expr::binary(Op::Gt, Expr::field(DEPTNO), Expr::int(20)),
    ]));

    let acc = Compiler::new(&catalog).translate(&plan).unwrap();
    assert_eq!(acc.get_filter(), json!({"deptno": {"$gt": 20, "$lt": 40}}));
}

#[test]
fn test_negation_uses_complement_operator() {
    let catalog = setup_catalog();
    let plan = emps().filter(Expr::not(Expr::binary(
        Op::Gt,
        Expr::field(DEPTNO),
        Expr::int(20),
    )));

    let acc = Compiler::new(&catalog).translate(&plan).unwrap();
    assert_eq!(acc.get_filter(), json!({"deptno": {"$lte": 20}}));
}

#[test]
fn test_group_keys_come_back_in_order() {
    let catalog = setup_catalog();
    let plan = emps().aggregate(
        vec![DEPTNO, JOB],
        vec![
            AggCall::new(AggFunction::Count, vec![], "c"),
            AggCall::new(AggFunction::Sum, vec![SAL], "total"),
        ],
    );

    let stages = pipeline_of(Compiler::new(&catalog).compile(&plan).unwrap());
    assert_eq!(
        stages,
        vec![
            json!({"$project": {"deptno": "$col8", "job": "$col3", "sal": "$col6"}}),
            json!({"$group": {
                "_id": {"deptno": "$deptno", "job": "$job"},
                "c": {"$sum": 1},
                "total": {"$sum": "$sal"}
            }}),
            json!({"$project": {
                "_id": 0,
                "deptno": "$_id.deptno",
                "job": "$_id.job",
                "c": "$c",
                "total": "$total"
            }}),
        ]
    );
}

#[test]
fn test_distinct_aggregate_fails() {
    let catalog = setup_catalog();
    let mut call = AggCall::new(AggFunction::Count, vec![JOB], "jobs");
    call.distinct = true;
    let plan = emps().aggregate(vec![DEPTNO], vec![call]);

    let err = Compiler::new(&catalog).compile(&plan).unwrap_err();
    assert!(matches!(err, CompileError::UnsupportedAggregateModifier(_)));
}

#[test]
fn test_item_index_is_zero_based() {
    let catalog = setup_catalog();
    let plan = emps().project(vec![(
        Expr::binary(Op::Item, Expr::field(SKILLS), Expr::int(2)),
        "second_skill",
    )]);

    let stages = pipeline_of(Compiler::new(&catalog).compile(&plan).unwrap());
    assert_eq!(
        stages[1],
        json!({"$project": {"second_skill": {"$arrayElemAt": ["$skills", 1]}, "_id": 0}})
    );
}

#[test]
fn test_case_lowering() {
    let catalog = setup_catalog();
    let plan = emps().project(vec![(
        Expr::call(
            Op::Case,
            vec![
                Expr::binary(Op::Gt, Expr::field(DEPTNO), Expr::int(20)),
                Expr::string("big"),
                Expr::binary(Op::Gt, Expr::field(DEPTNO), Expr::int(10)),
                Expr::string("medium"),
            ],
        ),
        "size",
    )]);

    let stages = pipeline_of(Compiler::new(&catalog).compile(&plan).unwrap());
    assert_eq!(
        stages[1]["$project"]["size"],
        json!({"$cond": [
            {"$gt": ["$deptno", {"$literal": 20}]},
            {"$literal": "big"},
            {"$cond": [
                {"$gt": ["$deptno", {"$literal": 10}]},
                {"$literal": "medium"},
                null
            ]}
        ]})
    );
}

#[test]
fn test_sort_desc_fetch_emits_two_stages() {
    let catalog = setup_catalog();
    let plan = emps().sort(vec![SortKey::desc(DEPTNO)], None, Some(10));

    let acc = Compiler::new(&catalog).translate(&plan).unwrap();
    let stages: Vec<&JsonValue> = acc.stages().iter().map(|s| &s.pipeline).collect();
    assert_eq!(stages, vec![&json!({"$sort": {"deptno": -1}}), &json!({"$limit": 10})]);
    assert!(!acc.only_one());
}

#[test]
fn test_unnatural_null_ordering_is_flagged() {
    let catalog = setup_catalog();
    let mut key = SortKey::asc(ENAME);
    key.nulls = NullOrdering::Last;
    let plan = emps().sort(vec![key], None, None);

    let err = Compiler::new(&catalog).compile(&plan).unwrap_err();
    assert!(matches!(err, CompileError::UnsupportedNullOrdering(_)));
}

#[test]
fn test_filter_and_projection_run_as_find() {
    let catalog = setup_catalog();
    let plan = emps()
        .filter(Expr::binary(Op::Eq, Expr::field(DEPTNO), Expr::int(20)))
        .project(vec![(Expr::field(EMPNO), "empno"), (Expr::field(ENAME), "ename")]);

    match Compiler::new(&catalog).compile(&plan).unwrap() {
        CompiledQuery::Find {
            filter, projection, ..
        } => {
            assert_eq!(filter, json!({"col8": 20}));
            assert_eq!(projection, Some(json!({"col1": 1, "col2": 1, "_id": 0})));
        }
        other => panic!("expected find, got {:?}", other),
    }
}

#[test]
fn test_computed_filter_needs_pipeline() {
    let catalog = setup_catalog();
    let plan = emps().filter(Expr::binary(
        Op::Gt,
        Expr::unary(Op::CharLength, Expr::field(ENAME)),
        Expr::int(4),
    ));

    let stages = pipeline_of(Compiler::new(&catalog).compile(&plan).unwrap());
    let kinds: Vec<&str> = stages
        .iter()
        .filter_map(|s| s.as_object().and_then(|o| o.keys().next()).map(String::as_str))
        .collect();
    assert_eq!(kinds, vec!["$project", "$addFields", "$match"]);
    assert_eq!(stages[2], json!({"$match": {"__temp0": {"$gt": 4}}}));
}

#[test]
fn test_parameterized_filter_binds_per_batch() {
    let catalog = setup_catalog();
    let plan = emps().filter(Expr::binary(
        Op::Like,
        Expr::field(ENAME),
        Expr::param(0, DataType::Varchar(None)),
    ));

    let CompiledQuery::Find { filter, .. } = Compiler::new(&catalog).compile(&plan).unwrap() else {
        panic!("expected find");
    };
    assert!(dynamic::contains_placeholders(&filter));

    let batch: ParameterBatch = [(0, Value::String("A%".to_string()))].into_iter().collect();
    let bound = dynamic::bind(&filter, &batch, &InlineBlobResolver).unwrap();
    assert_eq!(bound, json!({"col2": {"$regex": "^A.*", "$options": "i"}}));
}

#[test]
fn test_helper_names_are_deterministic() {
    let catalog = setup_catalog();
    let plan = emps().filter(Expr::and(vec![
        Expr::binary(
            Op::Gt,
            Expr::binary(Op::Plus, Expr::field(DEPTNO), Expr::int(1)),
            Expr::int(5),
        ),
        Expr::unary(Op::IsNull, Expr::unary(Op::Upper, Expr::field(JOB))),
    ]));
    let compiler = Compiler::new(&catalog);

    let first = compiler.translate(&plan).unwrap();
    let second = compiler.translate(&plan).unwrap();
    assert_eq!(first.stages(), second.stages());
    assert_eq!(first.stages()[0].kind, StageKind::AddFields);
    assert_eq!(
        first.get_filter(),
        json!({"__temp0": {"$gt": 5}, "__temp1": null})
    );
}

#[test]
fn test_field_against_computed_value_runs_as_find() {
    let catalog = setup_catalog();
    let plan = emps().filter(Expr::binary(
        Op::Eq,
        Expr::field(DEPTNO),
        Expr::binary(Op::Plus, Expr::field(EMPNO), Expr::int(1)),
    ));

    let CompiledQuery::Find { filter, .. } = Compiler::new(&catalog).compile(&plan).unwrap() else {
        panic!("expected find");
    };
    assert_eq!(
        filter,
        json!({"$expr": {"$eq": ["$col8", {"$add": ["$col1", {"$literal": 1}]}]}})
    );
}
