//! INSERT / UPDATE / DELETE statements
//!
//! Run with: cargo test --package docpush-compiler --test mutations

use std::collections::BTreeMap;

use docpush_compiler::dynamic::{self, ParameterBatch};
use docpush_compiler::{CompileError, CompiledQuery, Compiler, DmlStatement, InlineBlobResolver, UpdateForm};
use docpush_ir::{
    AlgebraNode, DataType, Expr, Field, FieldMapping, MemoryCatalog, ModifyOp, Op, RowMapping, SortKey, Value,
};
use serde_json::json;

const ID: usize = 0;
const NAME: usize = 1;
const QTY: usize = 2;
const PRICE: usize = 3;
const TOTAL: usize = 4;
const META: usize = 5;

fn items_mapping() -> RowMapping {
    RowMapping::from_columns([
        ("id", 1, DataType::Int64),
        ("name", 2, DataType::Varchar(None)),
        ("qty", 3, DataType::Int32),
        ("price", 4, DataType::Float64),
        ("total", 5, DataType::Float64),
        ("meta", 7, DataType::Document),
    ])
}

fn setup_catalog() -> MemoryCatalog {
    let mut catalog = MemoryCatalog::new();
    catalog.add_entity_with_id("items", 9, items_mapping());
    catalog
}

fn items() -> AlgebraNode {
    AlgebraNode::scan("items", items_mapping())
}

fn update(input: AlgebraNode, columns: &[&str], sources: Vec<Expr>) -> AlgebraNode {
    input.modify(
        "items",
        items_mapping(),
        ModifyOp::Update,
        columns.iter().map(|c| c.to_string()).collect(),
        sources,
    )
}

fn compile_dml(catalog: &MemoryCatalog, plan: &AlgebraNode) -> DmlStatement {
    match Compiler::new(catalog).compile(plan).unwrap() {
        CompiledQuery::Dml(statement) => statement,
        other => panic!("expected a DML statement, got {:?}", other),
    }
}

#[test]
fn test_increment_scenario() {
    // Column stored under its own name
    let mapping = RowMapping::new(vec![
        FieldMapping {
            logical: "id".to_string(),
            physical: "_id".to_string(),
            field_id: 0,
            data_type: DataType::Int64,
        },
        FieldMapping {
            logical: "tinteger".to_string(),
            physical: "tinteger".to_string(),
            field_id: 3,
            data_type: DataType::Int32,
        },
    ]);
    let mut catalog = MemoryCatalog::new();
    catalog.add_entity("types", mapping.clone());

    let plan = AlgebraNode::scan("types", mapping.clone()).modify(
        "types",
        mapping,
        ModifyOp::Update,
        vec!["tinteger".to_string()],
        vec![Expr::binary(Op::Plus, Expr::field(1), Expr::int(1))],
    );

    let statement = compile_dml(&catalog, &plan);
    assert_eq!(statement.operation, ModifyOp::Update);
    assert_eq!(statement.collection, "types");
    assert_eq!(statement.filter, json!({}));
    assert_eq!(statement.documents, vec![json!({"$inc": {"tinteger": 1}})]);
    assert_eq!(statement.update_form, UpdateForm::Document);
    assert!(!statement.only_one);
}

#[test]
fn test_native_update_operators() {
    let catalog = setup_catalog();
    let plan = update(
        items(),
        &["qty", "price", "total", "name"],
        vec![
            Expr::binary(Op::Minus, Expr::field(QTY), Expr::int(2)),
            Expr::binary(Op::Times, Expr::field(PRICE), Expr::int(3)),
            Expr::binary(Op::Max, Expr::int(0), Expr::field(TOTAL)),
            Expr::string("renamed"),
        ],
    );

    let statement = compile_dml(&catalog, &plan);
    assert_eq!(statement.collection, "tab-9");
    assert_eq!(
        statement.documents,
        vec![json!({
            "$inc": {"col3": -2},
            "$mul": {"col4": 3.0},
            "$max": {"col5": 0.0},
            "$set": {"col2": "renamed"}
        })]
    );
}

#[test]
fn test_filtered_single_document_update() {
    let catalog = setup_catalog();
    let input = items()
        .filter(Expr::binary(Op::Eq, Expr::field(ID), Expr::int(5)))
        .sort(vec![], None, Some(1));
    let plan = update(input, &["name"], vec![Expr::param(0, DataType::Varchar(None))]);

    let statement = compile_dml(&catalog, &plan);
    assert_eq!(statement.filter, json!({"col1": 5}));
    assert!(statement.only_one);
    assert!(statement.parameterized);
    assert_eq!(statement.documents, vec![json!({"$set": {"col2": {"_dyn": 0}}})]);
}

#[test]
fn test_computed_assignment_switches_to_pipeline() {
    let catalog = setup_catalog();
    let plan = update(
        items(),
        &["qty", "total"],
        vec![
            Expr::binary(Op::Plus, Expr::field(QTY), Expr::int(1)),
            Expr::binary(Op::Times, Expr::field(PRICE), Expr::field(QTY)),
        ],
    );

    let statement = compile_dml(&catalog, &plan);
    assert_eq!(statement.update_form, UpdateForm::Pipeline);
    assert_eq!(
        statement.documents,
        vec![json!({"$set": {
            "col3": {"$add": ["$col3", 1]},
            "col5": {"$multiply": ["$col4", "$col3"]}
        }})]
    );
}

#[test]
fn test_sub_path_operations() {
    let catalog = setup_catalog();
    let plan = update(
        items(),
        &["meta", "meta", "meta", "meta"],
        vec![
            Expr::call(
                Op::DocUpdateReplace,
                vec![Expr::field(META), Expr::path(&["a", "b"]), Expr::string("x")],
            ),
            Expr::call(
                Op::DocUpdateAdd,
                vec![Expr::field(META), Expr::path(&["list"]), Expr::int(7)],
            ),
            Expr::call(Op::DocUpdateRemove, vec![Expr::field(META), Expr::path(&["old"])]),
            Expr::call(
                Op::DocUpdateRename,
                vec![Expr::field(META), Expr::path(&["a", "c"]), Expr::string("d")],
            ),
        ],
    );

    let statement = compile_dml(&catalog, &plan);
    assert_eq!(
        statement.documents,
        vec![json!({
            "$set": {"col7.a.b": "x"},
            "$push": {"col7.list": 7},
            "$unset": {"col7.old": ""},
            "$rename": {"col7.a.c": "col7.a.d"}
        })]
    );
}

#[test]
fn test_sub_path_with_computed_assignment_fails() {
    let catalog = setup_catalog();
    let plan = update(
        items(),
        &["meta", "total"],
        vec![
            Expr::call(Op::DocUpdateRemove, vec![Expr::field(META), Expr::path(&["old"])]),
            Expr::binary(Op::Times, Expr::field(PRICE), Expr::field(QTY)),
        ],
    );

    let err = Compiler::new(&catalog).compile(&plan).unwrap_err();
    assert!(matches!(err, CompileError::UnsupportedOperation(_)));
}

#[test]
fn test_insert_literal_tuples() {
    let catalog = setup_catalog();
    let values = AlgebraNode::values(
        vec![Field::new("id", DataType::Int64), Field::new("name", DataType::Varchar(None))],
        vec![
            vec![Value::Int(1), Value::String("bolt".to_string())],
            vec![Value::Int(2), Value::String("nut".to_string())],
        ],
    );
    let plan = values.modify("items", RowMapping::default(), ModifyOp::Insert, vec![], vec![]);

    let statement = compile_dml(&catalog, &plan);
    assert_eq!(statement.operation, ModifyOp::Insert);
    assert_eq!(
        statement.documents,
        vec![
            json!({"col1": 1, "col2": "bolt"}),
            json!({"col1": 2, "col2": "nut"}),
        ]
    );
    assert!(!statement.parameterized);
}

#[test]
fn test_insert_parameter_template_per_batch() {
    let catalog = setup_catalog();
    let plan = AlgebraNode::values(vec![Field::new("ZERO", DataType::Int32)], vec![vec![Value::Int(0)]])
        .project(vec![
            (Expr::param(0, DataType::Int64), "id"),
            (Expr::param(1, DataType::Varchar(None)), "name"),
        ])
        .modify("items", items_mapping(), ModifyOp::Insert, vec![], vec![]);

    let statement = compile_dml(&catalog, &plan);
    assert!(statement.parameterized);
    assert_eq!(
        statement.documents,
        vec![json!({"col1": {"_dyn": 0}, "col2": {"_dyn": 1}})]
    );

    let batches: Vec<ParameterBatch> = vec![
        [(0, Value::Int(1)), (1, Value::String("bolt".to_string()))].into_iter().collect(),
        [(0, Value::Int(2)), (1, Value::String("nut".to_string()))].into_iter().collect(),
    ];
    let documents = dynamic::instantiate(&statement.documents[0], &batches, &InlineBlobResolver).unwrap();
    assert_eq!(
        documents,
        vec![json!({"col1": 1, "col2": "bolt"}), json!({"col1": 2, "col2": "nut"})]
    );
}

#[test]
fn test_insert_native_documents() {
    let catalog = setup_catalog();
    let document: BTreeMap<String, Value> = [
        ("name".to_string(), Value::String("gear".to_string())),
        ("extra".to_string(), Value::Bool(true)),
    ]
    .into_iter()
    .collect();
    let plan = AlgebraNode::documents(vec![document]).modify(
        "items",
        items_mapping(),
        ModifyOp::Insert,
        vec![],
        vec![],
    );

    let statement = compile_dml(&catalog, &plan);
    assert_eq!(statement.documents, vec![json!({"col2": "gear", "extra": true})]);
}

#[test]
fn test_delete_single_document() {
    let catalog = setup_catalog();
    let plan = items()
        .filter(Expr::binary(Op::Eq, Expr::field(NAME), Expr::string("bolt")))
        .sort(vec![], None, Some(1))
        .modify("items", items_mapping(), ModifyOp::Delete, vec![], vec![]);

    let statement = compile_dml(&catalog, &plan);
    assert_eq!(statement.operation, ModifyOp::Delete);
    assert_eq!(statement.filter, json!({"col2": "bolt"}));
    assert!(statement.only_one);
    assert!(statement.documents.is_empty());
}

#[test]
fn test_ordered_delete_is_rejected() {
    let catalog = setup_catalog();
    let plan = items()
        .sort(vec![SortKey::asc(ID)], None, Some(1))
        .modify("items", items_mapping(), ModifyOp::Delete, vec![], vec![]);

    let err = Compiler::new(&catalog).compile(&plan).unwrap_err();
    assert!(matches!(err, CompileError::UnsupportedOperation(_)));
}

#[test]
fn test_merge_fails_fast() {
    let catalog = setup_catalog();
    // The input would not translate either; MERGE is rejected first
    let plan = AlgebraNode::scan("unknown", RowMapping::default()).modify(
        "items",
        items_mapping(),
        ModifyOp::Merge,
        vec![],
        vec![],
    );

    let err = Compiler::new(&catalog).compile(&plan).unwrap_err();
    assert!(matches!(err, CompileError::UnsupportedOperation(message) if message == "MERGE"));
}

#[test]
fn test_delete_with_computed_filter_stays_inline() {
    let catalog = setup_catalog();
    let plan = items()
        .filter(Expr::binary(
            Op::Eq,
            Expr::unary(Op::Upper, Expr::field(NAME)),
            Expr::string("BOLT"),
        ))
        .modify("items", items_mapping(), ModifyOp::Delete, vec![], vec![]);

    let statement = compile_dml(&catalog, &plan);
    assert_eq!(
        statement.filter,
        json!({"$expr": {"$eq": [{"$toUpper": "$col2"}, {"$literal": "BOLT"}]}})
    );
    assert!(!statement.parameterized);
}

#[test]
fn test_update_filtered_on_null_expression() {
    let catalog = setup_catalog();
    let filtered = items().filter(Expr::unary(
        Op::IsNull,
        Expr::binary(Op::Times, Expr::field(QTY), Expr::int(2)),
    ));
    let plan = update(filtered, &["name"], vec![Expr::string("unknown")]);

    let statement = compile_dml(&catalog, &plan);
    assert_eq!(
        statement.filter,
        json!({"$expr": {"$lte": [{"$multiply": ["$col3", {"$literal": 2}]}, null]}})
    );
    assert_eq!(statement.documents, vec![json!({"$set": {"col2": "unknown"}})]);
}

#[test]
fn test_delete_on_element_at_parameter_index() {
    let catalog = setup_catalog();
    let plan = items()
        .filter(Expr::binary(
            Op::Eq,
            Expr::binary(Op::Item, Expr::field(META), Expr::param(0, DataType::Int32)),
            Expr::string("red"),
        ))
        .modify("items", items_mapping(), ModifyOp::Delete, vec![], vec![]);

    let statement = compile_dml(&catalog, &plan);
    assert_eq!(
        statement.filter,
        json!({"$expr": {"$eq": [
            {"$arrayElemAt": ["$col7", {"$add": [{"_dyn": 0}, -1]}]},
            {"$literal": "red"}
        ]}})
    );
    assert!(statement.parameterized);
}

#[test]
fn test_delete_through_renaming_projection() {
    let catalog = setup_catalog();
    let plan = items()
        .project(vec![(Expr::field(NAME), "label"), (Expr::field(ID), "key")])
        .filter(Expr::and(vec![
            Expr::binary(Op::Eq, Expr::field(0), Expr::string("bolt")),
            Expr::binary(Op::Gt, Expr::field(1), Expr::int(10)),
        ]))
        .modify("items", items_mapping(), ModifyOp::Delete, vec![], vec![]);

    let statement = compile_dml(&catalog, &plan);
    assert_eq!(statement.filter, json!({"col2": "bolt", "col1": {"$gt": 10}}));
}

#[test]
fn test_unknown_column_in_mutation_filter_is_rejected() {
    let catalog = setup_catalog();
    let legacy = RowMapping::from_columns([("id", 1, DataType::Int64), ("colour", 3, DataType::String)]);
    let plan = AlgebraNode::scan("legacy", legacy)
        .filter(Expr::binary(Op::Eq, Expr::field(1), Expr::string("red")))
        .modify("items", items_mapping(), ModifyOp::Delete, vec![], vec![]);

    let err = Compiler::new(&catalog).compile(&plan).unwrap_err();
    assert!(matches!(err, CompileError::InvalidFieldReference(message) if message.contains("colour")));
}
