//! Property tests for filter minimization, condition merging and key order
//!
//! Run with: cargo test --package docpush-compiler --test properties

use docpush_compiler::condition::minimal_filter;
use docpush_compiler::{Compiler, PipelineAccumulator};
use docpush_ir::{AggCall, AggFunction, AlgebraNode, DataType, Expr, MemoryCatalog, Op, RowMapping};
use proptest::prelude::*;
use serde_json::{json, Value as JsonValue};

const FIELDS: [&str; 4] = ["a", "b", "c", "d"];

fn mapping() -> RowMapping {
    RowMapping::from_columns([
        ("a", 1, DataType::Int32),
        ("b", 2, DataType::Int32),
        ("c", 3, DataType::Varchar(None)),
        ("d", 4, DataType::Int64),
        ("list", 5, DataType::Array(Box::new(DataType::Int32))),
    ])
}

fn translate(plan: &AlgebraNode) -> PipelineAccumulator {
    let catalog = MemoryCatalog::new();
    Compiler::new(&catalog).translate(plan).unwrap()
}

fn scan() -> AlgebraNode {
    AlgebraNode::scan("t", mapping())
}

fn arb_field() -> impl Strategy<Value = String> {
    prop_oneof![
        Just(FIELDS[0].to_string()),
        Just(FIELDS[1].to_string()),
        Just(FIELDS[2].to_string()),
        Just(FIELDS[3].to_string()),
    ]
}

fn arb_filter() -> impl Strategy<Value = JsonValue> {
    let leaf = (arb_field(), -50i64..50).prop_map(|(field, value)| json!({ field: value }));
    leaf.prop_recursive(4, 32, 3, |inner| {
        (
            prop_oneof![Just("$and"), Just("$or")],
            prop::collection::vec(inner, 1..4),
        )
            .prop_map(|(op, members)| json!({ op: members }))
    })
}

fn arb_inequality() -> impl Strategy<Value = Op> {
    prop_oneof![Just(Op::Gt), Just(Op::Ge), Just(Op::Lt), Just(Op::Le)]
}

fn arb_comparison() -> impl Strategy<Value = Op> {
    prop_oneof![arb_inequality(), Just(Op::Eq), Just(Op::Ne)]
}

proptest! {
    #[test]
    fn minimal_filter_is_idempotent(filter in arb_filter()) {
        let once = minimal_filter(&filter);
        prop_assert_eq!(minimal_filter(&once), once);
    }

    #[test]
    fn minimal_filter_drops_single_member_envelopes(filter in arb_filter()) {
        let minimal = minimal_filter(&filter);
        let obj = minimal.as_object().unwrap();
        if obj.len() == 1 {
            for key in ["$and", "$or"] {
                if let Some(members) = obj.get(key) {
                    prop_assert!(members.as_array().unwrap().len() > 1);
                }
            }
        }
    }

    #[test]
    fn repeated_conjuncts_collapse(op in arb_comparison(), field in 0usize..4, value in -100i64..100, copies in 1usize..8) {
        let condition = || Expr::binary(op, Expr::field(field), Expr::int(value));

        let single = translate(&scan().filter(condition()));
        let repeated = translate(&scan().filter(Expr::and((0..copies).map(|_| condition()).collect())));
        prop_assert_eq!(repeated.get_filter(), single.get_filter());
    }

    #[test]
    fn double_negation_restores_inequality(op in arb_inequality(), field in 0usize..4, value in -100i64..100) {
        let condition = Expr::binary(op, Expr::field(field), Expr::int(value));

        let plain = translate(&scan().filter(condition.clone()));
        let doubled = translate(&scan().filter(Expr::not(Expr::not(condition))));
        prop_assert_eq!(doubled.get_filter(), plain.get_filter());
    }

    #[test]
    fn group_keys_round_trip_in_any_order(
        order in Just(vec![0usize, 1, 2, 3]).prop_shuffle(),
        count in 1usize..=4,
    ) {
        let keys: Vec<usize> = order[..count].to_vec();
        let plan = scan().aggregate(keys.clone(), vec![AggCall::new(AggFunction::Count, vec![], "n")]);
        let acc = translate(&plan);

        let fixup = acc.stages()[1].pipeline["$project"].as_object().unwrap().clone();
        let unpacked: Vec<String> = fixup
            .keys()
            .filter(|k| k.as_str() != "_id" && k.as_str() != "n")
            .cloned()
            .collect();
        let expected: Vec<String> = keys.iter().map(|k| FIELDS[*k].to_string()).collect();
        prop_assert_eq!(unpacked, expected);
    }

    #[test]
    fn item_index_is_shifted_to_zero_based(index in 1i64..1000) {
        let plan = scan().project(vec![(
            Expr::binary(Op::Item, Expr::field(4), Expr::int(index)),
            "element",
        )]);
        let acc = translate(&plan);

        prop_assert_eq!(
            &acc.stages()[0].pipeline["$project"]["element"],
            &json!({"$arrayElemAt": ["$list", index - 1]})
        );
    }
}
