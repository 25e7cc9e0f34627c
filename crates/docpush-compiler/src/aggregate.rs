//! GROUP BY lowering into `$group` plus a fixup `$project`

use docpush_ir::{AggCall, Field};
use docpush_registry as registry;
use serde_json::{json, Map, Value as JsonValue};

use crate::accumulator::{PipelineAccumulator, StageKind};
use crate::error::{CompileError, Result};

pub(crate) fn translate_aggregate(
    acc: &mut PipelineAccumulator,
    row: &[Field],
    group_keys: &[usize],
    agg_calls: &[AggCall],
) -> Result<()> {
    if acc.is_dml() {
        return Err(CompileError::UnsupportedOperation(
            "aggregation below a modification".to_string(),
        ));
    }
    for call in agg_calls {
        if call.distinct {
            return Err(CompileError::UnsupportedAggregateModifier(format!(
                "DISTINCT on {:?} ({})",
                call.func, call.alias
            )));
        }
        if call.filter.is_some() {
            return Err(CompileError::UnsupportedAggregateModifier(format!(
                "FILTER on {:?} ({})",
                call.func, call.alias
            )));
        }
    }

    let keys = group_keys
        .iter()
        .map(|k| acc.resolve_field(row, *k))
        .collect::<Result<Vec<_>>>()?;

    let mut group = Map::new();
    let id = match keys.as_slice() {
        [] => JsonValue::Null,
        [key] => JsonValue::String(format!("${}", key)),
        many => JsonValue::Object(
            many.iter()
                .map(|k| (k.clone(), JsonValue::String(format!("${}", k))))
                .collect(),
        ),
    };
    group.insert("_id".to_string(), id);

    for call in agg_calls {
        let accumulated = accumulator(acc, row, call)?;
        group.insert(call.alias.clone(), accumulated);
    }
    acc.add_stage(StageKind::Group, None, json!({ "$group": group }));

    // Unpack the group key back into top-level fields, in key order
    let mut fixup = Map::new();
    fixup.insert("_id".to_string(), json!(0));
    for key in &keys {
        let source = if keys.len() == 1 {
            "$_id".to_string()
        } else {
            format!("$_id.{}", key)
        };
        fixup.insert(key.clone(), JsonValue::String(source));
    }
    for call in agg_calls {
        fixup.insert(call.alias.clone(), JsonValue::String(format!("${}", call.alias)));
    }
    acc.add_stage(StageKind::Project, None, json!({ "$project": fixup }));
    acc.mark_group();
    Ok(())
}

fn accumulator(acc: &mut PipelineAccumulator, row: &[Field], call: &AggCall) -> Result<JsonValue> {
    let operator = registry::aggregate(call.func);
    let key = operator.accumulator;

    match call.args.as_slice() {
        [] if operator.counts_rows => Ok(json!({ key: 1 })),
        [arg] if operator.counts_rows => {
            let name = acc.resolve_field(row, *arg)?;
            Ok(json!({ key: { "$cond": [{ "$gt": [format!("${}", name), null] }, 1, 0] } }))
        }
        [arg] => {
            let name = acc.resolve_field(row, *arg)?;
            Ok(json!({ key: format!("${}", name) }))
        }
        args => Err(CompileError::UnsupportedAggregate(format!(
            "{:?} over {} arguments ({})",
            call.func,
            args.len(),
            call.alias
        ))),
    }
}
