//! ORDER BY / OFFSET / FETCH lowering

use docpush_ir::{Direction, Field, NullOrdering, SortKey};
use serde_json::{json, Map};

use crate::accumulator::{PipelineAccumulator, StageKind};
use crate::error::{CompileError, Result};

pub(crate) fn translate_sort(
    acc: &mut PipelineAccumulator,
    row: &[Field],
    collation: &[SortKey],
    offset: Option<u64>,
    fetch: Option<u64>,
) -> Result<()> {
    if acc.is_dml() {
        return limit_mutation(acc, collation, offset, fetch);
    }

    let mut sort = Map::new();
    for key in collation {
        match (key.direction, key.nulls) {
            (Direction::Asc, NullOrdering::Last) | (Direction::Desc, NullOrdering::First) => {
                return Err(CompileError::UnsupportedNullOrdering(format!(
                    "{:?} NULLS {:?} on field ${}",
                    key.direction, key.nulls, key.field
                )));
            }
            _ => {}
        }

        let name = acc.resolve_field(row, key.field)?;
        let leaf = leaf_segment(&name).to_string();
        let matching = row.iter().filter(|f| leaf_segment(&f.name) == leaf).count();
        if matching != 1 {
            return Err(CompileError::InvalidFieldReference(format!(
                "sort key '{}' reduces to '{}', which names {} input fields",
                name, leaf, matching
            )));
        }

        let direction = match key.direction {
            Direction::Asc => 1,
            Direction::Desc => -1,
        };
        sort.insert(leaf, json!(direction));
    }

    if !sort.is_empty() {
        acc.add_stage(StageKind::Sort, None, json!({ "$sort": sort }));
    }
    if let Some(skip) = offset {
        acc.add_stage(StageKind::Skip, None, json!({ "$skip": skip }));
    }
    if let Some(limit) = fetch {
        acc.add_stage(StageKind::Limit, None, json!({ "$limit": limit }));
        if limit == 1 {
            acc.set_only_one();
        }
    }
    Ok(())
}

/// Below a modification only a fetch of one row is meaningful
fn limit_mutation(
    acc: &mut PipelineAccumulator,
    collation: &[SortKey],
    offset: Option<u64>,
    fetch: Option<u64>,
) -> Result<()> {
    if !collation.is_empty() || offset.is_some() {
        return Err(CompileError::UnsupportedOperation(
            "ordered or offset modification".to_string(),
        ));
    }
    match fetch {
        None => Ok(()),
        Some(1) => {
            acc.set_only_one();
            Ok(())
        }
        Some(n) => Err(CompileError::UnsupportedOperation(format!(
            "modification limited to {} documents",
            n
        ))),
    }
}

fn leaf_segment(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}
