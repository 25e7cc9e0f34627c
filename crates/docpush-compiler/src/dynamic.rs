//! Dynamic parameter placeholders
//!
//! Parameters compile to `{"_dyn": id}` documents. A template is bound once
//! per parameter batch, so one compiled statement serves a whole batch.

use docpush_ir::{DataType, Value};
use serde_json::{json, Value as JsonValue};
use std::collections::HashMap;

use crate::error::{CompileError, Result};
use crate::literal::{self, BlobResolver};
use crate::predicate::like_to_regex;

pub const PLACEHOLDER_KEY: &str = "_dyn";
pub const REGEX_FLAG: &str = "_regex";

/// One set of parameter values, keyed by parameter id
pub type ParameterBatch = HashMap<u64, Value>;

pub fn placeholder(id: u64) -> JsonValue {
    json!({ PLACEHOLDER_KEY: id })
}

/// Placeholder bound to a LIKE pattern, converted to a regex when bound
pub fn regex_placeholder(id: u64) -> JsonValue {
    json!({ PLACEHOLDER_KEY: id, REGEX_FLAG: true })
}

/// Parameter id and regex flag of a placeholder document
pub fn placeholder_id(value: &JsonValue) -> Option<(u64, bool)> {
    let obj = value.as_object()?;
    let id = obj.get(PLACEHOLDER_KEY)?.as_u64()?;
    let allowed = obj.keys().all(|k| k == PLACEHOLDER_KEY || k == REGEX_FLAG);
    if !allowed {
        return None;
    }
    let regex = obj.get(REGEX_FLAG).and_then(JsonValue::as_bool).unwrap_or(false);
    Some((id, regex))
}

pub fn contains_placeholders(value: &JsonValue) -> bool {
    if placeholder_id(value).is_some() {
        return true;
    }
    match value {
        JsonValue::Object(obj) => obj.values().any(contains_placeholders),
        JsonValue::Array(items) => items.iter().any(contains_placeholders),
        _ => false,
    }
}

/// Replace every placeholder in `template` with its converted value
pub fn bind(template: &JsonValue, params: &ParameterBatch, blobs: &dyn BlobResolver) -> Result<JsonValue> {
    if let Some((id, regex)) = placeholder_id(template) {
        let value = params.get(&id).ok_or(CompileError::MissingParameter(id))?;
        if regex {
            let pattern = value
                .as_str()
                .ok_or_else(|| CompileError::InvalidLiteral(format!("LIKE pattern for ?{} is not a string", id)))?;
            return Ok(like_to_regex(pattern));
        }
        return literal::to_native(value, &DataType::Unknown, blobs);
    }

    match template {
        JsonValue::Object(obj) => {
            let mut out = serde_json::Map::new();
            for (key, member) in obj {
                out.insert(key.clone(), bind(member, params, blobs)?);
            }
            Ok(JsonValue::Object(out))
        }
        JsonValue::Array(items) => Ok(JsonValue::Array(
            items
                .iter()
                .map(|item| bind(item, params, blobs))
                .collect::<Result<Vec<_>>>()?,
        )),
        other => Ok(other.clone()),
    }
}

/// One bound document per parameter batch
pub fn instantiate(
    template: &JsonValue,
    batches: &[ParameterBatch],
    blobs: &dyn BlobResolver,
) -> Result<Vec<JsonValue>> {
    batches.iter().map(|batch| bind(template, batch, blobs)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::literal::InlineBlobResolver;

    #[test]
    fn test_bind_replaces_placeholders() {
        let template = json!({"col7": placeholder(0), "col2": {"$gt": placeholder(1)}});
        let params = HashMap::from([(0, Value::Int(20)), (1, Value::String("a".into()))]);

        let bound = bind(&template, &params, &InlineBlobResolver).unwrap();
        assert_eq!(bound, json!({"col7": 20, "col2": {"$gt": "a"}}));
        assert!(contains_placeholders(&template));
        assert!(!contains_placeholders(&bound));
    }

    #[test]
    fn test_regex_placeholder_gets_like_conversion() {
        let template = json!({"ename": regex_placeholder(3)});
        let params = HashMap::from([(3, Value::String("Sm_th%".into()))]);

        let bound = bind(&template, &params, &InlineBlobResolver).unwrap();
        assert_eq!(bound, json!({"ename": {"$regex": "^Sm.th.*", "$options": "i"}}));
    }

    #[test]
    fn test_missing_parameter() {
        let template = json!([placeholder(4)]);
        let err = bind(&template, &HashMap::new(), &InlineBlobResolver).unwrap_err();
        assert!(matches!(err, CompileError::MissingParameter(4)));
    }

    #[test]
    fn test_instantiate_per_batch() {
        let template = json!({"col1": placeholder(0)});
        let batches = vec![
            HashMap::from([(0, Value::Int(1))]),
            HashMap::from([(0, Value::Int(2))]),
        ];

        let docs = instantiate(&template, &batches, &InlineBlobResolver).unwrap();
        assert_eq!(docs, vec![json!({"col1": 1}), json!({"col1": 2})]);
    }
}
