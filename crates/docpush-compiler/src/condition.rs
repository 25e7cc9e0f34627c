//! Condition map: per-field accumulation of filter conditions
//!
//! A [`ConditionMap`] is the intermediate form the predicate translator builds
//! before a filter document is emitted. Ordinary keys are (possibly dotted)
//! field names whose values are the conditions attached to that field; the
//! reserved keys `$and` and `$or` hold nested condition documents, and the
//! `$expr` pseudo-field holds computed tests. The merge and negation
//! operations below are pure functions over maps and documents.

use docpush_registry as registry;
use indexmap::IndexMap;
use serde_json::{json, Map, Value as JsonValue};

pub const AND: &str = "$and";
pub const OR: &str = "$or";
pub const NOR: &str = "$nor";
pub const EXPR: &str = "$expr";

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConditionMap {
    entries: IndexMap<String, Vec<JsonValue>>,
}

impl ConditionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// A map holding a single condition
    pub fn single(op: Option<&str>, field: impl Into<String>, value: JsonValue) -> Self {
        let mut map = Self::new();
        map.attach(op, field, value);
        map
    }

    /// Rebuild a map from an emitted condition document
    pub fn from_document(doc: &Map<String, JsonValue>) -> Self {
        let mut map = Self::new();
        for (key, value) in doc {
            match (key.as_str(), value) {
                (AND | OR, JsonValue::Array(members)) => {
                    for member in members {
                        map.push(key, member.clone());
                    }
                }
                _ => map.push(key, value.clone()),
            }
        }
        map
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&[JsonValue]> {
        self.entries.get(key).map(|v| v.as_slice())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|k| k.as_str())
    }

    /// Attach `{field: value}` or `{field: {op: value}}`
    pub fn attach(&mut self, op: Option<&str>, field: impl Into<String>, value: JsonValue) {
        let condition = match op {
            Some(op) => json!({ op: value }),
            None => value,
        };
        self.push(&field.into(), condition);
    }

    // Identical conditions on one key collapse
    fn push(&mut self, key: &str, condition: JsonValue) {
        let conditions = self.entries.entry(key.to_string()).or_default();
        if !conditions.contains(&condition) {
            conditions.push(condition);
        }
    }

    /// Conjunctive merge: field conditions accumulate per field, a nested
    /// `$or` group takes the free `$or` slot or nests under `$and`.
    pub fn merge_and(&mut self, other: ConditionMap) {
        for (key, conditions) in other.entries {
            match key.as_str() {
                OR if !self.entries.contains_key(OR) => {
                    self.entries.insert(key, conditions);
                }
                OR => self.push(AND, json!({ OR: conditions })),
                _ => {
                    for condition in conditions {
                        self.push(&key, condition);
                    }
                }
            }
        }
    }

    /// Disjunctive merge: the alternative becomes one member of `$or`
    pub fn merge_or(&mut self, alternative: ConditionMap) {
        let doc = alternative.as_condition_document();
        match doc {
            JsonValue::Object(mut obj) if obj.len() == 1 && obj.contains_key(OR) => {
                if let Some(JsonValue::Array(members)) = obj.remove(OR) {
                    for member in members {
                        self.push(OR, member);
                    }
                }
            }
            other => self.push(OR, other),
        }
    }

    pub fn as_condition_document(&self) -> JsonValue {
        let mut doc = Map::new();
        let mut ands = Vec::new();

        for (key, conditions) in &self.entries {
            match key.as_str() {
                AND => ands.extend(conditions.iter().cloned()),
                OR => {
                    doc.insert(key.clone(), JsonValue::Array(conditions.clone()));
                }
                _ if conditions.len() == 1 => {
                    doc.insert(key.clone(), conditions[0].clone());
                }
                _ => match merge_range(key, conditions) {
                    Some(range) => {
                        doc.insert(key.clone(), range);
                    }
                    None => ands.extend(conditions.iter().map(|c| json!({ key.as_str(): c }))),
                },
            }
        }

        if !ands.is_empty() {
            doc.insert(AND.to_string(), JsonValue::Array(ands));
        }
        JsonValue::Object(doc)
    }

    /// Push a negation down to the leaves. Returns `None` when some entry
    /// (a computed `$expr` test or an operator without a complement) cannot
    /// be negated in place.
    pub fn negate(&self) -> Option<ConditionMap> {
        // The map is a conjunction, so its complement is a disjunction
        let mut members = Vec::new();

        for (key, conditions) in &self.entries {
            match key.as_str() {
                EXPR => return None,
                AND => {
                    for member in conditions {
                        members.push(negate_document(member)?);
                    }
                }
                OR => {
                    let mut conjunction = ConditionMap::new();
                    for alternative in conditions {
                        let negated = negate_document(alternative)?;
                        conjunction.merge_and(ConditionMap::from_document(negated.as_object()?));
                    }
                    members.push(conjunction.as_condition_document());
                }
                NOR => {
                    for group in conditions {
                        members.push(json!({ OR: group }));
                    }
                }
                field => {
                    for condition in conditions {
                        members.push(negate_leaf(field, condition)?);
                    }
                }
            }
        }

        match members.len() {
            0 => Some(ConditionMap::single(None, EXPR, JsonValue::Bool(false))),
            1 => members[0].as_object().map(ConditionMap::from_document),
            _ => {
                let mut map = ConditionMap::new();
                for member in members {
                    map.push(OR, member);
                }
                Some(map)
            }
        }
    }

    /// Generic negation used when push-down fails
    pub fn wrap_negation(&self) -> ConditionMap {
        let mut map = ConditionMap::new();

        if self.entries.len() == 1 {
            if let Some((key, conditions)) = self.entries.first() {
                if key == EXPR {
                    let inner = match conditions.as_slice() {
                        [single] => single.clone(),
                        many => json!({ AND: many }),
                    };
                    map.push(EXPR, json!({ "$not": [inner] }));
                    return map;
                }
                if key != AND && key != OR {
                    if let [single] = conditions.as_slice() {
                        if single.as_object().is_some_and(is_operator_document) {
                            map.push(key, json!({ "$not": single }));
                            return map;
                        }
                    }
                }
            }
        }

        map.push(AND, json!({ NOR: [self.as_condition_document()] }));
        map
    }
}

/// Negate a full condition document, if push-down succeeds
pub fn negate_document(doc: &JsonValue) -> Option<JsonValue> {
    let map = ConditionMap::from_document(doc.as_object()?);
    map.negate().map(|negated| negated.as_condition_document())
}

/// Negate one condition attached to `field`, returning a condition document
fn negate_leaf(field: &str, condition: &JsonValue) -> Option<JsonValue> {
    let obj = match condition.as_object() {
        Some(obj) if is_operator_document(obj) => obj,
        Some(obj) if is_regex_placeholder(obj) => {
            return Some(json!({ field: { "$not": condition } }));
        }
        _ => return Some(json!({ field: { "$ne": condition } })),
    };

    if obj.contains_key("$regex") {
        return Some(json!({ field: { "$not": condition } }));
    }

    if obj.len() > 1 {
        let parts = obj
            .iter()
            .map(|(op, value)| negate_leaf(field, &json!({ op.as_str(): value })))
            .collect::<Option<Vec<_>>>()?;
        return Some(json!({ OR: parts }));
    }

    let (op, value) = obj.iter().next()?;
    if let Some(complement) = registry::negated_filter_key(op) {
        return Some(json!({ field: { complement: value } }));
    }
    match op.as_str() {
        "$exists" => Some(json!({ field: { "$exists": !value.as_bool()? } })),
        "$not" => Some(json!({ field: value })),
        op if registry::is_not_wrapped(op) => Some(json!({ field: { "$not": condition } })),
        _ => None,
    }
}

/// Documents made only of operator keys, such as `{$gt: 1, $lt: 5}`
fn is_operator_document(obj: &Map<String, JsonValue>) -> bool {
    !obj.is_empty() && obj.keys().all(|k| k.starts_with('$'))
}

fn is_regex_placeholder(obj: &Map<String, JsonValue>) -> bool {
    obj.get("_regex").and_then(JsonValue::as_bool).unwrap_or(false)
}

/// Merge several operator conditions on one field into a single document
fn merge_range(field: &str, conditions: &[JsonValue]) -> Option<JsonValue> {
    if field == EXPR || field == NOR {
        return None;
    }

    let mut merged = Map::new();
    for condition in conditions {
        let obj = condition.as_object()?;
        if !is_operator_document(obj) {
            return None;
        }
        for (op, value) in obj {
            match merged.get(op) {
                None => {
                    merged.insert(op.clone(), value.clone());
                }
                Some(existing) if existing == value => {}
                Some(existing) if registry::is_range_bound(op) => {
                    if stronger(op, value, existing)? {
                        merged.insert(op.clone(), value.clone());
                    }
                }
                Some(_) => return None,
            }
        }
    }
    Some(JsonValue::Object(merged))
}

/// Whether `v0` is a tighter bound than `v1` for `op`; `None` when the
/// values are not comparable.
fn stronger(op: &str, v0: &JsonValue, v1: &JsonValue) -> Option<bool> {
    match op {
        "$lt" | "$lte" => match (v0, v1) {
            (JsonValue::Number(a), JsonValue::Number(b)) => Some(a.as_f64()? < b.as_f64()?),
            (JsonValue::String(a), JsonValue::String(b)) => Some(a < b),
            _ => None,
        },
        "$gt" | "$gte" => stronger("$lt", v1, v0),
        _ => None,
    }
}

/// Collapse single-element `$and`/`$or` envelopes, recursively
pub fn minimal_filter(value: &JsonValue) -> JsonValue {
    let JsonValue::Object(obj) = value else {
        return value.clone();
    };

    let mut out = Map::new();
    for (key, member) in obj {
        let member = match (key.as_str(), member) {
            (AND | OR | NOR, JsonValue::Array(items)) => {
                JsonValue::Array(items.iter().map(minimal_filter).collect())
            }
            _ => member.clone(),
        };
        out.insert(key.clone(), member);
    }

    if out.len() == 1 {
        if let Some((key, JsonValue::Array(items))) = out.iter().next() {
            if (key == AND || key == OR) && items.len() == 1 {
                return items[0].clone();
            }
        }
    }
    JsonValue::Object(out)
}
