//! Pipeline accumulator
//!
//! Mutable state threaded depth-first through one statement's algebra tree.
//! Translators append stages, filters and helper fields; nothing is removed
//! once added. [`PipelineAccumulator::finish`] reads the state out once and
//! picks the direct find, the aggregation pipeline or the DML form.

use docpush_ir::{Field, ModifyOp, RowMapping};
use indexmap::{IndexMap, IndexSet};
use serde::Serialize;
use serde_json::{json, Map, Value as JsonValue};
use tracing::debug;

use crate::condition::{minimal_filter, AND};
use crate::dynamic;
use crate::error::{CompileError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StageKind {
    Match,
    Project,
    AddFields,
    Group,
    Sort,
    Skip,
    Limit,
    Unwind,
}

impl StageKind {
    pub fn key(self) -> &'static str {
        match self {
            StageKind::Match => "$match",
            StageKind::Project => "$project",
            StageKind::AddFields => "$addFields",
            StageKind::Group => "$group",
            StageKind::Sort => "$sort",
            StageKind::Skip => "$skip",
            StageKind::Limit => "$limit",
            StageKind::Unwind => "$unwind",
        }
    }
}

/// One pipeline stage with its optional single-filter equivalent
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stage {
    pub kind: StageKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direct: Option<JsonValue>,
    pub pipeline: JsonValue,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateForm {
    #[default]
    Document,
    Pipeline,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DmlStatement {
    pub operation: ModifyOp,
    pub collection: String,
    pub filter: JsonValue,
    /// Insert documents, or the update document / update pipeline stages
    pub documents: Vec<JsonValue>,
    pub update_form: UpdateForm,
    pub only_one: bool,
    pub parameterized: bool,
}

/// Output of one compiled statement
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CompiledQuery {
    Find {
        collection: String,
        filter: JsonValue,
        #[serde(skip_serializing_if = "Option::is_none")]
        projection: Option<JsonValue>,
    },
    Aggregate {
        collection: String,
        stages: Vec<JsonValue>,
    },
    Dml(DmlStatement),
}

impl CompiledQuery {
    /// Short label of the output form
    pub fn form(&self) -> &'static str {
        match self {
            CompiledQuery::Find { .. } => "find",
            CompiledQuery::Aggregate { .. } => "aggregate",
            CompiledQuery::Dml(_) => "dml",
        }
    }
}

#[derive(Debug, Default)]
pub struct PipelineAccumulator {
    stages: Vec<Stage>,
    filters: Vec<JsonValue>,
    /// Scan-level logical names, in first-use order
    field_uses: IndexSet<String>,
    pre_projections: IndexMap<String, JsonValue>,
    helper_count: usize,
    has_project: bool,
    has_group: bool,
    only_one: bool,
    /// Set once a modification begins; its presence selects the DML form
    operation: Option<ModifyOp>,
    /// Projection aliases below a modification, to physical names
    dml_aliases: IndexMap<String, String>,
    mapping: RowMapping,
    entity: Option<String>,
    collection: Option<String>,
    documents: Vec<JsonValue>,
    update_form: UpdateForm,
}

impl PipelineAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the scanned entity. Inside a mutation the target entity
    /// registered by [`begin_dml`](Self::begin_dml) stays in effect.
    pub fn set_source(&mut self, entity: &str, collection: String, mapping: RowMapping) {
        if self.is_dml() && !self.mapping.is_empty() {
            return;
        }
        self.entity = Some(entity.to_string());
        self.collection = Some(collection);
        self.mapping = mapping;
    }

    pub fn begin_dml(&mut self, operation: ModifyOp, entity: &str, collection: String, mapping: RowMapping) {
        self.operation = Some(operation);
        self.entity = Some(entity.to_string());
        self.collection = Some(collection);
        self.mapping = mapping;
    }

    pub fn add_stage(&mut self, kind: StageKind, direct: Option<JsonValue>, pipeline: JsonValue) {
        if kind != StageKind::AddFields {
            self.flush_helpers();
        }
        debug!(stage = kind.key(), %pipeline, "emitted stage");
        self.stages.push(Stage {
            kind,
            direct,
            pipeline,
        });
    }

    /// Add a top-level filter and its `$match` stage
    pub fn add_filter(&mut self, filter: JsonValue) {
        if filter.as_object().is_some_and(|f| f.is_empty()) {
            return;
        }
        let minimal = minimal_filter(&filter);
        self.filters.push(filter);
        self.add_stage(StageKind::Match, Some(minimal.clone()), json!({ "$match": minimal }));
    }

    /// All accumulated filters as one minimal document
    pub fn get_filter(&self) -> JsonValue {
        match self.filters.as_slice() {
            [] => json!({}),
            [single] => minimal_filter(single),
            many => minimal_filter(&json!({ AND: many })),
        }
    }

    pub fn record_field_use(&mut self, name: &str) {
        self.field_uses.insert(name.to_string());
    }

    /// Materialize `expr` as a helper field, returning its name
    pub fn add_helper(&mut self, expr: JsonValue) -> String {
        let name = format!("__temp{}", self.helper_count);
        self.helper_count += 1;
        self.pre_projections.insert(name.clone(), expr);
        name
    }

    fn flush_helpers(&mut self) {
        if self.pre_projections.is_empty() {
            return;
        }
        let helpers: Map<String, JsonValue> = std::mem::take(&mut self.pre_projections).into_iter().collect();
        self.add_stage(StageKind::AddFields, None, json!({ "$addFields": helpers }));
    }

    /// Name used for input field `index` of `row`: physical inside a
    /// mutation, logical (and recorded as used) otherwise.
    ///
    /// Inside a mutation the name must be a projection alias or a column of
    /// the target entity.
    pub fn resolve_field(&mut self, row: &[Field], index: usize) -> Result<String> {
        let field = row.get(index).ok_or_else(|| {
            CompileError::InvalidFieldReference(format!("${} in a row of {} fields", index, row.len()))
        })?;
        let name = field.name.as_str();

        if self.is_dml() {
            return self
                .dml_aliases
                .get(name)
                .map(String::as_str)
                .or_else(|| self.mapping.physical_name(name))
                .map(str::to_string)
                .ok_or_else(|| {
                    CompileError::InvalidFieldReference(format!(
                        "{} is not a column of {}",
                        name,
                        self.entity.as_deref().unwrap_or("the target")
                    ))
                });
        }
        if self.mapping.physical_name(name).is_some() {
            self.record_field_use(name);
        }
        Ok(name.to_string())
    }

    /// Make `alias` resolve to `physical` for the rest of a mutation
    pub fn alias_field(&mut self, alias: &str, physical: String) {
        self.dml_aliases.insert(alias.to_string(), physical);
    }

    pub fn physical_name(&self, logical: &str) -> Option<&str> {
        self.mapping.physical_name(logical)
    }

    pub fn mapping(&self) -> &RowMapping {
        &self.mapping
    }

    pub fn get_necessary_physical_fields(&self) -> Vec<String> {
        self.field_uses
            .iter()
            .filter_map(|name| self.mapping.physical_name(name))
            .map(str::to_string)
            .collect()
    }

    /// Physical ordering for an identity scan
    pub fn reorder_physical(&self) -> Vec<String> {
        self.mapping.physical_names()
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn is_dml(&self) -> bool {
        self.operation.is_some()
    }

    pub fn only_one(&self) -> bool {
        self.only_one
    }

    pub fn set_only_one(&mut self) {
        self.only_one = true;
    }

    pub fn has_project(&self) -> bool {
        self.has_project
    }

    pub fn mark_project(&mut self) {
        self.has_project = true;
    }

    pub fn has_group(&self) -> bool {
        self.has_group
    }

    pub fn mark_group(&mut self) {
        self.has_group = true;
    }

    pub fn operation(&self) -> Option<ModifyOp> {
        self.operation
    }

    pub fn add_document(&mut self, document: JsonValue) {
        self.documents.push(document);
    }

    pub fn set_update_form(&mut self, form: UpdateForm) {
        self.update_form = form;
    }

    /// `{logical: "$physical"}` pass-through opening every pipeline
    pub fn opening_projection(&self) -> Option<JsonValue> {
        // Without a projection or grouping the whole scanned row is the output
        let names: Vec<String> = if !self.has_project && !self.has_group {
            self.mapping.logical_names()
        } else if !self.field_uses.is_empty() {
            self.field_uses.iter().cloned().collect()
        } else {
            return None;
        };

        let mut projection = Map::new();
        for name in names {
            if let Some(physical) = self.mapping.physical_name(&name) {
                projection.insert(name.clone(), JsonValue::String(format!("${}", physical)));
            }
        }
        if projection.is_empty() {
            return None;
        }
        Some(json!({ "$project": projection }))
    }

    /// Opening projection followed by every accumulated stage
    pub fn pipeline(&self) -> Vec<JsonValue> {
        self.opening_projection()
            .into_iter()
            .chain(self.stages.iter().map(|s| s.pipeline.clone()))
            .collect()
    }

    fn is_direct(&self) -> bool {
        if self.helper_count > 0 || self.has_group {
            return false;
        }
        let mut projected = false;
        for stage in &self.stages {
            match stage.kind {
                StageKind::Match if !projected => {}
                StageKind::Project if !projected && stage.direct.is_some() => projected = true,
                _ => return false,
            }
        }
        true
    }

    pub fn finish(self) -> CompiledQuery {
        let collection = self.collection.clone().unwrap_or_default();

        if let Some(operation) = self.operation {
            let filter = self.get_filter();
            let parameterized =
                dynamic::contains_placeholders(&filter) || self.documents.iter().any(dynamic::contains_placeholders);
            return CompiledQuery::Dml(DmlStatement {
                operation,
                collection,
                filter,
                documents: self.documents,
                update_form: self.update_form,
                only_one: self.only_one,
                parameterized,
            });
        }

        if self.is_direct() {
            let filter = self.rename_to_physical(&self.get_filter());
            let projection = self
                .stages
                .iter()
                .find(|s| s.kind == StageKind::Project)
                .and_then(|s| s.direct.as_ref())
                .map(|p| self.rename_to_physical(p))
                .or_else(|| {
                    let all: Map<String, JsonValue> =
                        self.reorder_physical().into_iter().map(|p| (p, json!(1))).collect();
                    (!all.is_empty()).then_some(JsonValue::Object(all))
                });
            return CompiledQuery::Find {
                collection,
                filter,
                projection,
            };
        }

        CompiledQuery::Aggregate {
            collection,
            stages: self.pipeline(),
        }
    }

    /// Rewrite logical field names of a find document to physical ones
    fn rename_to_physical(&self, value: &JsonValue) -> JsonValue {
        match value {
            JsonValue::Object(obj) => {
                let mut out = Map::new();
                for (key, member) in obj {
                    if key == "$expr" {
                        out.insert(key.clone(), self.rename_references(member));
                    } else if key.starts_with('$') {
                        out.insert(key.clone(), self.rename_to_physical(member));
                    } else {
                        out.insert(self.rename_path(key), member.clone());
                    }
                }
                JsonValue::Object(out)
            }
            JsonValue::Array(items) => JsonValue::Array(items.iter().map(|i| self.rename_to_physical(i)).collect()),
            other => other.clone(),
        }
    }

    // "$name" references inside computed expressions
    fn rename_references(&self, value: &JsonValue) -> JsonValue {
        match value {
            JsonValue::String(s) if s.starts_with('$') && !s.starts_with("$$") => {
                JsonValue::String(format!("${}", self.rename_path(&s[1..])))
            }
            JsonValue::Object(obj) => JsonValue::Object(
                obj.iter()
                    .map(|(k, v)| (k.clone(), self.rename_references(v)))
                    .collect(),
            ),
            JsonValue::Array(items) => JsonValue::Array(items.iter().map(|i| self.rename_references(i)).collect()),
            other => other.clone(),
        }
    }

    fn rename_path(&self, path: &str) -> String {
        let (head, rest) = match path.split_once('.') {
            Some((head, rest)) => (head, Some(rest)),
            None => (path, None),
        };
        let physical = self.mapping.physical_name(head).unwrap_or(head);
        match rest {
            Some(rest) => format!("{}.{}", physical, rest),
            None => physical.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docpush_ir::DataType;

    fn emps() -> RowMapping {
        RowMapping::from_columns([
            ("_id", 0, DataType::String),
            ("ename", 2, DataType::Varchar(None)),
            ("deptno", 7, DataType::Int32),
        ])
    }

    fn accumulator() -> PipelineAccumulator {
        let mut acc = PipelineAccumulator::new();
        acc.set_source("emps", "emps".to_string(), emps());
        acc
    }

    #[test]
    fn test_get_filter_combines_and_minimizes() {
        let mut acc = accumulator();
        assert_eq!(acc.get_filter(), json!({}));

        acc.add_filter(json!({"$or": [{"deptno": 20}]}));
        assert_eq!(acc.get_filter(), json!({"deptno": 20}));

        acc.add_filter(json!({"ename": "x"}));
        assert_eq!(acc.get_filter(), json!({"$and": [{"deptno": 20}, {"ename": "x"}]}));
    }

    #[test]
    fn test_helpers_flush_before_next_stage() {
        let mut acc = accumulator();
        let first = acc.add_helper(json!({"$add": ["$deptno", 1]}));
        let second = acc.add_helper(json!({"$strLenCP": "$ename"}));
        assert_eq!(first, "__temp0");
        assert_eq!(second, "__temp1");

        acc.add_filter(json!({"__temp0": 21}));

        let kinds: Vec<StageKind> = acc.stages().iter().map(|s| s.kind).collect();
        assert_eq!(kinds, vec![StageKind::AddFields, StageKind::Match]);
        assert_eq!(acc.add_helper(json!(1)), "__temp2");
    }

    #[test]
    fn test_field_uses_drive_opening_projection() {
        let mut acc = accumulator();
        let row = emps().row_type();
        assert_eq!(acc.resolve_field(&row, 2).unwrap(), "deptno");
        assert!(acc.resolve_field(&row, 9).is_err());

        assert_eq!(acc.get_necessary_physical_fields(), vec!["col7"]);
        assert_eq!(
            acc.opening_projection(),
            Some(json!({"$project": {"_id": "$_id", "ename": "$col2", "deptno": "$col7"}}))
        );
        acc.mark_project();
        assert_eq!(
            acc.opening_projection(),
            Some(json!({"$project": {"deptno": "$col7"}}))
        );
        assert_eq!(acc.reorder_physical(), vec!["_id", "col2", "col7"]);
    }

    #[test]
    fn test_dml_resolves_physical_names() {
        let mut acc = PipelineAccumulator::new();
        acc.begin_dml(ModifyOp::Delete, "emps", "tab-3".to_string(), emps());
        let row = emps().row_type();

        assert_eq!(acc.resolve_field(&row, 2).unwrap(), "col7");
        assert!(acc.get_necessary_physical_fields().is_empty());
    }

    #[test]
    fn test_dml_resolves_aliases_and_rejects_unknown_names() {
        let mut acc = PipelineAccumulator::new();
        acc.begin_dml(ModifyOp::Delete, "emps", "tab-3".to_string(), emps());
        acc.alias_field("dept", "col7".to_string());

        let row = vec![
            Field::new("dept", DataType::Int32),
            Field::new("bonus", DataType::Int32),
        ];
        assert_eq!(acc.resolve_field(&row, 0).unwrap(), "col7");
        assert!(matches!(
            acc.resolve_field(&row, 1),
            Err(CompileError::InvalidFieldReference(_))
        ));
    }

    #[test]
    fn test_dml_operation_carries_into_statement() {
        let mut acc = PipelineAccumulator::new();
        assert_eq!(acc.operation(), None);
        acc.begin_dml(ModifyOp::Update, "emps", "tab-3".to_string(), emps());
        assert!(acc.is_dml());
        assert_eq!(acc.operation(), Some(ModifyOp::Update));

        match acc.finish() {
            CompiledQuery::Dml(statement) => {
                assert_eq!(statement.operation, ModifyOp::Update);
                assert_eq!(statement.collection, "tab-3");
            }
            other => panic!("expected dml, got {:?}", other),
        }
    }

    #[test]
    fn test_direct_find_renames_to_physical() {
        let mut acc = accumulator();
        acc.add_filter(json!({"deptno": {"$gt": 10}, "$expr": {"$eq": ["$deptno", "$ename"]}}));

        match acc.finish() {
            CompiledQuery::Find { filter, projection, .. } => {
                assert_eq!(
                    filter,
                    json!({"col7": {"$gt": 10}, "$expr": {"$eq": ["$col7", "$col2"]}})
                );
                assert_eq!(projection, Some(json!({"_id": 1, "col2": 1, "col7": 1})));
            }
            other => panic!("expected find, got {:?}", other),
        }
    }
}
