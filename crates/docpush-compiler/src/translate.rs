//! Algebra tree traversal
//!
//! [`Compiler::visit`] matches the closed [`NodeKind`] set and translates each
//! node after its input (post-order), threading one accumulator per statement.

use docpush_ir::{AlgebraNode, CatalogProvider, NodeKind, RowMapping};
use tracing::{debug, info};

use crate::accumulator::{CompiledQuery, PipelineAccumulator, StageKind};
use crate::aggregate::translate_aggregate;
use crate::error::{CompileError, Result};
use crate::literal::{BlobResolver, InlineBlobResolver};
use crate::mutation::ModifyRequest;
use crate::predicate::PredicateTranslator;
use crate::project::translate_project;
use crate::sort::translate_sort;

pub struct Compiler<'a> {
    catalog: &'a dyn CatalogProvider,
    blobs: &'a dyn BlobResolver,
}

impl<'a> Compiler<'a> {
    pub fn new(catalog: &'a dyn CatalogProvider) -> Self {
        Self {
            catalog,
            blobs: &InlineBlobResolver,
        }
    }

    /// Use `blobs` for binary literals instead of inline hex strings
    pub fn with_blob_resolver(mut self, blobs: &'a dyn BlobResolver) -> Self {
        self.blobs = blobs;
        self
    }

    pub fn blobs(&self) -> &'a dyn BlobResolver {
        self.blobs
    }

    /// Compile one statement
    pub fn compile(&self, plan: &AlgebraNode) -> Result<CompiledQuery> {
        let fingerprint = plan.fingerprint();
        debug!(%fingerprint, "compiling plan");

        let acc = self.translate(plan)?;
        // A modification keeps only its filter, so no other stage may be lost
        if acc.is_dml() {
            if let Some(stage) = acc.stages().iter().find(|s| s.kind != StageKind::Match) {
                return Err(CompileError::UnsupportedOperation(format!(
                    "{} stage below a modification",
                    stage.kind.key()
                )));
            }
        }
        let compiled = acc.finish();

        info!(%fingerprint, form = compiled.form(), "compiled plan");
        Ok(compiled)
    }

    /// Translate into an accumulator without finishing it
    pub fn translate(&self, plan: &AlgebraNode) -> Result<PipelineAccumulator> {
        let mut acc = PipelineAccumulator::new();
        self.visit(plan, &mut acc)?;
        Ok(acc)
    }

    pub(crate) fn visit(&self, node: &AlgebraNode, acc: &mut PipelineAccumulator) -> Result<()> {
        match &node.kind {
            NodeKind::Scan { entity, mapping } => {
                let mapping = self.resolve_mapping(entity, mapping)?;
                let collection = self.collection_name(entity);
                acc.set_source(entity, collection, mapping);
                Ok(())
            }
            NodeKind::Values { .. } | NodeKind::Documents { .. } => Err(CompileError::UnsupportedOperation(
                "literal rows outside an INSERT".to_string(),
            )),
            NodeKind::Filter { input, condition } => {
                self.visit(input, acc)?;
                PredicateTranslator::new(acc, &input.row_type, self.blobs).translate_filter(condition)
            }
            NodeKind::Project { input, projects } => {
                self.visit(input, acc)?;
                translate_project(acc, &input.row_type, projects, self.blobs)
            }
            NodeKind::Aggregate {
                input,
                group_keys,
                agg_calls,
            } => {
                self.visit(input, acc)?;
                translate_aggregate(acc, &input.row_type, group_keys, agg_calls)
            }
            NodeKind::Sort {
                input,
                collation,
                offset,
                fetch,
            } => {
                self.visit(input, acc)?;
                translate_sort(acc, &input.row_type, collation, *offset, *fetch)
            }
            NodeKind::Modify {
                input,
                entity,
                mapping,
                operation,
                update_columns,
                source_expressions,
            } => self.translate_modify(
                acc,
                ModifyRequest {
                    input,
                    entity,
                    mapping,
                    operation: *operation,
                    update_columns,
                    source_expressions,
                },
            ),
        }
    }

    /// The node's own mapping, or the catalog's when the node carries none
    pub(crate) fn resolve_mapping(&self, entity: &str, mapping: &RowMapping) -> Result<RowMapping> {
        if mapping.is_empty() {
            Ok(self.catalog.row_mapping(entity)?)
        } else {
            Ok(mapping.clone())
        }
    }

    pub(crate) fn collection_name(&self, entity: &str) -> String {
        self.catalog
            .collection_name(entity)
            .unwrap_or_else(|_| entity.to_string())
    }
}
