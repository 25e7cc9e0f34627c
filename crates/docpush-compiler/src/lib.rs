//! Push-down compiler from algebra trees to the document store dialect
//!
//! A [`Compiler`] walks one [`AlgebraNode`](docpush_ir::AlgebraNode) tree
//! post-order into a [`PipelineAccumulator`] and finishes it as a
//! [`CompiledQuery`]: a direct find, an aggregation pipeline or a DML
//! statement. Predicates go through the boolean [`condition::ConditionMap`];
//! scalar expressions through the [`ExpressionTranslator`].

pub mod accumulator;
pub mod condition;
pub mod dynamic;
pub mod literal;

mod aggregate;
mod error;
mod expression;
mod mutation;
mod predicate;
mod project;
mod sort;
mod translate;

pub use accumulator::{CompiledQuery, DmlStatement, PipelineAccumulator, Stage, StageKind, UpdateForm};
pub use error::{CompileError, Result};
pub use expression::ExpressionTranslator;
pub use literal::{BlobResolver, InlineBlobResolver};
pub use predicate::{like_to_regex, PredicateTranslator};
pub use translate::Compiler;
