use docpush_ir::CatalogError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("Unsupported expression: {0}")]
    UnsupportedExpression(String),

    #[error("Aggregate modifier cannot be pushed down: {0}")]
    UnsupportedAggregateModifier(String),

    #[error("Unsupported aggregate: {0}")]
    UnsupportedAggregate(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Unsupported null ordering: {0}")]
    UnsupportedNullOrdering(String),

    #[error("Invalid field reference: {0}")]
    InvalidFieldReference(String),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("No value bound for dynamic parameter ?{0}")]
    MissingParameter(u64),

    #[error("Invalid literal: {0}")]
    InvalidLiteral(String),
}

impl CompileError {
    pub(crate) fn unsupported(expr: &impl std::fmt::Display) -> Self {
        CompileError::UnsupportedExpression(expr.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CompileError>;
