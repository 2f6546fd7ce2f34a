use crate::validation::ValidationError;
use thiserror::Error;

/// Recoverable failures recorded by the query builders.
///
/// These never abort a chain: the offending call becomes a no-op and the
/// error is appended to the state's ordered error list.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
    #[error("No {kind} definition named '{name}'")]
    DefinitionNotFound { kind: &'static str, name: String },

    #[error("A {kind} definition named '{name}' is already registered")]
    DuplicateDefinition { kind: &'static str, name: String },

    #[error("Validation failed for '{name}': {reason}")]
    ValidationFailed { name: String, reason: String },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid operator: {0}")]
    InvalidOperator(String),

    #[error("Invalid sort direction: {0}")]
    InvalidDirection(String),

    #[error("Invalid union type: {0}")]
    InvalidUnionType(String),

    #[error("Invalid aggregate function: {0}")]
    InvalidFunction(String),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(#[from] ValidationError),

    #[error("{feature} is not supported by the {dialect} dialect")]
    UnsupportedByDialect {
        feature: &'static str,
        dialect: &'static str,
    },

    #[error("Union has no member queries")]
    EmptyUnion,

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl QueryError {
    pub fn not_found(kind: &'static str, name: &str) -> Self {
        QueryError::DefinitionNotFound {
            kind,
            name: name.to_string(),
        }
    }

    pub fn duplicate(kind: &'static str, name: &str) -> Self {
        QueryError::DuplicateDefinition {
            kind,
            name: name.to_string(),
        }
    }
}
