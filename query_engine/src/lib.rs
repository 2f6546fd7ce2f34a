//! Query Engine - composable, parameter-bound SQL query construction
//!
//! Builders for filters, sorts, joins, grouping, HAVING predicates,
//! pagination and unions accumulate clauses in a [`QueryState`] and render
//! them in a fixed order. Execution is delegated to a [`Relation`]; SQL syntax
//! that differs between backends is answered by a [`DialectStrategy`].

/// Conditional debug logging macros
/// These macros only compile in code when the `debug-logging` feature is enabled
#[cfg(feature = "debug-logging")]
#[macro_export]
macro_rules! debug_log {
    ($($arg:tt)*) => {
        tracing::debug!($($arg)*)
    };
}

#[cfg(not(feature = "debug-logging"))]
#[macro_export]
macro_rules! debug_log {
    ($($arg:tt)*) => {};
}

pub mod dialect;
pub mod errors;
pub mod prelude;
pub mod query_builder;
pub mod relation;
pub mod validation;

pub use dialect::{dialect_for, DateBucket, DialectStrategy, MySqlDialect, PostgresDialect, SqliteDialect};
pub use errors::QueryError;
pub use query_builder::{
    FilterEngine, GroupingEngine, HavingEngine, JoinEngine, PaginationEngine, QueryEngine, QueryState,
    SortEngine, UnionEngine,
};
pub use relation::{PgRelation, Relation, SqliteRelation};
pub use validation::{ValidatedFieldName, ValidatedTableName, ValidationError};
