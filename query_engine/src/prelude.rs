//! Convenience re-exports for common query-engine usage

// State and builders
pub use crate::query_builder::{
    FilterEngine, GroupingEngine, HavingEngine, JoinEngine, PaginationEngine, QueryEngine, QueryState,
    SortEngine, UnionEngine,
};

// Definitions and clause types
pub use crate::query_builder::{
    AggregateFunction, AppliedOperation, CursorDirection, FilterCondition, FilterDefinition,
    FilterOperator, GroupDefinition, HavingCondition, HavingDefinition, JoinClause, JoinDefinition,
    JoinType, NullsOrder, OperationKind, PageInfo, RangeBucket, SortDefinition, SortDirection,
    SqlFragment, Subquery,
};

// Collaborators
pub use crate::dialect::{DateBucket, DialectStrategy};
pub use crate::relation::{PgRelation, Relation, SqliteRelation};

// Errors and validation
pub use crate::errors::QueryError;
pub use crate::validation::{ValidatedFieldName, ValidatedTableName, ValidationError};

// Configuration
pub use config::{DialectKind, EngineConfig, UnionType};

// Common external dependencies that are frequently used
pub use async_trait::async_trait;
pub use serde_json::{json, Value};
