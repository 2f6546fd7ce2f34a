//! Query builder utilities
//!
//! Every builder wraps one [`QueryState`], mutates it in place through chained
//! calls and hands it on with [`QueryEngine::into_state`]. [`UnionEngine`]
//! instead reads several finished states.

pub mod aggregation;
pub mod engine;
pub mod filter;
pub mod fragment;
pub mod grouping;
pub mod having;
pub mod join;
pub mod operation_log;
pub mod operator;
pub mod ordering;
pub mod pagination;
pub mod sql_generation;
pub mod state;
pub mod union;

#[cfg(test)]
mod tests;


pub use aggregation::AggregateFunction;
pub use engine::{QueryEngine, Registry};
pub use filter::{FilterBuilder, FilterCondition, FilterDefinition, FilterEngine};
pub use fragment::{SqlFragment, Subquery};
pub use grouping::{GroupDefinition, GroupTarget, GroupingEngine, RangeBucket};
pub use having::{HavingCondition, HavingDefinition, HavingEngine, HavingTarget};
pub use join::{JoinClause, JoinCondition, JoinDefinition, JoinEngine, JoinSource, JoinStrategy, JoinType};
pub use operation_log::{AppliedOperation, OperationKind};
pub use operator::FilterOperator;
pub use ordering::{NullsOrder, OrderTerm, SortDefinition, SortDirection, SortEngine, SortTarget};
pub use pagination::{CursorDirection, PageInfo, PaginationEngine, PaginationState};
pub use sql_generation::SqlGenerator;
pub use state::QueryState;
pub use union::UnionEngine;
