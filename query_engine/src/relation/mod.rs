//! The data-source collaborator the builders execute against
//!
//! A [`Relation`] receives fully rendered SQL with numbered placeholders and
//! the values to bind, in order. Its errors are returned to callers as-is.

mod sqlx_backend;

pub use sqlx_backend::{PgRelation, SqliteRelation};

use async_trait::async_trait;
use serde_json::Value;

/// Unexecuted handle over one table of a data source
#[async_trait]
pub trait Relation: Send + Sync + 'static {
    /// Row type produced by row-returning terminals
    type Row: Send;

    /// Collaborator failure (not found, malformed SQL, connection loss)
    type Error: std::error::Error + Send + Sync + 'static;

    /// Table the queries select from
    fn table_name(&self) -> &str;

    /// Column used by `find`, `first` and `last`
    fn primary_key(&self) -> &str {
        "id"
    }

    async fn fetch_all(&self, sql: &str, params: &[Value]) -> Result<Vec<Self::Row>, Self::Error>;

    async fn fetch_optional(
        &self,
        sql: &str,
        params: &[Value],
    ) -> Result<Option<Self::Row>, Self::Error>;

    /// Fetch exactly one row; a missing row is the collaborator's error
    async fn fetch_one(&self, sql: &str, params: &[Value]) -> Result<Self::Row, Self::Error>;

    /// Run a statement returning a single integer (COUNT)
    async fn fetch_count(&self, sql: &str, params: &[Value]) -> Result<i64, Self::Error>;

    /// Run a statement returning a single nullable number (SUM/AVG/MIN/MAX)
    async fn fetch_number(&self, sql: &str, params: &[Value]) -> Result<Option<f64>, Self::Error>;

    /// Execution plan for diagnostics
    async fn explain(&self, sql: &str, params: &[Value]) -> Result<String, Self::Error>;
}
