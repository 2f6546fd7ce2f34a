//! sqlx-backed relations for PostgreSQL and SQLite

use super::Relation;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgRow;
use sqlx::sqlite::SqliteRow;
use sqlx::{PgPool, Row, SqlitePool};
use std::marker::PhantomData;

// Postgres binding: RFC3339 strings become timestamps and UUID strings become
// uuids so comparisons against typed columns work without casts.
macro_rules! bind_pg_param {
    ($query:expr, $param:expr) => {
        match $param {
            Value::String(s) => {
                if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
                    $query.bind(dt.with_timezone(&chrono::Utc))
                } else if let Ok(uuid) = uuid::Uuid::parse_str(s) {
                    $query.bind(uuid)
                } else {
                    $query.bind(s.clone())
                }
            }
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    if i >= i32::MIN as i64 && i <= i32::MAX as i64 {
                        $query.bind(i as i32)
                    } else {
                        $query.bind(i)
                    }
                } else if let Some(f) = n.as_f64() {
                    $query.bind(f)
                } else {
                    $query.bind(n.to_string())
                }
            }
            Value::Bool(b) => $query.bind(*b),
            Value::Null => $query.bind(Option::<String>::None),
            other => $query.bind(other.to_string()),
        }
    };
}

macro_rules! bind_sqlite_param {
    ($query:expr, $param:expr) => {
        match $param {
            Value::String(s) => $query.bind(s.clone()),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    $query.bind(i)
                } else if let Some(f) = n.as_f64() {
                    $query.bind(f)
                } else {
                    $query.bind(n.to_string())
                }
            }
            Value::Bool(b) => $query.bind(*b),
            Value::Null => $query.bind(Option::<String>::None),
            other => $query.bind(other.to_string()),
        }
    };
}

/// Relation over a PostgreSQL table whose rows decode into `T`
pub struct PgRelation<T> {
    pool: PgPool,
    table: String,
    primary_key: String,
    _row: PhantomData<fn() -> T>,
}

impl<T> PgRelation<T> {
    pub fn new(pool: PgPool, table: impl Into<String>) -> Self {
        Self {
            pool,
            table: table.into(),
            primary_key: "id".to_string(),
            _row: PhantomData,
        }
    }

    pub fn with_primary_key(mut self, primary_key: impl Into<String>) -> Self {
        self.primary_key = primary_key.into();
        self
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl<T> Relation for PgRelation<T>
where
    T: for<'r> sqlx::FromRow<'r, PgRow> + Send + Unpin + 'static,
{
    type Row = T;
    type Error = sqlx::Error;

    fn table_name(&self) -> &str {
        &self.table
    }

    fn primary_key(&self) -> &str {
        &self.primary_key
    }

    async fn fetch_all(&self, sql: &str, params: &[Value]) -> Result<Vec<T>, sqlx::Error> {
        let mut query = sqlx::query_as::<sqlx::Postgres, T>(sql);
        for param in params {
            query = bind_pg_param!(query, param);
        }
        query.fetch_all(&self.pool).await
    }

    async fn fetch_optional(&self, sql: &str, params: &[Value]) -> Result<Option<T>, sqlx::Error> {
        let mut query = sqlx::query_as::<sqlx::Postgres, T>(sql);
        for param in params {
            query = bind_pg_param!(query, param);
        }
        query.fetch_optional(&self.pool).await
    }

    async fn fetch_one(&self, sql: &str, params: &[Value]) -> Result<T, sqlx::Error> {
        let mut query = sqlx::query_as::<sqlx::Postgres, T>(sql);
        for param in params {
            query = bind_pg_param!(query, param);
        }
        query.fetch_one(&self.pool).await
    }

    async fn fetch_count(&self, sql: &str, params: &[Value]) -> Result<i64, sqlx::Error> {
        let mut query = sqlx::query_scalar::<sqlx::Postgres, i64>(sql);
        for param in params {
            query = bind_pg_param!(query, param);
        }
        query.fetch_one(&self.pool).await
    }

    async fn fetch_number(&self, sql: &str, params: &[Value]) -> Result<Option<f64>, sqlx::Error> {
        let mut query = sqlx::query_scalar::<sqlx::Postgres, Option<f64>>(sql);
        for param in params {
            query = bind_pg_param!(query, param);
        }
        query.fetch_one(&self.pool).await
    }

    async fn explain(&self, sql: &str, params: &[Value]) -> Result<String, sqlx::Error> {
        let explain_sql = format!("EXPLAIN {}", sql);
        let mut query = sqlx::query_scalar::<sqlx::Postgres, String>(&explain_sql);
        for param in params {
            query = bind_pg_param!(query, param);
        }
        let lines = query.fetch_all(&self.pool).await?;
        Ok(lines.join("\n"))
    }
}

/// Relation over a SQLite table whose rows decode into `T`
pub struct SqliteRelation<T> {
    pool: SqlitePool,
    table: String,
    primary_key: String,
    _row: PhantomData<fn() -> T>,
}

impl<T> SqliteRelation<T> {
    pub fn new(pool: SqlitePool, table: impl Into<String>) -> Self {
        Self {
            pool,
            table: table.into(),
            primary_key: "id".to_string(),
            _row: PhantomData,
        }
    }

    pub fn with_primary_key(mut self, primary_key: impl Into<String>) -> Self {
        self.primary_key = primary_key.into();
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl<T> Relation for SqliteRelation<T>
where
    T: for<'r> sqlx::FromRow<'r, SqliteRow> + Send + Unpin + 'static,
{
    type Row = T;
    type Error = sqlx::Error;

    fn table_name(&self) -> &str {
        &self.table
    }

    fn primary_key(&self) -> &str {
        &self.primary_key
    }

    async fn fetch_all(&self, sql: &str, params: &[Value]) -> Result<Vec<T>, sqlx::Error> {
        let mut query = sqlx::query_as::<sqlx::Sqlite, T>(sql);
        for param in params {
            query = bind_sqlite_param!(query, param);
        }
        query.fetch_all(&self.pool).await
    }

    async fn fetch_optional(&self, sql: &str, params: &[Value]) -> Result<Option<T>, sqlx::Error> {
        let mut query = sqlx::query_as::<sqlx::Sqlite, T>(sql);
        for param in params {
            query = bind_sqlite_param!(query, param);
        }
        query.fetch_optional(&self.pool).await
    }

    async fn fetch_one(&self, sql: &str, params: &[Value]) -> Result<T, sqlx::Error> {
        let mut query = sqlx::query_as::<sqlx::Sqlite, T>(sql);
        for param in params {
            query = bind_sqlite_param!(query, param);
        }
        query.fetch_one(&self.pool).await
    }

    async fn fetch_count(&self, sql: &str, params: &[Value]) -> Result<i64, sqlx::Error> {
        let mut query = sqlx::query_scalar::<sqlx::Sqlite, i64>(sql);
        for param in params {
            query = bind_sqlite_param!(query, param);
        }
        query.fetch_one(&self.pool).await
    }

    async fn fetch_number(&self, sql: &str, params: &[Value]) -> Result<Option<f64>, sqlx::Error> {
        let mut query = sqlx::query_scalar::<sqlx::Sqlite, Option<f64>>(sql);
        for param in params {
            query = bind_sqlite_param!(query, param);
        }
        query.fetch_one(&self.pool).await
    }

    async fn explain(&self, sql: &str, params: &[Value]) -> Result<String, sqlx::Error> {
        let explain_sql = format!("EXPLAIN QUERY PLAN {}", sql);
        let mut query = sqlx::query::<sqlx::Sqlite>(&explain_sql);
        for param in params {
            query = bind_sqlite_param!(query, param);
        }
        let rows = query.fetch_all(&self.pool).await?;
        let lines = rows
            .iter()
            .map(|row| row.try_get::<String, _>("detail"))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(lines.join("\n"))
    }
}
