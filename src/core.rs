//! Core QueryHaus functionality
//!
//! This module contains the main QueryHaus struct, which owns the PostgreSQL
//! pool and hands out query states bound to validated tables.

use sqlx::postgres::PgRow;
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;

use crate::errors::QueryHausError;
use config::{AppConfig, DatabaseConfig, EngineConfig};
use query_engine::{PgRelation, QueryState, ValidatedTableName};

/// Main QueryHaus coordinator: a connection pool plus the engine settings
/// every query built from it starts with
pub struct QueryHaus {
    pool: PgPool,
    engine: EngineConfig,
}

impl QueryHaus {
    /// Connect using the database section and keep the engine section
    pub async fn new(config: AppConfig) -> Result<Self, QueryHausError> {
        let pool = Self::connect(&config.database).await?;
        Ok(Self {
            pool,
            engine: config.engine,
        })
    }

    /// Load configuration the usual way (`.env` / `queryhaus.toml`) and connect
    pub async fn from_env() -> Result<Self, QueryHausError> {
        let config = AppConfig::load()?;
        Self::new(config).await
    }

    /// Wrap an existing pool
    pub fn from_pool(pool: PgPool, engine: EngineConfig) -> Self {
        Self { pool, engine }
    }

    async fn connect(config: &DatabaseConfig) -> Result<PgPool, QueryHausError> {
        let connection_string = config.connection_string();

        let mut pool_options = sqlx::postgres::PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
            .idle_timeout(Duration::from_secs(config.idle_timeout_seconds));

        if config.max_lifetime_seconds > 0 {
            pool_options =
                pool_options.max_lifetime(Duration::from_secs(config.max_lifetime_seconds));
        }

        let pool = pool_options.connect(&connection_string).await?;
        query_engine::debug_log!(
            "connected to {}:{}/{}",
            config.host,
            config.port,
            config.database
        );
        Ok(pool)
    }

    /// Get database pool reference
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn engine_config(&self) -> &EngineConfig {
        &self.engine
    }

    /// Relation over `table` whose rows decode into `T`
    pub fn relation<T>(&self, table: &str) -> Result<PgRelation<T>, QueryHausError> {
        let table = ValidatedTableName::new(table)?;
        Ok(PgRelation::new(self.pool.clone(), table.into_string()))
    }

    /// Fresh query state over `table`, configured with this instance's engine settings
    pub fn query<T>(&self, table: &str) -> Result<QueryState<PgRelation<T>>, QueryHausError>
    where
        T: for<'r> sqlx::FromRow<'r, PgRow> + Send + Unpin + 'static,
    {
        let relation = self.relation::<T>(table)?;
        Ok(QueryState::with_config(Arc::new(relation), self.engine.clone()))
    }

    /// Check database connection health
    pub async fn health_check(&self) -> Result<(), QueryHausError> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }
}
