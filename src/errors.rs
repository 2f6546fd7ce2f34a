//! Error types for the QueryHaus crate
//!
//! Errors raised while wiring configuration and connections together. Builder
//! errors stay on the builders (see [`query_engine::QueryError`]).

use query_engine::validation::ValidationError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueryHausError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Database connection error: {0}")]
    DatabaseConnection(#[from] sqlx::Error),

    #[error("Invalid table name: {0}")]
    InvalidTable(#[from] ValidationError),
}
