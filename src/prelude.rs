//! Convenience re-exports for common QueryHaus usage
//!
//! ```rust
//! use queryhaus::prelude::*;
//! ```

// Core QueryHaus components
pub use crate::core::QueryHaus;
pub use crate::errors::QueryHausError;

// Re-export centralized config
pub use config::{AppConfig, DatabaseConfig};

// Builders, definitions, collaborators and errors
pub use query_engine::prelude::*;

// Common external dependencies
pub use async_trait;
pub use sqlx;
pub use tokio;

// Commonly used sqlx types
pub use sqlx::{FromRow, PgPool, SqlitePool};
