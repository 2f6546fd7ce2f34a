//! # QueryHaus
//!
//! Composable SQL query construction for PostgreSQL, MySQL and SQLite: named
//! filters, sorts, joins, groups, HAVING predicates, pagination and unions,
//! all rendered with bound parameters.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use queryhaus::prelude::*;
//!
//! #[derive(Debug, FromRow)]
//! pub struct Product {
//!     pub id: i32,
//!     pub name: String,
//!     pub price: i32,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let queryhaus = QueryHaus::from_env().await?;
//!
//!     let mut filters = FilterEngine::new(queryhaus.query::<Product>("products")?)
//!         .with_allowed_fields(&["status", "price"]);
//!     filters.apply_filters([("status", json!("active")), ("price", json!({"gte": 100}))]);
//!
//!     let mut pages = PaginationEngine::new(filters.into_state());
//!     pages.paginate(Some(2), Some(20)).await?;
//!     for product in pages.records().await? {
//!         println!("{}: {}", product.id, product.name);
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod core;
pub mod errors;
pub mod prelude;

// Re-export the main public types for convenience
pub use core::QueryHaus;
pub use errors::QueryHausError;

// Re-export centralized config
pub use config::{AppConfig, DatabaseConfig, DialectKind, EngineConfig, UnionType};

// Re-export the engine crate
pub use query_engine;

// Re-export external dependencies used in public API
pub use async_trait;
pub use sqlx;
