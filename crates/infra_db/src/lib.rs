//! Infrastructure Database Layer
//!
//! PostgreSQL adapter for the settlement store port. Units of work are
//! database transactions; the invoice row lock (`SELECT ... FOR UPDATE`)
//! serializes concurrent settlements against the same invoice.
//!
//! # Example
//!
//! ```rust,ignore
//! use infra_db::{DatabaseConfig, PgSettlementStore, create_pool};
//!
//! let config = DatabaseConfig::new("postgres://localhost/parcel_ledger");
//! let pool = create_pool(config.clone()).await?;
//! let store = PgSettlementStore::with_config(pool, &config);
//! ```

pub mod error;
pub mod pool;
pub mod store;

pub use error::DatabaseError;
pub use pool::{create_pool, create_pool_from_url, DatabaseConfig, DatabasePool};
pub use store::PgSettlementStore;

/// Embedded migrations for the settlement schema
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");
