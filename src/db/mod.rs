//! Database layer
//!
//! SQLite is the default backend; MySQL is selected with
//! `database.driver: mysql`. Both sit behind [`DatabasePool`], and
//! repositories pick the concrete pool per call.
//!
//! ```ignore
//! use flock::config::DatabaseConfig;
//! use flock::db::{create_pool, migrations};
//!
//! let pool = create_pool(&DatabaseConfig::default()).await?;
//! migrations::run_migrations(&pool).await?;
//! pool.ping().await?;
//! ```

pub mod migrations;
pub mod pool;
pub mod repositories;

pub use pool::{
    create_pool, create_test_pool, DatabasePool, DynDatabasePool, MysqlDatabase, SqliteDatabase,
};
