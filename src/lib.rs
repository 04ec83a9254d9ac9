//! Resilient SQL client.
//!
//! Splits traffic between one writable master and any number of read replicas, gates
//! every call with a per-node circuit breaker, and applies per-class timeouts (query,
//! exec, transaction) uniformly.
//!
//! ```no_run
//! use resilient_sql::{Config, Context, Db, args};
//!
//! # async fn run() -> resilient_sql::DbResult<()> {
//! let config = Config::new("app:secret@tcp(10.0.0.1:3306)/shop?parseTime=true")
//!     .with_replica("app:secret@tcp(10.0.0.2:3306)/shop?parseTime=true");
//! let db = Db::open(config)?;
//! let ctx = Context::background();
//!
//! db.exec(&ctx, "INSERT INTO orders (sku) VALUES (?)", &args!["A-1"]).await?;
//! let rows = db.query(&ctx, "SELECT sku FROM orders", &[]).await?;
//! # let _ = rows;
//! db.close().await;
//! # Ok(())
//! # }
//! ```

pub mod breaker;
pub mod cli;
pub mod config;
pub mod context;
pub mod db;
pub mod error;

pub use breaker::{Breaker, BreakerGroup, BreakerState, CircuitBreaker};
pub use config::{BreakerConfig, Config};
pub use context::Context;
pub use db::{Db, DbStats, ExecResult, Stmt, Tx, TxStmt, Value};
pub use error::{DbError, DbResult};
pub use sqlx::Row;
pub use sqlx::any::AnyRow;
