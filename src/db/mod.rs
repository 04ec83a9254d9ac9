//! Database access layer.
//!
//! - [`Db`]: master/replica routing client
//! - [`Node`]: one pool bound to one breaker
//! - [`Stmt`]: prepared statement multiplexed over every node
//! - [`Tx`] / [`TxStmt`]: transactions on the master
//! - DSN parsing, bind values and row rendering

pub mod client;
pub mod dsn;
#[macro_use]
pub mod macros;
pub mod node;
pub mod stmt;
pub mod tx;
pub mod types;
pub mod value;

pub use client::{Db, DbStats};
pub use dsn::{driver_url, parse_addr};
pub use node::{ExecResult, Node, NodeStats, Role};
pub use stmt::Stmt;
pub use tx::{Tx, TxStmt};
pub use types::{row_to_json, rows_to_json};
pub use value::Value;
