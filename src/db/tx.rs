//! Transactions on the master node.
//!
//! A [`Tx`] owns one physical transaction. `begin` is breaker-gated; statements inside
//! the transaction only report their outcome to the master breaker, since refusing a
//! statement halfway through would strand the transaction.
//!
//! The transaction timeout is fixed at `begin` as an absolute deadline that every later
//! call, commit and rollback included, runs under.

use crate::breaker::record;
use crate::context::Context;
use crate::db::node::{ExecResult, Node, PreparedHandle};
use crate::db::stmt::Stmt;
use crate::db::value::{Value, bind_all};
use crate::error::{DbError, DbResult};
use chrono::{DateTime, Utc};
use sqlx::any::AnyRow;
use sqlx::{Any, AnyConnection, Executor, Statement, Transaction};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

fn generate_transaction_id() -> String {
    format!("tx_{}", uuid::Uuid::new_v4().simple())
}

pub struct Tx {
    id: String,
    node: Arc<Node>,
    tx: Option<Transaction<'static, Any>>,
    deadline: Instant,
    started_at: DateTime<Utc>,
}

impl std::fmt::Debug for Tx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tx")
            .field("id", &self.id)
            .field("node", &self.node.name())
            .field("done", &self.is_done())
            .field("started_at", &self.started_at)
            .finish()
    }
}

impl Tx {
    pub(crate) async fn begin(node: Arc<Node>, ctx: &Context) -> DbResult<Self> {
        let mut deadline = Instant::now() + node.tran_timeout();
        if let Some(caller) = ctx.deadline() {
            deadline = deadline.min(caller);
        }
        let tx = node.begin(ctx).await?;
        let id = generate_transaction_id();

        info!(
            tx_id = %id,
            addr = %node.name(),
            timeout_secs = node.tran_timeout().as_secs(),
            "Transaction started"
        );

        Ok(Self {
            id,
            node,
            tx: Some(tx),
            deadline,
            started_at: Utc::now(),
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Whether commit or rollback already ran.
    pub fn is_done(&self) -> bool {
        self.tx.is_none()
    }

    fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Live connection, master node and time left. `TxDone` once terminated.
    fn parts(&mut self) -> DbResult<(&mut AnyConnection, &Node, Duration)> {
        let remaining = self.remaining();
        let tx = self.tx.as_mut().ok_or(DbError::TxDone)?;
        Ok((&mut **tx, &self.node, remaining))
    }

    pub async fn exec(&mut self, ctx: &Context, sql: &str, args: &[Value]) -> DbResult<ExecResult> {
        let (conn, node, limit) = self.parts()?;
        let result = node
            .with_deadline(ctx, "tx_exec", limit, async {
                Ok(bind_all(sqlx::query(sql), args).execute(conn).await?.into())
            })
            .await;
        record(node.breaker().as_ref(), &result);
        result
    }

    pub async fn query(&mut self, ctx: &Context, sql: &str, args: &[Value]) -> DbResult<Vec<AnyRow>> {
        let (conn, node, limit) = self.parts()?;
        let result = node
            .with_deadline(ctx, "tx_query", limit, async {
                Ok(bind_all(sqlx::query(sql), args).fetch_all(conn).await?)
            })
            .await;
        record(node.breaker().as_ref(), &result);
        result
    }

    /// First row of the result. `DbError::NoRows` leaves the transaction usable.
    pub async fn query_row(&mut self, ctx: &Context, sql: &str, args: &[Value]) -> DbResult<AnyRow> {
        let (conn, node, limit) = self.parts()?;
        let result = node
            .with_deadline(ctx, "tx_query_row", limit, async {
                Ok(bind_all(sqlx::query(sql), args).fetch_one(conn).await?)
            })
            .await;
        record(node.breaker().as_ref(), &result);
        result
    }

    /// Prepare a statement valid only inside this transaction.
    pub async fn prepare(&mut self, ctx: &Context, sql: &str) -> DbResult<TxStmt> {
        let tx_id = self.id.clone();
        let (conn, node, limit) = self.parts()?;
        let result = node
            .with_deadline(ctx, "tx_prepare", limit, async {
                let statement = conn.prepare(sql).await?;
                Ok(Arc::new(Statement::to_owned(&statement)))
            })
            .await;
        record(node.breaker().as_ref(), &result);
        let handle = result?;
        debug!(tx_id = %tx_id, "Statement prepared in transaction");
        Ok(TxStmt { tx_id, handle })
    }

    /// Re-prepare an existing logical statement inside this transaction.
    pub async fn stmt(&mut self, ctx: &Context, stmt: &Stmt) -> DbResult<TxStmt> {
        if stmt.is_closed() {
            return Err(DbError::StmtClosed);
        }
        self.prepare(ctx, stmt.sql()).await
    }

    /// Commit. A second commit returns `DbError::TxDone` without touching the server.
    pub async fn commit(&mut self, ctx: &Context) -> DbResult<()> {
        let remaining = self.remaining();
        let tx = self.tx.take().ok_or(DbError::TxDone)?;
        let result = self
            .node
            .with_deadline(ctx, "commit", remaining, async { Ok(tx.commit().await?) })
            .await;
        record(self.node.breaker().as_ref(), &result);
        match &result {
            Ok(()) => info!(tx_id = %self.id, "Transaction committed"),
            Err(e) => warn!(tx_id = %self.id, error = %e, "Transaction commit failed"),
        }
        result
    }

    /// Roll back. Inert once the transaction is terminated.
    pub async fn rollback(&mut self, ctx: &Context) -> DbResult<()> {
        let remaining = self.remaining();
        let Some(tx) = self.tx.take() else {
            return Ok(());
        };
        let result = self
            .node
            .with_deadline(ctx, "rollback", remaining, async { Ok(tx.rollback().await?) })
            .await;
        record(self.node.breaker().as_ref(), &result);
        match &result {
            Ok(()) => info!(tx_id = %self.id, "Transaction rolled back"),
            Err(e) => warn!(tx_id = %self.id, error = %e, "Transaction rollback failed"),
        }
        result
    }

    fn check_owner(&self, stmt: &TxStmt) -> DbResult<()> {
        if stmt.tx_id == self.id {
            return Ok(());
        }
        Err(DbError::invalid_operation(format!(
            "statement belongs to transaction {}, not {}",
            stmt.tx_id, self.id
        )))
    }
}

impl Drop for Tx {
    fn drop(&mut self) {
        if self.tx.is_some() {
            // sqlx queues the rollback when the transaction handle drops.
            warn!(tx_id = %self.id, "Transaction dropped without commit or rollback, rolling back");
        }
    }
}

/// A statement prepared inside one transaction.
pub struct TxStmt {
    tx_id: String,
    handle: PreparedHandle,
}

impl std::fmt::Debug for TxStmt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxStmt")
            .field("tx_id", &self.tx_id)
            .field("sql", &self.sql())
            .finish()
    }
}

impl TxStmt {
    pub fn tx_id(&self) -> &str {
        &self.tx_id
    }

    pub fn sql(&self) -> &str {
        self.handle.sql()
    }

    pub async fn exec(&self, tx: &mut Tx, ctx: &Context, args: &[Value]) -> DbResult<ExecResult> {
        tx.check_owner(self)?;
        let (conn, node, limit) = tx.parts()?;
        let result = node
            .with_deadline(ctx, "tx_stmt_exec", limit, async {
                Ok(bind_all(self.handle.query(), args).execute(conn).await?.into())
            })
            .await;
        record(node.breaker().as_ref(), &result);
        result
    }

    pub async fn query(&self, tx: &mut Tx, ctx: &Context, args: &[Value]) -> DbResult<Vec<AnyRow>> {
        tx.check_owner(self)?;
        let (conn, node, limit) = tx.parts()?;
        let result = node
            .with_deadline(ctx, "tx_stmt_query", limit, async {
                Ok(bind_all(self.handle.query(), args).fetch_all(conn).await?)
            })
            .await;
        record(node.breaker().as_ref(), &result);
        result
    }

    pub async fn query_row(&self, tx: &mut Tx, ctx: &Context, args: &[Value]) -> DbResult<AnyRow> {
        tx.check_owner(self)?;
        let (conn, node, limit) = tx.parts()?;
        let result = node
            .with_deadline(ctx, "tx_stmt_query_row", limit, async {
                Ok(bind_all(self.handle.query(), args).fetch_one(conn).await?)
            })
            .await;
        record(node.breaker().as_ref(), &result);
        result
    }
}
