//! A single physical endpoint.
//!
//! A `Node` pairs one connection pool with the breaker guarding its address. Every
//! primitive goes through [`Node::gated`]: breaker admission, then the driver call under
//! the effective deadline, then the outcome is reported back to the breaker.

use crate::breaker::{Breaker, BreakerGroup, BreakerState, CircuitBreaker, Permit, UNNAMED_BREAKER};
use crate::config::Config;
use crate::context::Context;
use crate::db::dsn::{driver_url, parse_addr};
use crate::db::value::{Value, bind_all};
use crate::error::{DbError, DbResult};
use serde::Serialize;
use sqlx::any::{AnyPoolOptions, AnyRow, AnyStatement};
use sqlx::{Any, AnyPool, Connection, Executor, Statement, Transaction};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

pub(crate) type PreparedHandle = Arc<AnyStatement<'static>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Master,
    Replica,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Master => write!(f, "master"),
            Self::Replica => write!(f, "replica"),
        }
    }
}

/// Result of a statement that returns no rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExecResult {
    pub rows_affected: u64,
    /// Only reported by drivers that track it (MySQL, SQLite).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_insert_id: Option<i64>,
}

impl From<sqlx::any::AnyQueryResult> for ExecResult {
    fn from(result: sqlx::any::AnyQueryResult) -> Self {
        Self {
            rows_affected: result.rows_affected(),
            last_insert_id: result.last_insert_id(),
        }
    }
}

/// Snapshot of one node for `Db::stats`.
#[derive(Debug, Clone, Serialize)]
pub struct NodeStats {
    pub addr: String,
    pub role: Role,
    pub breaker: BreakerState,
    pub open_connections: u32,
    pub idle_connections: usize,
    pub closed: bool,
}

#[derive(Debug)]
pub struct Node {
    addr: String,
    role: Role,
    pool: AnyPool,
    breaker: Arc<dyn Breaker>,
    query_timeout: Duration,
    exec_timeout: Duration,
    tran_timeout: Duration,
    closed: AtomicBool,
}

impl Node {
    /// Build a node for `dsn`. The pool connects lazily, so an unreachable endpoint
    /// surfaces on first use and is seen by the breaker.
    ///
    /// Fails with `DbError::Internal` outside a Tokio runtime.
    pub fn new(
        role: Role,
        dsn: &str,
        config: &Config,
        group: Option<&BreakerGroup>,
    ) -> DbResult<Self> {
        let addr = parse_addr(dsn);
        let breaker = match group {
            Some(group) => group.get(&addr),
            None => {
                let name = if addr.is_empty() { UNNAMED_BREAKER } else { addr.as_str() };
                Arc::new(CircuitBreaker::new(name, &config.breaker)) as Arc<dyn Breaker>
            }
        };
        if addr.is_empty() {
            debug!(role = %role, "DSN has no host:port, node gets a private breaker");
        }

        let url = driver_url(dsn)?;
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(DbError::internal(
                "a Tokio runtime is required to create connection pools",
            ));
        }
        sqlx::any::install_default_drivers();
        let pool = AnyPoolOptions::new()
            .max_connections(config.max_open_conn)
            .min_connections(0)
            .max_lifetime(config.conn_max_lifetime)
            .idle_timeout(config.pool_idle_timeout())
            .acquire_timeout(config.acquire_timeout)
            .connect_lazy(&url)
            .map_err(|e| {
                DbError::connection(
                    format!("Failed to create pool: {e}"),
                    "Check the DSN format: user:password@tcp(host:port)/database",
                )
            })?;

        info!(
            addr = %addr,
            role = %role,
            max_open = config.max_open_conn,
            max_idle = config.max_idle_conn,
            "Node created"
        );

        Ok(Self {
            addr,
            role,
            pool,
            breaker,
            query_timeout: config.query_timeout,
            exec_timeout: config.exec_timeout,
            tran_timeout: config.tran_timeout,
            closed: AtomicBool::new(false),
        })
    }

    /// Normalized `host:port`, empty when the DSN had none.
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Address for logs and errors.
    pub fn name(&self) -> &str {
        if self.addr.is_empty() {
            UNNAMED_BREAKER
        } else {
            &self.addr
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn breaker(&self) -> &Arc<dyn Breaker> {
        &self.breaker
    }

    pub fn breaker_state(&self) -> BreakerState {
        self.breaker.state()
    }

    /// Force this node's breaker closed.
    pub fn reset_breaker(&self) {
        self.breaker.reset();
    }

    pub fn query_timeout(&self) -> Duration {
        self.query_timeout
    }

    pub fn exec_timeout(&self) -> Duration {
        self.exec_timeout
    }

    pub fn tran_timeout(&self) -> Duration {
        self.tran_timeout
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    #[cfg(test)]
    pub(crate) fn with_breaker(mut self, breaker: Arc<dyn Breaker>) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn stats(&self) -> NodeStats {
        NodeStats {
            addr: self.name().to_string(),
            role: self.role,
            breaker: self.breaker.state(),
            open_connections: self.pool.size(),
            idle_connections: self.pool.num_idle(),
            closed: self.is_closed(),
        }
    }

    /// Run `call` behind the breaker and under `timeout` shrunk to the caller's deadline.
    pub(crate) async fn gated<T, F>(
        &self,
        ctx: &Context,
        operation: &'static str,
        timeout: Duration,
        call: F,
    ) -> DbResult<T>
    where
        F: Future<Output = DbResult<T>>,
    {
        let Some(permit) = Permit::acquire(self.breaker.as_ref()) else {
            debug!(addr = %self.name(), role = %self.role, operation, "Rejected by open breaker");
            return Err(DbError::breaker_open(self.name()));
        };
        let result = self.with_deadline(ctx, operation, timeout, call).await;
        permit.settle(&result);
        result
    }

    /// Run `call` under the deadline only. Outcomes are not reported.
    pub(crate) async fn with_deadline<T, F>(
        &self,
        ctx: &Context,
        operation: &'static str,
        timeout: Duration,
        call: F,
    ) -> DbResult<T>
    where
        F: Future<Output = DbResult<T>>,
    {
        let limit = ctx.shrink(timeout);
        let outcome = if limit.is_zero() {
            None
        } else {
            tokio::time::timeout(limit, call).await.ok()
        };
        match outcome {
            Some(result) => result,
            None => {
                warn!(
                    addr = %self.name(),
                    role = %self.role,
                    operation,
                    timeout_ms = limit.as_millis() as u64,
                    "Operation timed out"
                );
                Err(DbError::timeout(operation, limit))
            }
        }
    }

    pub async fn exec(&self, ctx: &Context, sql: &str, args: &[Value]) -> DbResult<ExecResult> {
        self.gated(ctx, "exec", self.exec_timeout, async {
            let result = bind_all(sqlx::query(sql), args).execute(&self.pool).await?;
            Ok(result.into())
        })
        .await
    }

    pub async fn query(&self, ctx: &Context, sql: &str, args: &[Value]) -> DbResult<Vec<AnyRow>> {
        self.gated(ctx, "query", self.query_timeout, async {
            Ok(bind_all(sqlx::query(sql), args).fetch_all(&self.pool).await?)
        })
        .await
    }

    /// First row of the result; `DbError::NoRows` when there is none.
    pub async fn query_row(&self, ctx: &Context, sql: &str, args: &[Value]) -> DbResult<AnyRow> {
        self.gated(ctx, "query_row", self.query_timeout, async {
            Ok(bind_all(sqlx::query(sql), args).fetch_one(&self.pool).await?)
        })
        .await
    }

    /// Prepare `sql` on this node under the query timeout.
    pub(crate) async fn prepare(&self, ctx: &Context, sql: &str) -> DbResult<PreparedHandle> {
        self.gated(ctx, "prepare", self.query_timeout, async {
            let statement = (&self.pool).prepare(sql).await?;
            debug!(addr = %self.name(), role = %self.role, "Statement prepared");
            Ok(Arc::new(Statement::to_owned(&statement)))
        })
        .await
    }

    pub(crate) async fn stmt_exec(
        &self,
        ctx: &Context,
        handle: &AnyStatement<'static>,
        args: &[Value],
    ) -> DbResult<ExecResult> {
        self.gated(ctx, "stmt_exec", self.exec_timeout, async {
            let result = bind_all(handle.query(), args).execute(&self.pool).await?;
            Ok(result.into())
        })
        .await
    }

    pub(crate) async fn stmt_query(
        &self,
        ctx: &Context,
        handle: &AnyStatement<'static>,
        args: &[Value],
    ) -> DbResult<Vec<AnyRow>> {
        self.gated(ctx, "stmt_query", self.query_timeout, async {
            Ok(bind_all(handle.query(), args).fetch_all(&self.pool).await?)
        })
        .await
    }

    pub(crate) async fn stmt_query_row(
        &self,
        ctx: &Context,
        handle: &AnyStatement<'static>,
        args: &[Value],
    ) -> DbResult<AnyRow> {
        self.gated(ctx, "stmt_query_row", self.query_timeout, async {
            Ok(bind_all(handle.query(), args).fetch_one(&self.pool).await?)
        })
        .await
    }

    /// Open a physical transaction under the transaction timeout.
    pub(crate) async fn begin(&self, ctx: &Context) -> DbResult<Transaction<'static, Any>> {
        self.gated(ctx, "begin", self.tran_timeout, async {
            Ok(self.pool.begin().await?)
        })
        .await
    }

    /// Round-trip to the server on a pooled connection.
    pub async fn ping(&self, ctx: &Context) -> DbResult<()> {
        self.gated(ctx, "ping", self.query_timeout, async {
            let mut conn = self.pool.acquire().await?;
            conn.ping().await?;
            Ok(())
        })
        .await
    }

    /// Close the pool. Only the first call does anything.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.pool.close().await;
        info!(addr = %self.name(), role = %self.role, "Node closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::testing::CountingBreaker;
    use std::time::Instant;

    fn sqlite_config() -> Config {
        Config::new("sqlite::memory:")
    }

    #[tokio::test]
    async fn test_sqlite_node_is_unnamed() {
        let node = Node::new(Role::Master, "sqlite::memory:", &sqlite_config(), None).unwrap();
        assert_eq!(node.addr(), "");
        assert_eq!(node.name(), UNNAMED_BREAKER);
        assert_eq!(node.breaker_state(), BreakerState::Closed);
    }

    #[tokio::test]
    async fn test_node_keys_breaker_by_addr() {
        let group = BreakerGroup::new(sqlite_config().breaker);
        let dsn = "u:p@tcp(10.0.0.1:3306)/app";
        let a = Node::new(Role::Replica, dsn, &sqlite_config(), Some(&group)).unwrap();
        let b = Node::new(Role::Replica, dsn, &sqlite_config(), Some(&group)).unwrap();
        assert_eq!(a.addr(), "10.0.0.1:3306");
        assert!(Arc::ptr_eq(a.breaker(), b.breaker()));
    }

    #[tokio::test]
    async fn test_invalid_dsn_is_rejected() {
        let err = Node::new(Role::Master, "garbage", &sqlite_config(), None).unwrap_err();
        assert!(matches!(err, DbError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn test_open_breaker_rejects_without_calling() {
        let node = Node::new(Role::Master, "sqlite::memory:", &sqlite_config(), None).unwrap();
        for _ in 0..200 {
            node.breaker().mark_failed();
        }
        assert_eq!(node.breaker_state(), BreakerState::Open);
        let err = node.ping(&Context::background()).await.unwrap_err();
        assert!(err.is_breaker_open());
    }

    #[tokio::test]
    async fn test_expired_context_times_out() {
        let node = Node::new(Role::Master, "sqlite::memory:", &sqlite_config(), None).unwrap();
        let ctx = Context::with_timeout(Duration::ZERO);
        let err = node
            .gated(&ctx, "sleep", Duration::from_secs(5), async {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_deadline_fires_mid_call() {
        let counter = Arc::new(CountingBreaker::default());
        let node = Node::new(Role::Master, "sqlite::memory:", &sqlite_config(), None)
            .unwrap()
            .with_breaker(counter.clone());

        let started = Instant::now();
        let err = node
            .gated(&Context::background(), "sleep", Duration::from_millis(20), async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Timeout { .. }));
        assert!(started.elapsed() < Duration::from_millis(150));
        assert_eq!(counter.admitted(), 1);
        assert_eq!(counter.failures(), 1);
        assert_eq!(counter.successes(), 0);
    }

    #[tokio::test]
    async fn test_abandoned_call_counts_as_failure() {
        let counter = Arc::new(CountingBreaker::default());
        let node = Node::new(Role::Master, "sqlite::memory:", &sqlite_config(), None)
            .unwrap()
            .with_breaker(counter.clone());

        let ctx = Context::background();
        let call = node.gated(&ctx, "sleep", Duration::from_secs(5), async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(())
        });
        assert!(tokio::time::timeout(Duration::from_millis(20), call).await.is_err());
        assert_eq!(counter.admitted(), 1);
        assert_eq!(counter.failures(), 1);
    }

    #[test]
    fn test_requires_runtime() {
        let err = Node::new(Role::Master, "sqlite::memory:", &sqlite_config(), None).unwrap_err();
        assert!(matches!(err, DbError::Internal { .. }));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let node = Node::new(Role::Master, "sqlite::memory:", &sqlite_config(), None).unwrap();
        node.close().await;
        node.close().await;
        assert!(node.is_closed());
        let err = node.ping(&Context::background()).await.unwrap_err();
        assert!(matches!(err, DbError::Closed));
    }

    #[test]
    fn test_role_display() {
        assert_eq!(Role::Master.to_string(), "master");
        assert_eq!(Role::Replica.to_string(), "replica");
    }
}
