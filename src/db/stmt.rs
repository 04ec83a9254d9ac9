//! Logical prepared statements spanning every node of a client.
//!
//! A [`Stmt`] keeps one handle slot per node, filled on first use there. Slots sit
//! behind an async mutex each, so concurrent first uses on a node share one prepare
//! while other nodes proceed independently.
//!
//! A handle is the statement as described by the node (parameters and columns), not a
//! server-side statement id. Executions go through the pool, and each pooled connection
//! prepares into its own sqlx statement cache; those physical statements are closed
//! when the cache evicts them or the connection closes.

use crate::context::Context;
use crate::db::node::{ExecResult, Node, PreparedHandle};
use crate::db::value::Value;
use crate::error::{DbError, DbResult};
use futures_util::future::{join_all, try_join_all};
use sqlx::any::AnyRow;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

struct NodeStmt {
    node: Arc<Node>,
    handle: Mutex<Option<PreparedHandle>>,
}

impl NodeStmt {
    fn new(node: Arc<Node>) -> Self {
        Self {
            node,
            handle: Mutex::new(None),
        }
    }

    /// Cached handle, preparing on this node first if the slot is empty.
    async fn handle(&self, ctx: &Context, sql: &str) -> DbResult<PreparedHandle> {
        let mut slot = self.handle.lock().await;
        if let Some(handle) = slot.as_ref() {
            return Ok(Arc::clone(handle));
        }
        let handle = self.node.prepare(ctx, sql).await?;
        *slot = Some(Arc::clone(&handle));
        Ok(handle)
    }

    /// Drop the cached handle, unless someone already replaced it.
    async fn evict(&self, stale: &PreparedHandle) {
        let mut slot = self.handle.lock().await;
        if slot.as_ref().is_some_and(|current| Arc::ptr_eq(current, stale)) {
            *slot = None;
            debug!(addr = %self.node.name(), "Evicted prepared statement handle");
        }
    }
}

struct StmtInner {
    sql: String,
    master: NodeStmt,
    replicas: Vec<NodeStmt>,
    idx: Arc<AtomicUsize>,
    closed: AtomicBool,
}

/// A prepared statement valid across the master and every replica.
///
/// Cloning is cheap; clones share handles and the closed flag.
#[derive(Clone)]
pub struct Stmt {
    inner: Arc<StmtInner>,
}

impl std::fmt::Debug for Stmt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stmt")
            .field("sql", &self.inner.sql)
            .field("nodes", &(1 + self.inner.replicas.len()))
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Stmt {
    /// Snapshot the topology without preparing anything.
    pub(crate) fn new(
        master: &Arc<Node>,
        replicas: &[Arc<Node>],
        idx: Arc<AtomicUsize>,
        sql: impl Into<String>,
    ) -> Self {
        Self {
            inner: Arc::new(StmtInner {
                sql: sql.into(),
                master: NodeStmt::new(Arc::clone(master)),
                replicas: replicas.iter().cloned().map(NodeStmt::new).collect(),
                idx,
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Prepare on every node now. Fails if any node fails.
    pub(crate) async fn prepare_all(self, ctx: &Context) -> DbResult<Self> {
        let sql = self.inner.sql.as_str();
        try_join_all(self.entries().map(|entry| entry.handle(ctx, sql))).await?;
        debug!(nodes = 1 + self.inner.replicas.len(), "Statement prepared on all nodes");
        Ok(self)
    }

    pub fn sql(&self) -> &str {
        &self.inner.sql
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    fn entries(&self) -> impl Iterator<Item = &NodeStmt> {
        std::iter::once(&self.inner.master).chain(self.inner.replicas.iter())
    }

    fn read_entry(&self) -> &NodeStmt {
        let replicas = &self.inner.replicas;
        if replicas.is_empty() {
            return &self.inner.master;
        }
        let n = self.inner.idx.fetch_add(1, Ordering::Relaxed);
        &replicas[n % replicas.len()]
    }

    /// Run `call` with this entry's handle. A handle whose connection went bad is
    /// evicted, so the next call on that node prepares again.
    async fn run<T, F, Fut>(&self, ctx: &Context, entry: &NodeStmt, call: F) -> DbResult<T>
    where
        F: FnOnce(PreparedHandle) -> Fut,
        Fut: Future<Output = DbResult<T>>,
    {
        if self.is_closed() {
            return Err(DbError::StmtClosed);
        }
        let handle = entry.handle(ctx, &self.inner.sql).await?;
        let result = call(Arc::clone(&handle)).await;
        if let Err(e) = &result {
            if e.invalidates_handle() {
                warn!(addr = %entry.node.name(), error = %e, "Dropping prepared statement handle");
                entry.evict(&handle).await;
            }
        }
        result
    }

    /// Execute on the master.
    pub async fn exec(&self, ctx: &Context, args: &[Value]) -> DbResult<ExecResult> {
        let entry = &self.inner.master;
        self.run(ctx, entry, move |handle| async move {
            entry.node.stmt_exec(ctx, &handle, args).await
        })
        .await
    }

    /// Query a replica (round-robin), or the master when there are none.
    pub async fn query(&self, ctx: &Context, args: &[Value]) -> DbResult<Vec<AnyRow>> {
        let entry = self.read_entry();
        self.run(ctx, entry, move |handle| async move {
            entry.node.stmt_query(ctx, &handle, args).await
        })
        .await
    }

    /// First row from a replica; `DbError::NoRows` when there is none.
    pub async fn query_row(&self, ctx: &Context, args: &[Value]) -> DbResult<AnyRow> {
        let entry = self.read_entry();
        self.run(ctx, entry, move |handle| async move {
            entry.node.stmt_query_row(ctx, &handle, args).await
        })
        .await
    }

    /// Drop every node's handle and refuse further calls.
    ///
    /// A slot held past the node's exec timeout (a prepare stuck on it) is reported
    /// and skipped; the other nodes are still released. Closing twice is a no-op.
    pub async fn close(&self) -> DbResult<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let outcomes = join_all(self.entries().map(|entry| async move {
            let limit = entry.node.exec_timeout();
            match tokio::time::timeout(limit, entry.handle.lock()).await {
                Ok(mut slot) => {
                    slot.take();
                    Ok(())
                }
                Err(_) => Err((
                    entry.node.name().to_string(),
                    DbError::timeout("statement close", limit),
                )),
            }
        }))
        .await;

        let failures: Vec<(String, DbError)> = outcomes.into_iter().filter_map(Result::err).collect();
        if failures.is_empty() {
            info!(nodes = 1 + self.inner.replicas.len(), "Statement closed");
            return Ok(());
        }
        warn!(failed = failures.len(), "Statement closed with failures");
        Err(DbError::StmtClose { failures })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::breaker::testing::CountingBreaker;
    use crate::db::node::Role;
    use std::time::Duration;

    fn node(role: Role) -> Arc<Node> {
        let config = Config {
            exec_timeout: Duration::from_millis(50),
            max_idle_conn: 0,
            ..Config::new("sqlite::memory:")
        };
        Arc::new(Node::new(role, "sqlite::memory:", &config, None).unwrap())
    }

    fn counted(role: Role) -> (Arc<Node>, Arc<CountingBreaker>) {
        let counter = Arc::new(CountingBreaker::default());
        let config = Config {
            max_idle_conn: 0,
            ..Config::new("sqlite::memory:")
        };
        let node = Node::new(role, "sqlite::memory:", &config, None)
            .unwrap()
            .with_breaker(counter.clone());
        (Arc::new(node), counter)
    }

    #[tokio::test]
    async fn test_concurrent_first_use_prepares_once_per_node() {
        let (master, master_counter) = counted(Role::Master);
        let (r0, r0_counter) = counted(Role::Replica);
        let (r1, r1_counter) = counted(Role::Replica);
        let stmt = Stmt::new(&master, &[r0, r1], Arc::new(AtomicUsize::new(0)), "SELECT 1");

        let ctx = Context::background();
        let no_args: &[Value] = &[];
        let results = join_all((0..20).map(|_| stmt.query(&ctx, no_args))).await;
        assert!(results.iter().all(Result::is_ok));

        // Every admitted call is either one of the ten queries or a prepare.
        for counter in [&r0_counter, &r1_counter] {
            assert_eq!(counter.admitted(), 10 + 1);
            assert_eq!(counter.successes(), 11);
        }
        assert_eq!(master_counter.admitted(), 0);
    }

    #[tokio::test]
    async fn test_timeout_evicts_handle_and_next_call_prepares() {
        let (master, counter) = counted(Role::Master);
        let stmt = Stmt::new(&master, &[], Arc::new(AtomicUsize::new(0)), "SELECT 1")
            .prepare_all(&Context::background())
            .await
            .unwrap();
        let first = stmt.inner.master.handle.lock().await.clone().unwrap();
        assert_eq!(counter.admitted(), 1);

        let err = stmt
            .query(&Context::with_timeout(Duration::ZERO), &[])
            .await
            .err()
            .expect("expired deadline");
        assert!(matches!(err, DbError::Timeout { .. }));
        assert!(stmt.inner.master.handle.lock().await.is_none());
        assert_eq!(counter.failures(), 1);

        let rows = stmt.query(&Context::background(), &[]).await.unwrap();
        assert_eq!(rows.len(), 1);
        // Prepare again, then the query.
        assert_eq!(counter.admitted(), 4);
        assert_eq!(counter.successes(), 3);
        let second = stmt.inner.master.handle.lock().await.clone().unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_close_collects_stuck_nodes() {
        let master = node(Role::Master);
        let replicas = vec![node(Role::Replica), node(Role::Replica)];
        let stmt = Stmt::new(&master, &replicas, Arc::new(AtomicUsize::new(0)), "SELECT 1");

        let held = stmt.inner.replicas[1].handle.lock().await;
        let err = stmt.close().await.unwrap_err();
        match err {
            DbError::StmtClose { failures } => {
                assert_eq!(failures.len(), 1);
                assert!(matches!(failures[0].1, DbError::Timeout { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
        drop(held);

        assert!(stmt.is_closed());
        assert!(stmt.close().await.is_ok());
    }

    #[tokio::test]
    async fn test_closed_stmt_rejects_calls() {
        let master = node(Role::Master);
        let stmt = Stmt::new(&master, &[], Arc::new(AtomicUsize::new(0)), "SELECT 1");
        stmt.close().await.unwrap();
        let err = stmt
            .query(&Context::background(), &[])
            .await
            .err()
            .expect("closed statement refuses queries");
        assert!(matches!(err, DbError::StmtClosed));
    }

    #[tokio::test]
    async fn test_read_entry_round_robin() {
        let master = node(Role::Master);
        let replicas = vec![node(Role::Replica), node(Role::Replica), node(Role::Replica)];
        let stmt = Stmt::new(&master, &replicas, Arc::new(AtomicUsize::new(0)), "SELECT 1");
        let picked: Vec<usize> = (0..6)
            .map(|_| {
                let entry = stmt.read_entry();
                replicas
                    .iter()
                    .position(|n| Arc::ptr_eq(n, &entry.node))
                    .unwrap()
            })
            .collect();
        assert_eq!(picked, vec![0, 1, 2, 0, 1, 2]);
    }
}
