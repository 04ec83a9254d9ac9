//! The logical client: one master, zero or more replicas.
//!
//! # Routing
//! - `exec`, `begin`, `ping` and everything on a master-only view go to the master.
//! - `query` / `query_row` round-robin over the replicas, falling back to the master
//!   when there are none.
//!
//! A replica whose breaker is open is not skipped: the call fails fast with
//! `DbError::BreakerOpen` and the caller decides whether to retry on the master.

use crate::breaker::BreakerGroup;
use crate::config::Config;
use crate::context::Context;
use crate::db::node::{ExecResult, Node, NodeStats, Role};
use crate::db::stmt::Stmt;
use crate::db::tx::Tx;
use crate::db::value::Value;
use crate::error::{DbError, DbResult};
use futures_util::future::join_all;
use serde::Serialize;
use sqlx::any::AnyRow;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, error, info};

/// Per-node snapshot of a client.
#[derive(Debug, Clone, Serialize)]
pub struct DbStats {
    pub master: NodeStats,
    pub replicas: Vec<NodeStats>,
}

/// Read/write splitting client.
///
/// Cloning is cheap and clones share nodes and the round-robin counter.
#[derive(Debug, Clone)]
pub struct Db {
    master: Arc<Node>,
    replicas: Arc<[Arc<Node>]>,
    idx: Arc<AtomicUsize>,
    /// Set on views produced by [`Db::master`].
    pinned: bool,
}

impl Db {
    /// Build every node described by `config`, each with its own breaker.
    ///
    /// Pools connect lazily; call [`Db::ping`] to check the master is reachable.
    /// Needs a Tokio runtime: outside one this returns `DbError::Internal`.
    pub fn open(config: Config) -> DbResult<Self> {
        Self::build(&config, None)
    }

    /// Like [`Db::open`], but nodes take their breakers from `group`, so clients
    /// pointed at the same address share one.
    pub fn open_with_breakers(config: Config, group: &BreakerGroup) -> DbResult<Self> {
        Self::build(&config, Some(group))
    }

    fn build(config: &Config, group: Option<&BreakerGroup>) -> DbResult<Self> {
        config.validate()?;
        let master = Arc::new(Node::new(Role::Master, &config.dsn, config, group)?);
        let replicas = config
            .read_dsn
            .iter()
            .map(|dsn| Node::new(Role::Replica, dsn, config, group).map(Arc::new))
            .collect::<DbResult<Vec<_>>>()?;

        info!(
            master = %master.name(),
            replicas = replicas.len(),
            "Database client opened"
        );

        Ok(Self {
            master,
            replicas: replicas.into(),
            idx: Arc::new(AtomicUsize::new(0)),
            pinned: false,
        })
    }

    /// A view that sends every operation to the master.
    ///
    /// The view shares this client's master node. Pinning a view that is already
    /// master-only returns `DbError::NoMaster`.
    pub fn master(&self) -> DbResult<Db> {
        if self.pinned {
            error!(master = %self.master.name(), "master() called on a master-only view");
            return Err(DbError::NoMaster);
        }
        Ok(Db {
            master: Arc::clone(&self.master),
            replicas: Arc::from(Vec::new()),
            idx: Arc::new(AtomicUsize::new(0)),
            pinned: true,
        })
    }

    /// Whether this value came from [`Db::master`].
    pub fn is_pinned(&self) -> bool {
        self.pinned
    }

    pub fn master_node(&self) -> &Arc<Node> {
        &self.master
    }

    pub fn replica_nodes(&self) -> &[Arc<Node>] {
        &self.replicas
    }

    /// Next replica in round-robin order, or the master without replicas.
    fn read_node(&self) -> &Arc<Node> {
        if self.replicas.is_empty() {
            return &self.master;
        }
        let n = self.idx.fetch_add(1, Ordering::Relaxed);
        let node = &self.replicas[n % self.replicas.len()];
        debug!(addr = %node.name(), "Routing read to replica");
        node
    }

    pub async fn exec(&self, ctx: &Context, sql: &str, args: &[Value]) -> DbResult<ExecResult> {
        self.master.exec(ctx, sql, args).await
    }

    pub async fn query(&self, ctx: &Context, sql: &str, args: &[Value]) -> DbResult<Vec<AnyRow>> {
        self.read_node().query(ctx, sql, args).await
    }

    /// First row of the result; `DbError::NoRows` when there is none.
    pub async fn query_row(&self, ctx: &Context, sql: &str, args: &[Value]) -> DbResult<AnyRow> {
        self.read_node().query_row(ctx, sql, args).await
    }

    /// Start a transaction on the master.
    pub async fn begin(&self, ctx: &Context) -> DbResult<Tx> {
        Tx::begin(Arc::clone(&self.master), ctx).await
    }

    /// Prepare `sql` on the master and every replica now.
    pub async fn prepare(&self, ctx: &Context, sql: &str) -> DbResult<Stmt> {
        self.prepared(sql).prepare_all(ctx).await
    }

    /// A statement that prepares on each node at first use there. No I/O.
    pub fn prepared(&self, sql: &str) -> Stmt {
        Stmt::new(&self.master, &self.replicas, Arc::clone(&self.idx), sql)
    }

    pub async fn ping(&self, ctx: &Context) -> DbResult<()> {
        self.master.ping(ctx).await
    }

    /// Close every node's pool. Safe to call more than once.
    ///
    /// A master-only view does not own its master; closing it does nothing.
    pub async fn close(&self) {
        if self.pinned {
            debug!("close() on a master-only view ignored");
            return;
        }
        let nodes = std::iter::once(&self.master).chain(self.replicas.iter());
        join_all(nodes.map(|node| node.close())).await;
    }

    pub fn stats(&self) -> DbStats {
        DbStats {
            master: self.master.stats(),
            replicas: self.replicas.iter().map(|node| node.stats()).collect(),
        }
    }

    /// Force every node's breaker closed.
    pub fn reset_breakers(&self) {
        self.master.reset_breaker();
        self.replicas.iter().for_each(|node| node.reset_breaker());
        info!(master = %self.master.name(), "Breakers reset");
    }
}
