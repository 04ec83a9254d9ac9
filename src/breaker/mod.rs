//! Per-address fault detection.
//!
//! Nodes consume breakers only through the [`Breaker`] trait, so an application can
//! plug in its own algorithm. The crate ships [`CircuitBreaker`], a sliding-window
//! three-state breaker driven by [`BreakerConfig`](crate::config::BreakerConfig).
//!
//! Each node owns its breaker by default. Nodes that should share one (several clients
//! pointed at the same address) get it from an explicit [`BreakerGroup`] passed at
//! construction; there is no process-wide registry.

pub mod circuit;
pub mod window;

pub use circuit::{BreakerStats, CircuitBreaker};

use crate::config::BreakerConfig;
use crate::error::DbResult;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Name given to breakers of nodes whose DSN yields no address.
pub const UNNAMED_BREAKER: &str = "unnamed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl std::fmt::Display for BreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Fault detector gating calls to one address.
///
/// Implementations must be safe for concurrent use without external locking.
pub trait Breaker: Send + Sync + Debug {
    /// Whether the next call may proceed.
    fn allow(&self) -> bool;
    fn mark_success(&self);
    fn mark_failed(&self);
    fn state(&self) -> BreakerState;
    /// Force the breaker back to closed. Operational override; statistics are dropped.
    fn reset(&self);
}

/// Admission granted by a breaker. Reports exactly one outcome; a permit dropped
/// without [`Permit::settle`] (the caller abandoned the call) counts as a failure.
pub(crate) struct Permit<'a> {
    breaker: &'a dyn Breaker,
    settled: bool,
}

impl<'a> Permit<'a> {
    pub(crate) fn acquire(breaker: &'a dyn Breaker) -> Option<Self> {
        breaker.allow().then_some(Self {
            breaker,
            settled: false,
        })
    }

    pub(crate) fn settle<T>(mut self, result: &DbResult<T>) {
        self.settled = true;
        record(self.breaker, result);
    }
}

impl Drop for Permit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.mark_failed();
        }
    }
}

/// Report an outcome without having gated the call.
pub(crate) fn record<T>(breaker: &dyn Breaker, result: &DbResult<T>) {
    match result {
        Err(e) if e.counts_as_failure() => breaker.mark_failed(),
        _ => breaker.mark_success(),
    }
}

/// Explicit registry sharing one breaker per address.
#[derive(Debug)]
pub struct BreakerGroup {
    config: BreakerConfig,
    breakers: Mutex<HashMap<String, Arc<dyn Breaker>>>,
}

impl BreakerGroup {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// Register a custom breaker for an address, replacing any existing one.
    pub fn insert(&self, addr: impl Into<String>, breaker: Arc<dyn Breaker>) {
        self.lock().insert(addr.into(), breaker);
    }

    /// Breaker for `addr`, created on first request. An empty address is never
    /// shared: every call gets a fresh unnamed breaker.
    pub fn get(&self, addr: &str) -> Arc<dyn Breaker> {
        if addr.is_empty() {
            return Arc::new(CircuitBreaker::new(UNNAMED_BREAKER, &self.config));
        }
        self.lock()
            .entry(addr.to_string())
            .or_insert_with(|| {
                debug!(addr = %addr, "Creating shared breaker");
                Arc::new(CircuitBreaker::new(addr, &self.config))
            })
            .clone()
    }

    /// Force every registered breaker closed.
    pub fn reset_all(&self) {
        self.lock().values().for_each(|b| b.reset());
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<dyn Breaker>>> {
        self.breakers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
