//! Client configuration.
//!
//! `Config` is built once by the application (the binary builds it from CLI
//! arguments, see [`crate::cli`]) and handed to [`crate::Db::open`]. It is never
//! mutated afterwards; every node copies the values it needs.

use crate::error::{DbError, DbResult};
use std::time::Duration;

// Pool configuration defaults
pub const DEFAULT_MAX_OPEN_CONN: u32 = 10;
pub const DEFAULT_MAX_IDLE_CONN: u32 = 5;
pub const DEFAULT_CONN_MAX_LIFETIME_SECS: u64 = 60;
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;
/// Idle reap delay when `max_idle_conn` is 0 and no `idle_timeout` is set.
pub const NO_IDLE_REAP_SECS: u64 = 1;

// Operation timeouts
pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_EXEC_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_TRAN_TIMEOUT_SECS: u64 = 60;

// Breaker defaults
pub const DEFAULT_BREAKER_WINDOW_SECS: u64 = 10;
pub const DEFAULT_BREAKER_BUCKET: u32 = 10;
pub const DEFAULT_BREAKER_REQUEST: u64 = 100;
pub const DEFAULT_BREAKER_RATIO: f64 = 0.5;

/// Breaker tuning shared by every node of a client.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerConfig {
    /// Length of the sliding statistics window.
    pub window: Duration,
    /// Number of buckets the window is split into.
    pub bucket: u32,
    /// Minimum number of calls in the window before the breaker may trip.
    pub request: u64,
    /// Failure ratio (0.0..=1.0) at or above which the breaker trips.
    pub ratio: f64,
    /// How long the breaker stays open before letting a probe through.
    /// Defaults to `window` when unset.
    pub cool_down: Option<Duration>,
}

impl BreakerConfig {
    /// Duration covered by a single bucket.
    pub fn bucket_duration(&self) -> Duration {
        self.window / self.bucket.max(1)
    }

    /// Open-state duration, falling back to the window length.
    pub fn cool_down_or_default(&self) -> Duration {
        self.cool_down.unwrap_or(self.window)
    }

    /// Validate breaker tuning and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.bucket == 0 {
            return Err("breaker bucket count must be greater than 0".to_string());
        }
        if self.bucket_duration().is_zero() {
            return Err(format!(
                "breaker window ({:?}) is too short for {} buckets",
                self.window, self.bucket
            ));
        }
        if !(0.0..=1.0).contains(&self.ratio) || self.ratio == 0.0 {
            return Err(format!(
                "breaker ratio must be in (0, 1], got {}",
                self.ratio
            ));
        }
        Ok(())
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(DEFAULT_BREAKER_WINDOW_SECS),
            bucket: DEFAULT_BREAKER_BUCKET,
            request: DEFAULT_BREAKER_REQUEST,
            ratio: DEFAULT_BREAKER_RATIO,
            cool_down: None,
        }
    }
}

/// Creation-time parameters of a client.
#[derive(Debug, Clone)]
pub struct Config {
    /// Master DSN. Contains credentials - never log.
    pub dsn: String,
    /// Replica DSNs, in routing order.
    pub read_dsn: Vec<String>,
    /// Upper bound on open connections per node.
    pub max_open_conn: u32,
    /// Connections retained while idle per node.
    ///
    /// sqlx pools have no ceiling on idle connections and keep no floor here either:
    /// idle connections, up to `max_open_conn`, live until [`Config::pool_idle_timeout`]
    /// reaps them. With 0 they are reaped almost immediately; any other value only
    /// has to stay within `max_open_conn`.
    pub max_idle_conn: u32,
    /// Forced connection recycling age.
    pub conn_max_lifetime: Duration,
    /// How long a connection may sit idle before the pool closes it.
    pub idle_timeout: Option<Duration>,
    /// Bound on waiting for a pooled connection.
    pub acquire_timeout: Duration,
    pub query_timeout: Duration,
    pub exec_timeout: Duration,
    pub tran_timeout: Duration,
    pub breaker: BreakerConfig,
}

impl Config {
    /// Create a configuration for a master-only topology with default tuning.
    pub fn new(dsn: impl Into<String>) -> Self {
        Self {
            dsn: dsn.into(),
            ..Self::default()
        }
    }

    /// Add a replica DSN.
    pub fn with_replica(mut self, dsn: impl Into<String>) -> Self {
        self.read_dsn.push(dsn.into());
        self
    }

    /// Idle timeout handed to each pool: `idle_timeout` when set, otherwise a short
    /// reap delay without idle retention or the default one with it.
    pub fn pool_idle_timeout(&self) -> Duration {
        match (self.idle_timeout, self.max_idle_conn) {
            (Some(timeout), _) => timeout,
            (None, 0) => Duration::from_secs(NO_IDLE_REAP_SECS),
            (None, _) => Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> DbResult<()> {
        if self.dsn.trim().is_empty() {
            return Err(DbError::invalid_input("master DSN must not be empty"));
        }
        if self.read_dsn.iter().any(|dsn| dsn.trim().is_empty()) {
            return Err(DbError::invalid_input("replica DSN must not be empty"));
        }
        if self.max_open_conn == 0 {
            return Err(DbError::invalid_input(
                "max_open_conn must be greater than 0",
            ));
        }
        if self.max_idle_conn > self.max_open_conn {
            return Err(DbError::invalid_input(format!(
                "max_idle_conn ({}) cannot exceed max_open_conn ({})",
                self.max_idle_conn, self.max_open_conn
            )));
        }
        for (name, timeout) in [
            ("query_timeout", self.query_timeout),
            ("exec_timeout", self.exec_timeout),
            ("tran_timeout", self.tran_timeout),
            ("acquire_timeout", self.acquire_timeout),
        ] {
            if timeout.is_zero() {
                return Err(DbError::invalid_input(format!(
                    "{name} must be greater than 0"
                )));
            }
        }
        self.breaker.validate().map_err(DbError::invalid_input)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dsn: String::new(),
            read_dsn: Vec::new(),
            max_open_conn: DEFAULT_MAX_OPEN_CONN,
            max_idle_conn: DEFAULT_MAX_IDLE_CONN,
            conn_max_lifetime: Duration::from_secs(DEFAULT_CONN_MAX_LIFETIME_SECS),
            idle_timeout: None,
            acquire_timeout: Duration::from_secs(DEFAULT_ACQUIRE_TIMEOUT_SECS),
            query_timeout: Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS),
            exec_timeout: Duration::from_secs(DEFAULT_EXEC_TIMEOUT_SECS),
            tran_timeout: Duration::from_secs(DEFAULT_TRAN_TIMEOUT_SECS),
            breaker: BreakerConfig::default(),
        }
    }
}
