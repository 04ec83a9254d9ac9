//! Command-line interface for the `resilient-sql` binary.
//!
//! Arguments come from the command line or environment variables and are turned into
//! a library [`Config`].

use crate::config::{
    BreakerConfig, Config, DEFAULT_ACQUIRE_TIMEOUT_SECS, DEFAULT_BREAKER_BUCKET,
    DEFAULT_BREAKER_RATIO, DEFAULT_BREAKER_REQUEST, DEFAULT_BREAKER_WINDOW_SECS,
    DEFAULT_CONN_MAX_LIFETIME_SECS, DEFAULT_EXEC_TIMEOUT_SECS, DEFAULT_MAX_IDLE_CONN,
    DEFAULT_MAX_OPEN_CONN, DEFAULT_QUERY_TIMEOUT_SECS, DEFAULT_TRAN_TIMEOUT_SECS,
};
use crate::db::Value;
use clap::{Parser, Subcommand};
use std::time::Duration;

#[derive(Debug, Clone, Parser)]
#[command(
    name = "resilient-sql",
    about = "Run SQL against a master/replica topology with per-node circuit breaking",
    version,
    author
)]
pub struct Cli {
    /// Master DSN: user:password@tcp(host:port)/database?params, or a mysql://,
    /// postgres:// or sqlite: URL.
    #[arg(long, value_name = "DSN", env = "SQL_MASTER_DSN")]
    pub dsn: String,

    /// Replica DSN. Can be specified multiple times or as comma-separated values.
    #[arg(
        short = 'r',
        long = "replica",
        value_name = "DSN",
        env = "SQL_REPLICA_DSN",
        value_delimiter = ','
    )]
    pub replicas: Vec<String>,

    /// Maximum open connections per node
    #[arg(long, default_value_t = DEFAULT_MAX_OPEN_CONN, env = "SQL_MAX_OPEN_CONN")]
    pub max_open_conn: u32,

    /// Connections kept while idle per node
    #[arg(long, default_value_t = DEFAULT_MAX_IDLE_CONN, env = "SQL_MAX_IDLE_CONN")]
    pub max_idle_conn: u32,

    /// Connection max lifetime in seconds
    #[arg(long, default_value_t = DEFAULT_CONN_MAX_LIFETIME_SECS, env = "SQL_CONN_MAX_LIFETIME")]
    pub conn_max_lifetime: u64,

    /// Pool acquire timeout in seconds
    #[arg(long, default_value_t = DEFAULT_ACQUIRE_TIMEOUT_SECS, env = "SQL_ACQUIRE_TIMEOUT")]
    pub acquire_timeout: u64,

    /// Query timeout in seconds
    #[arg(long, default_value_t = DEFAULT_QUERY_TIMEOUT_SECS, env = "SQL_QUERY_TIMEOUT")]
    pub query_timeout: u64,

    /// Exec timeout in seconds
    #[arg(long, default_value_t = DEFAULT_EXEC_TIMEOUT_SECS, env = "SQL_EXEC_TIMEOUT")]
    pub exec_timeout: u64,

    /// Transaction timeout in seconds
    #[arg(long, default_value_t = DEFAULT_TRAN_TIMEOUT_SECS, env = "SQL_TRAN_TIMEOUT")]
    pub tran_timeout: u64,

    /// Breaker window in seconds
    #[arg(long, default_value_t = DEFAULT_BREAKER_WINDOW_SECS, env = "SQL_BREAKER_WINDOW")]
    pub breaker_window: u64,

    /// Buckets per breaker window
    #[arg(long, default_value_t = DEFAULT_BREAKER_BUCKET, env = "SQL_BREAKER_BUCKET")]
    pub breaker_bucket: u32,

    /// Calls required in the window before the breaker may trip
    #[arg(long, default_value_t = DEFAULT_BREAKER_REQUEST, env = "SQL_BREAKER_REQUEST")]
    pub breaker_request: u64,

    /// Failure ratio that trips the breaker
    #[arg(long, default_value_t = DEFAULT_BREAKER_RATIO, env = "SQL_BREAKER_RATIO")]
    pub breaker_ratio: f64,

    /// Log level (RUST_LOG takes precedence)
    #[arg(long, default_value = "warn", env = "SQL_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "SQL_JSON_LOGS")]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Check that the master answers
    Ping,
    /// Run a read query (routed to a replica unless --master)
    Query {
        sql: String,
        /// Bind parameter, in order. Quote with '' to force text.
        #[arg(short = 'p', long = "param", value_name = "VALUE", allow_hyphen_values = true)]
        params: Vec<String>,
        /// Send the query to the master
        #[arg(long)]
        master: bool,
        /// Render binary columns as text when they are valid UTF-8
        #[arg(long)]
        decode_binary: bool,
    },
    /// Run a write statement on the master
    Exec {
        sql: String,
        #[arg(short = 'p', long = "param", value_name = "VALUE", allow_hyphen_values = true)]
        params: Vec<String>,
    },
    /// Print breaker and pool state for every node
    Stats,
}

impl Cli {
    /// Build the library configuration.
    pub fn to_config(&self) -> Config {
        Config {
            dsn: self.dsn.clone(),
            read_dsn: self.replicas.clone(),
            max_open_conn: self.max_open_conn,
            max_idle_conn: self.max_idle_conn,
            conn_max_lifetime: Duration::from_secs(self.conn_max_lifetime),
            idle_timeout: None,
            acquire_timeout: Duration::from_secs(self.acquire_timeout),
            query_timeout: Duration::from_secs(self.query_timeout),
            exec_timeout: Duration::from_secs(self.exec_timeout),
            tran_timeout: Duration::from_secs(self.tran_timeout),
            breaker: BreakerConfig {
                window: Duration::from_secs(self.breaker_window),
                bucket: self.breaker_bucket,
                request: self.breaker_request,
                ratio: self.breaker_ratio,
                cool_down: None,
            },
        }
    }
}

/// Parse command-line bind parameters.
pub fn parse_params(raw: &[String]) -> Vec<Value> {
    raw.iter().map(|p| Value::parse_arg(p)).collect()
}
