//! Shared fixtures: a master and N replicas, each its own SQLite file.

#![allow(dead_code)]

use resilient_sql::{BreakerConfig, Config, Context, Db, DbError, DbResult, Row};
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

pub struct Topology {
    pub db: Db,
    pub master_url: String,
    pub replica_urls: Vec<String>,
    // Files live as long as the topology
    _dir: TempDir,
}

pub fn sqlite_url(path: &Path) -> String {
    format!("sqlite://{}?mode=rwc", path.display())
}

pub fn test_config(master: &str, replicas: &[String]) -> Config {
    let mut config = Config {
        max_open_conn: 4,
        max_idle_conn: 0,
        query_timeout: Duration::from_secs(5),
        exec_timeout: Duration::from_secs(5),
        tran_timeout: Duration::from_secs(10),
        acquire_timeout: Duration::from_secs(5),
        ..Config::new(master)
    };
    config.read_dsn = replicas.to_vec();
    config
}

/// Create the schema on one file and record which node it is.
async fn seed(url: &str, name: &str) {
    let db = Db::open(Config::new(url)).expect("seed db opens");
    let ctx = Context::background();
    for sql in [
        "CREATE TABLE node (name TEXT NOT NULL)",
        "CREATE TABLE kv (k TEXT PRIMARY KEY, v TEXT NOT NULL)",
        "CREATE TABLE log (msg TEXT NOT NULL)",
    ] {
        db.exec(&ctx, sql, &[]).await.expect("schema");
    }
    db.exec(&ctx, "INSERT INTO node (name) VALUES (?)", &resilient_sql::args![name])
        .await
        .expect("seed node name");
    db.exec(&ctx, "INSERT INTO kv (k, v) VALUES ('shared', ?)", &resilient_sql::args![name])
        .await
        .expect("seed kv");
    db.close().await;
}

pub async fn topology(replicas: usize) -> Topology {
    topology_with(replicas, |_| {}).await
}

pub async fn topology_with(replicas: usize, tune: impl FnOnce(&mut Config)) -> Topology {
    let dir = TempDir::new().expect("temp dir");
    let master_url = sqlite_url(&dir.path().join("master.db"));
    seed(&master_url, "master").await;

    let mut replica_urls = Vec::new();
    for i in 0..replicas {
        let url = sqlite_url(&dir.path().join(format!("replica{i}.db")));
        seed(&url, &format!("replica{i}")).await;
        replica_urls.push(url);
    }

    let mut config = test_config(&master_url, &replica_urls);
    tune(&mut config);
    let db = Db::open(config).expect("topology opens");
    Topology {
        db,
        master_url,
        replica_urls,
        _dir: dir,
    }
}

/// A breaker that trips after a handful of failures and recovers quickly.
pub fn fast_breaker() -> BreakerConfig {
    BreakerConfig {
        window: Duration::from_secs(5),
        bucket: 5,
        request: 4,
        ratio: 0.5,
        cool_down: Some(Duration::from_millis(200)),
    }
}

/// Which node answered a read.
pub async fn who(db: &Db) -> String {
    let row = db
        .query_row(&Context::background(), "SELECT name FROM node", &[])
        .await
        .expect("node name");
    row.try_get::<String, _>("name").expect("name column")
}

/// The error of a call expected to fail. Row results are not `Debug`, so
/// `unwrap_err` does not apply to them.
pub fn expect_err<T>(result: DbResult<T>) -> DbError {
    match result {
        Ok(_) => panic!("expected an error, got Ok"),
        Err(err) => err,
    }
}
