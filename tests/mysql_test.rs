//! Runs against a live MySQL server when `TEST_MYSQL_DSN` is set, e.g.
//! `TEST_MYSQL_DSN='root:secret@tcp(127.0.0.1:3306)/test'`. Skipped otherwise.

use resilient_sql::{Config, Context, Db, DbError, Row, args};
use std::time::Duration;

fn mysql_dsn() -> Option<String> {
    std::env::var("TEST_MYSQL_DSN").ok().filter(|dsn| !dsn.is_empty())
}

fn open(dsn: &str) -> Db {
    let config = Config {
        read_dsn: vec![dsn.to_string()],
        max_open_conn: 4,
        query_timeout: Duration::from_secs(5),
        exec_timeout: Duration::from_secs(5),
        ..Config::new(dsn)
    };
    Db::open(config).expect("mysql client opens")
}

#[tokio::test]
async fn test_mysql_round_trip() {
    let Some(dsn) = mysql_dsn() else {
        eprintln!("TEST_MYSQL_DSN not set, skipping");
        return;
    };
    let db = open(&dsn);
    let ctx = Context::background();
    db.ping(&ctx).await.unwrap();

    let table = format!("rsql_{}", std::process::id());
    db.exec(
        &ctx,
        &format!("CREATE TABLE {table} (id BIGINT PRIMARY KEY, name VARCHAR(64) NOT NULL)"),
        &[],
    )
    .await
    .unwrap();

    let insert = db
        .prepare(&ctx, &format!("INSERT INTO {table} (id, name) VALUES (?, ?)"))
        .await
        .unwrap();
    for (id, name) in [(1_i64, "one"), (2, "two")] {
        insert.exec(&ctx, &args![id, name]).await.unwrap();
    }
    insert.close().await.unwrap();

    let master = db.master().unwrap();
    let row = master
        .query_row(&ctx, &format!("SELECT name FROM {table} WHERE id = ?"), &args![2])
        .await
        .unwrap();
    assert_eq!(row.try_get::<String, _>("name").unwrap(), "two");

    let err = master
        .query_row(&ctx, &format!("SELECT name FROM {table} WHERE id = ?"), &args![99])
        .await
        .err()
        .expect("missing id yields no rows");
    assert!(err.is_no_rows());

    let mut tx = db.begin(&ctx).await.unwrap();
    tx.exec(&ctx, &format!("DELETE FROM {table} WHERE id = 1"), &[])
        .await
        .unwrap();
    tx.rollback(&ctx).await.unwrap();
    assert!(matches!(tx.commit(&ctx).await, Err(DbError::TxDone)));

    let rows = master
        .query(&ctx, &format!("SELECT id FROM {table} ORDER BY id"), &[])
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);

    db.exec(&ctx, &format!("DROP TABLE {table}"), &[]).await.unwrap();
    db.close().await;
}

#[tokio::test]
async fn test_mysql_unreachable_node_trips_breaker() {
    if mysql_dsn().is_none() {
        return;
    }
    let config = Config {
        acquire_timeout: Duration::from_millis(200),
        query_timeout: Duration::from_millis(300),
        breaker: resilient_sql::BreakerConfig {
            request: 2,
            ratio: 0.5,
            ..Default::default()
        },
        ..Config::new("root:x@tcp(127.0.0.1:1)/none")
    };
    let db = Db::open(config).unwrap();
    let ctx = Context::background();
    for _ in 0..2 {
        assert!(db.ping(&ctx).await.is_err());
    }
    assert!(db.ping(&ctx).await.unwrap_err().is_breaker_open());
    db.close().await;
}
