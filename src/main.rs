//! resilient-sql - run SQL against a master/replica topology.
//!
//! Results are printed as JSON on stdout; logs go to stderr.

use clap::Parser;
use resilient_sql::cli::{Cli, Command, parse_params};
use resilient_sql::db::rows_to_json;
use resilient_sql::{Context, Db, DbError};
use serde_json::json;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

async fn run(db: &Db, command: &Command) -> Result<serde_json::Value, DbError> {
    let ctx = Context::background();
    match command {
        Command::Ping => {
            db.ping(&ctx).await?;
            Ok(json!({ "ok": true, "master": db.master_node().name() }))
        }
        Command::Query {
            sql,
            params,
            master,
            decode_binary,
        } => {
            let args = parse_params(params);
            let rows = if *master {
                db.master()?.query(&ctx, sql, &args).await?
            } else {
                db.query(&ctx, sql, &args).await?
            };
            Ok(json!({
                "row_count": rows.len(),
                "rows": rows_to_json(&rows, *decode_binary),
            }))
        }
        Command::Exec { sql, params } => {
            let args = parse_params(params);
            let result = db.exec(&ctx, sql, &args).await?;
            Ok(serde_json::to_value(result).unwrap_or_default())
        }
        Command::Stats => Ok(serde_json::to_value(db.stats()).unwrap_or_default()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(&cli);

    info!(
        replicas = cli.replicas.len(),
        "Starting resilient-sql v{}",
        env!("CARGO_PKG_VERSION")
    );

    let db = Db::open(cli.to_config())?;
    let result = run(&db, &cli.command).await;
    db.close().await;

    match result {
        Ok(output) => {
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Command failed");
            if let Some(suggestion) = e.suggestion() {
                eprintln!("Hint: {suggestion}");
            }
            Err(e.into())
        }
    }
}
