//! DB Router - Main entry point.
//!
//! Operational CLI over the routing layer: checks datasource connectivity,
//! previews routing decisions and executes single statements.

use clap::Parser;
use db_router::config::{Command, Config, StatementArgs};
use db_router::db::{
    DatabaseRegistry, ExecutionContext, Statement, StatementKind, StatementPipeline, classify,
};
use db_router::error::{DbError, DbResult};
use db_router::models::Value;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .init();
    }
}

fn context(args: &StatementArgs) -> ExecutionContext {
    let mut ctx = ExecutionContext::new()
        .with_master_hint(args.master)
        .with_transaction(Arc::new(args.transaction));
    if let Some(database) = &args.database {
        ctx = ctx.with_database(database.clone());
    }
    ctx
}

fn statement(args: &StatementArgs) -> DbResult<Statement> {
    let kind = if args.sql.trim_start().to_ascii_lowercase().starts_with("insert") {
        StatementKind::Insert
    } else if classify(&args.sql).is_write() {
        StatementKind::Update
    } else {
        StatementKind::Query
    };

    let params = args
        .params
        .iter()
        .map(|raw| {
            serde_json::from_str(raw).map(Value::from_json).map_err(|e| {
                DbError::invalid_input(format!("--param '{}' is not valid JSON: {}", raw, e))
            })
        })
        .collect::<DbResult<Vec<_>>>()?;

    Ok(Statement::new(kind, args.sql.clone()).with_params(params))
}

fn print_json<T: serde::Serialize>(value: &T) -> DbResult<()> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| DbError::internal(format!("failed to serialize output: {}", e)))?;
    println!("{}", text);
    Ok(())
}

async fn run(command: &Command, pipeline: &StatementPipeline) -> DbResult<()> {
    match command {
        Command::Check => {
            for status in pipeline.registry().status() {
                info!(
                    database = %status.database,
                    datasource = %status.datasource,
                    role = %status.role,
                    db_type = %status.db_type,
                    size = status.size,
                    idle = status.idle,
                    "Datasource ready"
                );
            }
            print_json(&pipeline.registry().status())
        }
        Command::Route(args) => {
            let plan = pipeline.route(&context(args), &args.sql, None)?;
            print_json(&plan)
        }
        Command::Exec(args) => {
            let result = pipeline.execute(&context(args), statement(args)?).await?;
            print_json(&result)
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration from command line and environment
    let config = Config::parse();

    // Initialize logging
    init_tracing(&config);

    info!(
        db_file = %config.db_file.display(),
        "Starting DB Router v{}",
        env!("CARGO_PKG_VERSION")
    );

    let databases = config.load_databases()?;
    let registry = Arc::new(
        DatabaseRegistry::builder()
            .connect_attempts(config.connect_attempts)
            .build(databases)
            .await?,
    );
    let pipeline = StatementPipeline::builder(registry.clone())
        .statement_timeout(config.statement_timeout_duration())
        .build();

    let result = tokio::select! {
        result = run(&config.command, &pipeline) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
            Ok(())
        }
    };

    registry.close_all().await;

    if let Err(e) = result {
        error!(error = %e, suggestion = ?e.suggestion(), "Command failed");
        return Err(e.into());
    }

    info!("Shutdown complete");
    Ok(())
}
