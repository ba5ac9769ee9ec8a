use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use relay_server::ServerConfig;
use relay_store::{Database, SqliteMessageStore};
use relay_telemetry::TelemetryConfig;

/// Real-time group chat relay.
#[derive(Debug, Parser)]
#[command(name = "chatrelay", version)]
struct Args {
    #[arg(long, env = "PORT", default_value_t = 5000)]
    port: u16,

    /// SQLite message database. Defaults to `$HOME/.chatrelay/chat.db`.
    #[arg(long, env = "DATABASE_PATH")]
    database: Option<PathBuf>,

    /// Directory of client assets served for unmatched paths.
    #[arg(long, env = "STATIC_DIR")]
    static_dir: Option<PathBuf>,

    /// Allowed browser origins. Any origin is allowed when unset.
    #[arg(long = "cors-origin", env = "CORS_ORIGINS", value_delimiter = ',')]
    cors_origins: Vec<String>,

    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: tracing::Level,

    /// Log JSON lines instead of text.
    #[arg(long)]
    log_json: bool,

    /// Persist warnings and errors to `$HOME/.chatrelay/logs.db`.
    #[arg(long)]
    log_db: bool,

    #[arg(long, default_value_t = 10)]
    store_timeout_secs: u64,

    #[arg(long, default_value_t = 256)]
    max_send_queue: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let _telemetry = relay_telemetry::init_telemetry(TelemetryConfig {
        log_level: args.log_level,
        json: args.log_json,
        log_to_sqlite: args.log_db,
        ..Default::default()
    });

    let db_path = args
        .database
        .unwrap_or_else(|| relay_telemetry::data_dir().join("chat.db"));
    let db = Database::open(&db_path)
        .with_context(|| format!("failed to open database at {}", db_path.display()))?;
    let store = Arc::new(SqliteMessageStore::new(db));

    let config = ServerConfig {
        port: args.port,
        max_send_queue: args.max_send_queue,
        store_timeout: Duration::from_secs(args.store_timeout_secs),
        cors_origins: args.cors_origins,
        static_dir: args.static_dir,
        ..Default::default()
    };
    let handle = relay_server::start(config, store)
        .await
        .with_context(|| format!("failed to bind port {}", args.port))?;

    tracing::info!(port = handle.port, "chat relay ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;

    tracing::info!("shutting down");
    handle.shutdown().await;
    Ok(())
}
