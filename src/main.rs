use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use scan_ledger::server::{self, ServerConfig};
use scan_ledger::store::Store;

/// scan-ledger — collects port-scan results and serves a first-seen/last-seen report.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "scan-ledger",
    version,
    about = "Collects port-scan results into SQLite and serves a first-seen/last-seen report.",
    long_about = None
)]
struct Cli {
    /// SQLite database file. Created if missing.
    #[arg(long, env = "SCAN_LEDGER_DB", default_value = "scan.db")]
    db: PathBuf,

    /// HTTP listen address (host:port).
    #[arg(long = "http-addr", env = "SCAN_LEDGER_ADDR", default_value = "0.0.0.0:80")]
    http_addr: String,

    /// Directory served under /static.
    #[arg(long = "static-dir", env = "SCAN_LEDGER_STATIC", default_value = "static")]
    static_dir: PathBuf,

    /// Largest accepted request body, in MiB. Scan batches can be big.
    #[arg(long = "max-body-mb", env = "SCAN_LEDGER_MAX_BODY_MB", default_value_t = 16)]
    max_body_mb: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,tower_http=info")),
        )
        .init();

    let cli = Cli::parse();
    info!(
        db = %cli.db.display(),
        http_addr = %cli.http_addr,
        static_dir = %cli.static_dir.display(),
        max_body_mb = cli.max_body_mb,
        "scan-ledger configuration"
    );

    let store = Store::open(&cli.db)
        .with_context(|| format!("failed to open database {}", cli.db.display()))?;

    if !cli.static_dir.is_dir() {
        warn!(dir = %cli.static_dir.display(), "static directory not found, /static will 404");
    }

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown requested");
        on_signal.cancel();
    });

    let config = ServerConfig {
        bind: cli.http_addr,
        static_dir: cli.static_dir,
        max_body_bytes: cli.max_body_mb.saturating_mul(1024 * 1024),
    };
    server::spawn_server(config, store, shutdown).await
}
