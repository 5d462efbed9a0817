//! HTTP binary: serves the broker API over an in-process store

use clap::Parser;
use minilog::common::{CommitPolicy, Config};
use minilog::http::{create_router, AppState};
use minilog::{Broker, MemKv};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "minilog-serve")]
#[command(version = minilog::BUILD_INFO)]
#[command(about = "Append-log broker HTTP API backed by an in-memory store")]
struct Cli {
    /// Config file (defaults to $MINILOG_CONFIG or ./minilog.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Bind address for HTTP
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// How committed offsets combine
    #[arg(long, value_enum)]
    commit_policy: Option<CommitPolicy>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_from(&path.to_string_lossy())?,
        None => Config::load()?,
    };
    if let Some(bind) = cli.bind {
        config.http.bind_addr = bind;
    }
    if let Some(policy) = cli.commit_policy {
        config.commit.policy = policy;
    }
    config.validate()?;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let broker = Arc::new(Broker::new(Arc::new(MemKv::new()), &config));
    let router = create_router(AppState { broker }, config.http.body_limit_bytes);

    let listener = tokio::net::TcpListener::bind(config.http.bind_addr).await?;
    tracing::info!("minilog HTTP API listening on {}", listener.local_addr()?);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
}
