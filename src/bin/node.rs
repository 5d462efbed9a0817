//! Node binary: serves the broker over stdin/stdout against a lin-kv service

use clap::Parser;
use minilog::common::{CommitPolicy, Config};
use minilog::node::{write_output, Node};
use minilog::{Broker, LinKv};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::BufReader;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "minilog-node")]
#[command(version = minilog::BUILD_INFO)]
#[command(about = "Append-log broker node speaking line-delimited JSON on stdio")]
struct Cli {
    /// Config file (defaults to $MINILOG_CONFIG or ./minilog.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Node id of the linearizable KV service
    #[arg(long)]
    kv_service: Option<String>,

    /// Append attempts before giving up
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Backoff unit in milliseconds
    #[arg(long)]
    base_delay_ms: Option<u64>,

    /// How committed offsets combine
    #[arg(long, value_enum)]
    commit_policy: Option<CommitPolicy>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load config from file, then override with CLI arguments
    let mut config = match &cli.config {
        Some(path) => Config::load_from(&path.to_string_lossy())?,
        None => Config::load()?,
    };
    if let Some(service) = cli.kv_service {
        config.kv.service = service;
    }
    if let Some(max_attempts) = cli.max_attempts {
        config.log.max_attempts = max_attempts;
    }
    if let Some(base_delay_ms) = cli.base_delay_ms {
        config.log.base_delay_ms = base_delay_ms;
    }
    if let Some(policy) = cli.commit_policy {
        config.commit.policy = policy;
    }
    config.validate()?;

    // stdout carries protocol traffic, so logs go to stderr
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("Starting minilog node {}", minilog::BUILD_INFO);
    tracing::info!("  KV service: {}", config.kv.service);
    tracing::info!(
        "  Append attempts: {} (base delay {}ms)",
        config.log.max_attempts,
        config.log.base_delay_ms
    );
    tracing::info!("  Commit policy: {:?}", config.commit.policy);

    let (node, outbound) = Node::new();
    let writer = tokio::spawn(write_output(outbound, tokio::io::stdout()));

    let kv = Arc::new(LinKv::new(node.clone(), &config.kv));
    let broker = Arc::new(Broker::new(kv, &config));
    broker.register(&node);

    node.run(BufReader::new(tokio::io::stdin())).await?;

    // Input closed: let the writer drain what is queued
    node.close();
    writer.await??;
    Ok(())
}
