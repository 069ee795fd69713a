//! # ruleflowd — RuleFlow scheduler daemon
//!
//! Boots the delayed-action scheduler: loads config, opens the store,
//! registers the production action handlers, and polls until Ctrl-C.
//!
//! Usage:
//!   ruleflowd                          # Default config (~/.ruleflow/config.toml)
//!   ruleflowd --interval-ms 2000       # Faster polling
//!   ruleflowd --db-path ./dev.db -v    # Local database, verbose logging

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use ruleflow_core::RuleFlowConfig;
use ruleflow_scheduler::{ActionExecutor, NotifyHandler, SchedulerDb, SchedulerEngine, WebhookHandler};

#[derive(Parser)]
#[command(name = "ruleflowd", version, about = "⚙️ RuleFlow — rule automation scheduler")]
struct Cli {
    /// Config file path (default: ~/.ruleflow/config.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Database path (overrides config)
    #[arg(long)]
    db_path: Option<String>,

    /// Poll interval in milliseconds (overrides config)
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn expand_path(p: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(p).to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "ruleflowd=debug,ruleflow_scheduler=debug"
    } else {
        "ruleflowd=info,ruleflow_scheduler=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let config = match &cli.config {
        Some(path) => RuleFlowConfig::load_from(&expand_path(path))?,
        None => {
            let config = RuleFlowConfig::load()?;
            // First run: persist the defaults so they can be edited.
            let default_path = RuleFlowConfig::default_path();
            if !default_path.exists() {
                config.save()?;
                tracing::info!("💾 Default config written: {}", default_path.display());
            }
            config
        }
    };

    let db_path = cli.db_path.as_deref().unwrap_or(&config.db_path);
    let db = Arc::new(SchedulerDb::open(&expand_path(db_path))?);
    tracing::info!("💾 Store opened: {db_path}");

    let mut executor =
        ActionExecutor::new(Duration::from_secs(config.scheduler.executor_timeout_secs));
    executor.register(Arc::new(WebhookHandler::new(Duration::from_secs(
        config.webhook.http_timeout_secs,
    ))));
    executor.register(Arc::new(NotifyHandler));

    let engine = Arc::new(SchedulerEngine::new(db, executor));
    let interval_ms = cli.interval_ms.unwrap_or(config.scheduler.poll_interval_ms);
    engine.start(Some(interval_ms)).await;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");
    engine.stop().await;
    Ok(())
}
