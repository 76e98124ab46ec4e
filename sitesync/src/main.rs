//! # sitesync
//!
//! Walks the remote website catalog page by page and hands every website,
//! together with its decrypted credential, to the background task queue.
//!
//! One invocation is one pass. Schedule it externally (cron, a systemd
//! timer, a Kubernetes CronJob) for periodic syncs.

use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::{Args as ClapArgs, Parser, Subcommand};
use sitesync_config::{Config, ConfigLoad, ConfigLoader, ConfigLoaderOptions, ConfigWarnings};
use sitesync_core::{
    SyncError, SyncOrchestrator,
    catalog::HttpCatalogClient,
    dispatch::RedisCelerySink,
    keys::RsaKeyProvider,
};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// CLI entry point
#[derive(Parser, Debug)]
#[command(name = "sitesync")]
#[command(about = "Sync the website catalog into the task queue")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    run: RunArgs,
}

#[derive(ClapArgs, Debug, Clone)]
struct RunArgs {
    /// Path to a sitesync.toml configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Path to a .env file (defaults to ./.env when present)
    #[arg(long, global = true)]
    env_file: Option<PathBuf>,

    /// Number of record workers (overrides config)
    #[arg(short, long)]
    concurrency: Option<usize>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Load and validate configuration, then exit
    CheckConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = load_runtime_config(&cli.run)?;

    match cli.command {
        Some(Command::CheckConfig) => {
            log_effective_config(&config);
            info!("configuration is valid");
            Ok(())
        }
        None => run_sync(config).await,
    }
}

fn load_runtime_config(args: &RunArgs) -> anyhow::Result<Config> {
    let ConfigLoad { config, warnings } = ConfigLoader::with_options(ConfigLoaderOptions {
        config_path: args.config.clone(),
        env_file: args.env_file.clone(),
        worker_concurrency: args.concurrency,
    })
    .load()
    .context("failed to load configuration")?;

    init_tracing();

    if config.metadata.env_file_loaded {
        info!("loaded .env file");
    }
    if let Some(path) = config.metadata.config_path.as_ref() {
        info!(path = %path.display(), "loaded configuration file");
    }
    log_warnings(&warnings);

    Ok(config)
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                // Per-record chatter stays at debug. Override via RUST_LOG.
                "info,sync::summary=info,sync::worker=info,reqwest=warn,redis=warn".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn log_warnings(warnings: &ConfigWarnings) {
    for warning in warnings.iter() {
        match &warning.hint {
            Some(hint) => {
                warn!(message = %warning.message, hint = %hint, "configuration warning")
            }
            None => {
                warn!(message = %warning.message, "configuration warning")
            }
        }
    }
}

fn log_effective_config(config: &Config) {
    let sync = &config.sync;
    info!(
        catalog.url = %config.catalog.url,
        catalog.username = %config.catalog.username,
        broker.url = %config.broker.redacted_url(),
        broker.queue = %config.broker.queue,
        broker.task_name = %config.broker.task_name,
        sync.worker_concurrency = sync.worker_concurrency,
        sync.queue_capacity = sync.queue_capacity,
        sync.page_fetch_attempts = sync.page_fetch_attempts,
        sync.page_retry_delay_ms = sync.page_retry_delay_ms,
        sync.fetch_timeout_ms = sync.fetch_timeout_ms,
        sync.record_timeout_ms = sync.record_timeout_ms,
        sync.run_timeout_secs = ?sync.run_timeout_secs,
        sync.rsa_key_bits = sync.rsa_key_bits,
        "effective configuration"
    );
}

async fn run_sync(config: Config) -> anyhow::Result<()> {
    log_effective_config(&config);

    let sink = RedisCelerySink::connect(&config.broker)
        .await
        .map_err(SyncError::from)?;

    let catalog = HttpCatalogClient::connect(&config.catalog, config.sync.fetch_timeout())
        .await
        .map_err(SyncError::from)?;
    info!(catalog = %config.catalog.url, "catalog session established");

    let orchestrator = SyncOrchestrator::new(
        config.sync.clone(),
        Arc::new(RsaKeyProvider::new(config.sync.rsa_key_bits)),
        Arc::new(catalog),
        Arc::new(sink),
    )
    .context("invalid sync settings")?;

    let cancel = CancellationToken::new();
    let signal = tokio::spawn(cancel_on_ctrl_c(cancel.clone()));

    let outcome = orchestrator.run(cancel).await;
    signal.abort();

    let report = outcome.context("website sync failed")?;
    if report.cancelled {
        warn!(
            abandoned = report.records.abandoned,
            "pass was interrupted; remaining websites will be picked up by the next run"
        );
    }
    Ok(())
}

async fn cancel_on_ctrl_c(cancel: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            warn!("interrupt received; finishing in-flight websites and stopping");
            cancel.cancel();
        }
        Err(err) => {
            warn!(error = %err, "unable to listen for interrupt signal");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_reach_check_config() {
        let cli = Cli::try_parse_from([
            "sitesync",
            "check-config",
            "--config",
            "/etc/sitesync.toml",
        ])
        .unwrap();
        assert!(matches!(cli.command, Some(Command::CheckConfig)));
        assert_eq!(cli.run.config, Some(PathBuf::from("/etc/sitesync.toml")));
    }

    #[test]
    fn concurrency_override_parses() {
        let cli = Cli::try_parse_from(["sitesync", "-c", "32"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.run.concurrency, Some(32));
    }
}
