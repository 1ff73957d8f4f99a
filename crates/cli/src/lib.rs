//! Service binary for the scenarios conductor.
//!
//! `run` wires configuration, logging, the Prometheus exporter, the HTTP directory
//! client and a JSON-lines event source into a [`Worker`].

pub mod config;
mod logging;
pub mod metrics;
pub mod source;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use conductor_directory::HttpDirectoryClient;
use conductor_reconciler::{
    shutdown_channel, BaseScenarioService, Dispatcher, ReconcileObserver, Worker,
};
use config::AppConfig;
use metrics::ConductorMetrics;
use source::JsonLinesSource;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "scenarios-conductor")]
#[command(about = "Creates base scenarios for new projects and regional scenarios", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// TOML configuration file (defaults to $CONFIG_PATH, then the built-in example)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Consume events and reconcile base scenarios (default)
    Run(RunArgs),

    /// Check that the directory answers and print its version
    Ping,

    /// Print the example configuration
    #[command(name = "example-config")]
    ExampleConfig,
}

#[derive(Args, Default)]
struct RunArgs {
    /// JSON-lines event file, overriding `source.path`
    #[arg(long)]
    events: Option<PathBuf>,

    /// Do not start the metrics endpoint
    #[arg(long)]
    no_metrics: bool,
}

pub async fn main_entry() -> Result<()> {
    let cli = Cli::parse();

    let command = cli.command.unwrap_or(Commands::Run(RunArgs::default()));
    if let Commands::ExampleConfig = command {
        print!("{}", AppConfig::example().to_toml()?);
        return Ok(());
    }

    let config = AppConfig::resolve(cli.config.as_deref())?;
    logging::init(&config.logging, cli.verbose, cli.quiet)?;
    config.validate().context("invalid configuration")?;

    match command {
        Commands::Run(args) => run(config, args).await,
        Commands::Ping => ping(&config).await,
        Commands::ExampleConfig => Ok(()),
    }
}

async fn run(config: AppConfig, args: RunArgs) -> Result<()> {
    log::info!("starting {} v{}", config.name, env!("CARGO_PKG_VERSION"));

    let metrics = Arc::new(ConductorMetrics::new().context("failed to register metrics")?);
    let _exporter = if config.prometheus.disable || args.no_metrics {
        None
    } else {
        Some(metrics::serve(metrics.registry(), config.prometheus.port)?)
    };

    let client = HttpDirectoryClient::new(config.directory.client_config())
        .context("failed to build directory client")?;
    if !client.ping().await {
        log::warn!(
            "directory at {} is not answering, events will be retried",
            client.base_url()
        );
    }

    let observer: Arc<dyn ReconcileObserver> = metrics;
    let service = BaseScenarioService::new(Arc::new(client), config.reconcile.settings(), observer);
    let dispatcher = Dispatcher::new(service, config.reconcile.failure_policy);

    let (trigger, shutdown) = shutdown_channel();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                log::info!("interrupt received, finishing the current event");
                let _ = trigger.send(true);
            }
            Err(err) => log::error!("failed to listen for interrupt: {err}"),
        }
    });

    let path = args.events.or(config.source.path);
    let source = JsonLinesSource::open(path.as_deref(), config.source.max_redeliveries).await?;
    let mut worker = Worker::new(source, dispatcher, shutdown);
    let stats = worker.run().await.context("worker stopped on a source error")?;

    if worker.source().dropped() > 0 {
        log::error!(
            "{} event(s) dropped after exhausting redeliveries",
            worker.source().dropped()
        );
    }
    log::info!("processed {} delivery(ies)", stats.delivered);
    Ok(())
}

async fn ping(config: &AppConfig) -> Result<()> {
    let client = HttpDirectoryClient::new(config.directory.client_config())
        .context("failed to build directory client")?;
    anyhow::ensure!(
        client.ping().await,
        "directory at {} did not answer",
        client.base_url()
    );
    let version = client
        .version()
        .await
        .context("failed to read directory version")?;
    println!("directory at {} is up, version {version}", client.base_url());
    Ok(())
}
