//! `turnkeyd`: runs one turnstile or door controller.
//!
//! ```text
//! turnkeyd --config /etc/turnkey/turnkeyd.toml          # run (default)
//! turnkeyd --config /etc/turnkey/turnkeyd.toml validate
//! turnkeyd queue
//! ```

mod logging;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};
use turnkey_core::DaemonConfig;
use turnkey_core::constants::DEFAULT_VERSION;
use turnkey_hardware::line_reader::LineReader;
use turnkey_hardware::{AnyCardReader, RelayConfig, RelayController};
use turnkey_network::{ChannelCommandSource, HttpBackend, HttpBackendConfig, TcpCommandConfig, TcpCommandSource};
use turnkey_storage::{AccessLogger, WhitelistStore};
use turnkey_turnstile::{ControllerConfig, Readers, TurnstileController};
use turnkey_updater::{AutoUpdater, UpdaterConfig};

#[derive(Debug, Parser)]
#[command(name = "turnkeyd", version, about = "Access-control daemon for turnstiles and doors")]
struct Cli {
    /// TOML configuration file. Environment variables override its values.
    #[arg(short, long, env = "TURNKEY_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
enum Command {
    /// Run the controller until SIGINT or SIGTERM.
    Run,
    /// Load and validate the configuration, then exit.
    Validate,
    /// Print offline-queue statistics and the installed version.
    Queue,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = DaemonConfig::load(cli.config.as_deref()).context("invalid configuration")?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Validate => {
            println!(
                "configuration ok: device {} ({}, {}), backend {}",
                config.device.id, config.device.kind, config.device.environment, config.backend.url
            );
            Ok(())
        }
        Command::Queue => print_queue(&config).await,
        Command::Run => {
            let _guard = logging::init(&config.logging)?;
            if let Err(e) = run(config).await {
                error!(error = format!("{e:#}"), "daemon failed");
                return Err(e);
            }
            Ok(())
        }
    }
}

async fn print_queue(config: &DaemonConfig) -> Result<()> {
    let logger = AccessLogger::open(&config.access.offline_logs_file, config.access.max_offline_logs)
        .await
        .context("cannot open offline queue")?;
    let stats = logger.stats().await;
    let version = tokio::fs::read_to_string(config.update.version_file())
        .await
        .map(|v| v.trim().to_string())
        .unwrap_or_else(|_| DEFAULT_VERSION.to_string());

    println!("version:       {version}");
    println!("queue file:    {}", logger.path().display());
    println!("pending:       {} / {}", stats.total, logger.capacity());
    println!("authorized:    {}", stats.authorized);
    println!("denied:        {}", stats.denied);
    println!("unique cards:  {}", stats.unique_cards);
    if let (Some(oldest), Some(newest)) = (stats.oldest, stats.newest) {
        println!("range:         {oldest} .. {newest}");
    }
    Ok(())
}

async fn run(config: DaemonConfig) -> Result<()> {
    info!(
        device_id = %config.device.id,
        device_kind = %config.device.kind,
        environment = %config.device.environment,
        version = env!("CARGO_PKG_VERSION"),
        "turnkeyd starting"
    );

    let relay = RelayController::from_config(&RelayConfig::from(&config))
        .context("relay initialization failed")?;
    let readers = open_readers(&config).await?;
    let logger = AccessLogger::open(&config.access.offline_logs_file, config.access.max_offline_logs)
        .await
        .context("cannot open offline queue")?;
    let whitelist = WhitelistStore::open(&config.access.whitelist_file).await;
    let backend = Arc::new(
        HttpBackend::new(HttpBackendConfig::from(&config)).context("cannot build backend client")?,
    );

    let updater = AutoUpdater::new(UpdaterConfig::from(&config), Arc::clone(&backend));
    if let Err(e) = updater.initialize().await {
        warn!(error = %e, "updater directories unavailable");
    }

    let controller = Arc::new(
        TurnstileController::new(
            ControllerConfig::from(&config),
            backend,
            Arc::new(relay),
            Arc::new(logger),
            Arc::new(whitelist),
        )
        .with_updater(Arc::new(updater)),
    );
    controller.initialize().await;

    let token = controller.shutdown_token();
    tokio::spawn(async move {
        shutdown_signal().await;
        token.cancel();
    });

    match TcpCommandConfig::from_daemon_config(&config) {
        Some(tcp) => {
            let commands = TcpCommandSource::spawn(tcp, controller.shutdown_token());
            Arc::clone(&controller).run(readers, commands).await?;
        }
        None => {
            info!("no command server configured, remote commands disabled");
            let (_sender, commands) = ChannelCommandSource::new(1);
            Arc::clone(&controller).run(readers, commands).await?;
        }
    }

    info!("turnkeyd stopped");
    Ok(())
}

async fn open_readers(config: &DaemonConfig) -> Result<Readers> {
    let mut readers = Readers::default();
    if let Some(path) = &config.reader.in_device {
        let reader = LineReader::open(path).await.context("inbound reader")?;
        readers.inbound = Some(AnyCardReader::from(reader));
    }
    if let Some(path) = &config.reader.out_device {
        let reader = LineReader::open(path).await.context("outbound reader")?;
        readers.outbound = Some(AnyCardReader::from(reader));
    }
    Ok(readers)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "cannot listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                error!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("SIGINT received, shutting down"),
        _ = terminate => info!("SIGTERM received, shutting down"),
    }
}
