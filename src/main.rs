//! bootme - network boot orchestrator daemon.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal::unix::{signal, SignalKind};
use tracing_subscriber::EnvFilter;

use bootme::bootfiles::BootFileSet;
use bootme::config::{Config, LogMode};
use bootme::interface;
use bootme::orchestrator::{Listeners, Orchestrator, ShutdownHandle};

#[derive(Debug, Parser)]
#[command(name = "bootme")]
#[command(about = "ProxyDHCP, TFTP and iPXE boot configuration for network-booted machines")]
#[command(version)]
struct Args {
    /// Configuration file (key = value per line)
    #[arg(short, long, env = "BOOTME_CONFIG")]
    config: Option<PathBuf>,

    /// Network interface to serve on
    #[arg(short, long)]
    interface: Option<String>,

    /// Directory holding the TFTP boot files
    #[arg(long)]
    boot_files_dir: Option<PathBuf>,

    /// Upstream boot decision service URL
    #[arg(long)]
    boot_decision_url: Option<String>,

    /// HTTP port for the boot-config endpoint
    #[arg(long)]
    http_port: Option<u16>,

    /// Log level (debug, info, warn, error); RUST_LOG takes precedence
    #[arg(long)]
    log_level: Option<String>,

    /// Log output format (console, json)
    #[arg(long)]
    log_mode: Option<LogMode>,
}

impl Args {
    /// Command line flags win over file and environment.
    fn apply(&self, config: &mut Config) -> Result<()> {
        let overrides = [
            ("interface", self.interface.clone()),
            (
                "boot_files_dir",
                self.boot_files_dir
                    .as_ref()
                    .map(|dir| dir.display().to_string()),
            ),
            ("boot_decision_url", self.boot_decision_url.clone()),
            ("http_port", self.http_port.map(|port| port.to_string())),
            ("log_level", self.log_level.clone()),
            ("log_mode", self.log_mode.map(|mode| mode.to_string())),
        ];

        for (key, value) in overrides {
            if let Some(value) = value {
                config.set(key, &value)?;
            }
        }
        Ok(())
    }
}

fn init_tracing(level: &str, mode: LogMode) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match mode {
        LogMode::Console => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .init(),
        LogMode::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(false)
            .init(),
    }
}

/// Raise the shutdown signal on SIGTERM or SIGINT.
fn spawn_signal_handler(shutdown: ShutdownHandle) -> Result<()> {
    let mut sigterm =
        signal(SignalKind::terminate()).context("failed to install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("failed to install SIGINT handler")?;

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, shutting down");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, shutting down");
            }
        }
        shutdown.trigger();
    });

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load(args.config.as_deref()).context("failed to load configuration")?;
    args.apply(&mut config)
        .context("invalid command line override")?;

    init_tracing(&config.log_level, config.log_mode);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting bootme");

    let server_ip = interface::resolve_ipv4(&config.interface).with_context(|| {
        format!(
            "cannot serve on {} (available: {})",
            config.interface,
            interface::interface_names().join(", ")
        )
    })?;
    tracing::info!(interface = %config.interface, server_ip = %server_ip, "Using interface");

    let service = config
        .into_service_config(server_ip)
        .context("invalid configuration")?;

    let boot_files = BootFileSet::from_dir(&service.boot_files_dir).with_context(|| {
        format!(
            "failed to load boot files from {}",
            service.boot_files_dir.display()
        )
    })?;
    if boot_files.is_empty() {
        tracing::warn!(dir = %service.boot_files_dir.display(), "No boot files found");
    } else {
        tracing::info!(files = ?boot_files.names(), "Serving boot files over TFTP");
    }

    let listeners = Listeners::bind(&service, Arc::new(boot_files)).await?;

    let mut orchestrator = Orchestrator::new();
    spawn_signal_handler(orchestrator.shutdown_handle())?;
    orchestrator.start(listeners);

    orchestrator.wait().await?;

    tracing::info!("bootme stopped");
    Ok(())
}
