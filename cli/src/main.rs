//! Charge Advisor CLI
//!
//! Headless central system suitable for a systemd service or a container.
//!
//! ```sh
//! # Run with default config (~/.config/charge-advisor/config.toml)
//! charge-advisor
//!
//! # Custom config path and central system id
//! charge-advisor --config /etc/charge-advisor/config.toml --csid garage
//!
//! # Validate config without starting
//! charge-advisor --check
//! ```

use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};

use charge_advisor::config::{AppConfig, CONFIG_ENV};
use charge_advisor::server::{init_tracing, ServerHandle, ServerOptions};

/// Charge Advisor: entity reconciliation for OCPP charging stations.
#[derive(Parser, Debug)]
#[command(
    name = "charge-advisor",
    version,
    about = "Central system for OCPP 1.6 / 2.0.1 charging stations",
    long_about = "Keeps the host entity registry in step with a tree of OCPP charging \
                  stations and dispatches service calls to them.\n\n\
                  Default config: ~/.config/charge-advisor/config.toml"
)]
struct Cli {
    /// Path to the configuration file (TOML).
    #[arg(short, long, env = CONFIG_ENV)]
    config: Option<PathBuf>,

    /// Override the central system id.
    #[arg(long)]
    csid: Option<String>,

    /// Override the log level (trace, debug, info, warn, error).
    #[arg(short, long)]
    log_level: Option<String>,

    /// Start backend communication on startup.
    #[arg(long)]
    backend_autostart: bool,

    /// Validate the configuration file and exit.
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // ── Load configuration ─────────────────────────────────────
    let config_path = cli.config.unwrap_or_else(charge_advisor::default_config_path);

    let loaded = AppConfig::load(&config_path);
    let mut config = match &loaded {
        Ok(cfg) => cfg.clone(),
        Err(_) => AppConfig::default(),
    };

    // ── Apply CLI overrides ────────────────────────────────────
    if let Some(ref level) = cli.log_level {
        config.logging.level = level.clone();
    }
    init_tracing(&config);

    match loaded {
        Ok(_) => info!(path = %config_path.display(), "Configuration loaded"),
        Err(e) => {
            error!(path = %config_path.display(), error = %e, "Failed to load config");
            if cli.check {
                return Err(e.into());
            }
            error!("Using default configuration");
        }
    }

    if let Some(csid) = cli.csid {
        info!(%csid, "CLI override: central_system.id");
        config.central_system.id = csid;
    }
    if cli.backend_autostart {
        config.backend.autostart = true;
    }

    // ── Config validation mode ─────────────────────────────────
    if cli.check {
        config.validate()?;
        let settings = config.station_settings()?;
        println!("Configuration is valid");
        println!("   Config file   : {}", config_path.display());
        println!("   Central system: {}", config.central_system.id);
        println!("   Address       : {}", config.central_system.address());
        println!("   Max current   : {} A", settings.max_current);
        println!("   Log level     : {}", config.logging.level);
        return Ok(());
    }

    // ── Start ──────────────────────────────────────────────────
    let handle = ServerHandle::start(ServerOptions {
        config,
        ..Default::default()
    })
    .await?;

    handle.install_signal_handler();
    info!("Press Ctrl+C to shut down");

    handle.wait().await;
    Ok(())
}
