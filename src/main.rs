//! Main entry point for the Pairing Room matchmaking service
//!
//! Loads configuration, initializes logging, runs the service and shuts it
//! down gracefully on SIGINT/SIGTERM.

use anyhow::Result;
use clap::Parser;
use pairing_room::config::{validate_config, AppConfig};
use pairing_room::service::{AppState, HealthCheck, HealthStatus};
use std::path::PathBuf;
use tokio::signal;
use tracing::{error, info, warn};

/// Pairing Room - criteria-keyed matchmaking service
#[derive(Parser)]
#[command(
    name = "pairing-room",
    version,
    about = "Matchmaking service that pairs queued parties by criteria and availability",
    long_about = "Pairing Room consumes queue-joined and queue-left events over AMQP, keeps \
                 parties in pools keyed by their matching criteria, forms pairs (optionally only \
                 from parties with shared weekly availability), flags schedule conflicts between \
                 a party's pairs, and publishes match-created events."
)]
struct Args {
    #[arg(
        short,
        long,
        value_name = "FILE",
        help = "Path to configuration file (TOML format)"
    )]
    config: Option<PathBuf>,

    #[arg(long, help = "Perform a health check and exit with status code")]
    health_check: bool,

    #[arg(
        short,
        long,
        value_name = "LEVEL",
        help = "Override log level (trace, debug, info, warn, error)"
    )]
    log_level: Option<String>,

    #[arg(long, value_name = "URL", help = "Override AMQP connection URL")]
    amqp_url: Option<String>,

    #[arg(long, value_name = "PORT", help = "Override health server port")]
    health_port: Option<u16>,

    #[arg(short, long, help = "Enable debug mode with verbose logging")]
    debug: bool,

    #[arg(
        long,
        help = "Validate configuration and exit without starting service"
    )]
    dry_run: bool,
}

/// Initialize structured logging with the configured level
fn init_logging(log_level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    Ok(())
}

/// Connect to the broker, check every component and exit with a status code
async fn perform_health_check(config: AppConfig) -> Result<()> {
    info!("Performing health check...");

    let app_state = match AppState::new(config).await {
        Ok(state) => state,
        Err(e) => {
            println!("Health Check: {}", HealthStatus::Unhealthy);
            println!("  Error: {}", e);
            std::process::exit(1);
        }
    };

    match HealthCheck::check(app_state.health_context()).await {
        Ok(health) => {
            // The service loop is not running in this mode.
            let failing: Vec<_> = health
                .checks
                .iter()
                .filter(|c| c.name != "service_running" && c.status == HealthStatus::Unhealthy)
                .collect();

            for check in &health.checks {
                println!(
                    "  {}: {}{}",
                    check.name,
                    check.status,
                    check
                        .message
                        .as_deref()
                        .map(|m| format!(" ({})", m))
                        .unwrap_or_default()
                );
            }

            if failing.is_empty() {
                println!("Health Check: {}", HealthStatus::Healthy);
                std::process::exit(0);
            } else {
                println!("Health Check: {}", HealthStatus::Unhealthy);
                std::process::exit(1);
            }
        }
        Err(e) => {
            error!("Health check failed: {}", e);
            std::process::exit(1);
        }
    }
}

/// Wait for shutdown signals (SIGINT, SIGTERM)
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C) signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}

fn display_startup_banner(config: &AppConfig) {
    info!("Pairing Room Matchmaking Service");
    info!("   Service: {}", config.service.name);
    info!("   Log level: {}", config.service.log_level);
    info!("   Health port: {}", config.service.health_port);
    info!("   AMQP: {} (queue {})", config.amqp.url, config.amqp.queue_name);
    info!(
        "   Pair size: {}, skill window: +/-{}",
        config.matchmaking.default_pair_size, config.matchmaking.skill_window
    );
    info!(
        "   Schedule matching: {}, conflict checks: {}",
        config.matchmaking.match_on_schedule, config.matchmaking.enable_conflict_checks
    );
    info!(
        "   Regions: {}",
        config
            .regions
            .iter()
            .map(|r| r.slug.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
}

/// Load configuration from file or environment, then apply CLI overrides
fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = if let Some(config_path) = &args.config {
        AppConfig::from_file(config_path)?
    } else {
        AppConfig::from_env()?
    };

    if let Some(log_level) = &args.log_level {
        config.service.log_level = log_level.clone();
    }

    if args.debug {
        config.service.log_level = "debug".to_string();
    }

    if let Some(amqp_url) = &args.amqp_url {
        config.amqp.url = amqp_url.clone();
    }

    if let Some(health_port) = args.health_port {
        config.service.health_port = health_port;
    }

    validate_config(&config)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(&args).unwrap_or_else(|e| {
        eprintln!("Configuration error: {:#}", e);
        std::process::exit(1);
    });

    if let Err(e) = init_logging(&config.service.log_level) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    if args.health_check {
        return perform_health_check(config).await;
    }

    if args.dry_run {
        info!("Configuration validation successful");
        display_startup_banner(&config);
        info!("Dry run completed - exiting without starting service");
        return Ok(());
    }

    display_startup_banner(&config);

    let mut app_state = match AppState::new(config.clone()).await {
        Ok(state) => state,
        Err(e) => {
            error!("Failed to initialize application: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = app_state.start().await {
        error!("Failed to start service: {}", e);
        std::process::exit(1);
    }

    info!("Pairing Room is running, press Ctrl+C to shut down");

    wait_for_shutdown_signal().await;

    info!("Shutdown signal received, beginning graceful shutdown...");

    match tokio::time::timeout(config.shutdown_timeout(), app_state.shutdown()).await {
        Ok(Ok(())) => info!("Graceful shutdown completed"),
        Ok(Err(e)) => warn!("Shutdown finished with errors: {}", e),
        Err(_) => warn!("Shutdown timeout exceeded, forcing exit"),
    }

    Ok(())
}
