//! LeadBot Gate - Entry Point
//!
//! Runs the webhook HTTP server until SIGINT/SIGTERM, then drains deferred
//! CRM work and flushes metrics.

use leadbot_gate::{server, Config, Services};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        println!("LeadBot Gate v{}", env!("CARGO_PKG_VERSION"));
        println!();
        println!("Usage: leadbot-gate");
        println!();
        println!("Environment variables:");
        println!("  REDIS_URL                  Shared primary cache (optional)");
        println!("  LEADBOT_PORT               HTTP port (default: 8080)");
        println!("  LEADBOT_CRM_BASE_URL       CRM API base URL");
        println!("  LEADBOT_CRM_API_KEY        CRM API key");
        println!("  LEADBOT_ENGINE_URL_LEAD    Lead bot engine endpoint");
        println!("  LEADBOT_ENGINE_URL_BUYER   Buyer bot engine endpoint");
        println!("  LEADBOT_ENGINE_URL_SELLER  Seller bot engine endpoint");
        println!("  LEADBOT_LOG_JSON           Log as JSON (default: false)");
        return Ok(());
    }

    let config = Config::from_env()?;

    let log_level = std::env::var("RUST_LOG")
        .map(|s| match s.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        })
        .unwrap_or(Level::INFO);

    if config.server.log_json {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_ansi(false)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(log_level)
            .with_ansi(true)
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    info!("LeadBot Gate v{}", env!("CARGO_PKG_VERSION"));

    let services = Arc::new(Services::from_config(&config).await?);
    services.start().await;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let persistence = services.spawn_background(shutdown_rx);

    let served = server::serve(services.clone(), &config.server).await;

    shutdown_tx.send(true).ok();
    if let Err(e) = persistence.await {
        warn!(error = %e, "Metrics persistence task ended abnormally");
    }
    services.shutdown().await;

    info!("LeadBot Gate stopped");
    served
}
