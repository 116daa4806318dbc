//! Hivewatch - honeypot administration platform
//!
//! Accepts signed attack reports on a capture API, maintains per-IP
//! attacker profiles, and serves the admin dashboard JSON API:
//! - HMAC-authenticated capture endpoint with replay protection
//! - Atomic profile upsert + event insert per report
//! - Aggregate statistics and listings for the admin UI

mod config;
mod db;
mod error;
mod retention;
mod signature;
mod web;

use anyhow::Result;
use tracing::{info, Level};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (before any other initialization)
    let _ = dotenvy::dotenv();

    // Load configuration
    let config = config::Config::load()?;

    // Initialize logging based on LOG_FORMAT env var
    // Use LOG_FORMAT=gcp for structured GCP Cloud Logging
    let level: Level = config.logging.level.parse().unwrap_or(Level::INFO);
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if log_format == "gcp" {
        tracing_subscriber::registry()
            .with(tracing_subscriber::filter::LevelFilter::from_level(level))
            .with(tracing_stackdriver::layer())
            .init();
    } else {
        tracing_subscriber::fmt().with_max_level(level).init();
    }

    info!("Starting hivewatch...");
    info!("Configuration loaded");

    // Initialize database
    let db = db::Database::new(&config.database).await?;
    db.run_migrations().await?;
    info!("Database initialized");

    // Start periodic retention sweep in background
    retention::spawn(db.clone(), config.retention.clone());

    // Start web server (blocking)
    web::start_server(&config, db).await?;

    Ok(())
}
