//! Sarpras booking sweep
//!
//! Runs one expiry sweep against the booking database: expires pending and
//! approved bookings whose window has passed, reports overdue pickups and
//! sends pickup reminders. Meant to be scheduled externally (cron, systemd
//! timer); repeated or overlapping runs are harmless.

use anyhow::Context;
use chrono::Utc;
use sarpras_core::AppConfig;
use sarpras_db::{
    create_pool, run_migrations, PgApproverDirectory, PgAuditSink, PgAuthorizationOracle,
    PgBookingStore, PgInventoryLedger,
};
use sarpras_services::{BookingEngine, Collaborators, TracingNotificationSink};
use std::env;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing/logging
fn init_tracing() {
    let log_level = env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "sarpras={},sarpras_db={},sarpras_services={},sqlx=warn",
            log_level, log_level, log_level
        ))
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true),
        )
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load_with_dotenv().context("failed to load configuration")?;

    init_tracing();

    info!("Starting Sarpras sweep v{}", env!("CARGO_PKG_VERSION"));

    info!("Connecting to database...");
    let pool = create_pool(&config.database).await?;
    run_migrations(&pool).await?;

    let collaborators = Collaborators {
        inventory: Arc::new(PgInventoryLedger::new(pool.clone())),
        approvers: Arc::new(PgApproverDirectory::new(pool.clone())),
        authorization: Arc::new(PgAuthorizationOracle::new(pool.clone())),
        audit: Arc::new(PgAuditSink::new(pool.clone())),
        notifications: Arc::new(TracingNotificationSink),
    };
    let store = Arc::new(PgBookingStore::new(pool));
    let engine = BookingEngine::new(store, collaborators, config.booking);

    let report = engine.sweeper.sweep(Utc::now()).await?;
    if report.is_empty() {
        info!("Nothing to sweep");
    }
    if !report.failed.is_empty() {
        warn!("{} bookings could not be swept", report.failed.len());
    }

    Ok(())
}
