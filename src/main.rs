use std::net::SocketAddr;
use std::time::Duration;

use affiliate_ledger::config::Config;
use affiliate_ledger::notifications::ExpiryScheduler;
use affiliate_ledger::{AppState, Stores, init_notifier, init_pool, init_router};
use anyhow::{Context, Result};
use chrono::Utc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();

    let config = Config::from_env().context("Failed to load configuration")?;
    let pool = init_pool(&config).await?;
    let notifier = init_notifier(&config);
    let app_state = AppState::new(&config, Stores::postgres(pool), notifier)?;

    if let Some(secs) = config.sweep_interval_secs.filter(|s| *s > 0) {
        tokio::spawn(run_expiry_sweeps(
            app_state.scheduler.clone(),
            Duration::from_secs(secs),
        ));
    }

    let addr: SocketAddr = ([0, 0, 0, 0], config.server_port).into();
    let listener = TcpListener::bind(addr).await?;

    info!(%addr, "listening");
    axum::serve(listener, init_router(app_state)).await?;
    Ok(())
}

async fn run_expiry_sweeps(scheduler: ExpiryScheduler, every: Duration) {
    let mut ticker = tokio::time::interval(every);
    loop {
        ticker.tick().await;
        scheduler.sweep(Utc::now()).await;
    }
}
