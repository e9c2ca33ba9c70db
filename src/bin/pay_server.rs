//! Malibu pay service: the ledger of record behind an internal HTTP API.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use malibu_backend::{config::Config, ledger};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "malibu_backend=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    info!("💰 Starting malibu pay service on port {}", config.pay_port);

    let engine = Arc::new(ledger::Ledger::open(&config.ledger_db_path)?);
    let app = ledger::api::create_router(engine);

    let addr = format!("0.0.0.0:{}", config.pay_port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Internal API listening on {}", addr);

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
