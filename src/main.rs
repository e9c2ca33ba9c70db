//! Malibu game service.
//!
//! Serves the wallet/table API and runs the two background drivers: the
//! pending-tx reconciler and the spin scheduler. The ledger lives either in
//! a separate pay service (default) or in-process (EMBEDDED_PAY=1).

use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use malibu_backend::{
    api::{create_router, AppState},
    config::Config,
    game::{spin_polling, GameStore, TableManager},
    ledger::Ledger,
    notifier::{BroadcastNotifier, Notifier},
    pay::{reconciler::reconciler_polling, HttpPayApi, LocalPayApi, PayApi, TxProcessor},
};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = Arc::new(Config::from_env());
    info!("🎰 Starting malibu game service on port {}", config.port);

    let store = Arc::new(GameStore::new(&config.game_db_path)?);
    let seeded = store.seed_tables(Utc::now()).await?;
    if seeded > 0 {
        info!("Seeded {} tables", seeded);
    }

    let pay: Arc<dyn PayApi> = if config.embedded_pay {
        info!("Running ledger in-process ({})", config.ledger_db_path);
        Arc::new(LocalPayApi::new(Arc::new(Ledger::open(&config.ledger_db_path)?)))
    } else {
        info!("Using pay service at {}", config.pay_base_url);
        Arc::new(HttpPayApi::new(config.pay_base_url.clone()))
    };

    let notifier: Arc<dyn Notifier> = Arc::new(BroadcastNotifier::new(256));
    let processor = Arc::new(TxProcessor::new(store.clone(), pay, notifier.clone()));

    tokio::spawn(reconciler_polling(
        processor.clone(),
        Duration::from_secs(config.reconcile_poll_secs),
        ChronoDuration::seconds(config.reconcile_cutoff_secs),
    ));

    let manager = Arc::new(TableManager::new(
        store.clone(),
        notifier.clone(),
        ChronoDuration::minutes(config.idle_cutoff_mins),
    ));
    tokio::spawn(spin_polling(manager, Duration::from_secs(config.spin_poll_secs)));

    let state = AppState {
        store,
        processor,
        notifier,
        config: config.clone(),
    };
    let app = create_router(state).layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!("🎯 API server listening on {}", addr);

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "malibu_backend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
