//! dynchand - dynamic voice channel daemon
//!
//! Spawns a child voice channel whenever someone enters a spawner, removes it
//! once it empties, and periodically reconciles stored state against the
//! platform.

mod config;
mod db;
mod engine;
mod error;
mod http;
mod metrics;
mod platform;
mod state;

use crate::config::Config;
use crate::engine::{LifecycleEngine, spawn_reconciler};
use crate::platform::BridgePlatform;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "dynchan.toml".to_string());

    let config = Config::load(&config_path).map_err(|e| {
        error!(path = %config_path, error = %e, "Failed to load config");
        e
    })?;

    if let Err(errors) = config::validation::validate(&config) {
        for e in &errors {
            error!(error = %e, "Invalid configuration");
        }
        return Err(anyhow::anyhow!(
            "{} configuration error(s) in {config_path}",
            errors.len()
        ));
    }

    info!(
        bot = %config.bot.name,
        bridge = %config.bridge.base_url,
        "Starting dynchand"
    );

    // Initialize database
    let store = Arc::new(db::open_store(&config.database.path)?);

    let platform = Arc::new(BridgePlatform::new(&config.bridge, &config.bot.name)?);
    let engine = Arc::new(LifecycleEngine::new(
        store,
        platform,
        config.naming.clone(),
    ));
    info!(
        count = engine.store().scan_all()?.count(),
        "Loaded managed channels"
    );

    if config.http.metrics {
        metrics::init();
        info!("Metrics initialized");
    } else {
        info!("Metrics disabled");
    }

    let (ready_tx, ready_rx) = watch::channel(false);
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let reconciler = spawn_reconciler(
        Arc::clone(&engine),
        config.reconcile.interval(),
        ready_rx,
        shutdown_tx.subscribe(),
    );
    info!(
        interval_secs = config.reconcile.interval_secs,
        "Reconciler waiting for platform readiness"
    );

    let app = http::router(
        http::AppState {
            engine,
            ready: Arc::new(ready_tx),
        },
        config.http.metrics,
    );
    let mut server = tokio::spawn(http::run_http_server(
        config.http.listen,
        app,
        shutdown_tx.subscribe(),
    ));

    // Stop on Ctrl-C, or as soon as the listener dies on its own.
    let served = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Shutdown requested");
            let _ = shutdown_tx.send(());
            server.await
        }
        finished = &mut server => finished,
    };
    let _ = shutdown_tx.send(());

    if let Err(e) = reconciler.await {
        error!(error = %e, "Reconciler task failed");
    }
    match served {
        Ok(Ok(())) => {}
        Ok(Err(e)) => {
            error!(addr = %config.http.listen, error = %e, "HTTP server error");
            return Err(e.into());
        }
        Err(e) => error!(error = %e, "HTTP server task failed"),
    }

    info!("dynchand stopped");
    Ok(())
}
