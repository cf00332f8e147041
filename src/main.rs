use std::{error::Error, sync::Arc};

use clap::Parser;
use dompet::{
    api::{self, AppState},
    config::{CliArgs, Config, LoggingConfig},
    storage, Ledger,
};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::EnvFilter;

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let cli = CliArgs::parse();
    let config = Config::load(&cli);
    init_tracing(&config.logging);

    // the synchronous database clients run their own runtimes, so they are
    // created and dropped off the async executor
    let storage_config = config.storage.clone();
    let backend = tokio::task::spawn_blocking(move || storage::open(&storage_config)).await??;
    let ledger = Arc::new(Ledger::new(backend).with_transient_retries(config.ledger.transient_retries));

    let mut state = AppState::new(ledger.clone());
    if config.metrics.enabled {
        state = state.with_metrics(PrometheusBuilder::new().install_recorder()?);
    }

    let app = api::router(state, Arc::new(config.auth.clone()));
    let addr = config.listen_addr()?;
    tracing::info!(%addr, backend = ledger.storage().name(), auth = config.auth.enabled, "dompet listening");

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tokio::task::spawn_blocking(move || drop(ledger)).await?;
    Ok(())
}
