//! HTTP surface of the ledger.
//!
//! Handlers never call the ledger on the async executor. Every call runs on
//! the blocking pool, so a client that disconnects mid-request cannot cancel
//! a unit of work halfway through.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    middleware::from_fn,
    response::IntoResponse,
    routing::{get, put},
    Extension, Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    auth::{auth_middleware, CallerIdentity},
    config::AuthConfig,
    error::LedgerError,
    ledger::Ledger,
};

mod accounts;
mod categories;
pub mod error;
mod reports;
mod transactions;

pub use error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<Ledger>,
    pub metrics: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self { ledger, metrics: None }
    }

    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

/// Runs a ledger call on the blocking pool.
pub(crate) async fn blocking<T, F>(state: &AppState, work: F) -> Result<T, ApiError>
where
    F: FnOnce(&Ledger) -> Result<T, LedgerError> + Send + 'static,
    T: Send + 'static,
{
    let ledger = state.ledger.clone();
    // keep the request's caller span on the blocking thread
    let span = tracing::Span::current();
    tokio::task::spawn_blocking(move || span.in_scope(|| work(&ledger)))
        .await
        .map_err(|e| LedgerError::Unexpected(format!("ledger task failed: {}", e)))?
        .map_err(ApiError::from)
}

pub(crate) fn message(text: &str) -> Json<serde_json::Value> {
    Json(json!({ "message": text }))
}

pub fn router(state: AppState, auth: Arc<AuthConfig>) -> Router {
    let api = Router::new()
        .route("/", get(welcome))
        .route("/akun", get(accounts::list).post(accounts::create))
        .route("/akun/total-saldo", get(accounts::total_balance))
        .route("/akun/audit", get(accounts::audit))
        .route(
            "/akun/:id",
            get(accounts::get).put(accounts::rename).delete(accounts::delete),
        )
        .route("/kategori", get(categories::list).post(categories::create))
        .route("/kategori/:id", put(categories::update).delete(categories::delete))
        .route("/transaksi", get(transactions::list).post(transactions::create))
        .route("/transaksi/akun/:id", get(transactions::list_for_account))
        .route("/transaksi/ringkasan/bulan-ini", get(reports::monthly_summary))
        .route(
            "/transaksi/laporan/pengeluaran-by-kategori",
            get(reports::expense_by_category),
        )
        .route(
            "/transaksi/:id",
            get(transactions::get).put(transactions::update).delete(transactions::delete),
        )
        .route("/laporan/saldo-awal", get(reports::opening_balance))
        .layer(from_fn(auth_middleware))
        .layer(Extension(auth));

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .merge(api)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn welcome(Extension(caller): Extension<CallerIdentity>) -> impl IntoResponse {
    Json(json!({
        "message": "Welcome to the dompet ledger API",
        "caller": caller.name,
        "role": caller.role.as_str(),
    }))
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "backend": state.ledger.storage().name(),
    }))
}

async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::NOT_FOUND, message("metrics are disabled")).into_response(),
    }
}
