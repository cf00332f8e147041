use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        Path, State,
    },
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use dompet_core::{models::read::BalanceDiscrepancy, Account, AccountId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{blocking, message, ApiError, AppState};

#[derive(Debug, Deserialize)]
pub struct AccountBody {
    #[serde(default, alias = "nama_akun")]
    name: Option<String>,
    #[serde(default, alias = "saldo_awal")]
    opening_balance: Option<Decimal>,
}

#[derive(Debug, Serialize)]
pub struct AuditReport {
    consistent: bool,
    discrepancies: Vec<BalanceDiscrepancy>,
}

pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<Account>>, ApiError> {
    let accounts = blocking(&state, |ledger| ledger.list_accounts()).await?;
    Ok(Json(accounts))
}

pub async fn get(
    State(state): State<AppState>,
    id: Result<Path<AccountId>, PathRejection>,
) -> Result<Json<Account>, ApiError> {
    let Path(id) = id?;
    let account = blocking(&state, move |ledger| ledger.get_account(id)).await?;
    Ok(Json(account))
}

pub async fn create(
    State(state): State<AppState>,
    body: Result<Json<AccountBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(body) = body?;
    let name = body.name.unwrap_or_default();
    let id = blocking(&state, move |ledger| ledger.create_account(&name, body.opening_balance)).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "account created", "id": id })),
    ))
}

/// Only the name can change; balances are owned by the ledger.
pub async fn rename(
    State(state): State<AppState>,
    id: Result<Path<AccountId>, PathRejection>,
    body: Result<Json<AccountBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Path(id) = id?;
    let Json(body) = body?;
    let name = body.name.unwrap_or_default();
    blocking(&state, move |ledger| ledger.rename_account(id, &name)).await?;
    Ok(message("account renamed"))
}

pub async fn delete(
    State(state): State<AppState>,
    id: Result<Path<AccountId>, PathRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Path(id) = id?;
    blocking(&state, move |ledger| ledger.delete_account(id)).await?;
    Ok(message("account deleted"))
}

pub async fn total_balance(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let total = blocking(&state, |ledger| ledger.total_balance()).await?;
    Ok(Json(json!({ "total_saldo": total })))
}

pub async fn audit(State(state): State<AppState>) -> Result<Json<AuditReport>, ApiError> {
    let discrepancies = blocking(&state, |ledger| ledger.verify_balances()).await?;
    Ok(Json(AuditReport {
        consistent: discrepancies.is_empty(),
        discrepancies,
    }))
}
