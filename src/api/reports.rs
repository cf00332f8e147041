use axum::{
    extract::{rejection::QueryRejection, Query, State},
    response::IntoResponse,
    Json,
};
use dompet_core::{
    models::read::{CategoryTotal, PeriodSummary},
    AccountId,
};
use serde::Deserialize;
use serde_json::json;
use time::OffsetDateTime;

use super::{blocking, transactions::parse_timestamp, ApiError, AppState};
use crate::error::LedgerError;

#[derive(Debug, Deserialize)]
pub struct OpeningBalanceQuery {
    #[serde(default, rename = "akunId", alias = "account_id")]
    account_id: Option<AccountId>,
    #[serde(default, alias = "date")]
    tanggal: Option<String>,
}

pub async fn monthly_summary(State(state): State<AppState>) -> Result<Json<PeriodSummary>, ApiError> {
    let today = OffsetDateTime::now_utc().date();
    let summary = blocking(&state, move |ledger| ledger.monthly_summary(today)).await?;
    Ok(Json(summary))
}

pub async fn expense_by_category(State(state): State<AppState>) -> Result<Json<Vec<CategoryTotal>>, ApiError> {
    let today = OffsetDateTime::now_utc().date();
    let totals = blocking(&state, move |ledger| ledger.expense_by_category(today)).await?;
    Ok(Json(totals))
}

pub async fn opening_balance(
    State(state): State<AppState>,
    query: Result<Query<OpeningBalanceQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(query) = query?;
    let (Some(account_id), Some(tanggal)) = (query.account_id, query.tanggal.as_deref().map(str::trim)) else {
        return Err(LedgerError::validation("akunId and tanggal are required").into());
    };
    let at = parse_timestamp(tanggal, "tanggal")?;
    let balance = blocking(&state, move |ledger| ledger.opening_balance_at(account_id, at)).await?;
    Ok(Json(json!({ "opening_balance_at_date": balance })))
}
