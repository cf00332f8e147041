use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use dompet_core::{
    models::{parse_date_time, read::TransactionFilter, write::TransactionDraft},
    AccountId, CategoryId, TransactionId, TransactionView,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use time::{Date, PrimitiveDateTime};

use super::{blocking, categories::parse_kind, message, ApiError, AppState};
use crate::error::LedgerError;

/// Body of a create or full-replacement update.
#[derive(Debug, Deserialize)]
pub struct TransactionBody {
    #[serde(default, alias = "id_akun")]
    account_id: Option<AccountId>,
    #[serde(default, alias = "id_kategori")]
    category_id: Option<CategoryId>,
    #[serde(default, alias = "tanggal")]
    date: Option<String>,
    #[serde(default, alias = "keterangan")]
    description: Option<String>,
    #[serde(default, alias = "jumlah")]
    amount: Option<Decimal>,
    #[serde(default, alias = "tipe")]
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TransactionQuery {
    #[serde(default, alias = "from")]
    tanggal_mulai: Option<String>,
    #[serde(default, alias = "to")]
    tanggal_akhir: Option<String>,
    #[serde(default, alias = "category_ids")]
    id_kategori: Option<String>,
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|s| !s.is_empty())
}

pub(super) fn parse_timestamp(value: &str, field: &str) -> Result<PrimitiveDateTime, LedgerError> {
    parse_date_time(value).map_err(|e| LedgerError::validation(format!("{}: {}", field, e)))
}

fn parse_day(value: &Option<String>, field: &str) -> Result<Option<Date>, LedgerError> {
    present(value)
        .map(|s| parse_timestamp(s, field).map(|dt| dt.date()))
        .transpose()
}

/// Parses a comma-separated id list such as `1,2, 3`. Blank entries are
/// skipped.
fn parse_category_ids(value: &Option<String>) -> Result<Vec<CategoryId>, LedgerError> {
    let Some(list) = present(value) else {
        return Ok(Vec::new());
    };
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<CategoryId>()
                .map_err(|_| LedgerError::validation(format!("id_kategori: '{}' is not an integer", s)))
        })
        .collect()
}

impl TransactionQuery {
    fn into_filter(self, account_id: Option<AccountId>) -> Result<TransactionFilter, LedgerError> {
        Ok(TransactionFilter {
            account_id,
            from: parse_day(&self.tanggal_mulai, "tanggal_mulai")?,
            to: parse_day(&self.tanggal_akhir, "tanggal_akhir")?,
            category_ids: parse_category_ids(&self.id_kategori)?,
        })
    }
}

impl TransactionBody {
    fn into_draft(self) -> Result<TransactionDraft, LedgerError> {
        let account_id = self
            .account_id
            .ok_or_else(|| LedgerError::validation("account_id is required"))?;
        let amount = self
            .amount
            .ok_or_else(|| LedgerError::validation("amount is required"))?;
        let kind = present(&self.kind)
            .map(parse_kind)
            .transpose()?
            .ok_or_else(|| LedgerError::validation("kind is required"))?;
        let date = present(&self.date)
            .map(|s| parse_timestamp(s, "date"))
            .transpose()?
            .ok_or_else(|| LedgerError::validation("date is required"))?;
        let description = present(&self.description).map(str::to_string);

        Ok(TransactionDraft {
            account_id,
            category_id: self.category_id,
            date,
            description,
            amount,
            kind,
        })
    }
}

pub async fn list(
    State(state): State<AppState>,
    query: Result<Query<TransactionQuery>, QueryRejection>,
) -> Result<Json<Vec<TransactionView>>, ApiError> {
    let Query(query) = query?;
    let filter = query.into_filter(None)?;
    let transactions = blocking(&state, move |ledger| ledger.list_transactions(&filter)).await?;
    Ok(Json(transactions))
}

pub async fn list_for_account(
    State(state): State<AppState>,
    account_id: Result<Path<AccountId>, PathRejection>,
    query: Result<Query<TransactionQuery>, QueryRejection>,
) -> Result<Json<Vec<TransactionView>>, ApiError> {
    let Path(account_id) = account_id?;
    let Query(query) = query?;
    let filter = query.into_filter(Some(account_id))?;
    let transactions = blocking(&state, move |ledger| ledger.list_transactions(&filter)).await?;
    Ok(Json(transactions))
}

pub async fn get(
    State(state): State<AppState>,
    id: Result<Path<TransactionId>, PathRejection>,
) -> Result<Json<TransactionView>, ApiError> {
    let Path(id) = id?;
    let transaction = blocking(&state, move |ledger| ledger.get_transaction(id)).await?;
    Ok(Json(transaction))
}

pub async fn create(
    State(state): State<AppState>,
    body: Result<Json<TransactionBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(body) = body?;
    let draft = body.into_draft()?;
    let id = blocking(&state, move |ledger| ledger.create_transaction(&draft)).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "transaction created", "id": id })),
    ))
}

pub async fn update(
    State(state): State<AppState>,
    id: Result<Path<TransactionId>, PathRejection>,
    body: Result<Json<TransactionBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Path(id) = id?;
    let Json(body) = body?;
    let draft = body.into_draft()?;
    blocking(&state, move |ledger| ledger.update_transaction(id, &draft)).await?;
    Ok(message("transaction updated"))
}

pub async fn delete(
    State(state): State<AppState>,
    id: Result<Path<TransactionId>, PathRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Path(id) = id?;
    blocking(&state, move |ledger| ledger.delete_transaction(id)).await?;
    Ok(message("transaction deleted"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use time::macros::{date, datetime};

    fn body(json: serde_json::Value) -> TransactionBody {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_body_accepts_original_field_names() {
        let draft = body(json!({
            "id_akun": 3,
            "id_kategori": 4,
            "tanggal": "2024-04-01 10:30:00",
            "keterangan": "  lunch ",
            "jumlah": 25000,
            "tipe": "pengeluaran",
        }))
        .into_draft()
        .unwrap();

        assert_eq!(draft.account_id, 3);
        assert_eq!(draft.category_id, Some(4));
        assert_eq!(draft.date, datetime!(2024-04-01 10:30));
        assert_eq!(draft.description.as_deref(), Some("lunch"));
        assert_eq!(draft.amount, dec!(25000));
        assert_eq!(draft.delta(), dec!(-25000));
    }

    #[test]
    fn test_body_requires_fields() {
        let err = body(json!({ "amount": "5", "kind": "income", "date": "2024-01-01" }))
            .into_draft()
            .unwrap_err();
        assert_eq!(err.to_string(), "account_id is required");

        let err = body(json!({ "account_id": 1, "amount": "5", "kind": "transfer", "date": "2024-01-01" }))
            .into_draft()
            .unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));

        let err = body(json!({ "account_id": 1, "amount": "5", "kind": "income", "date": "yesterday" }))
            .into_draft()
            .unwrap_err();
        assert!(err.to_string().starts_with("date:"));
    }

    #[test]
    fn test_query_into_filter() {
        let query = TransactionQuery {
            tanggal_mulai: Some("2024-01-01".to_string()),
            tanggal_akhir: Some("".to_string()),
            id_kategori: Some("1, 2,,3".to_string()),
        };
        let filter = query.into_filter(Some(9)).unwrap();
        assert_eq!(filter.account_id, Some(9));
        assert_eq!(filter.from, Some(date!(2024-01-01)));
        assert_eq!(filter.to, None);
        assert_eq!(filter.category_ids, vec![1, 2, 3]);

        let bad = TransactionQuery {
            tanggal_mulai: None,
            tanggal_akhir: None,
            id_kategori: Some("1,x".to_string()),
        };
        assert!(matches!(bad.into_filter(None), Err(LedgerError::Validation(_))));
    }
}
