use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use dompet_core::{Category, CategoryId, Kind};
use serde::Deserialize;
use serde_json::json;

use super::{blocking, ApiError, AppState};
use crate::error::LedgerError;

#[derive(Debug, Deserialize)]
pub struct CategoryBody {
    #[serde(default, alias = "nama_kategori")]
    name: Option<String>,
    #[serde(default, rename = "tipe", alias = "kind")]
    kind: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CategoryQuery {
    #[serde(default, rename = "tipe", alias = "kind")]
    kind: Option<String>,
}

pub(super) fn parse_kind(value: &str) -> Result<Kind, LedgerError> {
    value
        .parse::<Kind>()
        .map_err(|e| LedgerError::validation(e.to_string()))
}

impl CategoryBody {
    fn into_parts(self) -> Result<(String, Kind), LedgerError> {
        let kind = match self.kind.as_deref().map(str::trim) {
            None | Some("") => return Err(LedgerError::validation("tipe is required")),
            Some(kind) => parse_kind(kind)?,
        };
        Ok((self.name.unwrap_or_default(), kind))
    }
}

pub async fn list(
    State(state): State<AppState>,
    query: Result<Query<CategoryQuery>, QueryRejection>,
) -> Result<Json<Vec<Category>>, ApiError> {
    let Query(query) = query?;
    let kind = match query.kind.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(kind) => Some(parse_kind(kind)?),
    };
    let categories = blocking(&state, move |ledger| ledger.list_categories(kind)).await?;
    Ok(Json(categories))
}

pub async fn create(
    State(state): State<AppState>,
    body: Result<Json<CategoryBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(body) = body?;
    let (name, kind) = body.into_parts()?;
    let id = blocking(&state, move |ledger| ledger.create_category(&name, kind)).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "category created", "id": id })),
    ))
}

pub async fn update(
    State(state): State<AppState>,
    id: Result<Path<CategoryId>, PathRejection>,
    body: Result<Json<CategoryBody>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Path(id) = id?;
    let Json(body) = body?;
    let (name, kind) = body.into_parts()?;
    blocking(&state, move |ledger| ledger.update_category(id, &name, kind)).await?;
    Ok(super::message("category updated"))
}

/// Referencing transactions survive with their category cleared.
pub async fn delete(
    State(state): State<AppState>,
    id: Result<Path<CategoryId>, PathRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Path(id) = id?;
    let detached = blocking(&state, move |ledger| ledger.delete_category(id)).await?;
    Ok(Json(json!({
        "message": "category deleted",
        "detached_transactions": detached,
    })))
}
