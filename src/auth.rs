use std::sync::Arc;

use axum::{
    http::{header, Method, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde_json::json;
use subtle::ConstantTimeEq;
use tracing::Instrument;

use crate::config::{AuthConfig, Role};

/// Authenticated caller identity, available to handlers via request extensions.
/// Requests also run inside a `caller` span, so ledger logs name who wrote.
#[derive(Debug, Clone)]
pub struct CallerIdentity {
    pub name: String,
    pub role: Role,
}

fn reject(status: StatusCode, error: &str, message: &str) -> Response {
    (status, Json(json!({ "message": message, "error": error }))).into_response()
}

fn is_read_only(method: &Method) -> bool {
    *method == Method::GET || *method == Method::HEAD || *method == Method::OPTIONS
}

pub async fn auth_middleware<B>(
    Extension(config): Extension<Arc<AuthConfig>>,
    req: Request<B>,
    next: Next<B>,
) -> Response {
    if !config.enabled {
        return run_as(
            CallerIdentity {
                name: "anonymous".to_string(),
                role: Role::Admin,
            },
            req,
            next,
        )
        .await;
    }

    let api_key = req
        .headers()
        .get("X-API-Key")
        .or_else(|| req.headers().get(header::AUTHORIZATION))
        .and_then(|v| v.to_str().ok())
        .map(|s| s.strip_prefix("Bearer ").unwrap_or(s));

    let Some(key) = api_key else {
        return reject(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "Missing API key. Provide X-API-Key header or Authorization: Bearer <key>",
        );
    };

    let Some(entry) = config
        .api_keys
        .iter()
        .find(|entry| entry.key.as_bytes().ct_eq(key.as_bytes()).into())
    else {
        tracing::warn!("Invalid API key presented");
        return reject(StatusCode::UNAUTHORIZED, "unauthorized", "Invalid API key");
    };

    if !is_read_only(req.method()) && !entry.role.can_write() {
        tracing::warn!(caller = %entry.name, method = %req.method(), "Write attempted with read-only key");
        return reject(StatusCode::FORBIDDEN, "forbidden", "This API key is read-only");
    }

    tracing::debug!(caller = %entry.name, role = entry.role.as_str(), "Authenticated request");
    let identity = CallerIdentity {
        name: entry.name.clone(),
        role: entry.role,
    };
    run_as(identity, req, next).await
}

async fn run_as<B>(identity: CallerIdentity, mut req: Request<B>, next: Next<B>) -> Response {
    let span = tracing::info_span!("caller", name = %identity.name, role = identity.role.as_str());
    req.extensions_mut().insert(identity);
    next.run(req).instrument(span).await
}
