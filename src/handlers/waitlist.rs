use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::{HeaderMap, header},
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

use crate::auth::client_identity;
use crate::email::EmailAddress;
use crate::error::ApiError;
use crate::export::to_csv;
use crate::metrics::{DUPLICATES, RATE_LIMITED, REQUEST_TOTAL, SIGNUPS, STORE_LATENCY};
use crate::rate_limit::RateScope;
use crate::state::AppState;
use crate::store::{WaitlistEntry, WaitlistStore};

pub const EXPORT_FILENAME: &str = "waitlist.csv";

#[derive(Debug, Deserialize)]
pub struct EmailBody {
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub ok: bool,
    pub duplicate: bool,
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub ok: bool,
    pub entries: Vec<WaitlistEntry>,
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub ok: bool,
    pub removed: u32,
}

// Rate limit check for this caller within one scope
fn check_rate_limit(state: &AppState, scope: RateScope, headers: &HeaderMap) -> Result<(), ApiError> {
    let identity = client_identity(headers);
    let config = match scope {
        RateScope::Public => &state.public_rate,
        RateScope::Admin => &state.admin_rate,
    };

    let decision = state.limiter.check_scoped(scope, &identity, config);
    if decision.allowed {
        return Ok(());
    }

    RATE_LIMITED.with_label_values(&[scope.as_str()]).inc();
    tracing::info!(
        %scope,
        identity = %identity,
        retry_after_secs = decision.retry_after_secs,
        "Request rate limited"
    );
    Err(ApiError::RateLimited {
        retry_after_secs: decision.retry_after_secs,
    })
}

fn configured_store(state: &AppState) -> Result<Arc<dyn WaitlistStore>, ApiError> {
    state.store.clone().ok_or(ApiError::Misconfigured)
}

// Credential is checked before the store so unauthorized callers learn nothing about the backend
fn admin_gate(state: &AppState, headers: &HeaderMap) -> Result<Arc<dyn WaitlistStore>, ApiError> {
    check_rate_limit(state, RateScope::Admin, headers)?;
    if !state.authorizer.is_authorized(headers) {
        return Err(ApiError::Unauthorized);
    }
    configured_store(state)
}

// Decoded whatever the Content-Type says; unreadable JSON counts as an invalid address
fn parse_email(body: &[u8]) -> Result<EmailAddress, ApiError> {
    let body: EmailBody = serde_json::from_slice(body).map_err(|e| {
        tracing::debug!(error = %e, "Unreadable request body");
        ApiError::InvalidInput
    })?;
    EmailAddress::parse(body.email.as_deref().unwrap_or_default()).map_err(|e| {
        tracing::debug!(error = %e, "Rejected email");
        ApiError::InvalidInput
    })
}

async fn list_entries(store: &dyn WaitlistStore) -> Result<Vec<WaitlistEntry>, ApiError> {
    let start = Instant::now();
    let entries = store.list().await?;
    STORE_LATENCY.observe(start.elapsed().as_secs_f64());
    Ok(entries)
}

// POST /api/waitlist
pub async fn submit_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<SubmitResponse>, ApiError> {
    REQUEST_TOTAL.with_label_values(&["submit"]).inc();

    check_rate_limit(&state, RateScope::Public, &headers)?;
    let store = configured_store(&state)?;
    let email = parse_email(&body)?;

    let start = Instant::now();
    let outcome = store.create(&email).await?;
    STORE_LATENCY.observe(start.elapsed().as_secs_f64());

    if outcome.created {
        SIGNUPS.inc();
        tracing::info!(email_hash = %email.fingerprint(), backend = store.backend(), "New waitlist signup");
    } else {
        DUPLICATES.inc();
        tracing::debug!(email_hash = %email.fingerprint(), "Duplicate waitlist signup");
    }

    Ok(Json(SubmitResponse {
        ok: true,
        duplicate: !outcome.created,
    }))
}

// GET /api/waitlist
pub async fn list_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<ListResponse>, ApiError> {
    REQUEST_TOTAL.with_label_values(&["list"]).inc();

    let store = admin_gate(&state, &headers)?;
    let entries = list_entries(store.as_ref()).await?;

    Ok(Json(ListResponse { ok: true, entries }))
}

// GET /api/waitlist/export
pub async fn export_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    REQUEST_TOTAL.with_label_values(&["export"]).inc();

    let store = admin_gate(&state, &headers)?;
    let entries = list_entries(store.as_ref()).await?;
    tracing::info!(rows = entries.len(), "Waitlist exported");

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", EXPORT_FILENAME),
            ),
        ],
        to_csv(&entries),
    ))
}

// DELETE /api/waitlist
pub async fn delete_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<DeleteResponse>, ApiError> {
    REQUEST_TOTAL.with_label_values(&["delete"]).inc();

    let store = admin_gate(&state, &headers)?;
    let email = parse_email(&body)?;

    let start = Instant::now();
    let outcome = store.delete(&email).await?;
    STORE_LATENCY.observe(start.elapsed().as_secs_f64());

    tracing::info!(email_hash = %email.fingerprint(), removed = outcome.removed, "Waitlist entry deleted");

    Ok(Json(DeleteResponse {
        ok: true,
        removed: outcome.removed,
    }))
}
