use axum::{
    Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::metrics::{STORE_ERRORS, UNAUTHORIZED};
use crate::store::StoreError;

// Request-terminating failures; a duplicate submission is a success, not in here
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("rate limited, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },
    #[error("unauthorized")]
    Unauthorized,
    #[error("invalid email")]
    InvalidInput,
    #[error("no waitlist store configured")]
    Misconfigured,
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    pub ok: bool,
    pub message: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::InvalidInput => StatusCode::BAD_REQUEST,
            ApiError::Misconfigured | ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    // What the caller sees; never carries backend detail
    pub fn public_message(&self) -> &'static str {
        match self {
            ApiError::RateLimited { .. } => "Too many requests",
            ApiError::Unauthorized => "Unauthorized",
            ApiError::InvalidInput => "Invalid email",
            ApiError::Misconfigured => "Server misconfigured",
            ApiError::Store(_) => "Server error",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match &self {
            ApiError::Store(e) => {
                STORE_ERRORS.inc();
                tracing::error!(backend = e.backend(), error = %e, "Waitlist store operation failed");
            }
            ApiError::Unauthorized => UNAUTHORIZED.inc(),
            _ => {}
        }

        let retry_after = match &self {
            ApiError::RateLimited { retry_after_secs } => Some(*retry_after_secs),
            _ => None,
        };
        let body = Json(ErrorBody {
            ok: false,
            message: self.public_message(),
            retry_after,
        });

        let mut response = (self.status(), body).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, header::HeaderValue::from(secs));
        }
        response
    }
}
