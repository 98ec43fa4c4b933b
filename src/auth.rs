use axum::http::HeaderMap;
use subtle::ConstantTimeEq;

use crate::email::fingerprint;

pub const ADMIN_HEADER: &str = "x-admin-code";
pub const UNKNOWN_CLIENT: &str = "unknown";

// Proxy headers checked in order when resolving a caller
const IDENTITY_HEADERS: [&str; 3] = ["x-forwarded-for", "x-real-ip", "cf-connecting-ip"];

// Admin gate; no configured secret means every request is rejected
#[derive(Clone)]
pub struct AdminAuthorizer {
    secret: Option<String>,
}

impl std::fmt::Debug for AdminAuthorizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminAuthorizer")
            .field("configured", &self.is_configured())
            .finish()
    }
}

impl AdminAuthorizer {
    pub fn new(secret: Option<String>) -> Self {
        Self {
            secret: secret.filter(|s| !s.is_empty()),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.secret.is_some()
    }

    pub fn is_authorized(&self, headers: &HeaderMap) -> bool {
        let Some(secret) = self.secret.as_deref() else {
            tracing::error!("Admin access code is not configured, rejecting admin request");
            return false;
        };

        let provided = headers
            .get(ADMIN_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();

        let ok = constant_time_eq(provided, secret);
        if !ok && !provided.is_empty() {
            tracing::warn!(code_hash = %fingerprint(provided), "Invalid admin code provided");
        }
        ok
    }
}

// Length is allowed to leak; content is compared without early exit
fn constant_time_eq(provided: &str, secret: &str) -> bool {
    if provided.is_empty() || provided.len() != secret.len() {
        return false;
    }
    provided.as_bytes().ct_eq(secret.as_bytes()).into()
}

// Best-effort caller identity for rate-limit keys, "unknown" when nothing is set
pub fn client_identity(headers: &HeaderMap) -> String {
    IDENTITY_HEADERS
        .iter()
        .filter_map(|name| headers.get(*name).and_then(|v| v.to_str().ok()))
        .map(|value| value.split(',').next().unwrap_or_default().trim())
        .find(|value| !value.is_empty())
        .unwrap_or(UNKNOWN_CLIENT)
        .to_string()
}
