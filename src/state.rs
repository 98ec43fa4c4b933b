use std::sync::Arc;
use crate::auth::AdminAuthorizer;
use crate::rate_limit::{RateLimitConfig, RateLimiter};
use crate::store::WaitlistStore;
// app's shared state

pub struct AppState {
    pub limiter: Arc<RateLimiter>,
    pub public_rate: RateLimitConfig, // budget for anonymous submissions
    pub admin_rate: RateLimitConfig,  // budget for operator endpoints
    pub authorizer: AdminAuthorizer,
    pub store: Option<Arc<dyn WaitlistStore>>, // None when no backend is configured
}
