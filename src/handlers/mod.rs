mod health;
mod metrics;
mod waitlist;

use axum::{
    Router,
    http::{HeaderValue, header},
    routing::get,
};
use std::sync::Arc;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub use health::health_handler;
pub use metrics::metrics_handler;
pub use waitlist::{
    DeleteResponse, EmailBody, ListResponse, SubmitResponse, delete_handler, export_handler,
    list_handler, submit_handler,
};

// Full HTTP surface; every waitlist response is marked uncacheable
pub fn router(state: Arc<AppState>) -> Router {
    let waitlist = Router::new()
        .route(
            "/api/waitlist",
            get(list_handler).post(submit_handler).delete(delete_handler),
        )
        .route("/api/waitlist/export", get(export_handler))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ));

    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .merge(waitlist)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
