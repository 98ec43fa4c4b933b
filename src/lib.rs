pub mod auth;
pub mod clock;
pub mod config;
pub mod email;
pub mod error;
pub mod export;
pub mod handlers;
pub mod metrics;
pub mod rate_limit;
pub mod state;
pub mod store;

pub use config::Args;
pub use handlers::router;
pub use state::AppState;
