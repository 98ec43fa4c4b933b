use clap::Parser; // for cli
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use waitlist_gateway::{
    AppState, Args,
    auth::AdminAuthorizer,
    rate_limit::{RateLimiter, sweep_expired},
    router,
    store::select_store,
};

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("waitlist_gateway=info,tower_http=info"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

// this is main async function with tokio
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // parse cli arguments
    let args = Args::parse();
    init_tracing(args.log_json);

    let authorizer = AdminAuthorizer::new(args.admin_secret());
    if !authorizer.is_configured() {
        tracing::warn!("ADMIN_ACCESS_CODE is not set, admin endpoints will reject every request");
    }

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;

    let limiter = Arc::new(RateLimiter::new());
    if args.rate_sweep_secs > 0 {
        let sweeper = Arc::clone(&limiter);
        let every = Duration::from_secs(args.rate_sweep_secs);
        tokio::spawn(async move {
            sweep_expired(sweeper, every).await;
        });
    }

    // creating shared state
    let state = Arc::new(AppState {
        limiter,
        public_rate: args.public_rate(),
        admin_rate: args.admin_rate(),
        authorizer,
        store: select_store(&args, client),
    });

    let app = router(state);

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!(%addr, "Waitlist gateway listening");
    tracing::info!(
        public_limit = args.public_rate_limit,
        public_window_secs = args.public_rate_window,
        admin_limit = args.admin_rate_limit,
        admin_window_secs = args.admin_rate_window,
        "Rate limits configured"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
