use lazy_static::lazy_static;
use prometheus::{
    Histogram, IntCounter, IntCounterVec, IntGauge, register_histogram, register_int_counter,
    register_int_counter_vec, register_int_gauge,
};


lazy_static! {
    pub static ref REQUEST_TOTAL: IntCounterVec = register_int_counter_vec!(
        "waitlist_requests_total",
        "Total number of waitlist requests by operation",
        &["operation"]
    )
    .unwrap();
    pub static ref SIGNUPS: IntCounter =
        register_int_counter!("waitlist_signups_total", "New waitlist registrations").unwrap();
    pub static ref DUPLICATES: IntCounter =
        register_int_counter!("waitlist_duplicates_total", "Submissions for an already registered email").unwrap();
    pub static ref RATE_LIMITED: IntCounterVec = register_int_counter_vec!(
        "waitlist_rate_limited_total",
        "Requests denied by the rate limiter",
        &["scope"]
    )
    .unwrap();
    pub static ref UNAUTHORIZED: IntCounter =
        register_int_counter!("waitlist_unauthorized_total", "Rejected admin requests").unwrap();
    pub static ref STORE_ERRORS: IntCounter =
        register_int_counter!("waitlist_store_errors_total", "Failed store operations").unwrap();
    pub static ref STORE_LATENCY: Histogram = register_histogram!(
        "waitlist_store_latency_seconds",
        "Store call latency in seconds"
    )
    .unwrap();
    pub static ref RATE_LIMIT_KEYS: IntGauge =
        register_int_gauge!("waitlist_rate_limit_keys", "Current number of tracked rate limit keys").unwrap();
}
