use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;

use crate::clock::{Clock, SystemClock};
use crate::metrics::RATE_LIMIT_KEYS;

// Rate limit entry - tracks requests per scope + identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateState {
    pub count: u32,
    pub reset_at: u64, // epoch millis
}

impl RateState {
    fn fresh(now: u64, window_ms: u64) -> Self {
        Self {
            count: 1,
            reset_at: now.saturating_add(window_ms),
        }
    }
}

// Budget for one scope
#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub window: Duration,
    pub max: u32,
}

impl RateLimitConfig {
    pub fn new(max: u32, window: Duration) -> Self {
        Self { window, max }
    }

    pub fn window_ms(&self) -> u64 {
        self.window.as_millis().min(u64::MAX as u128) as u64
    }
}

// Operation categories with independent budgets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateScope {
    Public,
    Admin,
}

impl RateScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateScope::Public => "public",
            RateScope::Admin => "admin",
        }
    }
}

impl std::fmt::Display for RateScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_at: u64,
    pub retry_after_secs: u64,
}

impl RateDecision {
    // The request that opens a window is always let through
    fn opened(state: RateState, max: u32) -> Self {
        Self {
            allowed: true,
            remaining: max.saturating_sub(state.count),
            reset_at: state.reset_at,
            retry_after_secs: 0,
        }
    }
}

// Fixed-window counter keyed by "{scope}:{identity}"; the shard guard is held across each read-modify-write
pub struct RateLimiter {
    state: DashMap<String, RateState>,
    clock: Arc<dyn Clock>,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: DashMap::new(),
            clock,
        }
    }

    pub fn check(&self, key: &str, window_ms: u64, max: u32) -> RateDecision {
        let now = self.clock.now_millis();

        let state = match self.state.entry(key.to_string()) {
            Entry::Vacant(slot) => {
                let state = RateState::fresh(now, window_ms);
                slot.insert(state);
                RATE_LIMIT_KEYS.inc();
                return RateDecision::opened(state, max);
            }
            Entry::Occupied(mut slot) => {
                let state = slot.get_mut();
                // window expired..? start a new one
                if now > state.reset_at {
                    *state = RateState::fresh(now, window_ms);
                    return RateDecision::opened(*state, max);
                }
                state.count = state.count.saturating_add(1);
                *state
            }
        };

        let allowed = state.count <= max;
        RateDecision {
            allowed,
            remaining: max.saturating_sub(state.count),
            reset_at: state.reset_at,
            retry_after_secs: if allowed {
                0
            } else {
                state.reset_at.saturating_sub(now).div_ceil(1000)
            },
        }
    }

    pub fn check_scoped(
        &self,
        scope: RateScope,
        identity: &str,
        config: &RateLimitConfig,
    ) -> RateDecision {
        let key = format!("{}:{}", scope, identity);
        self.check(&key, config.window_ms(), config.max)
    }

    // Drop every key whose window has already closed
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let mut removed = 0;
        self.state.retain(|_, state| {
            let live = now <= state.reset_at;
            if !live {
                removed += 1;
            }
            live
        });
        RATE_LIMIT_KEYS.sub(removed as i64);
        removed
    }

    pub fn len(&self) -> usize {
        self.state.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.is_empty()
    }
}

// Periodic sweep of expired windows, only spawned when configured
pub async fn sweep_expired(limiter: Arc<RateLimiter>, every: Duration) {
    let mut ticker = interval(every);

    tracing::info!(interval = ?every, "Rate limit sweeper started");

    loop {
        ticker.tick().await;
        let removed = limiter.purge_expired();
        if removed > 0 {
            tracing::debug!(removed, remaining = limiter.len(), "Purged expired rate limit windows");
        }
    }
}
