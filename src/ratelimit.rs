//! Per-session request-rate limiting.
//!
//! A fixed window per session: the first request opens the window, later
//! requests increment the counter, and a request arriving after the window
//! has elapsed resets it.  The reset-or-increment happens under the map's
//! entry lock, so two concurrent requests for one session cannot both open
//! a fresh window.

use dashmap::DashMap;
use std::time::{Duration, Instant};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

#[derive(Debug)]
struct RateState {
    window_start: Instant,
    count: u32,
}

pub struct RateLimiter {
    limit: u32,
    window: Duration,
    states: DashMap<String, RateState>,
}

impl RateLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            states: DashMap::new(),
        }
    }

    /// Admit or deny one request for `session`.  State is created lazily on
    /// the first request.  Denial advances nothing beyond the counter.
    pub fn admit(&self, session: &str) -> Decision {
        let now = Instant::now();
        let mut state = self
            .states
            .entry(session.to_string())
            .or_insert_with(|| RateState {
                window_start: now,
                count: 0,
            });
        if now.duration_since(state.window_start) > self.window {
            state.window_start = now;
            state.count = 1;
            return Decision::Allow;
        }
        state.count += 1;
        if state.count > self.limit {
            Decision::Deny
        } else {
            Decision::Allow
        }
    }
}
