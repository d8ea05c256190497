//! Fixed-window request rate limiting.
//!
//! Each identifier (client IP, phone number, ...) gets a window created on
//! its first request. Within the window up to `limit` requests are admitted;
//! later ones are denied without touching the counter. Once `now >= reset_at`
//! the next request opens a fresh window.
//!
//! The admit decision and the increment happen under the `DashMap` shard
//! lock for that identifier, so concurrent requests can never push the
//! admitted count past `limit`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use tokio::time::Instant;

use crate::config::RateLimitConfig;

/// Counter for one identifier's current window.
#[derive(Debug, Clone)]
pub struct RateLimitWindow {
    pub count: u32,
    pub reset_at: Instant,
}

impl RateLimitWindow {
    fn open(now: Instant, window: Duration) -> Self {
        Self {
            count: 1,
            reset_at: now + window,
        }
    }

    fn is_elapsed(&self, now: Instant) -> bool {
        now >= self.reset_at
    }
}

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed {
        /// Requests still admissible in this window.
        remaining: u32,
    },
    Denied {
        /// Time until the window resets.
        retry_after: Duration,
    },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimiterStats {
    pub active_windows: usize,
    pub limit: u32,
    pub window_ms: u64,
    pub denied_total: u64,
}

/// Per-identifier fixed-window limiter.
#[derive(Debug)]
pub struct RateLimiter {
    windows: DashMap<String, RateLimitWindow>,
    limit: u32,
    window: Duration,
    denied: AtomicU64,
}

impl RateLimiter {
    /// Create a limiter whose [`check_default`](Self::check_default) admits
    /// `limit` requests per `window`.
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            windows: DashMap::new(),
            limit,
            window,
            denied: AtomicU64::new(0),
        }
    }

    pub fn from_config(cfg: &RateLimitConfig) -> Self {
        Self::new(cfg.limit, cfg.window())
    }

    /// Check against the limiter's configured limit and window.
    pub fn check_default(&self, identifier: &str) -> Decision {
        self.check(identifier, self.limit, self.window)
    }

    /// Admit or deny one request from `identifier`.
    pub fn check(&self, identifier: &str, limit: u32, window: Duration) -> Decision {
        let now = Instant::now();

        let decision = match self.windows.entry(identifier.to_string()) {
            Entry::Vacant(slot) => {
                slot.insert(RateLimitWindow::open(now, window));
                Decision::Allowed {
                    remaining: limit.saturating_sub(1),
                }
            }
            Entry::Occupied(mut slot) => {
                let current = slot.get_mut();
                if current.is_elapsed(now) {
                    *current = RateLimitWindow::open(now, window);
                    Decision::Allowed {
                        remaining: limit.saturating_sub(1),
                    }
                } else if current.count < limit {
                    current.count += 1;
                    Decision::Allowed {
                        remaining: limit - current.count,
                    }
                } else {
                    Decision::Denied {
                        retry_after: current.reset_at.saturating_duration_since(now),
                    }
                }
            }
        };

        if let Decision::Denied { retry_after } = decision {
            self.denied.fetch_add(1, Ordering::Relaxed);
            crate::metrics::record_rate_limit_denied();
            tracing::debug!(
                identifier = %identifier,
                retry_after_ms = retry_after.as_millis() as u64,
                "rate limit exceeded"
            );
        }
        decision
    }

    /// Forget `identifier`'s window so its next request starts fresh.
    pub fn reset(&self, identifier: &str) -> bool {
        self.windows.remove(identifier).is_some()
    }

    /// Remove windows whose reset time has passed. Returns how many were
    /// removed.
    pub fn cleanup(&self) -> usize {
        let now = Instant::now();
        let before = self.windows.len();
        self.windows.retain(|_, window| !window.is_elapsed(now));
        let removed = before.saturating_sub(self.windows.len());
        if removed > 0 {
            tracing::debug!(removed, "rate limit windows swept");
        }
        removed
    }

    pub fn stats(&self) -> RateLimiterStats {
        RateLimiterStats {
            active_windows: self.windows.len(),
            limit: self.limit,
            window_ms: self.window.as_millis() as u64,
            denied_total: self.denied.load(Ordering::Relaxed),
        }
    }
}
