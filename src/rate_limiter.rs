//! Per-client sliding-window rate limiting.
//!
//! Windows live in process memory, so limits only hold for a single relay
//! process; a multi-instance deployment needs a shared counter store.
//!
//! The number of tracked clients is capped. When the map is full and stale
//! windows cannot be pruned, attempts from new clients are denied.

use dashmap::DashMap;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Default cap on distinct client keys held at once
pub const DEFAULT_MAX_TRACKED_KEYS: usize = 100_000;

#[derive(Debug)]
pub struct RateLimiter {
    /// Attempt instants per client key, oldest first
    windows: DashMap<String, VecDeque<Instant>>,
    max_tracked_keys: usize,
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::with_max_tracked_keys(DEFAULT_MAX_TRACKED_KEYS)
    }

    pub fn with_max_tracked_keys(max_tracked_keys: usize) -> Self {
        Self {
            windows: DashMap::new(),
            max_tracked_keys: max_tracked_keys.max(1),
        }
    }

    /// Record an attempt for `client_key` unless it already made `limit`
    /// attempts within the trailing `window`.
    pub fn allow(&self, client_key: &str, limit: usize, window: Duration) -> bool {
        self.allow_at(client_key, limit, window, Instant::now())
    }

    pub fn allow_at(&self, client_key: &str, limit: usize, window: Duration, now: Instant) -> bool {
        // Concurrent first attempts from new clients may overshoot the cap by
        // a few entries; the next full check prunes or denies.
        if !self.windows.contains_key(client_key) && self.tracked_keys() >= self.max_tracked_keys {
            self.prune_at(window, now);

            if self.tracked_keys() >= self.max_tracked_keys {
                warn!(
                    client = %client_key,
                    max_tracked_keys = self.max_tracked_keys,
                    "Rate limiter is full; denying new client"
                );
                return false;
            }
        }

        // The entry guard holds the shard lock for the whole check-and-record
        let mut attempts = self.windows.entry(client_key.to_string()).or_default();

        prune_window(&mut attempts, window, now);

        if attempts.len() >= limit {
            debug!(client = %client_key, attempts = attempts.len(), "Rate limit exceeded");
            return false;
        }

        attempts.push_back(now);
        true
    }

    /// Drop expired attempts and forget clients with none left
    pub fn prune(&self, window: Duration) {
        self.prune_at(window, Instant::now());
    }

    pub fn prune_at(&self, window: Duration, now: Instant) {
        let before = self.tracked_keys();
        self.windows.retain(|_, attempts| {
            prune_window(attempts, window, now);
            !attempts.is_empty()
        });

        let remaining = self.tracked_keys();
        let removed = before.saturating_sub(remaining);
        if removed > 0 {
            debug!(removed, remaining, "Pruned idle rate limit windows");
        }
    }

    /// Number of client keys currently tracked
    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }
}

fn prune_window(attempts: &mut VecDeque<Instant>, window: Duration, now: Instant) {
    // Nothing is old enough to expire until the clock has run a full window
    let Some(window_start) = now.checked_sub(window) else {
        return;
    };

    while attempts.front().is_some_and(|&t| t <= window_start) {
        attempts.pop_front();
    }
}
