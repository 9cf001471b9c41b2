//
// Copyright (C) 2025 Pedro Henrique / phkaiser13
//
// File: src/agent/rate_limiter.rs
//
// Per-LabelHash apply rate limiter: a process-wide map of token-bucket
// rate limiters. A `DashMap` registry grows lazily as
// new object sets are seen and shrinks on explicit `remove`, the same shape
// as the polling scheduler's job table.
//
// SPDX-License-Identifier: Apache-2.0
//

use dashmap::DashMap;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter as GovernorRateLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};

type DirectRateLimiter = GovernorRateLimiter<NotKeyed, InMemoryState, DefaultClock>;

pub struct ApplyRateLimiter {
    default_qps: NonZeroU32,
    burst: NonZeroU32,
    limiters: DashMap<String, Arc<DirectRateLimiter>>,
}

impl ApplyRateLimiter {
    /// `burst` defaults to 10.
    pub fn new(default_qps: u32, burst: u32) -> Self {
        Self {
            default_qps: NonZeroU32::new(default_qps.max(1)).unwrap(),
            burst: NonZeroU32::new(burst.max(1)).unwrap(),
            limiters: DashMap::new(),
        }
    }

    fn limiter_for(&self, key: &str) -> Arc<DirectRateLimiter> {
        self.limiters
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(GovernorRateLimiter::direct(Quota::per_second(self.default_qps).allow_burst(self.burst))))
            .clone()
    }

    /// Block until a token is available for `key`. Waits above 1s are
    /// logged.
    pub async fn acquire(&self, key: &str) {
        let limiter = self.limiter_for(key);
        let start = Instant::now();
        limiter.until_ready().await;
        let waited = start.elapsed();
        if waited > Duration::from_secs(1) {
            tracing::warn!(label_hash = key, waited_ms = waited.as_millis() as u64, "apply rate limiter throttled request");
        }
    }

    pub fn remove(&self, key: &str) {
        self.limiters.remove(key);
    }

    pub fn len(&self) -> usize {
        self.limiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limiters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_grows_the_registry_once_per_key() {
        let limiter = ApplyRateLimiter::new(100, 10);
        limiter.acquire("key-a").await;
        limiter.acquire("key-a").await;
        limiter.acquire("key-b").await;
        assert_eq!(limiter.len(), 2);
    }

    #[test]
    fn remove_shrinks_the_registry() {
        let limiter = ApplyRateLimiter::new(100, 10);
        limiter.limiter_for("key-a");
        assert_eq!(limiter.len(), 1);
        limiter.remove("key-a");
        assert!(limiter.is_empty());
    }
}
