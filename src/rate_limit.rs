// =============================================================================
// Rate Limiter — §4.7, §3 RateCounter
// =============================================================================
//
// Per-(key-hash) daily counters, rolling over at the next UTC midnight.
// Ported from the reference implementation's `RateLimiter.check_limit`, in
// the snapshot-struct idiom `binance/rate_limit.rs` uses for its own
// request-weight tracker — here the state is keyed per API key rather than
// a handful of fixed atomics, so it lives behind a `parking_lot::RwLock`
// map instead of bare atomics.
// =============================================================================

use std::collections::HashMap;

use chrono::{TimeZone, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::types::Tier;

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct Counter {
    count: u32,
    reset_at: f64,
}

/// `(allowed, remaining, limit)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub limit: u32,
}

pub struct RateLimiter {
    limits: HashMap<Tier, u32>,
    counters: RwLock<HashMap<String, Counter>>,
}

impl RateLimiter {
    pub fn new(free_limit: u32, pro_limit: u32, elite_limit: u32) -> Self {
        let mut limits = HashMap::new();
        limits.insert(Tier::Free, free_limit);
        limits.insert(Tier::Pro, pro_limit);
        limits.insert(Tier::Elite, elite_limit);
        Self { limits, counters: RwLock::new(HashMap::new()) }
    }

    /// The unix timestamp of the most recent UTC midnight at or before `now`.
    fn day_start(now: f64) -> f64 {
        let dt = Utc.timestamp_opt(now as i64, 0).single().unwrap_or_else(Utc::now);
        let midnight = dt.date_naive().and_hms_opt(0, 0, 0).expect("midnight is always valid");
        Utc.from_utc_datetime(&midnight).timestamp() as f64
    }

    /// Check and, if admitted, consume one unit of quota.
    pub fn check(&self, key_hash: &str, tier: Tier, now: f64) -> RateDecision {
        let limit = *self.limits.get(&tier).unwrap_or(&self.limits[&Tier::Free]);
        let today = Self::day_start(now);

        let mut counters = self.counters.write();
        let counter = counters.entry(key_hash.to_string()).or_insert(Counter { count: 0, reset_at: today });

        if counter.reset_at < today {
            counter.count = 0;
            counter.reset_at = today;
        }

        let allowed = counter.count < limit;
        if allowed {
            counter.count += 1;
        }
        let remaining = limit.saturating_sub(counter.count);

        RateDecision { allowed, remaining, limit }
    }

    /// Current usage without consuming quota.
    pub fn usage(&self, key_hash: &str, tier: Tier, now: f64) -> (u32, u32) {
        let limit = *self.limits.get(&tier).unwrap_or(&self.limits[&Tier::Free]);
        let today = Self::day_start(now);
        let counters = self.counters.read();
        let count = counters
            .get(key_hash)
            .map(|c| if c.reset_at < today { 0 } else { c.count })
            .unwrap_or(0);
        (count, limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_until_limit_then_blocks() {
        let limiter = RateLimiter::new(2, 100, 1000);
        let now = 1_700_000_000.0;
        assert!(limiter.check("hash-a", Tier::Free, now).allowed);
        assert!(limiter.check("hash-a", Tier::Free, now).allowed);
        let third = limiter.check("hash-a", Tier::Free, now);
        assert!(!third.allowed);
        assert_eq!(third.remaining, 0);
    }

    #[test]
    fn counters_are_independent_per_key() {
        let limiter = RateLimiter::new(1, 100, 1000);
        let now = 1_700_000_000.0;
        assert!(limiter.check("hash-a", Tier::Free, now).allowed);
        assert!(limiter.check("hash-b", Tier::Free, now).allowed);
    }

    #[test]
    fn rolls_over_on_new_utc_day() {
        let limiter = RateLimiter::new(1, 100, 1000);
        let day1 = 1_700_000_000.0;
        let day2 = day1 + 86_400.0;
        assert!(limiter.check("hash-a", Tier::Free, day1).allowed);
        assert!(!limiter.check("hash-a", Tier::Free, day1).allowed);
        assert!(limiter.check("hash-a", Tier::Free, day2).allowed);
    }

    #[test]
    fn tier_selects_distinct_limits() {
        let limiter = RateLimiter::new(1, 5, 50);
        let now = 1_700_000_000.0;
        assert_eq!(limiter.check("hash-a", Tier::Elite, now).limit, 50);
        assert_eq!(limiter.check("hash-b", Tier::Pro, now).limit, 5);
    }
}
