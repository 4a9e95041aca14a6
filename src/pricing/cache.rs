// =============================================================================
// Price Cache — §4.2
// =============================================================================
//
// TTL'd mint -> price map. A miss walks the ordered `PriceSource` list
// (§10.7) until one succeeds, then populates the cache. The wrapped-native
// mint is never priced through this path; the profit estimator adds its
// delta at 1:1 directly (§4.3).
// =============================================================================

use std::collections::HashMap;

use chrono::Utc;
use parking_lot::RwLock;
use tracing::{debug, instrument};

use super::source::PriceSource;

pub const WSOL_MINT: &str = "So11111111111111111111111111111111111111112";

struct Entry {
    price_sol: f64,
    last_seen: i64,
}

pub struct PriceCache {
    entries: RwLock<HashMap<String, Entry>>,
    sources: Vec<Box<dyn PriceSource>>,
    ttl_seconds: i64,
}

impl PriceCache {
    pub fn new(sources: Vec<Box<dyn PriceSource>>, ttl_seconds: i64) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            sources,
            ttl_seconds,
        }
    }

    /// Returns the cached price iff it is not older than the configured TTL.
    pub fn get_fresh(&self, mint: &str) -> Option<f64> {
        let entries = self.entries.read();
        let entry = entries.get(mint)?;
        if Utc::now().timestamp() - entry.last_seen <= self.ttl_seconds {
            Some(entry.price_sol)
        } else {
            None
        }
    }

    pub fn set(&self, mint: &str, price_sol: f64) {
        self.entries.write().insert(
            mint.to_string(),
            Entry {
                price_sol,
                last_seen: Utc::now().timestamp(),
            },
        );
    }

    /// Resolve a mint's price: cache hit, else walk the oracle list in
    /// order, caching and returning the first success. `None` means
    /// "unpriceable" — the caller excludes the token from the profit sum
    /// and lowers the price-coverage sub-metric.
    #[instrument(skip(self, mint), fields(mint = %mint))]
    pub async fn resolve(&self, mint: &str) -> Option<f64> {
        if mint == WSOL_MINT {
            return Some(1.0);
        }
        if let Some(p) = self.get_fresh(mint) {
            return Some(p);
        }
        for source in &self.sources {
            if let Some(price) = source.fetch(mint).await {
                debug!(mint, source = source.name(), price, "priced via oracle");
                self.set(mint, price);
                return Some(price);
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct AlwaysNone;
    #[async_trait]
    impl PriceSource for AlwaysNone {
        fn name(&self) -> &'static str {
            "none"
        }
        async fn fetch(&self, _mint: &str) -> Option<f64> {
            None
        }
    }

    struct Fixed(f64);
    #[async_trait]
    impl PriceSource for Fixed {
        fn name(&self) -> &'static str {
            "fixed"
        }
        async fn fetch(&self, _mint: &str) -> Option<f64> {
            Some(self.0)
        }
    }

    #[tokio::test]
    async fn wsol_is_never_priced_via_oracle() {
        let cache = PriceCache::new(vec![Box::new(AlwaysNone)], 300);
        assert_eq!(cache.resolve(WSOL_MINT).await, Some(1.0));
    }

    #[tokio::test]
    async fn falls_through_oracle_list_until_one_succeeds() {
        let cache = PriceCache::new(vec![Box::new(AlwaysNone), Box::new(Fixed(2.5))], 300);
        assert_eq!(cache.resolve("SomeMint").await, Some(2.5));
        // cached now, even a source-less resolve would hit the cache
        assert_eq!(cache.get_fresh("SomeMint"), Some(2.5));
    }

    #[tokio::test]
    async fn returns_none_when_every_oracle_misses() {
        let cache = PriceCache::new(vec![Box::new(AlwaysNone)], 300);
        assert_eq!(cache.resolve("Unpriceable").await, None);
    }

    #[test]
    fn stale_entry_is_not_returned() {
        let cache = PriceCache::new(vec![], -1);
        cache.set("Mint", 3.0);
        assert_eq!(cache.get_fresh("Mint"), None);
    }
}
