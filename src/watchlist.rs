// =============================================================================
// Watchlist Manager — §4.6
// =============================================================================
//
// Bounded LRU of monitored wallets. Every access (manual add, or
// auto-promotion of a counterparty) bumps the wallet to most-recently-used;
// once the list exceeds its configured cap the oldest-accessed wallet is
// evicted. Ported from the reference implementation's
// `register_watchlist_access`/`evict_watchlist_if_needed`, which track usage
// in an `OrderedDict` alongside a plain list — here a single
// `Vec<(wallet, last_access)>` kept in access order serves both roles.
// =============================================================================

use parking_lot::RwLock;
use tracing::info;

pub struct WatchlistManager {
    max_size: usize,
    entries: RwLock<Vec<(String, f64)>>,
}

impl WatchlistManager {
    pub fn new(max_size: usize) -> Self {
        Self {
            max_size,
            entries: RwLock::new(Vec::new()),
        }
    }

    pub fn seeded(max_size: usize, wallets: impl IntoIterator<Item = String>, now: f64) -> Self {
        let manager = Self::new(max_size);
        for wallet in wallets {
            manager.touch(&wallet, now);
        }
        manager
    }

    /// Record an access, moving `wallet` to the most-recently-used end and
    /// adding it if absent. Evicts the least-recently-used wallet(s) if the
    /// list is now over capacity.
    pub fn touch(&self, wallet: &str, now: f64) {
        {
            let mut entries = self.entries.write();
            if let Some(pos) = entries.iter().position(|(w, _)| w == wallet) {
                entries.remove(pos);
            }
            entries.push((wallet.to_string(), now));
        }
        self.evict_if_needed();
    }

    fn evict_if_needed(&self) {
        let mut entries = self.entries.write();
        while entries.len() > self.max_size && !entries.is_empty() {
            let (evicted, _) = entries.remove(0);
            info!(wallet = %evicted, "watchlist eviction");
        }
    }

    pub fn contains(&self, wallet: &str) -> bool {
        self.entries.read().iter().any(|(w, _)| w == wallet)
    }

    pub fn wallets(&self) -> Vec<String> {
        self.entries.read().iter().map(|(w, _)| w.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn remove(&self, wallet: &str) {
        self.entries.write().retain(|(w, _)| w != wallet);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn touch_adds_and_reorders() {
        let wl = WatchlistManager::new(10);
        wl.touch("a", 1.0);
        wl.touch("b", 2.0);
        wl.touch("a", 3.0);
        assert_eq!(wl.wallets(), vec!["b".to_string(), "a".to_string()]);
    }

    #[test]
    fn eviction_drops_least_recently_used() {
        let wl = WatchlistManager::new(2);
        wl.touch("a", 1.0);
        wl.touch("b", 2.0);
        wl.touch("c", 3.0);
        assert_eq!(wl.len(), 2);
        assert!(!wl.contains("a"));
        assert!(wl.contains("b"));
        assert!(wl.contains("c"));
    }

    #[test]
    fn re_touching_an_existing_wallet_saves_it_from_eviction() {
        let wl = WatchlistManager::new(2);
        wl.touch("a", 1.0);
        wl.touch("b", 2.0);
        wl.touch("a", 3.0);
        wl.touch("c", 4.0);
        assert!(wl.contains("a"));
        assert!(!wl.contains("b"));
    }
}
