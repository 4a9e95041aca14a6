// =============================================================================
// State Store — §4.4
// =============================================================================
//
// JSON-persisted tables mirroring the reference implementation's sqlite
// schema (`state`, `seen_signatures`, `last_signatures`, `last_alerts`), but
// written the way this crate persists everything else: a single file,
// atomic tmp+rename, loaded eagerly at startup (`runtime_config.rs`'s
// idiom). TTL garbage collection runs on the same cadence as the scan loop.
// =============================================================================

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Tables {
    #[serde(default)]
    state: HashMap<String, String>,
    /// signature -> first-seen unix timestamp, ordered oldest-first.
    #[serde(default)]
    seen_signatures: Vec<(String, f64)>,
    #[serde(default)]
    last_signatures: HashMap<String, String>,
    #[serde(default)]
    last_alerts: HashMap<String, f64>,
}

/// Central persisted state: which signatures have already produced an
/// alert, each wallet's last-seen signature (for incremental scanning),
/// and each wallet's last alert time (for cooldown).
pub struct StateStore {
    path: PathBuf,
    ttl_seconds: f64,
    max_seen_signatures: usize,
    tables: RwLock<Tables>,
    seen_index: RwLock<std::collections::HashSet<String>>,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>, ttl_seconds: f64, max_seen_signatures: usize) -> Self {
        Self {
            path: path.into(),
            ttl_seconds,
            max_seen_signatures,
            tables: RwLock::new(Tables::default()),
            seen_index: RwLock::new(std::collections::HashSet::new()),
        }
    }

    /// Load persisted state from disk, applying the TTL cutoff and the
    /// seen-signatures cap on the way in, same as the reference loader.
    #[instrument(skip(self))]
    pub fn load(&self, now: f64) {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(_) => return,
        };
        let mut tables: Tables = match serde_json::from_str(&content) {
            Ok(t) => t,
            Err(err) => {
                warn!(error = %err, "state load failed, starting empty");
                return;
            }
        };

        let cutoff = now - self.ttl_seconds;
        tables.seen_signatures.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        tables.seen_signatures.retain(|(_, ts)| *ts >= cutoff);
        if tables.seen_signatures.len() > self.max_seen_signatures {
            let drop = tables.seen_signatures.len() - self.max_seen_signatures;
            tables.seen_signatures.drain(0..drop);
        }
        tables.last_alerts.retain(|_, ts| *ts >= cutoff);

        let mut index = self.seen_index.write();
        index.clear();
        index.extend(tables.seen_signatures.iter().map(|(sig, _)| sig.clone()));

        *self.tables.write() = tables;
    }

    /// Persist all tables atomically (write to a sibling tmp file, then
    /// rename over the target).
    #[instrument(skip(self))]
    pub fn save(&self) -> anyhow::Result<()> {
        let tables = self.tables.read();
        let serialized = serde_json::to_string_pretty(&*tables)?;
        let tmp_path = self.path.with_extension("tmp");
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&tmp_path, serialized)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    pub fn is_seen(&self, signature: &str) -> bool {
        self.seen_index.read().contains(signature)
    }

    pub fn mark_seen(&self, signature: &str, now: f64) {
        {
            let mut index = self.seen_index.write();
            if !index.insert(signature.to_string()) {
                return;
            }
        }
        let mut tables = self.tables.write();
        tables.seen_signatures.push((signature.to_string(), now));
        while tables.seen_signatures.len() > self.max_seen_signatures {
            let (oldest, _) = tables.seen_signatures.remove(0);
            self.seen_index.write().remove(&oldest);
        }
    }

    pub fn last_signature(&self, wallet: &str) -> Option<String> {
        self.tables.read().last_signatures.get(wallet).cloned()
    }

    pub fn set_last_signature(&self, wallet: &str, signature: &str) {
        self.tables.write().last_signatures.insert(wallet.to_string(), signature.to_string());
    }

    pub fn last_alert_at(&self, wallet: &str) -> Option<f64> {
        self.tables.read().last_alerts.get(wallet).copied()
    }

    pub fn mark_alert(&self, wallet: &str, now: f64) {
        self.tables.write().last_alerts.insert(wallet.to_string(), now);
    }

    pub fn seen_signatures_count(&self) -> usize {
        self.seen_index.read().len()
    }

    /// Drop entries older than the TTL. Runs on the same cadence as the
    /// main scan loop (§4.9).
    #[instrument(skip(self))]
    pub fn garbage_collect(&self, now: f64) {
        let cutoff = now - self.ttl_seconds;
        let mut tables = self.tables.write();

        let mut dropped = 0usize;
        while let Some((_, ts)) = tables.seen_signatures.first() {
            if *ts < cutoff {
                let (sig, _) = tables.seen_signatures.remove(0);
                self.seen_index.write().remove(&sig);
                dropped += 1;
            } else {
                break;
            }
        }
        while tables.seen_signatures.len() > self.max_seen_signatures {
            let (sig, _) = tables.seen_signatures.remove(0);
            self.seen_index.write().remove(&sig);
        }
        tables.last_alerts.retain(|_, ts| *ts >= cutoff);
        if dropped > 0 {
            tracing::debug!(dropped, "state store gc");
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_seen_is_idempotent() {
        let store = StateStore::new("/tmp/does-not-matter.json", 3600.0, 100);
        store.mark_seen("sig1", 1000.0);
        store.mark_seen("sig1", 1000.0);
        assert_eq!(store.seen_signatures_count(), 1);
        assert!(store.is_seen("sig1"));
    }

    #[test]
    fn seen_signatures_cap_evicts_oldest() {
        let store = StateStore::new("/tmp/does-not-matter.json", 3600.0, 2);
        store.mark_seen("a", 1.0);
        store.mark_seen("b", 2.0);
        store.mark_seen("c", 3.0);
        assert_eq!(store.seen_signatures_count(), 2);
        assert!(!store.is_seen("a"));
        assert!(store.is_seen("c"));
    }

    #[test]
    fn garbage_collect_drops_stale_signatures_and_alerts() {
        let store = StateStore::new("/tmp/does-not-matter.json", 100.0, 1000);
        store.mark_seen("old", 0.0);
        store.mark_seen("fresh", 1000.0);
        store.mark_alert("wallet-a", 0.0);
        store.mark_alert("wallet-b", 1000.0);

        store.garbage_collect(1050.0);

        assert!(!store.is_seen("old"));
        assert!(store.is_seen("fresh"));
        assert_eq!(store.last_alert_at("wallet-a"), None);
        assert_eq!(store.last_alert_at("wallet-b"), Some(1000.0));
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = std::env::temp_dir().join(format!("walletsignal-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("state.json");

        let store = StateStore::new(&path, 3600.0, 100);
        store.mark_seen("sig1", 500.0);
        store.set_last_signature("wallet-a", "sig1");
        store.mark_alert("wallet-a", 500.0);
        store.save().unwrap();

        let reloaded = StateStore::new(&path, 3600.0, 100);
        reloaded.load(600.0);
        assert!(reloaded.is_seen("sig1"));
        assert_eq!(reloaded.last_signature("wallet-a"), Some("sig1".to_string()));
        assert_eq!(reloaded.last_alert_at("wallet-a"), Some(500.0));

        std::fs::remove_dir_all(&dir).ok();
    }
}
