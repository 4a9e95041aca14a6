// =============================================================================
// API Auth — §4.7, §3 ApiKey/Subscription
// =============================================================================
//
// SHA-256-hashed API keys in a small JSON-backed store (persistence format
// per §10.8: one atomic-write document, same idiom as `state_store.rs`
// rather than a relational file). Ported from the reference
// implementation's `ApiAuth` (`generate_key`/`hash_key`/`create_key`/
// `validate_key`/`deactivate_key`/`update_tier`); token encoding uses
// `base64`'s URL-safe alphabet to match the original's `secrets.token_urlsafe`
// shape.
// =============================================================================

use std::collections::HashMap;
use std::path::PathBuf;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use parking_lot::RwLock;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::instrument;

use crate::types::Tier;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyRecord {
    pub key_hash: String,
    pub tier: Tier,
    pub created_at: f64,
    pub expires_at: Option<f64>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionRecord {
    pub api_key_hash: String,
    pub external_customer_id: Option<String>,
    pub external_subscription_id: String,
    pub tier: Tier,
    pub status: String,
    pub created_at: f64,
    pub updated_at: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Tables {
    #[serde(default)]
    api_keys: HashMap<String, ApiKeyRecord>,
    #[serde(default)]
    subscriptions: HashMap<String, SubscriptionRecord>,
}

pub struct ApiKeyStore {
    path: PathBuf,
    tables: RwLock<Tables>,
}

impl ApiKeyStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), tables: RwLock::new(Tables::default()) }
    }

    #[instrument(skip(self))]
    pub fn load(&self) {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(_) => return,
        };
        if let Ok(tables) = serde_json::from_str(&content) {
            *self.tables.write() = tables;
        }
    }

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

    pub fn hash_key(api_key: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(api_key.as_bytes());
        hex::encode(hasher.finalize())
    }

    fn generate_key() -> String {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        format!("daas_{}", URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Create a new key for `tier`. Returns the plaintext token (shown once)
    /// and its hash (the only thing persisted).
    pub fn create_key(&self, tier: Tier, now: f64, expires_at: Option<f64>) -> (String, String) {
        let api_key = Self::generate_key();
        let key_hash = Self::hash_key(&api_key);
        self.tables.write().api_keys.insert(
            key_hash.clone(),
            ApiKeyRecord { key_hash: key_hash.clone(), tier, created_at: now, expires_at, is_active: true },
        );
        (api_key, key_hash)
    }

    /// `(tier, active)` iff the hash exists, is active, and unexpired.
    pub fn validate(&self, api_key: &str, now: f64) -> Option<(Tier, bool)> {
        let key_hash = Self::hash_key(api_key);
        self.validate_hash(&key_hash, now)
    }

    pub fn validate_hash(&self, key_hash: &str, now: f64) -> Option<(Tier, bool)> {
        let tables = self.tables.read();
        let record = tables.api_keys.get(key_hash)?;
        if !record.is_active {
            return None;
        }
        if let Some(expires_at) = record.expires_at {
            if now > expires_at {
                return None;
            }
        }
        Some((record.tier, record.is_active))
    }

    pub fn deactivate(&self, key_hash: &str) -> bool {
        let mut tables = self.tables.write();
        match tables.api_keys.get_mut(key_hash) {
            Some(record) => {
                record.is_active = false;
                true
            }
            None => false,
        }
    }

    pub fn update_tier(&self, key_hash: &str, tier: Tier) -> bool {
        let mut tables = self.tables.write();
        match tables.api_keys.get_mut(key_hash) {
            Some(record) => {
                record.tier = tier;
                true
            }
            None => false,
        }
    }

    pub fn upsert_subscription(&self, sub: SubscriptionRecord) {
        self.tables.write().subscriptions.insert(sub.external_subscription_id.clone(), sub);
    }

    pub fn find_subscription(&self, external_subscription_id: &str) -> Option<SubscriptionRecord> {
        self.tables.read().subscriptions.get(external_subscription_id).cloned()
    }

    pub fn active_subscription_counts(&self) -> HashMap<Tier, usize> {
        let tables = self.tables.read();
        let mut counts = HashMap::new();
        for sub in tables.subscriptions.values() {
            if sub.status == "active" {
                *counts.entry(sub.tier).or_insert(0) += 1;
            }
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn created_key_validates_and_hashes_consistently() {
        let store = ApiKeyStore::new("/tmp/does-not-matter.json");
        let (api_key, key_hash) = store.create_key(Tier::Pro, 1000.0, None);
        assert_eq!(ApiKeyStore::hash_key(&api_key), key_hash);
        assert_eq!(store.validate(&api_key, 1000.0), Some((Tier::Pro, true)));
    }

    #[test]
    fn expired_key_does_not_validate() {
        let store = ApiKeyStore::new("/tmp/does-not-matter.json");
        let (api_key, _) = store.create_key(Tier::Free, 1000.0, Some(1500.0));
        assert!(store.validate(&api_key, 1000.0).is_some());
        assert!(store.validate(&api_key, 1600.0).is_none());
    }

    #[test]
    fn deactivated_key_does_not_validate() {
        let store = ApiKeyStore::new("/tmp/does-not-matter.json");
        let (api_key, key_hash) = store.create_key(Tier::Elite, 1000.0, None);
        assert!(store.deactivate(&key_hash));
        assert!(store.validate(&api_key, 1000.0).is_none());
    }

    #[test]
    fn update_tier_changes_validation_result() {
        let store = ApiKeyStore::new("/tmp/does-not-matter.json");
        let (api_key, key_hash) = store.create_key(Tier::Free, 1000.0, None);
        assert!(store.update_tier(&key_hash, Tier::Elite));
        assert_eq!(store.validate(&api_key, 1000.0), Some((Tier::Elite, true)));
    }

    #[test]
    fn unknown_key_does_not_validate() {
        let store = ApiKeyStore::new("/tmp/does-not-matter.json");
        assert!(store.validate("daas_nonexistent", 1000.0).is_none());
    }
}
