// =============================================================================
// Billing — §6 POST /api/v1/billing/webhook, /fake-checkout
// =============================================================================
//
// Simulated Stripe webhook dispatch and a fake-checkout convenience route,
// ported from the reference implementation's `BillingService`. The wallet
// seed/billing body formats are explicitly out of scope (§1); this module
// only has to do the right thing with whatever `type`/`data` shape §6
// describes, treating unknown shapes as no-ops rather than errors.
// =============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::auth::{ApiKeyStore, SubscriptionRecord};
use crate::types::Tier;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FakeCheckoutResponse {
    pub api_key: String,
    pub subscription_id: String,
    pub tier: Tier,
    pub status: String,
}

fn extract_tier(data: &Value) -> Tier {
    let price_id = data
        .pointer("/items/data/0/price/id")
        .and_then(Value::as_str)
        .unwrap_or("");
    let from_price = match price_id {
        "price_free" => Some(Tier::Free),
        "price_pro" => Some(Tier::Pro),
        "price_elite" => Some(Tier::Elite),
        _ => None,
    };
    if let Some(tier) = from_price {
        return tier;
    }
    data.pointer("/metadata/tier")
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<Tier>().ok())
        .unwrap_or(Tier::Free)
}

/// Dispatch a billing webhook event. Returns the API key created/updated,
/// if any — the reference implementation surfaces this to the caller for
/// logging, never to the subscriber directly.
pub fn handle_webhook(store: &ApiKeyStore, event_type: &str, data: &Value, now: f64) -> Option<String> {
    match event_type {
        "customer.subscription.created" => handle_created(store, data, now),
        "customer.subscription.updated" => handle_updated(store, data, now),
        "customer.subscription.deleted" => handle_deleted(store, data, now),
        other => {
            warn!(event_type = other, "unrecognized billing webhook event");
            None
        }
    }
}

fn handle_created(store: &ApiKeyStore, data: &Value, now: f64) -> Option<String> {
    let customer_id = data.get("customer").and_then(Value::as_str).map(str::to_string);
    let subscription_id = data.get("id").and_then(Value::as_str)?.to_string();
    let tier = extract_tier(data);

    let (api_key, key_hash) = store.create_key(tier, now, None);
    store.upsert_subscription(SubscriptionRecord {
        api_key_hash: key_hash,
        external_customer_id: customer_id,
        external_subscription_id: subscription_id,
        tier,
        status: "active".to_string(),
        created_at: now,
        updated_at: now,
    });
    info!(tier = %tier, "subscription created");
    Some(api_key)
}

fn handle_updated(store: &ApiKeyStore, data: &Value, now: f64) -> Option<String> {
    let subscription_id = data.get("id").and_then(Value::as_str)?;
    let tier = extract_tier(data);
    let status = data.get("status").and_then(Value::as_str).unwrap_or("active").to_string();

    let mut sub = store.find_subscription(subscription_id)?;
    store.update_tier(&sub.api_key_hash, tier);
    sub.tier = tier;
    sub.status = status;
    sub.updated_at = now;
    let key_hash = sub.api_key_hash.clone();
    store.upsert_subscription(sub);
    info!(subscription_id, tier = %tier, "subscription updated");
    Some(key_hash)
}

fn handle_deleted(store: &ApiKeyStore, data: &Value, now: f64) -> Option<String> {
    let subscription_id = data.get("id").and_then(Value::as_str)?;
    let mut sub = store.find_subscription(subscription_id)?;
    store.deactivate(&sub.api_key_hash);
    sub.status = "cancelled".to_string();
    sub.updated_at = now;
    let key_hash = sub.api_key_hash.clone();
    store.upsert_subscription(sub);
    info!(subscription_id, "subscription cancelled");
    Some(key_hash)
}

/// No-Stripe checkout shortcut: create a key and an "active" fake
/// subscription directly. Gated by `fake_checkout_enabled` at the call
/// site (§7).
pub fn fake_checkout(store: &ApiKeyStore, tier: Tier, email: &str, now: f64) -> FakeCheckoutResponse {
    let (api_key, key_hash) = store.create_key(tier, now, None);
    let subscription_id = format!("fake_sub_{}", now as i64);

    store.upsert_subscription(SubscriptionRecord {
        api_key_hash: key_hash,
        external_customer_id: Some(email.to_string()),
        external_subscription_id: subscription_id.clone(),
        tier,
        status: "active".to_string(),
        created_at: now,
        updated_at: now,
    });

    FakeCheckoutResponse { api_key, subscription_id, tier, status: "active".to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn created_event_extracts_tier_from_metadata() {
        let store = ApiKeyStore::new("/tmp/does-not-matter.json");
        let data = json!({
            "customer": "cus_1",
            "id": "sub_1",
            "metadata": { "tier": "pro" },
        });
        let key = handle_webhook(&store, "customer.subscription.created", &data, 1000.0);
        assert!(key.is_some());
        let (tier, active) = store.validate(&key.unwrap(), 1000.0).unwrap();
        assert_eq!(tier, Tier::Pro);
        assert!(active);
    }

    #[test]
    fn updated_event_changes_tier_of_existing_key() {
        let store = ApiKeyStore::new("/tmp/does-not-matter.json");
        let created = json!({ "customer": "cus_1", "id": "sub_1", "metadata": { "tier": "free" } });
        handle_webhook(&store, "customer.subscription.created", &created, 1000.0);

        let updated = json!({ "id": "sub_1", "status": "active", "metadata": { "tier": "elite" } });
        let key_hash = handle_webhook(&store, "customer.subscription.updated", &updated, 2000.0);
        assert!(key_hash.is_some());
        assert_eq!(store.validate_hash(&key_hash.unwrap(), 2000.0), Some((Tier::Elite, true)));
    }

    #[test]
    fn deleted_event_deactivates_key() {
        let store = ApiKeyStore::new("/tmp/does-not-matter.json");
        let created = json!({ "customer": "cus_1", "id": "sub_1", "metadata": { "tier": "pro" } });
        let api_key = handle_webhook(&store, "customer.subscription.created", &created, 1000.0).unwrap();

        let deleted = json!({ "id": "sub_1" });
        handle_webhook(&store, "customer.subscription.deleted", &deleted, 3000.0);
        assert!(store.validate(&api_key, 3000.0).is_none());
    }

    #[test]
    fn fake_checkout_creates_active_subscription() {
        let store = ApiKeyStore::new("/tmp/does-not-matter.json");
        let resp = fake_checkout(&store, Tier::Elite, "a@example.com", 1000.0);
        assert_eq!(resp.tier, Tier::Elite);
        assert_eq!(resp.status, "active");
        assert!(store.validate(&resp.api_key, 1000.0).is_some());
    }
}
