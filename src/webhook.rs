// =============================================================================
// Webhook Fan-out — §4.9
// =============================================================================
//
// Outbound Discord-shaped webhook delivery: a per-wallet circuit breaker, a
// 30-second content-key dedup window for alerts, a separate 5-second
// coarse-bucket dedup for system notifications, and a single retry with the
// same jittered backoff shape the RPC fabric uses. Ported from the
// reference implementation's `send_discord_alert_async` /
// `send_discord_system_notification_async`, in the `reqwest::Client`-in-a-
// struct idiom of `binance/client.rs`.
//
// §9 open-question resolution: `dry_run` suppresses every send here, not
// just the ones the caller explicitly marks dry — this module is the only
// place outbound webhook I/O happens.
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use parking_lot::RwLock;
use rand::Rng;
use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};

use crate::alert_engine::Alert;
use crate::types::Tier;

const ALERT_DEDUP_WINDOW_SEC: f64 = 30.0;
const SYSTEM_DEDUP_BUCKET_SEC: f64 = 5.0;
const SYSTEM_CACHE_CAP: usize = 10;
const CIRCUIT_PAUSE_SEC: f64 = 30.0;
const DISCLAIMER: &str = "Data only, not financial advice";

pub struct WebhookFanout {
    http: reqwest::Client,
    url: Option<String>,
    dry_run: bool,
    include_paywall_prompt: bool,
    alert_dedup: RwLock<HashMap<String, f64>>,
    system_dedup: RwLock<HashSet<String>>,
    last_failure: RwLock<HashMap<String, f64>>,
}

impl WebhookFanout {
    pub fn new(url: Option<String>, dry_run: bool, include_paywall_prompt: bool) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .expect("failed to build reqwest client"),
            url,
            dry_run,
            include_paywall_prompt,
            alert_dedup: RwLock::new(HashMap::new()),
            system_dedup: RwLock::new(HashSet::new()),
            last_failure: RwLock::new(HashMap::new()),
        }
    }

    fn circuit_open(&self, key: &str, now: f64) -> bool {
        self.last_failure.read().get(key).is_some_and(|last| now - last < CIRCUIT_PAUSE_SEC)
    }

    fn record_failure(&self, key: &str, now: f64) {
        self.last_failure.write().insert(key.to_string(), now);
    }

    fn clear_failure(&self, key: &str) {
        self.last_failure.write().remove(key);
    }

    fn retry_delay(attempt: u32) -> Duration {
        let backoff = 0.25 * 2f64.powi(attempt as i32);
        let jitter = rand::thread_rng().gen_range(0.0..0.25);
        Duration::from_secs_f64(backoff + jitter)
    }

    fn fields_for_tier(alert: &Alert, tier: Tier) -> Vec<Value> {
        let mut fields = vec![
            json!({"name": "Wallet", "value": alert.wallet, "inline": true}),
            json!({"name": "Profit (SOL)", "value": format!("{:.2}", alert.profit), "inline": true}),
            json!({"name": "DEX", "value": alert.dex, "inline": true}),
            json!({"name": "Type", "value": alert.signal_type.to_string(), "inline": true}),
        ];

        if tier == Tier::Free {
            return fields;
        }

        fields.push(json!({"name": "Win rate", "value": format!("{:.1}%", alert.win_rate), "inline": true}));
        fields.push(json!({"name": "Z-score", "value": format!("{:+.2}", alert.zscore), "inline": true}));
        fields.push(json!({"name": "Confidence", "value": alert.confidence.to_string(), "inline": true}));
        fields.push(json!({"name": "Latency (ms)", "value": format!("{:.0}", alert.detect_ms), "inline": true}));

        let m = &alert.sub_metrics;
        let reasons = format!(
            "Price coverage: {:.1}%\nRoute complexity: {:.1}\nFee complete: {}\nBalance alignment: {:.1}%",
            m.price_coverage * 100.0,
            m.route_complexity,
            if m.fee_completeness > 0.9 { "Yes" } else { "No" },
            m.balance_alignment * 100.0,
        );
        fields.push(json!({"name": "Confidence Reasons", "value": reasons, "inline": false}));
        fields
    }

    /// Send one alert, shaped for `tier`. No-op if `dry_run`, the webhook
    /// URL is unset, the per-wallet circuit is open, or the content key
    /// was already sent within the dedup window.
    #[instrument(skip(self, alert), fields(wallet = %alert.wallet))]
    pub async fn send_alert(&self, alert: &Alert, tier: Tier, now: f64) {
        if self.dry_run {
            return;
        }
        let Some(url) = self.url.clone() else { return };

        let dedup_key = format!("{}_{}_{}", alert.wallet, alert.signature, (alert.profit * 100.0) as i64);
        {
            let mut dedup = self.alert_dedup.write();
            if let Some(last_sent) = dedup.get(&dedup_key) {
                if now - last_sent < ALERT_DEDUP_WINDOW_SEC {
                    debug!(wallet = %alert.wallet, "discord alert deduplicated");
                    return;
                }
            }
            dedup.insert(dedup_key, now);
            let cutoff = now - 300.0;
            dedup.retain(|_, v| *v > cutoff);
        }

        let circuit_key = format!("discord_last_failure_{}", alert.wallet);
        if self.circuit_open(&circuit_key, now) {
            warn!(wallet = %alert.wallet, "discord circuit breaker active");
            return;
        }

        let mut fields = Self::fields_for_tier(alert, tier);
        if tier == Tier::Free && self.include_paywall_prompt {
            fields.push(json!({
                "name": "Upgrade",
                "value": "Upgrade to Pro for enriched alerts",
                "inline": false,
            }));
        }
        fields.push(json!({"name": "Disclaimer", "value": DISCLAIMER, "inline": false}));
        fields.push(json!({
            "name": "Explorer",
            "value": format!("https://solscan.io/tx/{}", alert.signature),
            "inline": false,
        }));

        let payload = json!({
            "username": "WalletRadar",
            "embeds": [{
                "title": format!("Wallet {}… +{:.2} SOL", &alert.wallet.chars().take(8).collect::<String>(), alert.profit),
                "fields": fields,
                "timestamp": alert.timestamp.to_rfc3339(),
            }],
        });

        self.deliver(&url, &payload, &circuit_key, now, 1).await;
    }

    /// Send a system (started/stopped/error) notification, coarsely
    /// deduplicated in 5-second buckets.
    #[instrument(skip(self, details))]
    pub async fn send_system_notification(&self, status: &str, message: &str, details: &HashMap<String, String>, now: f64) {
        if self.dry_run {
            return;
        }
        let Some(url) = self.url.clone() else { return };

        let cache_key = format!("system_notif_{status}_{}", (now / SYSTEM_DEDUP_BUCKET_SEC) as i64);
        {
            let mut cache = self.system_dedup.write();
            if cache.contains(&cache_key) {
                debug!(status, "discord system notification deduplicated");
                return;
            }
            cache.insert(cache_key);
            if cache.len() > SYSTEM_CACHE_CAP {
                cache.clear();
            }
        }

        let (color, emoji) = match status {
            "started" => (0x00FF00, "[started]"),
            "stopped" => (0xFF0000, "[stopped]"),
            _ => (0xFFA500, "[warn]"),
        };

        let mut fields = vec![
            json!({"name": "Status", "value": status.to_uppercase(), "inline": true}),
            json!({"name": "Time", "value": chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string(), "inline": true}),
        ];
        for (key, value) in details {
            fields.push(json!({"name": key, "value": value, "inline": true}));
        }

        let payload = json!({
            "username": "WalletRadar",
            "embeds": [{
                "title": format!("{emoji} Wallet Monitor Bot - {}", status.to_uppercase()),
                "description": message,
                "fields": fields,
                "color": color,
                "timestamp": chrono::Utc::now().to_rfc3339(),
            }],
        });

        self.deliver(&url, &payload, "system", now, 0).await;
    }

    async fn deliver(&self, url: &str, payload: &Value, circuit_key: &str, now: f64, max_retries: u32) {
        for attempt in 0..=max_retries {
            match self.http.post(url).json(payload).send().await {
                Ok(resp) if resp.status().as_u16() == 200 || resp.status().as_u16() == 204 => {
                    self.clear_failure(circuit_key);
                    return;
                }
                Ok(resp) => {
                    warn!(status = %resp.status(), attempt, "discord webhook http error");
                }
                Err(err) => {
                    warn!(error = %err, attempt, "discord webhook exception");
                }
            }
            if attempt < max_retries {
                tokio::time::sleep(Self::retry_delay(attempt)).await;
            }
        }
        self.record_failure(circuit_key, now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profit::SubMetrics;
    use crate::types::{Confidence, SignalType};

    fn sample_alert() -> Alert {
        Alert {
            wallet: "Wallet11111111111111111111111111111111111".to_string(),
            profit: 3.5,
            dex: "Jupiter".to_string(),
            win_rate: 80.0,
            timestamp: chrono::Utc::now(),
            counterparties: vec![],
            signal_type: SignalType::AmmAggregator,
            zscore: 1.2,
            signature: "sig1".to_string(),
            detect_ms: 12.0,
            confidence: Confidence::High,
            sub_metrics: SubMetrics {
                price_coverage: 1.0,
                route_complexity: 1.0,
                fee_completeness: 1.0,
                balance_alignment: 1.0,
            },
            dry_run: false,
        }
    }

    #[test]
    fn free_tier_omits_enriched_fields() {
        let fields = WebhookFanout::fields_for_tier(&sample_alert(), Tier::Free);
        assert_eq!(fields.len(), 4);
    }

    #[test]
    fn pro_tier_includes_confidence_reasons() {
        let fields = WebhookFanout::fields_for_tier(&sample_alert(), Tier::Pro);
        assert!(fields.iter().any(|f| f["name"] == "Confidence Reasons"));
    }

    #[tokio::test]
    async fn dry_run_suppresses_all_sends() {
        let fanout = WebhookFanout::new(Some("https://discord.example/webhook".to_string()), true, false);
        fanout.send_alert(&sample_alert(), Tier::Pro, 1000.0).await;
        // No assertion on network activity possible here; this test documents
        // the no-op contract and would hang/err if `deliver` were reached
        // with an unroutable URL and dry_run were not honored.
    }

    #[test]
    fn circuit_breaker_blocks_within_pause_window() {
        let fanout = WebhookFanout::new(Some("https://discord.example/webhook".to_string()), false, false);
        fanout.record_failure("k", 1000.0);
        assert!(fanout.circuit_open("k", 1010.0));
        assert!(!fanout.circuit_open("k", 1040.0));
    }
}
