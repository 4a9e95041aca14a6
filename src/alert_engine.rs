// =============================================================================
// Alert Engine — §4.5 (per-wallet scan), §4.6 (watchlist wiring)
// =============================================================================
//
// The per-wallet scan coroutine: acquire the scan semaphore, pull new
// signatures, batch them by slot, run the Profit Estimator on each batch,
// and push anything that survives the filter gauntlet onto the shared
// alert ring. Ported from the reference implementation's
// `scan_wallet_async`/`filter_new_signatures`/`should_alert`/`mark_alert`/
// `build_signature_batches`/`compute_zscore`/`label_from_programs`, in the
// locking idiom `risk.rs` uses for its own per-wallet/per-day state.
// =============================================================================

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use crate::metrics::Metrics;
use crate::pricing::PriceCache;
use crate::profit::{estimate_profit, SubMetrics};
use crate::rpc::{RpcFabric, SignatureInfo};
use crate::runtime_config::AlertingConfig;
use crate::state_store::StateStore;
use crate::types::{BlockedReason, Confidence, SignalType};
use crate::watchlist::WatchlistManager;

const PROFIT_HISTORY_CAP: usize = 50;

fn classify_dex(programs: &[String]) -> String {
    const PROGRAM_MAP: &[(&str, &str)] = &[
        ("JUP4Fb2cqiRUcaTHdrPC8h2gK4G8cCxfXk8XQf2Zx1i", "Jupiter"),
        ("rvk5K9sH1t7h8GmHh5w7bqgTt3m1oJ2qkNoRayDiUM", "Raydium"),
        ("9xQeWvG816bUx9EPfDdC1WJ4VqV6g5Gz5X5H5Q5tLCH", "OpenBook"),
        ("orcaEKTdNdXBgaAwyQUpfCw9W7jfvAbzGt9xa1sG9W", "Orca"),
        ("tensorFLkNft111111111111111111111111111111", "Tensor"),
        ("MEisE1HzehtrDpAAT8PnLHjpSSkRYakotTuJRPjTpo8", "MagicEden"),
        ("ComputeBudget111111111111111111111111111111", "System"),
        ("SysvarRent111111111111111111111111111111111", "System"),
    ];
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for program in programs {
        let label = PROGRAM_MAP
            .iter()
            .find(|(id, _)| *id == program)
            .map(|(_, label)| *label)
            .unwrap_or("Unknown");
        if label == "System" || label == "Unknown" {
            continue;
        }
        *counts.entry(label).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .max_by_key(|(_, count)| *count)
        .map(|(label, _)| label.to_string())
        .unwrap_or_else(|| "Unknown".to_string())
}

fn signal_type_for_dex(dex: &str) -> SignalType {
    const NFT_DEX: &[&str] = &["Tensor", "MagicEden", "Blur"];
    const AMM_DEX: &[&str] = &["Jupiter", "Raydium", "OpenBook", "Orca"];
    if NFT_DEX.contains(&dex) {
        SignalType::ScalperNft
    } else if AMM_DEX.contains(&dex) {
        SignalType::AmmAggregator
    } else {
        SignalType::Signal
    }
}

/// A monitored wallet's baseline record (§3 Wallet).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Wallet {
    pub address: String,
    pub net_total: f64,
    pub win_rate: f64,
    pub dex: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub wallet: String,
    pub profit: f64,
    pub dex: String,
    pub win_rate: f64,
    pub timestamp: DateTime<Utc>,
    pub counterparties: Vec<String>,
    pub signal_type: SignalType,
    pub zscore: f64,
    pub signature: String,
    pub detect_ms: f64,
    pub confidence: Confidence,
    pub sub_metrics: SubMetrics,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockedAlert {
    pub wallet: String,
    pub profit: f64,
    pub reason: BlockedReason,
    pub details: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// Everything the per-wallet scan needs, gathered so `scan_wallet` takes one
/// argument instead of eight.
pub struct ScanContext {
    pub rpc: Arc<RpcFabric>,
    pub price_cache: Arc<PriceCache>,
    pub state: Arc<StateStore>,
    pub watchlist: Arc<WatchlistManager>,
    pub metrics: Arc<Metrics>,
    pub semaphore: Arc<Semaphore>,
    pub cfg: AlertingConfig,
    pub tx_lookback: usize,
    pub wallets: Arc<RwLock<HashMap<String, Wallet>>>,
    pub profit_history: Arc<RwLock<HashMap<String, VecDeque<f64>>>>,
    pub alerts: Arc<RwLock<VecDeque<Alert>>>,
    pub blocked: Arc<RwLock<VecDeque<BlockedAlert>>>,
}

const ALERT_RING_CAP: usize = 1000;
const BLOCKED_RING_CAP: usize = 500;

fn push_bounded<T>(ring: &RwLock<VecDeque<T>>, item: T, cap: usize) {
    let mut ring = ring.write();
    ring.push_back(item);
    while ring.len() > cap {
        ring.pop_front();
    }
}

/// `filter_new_signatures`: the subset of freshly fetched signatures that
/// are strictly newer than the wallet's last-seen head. Always advances the
/// last-seen head to the current freshest signature, win or lose.
fn select_increment(state: &StateStore, wallet: &str, signatures: &[SignatureInfo]) -> Vec<SignatureInfo> {
    if signatures.is_empty() {
        return Vec::new();
    }
    let last = state.last_signature(wallet);
    let increment = match last {
        None => signatures.iter().take(5).cloned().collect(),
        Some(last_sig) => {
            let mut subset = Vec::new();
            for sig in signatures {
                if sig.signature == last_sig {
                    break;
                }
                subset.push(sig.clone());
            }
            subset
        }
    };
    state.set_last_signature(wallet, &signatures[0].signature);
    increment
}

/// `build_signature_batches`: group by slot (descending), chunk each group.
fn build_batches(signatures: &[SignatureInfo], batch_size: usize) -> Vec<Vec<SignatureInfo>> {
    let mut by_slot: HashMap<u64, Vec<SignatureInfo>> = HashMap::new();
    for sig in signatures {
        by_slot.entry(sig.slot).or_default().push(sig.clone());
    }
    let mut slots: Vec<u64> = by_slot.keys().copied().collect();
    slots.sort_unstable_by(|a, b| b.cmp(a));

    let mut batches = Vec::new();
    for slot in slots {
        let items = &by_slot[&slot];
        for chunk in items.chunks(batch_size.max(1)) {
            batches.push(chunk.to_vec());
        }
    }
    if batches.is_empty() && !signatures.is_empty() {
        batches.push(signatures.iter().take(batch_size.max(1)).cloned().collect());
    }
    batches
}

fn compute_zscore(history: &RwLock<HashMap<String, VecDeque<f64>>>, wallet: &str, profit: f64) -> f64 {
    let mut map = history.write();
    let series = map.entry(wallet.to_string()).or_insert_with(|| VecDeque::with_capacity(PROFIT_HISTORY_CAP));

    let z = if series.len() >= 2 {
        let mean = series.iter().sum::<f64>() / series.len() as f64;
        let variance = series.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / series.len() as f64;
        let std = variance.sqrt();
        if std > 0.0 {
            (profit - mean) / std
        } else {
            0.0
        }
    } else {
        0.0
    };

    series.push_back(profit);
    while series.len() > PROFIT_HISTORY_CAP {
        series.pop_front();
    }
    z
}

/// Scan one wallet: fetch its incremental signatures, run them through the
/// profit estimator batch by batch, and emit any alert that survives the
/// gauntlet. Returns the alerts emitted this scan (usually 0 or 1, but a
/// single cycle can legitimately emit several if multiple slot-batches each
/// clear the bar).
#[instrument(skip(ctx), fields(wallet = %wallet))]
pub async fn scan_wallet(ctx: &ScanContext, wallet: &str) -> Vec<Alert> {
    let _permit = match ctx.semaphore.acquire().await {
        Ok(p) => p,
        Err(_) => return Vec::new(),
    };

    let start = std::time::Instant::now();
    ctx.watchlist.touch(wallet, Utc::now().timestamp() as f64);

    let signatures = match ctx.rpc.get_signatures_for_address(wallet, ctx.tx_lookback).await {
        Ok(sigs) => sigs,
        Err(err) => {
            warn!(wallet, error = %err, "signatures fetch failed");
            return Vec::new();
        }
    };
    if signatures.is_empty() {
        return Vec::new();
    }

    let increment = select_increment(&ctx.state, wallet, &signatures);
    if increment.is_empty() {
        return Vec::new();
    }

    let (baseline_net_total, baseline_win_rate, baseline_dex) = {
        let wallets = ctx.wallets.read();
        match wallets.get(wallet) {
            Some(w) => (w.net_total, w.win_rate, w.dex.clone()),
            None => (0.0, 0.0, "Unknown".to_string()),
        }
    };

    let batches = build_batches(&increment, ctx.cfg.alert_batch_size);
    let mut emitted = Vec::new();

    for batch in batches {
        let batch_sigs: Vec<String> = batch.iter().map(|s| s.signature.clone()).collect();
        if batch_sigs.is_empty() {
            continue;
        }

        let result = estimate_profit(
            wallet,
            &batch_sigs,
            batch_sigs.len(),
            &ctx.rpc,
            &ctx.price_cache,
            ctx.cfg.balance_tolerance_pct,
        )
        .await;

        let mut dex = classify_dex(&result.programs);
        if dex == "Unknown" {
            dex = baseline_dex.clone();
        }

        let now = Utc::now();
        let now_ts = now.timestamp() as f64;

        if baseline_net_total < ctx.cfg.gain_filter || baseline_win_rate < ctx.cfg.win_rate_filter {
            push_bounded(
                &ctx.blocked,
                BlockedAlert {
                    wallet: wallet.to_string(),
                    profit: result.profit,
                    reason: BlockedReason::BaselineFilter,
                    details: json!({
                        "net_total": baseline_net_total,
                        "win_rate": baseline_win_rate,
                        "gain_filter": ctx.cfg.gain_filter,
                        "win_rate_filter": ctx.cfg.win_rate_filter,
                    }),
                    timestamp: now,
                },
                BLOCKED_RING_CAP,
            );
            continue;
        }

        if result.profit < ctx.cfg.profit_threshold {
            push_bounded(
                &ctx.blocked,
                BlockedAlert {
                    wallet: wallet.to_string(),
                    profit: result.profit,
                    reason: BlockedReason::ProfitBelowThreshold,
                    details: json!({ "profit": result.profit, "threshold": ctx.cfg.profit_threshold }),
                    timestamp: now,
                },
                BLOCKED_RING_CAP,
            );
            continue;
        }

        if !result.confidence.meets_alert_bar() {
            push_bounded(
                &ctx.blocked,
                BlockedAlert {
                    wallet: wallet.to_string(),
                    profit: result.profit,
                    reason: BlockedReason::ConfidenceTooLow,
                    details: json!({ "confidence": result.confidence.to_string() }),
                    timestamp: now,
                },
                BLOCKED_RING_CAP,
            );
            continue;
        }

        if batch_sigs.iter().any(|sig| ctx.state.is_seen(sig)) {
            push_bounded(
                &ctx.blocked,
                BlockedAlert {
                    wallet: wallet.to_string(),
                    profit: result.profit,
                    reason: BlockedReason::Idempotent,
                    details: json!({}),
                    timestamp: now,
                },
                BLOCKED_RING_CAP,
            );
            continue;
        }

        let last_alert = ctx.state.last_alert_at(wallet).unwrap_or(0.0);
        if now_ts - last_alert < ctx.cfg.cooldown_sec as f64 {
            push_bounded(
                &ctx.blocked,
                BlockedAlert {
                    wallet: wallet.to_string(),
                    profit: result.profit,
                    reason: BlockedReason::Cooldown,
                    details: json!({
                        "cooldown_remaining": ctx.cfg.cooldown_sec as f64 - (now_ts - last_alert),
                        "last_alert_timestamp": last_alert,
                    }),
                    timestamp: now,
                },
                BLOCKED_RING_CAP,
            );
            continue;
        }

        let zscore = compute_zscore(&ctx.profit_history, wallet, result.profit);
        let signal_type = signal_type_for_dex(&dex);
        let primary_sig = result.primary_signature.clone().unwrap_or_else(|| batch_sigs[0].clone());
        let detect_ms = start.elapsed().as_secs_f64() * 1000.0;

        let alert = Alert {
            wallet: wallet.to_string(),
            profit: result.profit,
            dex,
            win_rate: baseline_win_rate,
            timestamp: now,
            counterparties: result.counterparties.iter().take(10).cloned().collect(),
            signal_type,
            zscore,
            signature: primary_sig,
            detect_ms,
            confidence: result.confidence,
            sub_metrics: result.sub_metrics,
            dry_run: ctx.cfg.dry_run,
        };

        for sig in &batch_sigs {
            ctx.state.mark_seen(sig, now_ts);
        }
        ctx.state.mark_alert(wallet, now_ts);
        ctx.metrics.record_alert(wallet, result.profit, start.elapsed().as_secs_f64());

        info!(wallet, profit = result.profit, confidence = %result.confidence, "alert emitted");
        push_bounded(&ctx.alerts, alert.clone(), ALERT_RING_CAP);
        emitted.push(alert);

        if result.profit >= ctx.cfg.new_wallet_gain {
            auto_promote(ctx, &result.counterparties).await;
        }
    }

    emitted
}

/// §4.5 step 11: probe each unwatched counterparty for activity; promote it
/// into the watchlist if it clears the minimum-transaction bar.
async fn auto_promote(ctx: &ScanContext, counterparties: &[String]) {
    for candidate in counterparties {
        if ctx.watchlist.contains(candidate) {
            continue;
        }
        match ctx.rpc.get_signatures_for_address(candidate, ctx.cfg.new_wallet_min_trx).await {
            Ok(sigs) if sigs.len() >= ctx.cfg.new_wallet_min_trx => {
                debug!(wallet = candidate, count = sigs.len(), "auto-promoting counterparty");
                ctx.watchlist.touch(candidate, Utc::now().timestamp() as f64);
                ctx.wallets.write().entry(candidate.clone()).or_insert_with(|| Wallet {
                    address: candidate.clone(),
                    net_total: 0.0,
                    win_rate: 0.0,
                    dex: "Unknown".to_string(),
                });
            }
            Ok(_) => {}
            Err(err) => {
                warn!(wallet = candidate, error = %err, "auto-promotion probe failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sig(signature: &str, slot: u64) -> SignatureInfo {
        SignatureInfo { signature: signature.to_string(), slot, err: None }
    }

    #[test]
    fn classify_dex_ignores_system_and_unknown() {
        let programs = vec![
            "ComputeBudget111111111111111111111111111111".to_string(),
            "rvk5K9sH1t7h8GmHh5w7bqgTt3m1oJ2qkNoRayDiUM".to_string(),
        ];
        assert_eq!(classify_dex(&programs), "Raydium");
    }

    #[test]
    fn classify_dex_unknown_when_no_recognized_program() {
        assert_eq!(classify_dex(&["SomeOtherProgram111111111111111111111111".to_string()]), "Unknown");
    }

    #[test]
    fn signal_type_mapping() {
        assert_eq!(signal_type_for_dex("Tensor"), SignalType::ScalperNft);
        assert_eq!(signal_type_for_dex("Jupiter"), SignalType::AmmAggregator);
        assert_eq!(signal_type_for_dex("Unknown"), SignalType::Signal);
    }

    #[test]
    fn build_batches_groups_by_descending_slot_and_chunks() {
        let sigs = vec![sig("a", 10), sig("b", 10), sig("c", 20), sig("d", 10)];
        let batches = build_batches(&sigs, 2);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0], vec![sig("c", 20)]);
    }

    #[test]
    fn select_increment_takes_first_five_when_no_prior_head() {
        let store = StateStore::new("/tmp/does-not-matter.json", 3600.0, 100);
        let sigs: Vec<SignatureInfo> = (0..10).map(|i| sig(&format!("s{i}"), i)).collect();
        let increment = select_increment(&store, "wallet-a", &sigs);
        assert_eq!(increment.len(), 5);
        assert_eq!(store.last_signature("wallet-a"), Some("s0".to_string()));
    }

    #[test]
    fn select_increment_stops_at_last_seen_head() {
        let store = StateStore::new("/tmp/does-not-matter.json", 3600.0, 100);
        store.set_last_signature("wallet-a", "s2");
        let sigs = vec![sig("s0", 0), sig("s1", 1), sig("s2", 2), sig("s3", 3)];
        let increment = select_increment(&store, "wallet-a", &sigs);
        assert_eq!(increment.len(), 2);
        assert_eq!(increment[0].signature, "s0");
    }

    #[test]
    fn zscore_is_zero_until_two_prior_samples() {
        let history: RwLock<HashMap<String, VecDeque<f64>>> = RwLock::new(HashMap::new());
        assert_eq!(compute_zscore(&history, "w", 5.0), 0.0);
        assert_eq!(compute_zscore(&history, "w", 5.0), 0.0);
        let z = compute_zscore(&history, "w", 10.0);
        assert!(z > 0.0);
    }
}
