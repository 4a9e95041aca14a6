// =============================================================================
// Reporting — §4.10 (dashboard / report / detailed report cadence)
// =============================================================================
//
// Three artifacts written on the scheduler's reporting cadence: a CSV
// dashboard sorted by net_total, a Markdown summary with the most recent
// alerts, and a detailed JSON report meant for the heartbeat webhook and for
// operators inspecting the service from outside Prometheus. Ported from the
// reference implementation's `update_dashboard`/`update_report`/
// `generate_detailed_report`, writing through the same atomic tmp+rename
// idiom as `state_store.rs`.
// =============================================================================

use std::collections::{HashMap, VecDeque};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Utc;
use serde_json::{json, Value};

use crate::alert_engine::{Alert, BlockedAlert, Wallet};
use crate::rpc::CircuitSnapshot;
use crate::runtime_config::RuntimeConfig;
use crate::types::CircuitState;

fn atomic_write(path: impl AsRef<Path>, content: &str) -> Result<()> {
    let path = path.as_ref();
    let tmp_path = path.with_extension(format!(
        "{}.tmp",
        path.extension().and_then(|e| e.to_str()).unwrap_or("out")
    ));
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create parent dir for {}", path.display()))?;
    }
    std::fs::write(&tmp_path, content)
        .with_context(|| format!("failed to write tmp report to {}", tmp_path.display()))?;
    std::fs::rename(&tmp_path, path)
        .with_context(|| format!("failed to rename tmp report to {}", path.display()))?;
    Ok(())
}

fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Write the CSV dashboard: one row per watched wallet, sorted by
/// `net_total` descending, enriched with the wallet's most recent alert (if
/// any) from the in-memory ring.
pub fn write_dashboard_csv(path: impl AsRef<Path>, wallets: &[Wallet], alerts: &VecDeque<Alert>) -> Result<()> {
    let mut latest: HashMap<&str, &Alert> = HashMap::new();
    for alert in alerts {
        latest.insert(alert.wallet.as_str(), alert);
    }

    let mut sorted: Vec<&Wallet> = wallets.iter().collect();
    sorted.sort_by(|a, b| b.net_total.partial_cmp(&a.net_total).unwrap_or(std::cmp::Ordering::Equal));

    let mut out = String::from(
        "wallet,net_total,win_rate,dex,last_alert_profit,last_activity,alert_active,last_signal_type,last_zscore,last_detect_ms\n",
    );
    for wallet in sorted {
        let alert = latest.get(wallet.address.as_str());
        out.push_str(&csv_escape(&wallet.address));
        out.push(',');
        out.push_str(&format!("{:.6}", wallet.net_total));
        out.push(',');
        out.push_str(&format!("{:.2}", wallet.win_rate));
        out.push(',');
        out.push_str(&csv_escape(&wallet.dex));
        out.push(',');
        out.push_str(&alert.map(|a| format!("{:.6}", a.profit)).unwrap_or_default());
        out.push(',');
        out.push_str(&alert.map(|a| a.timestamp.to_rfc3339()).unwrap_or_default());
        out.push(',');
        out.push_str(if alert.is_some() { "true" } else { "false" });
        out.push(',');
        out.push_str(&alert.map(|a| a.signal_type.to_string()).unwrap_or_default());
        out.push(',');
        out.push_str(&alert.map(|a| format!("{:.4}", a.zscore)).unwrap_or_default());
        out.push(',');
        out.push_str(&alert.map(|a| format!("{:.1}", a.detect_ms)).unwrap_or_default());
        out.push('\n');
    }

    atomic_write(path, &out)
}

/// Count how often each counterparty address recurs across the alerts
/// currently held in the ring — a lightweight stand-in for the reference
/// implementation's running cluster counter, recomputed each time from the
/// ring rather than accumulated forever (the ring is already bounded, so
/// the recomputation cost is bounded too).
fn count_counterparty_clusters(alerts: &VecDeque<Alert>) -> Vec<(String, usize)> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for alert in alerts {
        for party in &alert.counterparties {
            *counts.entry(party.as_str()).or_insert(0) += 1;
        }
    }
    let mut ranked: Vec<(String, usize)> = counts.into_iter().map(|(k, v)| (k.to_string(), v)).collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    ranked.truncate(10);
    ranked
}

/// Write the Markdown summary: watched-wallet ranking, the 10 most recent
/// alerts, and the suspicious-counterparty cluster list.
pub fn write_markdown_report(path: impl AsRef<Path>, wallets: &[Wallet], alerts: &VecDeque<Alert>) -> Result<()> {
    let now = Utc::now();
    let mut lines = vec!["# Watched Wallets".to_string(), String::new()];
    lines.push(format!("_Last updated: {}_", now.to_rfc3339()));
    lines.push(String::new());
    lines.push("## Summary".to_string());
    lines.push(String::new());

    let mut sorted: Vec<&Wallet> = wallets.iter().collect();
    sorted.sort_by(|a, b| b.net_total.partial_cmp(&a.net_total).unwrap_or(std::cmp::Ordering::Equal));
    for wallet in &sorted {
        let short: String = wallet.address.chars().take(12).collect();
        lines.push(format!(
            "- **{short}…** ({}) — net {:+.2} SOL | win rate {:.1}%",
            wallet.dex, wallet.net_total, wallet.win_rate
        ));
    }

    lines.push(String::new());
    lines.push("## Last 10 Alerts".to_string());
    lines.push(String::new());
    if alerts.is_empty() {
        lines.push("No active alerts.".to_string());
    } else {
        let mut recent: Vec<&Alert> = alerts.iter().collect();
        recent.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        recent.truncate(10);
        for alert in recent {
            let short: String = alert.wallet.chars().take(12).collect();
            let m = &alert.sub_metrics;
            lines.push(format!(
                "- **{short}…**: +{:.2} SOL at {} (DEX {} | {} | Z {:+.2} | confidence {} | price_cov={:.0}%, route={:.1}, fee_ok={}, bal_align={:.0}%)",
                alert.profit,
                alert.timestamp.to_rfc3339(),
                alert.dex,
                alert.signal_type,
                alert.zscore,
                alert.confidence,
                m.price_coverage * 100.0,
                m.route_complexity,
                if m.fee_completeness > 0.9 { "Y" } else { "N" },
                m.balance_alignment * 100.0,
            ));
            lines.push(format!("  - [Solscan](https://solscan.io/tx/{})", alert.signature));
        }
    }

    lines.push(String::new());
    lines.push("## Suspicious Counterparty Clusters".to_string());
    lines.push(String::new());
    let clusters = count_counterparty_clusters(alerts);
    if clusters.is_empty() {
        lines.push("No coordinated activity detected recently.".to_string());
    } else {
        for (address, count) in clusters {
            lines.push(format!("- {address} seen {count} times across recent alerts"));
        }
    }

    atomic_write(path, &lines.join("\n"))
}

/// Everything `build_detailed_report` needs, gathered to keep its signature
/// from sprawling across a dozen positional arguments.
pub struct ReportInputs<'a> {
    pub wallets: &'a [Wallet],
    pub alerts: &'a VecDeque<Alert>,
    pub blocked: &'a VecDeque<BlockedAlert>,
    pub watchlist: &'a [String],
    pub circuit_snapshots: &'a [CircuitSnapshot],
    pub seen_signatures_count: usize,
    pub uptime_seconds: f64,
    pub config: &'a RuntimeConfig,
}

/// Build the detailed JSON report: configuration snapshot, aggregate
/// statistics, per-wallet stats, recent alerts/blocked-alerts, and RPC
/// health. Pure function of its inputs — callers decide when to persist or
/// ship it.
pub fn build_detailed_report(inputs: &ReportInputs) -> Value {
    let now = Utc::now();

    let wallets_by_address: HashMap<&str, &Wallet> =
        inputs.wallets.iter().map(|w| (w.address.as_str(), w)).collect();

    let wallets_stats: Vec<Value> = inputs
        .watchlist
        .iter()
        .filter_map(|address| {
            let wallet = wallets_by_address.get(address.as_str())?;
            Some(json!({
                "wallet": wallet.address,
                "net_total": wallet.net_total,
                "win_rate": wallet.win_rate,
                "dex": wallet.dex,
                "passes_gain_filter": wallet.net_total >= inputs.config.alerting.gain_filter,
                "passes_win_rate_filter": wallet.win_rate >= inputs.config.alerting.win_rate_filter,
            }))
        })
        .collect();

    let mut recent_alerts: Vec<&Alert> = inputs.alerts.iter().collect();
    recent_alerts.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    recent_alerts.truncate(20);
    let recent_alerts: Vec<Value> = recent_alerts
        .into_iter()
        .map(|a| {
            json!({
                "wallet": a.wallet,
                "profit": a.profit,
                "timestamp": a.timestamp.to_rfc3339(),
                "dex": a.dex,
                "signal_type": a.signal_type.to_string(),
                "zscore": a.zscore,
                "confidence": a.confidence.to_string(),
                "signature": a.signature,
            })
        })
        .collect();

    let cutoff = now - chrono::Duration::minutes(10);
    let mut recent_blocked: Vec<&BlockedAlert> =
        inputs.blocked.iter().filter(|b| b.timestamp >= cutoff).collect();
    recent_blocked.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    if recent_blocked.len() > 50 {
        let drop = recent_blocked.len() - 50;
        recent_blocked.drain(0..drop);
    }
    let recent_blocked: Vec<Value> = recent_blocked
        .into_iter()
        .map(|b| {
            json!({
                "wallet": b.wallet,
                "profit": b.profit,
                "reason": b.reason.to_string(),
                "details": b.details,
                "timestamp": b.timestamp.to_rfc3339(),
            })
        })
        .collect();

    let circuit_breaker_active = inputs
        .circuit_snapshots
        .iter()
        .any(|s| s.state != CircuitState::Closed);
    let error_counts: HashMap<&str, u32> = inputs
        .circuit_snapshots
        .iter()
        .map(|s| (s.endpoint.as_str(), s.consecutive_failures))
        .collect();

    json!({
        "timestamp": now.to_rfc3339(),
        "uptime_seconds": inputs.uptime_seconds,
        "configuration": {
            "profit_alert_threshold": inputs.config.alerting.profit_threshold,
            "gain_filter": inputs.config.alerting.gain_filter,
            "win_rate_filter": inputs.config.alerting.win_rate_filter,
            "alert_cooldown_sec": inputs.config.alerting.cooldown_sec,
            "tx_refresh_seconds": inputs.config.loop_cfg.tx_refresh_seconds,
            "max_concurrency": inputs.config.loop_cfg.max_concurrency,
            "dry_run": inputs.config.alerting.dry_run,
            "rpc_endpoints_count": inputs.config.rpc.endpoints.len(),
        },
        "statistics": {
            "watchlist_size": inputs.watchlist.len(),
            "total_wallets_in_data": inputs.wallets.len(),
            "alerts_generated": inputs.alerts.len(),
            "alerts_blocked": recent_blocked_count(inputs),
            "seen_signatures_count": inputs.seen_signatures_count,
        },
        "wallets": wallets_stats,
        "recent_alerts": recent_alerts,
        "blocked_alerts": recent_blocked,
        "rpc_health": {
            "endpoints": inputs.config.rpc.endpoints,
            "error_counts": error_counts,
            "circuit_breaker_active": circuit_breaker_active,
        },
        "clusters": {
            "top_addresses": count_counterparty_clusters(inputs.alerts)
                .into_iter()
                .map(|(address, count)| json!({ "address": address, "count": count }))
                .collect::<Vec<_>>(),
        },
        "caches": {
            "seen_signatures": inputs.seen_signatures_count,
            "watchlist": inputs.watchlist.len(),
        },
    })
}

fn recent_blocked_count(inputs: &ReportInputs) -> usize {
    let cutoff = Utc::now() - chrono::Duration::minutes(10);
    inputs.blocked.iter().filter(|b| b.timestamp >= cutoff).count()
}

pub fn save_detailed_report(path: impl AsRef<Path>, report: &Value) -> Result<()> {
    let content = serde_json::to_string_pretty(report).context("failed to serialize detailed report")?;
    atomic_write(path, &content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profit::SubMetrics;
    use crate::types::{BlockedReason, Confidence, SignalType};

    fn wallet(address: &str, net_total: f64) -> Wallet {
        Wallet { address: address.to_string(), net_total, win_rate: 90.0, dex: "Jupiter".to_string() }
    }

    fn alert(wallet: &str, profit: f64, counterparties: Vec<String>) -> Alert {
        Alert {
            wallet: wallet.to_string(),
            profit,
            dex: "Jupiter".to_string(),
            win_rate: 90.0,
            timestamp: Utc::now(),
            counterparties,
            signal_type: SignalType::AmmAggregator,
            zscore: 1.0,
            signature: "sig1".to_string(),
            detect_ms: 5.0,
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
    fn dashboard_csv_sorts_by_net_total_descending() {
        let dir = std::env::temp_dir().join(format!("walletsignal-report-test-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("dashboard.csv");

        let wallets = vec![wallet("W1", 1.0), wallet("W2", 9.0)];
        let alerts = VecDeque::new();
        write_dashboard_csv(&path, &wallets, &alerts).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let w2_pos = content.find("W2").unwrap();
        let w1_pos = content.find("W1").unwrap();
        assert!(w2_pos < w1_pos);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn cluster_counter_ranks_repeated_counterparties() {
        let mut alerts = VecDeque::new();
        alerts.push_back(alert("W1", 3.0, vec!["CP1".to_string(), "CP2".to_string()]));
        alerts.push_back(alert("W1", 4.0, vec!["CP1".to_string()]));
        let ranked = count_counterparty_clusters(&alerts);
        assert_eq!(ranked[0], ("CP1".to_string(), 2));
    }

    #[test]
    fn detailed_report_filters_blocked_alerts_older_than_ten_minutes() {
        let config = RuntimeConfig::default();
        let wallets = vec![wallet("W1", 10.0)];
        let alerts = VecDeque::new();
        let mut blocked = VecDeque::new();
        blocked.push_back(BlockedAlert {
            wallet: "W1".to_string(),
            profit: 1.0,
            reason: BlockedReason::Cooldown,
            details: json!({}),
            timestamp: Utc::now() - chrono::Duration::hours(1),
        });
        let watchlist = vec!["W1".to_string()];
        let inputs = ReportInputs {
            wallets: &wallets,
            alerts: &alerts,
            blocked: &blocked,
            watchlist: &watchlist,
            circuit_snapshots: &[],
            seen_signatures_count: 0,
            uptime_seconds: 10.0,
            config: &config,
        };
        let report = build_detailed_report(&inputs);
        assert_eq!(report["statistics"]["alerts_blocked"], json!(0));
        assert_eq!(report["blocked_alerts"].as_array().unwrap().len(), 0);
    }
}
