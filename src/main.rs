// =============================================================================
// Wallet Monitor — Main Entry Point
// =============================================================================
//
// Boots the RPC fabric, price cache, state store and watchlist, then runs
// the scheduler loop: concurrent scan cycle over the watchlist, periodic
// report generation, state snapshots, garbage collection and a heartbeat
// webhook. Ported from the reference implementation's `main_async`, in the
// dotenv + tracing-subscriber startup idiom the teacher uses for its own
// entry point.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod alert_engine;
mod api;
mod app_state;
mod auth;
mod billing;
mod errors;
mod metrics;
mod pricing;
mod profit;
mod rate_limit;
mod reporting;
mod rpc;
mod runtime_config;
mod state_store;
mod types;
mod watchlist;
mod webhook;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::runtime_config::RuntimeConfig;

const RUNTIME_CONFIG_PATH: &str = "runtime_config.json";
const STATE_SNAPSHOT_EVERY_N_CYCLES: u64 = 10;
const MIN_REPORT_INTERVAL_SEC: u64 = 600;
const MIN_SLEEP_SEC: f64 = 5.0;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("╔══════════════════════════════════════════════════════════╗");
    info!("║        Wallet Monitor — Starting Up                      ║");
    info!("╚══════════════════════════════════════════════════════════╝");

    let config = RuntimeConfig::load_or_env(RUNTIME_CONFIG_PATH);
    info!(daas_mode = config.daas_mode, dry_run = config.alerting.dry_run, "configuration loaded");

    let state = Arc::new(AppState::new(config).map_err(|e| {
        error!(error = %e, "failed to construct application state");
        e
    })?);

    state.metrics.app_up.set(1.0);

    // ── API server (signals, score, billing) ─────────────────────────────
    let api_state = state.clone();
    let api_bind = format!("{}:{}", api_state.config.api.api_host, api_state.config.api.api_port);
    tokio::spawn(async move {
        let app = api::rest::router(api_state.clone());
        let listener = tokio::net::TcpListener::bind(&api_bind).await.expect("failed to bind API server");
        info!(addr = %api_bind, "signal API listening");
        axum::serve(listener, app).await.expect("signal API server failed");
    });

    // ── Health-only listener (separate port, §6) ──────────────────────────
    let health_state = state.clone();
    let health_bind = format!("{}:{}", health_state.config.api.api_host, health_state.config.api.health_port);
    tokio::spawn(async move {
        let app = api::rest::health_router(health_state.clone());
        let listener = tokio::net::TcpListener::bind(&health_bind).await.expect("failed to bind health listener");
        info!(addr = %health_bind, "health listener listening");
        axum::serve(listener, app).await.expect("health listener failed");
    });

    state
        .webhook
        .send_system_notification("started", "Wallet monitor started", &HashMap::new(), now_unix())
        .await;

    info!("scheduler loop starting");
    let result = run_scheduler(state.clone()).await;

    if let Err(err) = &result {
        error!(error = %err, "scheduler loop exited with an error");
    }

    warn!("shutting down — persisting state");
    if let Err(err) = state.persist() {
        error!(error = %err, "failed to persist state on shutdown");
    }
    state
        .webhook
        .send_system_notification("stopped", "Wallet monitor stopped", &HashMap::new(), now_unix())
        .await;

    info!("wallet monitor shut down complete");
    result
}

/// The main cadence: scan cycle, report generation, state snapshot,
/// garbage collection and heartbeat. Runs until ctrl-c, which is raced
/// against the cycle sleep on every iteration.
async fn run_scheduler(state: Arc<AppState>) -> anyhow::Result<()> {
    let mut cycle: u64 = 0;
    let mut last_report_at = 0.0_f64;
    let mut last_detailed_report_at = 0.0_f64;
    let mut last_heartbeat_at = 0.0_f64;

    let report_interval = state.config.loop_cfg.report_refresh_seconds.max(MIN_REPORT_INTERVAL_SEC as u64) as f64;
    let heartbeat_interval = state.config.loop_cfg.heartbeat_interval_seconds as f64;

    loop {
        let cycle_start = std::time::Instant::now();
        let now = now_unix();

        state.metrics.last_loop_ts.set(now);
        state.state_store.garbage_collect(now);
        state.metrics.cache_size.set(state.state_store.seen_signatures_count() as f64);
        state.metrics.watchlist_size.set(state.watchlist.len() as f64);

        if let Err(err) = run_scan_cycle(&state).await {
            error!(error = %err, "scan cycle failed, continuing on the next cycle");
        }

        if now - last_report_at >= report_interval {
            if let Err(err) = write_reports(&state) {
                warn!(error = %err, "failed to write dashboard/report artifacts");
            }
            last_report_at = now;
        }

        if now - last_detailed_report_at >= report_interval {
            if let Err(err) = write_detailed_report(&state) {
                warn!(error = %err, "failed to write detailed report");
            }
            last_detailed_report_at = now;
        }

        if heartbeat_interval > 0.0 && now - last_heartbeat_at >= heartbeat_interval {
            send_heartbeat(&state, now).await;
            last_heartbeat_at = now;
        }

        cycle += 1;
        if cycle % STATE_SNAPSHOT_EVERY_N_CYCLES == 0 {
            if let Err(err) = state.persist() {
                warn!(error = %err, "periodic state snapshot failed");
            }
        }

        let elapsed = cycle_start.elapsed().as_secs_f64();
        let sleep_for = (state.config.loop_cfg.tx_refresh_seconds as f64 - elapsed).max(MIN_SLEEP_SEC);

        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs_f64(sleep_for)) => {}
            result = tokio::signal::ctrl_c() => {
                result?;
                warn!("shutdown signal received");
                return Ok(());
            }
        }
    }
}

/// Fan out one scan per watched wallet, bounded by the scan semaphore
/// already embedded in `ScanContext`. Per-wallet failures are isolated:
/// a panic or error in one scan task never aborts the cycle.
async fn run_scan_cycle(state: &Arc<AppState>) -> anyhow::Result<()> {
    let wallets = state.watchlist.wallets();
    if wallets.is_empty() {
        return Ok(());
    }

    let ctx = Arc::new(state.scan_context());
    let mut tasks = Vec::with_capacity(wallets.len());
    for wallet in wallets {
        let ctx = ctx.clone();
        tasks.push(tokio::spawn(async move { alert_engine::scan_wallet(&ctx, &wallet).await }));
    }

    for task in tasks {
        match task.await {
            Ok(alerts) => {
                for alert in alerts {
                    state.webhook.send_alert(&alert, crate::types::Tier::Elite, now_unix()).await;
                }
            }
            Err(err) => {
                error!(error = %err, "scan task panicked, isolating failure");
            }
        }
    }

    Ok(())
}

fn write_reports(state: &Arc<AppState>) -> anyhow::Result<()> {
    let wallets: Vec<_> = state.wallets.read().values().cloned().collect();
    let alerts = state.alerts.read();
    reporting::write_dashboard_csv(&state.config.paths.dashboard_csv, &wallets, &alerts)?;
    reporting::write_markdown_report(&state.config.paths.report_md, &wallets, &alerts)?;
    Ok(())
}

fn write_detailed_report(state: &Arc<AppState>) -> anyhow::Result<()> {
    let wallets: Vec<_> = state.wallets.read().values().cloned().collect();
    let alerts = state.alerts.read();
    let blocked = state.blocked.read();
    let watchlist = state.watchlist.wallets();
    let circuit_snapshots = state.rpc.circuit_snapshots();

    let inputs = reporting::ReportInputs {
        wallets: &wallets,
        alerts: &alerts,
        blocked: &blocked,
        watchlist: &watchlist,
        circuit_snapshots: &circuit_snapshots,
        seen_signatures_count: state.state_store.seen_signatures_count(),
        uptime_seconds: state.uptime_seconds(),
        config: &state.config,
    };
    let report = reporting::build_detailed_report(&inputs);
    reporting::save_detailed_report(detailed_report_path(state), &report)?;
    Ok(())
}

fn detailed_report_path(state: &Arc<AppState>) -> String {
    format!("{}.detailed.json", state.config.paths.report_md.trim_end_matches(".md"))
}

async fn send_heartbeat(state: &Arc<AppState>, now: f64) {
    let mut details = HashMap::new();
    details.insert("watchlist".to_string(), state.watchlist.len().to_string());
    details.insert("uptime_s".to_string(), format!("{:.0}", state.uptime_seconds()));
    state.webhook.send_system_notification("heartbeat", "Wallet monitor heartbeat", &details, now).await;
}

fn now_unix() -> f64 {
    chrono::Utc::now().timestamp() as f64
}
