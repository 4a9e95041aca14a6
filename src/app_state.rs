// =============================================================================
// Central Application State — Wallet Monitor
// =============================================================================
//
// The single source of truth tying every subsystem together: the RPC
// fabric, price cache, state store, watchlist, alert/blocked rings, API key
// store, rate limiter and webhook fan-out all hang off one `Arc<AppState>`
// shared between the scheduler loop and the Axum routers. Ported from the
// reference implementation's module-level globals (`WALLETS`, `ALERTS`,
// `BLOCKED_ALERTS`, `PROFIT_HISTORY`) collapsed into a single struct in the
// teacher's central-state idiom.
// =============================================================================

use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::Deserialize;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use crate::alert_engine::{Alert, BlockedAlert, ScanContext, Wallet};
use crate::auth::ApiKeyStore;
use crate::metrics::Metrics;
use crate::pricing::{BirdeyePriceSource, JupiterPriceSource, PriceCache, PriceSource};
use crate::rate_limit::RateLimiter;
use crate::rpc::RpcFabric;
use crate::runtime_config::RuntimeConfig;
use crate::state_store::StateStore;
use crate::watchlist::WatchlistManager;
use crate::webhook::WebhookFanout;

/// Central application state shared across the scheduler and the API
/// routers via `Arc<AppState>`.
pub struct AppState {
    pub config: RuntimeConfig,

    pub rpc: Arc<RpcFabric>,
    pub price_cache: Arc<PriceCache>,
    pub state_store: Arc<StateStore>,
    pub watchlist: Arc<WatchlistManager>,
    pub metrics: Arc<Metrics>,
    pub api_keys: Arc<ApiKeyStore>,
    pub rate_limiter: Arc<RateLimiter>,
    pub webhook: Arc<WebhookFanout>,

    pub wallets: Arc<RwLock<HashMap<String, Wallet>>>,
    pub profit_history: Arc<RwLock<HashMap<String, VecDeque<f64>>>>,
    pub alerts: Arc<RwLock<VecDeque<Alert>>>,
    pub blocked: Arc<RwLock<VecDeque<BlockedAlert>>>,

    pub scan_semaphore: Arc<Semaphore>,

    pub start_time: std::time::Instant,
}

/// One entry of the wallet seed file (§1: format is out of scope, so this
/// only reads the handful of fields the scan loop and watchlist need).
#[derive(Debug, Deserialize)]
struct SeedWallet {
    wallet: String,
    #[serde(default)]
    net_total: f64,
    #[serde(default)]
    win_rate: f64,
    #[serde(default)]
    dex: String,
}

#[derive(Debug, Deserialize)]
struct SeedFile {
    #[serde(default)]
    wallets: Vec<SeedWallet>,
}

/// Load the wallet baseline map and the candidates that should populate the
/// initial watchlist from the seed file at `path`. A missing or unreadable
/// file is not an error: the service starts with an empty watchlist and
/// grows it purely through auto-promotion.
fn load_seed_wallets(path: &Path) -> (HashMap<String, Wallet>, Vec<String>) {
    let mut wallets = HashMap::new();
    let mut candidates = Vec::new();

    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "no wallet seed file, starting with an empty watchlist");
            return (wallets, candidates);
        }
    };

    let seed: SeedFile = match serde_json::from_str(&raw) {
        Ok(seed) => seed,
        Err(err) => {
            warn!(path = %path.display(), error = %err, "malformed wallet seed file, starting with an empty watchlist");
            return (wallets, candidates);
        }
    };

    for entry in seed.wallets {
        candidates.push((entry.wallet.clone(), entry.net_total, entry.win_rate));
        wallets.insert(
            entry.wallet.clone(),
            Wallet {
                address: entry.wallet,
                net_total: entry.net_total,
                win_rate: entry.win_rate,
                dex: if entry.dex.is_empty() { "Unknown".to_string() } else { entry.dex },
            },
        );
    }

    candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    (wallets, candidates.into_iter().map(|(addr, _, _)| addr).collect())
}

impl AppState {
    /// Construct the application state from `config`, loading the wallet
    /// seed file, the persisted scan/signature state, and the API key
    /// store. Fallible because `Metrics::new` registers Prometheus series
    /// that can fail to construct on name collision.
    pub fn new(config: RuntimeConfig) -> Result<Self> {
        let (wallets_map, candidates) = load_seed_wallets(Path::new(&config.paths.data_file));
        let initial_watchlist: Vec<String> = candidates
            .into_iter()
            .filter(|addr| {
                wallets_map.get(addr).is_some_and(|w| {
                    w.net_total >= config.alerting.gain_filter && w.win_rate >= config.alerting.win_rate_filter
                })
            })
            .take(config.alerting.watchlist_max_size)
            .collect();

        info!(
            seeded = wallets_map.len(),
            watching = initial_watchlist.len(),
            "loaded wallet seed file"
        );

        let rpc = Arc::new(RpcFabric::new(&config.rpc));

        let mut sources: Vec<Box<dyn PriceSource>> = vec![Box::new(JupiterPriceSource::new())];
        if let Some(api_key) = config.pricing.birdeye_api_key.clone() {
            sources.push(Box::new(BirdeyePriceSource::new(api_key, config.pricing.fallback_sol_usd)));
        }
        let price_cache = Arc::new(PriceCache::new(sources, config.pricing.price_ttl_seconds));

        let state_store = Arc::new(StateStore::new(
            config.paths.state_file.clone(),
            config.alerting.state_ttl_seconds as f64,
            config.alerting.max_seen_signatures,
        ));
        state_store.load(now_unix());

        let watchlist = Arc::new(WatchlistManager::seeded(
            config.alerting.watchlist_max_size,
            initial_watchlist,
            now_unix(),
        ));

        let metrics = Arc::new(Metrics::new().context("failed to register metrics")?);

        let api_keys = Arc::new(ApiKeyStore::new(config.billing.api_keys_file.clone()));
        api_keys.load();
        metrics.set_active_subscriptions(&api_keys.active_subscription_counts());

        let rate_limiter = Arc::new(RateLimiter::new(
            config.api.rate_limit_free,
            config.api.rate_limit_pro,
            config.api.rate_limit_elite,
        ));

        let webhook = Arc::new(WebhookFanout::new(
            if config.discord_webhook.is_empty() { None } else { Some(config.discord_webhook.clone()) },
            config.alerting.dry_run,
            config.alerting.include_paywall_prompt,
        ));

        let scan_semaphore = Arc::new(Semaphore::new(config.loop_cfg.max_concurrency));

        Ok(Self {
            rpc,
            price_cache,
            state_store,
            watchlist,
            metrics,
            api_keys,
            rate_limiter,
            webhook,
            wallets: Arc::new(RwLock::new(wallets_map)),
            profit_history: Arc::new(RwLock::new(HashMap::new())),
            alerts: Arc::new(RwLock::new(VecDeque::new())),
            blocked: Arc::new(RwLock::new(VecDeque::new())),
            scan_semaphore,
            start_time: std::time::Instant::now(),
            config,
        })
    }

    /// Build the per-iteration scan context handed to `alert_engine::scan_wallet`.
    pub fn scan_context(&self) -> ScanContext {
        ScanContext {
            rpc: self.rpc.clone(),
            price_cache: self.price_cache.clone(),
            state: self.state_store.clone(),
            watchlist: self.watchlist.clone(),
            metrics: self.metrics.clone(),
            semaphore: self.scan_semaphore.clone(),
            cfg: self.config.alerting.clone(),
            tx_lookback: self.config.loop_cfg.tx_lookback,
            wallets: self.wallets.clone(),
            profit_history: self.profit_history.clone(),
            alerts: self.alerts.clone(),
            blocked: self.blocked.clone(),
        }
    }

    pub fn uptime_seconds(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }

    /// Persist scan/signature state and the API key store. Called on the
    /// snapshot cadence and once more at shutdown.
    pub fn persist(&self) -> Result<()> {
        self.state_store.save().context("failed to save state store")?;
        self.api_keys.save().context("failed to save api key store")?;
        Ok(())
    }
}

fn now_unix() -> f64 {
    chrono::Utc::now().timestamp() as f64
}
