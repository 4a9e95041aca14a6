// =============================================================================
// Runtime Configuration — service settings with atomic save
// =============================================================================
//
// Central configuration hub. Every tunable parameter named in the
// configuration surface lives here, grouped the way the surface groups them:
// filters, cadence, buffers, RPC, pricing, auth, modes, billing, paths.
//
// Values are read from the environment once at startup; every field carries
// a `#[serde(default = "...")]` function so a config file missing fields
// (e.g. written by an older version) still loads. Persistence uses an atomic
// tmp + rename pattern to prevent corruption on crash.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

fn env_list(name: &str, default: Vec<String>) -> Vec<String> {
    match std::env::var(name) {
        Ok(v) => v
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Err(_) => default,
    }
}

fn env_string(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

// --- default-value functions, required by serde's `default = "fn"` form ---

fn default_rpc_endpoints() -> Vec<String> {
    vec!["https://api.mainnet-beta.solana.com".to_string()]
}
fn default_rpc_timeout_sec() -> f64 {
    2.5
}
fn default_rpc_max_retries() -> u32 {
    3
}
fn default_circuit_breaker_failures() -> u32 {
    3
}
fn default_circuit_breaker_pause_sec() -> f64 {
    5.0
}
fn default_jitter_base() -> f64 {
    0.5
}
fn default_jitter_max() -> f64 {
    0.2
}

fn default_profit_threshold() -> f64 {
    2.0
}
fn default_gain_filter() -> f64 {
    5.0
}
fn default_win_rate_filter() -> f64 {
    80.0
}
fn default_cooldown_sec() -> i64 {
    300
}
fn default_new_wallet_gain() -> f64 {
    7.0
}
fn default_new_wallet_min_trx() -> usize {
    12
}
fn default_watchlist_max_size() -> usize {
    100
}
fn default_alert_batch_size() -> usize {
    10
}
fn default_state_ttl_seconds() -> i64 {
    3600
}
fn default_max_seen_signatures() -> usize {
    50_000
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}

fn default_tx_refresh_seconds() -> u64 {
    60
}
fn default_tx_lookback() -> usize {
    20
}
fn default_report_refresh_seconds() -> u64 {
    600
}
fn default_heartbeat_interval_seconds() -> u64 {
    300
}
fn default_max_concurrency() -> usize {
    10
}

fn default_balance_tolerance_pct() -> f64 {
    10.0
}
fn default_fallback_sol_usd() -> f64 {
    150.0
}

fn default_rate_limit_free() -> u32 {
    10
}
fn default_rate_limit_pro() -> u32 {
    1_000
}
fn default_rate_limit_elite() -> u32 {
    10_000
}
fn default_api_host() -> String {
    "0.0.0.0".to_string()
}
fn default_api_port() -> u16 {
    8002
}
fn default_health_port() -> u16 {
    8000
}

fn default_rpc_mode() -> String {
    "live".to_string()
}
fn default_data_file() -> String {
    "data/wallets.json".to_string()
}
fn default_state_file() -> String {
    "wallet_monitor_state.json".to_string()
}
fn default_fixtures_dir() -> String {
    "tests/fixtures".to_string()
}
fn default_dashboard_csv() -> String {
    "wallet_dashboard_live.csv".to_string()
}
fn default_report_md() -> String {
    "wallet_report.md".to_string()
}
fn default_api_keys_file() -> String {
    "daas_api_keys.json".to_string()
}
fn default_log_max_bytes() -> u64 {
    10_000_000
}

/// RPC fabric tunables (§4.1, §6 "RPC").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcConfig {
    #[serde(default = "default_rpc_endpoints")]
    pub endpoints: Vec<String>,
    #[serde(default = "default_rpc_timeout_sec")]
    pub timeout_sec: f64,
    #[serde(default = "default_rpc_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_circuit_breaker_failures")]
    pub circuit_breaker_failures: u32,
    #[serde(default = "default_circuit_breaker_pause_sec")]
    pub circuit_breaker_pause_sec: f64,
    #[serde(default = "default_jitter_base")]
    pub jitter_base: f64,
    #[serde(default = "default_jitter_max")]
    pub jitter_max: f64,
    /// "live" or "fixtures" (§4.1 fixture mode).
    #[serde(default = "default_rpc_mode")]
    pub mode: String,
    #[serde(default = "default_fixtures_dir")]
    pub fixtures_dir: String,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self {
            endpoints: default_rpc_endpoints(),
            timeout_sec: default_rpc_timeout_sec(),
            max_retries: default_rpc_max_retries(),
            circuit_breaker_failures: default_circuit_breaker_failures(),
            circuit_breaker_pause_sec: default_circuit_breaker_pause_sec(),
            jitter_base: default_jitter_base(),
            jitter_max: default_jitter_max(),
            mode: default_rpc_mode(),
            fixtures_dir: default_fixtures_dir(),
        }
    }
}

/// Alert-gauntlet and buffer tunables (§4.5, §6 "Filters"/"Buffers").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertingConfig {
    #[serde(default = "default_profit_threshold")]
    pub profit_threshold: f64,
    #[serde(default = "default_gain_filter")]
    pub gain_filter: f64,
    #[serde(default = "default_win_rate_filter")]
    pub win_rate_filter: f64,
    #[serde(default = "default_cooldown_sec")]
    pub cooldown_sec: i64,
    #[serde(default = "default_new_wallet_gain")]
    pub new_wallet_gain: f64,
    #[serde(default = "default_new_wallet_min_trx")]
    pub new_wallet_min_trx: usize,
    #[serde(default = "default_watchlist_max_size")]
    pub watchlist_max_size: usize,
    #[serde(default = "default_alert_batch_size")]
    pub alert_batch_size: usize,
    #[serde(default = "default_state_ttl_seconds")]
    pub state_ttl_seconds: i64,
    #[serde(default = "default_max_seen_signatures")]
    pub max_seen_signatures: usize,
    /// Default true: no outbound side effects (webhooks) until explicitly
    /// disabled. See SPEC_FULL.md §9 open-question resolution.
    #[serde(default = "default_true")]
    pub dry_run: bool,
    #[serde(default = "default_true")]
    pub include_paywall_prompt: bool,
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            profit_threshold: default_profit_threshold(),
            gain_filter: default_gain_filter(),
            win_rate_filter: default_win_rate_filter(),
            cooldown_sec: default_cooldown_sec(),
            new_wallet_gain: default_new_wallet_gain(),
            new_wallet_min_trx: default_new_wallet_min_trx(),
            watchlist_max_size: default_watchlist_max_size(),
            alert_batch_size: default_alert_batch_size(),
            state_ttl_seconds: default_state_ttl_seconds(),
            max_seen_signatures: default_max_seen_signatures(),
            dry_run: true,
            include_paywall_prompt: true,
        }
    }
}

/// Scheduler cadence (§4.10, §6 "Cadence").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    #[serde(default = "default_tx_refresh_seconds")]
    pub tx_refresh_seconds: u64,
    #[serde(default = "default_tx_lookback")]
    pub tx_lookback: usize,
    #[serde(default = "default_report_refresh_seconds")]
    pub report_refresh_seconds: u64,
    #[serde(default = "default_heartbeat_interval_seconds")]
    pub heartbeat_interval_seconds: u64,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            tx_refresh_seconds: default_tx_refresh_seconds(),
            tx_lookback: default_tx_lookback(),
            report_refresh_seconds: default_report_refresh_seconds(),
            heartbeat_interval_seconds: default_heartbeat_interval_seconds(),
            max_concurrency: default_max_concurrency(),
        }
    }
}

/// Pricing tunables (§4.2, §4.3, §6 "Pricing").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingConfig {
    #[serde(default = "default_balance_tolerance_pct")]
    pub balance_tolerance_pct: f64,
    #[serde(default)]
    pub birdeye_api_key: Option<String>,
    /// Resolves SPEC_FULL.md §9 open question: the approximate
    /// native-currency-in-fiat constant used by the secondary oracle's
    /// fallback path, exposed as configuration rather than hard-coded.
    #[serde(default = "default_fallback_sol_usd")]
    pub fallback_sol_usd: f64,
    #[serde(default = "default_price_ttl_seconds")]
    pub price_ttl_seconds: i64,
}

fn default_price_ttl_seconds() -> i64 {
    300
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            balance_tolerance_pct: default_balance_tolerance_pct(),
            birdeye_api_key: None,
            fallback_sol_usd: default_fallback_sol_usd(),
            price_ttl_seconds: default_price_ttl_seconds(),
        }
    }
}

/// API auth/rate-limit tunables (§4.7, §6 "Auth").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_rate_limit_free")]
    pub rate_limit_free: u32,
    #[serde(default = "default_rate_limit_pro")]
    pub rate_limit_pro: u32,
    #[serde(default = "default_rate_limit_elite")]
    pub rate_limit_elite: u32,
    #[serde(default = "default_api_host")]
    pub api_host: String,
    #[serde(default = "default_api_port")]
    pub api_port: u16,
    #[serde(default = "default_health_port")]
    pub health_port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            rate_limit_free: default_rate_limit_free(),
            rate_limit_pro: default_rate_limit_pro(),
            rate_limit_elite: default_rate_limit_elite(),
            api_host: default_api_host(),
            api_port: default_api_port(),
            health_port: default_health_port(),
        }
    }
}

/// Billing tunables (§6 "Billing").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingConfig {
    #[serde(default)]
    pub stripe_secret_key: String,
    #[serde(default)]
    pub stripe_webhook_secret: String,
    #[serde(default = "default_true")]
    pub fake_checkout_enabled: bool,
    #[serde(default = "default_api_keys_file")]
    pub api_keys_file: String,
}

impl Default for BillingConfig {
    fn default() -> Self {
        Self {
            stripe_secret_key: String::new(),
            stripe_webhook_secret: String::new(),
            fake_checkout_enabled: true,
            api_keys_file: default_api_keys_file(),
        }
    }
}

/// Filesystem paths (§6 "Reporting/paths").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_data_file")]
    pub data_file: String,
    #[serde(default = "default_state_file")]
    pub state_file: String,
    #[serde(default = "default_dashboard_csv")]
    pub dashboard_csv: String,
    #[serde(default = "default_report_md")]
    pub report_md: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_file: default_data_file(),
            state_file: default_state_file(),
            dashboard_csv: default_dashboard_csv(),
            report_md: default_report_md(),
        }
    }
}

/// Top-level service configuration. Every field has a serde default so an
/// older persisted config missing newer fields still deserializes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub rpc: RpcConfig,
    #[serde(default)]
    pub alerting: AlertingConfig,
    #[serde(default)]
    pub loop_cfg: LoopConfig,
    #[serde(default)]
    pub pricing: PricingConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub billing: BillingConfig,
    #[serde(default)]
    pub paths: PathsConfig,

    /// Webhook URL for alert + system-notification delivery. Empty disables
    /// delivery regardless of `dry_run`.
    #[serde(default)]
    pub discord_webhook: String,
    #[serde(default = "default_false")]
    pub copy_trader_enabled: bool,
    #[serde(default = "default_true")]
    pub daas_mode: bool,
    #[serde(default = "default_log_max_bytes")]
    pub log_max_bytes: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            rpc: RpcConfig::default(),
            alerting: AlertingConfig::default(),
            loop_cfg: LoopConfig::default(),
            pricing: PricingConfig::default(),
            api: ApiConfig::default(),
            billing: BillingConfig::default(),
            paths: PathsConfig::default(),
            discord_webhook: String::new(),
            copy_trader_enabled: false,
            daas_mode: true,
            log_max_bytes: default_log_max_bytes(),
        }
    }
}

impl RuntimeConfig {
    /// Build configuration from the process environment, falling back to
    /// defaults for anything unset. Unlike `load`, this never fails — a
    /// missing or malformed environment variable simply falls back.
    pub fn from_env() -> Self {
        Self {
            rpc: RpcConfig {
                endpoints: env_list("RPC_ENDPOINTS", default_rpc_endpoints()),
                timeout_sec: env_or("RPC_TIMEOUT_SEC", default_rpc_timeout_sec()),
                max_retries: env_or("RPC_MAX_RETRIES", default_rpc_max_retries()),
                circuit_breaker_failures: env_or(
                    "RPC_CIRCUIT_BREAKER_FAILURES",
                    default_circuit_breaker_failures(),
                ),
                circuit_breaker_pause_sec: env_or(
                    "RPC_CIRCUIT_BREAKER_PAUSE_SEC",
                    default_circuit_breaker_pause_sec(),
                ),
                jitter_base: env_or("RPC_RETRY_JITTER_BASE", default_jitter_base()),
                jitter_max: env_or("RPC_RETRY_JITTER_MAX", default_jitter_max()),
                mode: env_string("RPC_MODE", &default_rpc_mode()),
                fixtures_dir: env_string("FIXTURES_DIR", &default_fixtures_dir()),
            },
            alerting: AlertingConfig {
                profit_threshold: env_or("PROFIT_ALERT_THRESHOLD", default_profit_threshold()),
                gain_filter: env_or("GAIN_FILTER", default_gain_filter()),
                win_rate_filter: env_or("WIN_RATE_FILTER", default_win_rate_filter()),
                cooldown_sec: env_or("ALERT_COOLDOWN_SEC", default_cooldown_sec()),
                new_wallet_gain: env_or("NEW_WALLET_GAIN", default_new_wallet_gain()),
                new_wallet_min_trx: env_or("NEW_WALLET_MIN_TRX", default_new_wallet_min_trx()),
                watchlist_max_size: env_or("WATCHLIST_MAX_SIZE", default_watchlist_max_size()),
                alert_batch_size: env_or("ALERT_BATCH_SIZE", default_alert_batch_size()),
                state_ttl_seconds: env_or("STATE_TTL_SECONDS", default_state_ttl_seconds()),
                max_seen_signatures: env_or("MAX_SEEN_SIGNATURES", default_max_seen_signatures()),
                dry_run: env_bool("DRY_RUN", true),
                include_paywall_prompt: env_bool("INCLUDE_PAYWALL_PROMPT", true),
            },
            loop_cfg: LoopConfig {
                tx_refresh_seconds: env_or("TX_REFRESH_SECONDS", default_tx_refresh_seconds()),
                tx_lookback: env_or("TX_LOOKBACK", default_tx_lookback()),
                report_refresh_seconds: env_or(
                    "REPORT_REFRESH_SECONDS",
                    default_report_refresh_seconds(),
                ),
                heartbeat_interval_seconds: env_or(
                    "HEARTBEAT_INTERVAL_SECONDS",
                    default_heartbeat_interval_seconds(),
                ),
                max_concurrency: env_or("MAX_CONCURRENCY", default_max_concurrency()),
            },
            pricing: PricingConfig {
                balance_tolerance_pct: env_or(
                    "BALANCE_TOLERANCE_PCT",
                    default_balance_tolerance_pct(),
                ),
                birdeye_api_key: std::env::var("BIRDEYE_API_KEY").ok().filter(|s| !s.is_empty()),
                fallback_sol_usd: env_or("FALLBACK_SOL_USD", default_fallback_sol_usd()),
                price_ttl_seconds: env_or("PRICE_TTL_SECONDS", default_price_ttl_seconds()),
            },
            api: ApiConfig {
                rate_limit_free: env_or("RATE_LIMIT_FREE", default_rate_limit_free()),
                rate_limit_pro: env_or("RATE_LIMIT_PRO", default_rate_limit_pro()),
                rate_limit_elite: env_or("RATE_LIMIT_ELITE", default_rate_limit_elite()),
                api_host: env_string("API_HOST", &default_api_host()),
                api_port: env_or("API_PORT", default_api_port()),
                health_port: env_or("HEALTH_PORT", default_health_port()),
            },
            billing: BillingConfig {
                stripe_secret_key: env_string("STRIPE_SECRET_KEY", ""),
                stripe_webhook_secret: env_string("STRIPE_WEBHOOK_SECRET", ""),
                fake_checkout_enabled: env_bool("FAKE_CHECKOUT_ENABLED", true),
                api_keys_file: env_string("API_KEYS_FILE", &default_api_keys_file()),
            },
            paths: PathsConfig {
                data_file: env_string("DATA_FILE", &default_data_file()),
                state_file: env_string("STATE_FILE", &default_state_file()),
                dashboard_csv: env_string("DASHBOARD_CSV", &default_dashboard_csv()),
                report_md: env_string("REPORT_MD", &default_report_md()),
            },
            discord_webhook: env_string("DISCORD_WEBHOOK", ""),
            copy_trader_enabled: env_bool("COPY_TRADER_ENABLED", false),
            daas_mode: env_bool("DAAS_MODE", true),
            log_max_bytes: env_or("LOG_MAX_BYTES", default_log_max_bytes()),
        }
    }

    /// Load a previously persisted configuration snapshot from `path`. Used
    /// to recover manual control-surface overrides across a restart; falls
    /// back to `from_env` on any error.
    pub fn load_or_env(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str::<Self>(&content) {
                Ok(cfg) => {
                    info!(path = %path.display(), "runtime config loaded from snapshot");
                    cfg
                }
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "failed to parse persisted config, falling back to environment");
                    Self::from_env()
                }
            },
            Err(_) => Self::from_env(),
        }
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to a sibling temp file, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise runtime config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.rpc.endpoints, vec!["https://api.mainnet-beta.solana.com"]);
        assert_eq!(cfg.rpc.circuit_breaker_failures, 3);
        assert!((cfg.rpc.circuit_breaker_pause_sec - 5.0).abs() < f64::EPSILON);
        assert!(cfg.alerting.dry_run);
        assert_eq!(cfg.alerting.watchlist_max_size, 100);
        assert!((cfg.pricing.fallback_sol_usd - 150.0).abs() < f64::EPSILON);
        assert_eq!(cfg.api.rate_limit_free, 10);
        assert_eq!(cfg.api.rate_limit_elite, 10_000);
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(cfg.rpc.max_retries, 3);
        assert!(cfg.alerting.dry_run);
        assert_eq!(cfg.loop_cfg.tx_refresh_seconds, 60);
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "alerting": { "profit_threshold": 9.5 } }"#;
        let cfg: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert!((cfg.alerting.profit_threshold - 9.5).abs() < f64::EPSILON);
        assert_eq!(cfg.alerting.gain_filter, 5.0);
        assert_eq!(cfg.rpc.max_retries, 3);
    }

    #[test]
    fn roundtrip_serialisation() {
        let cfg = RuntimeConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: RuntimeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.rpc.endpoints, cfg2.rpc.endpoints);
        assert_eq!(cfg.alerting.watchlist_max_size, cfg2.alerting.watchlist_max_size);
    }

    #[test]
    fn from_env_falls_back_to_defaults_when_unset() {
        std::env::remove_var("PROFIT_ALERT_THRESHOLD");
        let cfg = RuntimeConfig::from_env();
        assert!((cfg.alerting.profit_threshold - 2.0).abs() < f64::EPSILON);
    }
}
