// =============================================================================
// RPC Client Fabric — §4.1
// =============================================================================
//
// Talks Solana JSON-RPC to one of several configured endpoints. Endpoint
// selection round-robins across an ordered list; each endpoint has its own
// `CircuitBreaker` (rpc::circuit). Retries use the same jittered exponential
// backoff for every transient failure. A fixture-mode switch diverts every
// call to a filesystem tree so the rest of the pipeline can be exercised
// deterministically without live RPC access.
//
// Shaped after the existing REST client: a `reqwest::Client` held behind a
// small struct, `#[instrument]`-annotated public methods, `anyhow::Context`
// on every fallible step.
// =============================================================================

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Context, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, instrument, warn};

use super::circuit::{CircuitBreaker, CircuitSnapshot};
use crate::runtime_config::RpcConfig;

/// One transaction signature entry from `getSignaturesForAddress`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignatureInfo {
    pub signature: String,
    pub slot: u64,
    #[serde(default)]
    pub err: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TokenBalance {
    #[serde(rename = "accountIndex")]
    pub account_index: usize,
    pub owner: Option<String>,
    pub mint: String,
    #[serde(rename = "uiTokenAmount")]
    pub ui_token_amount: UiTokenAmount,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UiTokenAmount {
    #[serde(rename = "uiAmount")]
    pub ui_amount: Option<f64>,
    pub decimals: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CompiledInstruction {
    #[serde(rename = "programIdIndex")]
    pub program_id_index: usize,
    #[serde(default)]
    pub accounts: Vec<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct InnerInstructionGroup {
    pub index: usize,
    #[serde(default)]
    pub instructions: Vec<CompiledInstruction>,
}

/// The subset of a transaction's details the profit estimator needs: balance
/// deltas, token-balance deltas, fee, and the instruction graph for
/// counterparty/program extraction.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TxDetail {
    pub slot: u64,
    #[serde(rename = "accountKeys", default)]
    pub account_keys: Vec<String>,
    #[serde(rename = "preBalances", default)]
    pub pre_balances: Vec<u64>,
    #[serde(rename = "postBalances", default)]
    pub post_balances: Vec<u64>,
    #[serde(rename = "preTokenBalances", default)]
    pub pre_token_balances: Vec<TokenBalance>,
    #[serde(rename = "postTokenBalances", default)]
    pub post_token_balances: Vec<TokenBalance>,
    #[serde(default)]
    pub fee: Option<u64>,
    #[serde(rename = "innerInstructions", default)]
    pub inner_instructions: Vec<InnerInstructionGroup>,
    #[serde(default)]
    pub instructions: Vec<CompiledInstruction>,
}

/// Multi-endpoint JSON-RPC fabric with rotation, backoff and a per-endpoint
/// circuit breaker.
pub struct RpcFabric {
    endpoints: Vec<String>,
    breakers: Vec<CircuitBreaker>,
    next: AtomicUsize,
    http: reqwest::Client,
    max_retries: u32,
    timeout_sec: f64,
    jitter_base: f64,
    jitter_max: f64,
    fixtures_dir: Option<PathBuf>,
}

impl RpcFabric {
    pub fn new(cfg: &RpcConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs_f64(cfg.timeout_sec.max(1.0)))
            .build()
            .expect("failed to build reqwest client");

        let breakers = cfg
            .endpoints
            .iter()
            .map(|e| CircuitBreaker::new(e.clone(), cfg.circuit_breaker_failures, cfg.circuit_breaker_pause_sec))
            .collect();

        let fixtures_dir = if cfg.mode == "fixtures" {
            Some(PathBuf::from(&cfg.fixtures_dir))
        } else {
            None
        };

        Self {
            endpoints: cfg.endpoints.clone(),
            breakers,
            next: AtomicUsize::new(0),
            http,
            max_retries: cfg.max_retries,
            timeout_sec: cfg.timeout_sec,
            jitter_base: cfg.jitter_base,
            jitter_max: cfg.jitter_max,
            fixtures_dir,
        }
    }

    pub fn circuit_snapshots(&self) -> Vec<CircuitSnapshot> {
        self.breakers.iter().map(|b| b.snapshot()).collect()
    }

    fn retry_delay(&self, attempt: u32) -> Duration {
        let backoff = self.jitter_base * 2f64.powi(attempt as i32);
        let jitter = rand::thread_rng().gen_range(0.0..self.jitter_max.max(0.0001));
        Duration::from_secs_f64((backoff + jitter).min(self.timeout_sec.max(backoff + jitter)))
    }

    /// Pick the next endpoint index whose breaker currently allows a call,
    /// round-robining from the last-used index. Falls back to the first
    /// endpoint if every breaker is open (still short-circuits inside the
    /// call itself).
    fn pick_endpoint(&self) -> usize {
        let start = self.next.fetch_add(1, Ordering::Relaxed) % self.endpoints.len().max(1);
        for offset in 0..self.endpoints.len() {
            let idx = (start + offset) % self.endpoints.len();
            if self.breakers[idx].allow_call() {
                return idx;
            }
        }
        start
    }

    #[instrument(skip(self, params), name = "rpc::call")]
    async fn call_jsonrpc(&self, method: &str, params: Value) -> Result<Value> {
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            let idx = self.pick_endpoint();
            if !self.breakers[idx].allow_call() {
                last_err = Some(anyhow::anyhow!("endpoint {} circuit open", self.endpoints[idx]));
                tokio::time::sleep(self.retry_delay(attempt)).await;
                continue;
            }

            let body = json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": method,
                "params": params.clone(),
            });

            let result = self.http.post(&self.endpoints[idx]).json(&body).send().await.context("rpc request failed");

            match result {
                Ok(resp) if resp.status().is_success() => {
                    let parsed: Value = resp.json().await.context("rpc response was not valid JSON")?;
                    if let Some(err) = parsed.get("error") {
                        self.breakers[idx].record_failure();
                        last_err = Some(anyhow::anyhow!("rpc error from {}: {err}", self.endpoints[idx]));
                    } else {
                        self.breakers[idx].record_success();
                        return Ok(parsed.get("result").cloned().unwrap_or(Value::Null));
                    }
                }
                Ok(resp) => {
                    let tripped = self.breakers[idx].record_failure();
                    if tripped {
                        warn!(endpoint = %self.endpoints[idx], "circuit breaker opened");
                    }
                    last_err = Some(anyhow::anyhow!("rpc http status {}", resp.status()));
                }
                Err(err) => {
                    self.breakers[idx].record_failure();
                    last_err = Some(err);
                }
            }

            if attempt < self.max_retries {
                tokio::time::sleep(self.retry_delay(attempt)).await;
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow::anyhow!("rpc call exhausted retries with no endpoints")))
    }

    #[instrument(skip(self), name = "rpc::get_signatures_for_address")]
    pub async fn get_signatures_for_address(&self, address: &str, limit: usize) -> Result<Vec<SignatureInfo>> {
        if let Some(dir) = &self.fixtures_dir {
            return self.fixture_signatures(dir, address);
        }

        let params = json!([address, { "limit": limit }]);
        let value = self.call_jsonrpc("getSignaturesForAddress", params).await?;
        let sigs: Vec<SignatureInfo> = serde_json::from_value(value).unwrap_or_default();
        debug!(address, count = sigs.len(), "fetched signatures");
        Ok(sigs)
    }

    #[instrument(skip(self), name = "rpc::get_transaction")]
    pub async fn get_transaction(&self, signature: &str) -> Result<Option<TxDetail>> {
        if let Some(dir) = &self.fixtures_dir {
            return self.fixture_transaction(dir, signature);
        }

        let params = json!([
            signature,
            { "encoding": "jsonParsed", "maxSupportedTransactionVersion": 0 }
        ]);
        let value = self.call_jsonrpc("getTransaction", params).await?;
        if value.is_null() {
            return Ok(None);
        }
        let detail = Self::parse_tx_detail(&value);
        Ok(detail)
    }

    fn parse_tx_detail(value: &Value) -> Option<TxDetail> {
        let meta = value.get("meta")?;
        let slot = value.get("slot").and_then(Value::as_u64).unwrap_or_default();
        let account_keys = value
            .pointer("/transaction/message/accountKeys")
            .and_then(Value::as_array)
            .map(|arr| {
                arr.iter()
                    .map(|k| {
                        k.get("pubkey")
                            .and_then(Value::as_str)
                            .map(str::to_string)
                            .unwrap_or_else(|| k.as_str().unwrap_or_default().to_string())
                    })
                    .collect()
            })
            .unwrap_or_default();

        let pre_balances = meta.get("preBalances").and_then(Value::as_array).map(|a| {
            a.iter().filter_map(Value::as_u64).collect()
        }).unwrap_or_default();
        let post_balances = meta.get("postBalances").and_then(Value::as_array).map(|a| {
            a.iter().filter_map(Value::as_u64).collect()
        }).unwrap_or_default();

        let pre_token_balances: Vec<TokenBalance> = meta
            .get("preTokenBalances")
            .cloned()
            .map(|v| serde_json::from_value(v).unwrap_or_default())
            .unwrap_or_default();
        let post_token_balances: Vec<TokenBalance> = meta
            .get("postTokenBalances")
            .cloned()
            .map(|v| serde_json::from_value(v).unwrap_or_default())
            .unwrap_or_default();

        let fee = meta.get("fee").and_then(Value::as_u64);

        let inner_instructions: Vec<InnerInstructionGroup> = meta
            .get("innerInstructions")
            .cloned()
            .map(|v| serde_json::from_value(v).unwrap_or_default())
            .unwrap_or_default();

        let instructions: Vec<CompiledInstruction> = value
            .pointer("/transaction/message/instructions")
            .cloned()
            .map(|v| serde_json::from_value(v).unwrap_or_default())
            .unwrap_or_default();

        Some(TxDetail {
            slot,
            account_keys,
            pre_balances,
            post_balances,
            pre_token_balances,
            post_token_balances,
            fee,
            inner_instructions,
            instructions,
        })
    }

    fn fixture_signatures(&self, dir: &PathBuf, address: &str) -> Result<Vec<SignatureInfo>> {
        let path = dir.join("signatures").join(format!("{address}.json"));
        match std::fs::read_to_string(&path) {
            Ok(content) => {
                let sigs: Vec<SignatureInfo> = serde_json::from_str(&content)
                    .with_context(|| format!("malformed fixture at {}", path.display()))?;
                Ok(sigs)
            }
            Err(_) => Ok(Vec::new()),
        }
    }

    fn fixture_transaction(&self, dir: &PathBuf, signature: &str) -> Result<Option<TxDetail>> {
        let path = dir.join("transactions").join(format!("{signature}.json"));
        match std::fs::read_to_string(&path) {
            Ok(content) => {
                let value: Value = serde_json::from_str(&content)
                    .with_context(|| format!("malformed fixture at {}", path.display()))?;
                Ok(Self::parse_tx_detail(&value))
            }
            Err(_) => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> RpcConfig {
        RpcConfig {
            endpoints: vec!["https://a.example".to_string(), "https://b.example".to_string()],
            timeout_sec: 2.5,
            max_retries: 3,
            circuit_breaker_failures: 3,
            circuit_breaker_pause_sec: 5.0,
            jitter_base: 0.01,
            jitter_max: 0.01,
            mode: "live".to_string(),
            fixtures_dir: "tests/fixtures".to_string(),
        }
    }

    #[test]
    fn round_robins_across_endpoints() {
        let fabric = RpcFabric::new(&cfg());
        let first = fabric.pick_endpoint();
        let second = fabric.pick_endpoint();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn fixture_mode_returns_empty_when_file_absent() {
        let mut c = cfg();
        c.mode = "fixtures".to_string();
        c.fixtures_dir = "tests/fixtures_that_do_not_exist".to_string();
        let fabric = RpcFabric::new(&c);
        let sigs = fabric.get_signatures_for_address("SomeWallet", 20).await.unwrap();
        assert!(sigs.is_empty());
        let tx = fabric.get_transaction("SomeSig").await.unwrap();
        assert!(tx.is_none());
    }
}
