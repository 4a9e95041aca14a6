// =============================================================================
// Profit Estimator — §4.3
// =============================================================================
//
// Reconstructs a signed profit in the canonical unit (SOL) from balance
// deltas, token-balance deltas, and fees, and derives a coarse confidence
// label from four measurable sub-metrics. Ported from the reference
// implementation's `estimate_profit_enriched`, in the idiom of the rest of
// this crate: a plain async function over the RPC fabric and price cache,
// no hidden module-level state.
// =============================================================================

use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use crate::pricing::{PriceCache, WSOL_MINT};
use crate::rpc::{RpcFabric, TxDetail};
use crate::types::Confidence;

/// Inputs to the confidence model, also surfaced to elite-tier API
/// consumers (§4.8).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SubMetrics {
    pub price_coverage: f64,
    pub route_complexity: f64,
    pub fee_completeness: f64,
    pub balance_alignment: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfitResult {
    pub profit: f64,
    pub confidence: Confidence,
    pub counterparties: Vec<String>,
    pub programs: Vec<String>,
    pub sub_metrics: SubMetrics,
    /// The signature used to reconstruct this result's deltas — the last
    /// one successfully processed, used as the alert's primary signature.
    pub primary_signature: Option<String>,
}

impl ProfitResult {
    fn zero() -> Self {
        Self {
            profit: 0.0,
            confidence: Confidence::Low,
            counterparties: Vec::new(),
            programs: Vec::new(),
            sub_metrics: SubMetrics {
                price_coverage: 1.0,
                route_complexity: 0.0,
                fee_completeness: 0.0,
                balance_alignment: 0.0,
            },
            primary_signature: None,
        }
    }
}

/// Fetch a transaction's detail, retrying up to `extra_retries` additional
/// times on transient RPC failure before giving up on this one signature.
async fn fetch_with_retry(rpc: &RpcFabric, signature: &str, extra_retries: u32) -> Option<TxDetail> {
    for attempt in 0..=extra_retries {
        match rpc.get_transaction(signature).await {
            Ok(detail) => return detail,
            Err(err) => {
                warn!(signature, attempt, error = %err, "get_transaction failed, retrying");
                if attempt < extra_retries {
                    let delay_ms = 100u64 * 2u64.pow(attempt);
                    tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
                }
            }
        }
    }
    None
}

fn native_delta(wallet: &str, tx: &TxDetail) -> Option<f64> {
    let idx = tx.account_keys.iter().position(|k| k == wallet)?;
    let pre = *tx.pre_balances.get(idx)?;
    let post = *tx.post_balances.get(idx)?;
    Some((post as i128 - pre as i128) as f64 / 1e9)
}

fn token_delta_sum(wallet: &str, tx: &TxDetail, mint: &str) -> f64 {
    let mut by_index: std::collections::HashMap<usize, f64> = std::collections::HashMap::new();
    for tb in &tx.pre_token_balances {
        if tb.mint == mint && tb.owner.as_deref() == Some(wallet) {
            *by_index.entry(tb.account_index).or_insert(0.0) -= tb.ui_token_amount.ui_amount.unwrap_or(0.0);
        }
    }
    for tb in &tx.post_token_balances {
        if tb.mint == mint && tb.owner.as_deref() == Some(wallet) {
            *by_index.entry(tb.account_index).or_insert(0.0) += tb.ui_token_amount.ui_amount.unwrap_or(0.0);
        }
    }
    by_index.values().sum()
}

/// All (mint, delta) pairs for tokens other than the wrapped-native mint
/// that the wallet's balance actually moved in, within this transaction.
fn priced_token_deltas(wallet: &str, tx: &TxDetail) -> Vec<(String, f64)> {
    let mut mints: std::collections::HashSet<String> = std::collections::HashSet::new();
    for tb in tx.pre_token_balances.iter().chain(tx.post_token_balances.iter()) {
        if tb.owner.as_deref() == Some(wallet) && tb.mint != WSOL_MINT {
            mints.insert(tb.mint.clone());
        }
    }
    mints
        .into_iter()
        .map(|mint| {
            let delta = token_delta_sum(wallet, tx, &mint);
            (mint, delta)
        })
        .filter(|(_, delta)| delta.abs() > f64::EPSILON)
        .collect()
}

fn counterparties_and_programs(wallet: &str, tx: &TxDetail) -> (Vec<String>, Vec<String>) {
    let mut programs = std::collections::HashSet::new();
    let mut program_indices = std::collections::HashSet::new();

    for ix in &tx.instructions {
        if let Some(key) = tx.account_keys.get(ix.program_id_index) {
            programs.insert(key.clone());
            program_indices.insert(ix.program_id_index);
        }
    }
    for group in &tx.inner_instructions {
        for ix in &group.instructions {
            if let Some(key) = tx.account_keys.get(ix.program_id_index) {
                programs.insert(key.clone());
                program_indices.insert(ix.program_id_index);
            }
        }
    }

    let counterparties = tx
        .account_keys
        .iter()
        .enumerate()
        .filter(|(i, key)| *key != wallet && !program_indices.contains(i))
        .map(|(_, key)| key.clone())
        .collect();

    (counterparties, programs.into_iter().collect())
}

/// Given a wallet and a batch of signatures, reconstruct an aggregate
/// profit, confidence label, and observed counterparties/programs.
#[instrument(skip(rpc, price_cache), fields(wallet = %wallet, batch = signatures.len()))]
pub async fn estimate_profit(
    wallet: &str,
    signatures: &[String],
    max_tx: usize,
    rpc: &RpcFabric,
    price_cache: &PriceCache,
    balance_tolerance_pct: f64,
) -> ProfitResult {
    let mut profit = 0.0;
    let mut sol_delta_sum = 0.0;
    let mut token_delta_sum_abs = 0.0;
    let mut fee_total = 0.0;
    let mut fee_known = true;
    let mut total_inner_inst = 0usize;
    let mut total_tokens = 0usize;
    let mut priced_tokens = 0usize;
    let mut counterparties = std::collections::HashSet::new();
    let mut programs = std::collections::HashSet::new();
    let mut processed = 0usize;
    let mut found_wallet_anywhere = false;
    let mut primary_signature = None;

    for signature in signatures.iter().take(max_tx) {
        let Some(tx) = fetch_with_retry(rpc, signature, 2).await else {
            continue;
        };
        processed += 1;

        if let Some(delta) = native_delta(wallet, &tx) {
            found_wallet_anywhere = true;
            profit += delta;
            sol_delta_sum += delta.abs();
        }

        let wrapped_delta = token_delta_sum(wallet, &tx, WSOL_MINT);
        if wrapped_delta.abs() > f64::EPSILON {
            found_wallet_anywhere = true;
        }
        profit += wrapped_delta;
        sol_delta_sum += wrapped_delta.abs();

        for (mint, delta) in priced_token_deltas(wallet, &tx) {
            total_tokens += 1;
            match price_cache.resolve(&mint).await {
                Some(price) => {
                    priced_tokens += 1;
                    profit += delta * price;
                    token_delta_sum_abs += (delta * price).abs();
                }
                None => {
                    // unpriced: excluded from profit, lowers price_coverage
                }
            }
        }

        match tx.fee {
            Some(fee) => fee_total += fee as f64 / 1e9,
            None => fee_known = false,
        }

        total_inner_inst += tx.inner_instructions.iter().map(|g| g.instructions.len()).sum::<usize>();

        let (cps, progs) = counterparties_and_programs(wallet, &tx);
        counterparties.extend(cps);
        programs.extend(progs);

        primary_signature = Some(signature.clone());
    }

    profit -= fee_total;

    if processed == 0 || !found_wallet_anywhere {
        return ProfitResult::zero();
    }

    let price_coverage = if total_tokens > 0 {
        priced_tokens as f64 / total_tokens as f64
    } else {
        1.0
    };
    let route_complexity = (total_inner_inst as f64 / processed.max(1) as f64).min(10.0);
    let fee_completeness = if fee_known { 1.0 } else { 0.0 };

    let total_valorized = sol_delta_sum + token_delta_sum_abs;
    let total_observed = profit.abs() + fee_total;
    let tolerance = balance_tolerance_pct / 100.0;
    let eps = 1e-9;
    let balance_alignment = if (total_valorized - total_observed).abs() / total_valorized.max(eps) <= tolerance {
        1.0
    } else {
        0.5
    };

    let mut score = 2i32;
    if price_coverage < 0.7 || route_complexity > 5.0 {
        score -= 1;
    }
    if fee_completeness < 1.0 || balance_alignment < 0.8 {
        score -= 1;
    }
    let confidence = Confidence::from_score(score);

    ProfitResult {
        profit,
        confidence,
        counterparties: counterparties.into_iter().collect(),
        programs: programs.into_iter().collect(),
        sub_metrics: SubMetrics {
            price_coverage,
            route_complexity,
            fee_completeness,
            balance_alignment,
        },
        primary_signature,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::{CompiledInstruction, TokenBalance, UiTokenAmount};

    fn wallet() -> &'static str {
        "WalletAddr1111111111111111111111111111111"
    }

    fn basic_tx(native_delta_lamports: i64, fee: Option<u64>) -> TxDetail {
        let w = wallet().to_string();
        let pre = 1_000_000_000u64;
        let post = (pre as i64 + native_delta_lamports) as u64;
        TxDetail {
            slot: 100,
            account_keys: vec![w, "Prog1111111111111111111111111111111111111".to_string()],
            pre_balances: vec![pre, 0],
            post_balances: vec![post, 0],
            pre_token_balances: vec![],
            post_token_balances: vec![],
            fee,
            inner_instructions: vec![],
            instructions: vec![CompiledInstruction { program_id_index: 1, accounts: vec![0] }],
        }
    }

    fn wrapped_native_tx(delta: f64, fee: Option<u64>) -> TxDetail {
        let w = wallet().to_string();
        TxDetail {
            slot: 101,
            account_keys: vec![w.clone(), "Prog1111111111111111111111111111111111111".to_string()],
            pre_balances: vec![1_000_000_000, 0],
            post_balances: vec![1_000_000_000, 0],
            pre_token_balances: vec![TokenBalance {
                account_index: 0,
                owner: Some(w.clone()),
                mint: WSOL_MINT.to_string(),
                ui_token_amount: UiTokenAmount { ui_amount: Some(0.0), decimals: 9 },
            }],
            post_token_balances: vec![TokenBalance {
                account_index: 0,
                owner: Some(w),
                mint: WSOL_MINT.to_string(),
                ui_token_amount: UiTokenAmount { ui_amount: Some(delta), decimals: 9 },
            }],
            fee,
            inner_instructions: vec![],
            instructions: vec![CompiledInstruction { program_id_index: 1, accounts: vec![0] }],
        }
    }

    struct FixtureRpc;

    #[test]
    fn native_delta_parity_with_wrapped_native() {
        let native_tx = basic_tx(3_000_000_000, Some(5000));
        let wrapped_tx = wrapped_native_tx(3.0, Some(5000));

        let native_profit = native_delta(wallet(), &native_tx).unwrap() - 5000.0 / 1e9;
        let wrapped_profit = token_delta_sum(wallet(), &wrapped_tx, WSOL_MINT) - 5000.0 / 1e9;

        assert!((native_profit - wrapped_profit).abs() < 1e-9);
        assert!((native_profit - 2.999995).abs() < 1e-6);
    }

    #[test]
    fn counterparties_exclude_wallet_and_programs() {
        let w = wallet().to_string();
        let tx = TxDetail {
            slot: 1,
            account_keys: vec![w.clone(), "Prog".to_string(), "Counterparty".to_string()],
            pre_balances: vec![0, 0, 0],
            post_balances: vec![0, 0, 0],
            pre_token_balances: vec![],
            post_token_balances: vec![],
            fee: Some(5000),
            inner_instructions: vec![],
            instructions: vec![CompiledInstruction { program_id_index: 1, accounts: vec![0, 2] }],
        };
        let (cps, progs) = counterparties_and_programs(&w, &tx);
        assert_eq!(cps, vec!["Counterparty".to_string()]);
        assert_eq!(progs, vec!["Prog".to_string()]);
    }

    #[test]
    fn zero_result_has_low_confidence() {
        let z = ProfitResult::zero();
        assert_eq!(z.confidence, Confidence::Low);
        assert_eq!(z.profit, 0.0);
    }
}
