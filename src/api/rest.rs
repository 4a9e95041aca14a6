// =============================================================================
// Signal API Service — §4.8, §6 EXTERNAL INTERFACES
// =============================================================================
//
// HTTP endpoints for health, recent signals (tier-shaped), per-wallet score,
// and billing. Every data endpoint stamps `X-RateLimit-Remaining` /
// `X-RateLimit-Limit` on success as well as on 429, per §6. Ported from the
// reference implementation's Flask `api_service.py` handlers, in the Axum
// router/extractor idiom of the teacher's own REST module.
// =============================================================================

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::alert_engine::Alert;
use crate::api::auth::AuthenticatedKey;
use crate::app_state::AppState;
use crate::billing;
use crate::errors::ApiError;
use crate::types::Tier;

const HEALTH_STALENESS_SEC: f64 = 180.0;
const SIGNALS_PAGE_SIZE: usize = 100;
const DISCLAIMER: &str = "Data only, not financial advice";
const UPGRADE_HINT: &str = "Upgrade to pro or elite for win-rate, z-score, confidence and counterparty data";

/// Build the authenticated data-plane router: signals, score, billing.
/// Mounted alongside a public `/healthz` route.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/v1/signals", get(signals))
        .route("/api/v1/wallet/:address/score", get(wallet_score))
        .route("/api/v1/billing/webhook", post(billing_webhook))
        .route("/api/v1/billing/fake-checkout", post(fake_checkout))
        .layer(cors)
        .with_state(state)
}

/// The health-only router, meant to be bound on a distinct port for
/// liveness probes (§6 "Health (separate listener)").
pub fn health_router(state: Arc<AppState>) -> Router {
    Router::new().route("/healthz", get(healthz)).with_state(state)
}

/// §9 Design Notes: a single function shaping an alert's JSON payload by
/// tier, rather than branching formatting at each call site.
fn shape_alert_for_tier(alert: &Alert, tier: Tier) -> Value {
    let mut payload = json!({
        "wallet": alert.wallet,
        "profit": alert.profit,
        "dex": alert.dex,
        "signal_type": alert.signal_type.to_string(),
        "timestamp": alert.timestamp.to_rfc3339(),
        "tier": tier.to_string(),
    });

    if tier == Tier::Free {
        return payload;
    }

    let obj = payload.as_object_mut().expect("payload is an object");
    obj.insert("win_rate".to_string(), json!(alert.win_rate));
    obj.insert("zscore".to_string(), json!(alert.zscore));
    obj.insert("confidence".to_string(), json!(alert.confidence.to_string()));
    obj.insert("detect_ms".to_string(), json!(alert.detect_ms));
    obj.insert("signature".to_string(), json!(alert.signature));
    obj.insert(
        "sub_metrics".to_string(),
        json!({
            "price_coverage": alert.sub_metrics.price_coverage,
            "route_complexity": alert.sub_metrics.route_complexity,
            "fee_completeness": alert.sub_metrics.fee_completeness,
            "balance_alignment": alert.sub_metrics.balance_alignment,
        }),
    );

    if tier == Tier::Elite {
        obj.insert("counterparties".to_string(), json!(alert.counterparties));
    }

    payload
}

fn rate_limit_headers(mut response: axum::response::Response, remaining: u32, limit: u32) -> axum::response::Response {
    let headers = response.headers_mut();
    headers.insert(
        "X-RateLimit-Remaining",
        remaining.to_string().parse().expect("decimal is valid header value"),
    );
    headers.insert("X-RateLimit-Limit", limit.to_string().parse().expect("decimal is valid header value"));
    response
}

async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let loop_ts = state.metrics.last_loop_ts.get();
    let now = chrono::Utc::now().timestamp() as f64;
    let stale = loop_ts > 0.0 && (now - loop_ts) > HEALTH_STALENESS_SEC;

    let last_profit = state.alerts.read().back().map(|a| a.profit).unwrap_or(0.0);
    let body = json!({
        "status": if stale { "unhealthy" } else { "ok" },
        "loop_ts": loop_ts,
        "watchlist_size": state.watchlist.len(),
        "last_profit": last_profit,
        "dry_run": state.config.alerting.dry_run,
        "daas_mode": state.config.daas_mode,
    });

    let status = if stale { StatusCode::INTERNAL_SERVER_ERROR } else { StatusCode::OK };
    (status, Json(body))
}

async fn signals(
    State(state): State<Arc<AppState>>,
    auth: AuthenticatedKey,
) -> Result<impl IntoResponse, ApiError> {
    let alerts = state.alerts.read();
    let signals: Vec<Value> = alerts
        .iter()
        .rev()
        .take(SIGNALS_PAGE_SIZE)
        .map(|alert| shape_alert_for_tier(alert, auth.tier))
        .collect();
    let count = signals.len();

    let mut body = json!({ "signals": signals, "count": count, "disclaimer": DISCLAIMER });
    if auth.tier == Tier::Free && state.config.alerting.include_paywall_prompt {
        body["upgrade_hint"] = json!(UPGRADE_HINT);
    }

    let response = Json(body).into_response();
    Ok(rate_limit_headers(response, auth.quota.remaining, auth.quota.limit))
}

async fn wallet_score(
    State(_state): State<Arc<AppState>>,
    auth: AuthenticatedKey,
    Path(address): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    // §9 open question: the true score computation is unspecified; this
    // endpoint is a stub contract returning zeros until one is defined.
    let body = json!({
        "wallet": address,
        "tier": auth.tier.to_string(),
        "score": { "z_score": 0.0, "win_rate": 0.0, "net_total": 0.0 },
        "disclaimer": DISCLAIMER,
    });
    let response = Json(body).into_response();
    Ok(rate_limit_headers(response, auth.quota.remaining, auth.quota.limit))
}

async fn billing_webhook(State(state): State<Arc<AppState>>, Json(body): Json<Value>) -> impl IntoResponse {
    let Some(event_type) = body.get("type").and_then(Value::as_str) else {
        return (StatusCode::BAD_REQUEST, Json(json!({ "error": "missing event type" })));
    };
    let data = body.get("data").cloned().unwrap_or(json!({}));
    let now = chrono::Utc::now().timestamp() as f64;

    let key = billing::handle_webhook(&state.api_keys, event_type, &data, now);
    state.metrics.set_active_subscriptions(&state.api_keys.active_subscription_counts());
    info!(event_type, handled = key.is_some(), "billing webhook processed");

    (StatusCode::OK, Json(json!({ "status": "ok" })))
}

#[derive(serde::Deserialize)]
struct FakeCheckoutRequest {
    tier: Tier,
    #[serde(default)]
    email: String,
}

async fn fake_checkout(
    State(state): State<Arc<AppState>>,
    Json(req): Json<FakeCheckoutRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.config.billing.fake_checkout_enabled {
        return Err(ApiError::FeatureDisabled("fake checkout is disabled"));
    }

    let now = chrono::Utc::now().timestamp() as f64;
    let resp = billing::fake_checkout(&state.api_keys, req.tier, &req.email, now);
    state.metrics.set_active_subscriptions(&state.api_keys.active_subscription_counts());
    warn!(tier = %req.tier, "fake checkout issued, not a real payment");

    Ok((StatusCode::OK, Json(resp)))
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
            counterparties: vec!["Counterparty1".to_string()],
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
    fn free_tier_payload_omits_confidence_fields() {
        let payload = shape_alert_for_tier(&sample_alert(), Tier::Free);
        assert!(payload.get("zscore").is_none());
        assert!(payload.get("counterparties").is_none());
    }

    #[test]
    fn pro_tier_payload_includes_zscore_and_sub_metrics_but_not_counterparties() {
        let payload = shape_alert_for_tier(&sample_alert(), Tier::Pro);
        assert!(payload.get("zscore").is_some());
        assert!(payload.get("sub_metrics").is_some());
        assert!(payload.get("counterparties").is_none());
    }

    #[test]
    fn elite_tier_payload_includes_counterparties_and_sub_metrics() {
        let payload = shape_alert_for_tier(&sample_alert(), Tier::Elite);
        assert!(payload.get("counterparties").is_some());
        assert!(payload.get("sub_metrics").is_some());
    }
}
