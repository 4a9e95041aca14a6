// =============================================================================
// API Key Authentication — §4.7 API Auth + Rate Limiter
// =============================================================================
//
// Extracts the `x-api-key` header, validates it against `auth::ApiKeyStore`,
// then consumes one unit of the caller's tier quota via
// `rate_limit::RateLimiter`. Yields the authenticated `(Tier, key_hash)` pair
// to the handler, and the `RateDecision` so the handler can stamp
// `X-RateLimit-*` headers on a successful response too, not just on 429.
// =============================================================================

use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;

use crate::app_state::AppState;
use crate::errors::ApiError;
use crate::rate_limit::RateDecision;
use crate::types::Tier;

/// An authenticated, quota-admitted caller.
pub struct AuthenticatedKey {
    pub tier: Tier,
    pub key_hash: String,
    pub quota: RateDecision,
}

impl<S> FromRequestParts<S> for AuthenticatedKey
where
    std::sync::Arc<AppState>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = std::sync::Arc::<AppState>::from_ref(state);

        let api_key = parts
            .headers
            .get("x-api-key")
            .and_then(|v| v.to_str().ok())
            .ok_or(ApiError::AuthFailure)?;

        let now = chrono::Utc::now().timestamp() as f64;
        let (tier, active) = app_state.api_keys.validate(api_key, now).ok_or(ApiError::AuthFailure)?;
        if !active {
            return Err(ApiError::AuthFailure);
        }

        let key_hash = crate::auth::ApiKeyStore::hash_key(api_key);
        let quota = app_state.rate_limiter.check(&key_hash, tier, now);
        if !quota.allowed {
            return Err(ApiError::QuotaExceeded { remaining: quota.remaining, limit: quota.limit });
        }

        Ok(AuthenticatedKey { tier, key_hash, quota })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::ApiKeyStore;
    use crate::rate_limit::RateLimiter;

    #[test]
    fn key_hash_round_trips_through_validate() {
        let store = ApiKeyStore::new("/tmp/does-not-matter-auth-test.json");
        let (api_key, key_hash) = store.create_key(Tier::Pro, 1000.0, None);
        assert_eq!(ApiKeyStore::hash_key(&api_key), key_hash);
        assert_eq!(store.validate(&api_key, 1000.0), Some((Tier::Pro, true)));
    }

    #[test]
    fn rate_limiter_denies_past_tier_quota() {
        let limiter = RateLimiter::new(1, 10, 100);
        let first = limiter.check("hash", Tier::Free, 1000.0);
        assert!(first.allowed);
        let second = limiter.check("hash", Tier::Free, 1000.0);
        assert!(!second.allowed);
    }
}
