// =============================================================================
// Shared types used across the wallet signal service
// =============================================================================

use serde::{Deserialize, Serialize};

/// Access tier assigned to an API key. Determines both the daily rate limit
/// and how much of an alert's content is exposed to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Pro,
    Elite,
}

impl Default for Tier {
    fn default() -> Self {
        Self::Free
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Free => write!(f, "free"),
            Self::Pro => write!(f, "pro"),
            Self::Elite => write!(f, "elite"),
        }
    }
}

impl std::str::FromStr for Tier {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "free" => Ok(Self::Free),
            "pro" => Ok(Self::Pro),
            "elite" => Ok(Self::Elite),
            _ => Err(()),
        }
    }
}

/// Coarse confidence label derived from the profit estimator's sub-metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Med,
    High,
}

impl Confidence {
    /// Map a score (already clamped to 0..=2) to a label.
    pub fn from_score(score: i32) -> Self {
        match score.clamp(0, 2) {
            0 => Self::Low,
            1 => Self::Med,
            _ => Self::High,
        }
    }

    pub fn meets_alert_bar(&self) -> bool {
        matches!(self, Self::Med | Self::High)
    }
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Med => write!(f, "med"),
            Self::High => write!(f, "high"),
        }
    }
}

/// State of a per-endpoint (or per-webhook-target) circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl Default for CircuitState {
    fn default() -> Self {
        Self::Closed
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Why a candidate alert was rejected by the filter gauntlet (§4.5). Each
/// variant corresponds to exactly one gauntlet stage, in stage order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockedReason {
    BaselineFilter,
    ProfitBelowThreshold,
    ConfidenceTooLow,
    Idempotent,
    Cooldown,
}

impl std::fmt::Display for BlockedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BaselineFilter => write!(f, "baseline_filter"),
            Self::ProfitBelowThreshold => write!(f, "profit_below_threshold"),
            Self::ConfidenceTooLow => write!(f, "confidence_too_low"),
            Self::Idempotent => write!(f, "idempotent"),
            Self::Cooldown => write!(f, "cooldown"),
        }
    }
}

/// Classification of an alert's dominant venue, derived from the programs
/// touched by the transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalType {
    AmmAggregator,
    ScalperNft,
    Signal,
}

impl std::fmt::Display for SignalType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AmmAggregator => write!(f, "AMM / Aggregator"),
            Self::ScalperNft => write!(f, "Scalper NFT"),
            Self::Signal => write!(f, "Signal"),
        }
    }
}
