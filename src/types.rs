//! Shared types for the CONDOR scanner.
//!
//! These types form the data model used across all modules.
//! They are designed to be stable so that the gateway, engine,
//! and server modules can depend on them without circular references.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Round to two decimal places for external presentation.
///
/// Scoring and ranking always run on unrounded intermediates;
/// this is applied only when values are stored for display.
pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

// ---------------------------------------------------------------------------
// Market data
// ---------------------------------------------------------------------------

/// A real-time quote for a symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub last: f64,
    pub bid: f64,
    pub ask: f64,
    pub timestamp: DateTime<Utc>,
}

impl fmt::Display for Quote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} last={:.2} bid={:.2} ask={:.2}",
            self.symbol, self.last, self.bid, self.ask,
        )
    }
}

/// A single OHLCV bar. Sequences are always ordered oldest → newest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bar {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: u64,
    pub timestamp: DateTime<Utc>,
}

/// Put or call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptionType {
    Put,
    Call,
}

impl fmt::Display for OptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionType::Put => write!(f, "Put"),
            OptionType::Call => write!(f, "Call"),
        }
    }
}

/// A single option contract from a chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptionContract {
    /// Underlying symbol.
    pub symbol: String,
    pub strike: f64,
    pub expiration: NaiveDate,
    pub option_type: OptionType,
    pub bid: f64,
    pub ask: f64,
}

impl OptionContract {
    /// Mid price — the arithmetic mean of bid and ask.
    pub fn mid(&self) -> f64 {
        (self.bid + self.ask) / 2.0
    }
}

impl fmt::Display for OptionContract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} @ {:.2} ({:.2}/{:.2})",
            self.symbol,
            self.strike,
            self.option_type,
            self.mid(),
            self.bid,
            self.ask,
        )
    }
}

// ---------------------------------------------------------------------------
// Spread candidates
// ---------------------------------------------------------------------------

/// Vertical credit-spread flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SpreadStrategy {
    #[serde(rename = "put_credit_spread")]
    PutCredit,
    #[serde(rename = "call_credit_spread")]
    CallCredit,
}

impl fmt::Display for SpreadStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpreadStrategy::PutCredit => write!(f, "put_credit_spread"),
            SpreadStrategy::CallCredit => write!(f, "call_credit_spread"),
        }
    }
}

impl std::str::FromStr for SpreadStrategy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "put_credit_spread" | "put_credit" | "put" => Ok(SpreadStrategy::PutCredit),
            "call_credit_spread" | "call_credit" | "call" => Ok(SpreadStrategy::CallCredit),
            _ => Err(anyhow::anyhow!("Unknown spread strategy: {s}")),
        }
    }
}

/// A fully scored vertical credit-spread candidate.
///
/// Monetary fields are rounded to two decimals for presentation;
/// the score is computed from unrounded intermediates before rounding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpreadCandidate {
    pub symbol: String,
    pub strategy: SpreadStrategy,
    pub expiration: NaiveDate,
    pub days_to_expiration: i64,
    pub underlying_price: f64,
    pub short_strike: f64,
    pub long_strike: f64,
    pub short_premium: f64,
    pub long_premium: f64,
    pub net_credit: f64,
    /// Per contract (100-share notional).
    pub max_profit: f64,
    pub max_loss: f64,
    pub width: f64,
    pub probability_of_profit: f64,
    pub risk_reward: f64,
    pub score: f64,
}

impl fmt::Display for SpreadCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {}/{} exp {} ({}d) credit={:.2} p={:.2} rr={:.2} score={:.2}",
            self.symbol,
            self.strategy,
            self.short_strike,
            self.long_strike,
            self.expiration,
            self.days_to_expiration,
            self.net_credit,
            self.probability_of_profit,
            self.risk_reward,
            self.score,
        )
    }
}

impl SpreadCandidate {
    /// Helper to build a test candidate with sensible defaults.
    #[cfg(test)]
    pub fn sample(symbol: &str, strategy: SpreadStrategy, score: f64) -> Self {
        SpreadCandidate {
            symbol: symbol.to_string(),
            strategy,
            expiration: NaiveDate::from_ymd_opt(2026, 9, 18).unwrap(),
            days_to_expiration: 30,
            underlying_price: 102.0,
            short_strike: 100.0,
            long_strike: 95.0,
            short_premium: 1.20,
            long_premium: 0.50,
            net_credit: 0.70,
            max_profit: 70.0,
            max_loss: 430.0,
            width: 5.0,
            probability_of_profit: 0.70,
            risk_reward: 0.16,
            score,
        }
    }
}

// ---------------------------------------------------------------------------
// Market regime
// ---------------------------------------------------------------------------

/// Volatility bucket derived from the VIX level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VolatilityBucket {
    Low,
    Medium,
    High,
    Extreme,
}

impl VolatilityBucket {
    /// Lower-cased label used when composing the regime string.
    pub fn label(&self) -> &'static str {
        match self {
            VolatilityBucket::Low => "low",
            VolatilityBucket::Medium => "medium",
            VolatilityBucket::High => "high",
            VolatilityBucket::Extreme => "extreme",
        }
    }
}

impl fmt::Display for VolatilityBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Coarse price trend of the broad market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Bullish,
    Bearish,
    Neutral,
}

impl Trend {
    pub fn label(&self) -> &'static str {
        match self {
            Trend::Bullish => "bullish",
            Trend::Bearish => "bearish",
            Trend::Neutral => "neutral",
        }
    }
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// A strategy recommendation attached to a regime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StrategyRecommendation {
    pub name: String,
    pub rationale: String,
}

impl StrategyRecommendation {
    pub fn new(name: &str, rationale: &str) -> Self {
        Self {
            name: name.to_string(),
            rationale: rationale.to_string(),
        }
    }
}

/// Snapshot of current market conditions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeSnapshot {
    /// Composed label, e.g. "high_vol_bullish".
    pub regime: String,
    pub volatility: VolatilityBucket,
    pub trend: Trend,
    pub vix_level: f64,
    pub reference_price: Option<f64>,
    pub recommended_strategies: Vec<StrategyRecommendation>,
    /// 0.85 when all signals were fetched, 0.75 otherwise.
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
}

impl fmt::Display for RegimeSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (vix={:.2} conf={:.0}%)",
            self.regime,
            self.vix_level,
            self.confidence * 100.0,
        )
    }
}

// ---------------------------------------------------------------------------
// Scan results
// ---------------------------------------------------------------------------

/// Per-symbol scan output: top candidates per side plus the
/// pre-truncation opportunity count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolScan {
    pub symbol: String,
    pub put_spreads: Vec<SpreadCandidate>,
    pub call_spreads: Vec<SpreadCandidate>,
    pub total_opportunities: usize,
}

/// Aggregated result of a full batch scan.
/// Replaced wholesale on each completed scan — no incremental merge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    pub regime: RegimeSnapshot,
    pub symbols_scanned: Vec<String>,
    pub put_spreads: Vec<SpreadCandidate>,
    pub call_spreads: Vec<SpreadCandidate>,
    pub total_opportunities: usize,
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Error taxonomy for upstream market-data access.
///
/// Cache failures never appear here — the cache degrades to a miss.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// No usable credential, refresh failed, or authorization was
    /// rejected again after the single refresh-and-retry.
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// Non-auth failure response from the market-data API.
    #[error("upstream error {status}: {body}")]
    Upstream { status: u16, body: String },

    /// Network-level failure (timeout, connection reset).
    #[error("transport error: {0}")]
    Transport(String),

    /// The upstream had no data for the requested resource.
    #[error("no data: {0}")]
    NotFound(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    // -- round2 --

    #[test]
    fn test_round2() {
        assert_eq!(round2(0.696078), 0.70);
        assert_eq!(round2(0.162790), 0.16);
        assert_eq!(round2(3.875970), 3.88);
        assert_eq!(round2(0.0), 0.0);
        assert_eq!(round2(1.005000001), 1.01);
    }

    // -- Quote / Bar / OptionContract --

    #[test]
    fn test_quote_display() {
        let q = Quote {
            symbol: "SPY".to_string(),
            last: 512.34,
            bid: 512.30,
            ask: 512.38,
            timestamp: Utc::now(),
        };
        let display = format!("{q}");
        assert!(display.contains("SPY"));
        assert!(display.contains("512.34"));
    }

    #[test]
    fn test_quote_serialization_roundtrip() {
        let q = Quote {
            symbol: "QQQ".to_string(),
            last: 430.0,
            bid: 429.95,
            ask: 430.05,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_string(&q).unwrap();
        let parsed: Quote = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.symbol, "QQQ");
        assert!((parsed.last - 430.0).abs() < 1e-10);
    }

    #[test]
    fn test_option_contract_mid() {
        let c = OptionContract {
            symbol: "SPY".to_string(),
            strike: 100.0,
            expiration: NaiveDate::from_ymd_opt(2026, 9, 18).unwrap(),
            option_type: OptionType::Put,
            bid: 1.10,
            ask: 1.30,
        };
        assert!((c.mid() - 1.20).abs() < 1e-10);
    }

    #[test]
    fn test_option_type_display() {
        assert_eq!(format!("{}", OptionType::Put), "Put");
        assert_eq!(format!("{}", OptionType::Call), "Call");
    }

    // -- SpreadStrategy --

    #[test]
    fn test_strategy_display() {
        assert_eq!(format!("{}", SpreadStrategy::PutCredit), "put_credit_spread");
        assert_eq!(format!("{}", SpreadStrategy::CallCredit), "call_credit_spread");
    }

    #[test]
    fn test_strategy_from_str() {
        assert_eq!(
            "put_credit_spread".parse::<SpreadStrategy>().unwrap(),
            SpreadStrategy::PutCredit
        );
        assert_eq!(
            "CALL_CREDIT".parse::<SpreadStrategy>().unwrap(),
            SpreadStrategy::CallCredit
        );
        assert_eq!("put".parse::<SpreadStrategy>().unwrap(), SpreadStrategy::PutCredit);
        assert!("iron_condor".parse::<SpreadStrategy>().is_err());
    }

    #[test]
    fn test_strategy_serialization() {
        let json = serde_json::to_string(&SpreadStrategy::PutCredit).unwrap();
        assert_eq!(json, "\"put_credit_spread\"");
        let parsed: SpreadStrategy = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, SpreadStrategy::PutCredit);
    }

    // -- SpreadCandidate --

    #[test]
    fn test_candidate_display() {
        let c = SpreadCandidate::sample("SPY", SpreadStrategy::PutCredit, 3.88);
        let display = format!("{c}");
        assert!(display.contains("SPY"));
        assert!(display.contains("put_credit_spread"));
        assert!(display.contains("3.88"));
    }

    #[test]
    fn test_candidate_serialization_roundtrip() {
        let c = SpreadCandidate::sample("NVDA", SpreadStrategy::CallCredit, 2.5);
        let json = serde_json::to_string(&c).unwrap();
        let parsed: SpreadCandidate = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.symbol, "NVDA");
        assert_eq!(parsed.strategy, SpreadStrategy::CallCredit);
        assert!((parsed.score - 2.5).abs() < 1e-10);
    }

    // -- VolatilityBucket / Trend --

    #[test]
    fn test_bucket_labels() {
        assert_eq!(VolatilityBucket::Low.label(), "low");
        assert_eq!(VolatilityBucket::Medium.label(), "medium");
        assert_eq!(VolatilityBucket::High.label(), "high");
        assert_eq!(VolatilityBucket::Extreme.label(), "extreme");
    }

    #[test]
    fn test_trend_labels() {
        assert_eq!(Trend::Bullish.label(), "bullish");
        assert_eq!(Trend::Bearish.label(), "bearish");
        assert_eq!(Trend::Neutral.label(), "neutral");
    }

    #[test]
    fn test_bucket_serialization_lowercase() {
        assert_eq!(serde_json::to_string(&VolatilityBucket::High).unwrap(), "\"high\"");
        assert_eq!(serde_json::to_string(&Trend::Neutral).unwrap(), "\"neutral\"");
    }

    // -- RegimeSnapshot --

    #[test]
    fn test_regime_snapshot_display() {
        let snapshot = RegimeSnapshot {
            regime: "medium_vol_bullish".to_string(),
            volatility: VolatilityBucket::Medium,
            trend: Trend::Bullish,
            vix_level: 18.0,
            reference_price: Some(510.0),
            recommended_strategies: vec![StrategyRecommendation::new(
                "Put credit spreads",
                "Sell puts in uptrend, high premium",
            )],
            confidence: 0.85,
            timestamp: Utc::now(),
        };
        let display = format!("{snapshot}");
        assert!(display.contains("medium_vol_bullish"));
        assert!(display.contains("85%"));
    }

    #[test]
    fn test_regime_snapshot_serialization_roundtrip() {
        let snapshot = RegimeSnapshot {
            regime: "extreme_vol_neutral".to_string(),
            volatility: VolatilityBucket::Extreme,
            trend: Trend::Neutral,
            vix_level: 42.5,
            reference_price: None,
            recommended_strategies: Vec::new(),
            confidence: 0.75,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_string(&snapshot).unwrap();
        let parsed: RegimeSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.volatility, VolatilityBucket::Extreme);
        assert!(parsed.reference_price.is_none());
    }

    // -- GatewayError --

    #[test]
    fn test_gateway_error_display() {
        let e = GatewayError::Upstream {
            status: 500,
            body: "internal error".to_string(),
        };
        assert_eq!(format!("{e}"), "upstream error 500: internal error");

        let e = GatewayError::Authentication("no refresh token".to_string());
        assert!(format!("{e}").contains("no refresh token"));

        let e = GatewayError::NotFound("quote:XYZ".to_string());
        assert!(format!("{e}").contains("quote:XYZ"));
    }
}
