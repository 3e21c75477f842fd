//! Market regime classification.
//!
//! Classifies current conditions from two signals — the volatility index
//! level and the broad-market trend — and recommends strategies for the
//! resulting regime. Every fetch degrades gracefully: a missing VIX quote
//! falls back to a mid-range default, missing price or bars default the
//! trend to neutral, and the confidence score reflects how many signals
//! actually arrived.

use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

use crate::gateway::MarketData;
use crate::types::{
    round2, Bar, RegimeSnapshot, StrategyRecommendation, Trend, VolatilityBucket,
};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Volatility bucket thresholds (ascending).
const VIX_LOW: f64 = 15.0;
const VIX_MEDIUM: f64 = 20.0;
const VIX_HIGH: f64 = 30.0;

/// Substitute VIX level when the quote is unavailable — mid-range of the
/// medium bucket, so a blind classification stays medium-volatility.
const DEFAULT_VIX_LEVEL: f64 = 17.5;

/// Volatility index symbol.
const VOLATILITY_SYMBOL: &str = "VIX";

/// Broad-market reference symbol for trend analysis.
const MARKET_SYMBOL: &str = "SPY";

/// Daily bars fetched for trend analysis.
const TREND_BARS_BACK: u32 = 20;

/// Closes averaged for the trend baseline.
const TREND_WINDOW: usize = 10;

/// Price must diverge from the baseline by this fraction to count
/// as a directional trend.
const TREND_BAND: f64 = 0.02;

/// Default watchlist of liquid option underlyings.
const DEFAULT_WATCHLIST: [&str; 10] = [
    "SPY", "QQQ", "IWM", "AAPL", "MSFT", "NVDA", "TSLA", "AMD", "AMZN", "GOOGL",
];

/// Broad-index ETFs promoted to the front under high volatility.
const INDEX_ETFS: [&str; 3] = ["SPY", "QQQ", "IWM"];

/// Maximum symbols returned by `scan_symbols`.
const WATCHLIST_CAP: usize = 10;

// ---------------------------------------------------------------------------
// Classifier
// ---------------------------------------------------------------------------

/// Classifies the market regime from volatility and trend signals.
pub struct RegimeClassifier {
    data: Arc<dyn MarketData>,
}

impl RegimeClassifier {
    pub fn new(data: Arc<dyn MarketData>) -> Self {
        Self { data }
    }

    /// Detect the current market regime.
    ///
    /// Never fails — unavailable signals are substituted with defaults
    /// and reflected in a lower confidence.
    pub async fn detect_regime(&self) -> RegimeSnapshot {
        info!("Detecting market regime");

        let vix_quote = match self.data.quote(VOLATILITY_SYMBOL).await {
            Ok(quote) => Some(quote),
            Err(e) => {
                warn!(error = %e, "VIX quote unavailable, assuming medium volatility");
                None
            }
        };
        let vix_level = vix_quote.as_ref().map(|q| q.last).unwrap_or(DEFAULT_VIX_LEVEL);
        let volatility = Self::classify_volatility(vix_level);

        let (market_quote, bars) = tokio::join!(
            self.data.quote(MARKET_SYMBOL),
            self.data.daily_bars(MARKET_SYMBOL, TREND_BARS_BACK),
        );

        let reference_price = match market_quote {
            Ok(quote) => Some(quote.last),
            Err(e) => {
                warn!(error = %e, "Market quote unavailable, trend defaults to neutral");
                None
            }
        };
        let bars = bars.unwrap_or_else(|e| {
            warn!(error = %e, "Market bars unavailable, trend defaults to neutral");
            Vec::new()
        });

        let trend = Self::classify_trend(reference_price, &bars);

        let all_signals = vix_quote.is_some() && reference_price.is_some() && !bars.is_empty();
        let confidence = if all_signals { 0.85 } else { 0.75 };

        let snapshot = RegimeSnapshot {
            regime: format!("{}_vol_{}", volatility.label(), trend.label()),
            volatility,
            trend,
            vix_level: round2(vix_level),
            reference_price: reference_price.map(round2),
            recommended_strategies: Self::recommended_strategies(volatility, trend),
            confidence,
            timestamp: Utc::now(),
        };

        info!(regime = %snapshot.regime, confidence, "Market regime detected");
        snapshot
    }

    /// Recommended symbols to scan for the given regime.
    ///
    /// Under High or Extreme volatility the broad-index ETFs are promoted
    /// to the front of the list (stable reorder, no symbols dropped); the
    /// result is always capped at ten entries.
    pub async fn scan_symbols(&self, regime: Option<&RegimeSnapshot>) -> Vec<String> {
        let detected;
        let regime = match regime {
            Some(snapshot) => snapshot,
            None => {
                detected = self.detect_regime().await;
                &detected
            }
        };

        let mut symbols: Vec<String> =
            DEFAULT_WATCHLIST.iter().map(|s| s.to_string()).collect();

        if matches!(
            regime.volatility,
            VolatilityBucket::High | VolatilityBucket::Extreme
        ) {
            let mut promoted: Vec<String> = INDEX_ETFS.iter().map(|s| s.to_string()).collect();
            promoted.extend(
                symbols
                    .into_iter()
                    .filter(|s| !INDEX_ETFS.contains(&s.as_str())),
            );
            symbols = promoted;
        }

        symbols.truncate(WATCHLIST_CAP);
        symbols
    }

    /// Bucket a VIX level by the fixed ascending thresholds.
    fn classify_volatility(vix: f64) -> VolatilityBucket {
        if vix < VIX_LOW {
            VolatilityBucket::Low
        } else if vix < VIX_MEDIUM {
            VolatilityBucket::Medium
        } else if vix < VIX_HIGH {
            VolatilityBucket::High
        } else {
            VolatilityBucket::Extreme
        }
    }

    /// Compare the current price to the average of the most recent
    /// closes. Defaults to neutral when either signal is missing.
    fn classify_trend(price: Option<f64>, bars: &[Bar]) -> Trend {
        let price = match price {
            Some(p) => p,
            None => return Trend::Neutral,
        };
        if bars.len() < TREND_WINDOW {
            return Trend::Neutral;
        }

        // Bars arrive oldest → newest; average the most recent window.
        let closes: Vec<f64> = bars
            .iter()
            .rev()
            .take(TREND_WINDOW)
            .map(|bar| bar.close)
            .collect();
        let avg = closes.iter().sum::<f64>() / closes.len() as f64;

        if price > avg * (1.0 + TREND_BAND) {
            Trend::Bullish
        } else if price < avg * (1.0 - TREND_BAND) {
            Trend::Bearish
        } else {
            Trend::Neutral
        }
    }

    /// Fixed (volatility, trend) → recommendation lookup.
    fn recommended_strategies(
        volatility: VolatilityBucket,
        trend: Trend,
    ) -> Vec<StrategyRecommendation> {
        match volatility {
            VolatilityBucket::Low => vec![StrategyRecommendation::new(
                "Long options",
                "Low IV makes options cheap to buy",
            )],
            VolatilityBucket::Medium | VolatilityBucket::High => match trend {
                Trend::Bullish => vec![StrategyRecommendation::new(
                    "Put credit spreads",
                    "Sell puts in uptrend, high premium",
                )],
                Trend::Bearish => vec![StrategyRecommendation::new(
                    "Call credit spreads",
                    "Sell calls in downtrend, high premium",
                )],
                Trend::Neutral => vec![
                    StrategyRecommendation::new(
                        "Iron condors",
                        "Sideways market, sell both sides",
                    ),
                    StrategyRecommendation::new(
                        "Put credit spreads",
                        "Conservative premium collection",
                    ),
                ],
            },
            VolatilityBucket::Extreme => vec![
                StrategyRecommendation::new(
                    "Put credit spreads (wide)",
                    "High premium but use wider spreads for safety",
                ),
                StrategyRecommendation::new(
                    "Wait for calm",
                    "Extreme volatility increases risk",
                ),
            ],
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MockMarketData;
    use crate::types::{GatewayError, Quote};
    use chrono::Duration;

    fn quote(symbol: &str, last: f64) -> Quote {
        Quote {
            symbol: symbol.to_string(),
            last,
            bid: last - 0.05,
            ask: last + 0.05,
            timestamp: Utc::now(),
        }
    }

    fn bars_with_closes(closes: &[f64]) -> Vec<Bar> {
        let start = Utc::now() - Duration::days(closes.len() as i64);
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Bar {
                open: close,
                high: close + 1.0,
                low: close - 1.0,
                close,
                volume: 1_000_000,
                timestamp: start + Duration::days(i as i64),
            })
            .collect()
    }

    fn down() -> GatewayError {
        GatewayError::Transport("connection refused".to_string())
    }

    // -- Volatility buckets ------------------------------------------------

    #[test]
    fn test_classify_volatility_thresholds() {
        assert_eq!(RegimeClassifier::classify_volatility(10.0), VolatilityBucket::Low);
        assert_eq!(RegimeClassifier::classify_volatility(14.99), VolatilityBucket::Low);
        assert_eq!(RegimeClassifier::classify_volatility(15.0), VolatilityBucket::Medium);
        assert_eq!(RegimeClassifier::classify_volatility(19.99), VolatilityBucket::Medium);
        assert_eq!(RegimeClassifier::classify_volatility(20.0), VolatilityBucket::High);
        assert_eq!(RegimeClassifier::classify_volatility(29.99), VolatilityBucket::High);
        assert_eq!(RegimeClassifier::classify_volatility(30.0), VolatilityBucket::Extreme);
        assert_eq!(RegimeClassifier::classify_volatility(80.0), VolatilityBucket::Extreme);
    }

    // -- Trend -------------------------------------------------------------

    #[test]
    fn test_trend_bullish_above_band() {
        let bars = bars_with_closes(&[500.0; 20]);
        // 500 * 1.02 = 510 — strictly above required
        assert_eq!(
            RegimeClassifier::classify_trend(Some(510.1), &bars),
            Trend::Bullish
        );
        assert_eq!(
            RegimeClassifier::classify_trend(Some(510.0), &bars),
            Trend::Neutral
        );
    }

    #[test]
    fn test_trend_bearish_below_band() {
        let bars = bars_with_closes(&[500.0; 20]);
        assert_eq!(
            RegimeClassifier::classify_trend(Some(489.9), &bars),
            Trend::Bearish
        );
        assert_eq!(
            RegimeClassifier::classify_trend(Some(490.0), &bars),
            Trend::Neutral
        );
    }

    #[test]
    fn test_trend_uses_most_recent_window() {
        // Old closes at 100, recent ten at 500 — baseline must be 500.
        let mut closes = vec![100.0; 10];
        closes.extend([500.0; 10]);
        let bars = bars_with_closes(&closes);
        assert_eq!(
            RegimeClassifier::classify_trend(Some(505.0), &bars),
            Trend::Neutral
        );
        assert_eq!(
            RegimeClassifier::classify_trend(Some(515.0), &bars),
            Trend::Bullish
        );
    }

    #[test]
    fn test_trend_neutral_without_signals() {
        let bars = bars_with_closes(&[500.0; 20]);
        assert_eq!(RegimeClassifier::classify_trend(None, &bars), Trend::Neutral);

        let short = bars_with_closes(&[500.0; 5]);
        assert_eq!(
            RegimeClassifier::classify_trend(Some(600.0), &short),
            Trend::Neutral
        );
    }

    // -- Recommendation table ----------------------------------------------

    #[test]
    fn test_recommendations_low_vol_any_trend() {
        for trend in [Trend::Bullish, Trend::Bearish, Trend::Neutral] {
            let recs =
                RegimeClassifier::recommended_strategies(VolatilityBucket::Low, trend);
            assert_eq!(recs.len(), 1);
            assert_eq!(recs[0].name, "Long options");
        }
    }

    #[test]
    fn test_recommendations_directional() {
        let recs = RegimeClassifier::recommended_strategies(
            VolatilityBucket::Medium,
            Trend::Bullish,
        );
        assert_eq!(recs[0].name, "Put credit spreads");

        let recs = RegimeClassifier::recommended_strategies(
            VolatilityBucket::High,
            Trend::Bearish,
        );
        assert_eq!(recs[0].name, "Call credit spreads");
    }

    #[test]
    fn test_recommendations_neutral_sells_both_sides() {
        let recs = RegimeClassifier::recommended_strategies(
            VolatilityBucket::High,
            Trend::Neutral,
        );
        let names: Vec<&str> = recs.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["Iron condors", "Put credit spreads"]);
    }

    #[test]
    fn test_recommendations_extreme_advises_caution() {
        let recs = RegimeClassifier::recommended_strategies(
            VolatilityBucket::Extreme,
            Trend::Bullish,
        );
        let names: Vec<&str> = recs.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["Put credit spreads (wide)", "Wait for calm"]);
    }

    // -- detect_regime -----------------------------------------------------

    #[tokio::test]
    async fn test_detect_regime_medium_vol_bullish() {
        let mut mock = MockMarketData::new();
        mock.expect_quote()
            .withf(|s| s == "VIX")
            .returning(|_| Ok(quote("VIX", 18.0)));
        mock.expect_quote()
            .withf(|s| s == "SPY")
            .returning(|_| Ok(quote("SPY", 515.0)));
        mock.expect_daily_bars()
            .returning(|_, _| Ok(bars_with_closes(&[500.0; 20])));

        let classifier = RegimeClassifier::new(Arc::new(mock));
        let snapshot = classifier.detect_regime().await;

        assert_eq!(snapshot.regime, "medium_vol_bullish");
        assert_eq!(snapshot.volatility, VolatilityBucket::Medium);
        assert_eq!(snapshot.trend, Trend::Bullish);
        assert!((snapshot.vix_level - 18.0).abs() < 1e-10);
        assert_eq!(snapshot.reference_price, Some(515.0));
        assert!((snapshot.confidence - 0.85).abs() < 1e-10);
        assert!(snapshot
            .recommended_strategies
            .iter()
            .any(|r| r.name == "Put credit spreads"));
    }

    #[tokio::test]
    async fn test_detect_regime_defaults_when_everything_fails() {
        let mut mock = MockMarketData::new();
        mock.expect_quote().returning(|_| Err(down()));
        mock.expect_daily_bars().returning(|_, _| Err(down()));

        let classifier = RegimeClassifier::new(Arc::new(mock));
        let snapshot = classifier.detect_regime().await;

        assert_eq!(snapshot.volatility, VolatilityBucket::Medium);
        assert_eq!(snapshot.trend, Trend::Neutral);
        assert_eq!(snapshot.regime, "medium_vol_neutral");
        assert!(snapshot.reference_price.is_none());
        assert!((snapshot.confidence - 0.75).abs() < 1e-10);
    }

    #[tokio::test]
    async fn test_detect_regime_empty_bars_lower_confidence() {
        let mut mock = MockMarketData::new();
        mock.expect_quote()
            .withf(|s| s == "VIX")
            .returning(|_| Ok(quote("VIX", 25.0)));
        mock.expect_quote()
            .withf(|s| s == "SPY")
            .returning(|_| Ok(quote("SPY", 500.0)));
        mock.expect_daily_bars().returning(|_, _| Ok(Vec::new()));

        let classifier = RegimeClassifier::new(Arc::new(mock));
        let snapshot = classifier.detect_regime().await;

        assert_eq!(snapshot.volatility, VolatilityBucket::High);
        assert_eq!(snapshot.trend, Trend::Neutral);
        assert!((snapshot.confidence - 0.75).abs() < 1e-10);
    }

    // -- scan_symbols ------------------------------------------------------

    fn snapshot_with(volatility: VolatilityBucket) -> RegimeSnapshot {
        RegimeSnapshot {
            regime: format!("{}_vol_neutral", volatility.label()),
            volatility,
            trend: Trend::Neutral,
            vix_level: 20.0,
            reference_price: None,
            recommended_strategies: Vec::new(),
            confidence: 0.75,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_scan_symbols_default_order() {
        let classifier = RegimeClassifier::new(Arc::new(MockMarketData::new()));
        let snapshot = snapshot_with(VolatilityBucket::Medium);
        let symbols = classifier.scan_symbols(Some(&snapshot)).await;

        assert_eq!(symbols.len(), 10);
        assert_eq!(symbols[0], "SPY");
        assert_eq!(symbols[3], "AAPL");
    }

    #[tokio::test]
    async fn test_scan_symbols_promotes_etfs_under_high_vol() {
        let classifier = RegimeClassifier::new(Arc::new(MockMarketData::new()));
        let snapshot = snapshot_with(VolatilityBucket::Extreme);
        let symbols = classifier.scan_symbols(Some(&snapshot)).await;

        assert_eq!(&symbols[..3], &["SPY", "QQQ", "IWM"]);
        assert_eq!(symbols.len(), 10);
        // Stable reorder: nothing dropped, nothing duplicated.
        let mut unique = symbols.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), 10);
    }

    #[tokio::test]
    async fn test_scan_symbols_detects_regime_when_absent() {
        let mut mock = MockMarketData::new();
        mock.expect_quote().returning(|_| Err(down()));
        mock.expect_daily_bars().returning(|_, _| Err(down()));

        let classifier = RegimeClassifier::new(Arc::new(mock));
        let symbols = classifier.scan_symbols(None).await;
        // Default VIX lands in the medium bucket — no ETF promotion.
        assert_eq!(symbols.len(), 10);
        assert_eq!(symbols[0], "SPY");
        assert_eq!(symbols[9], "GOOGL");
    }
}
