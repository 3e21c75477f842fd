//! Vertical credit-spread scanning and scoring.
//!
//! Performs a constrained combinatorial search over an option chain:
//! every out-of-the-money contract is tried as the short leg, paired with
//! a long leg exactly one configured width further out, and kept when the
//! pair clears the liquidity and minimum-credit gates. Candidates are
//! ranked deterministically by score.
//!
//! The probability-of-profit estimate is a deliberately simplified linear
//! heuristic, not a pricing model; its exact shape is part of the
//! observable ranking behaviour and must not be "improved".

use chrono::{NaiveDate, Utc};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::ScannerConfig;
use crate::gateway::MarketData;
use crate::types::{
    round2, OptionContract, OptionType, SpreadCandidate, SpreadStrategy, SymbolScan,
};

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// Tunable scan parameters.
#[derive(Debug, Clone)]
pub struct ScanParams {
    pub min_dte: i64,
    pub max_dte: i64,
    pub min_credit: f64,
    pub spread_width: f64,
    /// Expirations processed per scan — a deliberate bound on API load.
    pub max_expirations: usize,
    /// Candidates kept per side in `scan_symbol`.
    pub per_symbol_limit: usize,
}

impl Default for ScanParams {
    fn default() -> Self {
        Self {
            min_dte: 20,
            max_dte: 45,
            min_credit: 0.25,
            spread_width: 5.0,
            max_expirations: 3,
            per_symbol_limit: 10,
        }
    }
}

impl From<&ScannerConfig> for ScanParams {
    fn from(cfg: &ScannerConfig) -> Self {
        Self {
            min_dte: cfg.min_dte,
            max_dte: cfg.max_dte,
            min_credit: cfg.min_credit,
            spread_width: cfg.spread_width,
            max_expirations: cfg.max_expirations,
            per_symbol_limit: cfg.per_symbol_limit,
        }
    }
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Computed metrics for one spread, rounded for presentation.
#[derive(Debug, Clone, Copy)]
pub struct SpreadMetrics {
    pub net_credit: f64,
    pub max_profit: f64,
    pub max_loss: f64,
    pub width: f64,
    pub probability: f64,
    pub risk_reward: f64,
    pub score: f64,
}

/// Shared metric formula for both spread flavours.
///
/// The score is computed from unrounded intermediates; all stored values
/// are rounded to two decimals afterwards.
pub fn spread_metrics(
    short_strike: f64,
    long_strike: f64,
    short_premium: f64,
    long_premium: f64,
    underlying_price: f64,
    strategy: SpreadStrategy,
) -> SpreadMetrics {
    let net_credit = short_premium - long_premium;
    let max_profit = net_credit * 100.0; // one contract = 100 shares
    let width = (short_strike - long_strike).abs();
    let max_loss = (width - net_credit) * 100.0;

    // Simplified probability: linear in the short strike's distance from
    // the underlying, clamped to [0.50, 0.95].
    let distance = match strategy {
        SpreadStrategy::PutCredit => (underlying_price - short_strike) / underlying_price,
        SpreadStrategy::CallCredit => (short_strike - underlying_price) / underlying_price,
    };
    let probability = (0.50 + distance * 10.0).clamp(0.50, 0.95);

    let risk_reward = if max_loss > 0.0 {
        max_profit / max_loss
    } else {
        0.0
    };

    // Fixed weights: probability dominates, then risk/reward, then credit.
    let score = probability * 5.0 + risk_reward * 2.0 + net_credit * 0.1;

    SpreadMetrics {
        net_credit: round2(net_credit),
        max_profit: round2(max_profit),
        max_loss: round2(max_loss),
        width: round2(width),
        probability: round2(probability),
        risk_reward: round2(risk_reward),
        score: round2(score),
    }
}

/// Sort candidates by score descending (stable — ties keep insertion order).
pub(crate) fn sort_by_score(candidates: &mut [SpreadCandidate]) {
    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

// ---------------------------------------------------------------------------
// Scanner
// ---------------------------------------------------------------------------

/// Scans option chains for vertical credit-spread candidates.
pub struct SpreadScanner {
    data: Arc<dyn MarketData>,
    params: ScanParams,
}

impl SpreadScanner {
    pub fn new(data: Arc<dyn MarketData>, params: ScanParams) -> Self {
        Self { data, params }
    }

    pub fn params(&self) -> &ScanParams {
        &self.params
    }

    /// Scan for put credit spreads: sell a higher-strike put, buy a
    /// lower-strike put; profitable while the underlying stays above the
    /// short strike.
    pub async fn scan_put_credit_spreads(&self, symbol: &str) -> Vec<SpreadCandidate> {
        self.scan_credit_spreads(symbol, SpreadStrategy::PutCredit)
            .await
    }

    /// Scan for call credit spreads: sell a lower-strike call, buy a
    /// higher-strike call; profitable while the underlying stays below
    /// the short strike.
    pub async fn scan_call_credit_spreads(&self, symbol: &str) -> Vec<SpreadCandidate> {
        self.scan_credit_spreads(symbol, SpreadStrategy::CallCredit)
            .await
    }

    /// Run both scans and truncate each ranked list to the per-symbol
    /// limit. `total_opportunities` reflects the pre-truncation counts.
    pub async fn scan_symbol(&self, symbol: &str) -> SymbolScan {
        let mut put_spreads = self.scan_put_credit_spreads(symbol).await;
        let mut call_spreads = self.scan_call_credit_spreads(symbol).await;

        let total_opportunities = put_spreads.len() + call_spreads.len();
        put_spreads.truncate(self.params.per_symbol_limit);
        call_spreads.truncate(self.params.per_symbol_limit);

        SymbolScan {
            symbol: symbol.to_string(),
            put_spreads,
            call_spreads,
            total_opportunities,
        }
    }

    /// The shared scan. An unavailable quote or expiration list aborts
    /// with an empty result; a failed chain fetch skips that expiration
    /// and continues.
    async fn scan_credit_spreads(
        &self,
        symbol: &str,
        strategy: SpreadStrategy,
    ) -> Vec<SpreadCandidate> {
        info!(symbol, %strategy, "Scanning credit spreads");

        let underlying = match self.data.quote(symbol).await {
            Ok(quote) => quote.last,
            Err(e) => {
                warn!(symbol, error = %e, "No quote for underlying, aborting scan");
                return Vec::new();
            }
        };

        let expirations = match self.data.option_expirations(symbol).await {
            Ok(expirations) => expirations,
            Err(e) => {
                warn!(symbol, error = %e, "No expirations available, aborting scan");
                return Vec::new();
            }
        };

        let today = Utc::now().date_naive();
        let mut qualifying: Vec<(NaiveDate, i64)> = expirations
            .iter()
            .filter_map(|&expiration| {
                let dte = (expiration - today).num_days();
                (self.params.min_dte..=self.params.max_dte)
                    .contains(&dte)
                    .then_some((expiration, dte))
            })
            .collect();

        if qualifying.is_empty() {
            warn!(
                symbol,
                min_dte = self.params.min_dte,
                max_dte = self.params.max_dte,
                "No expirations in DTE window"
            );
            return Vec::new();
        }

        qualifying.sort_by_key(|(expiration, _)| *expiration);
        qualifying.truncate(self.params.max_expirations);

        let wanted = match strategy {
            SpreadStrategy::PutCredit => OptionType::Put,
            SpreadStrategy::CallCredit => OptionType::Call,
        };

        let mut candidates = Vec::new();

        for (expiration, dte) in qualifying {
            let chain = match self.data.option_chain(symbol, expiration).await {
                Ok(chain) => chain,
                Err(e) => {
                    warn!(symbol, %expiration, error = %e, "Chain fetch failed, skipping expiration");
                    continue;
                }
            };

            let mut legs: Vec<&OptionContract> =
                chain.iter().filter(|c| c.option_type == wanted).collect();
            legs.sort_by(|a, b| {
                a.strike
                    .partial_cmp(&b.strike)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });

            for short in &legs {
                // Only out-of-the-money short legs.
                let long_strike = match strategy {
                    SpreadStrategy::PutCredit => {
                        if short.strike >= underlying {
                            continue;
                        }
                        short.strike - self.params.spread_width
                    }
                    SpreadStrategy::CallCredit => {
                        if short.strike <= underlying {
                            continue;
                        }
                        short.strike + self.params.spread_width
                    }
                };

                // Exact-width long leg only — no interpolation.
                let Some(long) = legs.iter().find(|c| c.strike == long_strike) else {
                    continue;
                };

                // A zero short bid or long ask means there is no market to
                // trade against.
                if short.bid == 0.0 || long.ask == 0.0 {
                    continue;
                }

                let short_premium = short.mid();
                let long_premium = long.mid();
                if short_premium - long_premium < self.params.min_credit {
                    continue;
                }

                let metrics = spread_metrics(
                    short.strike,
                    long_strike,
                    short_premium,
                    long_premium,
                    underlying,
                    strategy,
                );

                candidates.push(SpreadCandidate {
                    symbol: symbol.to_string(),
                    strategy,
                    expiration,
                    days_to_expiration: dte,
                    underlying_price: round2(underlying),
                    short_strike: short.strike,
                    long_strike,
                    short_premium: round2(short_premium),
                    long_premium: round2(long_premium),
                    net_credit: metrics.net_credit,
                    max_profit: metrics.max_profit,
                    max_loss: metrics.max_loss,
                    width: metrics.width,
                    probability_of_profit: metrics.probability,
                    risk_reward: metrics.risk_reward,
                    score: metrics.score,
                });
            }
        }

        sort_by_score(&mut candidates);

        info!(symbol, %strategy, count = candidates.len(), "Credit spread scan complete");
        candidates
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
