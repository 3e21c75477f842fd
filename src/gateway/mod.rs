//! Authenticated, cached access to the brokerage market-data API.
//!
//! Defines the `MarketData` trait — the data-gateway abstraction the
//! engine depends on — and the concrete `MarketDataGateway` that fronts
//! the upstream with bearer auth, a single 401-triggered refresh-and-retry,
//! and tiered TTL caching.
//!
//! Upstream payload shapes follow the brokerage wire format
//! (`{"Quotes":[..]}`, `{"Bars":[..]}`, `{"OptionQuotes":[..]}`) and are
//! deserialized into the domain model at this boundary.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::auth::TokenManager;
use crate::cache::CacheStore;
use crate::config::CacheConfig;
use crate::types::{Bar, GatewayError, OptionContract, OptionType, Quote};

// ---------------------------------------------------------------------------
// Data-gateway abstraction
// ---------------------------------------------------------------------------

/// Abstraction over the market-data upstream.
///
/// The regime classifier and spread scanner depend on this trait rather
/// than the concrete gateway, keeping the engine testable without a live
/// brokerage connection.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketData: Send + Sync {
    /// Real-time quote for a symbol.
    async fn quote(&self, symbol: &str) -> Result<Quote, GatewayError>;

    /// The most recent `count` daily bars, ordered oldest → newest.
    async fn daily_bars(&self, symbol: &str, count: u32) -> Result<Vec<Bar>, GatewayError>;

    /// Available option expiration dates for a symbol.
    async fn option_expirations(&self, symbol: &str) -> Result<Vec<NaiveDate>, GatewayError>;

    /// Full option chain for one expiration.
    async fn option_chain(
        &self,
        symbol: &str,
        expiration: NaiveDate,
    ) -> Result<Vec<OptionContract>, GatewayError>;
}

// ---------------------------------------------------------------------------
// Upstream API types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct QuotesEnvelope {
    #[serde(default)]
    quotes: Vec<QuoteRow>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct QuoteRow {
    #[serde(default)]
    symbol: Option<String>,
    last: f64,
    #[serde(default)]
    bid: f64,
    #[serde(default)]
    ask: f64,
    #[serde(default)]
    trade_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BarsEnvelope {
    #[serde(default)]
    bars: Vec<BarRow>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BarRow {
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    #[serde(default)]
    total_volume: u64,
    time_stamp: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ChainEnvelope {
    #[serde(default)]
    option_quotes: Vec<ChainRow>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ChainRow {
    strike: f64,
    option_type: String,
    #[serde(default)]
    bid: f64,
    #[serde(default)]
    ask: f64,
    #[serde(default)]
    expiration: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ExpirationsEnvelope {
    #[serde(default)]
    expirations: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StrikesEnvelope {
    #[serde(default)]
    strikes: Vec<f64>,
}

/// Decode a payload into an envelope, surfacing shape mismatches as
/// upstream contract violations.
fn decode<T: serde::de::DeserializeOwned>(
    payload: serde_json::Value,
    what: &str,
) -> Result<T, GatewayError> {
    serde_json::from_value(payload).map_err(|e| GatewayError::Upstream {
        status: 200,
        body: format!("unexpected {what} payload: {e}"),
    })
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

/// TTL tiers resolved from configuration.
#[derive(Debug, Clone, Copy)]
struct CacheTtls {
    quote: Duration,
    bars: Duration,
    chain: Duration,
    reference: Duration,
}

/// Read-only market-data client with token-managed auth and caching.
pub struct MarketDataGateway {
    http: Client,
    base_url: String,
    tokens: Arc<TokenManager>,
    cache: Arc<CacheStore>,
    ttl: CacheTtls,
}

impl MarketDataGateway {
    pub fn new(
        base_url: impl Into<String>,
        timeout_secs: u64,
        tokens: Arc<TokenManager>,
        cache: Arc<CacheStore>,
        cache_cfg: &CacheConfig,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent("CONDOR/0.1.0 (market-data-gateway)")
            .build()
            .context("Failed to build HTTP client for market-data upstream")?;

        Ok(Self {
            http,
            base_url: base_url.into(),
            tokens,
            cache,
            ttl: CacheTtls {
                quote: Duration::from_secs(cache_cfg.quote_ttl_secs),
                bars: Duration::from_secs(cache_cfg.bars_ttl_secs),
                chain: Duration::from_secs(cache_cfg.chain_ttl_secs),
                reference: Duration::from_secs(cache_cfg.reference_ttl_secs),
            },
        })
    }

    pub fn tokens(&self) -> &Arc<TokenManager> {
        &self.tokens
    }

    // -- Request plumbing --------------------------------------------------

    /// Make an authenticated GET against the upstream.
    ///
    /// A 401 triggers exactly one credential refresh and one retry; a
    /// second 401 surfaces as an authentication error rather than looping.
    async fn request(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<serde_json::Value, GatewayError> {
        if !self.tokens.ensure_valid().await {
            return Err(GatewayError::Authentication(
                "no usable credential".to_string(),
            ));
        }
        let token = self.bearer().await?;
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "Upstream request");

        let resp = self.send(&url, params, &token).await?;

        if resp.status() == StatusCode::UNAUTHORIZED {
            warn!(url = %url, "Upstream returned 401, refreshing credential and retrying once");
            if !self.tokens.refresh().await {
                return Err(GatewayError::Authentication(
                    "token refresh failed".to_string(),
                ));
            }
            let token = self.bearer().await?;
            let retry = self.send(&url, params, &token).await?;
            if retry.status() == StatusCode::UNAUTHORIZED {
                return Err(GatewayError::Authentication(
                    "authorization rejected after refresh".to_string(),
                ));
            }
            return Self::into_payload(retry).await;
        }

        Self::into_payload(resp).await
    }

    async fn bearer(&self) -> Result<String, GatewayError> {
        self.tokens
            .bearer()
            .await
            .ok_or_else(|| GatewayError::Authentication("no usable credential".to_string()))
    }

    async fn send(
        &self,
        url: &str,
        params: &[(&str, String)],
        token: &str,
    ) -> Result<reqwest::Response, GatewayError> {
        self.http
            .get(url)
            .query(params)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))
    }

    async fn into_payload(resp: reqwest::Response) -> Result<serde_json::Value, GatewayError> {
        let status = resp.status();
        if status == StatusCode::NOT_FOUND {
            return Err(GatewayError::NotFound(resp.url().path().to_string()));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(GatewayError::Upstream {
                status: status.as_u16(),
                body,
            });
        }
        resp.json()
            .await
            .map_err(|e| GatewayError::Transport(format!("invalid JSON payload: {e}")))
    }

    // -- Market data methods -----------------------------------------------

    /// Real-time quote. Cached briefly — quotes change rapidly.
    pub async fn get_quote(&self, symbol: &str) -> Result<Quote, GatewayError> {
        let key = format!("quote:{symbol}");
        if let Some(quote) = self.cache.get::<Quote>(&key) {
            return Ok(quote);
        }

        let path = format!("/marketdata/quotes/{}", urlencoding::encode(symbol));
        let payload = self.request(&path, &[]).await?;
        let envelope: QuotesEnvelope = decode(payload, "quote")?;

        let row = envelope
            .quotes
            .into_iter()
            .next()
            .ok_or_else(|| GatewayError::NotFound(format!("quote for {symbol}")))?;

        let quote = Quote {
            symbol: row.symbol.unwrap_or_else(|| symbol.to_string()),
            last: row.last,
            bid: row.bid,
            ask: row.ask,
            timestamp: row.trade_time.unwrap_or_else(Utc::now),
        };

        self.cache.set(&key, &quote, self.ttl.quote);
        Ok(quote)
    }

    /// Historical bars, ordered oldest → newest.
    pub async fn get_bars(
        &self,
        symbol: &str,
        interval: &str,
        unit: &str,
        count: u32,
        start_date: Option<NaiveDate>,
    ) -> Result<Vec<Bar>, GatewayError> {
        let start_key = start_date.map(|d| d.to_string()).unwrap_or_default();
        let key = format!("bars:{symbol}:{interval}:{unit}:{count}:{start_key}");
        if let Some(bars) = self.cache.get::<Vec<Bar>>(&key) {
            return Ok(bars);
        }

        let mut params = vec![
            ("interval", interval.to_string()),
            ("unit", unit.to_string()),
            ("barsback", count.to_string()),
        ];
        if let Some(date) = start_date {
            params.push(("firstdate", date.to_string()));
        }

        let path = format!("/marketdata/barcharts/{}", urlencoding::encode(symbol));
        let payload = self.request(&path, &params).await?;
        let envelope: BarsEnvelope = decode(payload, "bars")?;

        let bars: Vec<Bar> = envelope
            .bars
            .into_iter()
            .map(|row| Bar {
                open: row.open,
                high: row.high,
                low: row.low,
                close: row.close,
                volume: row.total_volume,
                timestamp: row.time_stamp,
            })
            .collect();

        self.cache.set(&key, &bars, self.ttl.bars);
        Ok(bars)
    }

    /// Option chain, optionally restricted to one expiration.
    pub async fn get_option_chain(
        &self,
        symbol: &str,
        expiration: Option<NaiveDate>,
    ) -> Result<Vec<OptionContract>, GatewayError> {
        let exp_key = expiration
            .map(|d| d.to_string())
            .unwrap_or_else(|| "front".to_string());
        let key = format!("chain:{symbol}:{exp_key}");
        if let Some(chain) = self.cache.get::<Vec<OptionContract>>(&key) {
            return Ok(chain);
        }

        let mut params = Vec::new();
        if let Some(date) = expiration {
            params.push(("expiration", date.to_string()));
        }

        let path = format!("/marketdata/options/chains/{}", urlencoding::encode(symbol));
        let payload = self.request(&path, &params).await?;
        let envelope: ChainEnvelope = decode(payload, "option chain")?;

        let chain: Vec<OptionContract> = envelope
            .option_quotes
            .into_iter()
            .filter_map(|row| {
                let option_type = match row.option_type.to_uppercase().as_str() {
                    "P" | "PUT" => OptionType::Put,
                    "C" | "CALL" => OptionType::Call,
                    other => {
                        warn!(symbol, option_type = other, "Skipping unknown option type");
                        return None;
                    }
                };
                let expiration = match row.expiration.or(expiration) {
                    Some(date) => date,
                    None => {
                        warn!(symbol, strike = row.strike, "Skipping contract with no expiration");
                        return None;
                    }
                };
                Some(OptionContract {
                    symbol: symbol.to_string(),
                    strike: row.strike,
                    expiration,
                    option_type,
                    bid: row.bid,
                    ask: row.ask,
                })
            })
            .collect();

        self.cache.set(&key, &chain, self.ttl.chain);
        Ok(chain)
    }

    /// Available expiration dates. Reference data — cached for a day.
    pub async fn get_option_expirations(
        &self,
        symbol: &str,
    ) -> Result<Vec<NaiveDate>, GatewayError> {
        let key = format!("expirations:{symbol}");
        if let Some(expirations) = self.cache.get::<Vec<NaiveDate>>(&key) {
            return Ok(expirations);
        }

        let path = format!(
            "/marketdata/options/expirations/{}",
            urlencoding::encode(symbol)
        );
        let payload = self.request(&path, &[]).await?;
        let envelope: ExpirationsEnvelope = decode(payload, "expirations")?;

        let expirations: Vec<NaiveDate> = envelope
            .expirations
            .iter()
            .filter_map(|s| match s.parse::<NaiveDate>() {
                Ok(date) => Some(date),
                Err(_) => {
                    warn!(symbol, value = %s, "Skipping unparseable expiration date");
                    None
                }
            })
            .collect();

        self.cache.set(&key, &expirations, self.ttl.reference);
        Ok(expirations)
    }

    /// Available strike prices for one expiration. Reference data.
    pub async fn get_option_strikes(
        &self,
        symbol: &str,
        expiration: NaiveDate,
    ) -> Result<Vec<f64>, GatewayError> {
        let key = format!("strikes:{symbol}:{expiration}");
        if let Some(strikes) = self.cache.get::<Vec<f64>>(&key) {
            return Ok(strikes);
        }

        let path = format!(
            "/marketdata/options/strikes/{}",
            urlencoding::encode(symbol)
        );
        let params = [("expiration", expiration.to_string())];
        let payload = self.request(&path, &params).await?;
        let envelope: StrikesEnvelope = decode(payload, "strikes")?;

        self.cache.set(&key, &envelope.strikes, self.ttl.reference);
        Ok(envelope.strikes)
    }

    /// Symbol search pass-through. Results are returned verbatim and
    /// never cached.
    pub async fn search_symbols(
        &self,
        query: &str,
        asset_type: &str,
    ) -> Result<serde_json::Value, GatewayError> {
        let params = [
            ("search", query.to_string()),
            ("assettype", asset_type.to_string()),
        ];
        self.request("/marketdata/symbollookup", &params).await
    }
}

#[async_trait]
impl MarketData for MarketDataGateway {
    async fn quote(&self, symbol: &str) -> Result<Quote, GatewayError> {
        self.get_quote(symbol).await
    }

    async fn daily_bars(&self, symbol: &str, count: u32) -> Result<Vec<Bar>, GatewayError> {
        self.get_bars(symbol, "1", "Daily", count, None).await
    }

    async fn option_expirations(&self, symbol: &str) -> Result<Vec<NaiveDate>, GatewayError> {
        self.get_option_expirations(symbol).await
    }

    async fn option_chain(
        &self,
        symbol: &str,
        expiration: NaiveDate,
    ) -> Result<Vec<OptionContract>, GatewayError> {
        self.get_option_chain(symbol, Some(expiration)).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
