//! API route handlers.
//!
//! All endpoints return JSON. Gateway errors map to status codes here:
//! authentication failures read as service-unavailable, upstream and
//! transport failures as gateway errors.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::AppState;
use crate::engine::orchestrator::{ScanStart, ScanStatus};
use crate::hours;
use crate::types::{Bar, GatewayError, OptionContract, Quote, RegimeSnapshot, SpreadStrategy, SymbolScan};

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorBody>);

fn error_response(err: GatewayError) -> ApiError {
    let status = match err {
        GatewayError::Authentication(_) => StatusCode::SERVICE_UNAVAILABLE,
        GatewayError::NotFound(_) => StatusCode::NOT_FOUND,
        GatewayError::Upstream { .. } => StatusCode::BAD_GATEWAY,
        GatewayError::Transport(_) => StatusCode::GATEWAY_TIMEOUT,
    };
    (
        status,
        Json(ErrorBody {
            error: err.to_string(),
        }),
    )
}

// ---------------------------------------------------------------------------
// Health & market session
// ---------------------------------------------------------------------------

/// GET /health
pub async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "healthy",
        "service": &state.name,
        "authenticated": state.tokens.is_authenticated().await,
        "scan_in_progress": state.orchestrator.is_scanning(),
    }))
}

/// GET /api/market/status
pub async fn market_status() -> Json<hours::MarketStatus> {
    Json(hours::market_status())
}

// ---------------------------------------------------------------------------
// Market-data pass-throughs
// ---------------------------------------------------------------------------

/// GET /api/quotes/:symbol
pub async fn get_quote(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> Result<Json<Quote>, ApiError> {
    state
        .gateway
        .get_quote(&symbol)
        .await
        .map(Json)
        .map_err(error_response)
}

#[derive(Debug, Deserialize)]
pub struct BarsQuery {
    #[serde(default = "default_interval")]
    pub interval: String,
    #[serde(default = "default_unit")]
    pub unit: String,
    #[serde(default = "default_bars_back")]
    pub bars_back: u32,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
}

fn default_interval() -> String {
    "1".to_string()
}
fn default_unit() -> String {
    "Minute".to_string()
}
fn default_bars_back() -> u32 {
    100
}

/// GET /api/bars/:symbol
pub async fn get_bars(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    Query(query): Query<BarsQuery>,
) -> Result<Json<Vec<Bar>>, ApiError> {
    state
        .gateway
        .get_bars(
            &symbol,
            &query.interval,
            &query.unit,
            query.bars_back,
            query.start_date,
        )
        .await
        .map(Json)
        .map_err(error_response)
}

#[derive(Debug, Deserialize)]
pub struct ChainQuery {
    #[serde(default)]
    pub expiration: Option<NaiveDate>,
}

/// GET /api/options/chain/:symbol
pub async fn get_option_chain(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    Query(query): Query<ChainQuery>,
) -> Result<Json<Vec<OptionContract>>, ApiError> {
    state
        .gateway
        .get_option_chain(&symbol, query.expiration)
        .await
        .map(Json)
        .map_err(error_response)
}

/// GET /api/options/expirations/:symbol
pub async fn get_option_expirations(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> Result<Json<Vec<NaiveDate>>, ApiError> {
    state
        .gateway
        .get_option_expirations(&symbol)
        .await
        .map(Json)
        .map_err(error_response)
}

#[derive(Debug, Deserialize)]
pub struct StrikesQuery {
    pub expiration: NaiveDate,
}

/// GET /api/options/strikes/:symbol
pub async fn get_option_strikes(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
    Query(query): Query<StrikesQuery>,
) -> Result<Json<Vec<f64>>, ApiError> {
    state
        .gateway
        .get_option_strikes(&symbol, query.expiration)
        .await
        .map(Json)
        .map_err(error_response)
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub query: String,
    #[serde(default = "default_asset_type")]
    pub asset_type: String,
}

fn default_asset_type() -> String {
    "STOCK".to_string()
}

/// GET /api/symbols/search
pub async fn search_symbols(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .gateway
        .search_symbols(&query.query, &query.asset_type)
        .await
        .map(Json)
        .map_err(error_response)
}

#[derive(Debug, Deserialize)]
pub struct ClearCacheQuery {
    #[serde(default = "default_pattern")]
    pub pattern: String,
}

fn default_pattern() -> String {
    "*".to_string()
}

/// DELETE /api/cache/clear
pub async fn clear_cache(
    State(state): State<AppState>,
    Query(query): Query<ClearCacheQuery>,
) -> Json<serde_json::Value> {
    let cleared = state.cache.clear_matching(&format!("*{}*", query.pattern));
    Json(json!({ "cleared": cleared, "pattern": query.pattern }))
}

// ---------------------------------------------------------------------------
// Regime & scanning
// ---------------------------------------------------------------------------

/// GET /api/regime
pub async fn get_regime(State(state): State<AppState>) -> Json<RegimeSnapshot> {
    Json(state.classifier.detect_regime().await)
}

/// GET /api/regime/symbols
pub async fn get_scan_symbols(State(state): State<AppState>) -> Json<serde_json::Value> {
    let symbols = state.classifier.scan_symbols(None).await;
    Json(json!({ "symbols": symbols }))
}

/// GET /api/scan/options/:symbol
pub async fn scan_options(
    State(state): State<AppState>,
    Path(symbol): Path<String>,
) -> Json<SymbolScan> {
    Json(state.scanner.scan_symbol(&symbol).await)
}

#[derive(Debug, Default, Deserialize)]
pub struct ScanRequest {
    #[serde(default)]
    pub symbols: Option<Vec<String>>,
}

/// POST /api/scan/full
///
/// Fire-and-forget: the scan runs in the background and the response
/// points at the status endpoint.
pub async fn start_full_scan(
    State(state): State<AppState>,
    body: Option<Json<ScanRequest>>,
) -> Json<serde_json::Value> {
    let symbols = body.and_then(|Json(request)| request.symbols);

    match state.orchestrator.start_full_scan(symbols) {
        ScanStart::Started => Json(json!({
            "status": "scan_started",
            "message": "Full scan initiated in background",
            "check_status": "/api/scan/status",
        })),
        ScanStart::AlreadyRunning => Json(json!({
            "status": "scan_already_in_progress",
            "message": "A scan is already running",
        })),
    }
}

/// GET /api/scan/status
pub async fn scan_status(State(state): State<AppState>) -> Json<ScanStatus> {
    Json(state.orchestrator.status().await)
}

#[derive(Debug, Deserialize)]
pub struct OpportunitiesQuery {
    #[serde(default)]
    pub strategy: Option<String>,
    #[serde(default)]
    pub min_score: f64,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    20
}

/// GET /api/opportunities
pub async fn get_opportunities(
    State(state): State<AppState>,
    Query(query): Query<OpportunitiesQuery>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let strategy = match query.strategy.as_deref() {
        Some(s) => Some(s.parse::<SpreadStrategy>().map_err(|e| {
            (
                StatusCode::BAD_REQUEST,
                Json(ErrorBody {
                    error: e.to_string(),
                }),
            )
        })?),
        None => None,
    };

    match state
        .orchestrator
        .opportunities(strategy, query.min_score, query.limit)
        .await
    {
        Some(page) => Ok(Json(serde_json::to_value(page).unwrap_or_default())),
        None => Ok(Json(json!({
            "message": "No scan results available. Run /api/scan/full first",
            "opportunities": [],
        }))),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
