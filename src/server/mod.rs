//! HTTP service — Axum JSON API over the scanner core.
//!
//! The route layer stays mechanical: request parsing, handler dispatch,
//! and error → status-code mapping. All logic lives in the core
//! components, reached through shared `Arc` state. CORS enabled for
//! local development.

pub mod routes;

use axum::{
    http::{header, HeaderValue, Method},
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;
use tracing::info;

use crate::auth::TokenManager;
use crate::cache::CacheStore;
use crate::engine::orchestrator::ScanOrchestrator;
use crate::engine::regime::RegimeClassifier;
use crate::engine::spreads::SpreadScanner;
use crate::gateway::MarketDataGateway;

/// Shared state accessible by all route handlers.
pub struct ServiceState {
    pub name: String,
    pub gateway: Arc<MarketDataGateway>,
    pub classifier: Arc<RegimeClassifier>,
    pub scanner: Arc<SpreadScanner>,
    pub orchestrator: Arc<ScanOrchestrator>,
    pub cache: Arc<CacheStore>,
    pub tokens: Arc<TokenManager>,
}

impl ServiceState {
    /// Release held resources. HTTP connection pools close when the
    /// last `Arc` drops; the cache is emptied eagerly.
    pub fn shutdown(&self) {
        let cleared = self.cache.clear_matching("*");
        info!(cleared, "Service shut down, cache released");
    }
}

pub type AppState = Arc<ServiceState>;

/// Serve the API until the process is shut down.
pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let app = build_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!(port, "API server starting on http://localhost:{port}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = tower_http::cors::CorsLayer::new()
        .allow_origin("*".parse::<HeaderValue>().unwrap())
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        // Health and market session
        .route("/health", get(routes::health))
        .route("/api/market/status", get(routes::market_status))
        // Market-data pass-throughs
        .route("/api/quotes/:symbol", get(routes::get_quote))
        .route("/api/bars/:symbol", get(routes::get_bars))
        .route("/api/options/chain/:symbol", get(routes::get_option_chain))
        .route(
            "/api/options/expirations/:symbol",
            get(routes::get_option_expirations),
        )
        .route(
            "/api/options/strikes/:symbol",
            get(routes::get_option_strikes),
        )
        .route("/api/symbols/search", get(routes::search_symbols))
        .route("/api/cache/clear", delete(routes::clear_cache))
        // Regime and scanning
        .route("/api/regime", get(routes::get_regime))
        .route("/api/regime/symbols", get(routes::get_scan_symbols))
        .route("/api/scan/options/:symbol", get(routes::scan_options))
        .route("/api/scan/full", post(routes::start_full_scan))
        .route("/api/scan/status", get(routes::scan_status))
        .route("/api/opportunities", get(routes::get_opportunities))
        .layer(cors)
        .with_state(state)
}
