//! CONDOR — Credit-Spread Opportunity Scanner
//!
//! Entry point. Loads configuration, initialises structured logging,
//! wires the token manager, cache, gateway, and engine together, and
//! serves the JSON API with graceful shutdown.

use anyhow::{Context, Result};
use secrecy::SecretString;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use condor::auth::{CredentialStore, TokenManager};
use condor::cache::CacheStore;
use condor::config::AppConfig;
use condor::engine::orchestrator::ScanOrchestrator;
use condor::engine::regime::RegimeClassifier;
use condor::engine::spreads::{ScanParams, SpreadScanner};
use condor::gateway::{MarketData, MarketDataGateway};
use condor::server::{self, ServiceState};

const BANNER: &str = r#"
   ____ ___  _   _ ____   ___  ____
  / ___/ _ \| \ | |  _ \ / _ \|  _ \
 | |  | | | |  \| | | | | | | | |_) |
 | |__| |_| | |\  | |_| | |_| |  _ <
  \____\___/|_| \_|____/ \___/|_| \_\

  Credit-Spread Opportunity Scanner
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    // Load configuration from TOML
    let cfg = AppConfig::load("config.toml")?;

    // Initialise structured logging
    init_logging();

    // Print startup banner
    println!("{BANNER}");
    info!(
        service = %cfg.service.name,
        port = cfg.service.port,
        upstream = %cfg.upstream.base_url,
        "CONDOR starting up"
    );

    // -- Credentials ------------------------------------------------------

    let client_id = AppConfig::resolve_env(&cfg.auth.client_id_env)
        .context("Upstream client id not configured")?;
    let client_secret = AppConfig::resolve_env(&cfg.auth.client_secret_env)
        .context("Upstream client secret not configured")?;

    let token_path = cfg
        .auth
        .token_path
        .as_ref()
        .map(std::path::PathBuf::from)
        .unwrap_or_else(CredentialStore::default_path);
    let tokens = Arc::new(TokenManager::new(
        cfg.upstream.token_url.clone(),
        client_id,
        SecretString::new(client_secret),
        CredentialStore::new(token_path),
    )?);

    if tokens.is_authenticated().await {
        info!("Upstream credential loaded");
    } else {
        warn!("No upstream credential yet — complete the authorization flow to enable data access");
    }

    // -- Components -------------------------------------------------------

    let cache = Arc::new(CacheStore::new());
    let gateway = Arc::new(MarketDataGateway::new(
        cfg.upstream.base_url.clone(),
        cfg.upstream.timeout_secs,
        Arc::clone(&tokens),
        Arc::clone(&cache),
        &cfg.cache,
    )?);

    let data: Arc<dyn MarketData> = Arc::clone(&gateway) as Arc<dyn MarketData>;
    let classifier = Arc::new(RegimeClassifier::new(Arc::clone(&data)));
    let scanner = Arc::new(SpreadScanner::new(data, ScanParams::from(&cfg.scanner)));
    let orchestrator = Arc::new(ScanOrchestrator::new(
        Arc::clone(&classifier),
        Arc::clone(&scanner),
        Duration::from_secs(cfg.scanner.pacing_delay_secs),
        cfg.scanner.overall_limit,
    ));

    let state = Arc::new(ServiceState {
        name: cfg.service.name.clone(),
        gateway,
        classifier,
        scanner,
        orchestrator,
        cache,
        tokens,
    });

    // -- Serve until shutdown ---------------------------------------------

    let server_state = Arc::clone(&state);
    let port = cfg.service.port;

    tokio::select! {
        result = server::serve(server_state, port) => {
            result.context("API server error")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received.");
        }
    }

    state.shutdown();
    info!("CONDOR shut down cleanly.");
    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("condor=info"));

    let json_logging = std::env::var("CONDOR_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt().with_env_filter(env_filter).with_target(true).init();
    }
}
