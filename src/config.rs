//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Secrets (OAuth client credentials) are referenced by env-var name in
//! the config and resolved at runtime via `std::env::var`.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub service: ServiceConfig,
    pub upstream: UpstreamConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub scanner: ScannerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServiceConfig {
    pub name: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct UpstreamConfig {
    /// Market-data API base, e.g. "https://api.tradestation.com/v3".
    pub base_url: String,
    /// OAuth2 token endpoint for the refresh-token grant.
    pub token_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub client_id_env: String,
    pub client_secret_env: String,
    /// Credential file location. Defaults to `~/.condor_token.json`.
    #[serde(default)]
    pub token_path: Option<String>,
}

/// TTL tiers applied by the gateway. Reference data (expirations,
/// strikes) is cached far longer than time-sensitive pricing data.
#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    #[serde(default = "default_quote_ttl")]
    pub quote_ttl_secs: u64,
    #[serde(default = "default_bars_ttl")]
    pub bars_ttl_secs: u64,
    #[serde(default = "default_chain_ttl")]
    pub chain_ttl_secs: u64,
    #[serde(default = "default_reference_ttl")]
    pub reference_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            quote_ttl_secs: default_quote_ttl(),
            bars_ttl_secs: default_bars_ttl(),
            chain_ttl_secs: default_chain_ttl(),
            reference_ttl_secs: default_reference_ttl(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ScannerConfig {
    #[serde(default = "default_min_dte")]
    pub min_dte: i64,
    #[serde(default = "default_max_dte")]
    pub max_dte: i64,
    #[serde(default = "default_min_credit")]
    pub min_credit: f64,
    #[serde(default = "default_spread_width")]
    pub spread_width: f64,
    #[serde(default = "default_max_expirations")]
    pub max_expirations: usize,
    #[serde(default = "default_per_symbol_limit")]
    pub per_symbol_limit: usize,
    #[serde(default = "default_overall_limit")]
    pub overall_limit: usize,
    /// Fixed inter-symbol delay during a batch scan — the sole
    /// upstream rate-limiting mechanism.
    #[serde(default = "default_pacing_delay")]
    pub pacing_delay_secs: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            min_dte: default_min_dte(),
            max_dte: default_max_dte(),
            min_credit: default_min_credit(),
            spread_width: default_spread_width(),
            max_expirations: default_max_expirations(),
            per_symbol_limit: default_per_symbol_limit(),
            overall_limit: default_overall_limit(),
            pacing_delay_secs: default_pacing_delay(),
        }
    }
}

fn default_timeout_secs() -> u64 {
    30
}
fn default_quote_ttl() -> u64 {
    5
}
fn default_bars_ttl() -> u64 {
    60
}
fn default_chain_ttl() -> u64 {
    60
}
fn default_reference_ttl() -> u64 {
    86_400
}
fn default_min_dte() -> i64 {
    20
}
fn default_max_dte() -> i64 {
    45
}
fn default_min_credit() -> f64 {
    0.25
}
fn default_spread_width() -> f64 {
    5.0
}
fn default_max_expirations() -> usize {
    3
}
fn default_per_symbol_limit() -> usize {
    10
}
fn default_overall_limit() -> usize {
    50
}
fn default_pacing_delay() -> u64 {
    1
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        Ok(config)
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }
}
