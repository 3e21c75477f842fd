//! OAuth2 token lifecycle management.
//!
//! Keeps a long-lived brokerage credential valid across process restarts
//! and transient auth failures. The credential is persisted to an
//! owner-only JSON file and refreshed via the refresh-token grant when it
//! is within 60 seconds of expiry. Refreshes are single-flight: concurrent
//! callers serialize on the credential lock, and late arrivals observe the
//! already-refreshed expiry instead of issuing a second upstream refresh.
//!
//! A failed refresh is non-fatal — callers surface an authentication error
//! upward and the refresh is retried lazily on the next call.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

/// Refresh when the credential is within this many seconds of expiry.
const REFRESH_MARGIN_SECS: i64 = 60;

/// Expiry assumed when the token endpoint omits `expires_in`.
const DEFAULT_EXPIRES_IN_SECS: i64 = 1200;

/// Credential file name used when no explicit path is configured.
const DEFAULT_TOKEN_FILE: &str = ".condor_token.json";

// ---------------------------------------------------------------------------
// Credential
// ---------------------------------------------------------------------------

/// An OAuth2 credential pair with its absolute expiry.
///
/// Mutated only by [`TokenManager`]; never deleted, only overwritten.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credential {
    /// Whether the access token is expired or expiring within the
    /// refresh margin. A credential with no known expiry never triggers
    /// a proactive refresh.
    pub fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at {
            Some(expires_at) => now >= expires_at - Duration::seconds(REFRESH_MARGIN_SECS),
            None => false,
        }
    }

    pub fn has_access_token(&self) -> bool {
        !self.access_token.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Credential store
// ---------------------------------------------------------------------------

/// Durable credential storage with owner-only permissions.
///
/// Writes are atomic: the credential is serialized to a uniquely named
/// temp file, restricted to mode 0600, then renamed over the target.
/// The temp file is removed on every error path.
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Default location: `~/.condor_token.json`.
    pub fn default_path() -> PathBuf {
        std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join(DEFAULT_TOKEN_FILE)
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Load the stored credential. Returns None if the file doesn't exist.
    pub fn load(&self) -> Result<Option<Credential>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let json = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read credential file {}", self.path.display()))?;
        let credential: Credential = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse credential file {}", self.path.display()))?;
        Ok(Some(credential))
    }

    /// Persist the credential atomically with owner-only permissions.
    pub fn save(&self, credential: &Credential) -> Result<()> {
        let json = serde_json::to_string_pretty(credential)
            .context("Failed to serialize credential")?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create credential directory {}", parent.display())
                })?;
            }
        }

        let temp = self
            .path
            .with_file_name(format!(".{}.tmp", uuid::Uuid::new_v4()));

        let result = (|| -> Result<()> {
            std::fs::write(&temp, &json)
                .with_context(|| format!("Failed to write {}", temp.display()))?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(&temp, std::fs::Permissions::from_mode(0o600))
                    .with_context(|| format!("Failed to restrict {}", temp.display()))?;
            }

            std::fs::rename(&temp, &self.path)
                .with_context(|| format!("Failed to move credential into {}", self.path.display()))?;
            Ok(())
        })();

        if result.is_err() {
            let _ = std::fs::remove_file(&temp);
        }
        result
    }
}

// ---------------------------------------------------------------------------
// Token endpoint types
// ---------------------------------------------------------------------------

/// Response from the OAuth2 token endpoint (refresh-token grant).
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

// ---------------------------------------------------------------------------
// Token manager
// ---------------------------------------------------------------------------

/// Owns the OAuth2 credential lifecycle.
pub struct TokenManager {
    http: Client,
    token_url: String,
    client_id: String,
    client_secret: SecretString,
    store: CredentialStore,
    credential: Mutex<Option<Credential>>,
}

impl TokenManager {
    /// Create a manager, restoring any credential already on disk.
    ///
    /// The initial credential comes from a prior authorization-code
    /// exchange outside this service's scope; this manager only keeps
    /// it alive from there.
    pub fn new(
        token_url: String,
        client_id: String,
        client_secret: SecretString,
        store: CredentialStore,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent("CONDOR/0.1.0 (market-data-gateway)")
            .build()
            .context("Failed to build HTTP client for token endpoint")?;

        let credential = match store.load() {
            Ok(Some(credential)) => {
                info!(path = %store.path().display(), "Loaded stored credential");
                Some(credential)
            }
            Ok(None) => {
                warn!(
                    path = %store.path().display(),
                    "No stored credential; authorization flow required before upstream calls"
                );
                None
            }
            Err(e) => {
                error!(error = %e, "Failed to load stored credential");
                None
            }
        };

        Ok(Self {
            http,
            token_url,
            client_id,
            client_secret,
            store,
            credential: Mutex::new(credential),
        })
    }

    /// Replace the in-memory credential (e.g. after an initial
    /// authorization exchange performed elsewhere).
    pub async fn install_credential(&self, credential: Credential) {
        *self.credential.lock().await = Some(credential);
    }

    /// Ensure a usable access token exists.
    ///
    /// Returns true immediately when the token has more than the refresh
    /// margin of validity left. When it is expired or expiring soon the
    /// call synchronously attempts a refresh and returns that outcome.
    /// Returns false when no usable credential exists at all.
    pub async fn ensure_valid(&self) -> bool {
        let mut slot = self.credential.lock().await;

        if let Some(credential) = slot.as_ref() {
            if credential.needs_refresh(Utc::now()) {
                info!("Access token expired or expiring soon, refreshing");
                return self.refresh_locked(&mut slot).await;
            }
        }

        match slot.as_ref() {
            Some(credential) if credential.has_access_token() => true,
            _ => {
                error!("No access token available; complete the authorization flow first");
                false
            }
        }
    }

    /// Force a refresh-token exchange, regardless of current expiry.
    pub async fn refresh(&self) -> bool {
        let mut slot = self.credential.lock().await;
        self.refresh_locked(&mut slot).await
    }

    /// The current bearer token, if any.
    pub async fn bearer(&self) -> Option<String> {
        self.credential
            .lock()
            .await
            .as_ref()
            .filter(|c| c.has_access_token())
            .map(|c| c.access_token.clone())
    }

    pub async fn is_authenticated(&self) -> bool {
        self.bearer().await.is_some()
    }

    /// Exchange the refresh token while holding the credential lock.
    ///
    /// On any failure the stored state — in memory and on disk — is left
    /// untouched and false is returned.
    async fn refresh_locked(&self, slot: &mut Option<Credential>) -> bool {
        let refresh_token = match slot.as_ref().and_then(|c| c.refresh_token.clone()) {
            Some(token) => token,
            None => {
                error!("No refresh token available");
                return false;
            }
        };

        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.as_str()),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.expose_secret()),
        ];

        let resp = match self.http.post(&self.token_url).form(&params).send().await {
            Ok(resp) => resp,
            Err(e) => {
                error!(error = %e, "Token refresh request failed");
                return false;
            }
        };

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            error!(%status, body, "Token refresh rejected");
            return false;
        }

        let token: TokenResponse = match resp.json().await {
            Ok(token) => token,
            Err(e) => {
                error!(error = %e, "Failed to parse token response");
                return false;
            }
        };

        let expires_in = token.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS);
        let refreshed = Credential {
            access_token: token.access_token,
            // The endpoint may rotate the refresh token; keep the old one
            // when it doesn't.
            refresh_token: token.refresh_token.or(Some(refresh_token)),
            expires_at: Some(Utc::now() + Duration::seconds(expires_in)),
        };

        if let Err(e) = self.store.save(&refreshed) {
            warn!(error = %e, "Failed to persist refreshed credential");
        }

        *slot = Some(refreshed);
        info!("Access token refreshed");
        true
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
