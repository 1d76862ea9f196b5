//! Bridge configuration
//!
//! Defaults come from [`authbridge_core::branding`]; every field can be
//! overridden from the environment (the binary loads `.env` first).

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use authbridge_core::{branding, Provider};
use authbridge_storage::{parse_master_key, KEY_SIZE};
use zeroize::Zeroizing;

use crate::oauth::ProviderEndpoints;

const DEFAULT_ATLASSIAN_SCOPES: &str = "read:jira-work write:jira-work read:jira-user \
     read:confluence-content.all read:confluence-space.summary search:confluence offline_access";
const DEFAULT_FIGMA_SCOPES: &str = "files:read";
const DEFAULT_GOOGLE_SCOPES: &str = "https://www.googleapis.com/auth/drive.readonly openid email";

/// OAuth client registered with one upstream provider
#[derive(Clone)]
pub struct ProviderCredentials {
    pub client_id: String,
    pub client_secret: Zeroizing<String>,
    pub scopes: Vec<String>,
    /// Endpoint override; `None` uses the provider's public endpoints
    pub endpoints: Option<ProviderEndpoints>,
}

impl ProviderCredentials {
    pub fn new(client_id: impl Into<String>, client_secret: impl Into<String>, scopes: Vec<String>) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: Zeroizing::new(client_secret.into()),
            scopes,
            endpoints: None,
        }
    }

    pub fn with_endpoints(mut self, endpoints: ProviderEndpoints) -> Self {
        self.endpoints = Some(endpoints);
        self
    }

    /// Space-separated scope string for the authorize URL
    pub fn scope(&self) -> String {
        self.scopes.join(" ")
    }
}

impl std::fmt::Debug for ProviderCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("scopes", &self.scopes)
            .field("endpoints", &self.endpoints)
            .finish()
    }
}

/// Credentials per provider. Unconfigured providers are `None`.
#[derive(Debug, Clone, Default)]
pub struct ProvidersConfig {
    pub atlassian: Option<ProviderCredentials>,
    pub figma: Option<ProviderCredentials>,
    pub google: Option<ProviderCredentials>,
}

impl ProvidersConfig {
    pub fn get(&self, provider: Provider) -> Option<&ProviderCredentials> {
        match provider {
            Provider::Atlassian => self.atlassian.as_ref(),
            Provider::Figma => self.figma.as_ref(),
            Provider::Google => self.google.as_ref(),
        }
    }

    pub fn set(&mut self, provider: Provider, credentials: ProviderCredentials) {
        let slot = match provider {
            Provider::Atlassian => &mut self.atlassian,
            Provider::Figma => &mut self.figma,
            Provider::Google => &mut self.google,
        };
        *slot = Some(credentials);
    }

    pub fn configured(&self) -> Vec<Provider> {
        Provider::ALL
            .into_iter()
            .filter(|p| self.get(*p).is_some())
            .collect()
    }
}

/// Bridge server configuration
#[derive(Clone)]
pub struct BridgeConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Public base URL; defaults to `http://localhost:<port>`
    pub base_url: Option<String>,
    /// Enable CORS for browser access
    pub enable_cors: bool,
    /// Envelope sealing secret. `None` means the caller must generate one.
    pub session_secret: Option<Zeroizing<[u8; KEY_SIZE]>>,
    pub access_token_ttl: chrono::Duration,
    pub refresh_token_ttl: chrono::Duration,
    /// Provider tokens expiring within this window count as stale
    pub clock_skew: chrono::Duration,
    /// Timeout for provider token endpoint calls
    pub provider_timeout: Duration,
    /// Emit `resource_metadata_url` for clients matching `compat_client_markers`
    pub vscode_compat: bool,
    pub compat_client_markers: Vec<String>,
    /// SQLite store location; `None` keeps everything in memory
    pub database_path: Option<PathBuf>,
    /// Rate-limit by the first `X-Forwarded-For` hop instead of the peer
    /// address. Only safe behind a proxy that overwrites the header.
    pub trust_forwarded_for: bool,
    pub providers: ProvidersConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: branding::DEFAULT_PORT,
            base_url: None,
            enable_cors: true,
            session_secret: None,
            access_token_ttl: chrono::Duration::seconds(branding::DEFAULT_ACCESS_TOKEN_TTL_SECS),
            refresh_token_ttl: chrono::Duration::seconds(branding::DEFAULT_REFRESH_TOKEN_TTL_SECS),
            clock_skew: chrono::Duration::seconds(branding::DEFAULT_CLOCK_SKEW_SECS),
            provider_timeout: Duration::from_secs(branding::DEFAULT_PROVIDER_TIMEOUT_SECS),
            vscode_compat: true,
            compat_client_markers: branding::VSCODE_CLIENT_MARKERS
                .iter()
                .map(|m| m.to_string())
                .collect(),
            database_path: None,
            trust_forwarded_for: false,
            providers: ProvidersConfig::default(),
        }
    }
}

impl BridgeConfig {
    /// Read configuration from process environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup` (injectable for tests)
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let mut config = Self::default();

        if let Some(host) = get("BRIDGE_HOST") {
            config.host = host;
        }
        if let Some(port) = get("BRIDGE_PORT") {
            config.port = port.parse().with_context(|| format!("Invalid BRIDGE_PORT: {}", port))?;
        }
        config.base_url = get("BRIDGE_BASE_URL").map(|u| u.trim_end_matches('/').to_string());

        if let Some(secret) = get("BRIDGE_SESSION_SECRET") {
            config.session_secret =
                Some(parse_master_key(&secret).context("Invalid BRIDGE_SESSION_SECRET")?);
        }

        let seconds = |key: &str| -> Result<Option<i64>> {
            match get(key) {
                Some(v) => {
                    let secs: i64 = v.parse().with_context(|| format!("Invalid {}: {}", key, v))?;
                    if secs < 0 {
                        anyhow::bail!("{} must not be negative", key);
                    }
                    Ok(Some(secs))
                }
                None => Ok(None),
            }
        };

        if let Some(secs) = seconds("BRIDGE_ACCESS_TOKEN_TTL_SECS")? {
            config.access_token_ttl = chrono::Duration::seconds(secs);
        }
        if let Some(secs) = seconds("BRIDGE_REFRESH_TOKEN_TTL_SECS")? {
            config.refresh_token_ttl = chrono::Duration::seconds(secs);
        }
        if let Some(secs) = seconds("BRIDGE_CLOCK_SKEW_SECS")? {
            config.clock_skew = chrono::Duration::seconds(secs);
        }
        if let Some(secs) = seconds("BRIDGE_PROVIDER_TIMEOUT_SECS")? {
            config.provider_timeout = Duration::from_secs(secs as u64);
        }
        if let Some(flag) = get("BRIDGE_VSCODE_COMPAT") {
            config.vscode_compat = parse_bool(&flag)
                .with_context(|| format!("Invalid BRIDGE_VSCODE_COMPAT: {}", flag))?;
        }
        config.database_path = get("BRIDGE_DATABASE_PATH").map(PathBuf::from);
        if let Some(flag) = get("BRIDGE_TRUST_FORWARDED_FOR") {
            config.trust_forwarded_for = parse_bool(&flag)
                .with_context(|| format!("Invalid BRIDGE_TRUST_FORWARDED_FOR: {}", flag))?;
        }

        for provider in Provider::ALL {
            let prefix = provider.as_str().to_ascii_uppercase();
            let Some(client_id) = get(&format!("{}_CLIENT_ID", prefix)) else {
                continue;
            };
            let secret = get(&format!("{}_CLIENT_SECRET", prefix)).unwrap_or_default();
            let scopes = get(&format!("{}_SCOPES", prefix))
                .unwrap_or_else(|| default_scopes(provider).to_string());
            config.providers.set(
                provider,
                ProviderCredentials::new(client_id, secret, split_scopes(&scopes)),
            );
        }

        Ok(config)
    }

    /// Get the socket address
    pub fn addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }

    /// Public base URL of the bridge
    pub fn base_url(&self) -> String {
        self.base_url
            .clone()
            .unwrap_or_else(|| format!("http://localhost:{}", self.port))
    }
}

impl std::fmt::Debug for BridgeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("base_url", &self.base_url)
            .field("enable_cors", &self.enable_cors)
            .field("session_secret", &self.session_secret.as_ref().map(|_| "[REDACTED]"))
            .field("access_token_ttl", &self.access_token_ttl)
            .field("refresh_token_ttl", &self.refresh_token_ttl)
            .field("clock_skew", &self.clock_skew)
            .field("provider_timeout", &self.provider_timeout)
            .field("vscode_compat", &self.vscode_compat)
            .field("database_path", &self.database_path)
            .field("trust_forwarded_for", &self.trust_forwarded_for)
            .field("providers", &self.providers)
            .finish()
    }
}

pub fn default_scopes(provider: Provider) -> &'static str {
    match provider {
        Provider::Atlassian => DEFAULT_ATLASSIAN_SCOPES,
        Provider::Figma => DEFAULT_FIGMA_SCOPES,
        Provider::Google => DEFAULT_GOOGLE_SCOPES,
    }
}

/// Accepts space or comma separated scope lists
fn split_scopes(scopes: &str) -> Vec<String> {
    scopes
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
