//! Upstream provider token exchangers
//!
//! One [`TokenExchanger`] per provider. Each knows its authorize URL shape,
//! token endpoint, and client credential handling; all of them go through the
//! shared form-POST helper in this module so error classification is uniform.

mod atlassian;
mod figma;
mod google;

pub use atlassian::AtlassianExchanger;
pub use figma::FigmaExchanger;
pub use google::GoogleExchanger;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use authbridge_core::{branding, AuthExchangeError, Provider, ProviderTokenSet};
use chrono::Utc;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::{ProviderCredentials, ProvidersConfig};

/// Capability set of one upstream provider
#[async_trait]
pub trait TokenExchanger: Send + Sync {
    fn provider(&self) -> Provider;

    /// Consent URL the user agent is redirected to
    fn authorization_url(&self, state: &str, code_challenge: &str, redirect_uri: &str) -> String;

    /// Exchange a single-use authorization code
    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
    ) -> Result<ProviderTokenSet, AuthExchangeError>;

    /// Refresh an access token. The result is already merged with `existing`
    /// (refresh token carried forward when the provider does not rotate).
    async fn refresh_token(
        &self,
        existing: &ProviderTokenSet,
    ) -> Result<ProviderTokenSet, AuthExchangeError>;
}

/// Endpoint URLs of one provider. Overridable so tests can point them at a
/// mock server.
#[derive(Debug, Clone)]
pub struct ProviderEndpoints {
    pub authorize_url: String,
    pub token_url: String,
    /// Separate refresh endpoint (Figma); `None` means `token_url`
    pub refresh_url: Option<String>,
    /// API root for post-exchange lookups (Atlassian accessible resources)
    pub api_base_url: Option<String>,
}

impl ProviderEndpoints {
    pub fn defaults(provider: Provider) -> Self {
        match provider {
            Provider::Atlassian => Self {
                authorize_url: "https://auth.atlassian.com/authorize".into(),
                token_url: "https://auth.atlassian.com/oauth/token".into(),
                refresh_url: None,
                api_base_url: Some("https://api.atlassian.com".into()),
            },
            Provider::Figma => Self {
                authorize_url: "https://www.figma.com/oauth".into(),
                token_url: "https://api.figma.com/v1/oauth/token".into(),
                refresh_url: Some("https://api.figma.com/v1/oauth/refresh".into()),
                api_base_url: None,
            },
            Provider::Google => Self {
                authorize_url: "https://accounts.google.com/o/oauth2/v2/auth".into(),
                token_url: "https://oauth2.googleapis.com/token".into(),
                refresh_url: None,
                api_base_url: None,
            },
        }
    }

    /// Point every endpoint at `base` keeping the default paths
    /// (`http://127.0.0.1:9999` + `/oauth/token`).
    pub fn with_base(provider: Provider, base: &str) -> Self {
        let base = base.trim_end_matches('/');
        let rebase = |url: &str| match url::Url::parse(url) {
            Ok(parsed) => format!("{}{}", base, parsed.path()),
            Err(_) => url.to_string(),
        };
        let defaults = Self::defaults(provider);
        Self {
            authorize_url: rebase(&defaults.authorize_url),
            token_url: rebase(&defaults.token_url),
            refresh_url: defaults.refresh_url.as_deref().map(rebase),
            api_base_url: defaults.api_base_url.map(|_| base.to_string()),
        }
    }

    pub fn refresh_url(&self) -> &str {
        self.refresh_url.as_deref().unwrap_or(&self.token_url)
    }
}

/// Build an authorize URL from base + query pairs
pub(crate) fn build_authorize_url(base: &str, params: &[(&str, &str)]) -> String {
    match url::Url::parse(base) {
        Ok(mut url) => {
            url.query_pairs_mut().extend_pairs(params.iter().copied());
            url.to_string()
        }
        Err(_) => {
            let query = params
                .iter()
                .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
                .collect::<Vec<_>>()
                .join("&");
            format!("{}?{}", base, query)
        }
    }
}

/// Successful token endpoint response
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub scope: Option<String>,
    /// Everything else the provider sent (id_token, user_id, ...)
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl TokenResponse {
    pub fn into_token_set(self, provider: Provider) -> ProviderTokenSet {
        let expires_in = self
            .expires_in
            .filter(|secs| *secs > 0)
            .unwrap_or(branding::DEFAULT_PROVIDER_TOKEN_TTL_SECS);

        let mut set = ProviderTokenSet::new(
            provider,
            self.access_token,
            self.refresh_token.filter(|t| !t.is_empty()),
            Utc::now() + chrono::Duration::seconds(expires_in),
        );
        set.token_type = self.token_type.unwrap_or_else(|| "Bearer".to_string());
        set.scope = self.scope.unwrap_or_default();
        set.raw = self.extra;
        set
    }
}

/// Client authentication at the token endpoint
pub(crate) enum ClientAuth<'a> {
    /// `client_id` and `client_secret` form fields
    Body { client_id: &'a str, client_secret: &'a str },
    /// HTTP Basic `client_id:client_secret`
    Basic { client_id: &'a str, client_secret: &'a str },
}

/// Shared token endpoint client: form-encoded POST with an explicit timeout
/// and uniform error classification.
#[derive(Clone)]
pub(crate) struct TokenEndpointClient {
    http: reqwest::Client,
    provider: Provider,
}

impl TokenEndpointClient {
    pub fn new(http: reqwest::Client, provider: Provider) -> Self {
        Self { http, provider }
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub async fn post_form(
        &self,
        url: &str,
        params: &[(&str, &str)],
        auth: ClientAuth<'_>,
    ) -> Result<ProviderTokenSet, AuthExchangeError> {
        let mut form: Vec<(&str, &str)> = params.to_vec();
        let mut request = self.http.post(url).header("Accept", "application/json");
        match auth {
            ClientAuth::Body { client_id, client_secret } => {
                form.push(("client_id", client_id));
                if !client_secret.is_empty() {
                    form.push(("client_secret", client_secret));
                }
            }
            ClientAuth::Basic { client_id, client_secret } => {
                request = request.basic_auth(client_id, Some(client_secret));
            }
        }

        let grant_type = params
            .iter()
            .find(|(k, _)| *k == "grant_type")
            .map(|(_, v)| *v)
            .unwrap_or("-");
        debug!(
            "[OAuth] POST {} token endpoint (grant_type={})",
            self.provider.as_str(),
            grant_type
        );

        let response = request.form(&form).send().await.map_err(|e| {
            warn!("[OAuth] {} token endpoint unreachable: {}", self.provider, e);
            AuthExchangeError::network(self.provider, describe_reqwest_error(&e))
        })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| AuthExchangeError::network(self.provider, describe_reqwest_error(&e)))?;

        if !status.is_success() {
            let err = classify_error_body(self.provider, status.as_u16(), &body);
            warn!(
                "[OAuth] {} token endpoint returned {} ({}, retryable={})",
                self.provider, status, err.code, err.retryable
            );
            return Err(err);
        }

        let token: TokenResponse = serde_json::from_str(&body).map_err(|e| {
            AuthExchangeError::invalid_response(
                self.provider,
                format!("Unexpected token response: {}", e),
            )
        })?;

        info!(
            "[OAuth] {} {} succeeded (expires_in={:?}, refresh_token={})",
            self.provider,
            grant_type,
            token.expires_in,
            token.refresh_token.is_some()
        );
        Ok(token.into_token_set(self.provider))
    }
}

/// Turn a non-2xx token endpoint body into a classified error.
///
/// Handles both RFC 6749 `{error, error_description}` and Figma's
/// `{error: true, status, message}` shapes.
pub(crate) fn classify_error_body(provider: Provider, status: u16, body: &str) -> AuthExchangeError {
    let json: Option<serde_json::Value> = serde_json::from_str(body).ok();
    let code = json
        .as_ref()
        .and_then(|v| v.get("error"))
        .and_then(|e| e.as_str())
        .map(String::from);
    let description = json
        .as_ref()
        .and_then(|v| {
            v.get("error_description")
                .or_else(|| v.get("message"))
                .and_then(|d| d.as_str())
        })
        .map(String::from);

    AuthExchangeError::from_response(provider, status, code, description)
}

fn describe_reqwest_error(e: &reqwest::Error) -> String {
    if e.is_timeout() {
        "request timed out".to_string()
    } else if e.is_connect() {
        "connection failed".to_string()
    } else {
        e.to_string()
    }
}

/// Build the shared outbound HTTP client used by every exchanger
pub fn build_http_client(timeout: Duration) -> anyhow::Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(timeout)
        .connect_timeout(timeout.min(Duration::from_secs(5)))
        .user_agent(format!("{}/{}", branding::SERVER_NAME, env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {}", e))
}

/// Configured providers. Providers without credentials are absent.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    exchangers: HashMap<Provider, Arc<dyn TokenExchanger>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &ProvidersConfig, timeout: Duration) -> anyhow::Result<Self> {
        let http = build_http_client(timeout)?;
        let mut registry = Self::new();

        let endpoints = |creds: &ProviderCredentials, provider| {
            creds
                .endpoints
                .clone()
                .unwrap_or_else(|| ProviderEndpoints::defaults(provider))
        };

        if let Some(creds) = &config.atlassian {
            registry.insert(Arc::new(AtlassianExchanger::new(
                creds.clone(),
                endpoints(creds, Provider::Atlassian),
                http.clone(),
            )));
        }
        if let Some(creds) = &config.figma {
            registry.insert(Arc::new(FigmaExchanger::new(
                creds.clone(),
                endpoints(creds, Provider::Figma),
                http.clone(),
            )));
        }
        if let Some(creds) = &config.google {
            registry.insert(Arc::new(GoogleExchanger::new(
                creds.clone(),
                endpoints(creds, Provider::Google),
                http,
            )));
        }

        Ok(registry)
    }

    pub fn insert(&mut self, exchanger: Arc<dyn TokenExchanger>) {
        self.exchangers.insert(exchanger.provider(), exchanger);
    }

    pub fn get(&self, provider: Provider) -> Option<Arc<dyn TokenExchanger>> {
        self.exchangers.get(&provider).cloned()
    }

    /// Configured providers in consent chaining order
    pub fn providers(&self) -> Vec<Provider> {
        Provider::ALL
            .into_iter()
            .filter(|p| self.exchangers.contains_key(p))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.exchangers.is_empty()
    }
}
