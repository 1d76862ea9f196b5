//! Atlassian (Jira, Confluence) OAuth 2.0 (3LO)
//!
//! Confidential client, secret in the form body. Refresh tokens rotate on
//! every refresh. After a code exchange the accessible cloud resources are
//! resolved so tools can find the site's `cloudId` without another lookup.

use async_trait::async_trait;
use authbridge_core::{AuthExchangeError, Provider, ProviderTokenSet};
use serde_json::Value;
use tracing::{debug, warn};

use super::{build_authorize_url, ClientAuth, ProviderEndpoints, TokenEndpointClient, TokenExchanger};
use crate::config::ProviderCredentials;

pub struct AtlassianExchanger {
    credentials: ProviderCredentials,
    endpoints: ProviderEndpoints,
    client: TokenEndpointClient,
}

impl AtlassianExchanger {
    pub fn new(
        credentials: ProviderCredentials,
        endpoints: ProviderEndpoints,
        http: reqwest::Client,
    ) -> Self {
        Self {
            credentials,
            endpoints,
            client: TokenEndpointClient::new(http, Provider::Atlassian),
        }
    }

    fn auth(&self) -> ClientAuth<'_> {
        ClientAuth::Body {
            client_id: &self.credentials.client_id,
            client_secret: &self.credentials.client_secret,
        }
    }

    /// Best effort: a failure here never fails the exchange.
    async fn resolve_accessible_resources(&self, token: &mut ProviderTokenSet) {
        let Some(api_base) = self.endpoints.api_base_url.as_deref() else {
            return;
        };
        let url = format!(
            "{}/oauth/token/accessible-resources",
            api_base.trim_end_matches('/')
        );

        let result = self
            .client
            .http()
            .get(&url)
            .bearer_auth(&token.access_token)
            .header("Accept", "application/json")
            .send()
            .await
            .and_then(|r| r.error_for_status());

        let resources = match result {
            Ok(response) => match response.json::<Value>().await {
                Ok(Value::Array(resources)) => resources,
                Ok(_) | Err(_) => {
                    warn!("[OAuth] Atlassian accessible-resources returned an unexpected body");
                    return;
                }
            },
            Err(e) => {
                warn!("[OAuth] Atlassian accessible-resources lookup failed: {}", e);
                return;
            }
        };

        debug!("[OAuth] Atlassian session has {} accessible site(s)", resources.len());
        if let Some(cloud_id) = resources
            .first()
            .and_then(|r| r.get("id"))
            .and_then(|id| id.as_str())
        {
            token
                .raw
                .insert("cloud_id".into(), Value::String(cloud_id.to_string()));
        }
        token
            .raw
            .insert("accessible_resources".into(), Value::Array(resources));
    }
}

#[async_trait]
impl TokenExchanger for AtlassianExchanger {
    fn provider(&self) -> Provider {
        Provider::Atlassian
    }

    fn authorization_url(&self, state: &str, code_challenge: &str, redirect_uri: &str) -> String {
        let scope = self.credentials.scope();
        build_authorize_url(
            &self.endpoints.authorize_url,
            &[
                ("audience", "api.atlassian.com"),
                ("client_id", &self.credentials.client_id),
                ("scope", &scope),
                ("redirect_uri", redirect_uri),
                ("state", state),
                ("response_type", "code"),
                ("prompt", "consent"),
                ("code_challenge", code_challenge),
                ("code_challenge_method", "S256"),
            ],
        )
    }

    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
    ) -> Result<ProviderTokenSet, AuthExchangeError> {
        let mut token = self
            .client
            .post_form(
                &self.endpoints.token_url,
                &[
                    ("grant_type", "authorization_code"),
                    ("code", code),
                    ("redirect_uri", redirect_uri),
                    ("code_verifier", code_verifier),
                ],
                self.auth(),
            )
            .await?;

        self.resolve_accessible_resources(&mut token).await;
        Ok(token)
    }

    async fn refresh_token(
        &self,
        existing: &ProviderTokenSet,
    ) -> Result<ProviderTokenSet, AuthExchangeError> {
        let Some(refresh_token) = existing.refresh_token.as_deref() else {
            return Err(AuthExchangeError::from_response(
                Provider::Atlassian,
                400,
                Some("invalid_grant".into()),
                Some("No refresh token available".into()),
            ));
        };

        let next = self
            .client
            .post_form(
                self.endpoints.refresh_url(),
                &[
                    ("grant_type", "refresh_token"),
                    ("refresh_token", refresh_token),
                ],
                self.auth(),
            )
            .await?;

        Ok(existing.refreshed_with(next))
    }
}
