//! Figma OAuth 2.0
//!
//! Client credentials go in HTTP Basic auth. Refresh uses a dedicated
//! endpoint and never returns a new refresh token.

use async_trait::async_trait;
use authbridge_core::{AuthExchangeError, Provider, ProviderTokenSet};

use super::{build_authorize_url, ClientAuth, ProviderEndpoints, TokenEndpointClient, TokenExchanger};
use crate::config::ProviderCredentials;

pub struct FigmaExchanger {
    credentials: ProviderCredentials,
    endpoints: ProviderEndpoints,
    client: TokenEndpointClient,
}

impl FigmaExchanger {
    pub fn new(
        credentials: ProviderCredentials,
        endpoints: ProviderEndpoints,
        http: reqwest::Client,
    ) -> Self {
        Self {
            credentials,
            endpoints,
            client: TokenEndpointClient::new(http, Provider::Figma),
        }
    }

    fn auth(&self) -> ClientAuth<'_> {
        ClientAuth::Basic {
            client_id: &self.credentials.client_id,
            client_secret: &self.credentials.client_secret,
        }
    }
}

#[async_trait]
impl TokenExchanger for FigmaExchanger {
    fn provider(&self) -> Provider {
        Provider::Figma
    }

    fn authorization_url(&self, state: &str, code_challenge: &str, redirect_uri: &str) -> String {
        let scope = self.credentials.scope();
        build_authorize_url(
            &self.endpoints.authorize_url,
            &[
                ("client_id", &self.credentials.client_id),
                ("redirect_uri", redirect_uri),
                ("scope", &scope),
                ("state", state),
                ("response_type", "code"),
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
        self.client
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
            .await
    }

    async fn refresh_token(
        &self,
        existing: &ProviderTokenSet,
    ) -> Result<ProviderTokenSet, AuthExchangeError> {
        let Some(refresh_token) = existing.refresh_token.as_deref() else {
            return Err(AuthExchangeError::from_response(
                Provider::Figma,
                400,
                Some("invalid_grant".into()),
                Some("No refresh token available".into()),
            ));
        };

        let mut next = self
            .client
            .post_form(
                self.endpoints.refresh_url(),
                &[("refresh_token", refresh_token)],
                self.auth(),
            )
            .await?;

        // Figma's refresh response carries no refresh token
        next.refresh_token = None;
        Ok(existing.refreshed_with(next))
    }
}
