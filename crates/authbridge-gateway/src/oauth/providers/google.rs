//! Google (Drive) OAuth 2.0
//!
//! `access_type=offline` + `prompt=consent` so a refresh token is issued on
//! every consent. Google usually does not rotate refresh tokens.

use async_trait::async_trait;
use authbridge_core::{AuthExchangeError, Provider, ProviderTokenSet};

use super::{build_authorize_url, ClientAuth, ProviderEndpoints, TokenEndpointClient, TokenExchanger};
use crate::config::ProviderCredentials;

pub struct GoogleExchanger {
    credentials: ProviderCredentials,
    endpoints: ProviderEndpoints,
    client: TokenEndpointClient,
}

impl GoogleExchanger {
    pub fn new(
        credentials: ProviderCredentials,
        endpoints: ProviderEndpoints,
        http: reqwest::Client,
    ) -> Self {
        Self {
            credentials,
            endpoints,
            client: TokenEndpointClient::new(http, Provider::Google),
        }
    }

    fn auth(&self) -> ClientAuth<'_> {
        ClientAuth::Body {
            client_id: &self.credentials.client_id,
            client_secret: &self.credentials.client_secret,
        }
    }
}

#[async_trait]
impl TokenExchanger for GoogleExchanger {
    fn provider(&self) -> Provider {
        Provider::Google
    }

    fn authorization_url(&self, state: &str, code_challenge: &str, redirect_uri: &str) -> String {
        let scope = self.credentials.scope();
        build_authorize_url(
            &self.endpoints.authorize_url,
            &[
                ("client_id", &self.credentials.client_id),
                ("redirect_uri", redirect_uri),
                ("response_type", "code"),
                ("scope", &scope),
                ("state", state),
                ("access_type", "offline"),
                ("prompt", "consent"),
                ("include_granted_scopes", "true"),
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
                Provider::Google,
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
