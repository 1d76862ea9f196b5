//! Bridge-side view of one `/authorize` request

use std::collections::VecDeque;

use authbridge_core::{Provider, ProviderTokenMap};

/// An `/authorize` request whose provider consents are still being chained
#[derive(Clone)]
pub struct PendingGrant {
    pub grant_id: String,
    pub client_id: String,
    pub client_redirect_uri: String,
    /// Client's own `state`, echoed back verbatim
    pub client_state: Option<String>,
    /// Client PKCE challenge, verified at the token endpoint
    pub code_challenge: String,
    pub scope: String,
    /// Providers still waiting for consent, in order
    pub remaining: VecDeque<Provider>,
    /// Tokens collected from providers that already consented
    pub collected: ProviderTokenMap,
}

impl PendingGrant {
    pub fn next_provider(&self) -> Option<Provider> {
        self.remaining.front().copied()
    }

    /// Record a provider's tokens and advance to the next provider
    pub fn complete_provider(&mut self, tokens: authbridge_core::ProviderTokenSet) {
        let provider = tokens.provider;
        self.remaining.retain(|p| *p != provider);
        self.collected.insert(provider, tokens);
    }

    pub fn is_complete(&self) -> bool {
        self.remaining.is_empty()
    }
}

impl std::fmt::Debug for PendingGrant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingGrant")
            .field("grant_id", &self.grant_id)
            .field("client_id", &self.client_id)
            .field("remaining", &self.remaining)
            .field("collected", &self.collected.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// A bridge authorization code, redeemable once at `/access-token`
#[derive(Debug, Clone)]
pub struct IssuedCode {
    pub grant: PendingGrant,
}
