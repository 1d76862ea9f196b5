//! Typed auth error taxonomy
//!
//! Internal components return these so the HTTP boundary can tell retryable
//! failures from fatal ones and map each to the right status and body.

use thiserror::Error;

use crate::domain::Provider;

/// Why a callback `state` was rejected. Kept for logs only; callers see the
/// same generic message either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsrfFailure {
    /// No authorization state with this handle (never issued, or already used)
    UnknownState,
    StateExpired,
}

impl CsrfFailure {
    pub fn as_str(&self) -> &'static str {
        match self {
            CsrfFailure::UnknownState => "csrf_mismatch",
            CsrfFailure::StateExpired => "state_expired",
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("authorization session expired, please try again")]
pub struct CsrfMismatchError {
    pub reason: CsrfFailure,
}

impl CsrfMismatchError {
    pub fn unknown_state() -> Self {
        Self { reason: CsrfFailure::UnknownState }
    }

    pub fn expired() -> Self {
        Self { reason: CsrfFailure::StateExpired }
    }
}

/// `code_verifier` does not hash to the stored `code_challenge`
#[derive(Debug, Clone, Error)]
#[error("PKCE verification failed")]
pub struct PkceValidationError;

/// Provider token endpoint failure
#[derive(Debug, Clone, Error)]
#[error("{provider} token endpoint returned {code}{}", .description.as_deref().map(|d| format!(": {d}")).unwrap_or_default())]
pub struct AuthExchangeError {
    pub provider: Provider,
    /// OAuth error code (`invalid_grant`, ...) or a local code (`network_error`, `server_error`)
    pub code: String,
    pub description: Option<String>,
    /// HTTP status of the provider response, if one was received
    pub status: Option<u16>,
    pub retryable: bool,
}

impl AuthExchangeError {
    /// Transport failure (connect, timeout, body read)
    pub fn network(provider: Provider, description: impl Into<String>) -> Self {
        Self {
            provider,
            code: "network_error".into(),
            description: Some(description.into()),
            status: None,
            retryable: true,
        }
    }

    /// Non-success HTTP response. 5xx and 429 are retryable; other statuses
    /// carry an OAuth error the client has to act on.
    pub fn from_response(
        provider: Provider,
        status: u16,
        code: Option<String>,
        description: Option<String>,
    ) -> Self {
        let retryable = status >= 500 || status == 429;
        let code = code.unwrap_or_else(|| {
            if retryable { "server_error" } else { "invalid_request" }.to_string()
        });
        Self { provider, code, description, status: Some(status), retryable }
    }

    /// Provider answered 2xx but the body could not be understood
    pub fn invalid_response(provider: Provider, description: impl Into<String>) -> Self {
        Self {
            provider,
            code: "invalid_response".into(),
            description: Some(description.into()),
            status: None,
            retryable: false,
        }
    }

    /// Refresh token (or code) was rejected and the user must re-authorize
    pub fn is_invalid_grant(&self) -> bool {
        self.code == "invalid_grant"
    }
}

/// Why a bridge bearer was rejected. Logged, never returned to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidTokenReason {
    Missing,
    Malformed,
    /// Authentication tag check failed (tampered, or sealed with another secret)
    BadSeal,
    Expired,
    WrongKind,
    Revoked,
    /// Presented on an MCP session bound to a different bridge session
    SessionMismatch,
}

impl InvalidTokenReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvalidTokenReason::Missing => "missing",
            InvalidTokenReason::Malformed => "malformed",
            InvalidTokenReason::BadSeal => "bad_seal",
            InvalidTokenReason::Expired => "expired",
            InvalidTokenReason::WrongKind => "wrong_kind",
            InvalidTokenReason::Revoked => "revoked",
            InvalidTokenReason::SessionMismatch => "session_mismatch",
        }
    }
}

/// Bridge bearer failed verification. The message is identical for every
/// reason.
#[derive(Debug, Clone, Error)]
#[error("The access token is invalid or expired")]
pub struct InvalidTokenError {
    pub reason: InvalidTokenReason,
}

impl InvalidTokenError {
    pub fn new(reason: InvalidTokenReason) -> Self {
        Self { reason }
    }

    /// Caller-facing description for the `WWW-Authenticate` challenge
    pub fn description(&self) -> &'static str {
        match self.reason {
            InvalidTokenReason::Missing => "Authentication required",
            _ => "The access token is invalid or expired",
        }
    }
}

/// Why a provider token could not be produced for a tool call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MissingTokenReason {
    /// The session never authorized this provider
    NotConnected,
    /// Stale, and the provider gave no refresh token
    NoRefreshToken,
    /// Provider rejected the refresh token
    RefreshRejected(String),
    /// Provider unreachable or failing; try again later
    RefreshUnavailable(String),
}

/// Requested provider token is absent or unrefreshable
#[derive(Debug, Clone, Error)]
#[error("No valid {provider} access token found; please authenticate with {provider} first")]
pub struct MissingTokenError {
    pub provider: Provider,
    pub retryable: bool,
    pub reason: MissingTokenReason,
}

impl MissingTokenError {
    pub fn not_connected(provider: Provider) -> Self {
        Self { provider, retryable: false, reason: MissingTokenReason::NotConnected }
    }

    pub fn no_refresh_token(provider: Provider) -> Self {
        Self { provider, retryable: false, reason: MissingTokenReason::NoRefreshToken }
    }

    pub fn user_message(&self) -> String {
        self.to_string()
    }
}

impl From<AuthExchangeError> for MissingTokenError {
    fn from(err: AuthExchangeError) -> Self {
        let detail = err.to_string();
        let reason = if err.retryable {
            MissingTokenReason::RefreshUnavailable(detail)
        } else {
            MissingTokenReason::RefreshRejected(detail)
        };
        Self { provider: err.provider, retryable: err.retryable, reason }
    }
}

/// Aggregate error for the bridge's HTTP boundary
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Csrf(#[from] CsrfMismatchError),

    #[error(transparent)]
    Pkce(#[from] PkceValidationError),

    #[error(transparent)]
    Exchange(#[from] AuthExchangeError),

    #[error(transparent)]
    InvalidToken(#[from] InvalidTokenError),

    #[error(transparent)]
    MissingToken(#[from] MissingTokenError),

    /// Client sent a malformed OAuth request (`invalid_request`, `unsupported_grant_type`, ...)
    #[error("{code}: {description}")]
    InvalidRequest { code: &'static str, description: String },

    #[error("store error: {0}")]
    Store(#[from] anyhow::Error),
}

impl BridgeError {
    pub fn invalid_request(description: impl Into<String>) -> Self {
        Self::InvalidRequest { code: "invalid_request", description: description.into() }
    }

    pub fn invalid_grant(description: impl Into<String>) -> Self {
        Self::InvalidRequest { code: "invalid_grant", description: description.into() }
    }

    pub fn invalid_client(description: impl Into<String>) -> Self {
        Self::InvalidRequest { code: "invalid_client", description: description.into() }
    }
}

pub type BridgeResult<T> = std::result::Result<T, BridgeError>;
