//! Session token service
//!
//! Seals [`SessionEnvelope`]s into opaque bearer strings and opens them again.
//! Format: `base64url(header) "." base64url(nonce || ciphertext || tag)`. The
//! header is authenticated as AAD, so swapping it breaks the seal.

use authbridge_core::{
    EnvelopeKind, InvalidTokenError, InvalidTokenReason, ProviderTokenMap, SessionEnvelope,
};
use authbridge_storage::{FieldEncryptor, KEY_SIZE};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{Duration, Utc};
use tracing::debug;
use uuid::Uuid;

const ENVELOPE_HEADER: &str = r#"{"alg":"A256GCM","typ":"mcp-session","v":1}"#;

/// Bearer pair minted for a completed authorization
#[derive(Clone)]
pub struct SessionTokens {
    pub session_id: String,
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds
    pub expires_in: i64,
    pub access_envelope: SessionEnvelope,
}

impl std::fmt::Debug for SessionTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionTokens")
            .field("session_id", &self.session_id)
            .field("expires_in", &self.expires_in)
            .finish_non_exhaustive()
    }
}

pub struct SessionTokenService {
    encryptor: FieldEncryptor,
    encoded_header: String,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl SessionTokenService {
    pub fn new(secret: &[u8; KEY_SIZE], access_ttl: Duration, refresh_ttl: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            encryptor: FieldEncryptor::new(secret)?,
            encoded_header: URL_SAFE_NO_PAD.encode(ENVELOPE_HEADER),
            access_ttl,
            refresh_ttl,
        })
    }

    pub fn access_ttl(&self) -> Duration {
        self.access_ttl
    }

    /// Mint a new session: fresh `session_id`, access and refresh envelopes
    /// carrying the same provider tokens.
    pub fn issue(
        &self,
        client_id: &str,
        scope: &str,
        provider_tokens: ProviderTokenMap,
    ) -> anyhow::Result<SessionTokens> {
        let session_id = Uuid::new_v4().to_string();
        let now = Utc::now().timestamp();

        let access = SessionEnvelope {
            session_id: session_id.clone(),
            kind: EnvelopeKind::Access,
            client_id: client_id.to_string(),
            scope: scope.to_string(),
            provider_tokens,
            issued_at: now,
            expires_at: now + self.access_ttl.num_seconds(),
        };
        let refresh = SessionEnvelope {
            kind: EnvelopeKind::Refresh,
            expires_at: now + self.refresh_ttl.num_seconds(),
            ..access.clone()
        };

        let tokens = SessionTokens {
            session_id,
            access_token: self.seal(&access)?,
            refresh_token: self.seal(&refresh)?,
            expires_in: self.access_ttl.num_seconds(),
            access_envelope: access,
        };
        debug!(
            "[Session] Issued session {} for client {} ({} provider(s))",
            tokens.session_id,
            client_id,
            tokens.access_envelope.provider_tokens.len()
        );
        Ok(tokens)
    }

    /// Seal an envelope into a bearer string
    pub fn seal(&self, envelope: &SessionEnvelope) -> anyhow::Result<String> {
        let payload = serde_json::to_vec(envelope)?;
        let sealed = self.encryptor.seal(&payload, self.encoded_header.as_bytes())?;
        Ok(format!("{}.{}", self.encoded_header, URL_SAFE_NO_PAD.encode(sealed)))
    }

    /// Verify an access bearer
    pub fn verify(&self, bearer: &str) -> Result<SessionEnvelope, InvalidTokenError> {
        self.verify_kind(bearer, EnvelopeKind::Access)
    }

    /// Verify a refresh bearer
    pub fn verify_refresh(&self, bearer: &str) -> Result<SessionEnvelope, InvalidTokenError> {
        self.verify_kind(bearer, EnvelopeKind::Refresh)
    }

    /// Open, then check expiry, then check kind. Every failure is the same
    /// error type; the reason only feeds logs.
    pub fn verify_kind(
        &self,
        bearer: &str,
        expected: EnvelopeKind,
    ) -> Result<SessionEnvelope, InvalidTokenError> {
        let reject = |reason: InvalidTokenReason| InvalidTokenError::new(reason);

        let (header, body) = bearer
            .split_once('.')
            .ok_or_else(|| reject(InvalidTokenReason::Malformed))?;
        if header != self.encoded_header {
            return Err(reject(InvalidTokenReason::Malformed));
        }

        let sealed = URL_SAFE_NO_PAD
            .decode(body)
            .map_err(|_| reject(InvalidTokenReason::Malformed))?;
        let payload = self
            .encryptor
            .open(&sealed, header.as_bytes())
            .map_err(|_| reject(InvalidTokenReason::BadSeal))?;
        let envelope: SessionEnvelope = serde_json::from_slice(&payload)
            .map_err(|_| reject(InvalidTokenReason::Malformed))?;

        if envelope.is_expired() {
            return Err(reject(InvalidTokenReason::Expired));
        }
        if envelope.kind != expected {
            return Err(reject(InvalidTokenReason::WrongKind));
        }
        Ok(envelope)
    }

    /// Re-seal with updated provider tokens. Same `session_id` and kind,
    /// fresh `issued_at`/`expires_at`.
    pub fn reissue(
        &self,
        envelope: &SessionEnvelope,
        provider_tokens: ProviderTokenMap,
    ) -> anyhow::Result<(String, SessionEnvelope)> {
        let now = Utc::now().timestamp();
        let ttl = match envelope.kind {
            EnvelopeKind::Access => self.access_ttl,
            EnvelopeKind::Refresh => self.refresh_ttl,
        };
        let next = SessionEnvelope {
            provider_tokens,
            issued_at: now,
            expires_at: now + ttl.num_seconds(),
            ..envelope.clone()
        };
        let bearer = self.seal(&next)?;
        debug!("[Session] Re-issued {} envelope for session {}", next.kind.as_str(), next.session_id);
        Ok((bearer, next))
    }
}
