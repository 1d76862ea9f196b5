//! PKCE (Proof Key for Code Exchange)
//!
//! Implements RFC 7636 S256 for both sides of the bridge: the bridge's own
//! verifier towards upstream providers, and verification of the MCP
//! client's verifier at the token endpoint.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::RngCore;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// The only challenge method the bridge accepts
pub const S256: &str = "S256";

/// PKCE code verifier and challenge pair
#[derive(Clone)]
pub struct PkceChallenge {
    /// The code verifier (kept secret, sent in token exchange)
    pub verifier: String,
    /// The code challenge (sent in authorization request)
    pub challenge: String,
    /// Challenge method (always S256)
    pub method: &'static str,
}

impl PkceChallenge {
    /// Generate a new PKCE challenge from 32 random bytes (43 char verifier)
    pub fn generate() -> Self {
        Self::from_verifier(random_urlsafe(32))
    }

    /// Derive the S256 challenge for an existing verifier
    pub fn from_verifier(verifier: impl Into<String>) -> Self {
        let verifier = verifier.into();
        let challenge = s256(&verifier);
        Self {
            verifier,
            challenge,
            method: S256,
        }
    }

    /// Verify that a verifier matches a challenge.
    ///
    /// Rejects verifiers outside the RFC 7636 length and charset rules.
    pub fn verify(verifier: &str, challenge: &str) -> bool {
        if !is_valid_verifier(verifier) {
            return false;
        }
        s256(verifier).as_bytes().ct_eq(challenge.as_bytes()).into()
    }
}

impl std::fmt::Debug for PkceChallenge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PkceChallenge")
            .field("challenge", &self.challenge)
            .field("method", &self.method)
            .finish_non_exhaustive()
    }
}

/// Opaque CSRF correlation handle (32 random bytes, base64url)
pub fn generate_state() -> String {
    random_urlsafe(32)
}

/// Random base64url string from `len` bytes of OS-seeded randomness
pub fn random_urlsafe(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// 43-128 chars of `[A-Za-z0-9-._~]`
pub fn is_valid_verifier(verifier: &str) -> bool {
    (43..=128).contains(&verifier.len())
        && verifier
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~'))
}

/// Well-formed S256 challenge: 43 base64url chars
pub fn is_valid_challenge(challenge: &str) -> bool {
    challenge.len() == 43
        && challenge
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_'))
}

fn s256(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}
