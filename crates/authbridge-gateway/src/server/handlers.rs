//! HTTP handlers for the bridge's OAuth surface

use std::collections::VecDeque;

use axum::{
    extract::{Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Json, Response},
    Form,
};
use authbridge_core::{
    branding, AuthorizationState, BridgeError, CsrfMismatchError, EnvelopeKind, Invalidation,
    Provider, SessionEnvelope,
};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::BridgeState;
use crate::oauth::pkce::{is_valid_challenge, random_urlsafe, S256};
use crate::oauth::{
    generate_state, process_dcr_request, DcrRequest, OAuthServerMetadata, PkceChallenge,
    ProtectedResourceMetadata,
};
use crate::session::{IssuedCode, PendingGrant};

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Health check endpoint
pub async fn health() -> Json<HealthResponse> {
    debug!("[Gateway] Health check");
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// OAuth Authorization Server Metadata (RFC 8414)
pub async fn oauth_metadata(State(state): State<BridgeState>) -> Json<OAuthServerMetadata> {
    Json(OAuthServerMetadata::for_base_url(&state.base_url))
}

/// OAuth Protected Resource Metadata (RFC 9728)
pub async fn resource_metadata(State(state): State<BridgeState>) -> Json<ProtectedResourceMetadata> {
    Json(ProtectedResourceMetadata::for_base_url(&state.base_url))
}

/// OAuth error body (RFC 6749 §5.2)
#[derive(Debug, Serialize)]
pub struct OAuthErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
}

/// [`BridgeError`] at the HTTP boundary
#[derive(Debug)]
pub struct ApiError(pub BridgeError);

impl From<BridgeError> for ApiError {
    fn from(err: BridgeError) -> Self {
        Self(err)
    }
}

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, String) {
        match &self.0 {
            BridgeError::Csrf(_) => (StatusCode::BAD_REQUEST, "invalid_request".into()),
            BridgeError::Pkce(_) => (StatusCode::BAD_REQUEST, "invalid_grant".into()),
            BridgeError::Exchange(e) if e.retryable => {
                (StatusCode::SERVICE_UNAVAILABLE, "temporarily_unavailable".into())
            }
            BridgeError::Exchange(e) => (StatusCode::BAD_REQUEST, e.code.clone()),
            BridgeError::InvalidToken(_) => (StatusCode::UNAUTHORIZED, "invalid_token".into()),
            BridgeError::MissingToken(_) => (StatusCode::FORBIDDEN, "insufficient_scope".into()),
            BridgeError::InvalidRequest { code, .. } => (StatusCode::BAD_REQUEST, code.to_string()),
            BridgeError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, "server_error".into()),
        }
    }

    fn description(&self) -> String {
        match &self.0 {
            BridgeError::InvalidRequest { description, .. } => description.clone(),
            BridgeError::InvalidToken(e) => e.description().to_string(),
            BridgeError::Store(_) => "Internal storage error".to_string(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let BridgeError::Csrf(ref e) = self.0 {
            // Same page whether the state was unknown, replayed or expired
            info!("[OAuth] Callback rejected: {}", e.reason.as_str());
            return (StatusCode::BAD_REQUEST, Html(error_page(&e.to_string()))).into_response();
        }
        if let BridgeError::Store(ref e) = self.0 {
            error!("[Storage] {}", e);
        }

        let (status, code) = self.status_and_code();
        let body = OAuthErrorBody {
            error: code,
            error_description: Some(self.description()),
        };
        let mut response = (status, Json(body)).into_response();
        no_store(&mut response);
        response
    }
}

fn error_page(message: &str) -> String {
    format!(
        "<!DOCTYPE html><html><head><title>{name}</title></head>\
         <body><h1>Authorization failed</h1><p>{message}</p></body></html>",
        name = branding::DISPLAY_NAME,
        message = message,
    )
}

fn no_store(response: &mut Response) {
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
}

/// 302 to `location`
fn found(location: &str) -> Response {
    match HeaderValue::from_str(location) {
        Ok(value) => {
            let mut response = StatusCode::FOUND.into_response();
            response.headers_mut().insert(header::LOCATION, value);
            response
        }
        Err(_) => ApiError(BridgeError::invalid_request("Redirect URI is not a valid header value"))
            .into_response(),
    }
}

/// Append query parameters (and the client's `state`) to a redirect URI
fn redirect_with(redirect_uri: &str, params: &[(&str, &str)], state: Option<&str>) -> String {
    match url::Url::parse(redirect_uri) {
        Ok(mut url) => {
            {
                let mut query = url.query_pairs_mut();
                for (key, value) in params {
                    query.append_pair(key, value);
                }
                if let Some(s) = state {
                    query.append_pair("state", s);
                }
            }
            url.to_string()
        }
        Err(_) => {
            let mut url = redirect_uri.to_string();
            url.push(if url.contains('?') { '&' } else { '?' });
            let mut pairs: Vec<String> = params
                .iter()
                .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
                .collect();
            if let Some(s) = state {
                pairs.push(format!("state={}", urlencoding::encode(s)));
            }
            url.push_str(&pairs.join("&"));
            url
        }
    }
}

/// Helper to create OAuth error redirect
fn oauth_error_redirect(redirect_uri: &str, error: &str, description: &str, state: Option<&str>) -> Response {
    found(&redirect_with(
        redirect_uri,
        &[("error", error), ("error_description", description)],
        state,
    ))
}

/// Outcome of advancing a grant to its next step
#[derive(Debug)]
pub enum AuthorizationStart {
    /// Send the user agent to this provider consent URL
    NeedsUserRedirect(String),
    /// Every provider consented; client redirect carrying the bridge code
    Ready(String),
    Failed(BridgeError),
}

impl AuthorizationStart {
    fn into_response(self, grant_redirect: &str, client_state: Option<&str>) -> Response {
        match self {
            AuthorizationStart::NeedsUserRedirect(url) | AuthorizationStart::Ready(url) => found(&url),
            AuthorizationStart::Failed(err) => {
                let api = ApiError(err);
                let (_, code) = api.status_and_code();
                oauth_error_redirect(grant_redirect, &code, &api.description(), client_state)
            }
        }
    }
}

/// Start consent for the grant's next provider, or issue the bridge code
/// when none is left.
async fn advance_grant(state: &BridgeState, grant: PendingGrant) -> AuthorizationStart {
    let Some(provider) = grant.next_provider() else {
        let code = random_urlsafe(32);
        let location = redirect_with(
            &grant.client_redirect_uri,
            &[("code", code.as_str())],
            grant.client_state.as_deref(),
        );
        info!(
            "[OAuth] Grant {} complete for client {} ({} provider(s)); issuing code",
            grant.grant_id,
            grant.client_id,
            grant.collected.len()
        );
        state.issued_codes.insert(code, IssuedCode { grant });
        return AuthorizationStart::Ready(location);
    };

    let Some(exchanger) = state.registry.get(provider) else {
        return AuthorizationStart::Failed(BridgeError::invalid_request(format!(
            "{} is not configured on this bridge",
            provider
        )));
    };

    let pkce = PkceChallenge::generate();
    let handle = generate_state();
    let authorization = AuthorizationState::new(
        handle.clone(),
        grant.grant_id.clone(),
        provider,
        grant.client_redirect_uri.clone(),
        pkce.verifier.clone(),
        pkce.challenge.clone(),
        Duration::seconds(branding::AUTHORIZATION_TTL_SECS),
    );
    if let Err(e) = state.store.save_verifier(&authorization).await {
        return AuthorizationStart::Failed(BridgeError::Store(e));
    }

    let url = exchanger.authorization_url(&handle, &pkce.challenge, &branding::callback_url(&state.base_url));
    debug!("[OAuth] Grant {} awaiting {} consent", grant.grant_id, provider);
    state.pending_grants.insert(grant.grant_id.clone(), grant);
    AuthorizationStart::NeedsUserRedirect(url)
}

/// OAuth authorization request parameters
#[derive(Debug, Deserialize)]
pub struct AuthorizeParams {
    pub response_type: Option<String>,
    pub client_id: Option<String>,
    pub redirect_uri: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub state: Option<String>,
    pub scope: Option<String>,
    /// Comma separated providers to chain (`atlassian,google`); all configured ones when absent
    pub provider: Option<String>,
}

/// `GET /authorize`
pub async fn authorize(State(state): State<BridgeState>, Query(params): Query<AuthorizeParams>) -> Response {
    start_authorization(state, params).await
}

/// `POST /authorize` with the same parameters form-encoded
pub async fn authorize_form(State(state): State<BridgeState>, Form(params): Form<AuthorizeParams>) -> Response {
    start_authorization(state, params).await
}

async fn start_authorization(state: BridgeState, params: AuthorizeParams) -> Response {
    info!(
        "[OAuth] Authorization request: client_id={:?}, response_type={:?}, provider={:?}",
        params.client_id, params.response_type, params.provider
    );

    // Until the redirect URI is validated, errors are shown instead of redirected
    let Some(client_id) = params.client_id.as_deref().filter(|c| !c.is_empty()) else {
        return ApiError(BridgeError::invalid_request("Missing client_id")).into_response();
    };
    let client = match state.store.load_client_info(client_id).await {
        Ok(Some(client)) => client,
        Ok(None) => {
            warn!("[OAuth] Unknown client_id: {}", client_id);
            return ApiError(BridgeError::invalid_client("Client not registered")).into_response();
        }
        Err(e) => return ApiError(BridgeError::Store(e)).into_response(),
    };
    let Some(redirect_uri) = params.redirect_uri.as_deref() else {
        return ApiError(BridgeError::invalid_request("Missing redirect_uri")).into_response();
    };
    if !client.allows_redirect(redirect_uri) {
        warn!("[OAuth] Invalid redirect_uri for client {}: {}", client_id, redirect_uri);
        return ApiError(BridgeError::invalid_request("Redirect URI not registered for this client"))
            .into_response();
    }

    let client_state = params.state.as_deref();
    let fail = |error: &str, description: &str| {
        warn!("[OAuth] Authorization rejected: {} ({})", error, description);
        oauth_error_redirect(redirect_uri, error, description, client_state)
    };

    if params.response_type.as_deref() != Some("code") {
        return fail("unsupported_response_type", "Only 'code' response type is supported");
    }
    let Some(code_challenge) = params.code_challenge.as_deref() else {
        return fail("invalid_request", "PKCE code_challenge is required");
    };
    if !is_valid_challenge(code_challenge) {
        return fail("invalid_request", "Malformed code_challenge");
    }
    if params.code_challenge_method.as_deref().unwrap_or("plain") != S256 {
        return fail("invalid_request", "code_challenge_method must be S256");
    }

    let providers = match params.provider.as_deref() {
        Some(list) => match Provider::parse_list(list) {
            Ok(providers) => providers,
            Err(e) => return fail("invalid_request", &e.to_string()),
        },
        None => state.registry.providers(),
    };
    if providers.is_empty() {
        return fail("invalid_request", "No upstream provider requested or configured");
    }
    if let Some(missing) = providers.iter().find(|p| state.registry.get(**p).is_none()) {
        return fail("invalid_request", &format!("{} is not configured on this bridge", missing));
    }

    let scope = params
        .scope
        .clone()
        .or_else(|| client.scope.clone())
        .unwrap_or_else(|| branding::BRIDGE_SCOPES.join(" "));

    let grant = PendingGrant {
        grant_id: Uuid::new_v4().to_string(),
        client_id: client.client_id.clone(),
        client_redirect_uri: redirect_uri.to_string(),
        client_state: params.state.clone(),
        code_challenge: code_challenge.to_string(),
        scope,
        remaining: VecDeque::from(providers),
        collected: Default::default(),
    };
    info!(
        "[OAuth] Grant {} started for client {} (providers: {:?})",
        grant.grant_id, grant.client_id, grant.remaining
    );

    advance_grant(&state, grant)
        .await
        .into_response(redirect_uri, client_state)
}

/// Provider redirect back to the bridge
#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    pub state: Option<String>,
    pub code: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

/// `GET /callback`
pub async fn callback(State(state): State<BridgeState>, Query(params): Query<CallbackParams>) -> Response {
    let Some(handle) = params.state.as_deref().filter(|s| !s.is_empty()) else {
        return ApiError(CsrfMismatchError::unknown_state().into()).into_response();
    };

    let authorization = match state.store.take_verifier(handle).await {
        Ok(Some(authorization)) => authorization,
        Ok(None) => return ApiError(CsrfMismatchError::unknown_state().into()).into_response(),
        Err(e) => return ApiError(BridgeError::Store(e)).into_response(),
    };
    if authorization.is_expired() {
        return ApiError(CsrfMismatchError::expired().into()).into_response();
    }
    let Some(mut grant) = state.pending_grants.take(&authorization.grant_id) else {
        debug!("[OAuth] Grant {} no longer pending", authorization.grant_id);
        return ApiError(CsrfMismatchError::expired().into()).into_response();
    };

    let provider = authorization.provider;
    let client_state = grant.client_state.clone();

    if let Some(provider_error) = params.error.as_deref() {
        info!("[OAuth] {} consent for grant {} failed: {}", provider, grant.grant_id, provider_error);
        let description = params
            .error_description
            .clone()
            .unwrap_or_else(|| format!("{} authorization was not granted", provider));
        return oauth_error_redirect(
            &grant.client_redirect_uri,
            provider_error,
            &description,
            client_state.as_deref(),
        );
    }

    let Some(code) = params.code.as_deref() else {
        return oauth_error_redirect(
            &grant.client_redirect_uri,
            "invalid_request",
            "Provider did not return an authorization code",
            client_state.as_deref(),
        );
    };
    let Some(exchanger) = state.registry.get(provider) else {
        return oauth_error_redirect(
            &grant.client_redirect_uri,
            "server_error",
            &format!("{} is not configured on this bridge", provider),
            client_state.as_deref(),
        );
    };

    let tokens = match exchanger
        .exchange_code(code, &authorization.code_verifier, &branding::callback_url(&state.base_url))
        .await
    {
        Ok(tokens) => tokens,
        Err(e) => {
            warn!("[OAuth] {} code exchange for grant {} failed: {}", provider, grant.grant_id, e);
            let error = if e.retryable { "temporarily_unavailable" } else { "access_denied" };
            return oauth_error_redirect(
                &grant.client_redirect_uri,
                error,
                &format!("{} token exchange failed", provider),
                client_state.as_deref(),
            );
        }
    };

    info!("[OAuth] {} connected for grant {}", provider, grant.grant_id);
    grant.complete_provider(tokens);
    let redirect = grant.client_redirect_uri.clone();
    advance_grant(&state, grant)
        .await
        .into_response(&redirect, client_state.as_deref())
}

/// OAuth token request body
#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub grant_type: Option<String>,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub client_id: Option<String>,
    pub code_verifier: Option<String>,
    pub refresh_token: Option<String>,
}

/// OAuth token response
#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponseBody {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

/// `POST /access-token`
pub async fn access_token(State(state): State<BridgeState>, Form(request): Form<TokenRequest>) -> Response {
    info!(
        "[OAuth] Token request: grant_type={:?}, client_id={:?}",
        request.grant_type, request.client_id
    );

    let result = match request.grant_type.as_deref() {
        None => Err(BridgeError::invalid_request("Missing grant_type")),
        Some("authorization_code") => redeem_code(&state, &request).await,
        Some("refresh_token") => refresh_session(&state, &request).await,
        Some(other) => {
            warn!("[OAuth] Unsupported grant_type: {}", other);
            Err(BridgeError::InvalidRequest {
                code: "unsupported_grant_type",
                description: "Only authorization_code and refresh_token are supported".into(),
            })
        }
    };

    match result {
        Ok(body) => {
            let mut response = Json(body).into_response();
            no_store(&mut response);
            response
        }
        Err(e) => ApiError(e).into_response(),
    }
}

async fn redeem_code(state: &BridgeState, request: &TokenRequest) -> Result<TokenResponseBody, BridgeError> {
    let code = request
        .code
        .as_deref()
        .ok_or_else(|| BridgeError::invalid_request("Missing authorization code"))?;
    let code_verifier = request
        .code_verifier
        .as_deref()
        .ok_or_else(|| BridgeError::invalid_request("Missing code_verifier"))?;

    let IssuedCode { grant } = state.issued_codes.take(code).ok_or_else(|| {
        warn!("[OAuth] Unknown, expired or reused authorization code");
        BridgeError::invalid_grant("Authorization code is invalid or expired")
    })?;

    if let Some(client_id) = request.client_id.as_deref() {
        if client_id != grant.client_id {
            warn!("[OAuth] client_id mismatch for grant {}", grant.grant_id);
            return Err(BridgeError::invalid_grant("Client ID mismatch"));
        }
    }
    if let Some(redirect_uri) = request.redirect_uri.as_deref() {
        if redirect_uri != grant.client_redirect_uri {
            warn!("[OAuth] redirect_uri mismatch for grant {}", grant.grant_id);
            return Err(BridgeError::invalid_grant("Redirect URI mismatch"));
        }
    }
    if !PkceChallenge::verify(code_verifier, &grant.code_challenge) {
        warn!("[OAuth] PKCE verification failed for grant {}", grant.grant_id);
        return Err(authbridge_core::PkceValidationError.into());
    }

    let issued = state.tokens.issue(&grant.client_id, &grant.scope, grant.collected)?;
    state
        .store
        .save_tokens(&issued.session_id, &issued.access_envelope.provider_tokens)
        .await?;

    info!(
        "[OAuth] Issued session {} to client {} (expires_in={}s)",
        issued.session_id, grant.client_id, issued.expires_in
    );
    Ok(TokenResponseBody {
        access_token: issued.access_token,
        token_type: "Bearer".to_string(),
        expires_in: issued.expires_in,
        refresh_token: Some(issued.refresh_token),
        scope: Some(grant.scope),
    })
}

async fn refresh_session(state: &BridgeState, request: &TokenRequest) -> Result<TokenResponseBody, BridgeError> {
    let refresh_token = request
        .refresh_token
        .as_deref()
        .ok_or_else(|| BridgeError::invalid_request("Missing refresh_token"))?;

    let envelope = state.tokens.verify_refresh(refresh_token).map_err(|e| {
        info!("[OAuth] Refresh token rejected: {}", e.reason.as_str());
        BridgeError::invalid_grant("Refresh token is invalid or expired")
    })?;
    if let Some(client_id) = request.client_id.as_deref() {
        if client_id != envelope.client_id {
            return Err(BridgeError::invalid_grant("Client ID mismatch"));
        }
    }
    if state.store.is_invalidated(&envelope.session_id).await? {
        info!("[OAuth] Refresh for revoked session {}", envelope.session_id);
        return Err(BridgeError::invalid_grant("Session has been revoked"));
    }

    let current = state
        .store
        .load_tokens(&envelope.session_id)
        .await?
        .unwrap_or_else(|| envelope.provider_tokens.clone());

    let mut refreshed = current.clone();
    for (provider, token) in &current {
        match state.orchestrator.ensure_fresh(&envelope, token).await {
            Ok(fresh) => {
                refreshed.insert(*provider, fresh.token);
            }
            // Stale sets stay; tool calls report them per provider
            Err(e) => debug!(
                "[OAuth] {} not refreshed for session {}: {:?} (retryable={})",
                provider, envelope.session_id, e.reason, e.retryable
            ),
        }
    }

    // The orchestrator may have invalidated a session whose tokens are all dead
    if state.store.is_invalidated(&envelope.session_id).await? {
        return Err(BridgeError::invalid_grant("Upstream authorization has expired"));
    }
    let provider_tokens = state
        .store
        .load_tokens(&envelope.session_id)
        .await?
        .unwrap_or(refreshed);

    let access = SessionEnvelope {
        kind: EnvelopeKind::Access,
        ..envelope
    };
    let (access_token, access) = state.tokens.reissue(&access, provider_tokens)?;
    // Supersedes any bearer the accessor re-issued earlier
    state.orchestrator.record_latest(&access, &access_token);

    info!("[OAuth] Refreshed session {} for client {}", access.session_id, access.client_id);
    Ok(TokenResponseBody {
        access_token,
        token_type: "Bearer".to_string(),
        expires_in: state.tokens.access_ttl().num_seconds(),
        refresh_token: Some(refresh_token.to_string()),
        scope: Some(access.scope),
    })
}

/// Token revocation request (RFC 7009)
#[derive(Debug, Deserialize)]
pub struct RevokeRequest {
    pub token: Option<String>,
    #[allow(dead_code)]
    pub token_type_hint: Option<String>,
}

/// `POST /revoke`. Always 200, whether or not the token was valid.
pub async fn revoke(State(state): State<BridgeState>, Form(request): Form<RevokeRequest>) -> Response {
    let envelope = request.token.as_deref().and_then(|token| {
        state
            .tokens
            .verify(token)
            .or_else(|_| state.tokens.verify_refresh(token))
            .ok()
    });

    match envelope {
        Some(envelope) => {
            match state
                .store
                .invalidate(Invalidation::Session(envelope.session_id.clone()))
                .await
            {
                Ok(()) => {
                    state
                        .mcp_sessions
                        .retain(|_, binding| binding.session_id != envelope.session_id);
                    info!("[OAuth] Revoked session {} (client {})", envelope.session_id, envelope.client_id);
                }
                Err(e) => return ApiError(BridgeError::Store(e)).into_response(),
            }
        }
        None => debug!("[OAuth] Revocation of an unknown or invalid token ignored"),
    }

    let mut response = StatusCode::OK.into_response();
    no_store(&mut response);
    response
}

/// Dynamic Client Registration endpoint (RFC 7591)
pub async fn oauth_register(State(state): State<BridgeState>, Json(request): Json<DcrRequest>) -> Response {
    info!(
        "[DCR] Registration request from: {:?} (redirect_uris: {:?})",
        request.client_name, request.redirect_uris
    );

    match process_dcr_request(state.store.as_ref(), request).await {
        Ok(response) => {
            info!(
                "[DCR] Successfully registered client: {} ({})",
                response.client_name, response.client_id
            );
            (StatusCode::CREATED, Json(response)).into_response()
        }
        Err(error) => {
            warn!("[DCR] Registration failed: {} - {:?}", error.error, error.error_description);
            let status = if error.error == "server_error" {
                StatusCode::INTERNAL_SERVER_ERROR
            } else {
                StatusCode::BAD_REQUEST
            };
            (status, Json(error)).into_response()
        }
    }
}
