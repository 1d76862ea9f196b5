//! MCP auth challenge middleware
//!
//! Bearer → verify envelope → check revocation → attach [`AuthContext`].
//! Any failure is a 401 with an RFC 6750 challenge pointing at the protected
//! resource metadata, so clients can discover where to authorize. A bad
//! bearer is never a 400.

use axum::{
    body::{to_bytes, Body},
    extract::State,
    http::{header, HeaderMap, HeaderValue, Method, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use authbridge_core::{branding, InvalidTokenError, InvalidTokenReason};
use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::logging::TraceContext;
use crate::server::{BridgeState, McpSessionBinding};
use crate::session::AuthContext;

/// Largest JSON-RPC body the middleware buffers for inspection
const MAX_RPC_BODY_SIZE: usize = 1024 * 1024;

/// JSON-RPC error code for auth failures (server-defined range)
const AUTH_ERROR_CODE: i64 = -32001;

const MCP_SESSION_HEADER: &str = "mcp-session-id";

/// Shape of the `WWW-Authenticate` challenge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeVariant {
    /// RFC 9728 `resource_metadata` only
    Standard,
    /// Also emits `resource_metadata_url`, which VS Code reads
    VsCodeCompat,
}

/// Pick the challenge variant from the `initialize` request's client name
pub fn challenge_variant(client_name: Option<&str>, enabled: bool, markers: &[String]) -> ChallengeVariant {
    match client_name {
        Some(name) if enabled && markers.iter().any(|m| name.contains(m.as_str())) => {
            ChallengeVariant::VsCodeCompat
        }
        _ => ChallengeVariant::Standard,
    }
}

/// Build the `WWW-Authenticate` header value
pub fn www_authenticate(base_url: &str, error: &str, description: &str, variant: ChallengeVariant) -> String {
    let metadata_url = branding::resource_metadata_url(base_url);
    let mut value = format!(
        r#"Bearer realm="{}", error="{}", error_description="{}", resource_metadata="{}""#,
        branding::AUTH_REALM,
        error,
        description.replace('"', "'"),
        metadata_url
    );
    if variant == ChallengeVariant::VsCodeCompat {
        value.push_str(&format!(r#", resource_metadata_url="{}""#, metadata_url));
    }
    value
}

/// What the middleware needs from a JSON-RPC request body
#[derive(Debug, Default)]
struct RpcProbe {
    id: Value,
    method: Option<String>,
    client_name: Option<String>,
}

impl RpcProbe {
    fn parse(bytes: &[u8]) -> Self {
        let Ok(json) = serde_json::from_slice::<Value>(bytes) else {
            return Self::default();
        };
        // Batches: inspect the first message
        let message = match &json {
            Value::Array(items) => items.first().cloned().unwrap_or(Value::Null),
            _ => json,
        };

        let method = message.get("method").and_then(|m| m.as_str()).map(String::from);
        let client_name = if method.as_deref() == Some("initialize") {
            message
                .pointer("/params/clientInfo/name")
                .and_then(|n| n.as_str())
                .map(String::from)
        } else {
            None
        };

        Self {
            id: message.get("id").cloned().unwrap_or(Value::Null),
            method,
            client_name,
        }
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

fn no_cache(response: &mut Response) {
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache, no-store, must-revalidate"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(header::EXPIRES, HeaderValue::from_static("0"));
}

fn jsonrpc_error(id: Value, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": AUTH_ERROR_CODE, "message": message }
    })
}

/// 401 with the discovery challenge and a JSON-RPC error body
fn challenge(base_url: &str, err: &InvalidTokenError, variant: ChallengeVariant, id: Value) -> Response {
    let description = err.description();
    let mut response = (
        StatusCode::UNAUTHORIZED,
        Json(jsonrpc_error(id, description)),
    )
        .into_response();

    let header_value = www_authenticate(base_url, "invalid_token", description, variant);
    match HeaderValue::from_str(&header_value) {
        Ok(value) => {
            response.headers_mut().insert(header::WWW_AUTHENTICATE, value);
        }
        Err(e) => warn!("[Auth] Could not encode WWW-Authenticate header: {}", e),
    }
    no_cache(&mut response);
    response
}

/// Auth middleware for the `/mcp` endpoint
pub async fn mcp_auth_middleware(
    State(state): State<BridgeState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    // Skip auth for OPTIONS (CORS preflight)
    if request.method() == Method::OPTIONS {
        return next.run(request).await;
    }

    let trace_id = request
        .extensions()
        .get::<TraceContext>()
        .map(|ctx| ctx.trace_id.clone())
        .unwrap_or_else(|| "------".to_string());

    // Buffer POST bodies to read the JSON-RPC id and client name
    let (mut request, probe) = if request.method() == Method::POST {
        let (parts, body) = request.into_parts();
        match to_bytes(body, MAX_RPC_BODY_SIZE).await {
            Ok(bytes) => {
                let probe = RpcProbe::parse(&bytes);
                (Request::from_parts(parts, Body::from(bytes)), probe)
            }
            Err(e) => {
                warn!(trace_id = %trace_id, "[Auth] Failed to read request body: {}", e);
                return (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large").into_response();
            }
        }
    } else {
        (request, RpcProbe::default())
    };

    let mcp_session = request
        .headers()
        .get(MCP_SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    // Later requests on an MCP session answer with the variant its initialize chose
    let client_name = probe.client_name.clone().or_else(|| {
        mcp_session
            .as_deref()
            .and_then(|id| state.mcp_sessions.get(id))
            .and_then(|binding| binding.client_name.clone())
    });
    let config = &state.config;
    let variant = challenge_variant(
        client_name.as_deref(),
        config.vscode_compat,
        &config.compat_client_markers,
    );
    let reject = |reason: InvalidTokenReason, id: Value| {
        let err = InvalidTokenError::new(reason);
        warn!(trace_id = %trace_id, reason = reason.as_str(), "[Auth] Rejected MCP request");
        challenge(&state.base_url, &err, variant, id)
    };

    let Some(bearer) = bearer_token(request.headers()).map(str::to_string) else {
        return reject(InvalidTokenReason::Missing, probe.id);
    };

    let envelope = match state.tokens.verify(&bearer) {
        Ok(envelope) => envelope,
        Err(e) => return reject(e.reason, probe.id),
    };
    let session_id = envelope.session_id.clone();

    match state.store.is_invalidated(&session_id).await {
        Ok(false) => {}
        Ok(true) => return reject(InvalidTokenReason::Revoked, probe.id),
        Err(e) => {
            warn!(trace_id = %trace_id, "[Auth] Revocation check failed: {}", e);
            let mut response = (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(jsonrpc_error(probe.id, "Authorization service temporarily unavailable")),
            )
                .into_response();
            no_cache(&mut response);
            return response;
        }
    }

    if let Some(mcp_session) = &mcp_session {
        let bound_elsewhere = match state.mcp_sessions.get_mut(mcp_session) {
            Some(mut binding) if binding.session_id == session_id => {
                binding.last_seen = Utc::now();
                false
            }
            Some(_) => true,
            None => false,
        };
        if bound_elsewhere {
            return reject(InvalidTokenReason::SessionMismatch, probe.id);
        }
    }

    state.orchestrator.acknowledge(&session_id, &bearer);

    // Handed back on the response so the logging middleware's exit line
    // names the session
    let trace = request
        .extensions()
        .get::<TraceContext>()
        .cloned()
        .map(|ctx| ctx.with_client(envelope.client_id.clone(), session_id.clone()));
    if let Some(trace) = &trace {
        request.extensions_mut().insert(trace.clone());
    }
    info!(
        trace_id = %trace_id,
        client = %&envelope.client_id[..envelope.client_id.len().min(12)],
        session = %&session_id[..session_id.len().min(8)],
        method = probe.method.as_deref().unwrap_or("-"),
        "→ MCP"
    );
    let is_delete = request.method() == Method::DELETE;
    request.extensions_mut().insert(AuthContext::new(envelope));

    let mut response = next.run(request).await;

    if is_delete {
        if let Some(mcp_session) = &mcp_session {
            state.mcp_sessions.remove(mcp_session);
            debug!(trace_id = %trace_id, "[Auth] Unbound MCP session {}", mcp_session);
        }
    } else if let Some(new_session) = response
        .headers()
        .get(MCP_SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
    {
        state.mcp_sessions.insert(
            new_session.to_string(),
            McpSessionBinding::new(session_id.clone(), probe.client_name.clone()),
        );
    }

    if let Some(latest) = state.orchestrator.latest_bearer(&session_id) {
        if latest != bearer {
            if let Ok(value) = HeaderValue::from_str(&latest) {
                response
                    .headers_mut()
                    .insert(branding::REFRESHED_TOKEN_HEADER, value);
                debug!(trace_id = %trace_id, "[Auth] Attached re-issued bearer for session");
            }
        }
    }

    if let Some(trace) = trace {
        response.extensions_mut().insert(trace);
    }

    let status = response.status();
    if status.is_client_error() || status.is_server_error() {
        warn!(
            trace_id = %trace_id,
            status = %status,
            method = probe.method.as_deref().unwrap_or("-"),
            "← MCP error"
        );
    }
    response
}
