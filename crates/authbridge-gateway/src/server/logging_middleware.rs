//! HTTP Request/Response Logging Middleware
//!
//! One entry and one exit line per request, correlated by trace id. OAuth
//! bodies that carry codes, verifiers or tokens are never printed.

use axum::{
    body::{to_bytes, Body},
    extract::Request,
    http::{header, HeaderMap, Method, StatusCode},
    middleware::Next,
    response::Response,
};
use tracing::{debug, warn, Instrument};

use crate::logging::{RequestSpan, TraceContext};

/// Maximum body size to buffer for logging (1MB)
const MAX_BODY_LOG_SIZE: usize = 1024 * 1024;

/// Paths whose bodies are redacted
const SENSITIVE_PATHS: &[&str] = &["/access-token", "/register", "/revoke"];

/// Paths whose bodies are not worth logging
const SKIP_BODY_PATHS: &[&str] = &["/authorize", "/callback"];

const SENSITIVE_HEADERS: &[&str] = &["authorization", "cookie", "set-cookie", "x-refreshed-access-token"];

pub fn is_sensitive_path(path: &str) -> bool {
    SENSITIVE_PATHS.iter().any(|p| path.starts_with(p))
}

fn should_skip_body(path: &str) -> bool {
    SKIP_BODY_PATHS.iter().any(|p| path.starts_with(p))
}

/// Compact header dump for DEBUG; secrets are redacted
fn redact_headers_compact(headers: &HeaderMap) -> String {
    headers
        .iter()
        .filter(|(name, _)| {
            matches!(
                name.as_str(),
                "content-type"
                    | "accept"
                    | "user-agent"
                    | "mcp-session-id"
                    | "mcp-protocol-version"
                    | "authorization"
            )
        })
        .map(|(name, value)| {
            if SENSITIVE_HEADERS.contains(&name.as_str()) {
                format!("{}=[REDACTED]", name)
            } else {
                format!("{}={:?}", name, value)
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Format a body for a log line
pub fn format_body(bytes: &[u8], redact: bool) -> String {
    if redact {
        return "[REDACTED]".to_string();
    }
    if bytes.is_empty() {
        return "[empty]".to_string();
    }
    if bytes.len() > MAX_BODY_LOG_SIZE {
        return format!("[{} bytes]", bytes.len());
    }

    match std::str::from_utf8(bytes) {
        Ok(text) => {
            if let Ok(json) = serde_json::from_str::<serde_json::Value>(text) {
                if let Some(method) = json.get("method").and_then(|m| m.as_str()) {
                    return method.to_string();
                }
                return serde_json::to_string(&json).unwrap_or_else(|_| text.to_string());
            }
            match text.char_indices().nth(200) {
                Some((cut, _)) => format!("{}...", &text[..cut]),
                None => text.to_string(),
            }
        }
        Err(_) => format!("[binary: {} bytes]", bytes.len()),
    }
}

/// One-line summary of a JSON-RPC response
fn format_mcp_response(bytes: &[u8]) -> Option<String> {
    let json: serde_json::Value = serde_json::from_slice(bytes).ok()?;

    if let Some(error) = json.get("error") {
        let code = error.get("code").and_then(|c| c.as_i64()).unwrap_or(0);
        let message = error.get("message").and_then(|m| m.as_str()).unwrap_or("unknown");
        return Some(format!("error: {} ({})", message, code));
    }

    let result = json.get("result")?;
    if let Some(tools) = result.get("tools").and_then(|t| t.as_array()) {
        return Some(format!("tools: {}", tools.len()));
    }
    if let Some(content) = result.get("content").and_then(|c| c.as_array()) {
        let is_error = result.get("isError").and_then(|e| e.as_bool()).unwrap_or(false);
        return Some(format!(
            "content: {} item(s){}",
            content.len(),
            if is_error { " [tool error]" } else { "" }
        ));
    }
    if let Some(version) = result.get("protocolVersion").and_then(|v| v.as_str()) {
        let name = result
            .pointer("/serverInfo/name")
            .and_then(|n| n.as_str())
            .unwrap_or("?");
        return Some(format!("initialized: {} ({})", name, version));
    }
    match result.as_object() {
        Some(object) if !object.is_empty() => Some(format!(
            "result: {{{}}}",
            object.keys().map(String::as_str).collect::<Vec<_>>().join(", ")
        )),
        _ => Some("ok".to_string()),
    }
}

/// Extract MCP method from JSON-RPC body
pub fn extract_mcp_method(bytes: &[u8]) -> Option<String> {
    let json: serde_json::Value = serde_json::from_slice(bytes).ok()?;
    let message = match &json {
        serde_json::Value::Array(items) => items.first()?,
        other => other,
    };
    message.get("method").and_then(|m| m.as_str()).map(String::from)
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/json"))
}

/// Logging middleware for requests and responses
///
/// Generates a trace id, stores the [`TraceContext`] in the request
/// extensions and logs a single entry/exit line per request.
pub async fn http_logging_middleware(request: Request, next: Next) -> Result<Response, StatusCode> {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let ctx = TraceContext::new(method.as_str(), &path);
    let span = RequestSpan::enter(&ctx);

    if path.starts_with("/mcp") {
        async move {
            debug!(
                trace_id = %ctx.trace_id,
                headers = %redact_headers_compact(request.headers()),
                "MCP request"
            );

            let (parts, body) = request.into_parts();
            let (request, ctx) = if method == Method::POST {
                let bytes = to_bytes(body, MAX_BODY_LOG_SIZE).await.map_err(|e| {
                    warn!(trace_id = %ctx.trace_id, "Failed to read request body: {}", e);
                    StatusCode::PAYLOAD_TOO_LARGE
                })?;
                let ctx = ctx.with_mcp_method(extract_mcp_method(&bytes));
                (Request::from_parts(parts, Body::from(bytes)), ctx)
            } else {
                (Request::from_parts(parts, body), ctx)
            };
            RequestSpan::log_entry(&ctx);

            let mut request = request;
            request.extensions_mut().insert(ctx.clone());
            let response = next.run(request).await;
            let status = response.status().as_u16();
            // The auth layer hands back the context with client and session filled in
            let ctx = response.extensions().get::<TraceContext>().cloned().unwrap_or(ctx);

            // SSE streams pass through untouched; only plain JSON replies are summarized
            if !is_json(response.headers()) {
                RequestSpan::log_exit(&ctx, status, None);
                return Ok(response);
            }

            let (parts, body) = response.into_parts();
            let bytes = to_bytes(body, MAX_BODY_LOG_SIZE).await.map_err(|e| {
                warn!(trace_id = %ctx.trace_id, "Failed to read response body: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            })?;
            let summary = format_mcp_response(&bytes);
            RequestSpan::log_exit(&ctx, status, summary.as_deref());
            Ok(Response::from_parts(parts, Body::from(bytes)))
        }
        .instrument(span)
        .await
    } else {
        let is_sensitive = is_sensitive_path(&path);
        let skip_body = should_skip_body(&path);

        async move {
            RequestSpan::log_entry(&ctx);

            let (parts, body) = request.into_parts();
            let bytes = to_bytes(body, MAX_BODY_LOG_SIZE).await.map_err(|e| {
                warn!(trace_id = %ctx.trace_id, "Failed to read request body: {}", e);
                StatusCode::PAYLOAD_TOO_LARGE
            })?;
            if !skip_body && !bytes.is_empty() {
                debug!(
                    trace_id = %ctx.trace_id,
                    body = %format_body(&bytes, is_sensitive),
                    "Request body"
                );
            }

            let mut request = Request::from_parts(parts, Body::from(bytes));
            request.extensions_mut().insert(ctx.clone());
            let response = next.run(request).await;

            let (parts, body) = response.into_parts();
            let status = parts.status;
            let bytes = to_bytes(body, MAX_BODY_LOG_SIZE).await.map_err(|e| {
                warn!(trace_id = %ctx.trace_id, "Failed to read response body: {}", e);
                StatusCode::INTERNAL_SERVER_ERROR
            })?;
            if !skip_body && !bytes.is_empty() && bytes.len() < 1000 {
                debug!(
                    trace_id = %ctx.trace_id,
                    body = %format_body(&bytes, is_sensitive),
                    "Response body"
                );
            }

            RequestSpan::log_exit(&ctx, status.as_u16(), None);
            Ok(Response::from_parts(parts, Body::from(bytes)))
        }
        .instrument(span)
        .await
    }
}
