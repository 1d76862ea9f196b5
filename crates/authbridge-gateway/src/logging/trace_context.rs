//! Trace Context - Request correlation and structured logging

use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{info, info_span, Span};

static REQUEST_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Short trace ID for one request: 6 hex characters (e.g. "a1b2c3")
pub fn generate_trace_id() -> String {
    let counter = REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed);
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0);

    format!("{:06x}", counter.wrapping_add(timestamp) & 0xFFFFFF)
}

/// Correlation data for a single request
#[derive(Debug, Clone)]
pub struct TraceContext {
    pub trace_id: String,
    pub method: String,
    pub path: String,
    /// JSON-RPC method for `/mcp` calls (e.g. `tools/call`)
    pub mcp_method: Option<String>,
    /// OAuth client of the bridge session, once authenticated
    pub client_id: Option<String>,
    pub session_id: Option<String>,
    pub started_at: std::time::Instant,
}

impl TraceContext {
    pub fn new(method: &str, path: &str) -> Self {
        Self {
            trace_id: generate_trace_id(),
            method: method.to_string(),
            path: path.to_string(),
            mcp_method: None,
            client_id: None,
            session_id: None,
            started_at: std::time::Instant::now(),
        }
    }

    pub fn with_mcp_method(mut self, method: Option<String>) -> Self {
        self.mcp_method = method;
        self
    }

    /// Set session context after auth
    pub fn with_client(mut self, client_id: String, session_id: String) -> Self {
        self.client_id = Some(client_id);
        self.session_id = Some(session_id);
        self
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }

    /// Client ID truncated to 12 chars, or "anon"
    pub fn short_client(&self) -> &str {
        self.client_id
            .as_ref()
            .map(|c| &c[..c.len().min(12)])
            .unwrap_or("anon")
    }

    /// First 8 chars of the session ID
    pub fn short_session(&self) -> &str {
        self.session_id
            .as_ref()
            .map(|s| &s[..s.len().min(8)])
            .unwrap_or("-")
    }

    /// `→ POST /mcp tools/call`. The session is not known yet on entry.
    pub fn entry_line(&self) -> String {
        match self.mcp_method.as_deref() {
            Some(mcp_method) => format!("→ {} {} {}", self.method, self.path, mcp_method),
            None => format!("→ {} {}", self.method, self.path),
        }
    }

    /// `← 200 tools: 2 client=mcp_0123 session=8f14e45f (4ms)`
    pub fn exit_line(&self, status: u16, detail: Option<&str>) -> String {
        let mut line = format!("← {}", status);
        if let Some(detail) = detail {
            line.push(' ');
            line.push_str(detail);
        }
        if self.client_id.is_some() {
            line.push_str(&format!(" client={} session={}", self.short_client(), self.short_session()));
        }
        line.push_str(&format!(" ({}ms)", self.elapsed_ms()));
        line
    }
}

pub struct RequestSpan;

impl RequestSpan {
    /// Span carrying `trace_id` for every log line emitted while handling the request
    pub fn enter(ctx: &TraceContext) -> Span {
        info_span!(
            "request",
            trace_id = %ctx.trace_id,
            method = %ctx.method,
            path = %ctx.path,
        )
    }

    pub fn log_entry(ctx: &TraceContext) {
        info!(trace_id = %ctx.trace_id, "{}", ctx.entry_line());
    }

    pub fn log_exit(ctx: &TraceContext, status: u16, detail: Option<&str>) {
        info!(trace_id = %ctx.trace_id, "{}", ctx.exit_line(status, detail));
    }
}
