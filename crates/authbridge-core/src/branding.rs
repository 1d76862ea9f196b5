//! Centralized branding constants
//!
//! All product naming and protocol defaults come from this module.
//!
//! # Usage
//!
//! ```rust
//! use authbridge_core::branding;
//!
//! println!("App: {}", branding::DISPLAY_NAME);
//! let url = branding::resource_metadata_url("http://localhost:3000");
//! assert!(url.ends_with("/.well-known/oauth-protected-resource"));
//! ```

/// Human readable product name
pub const DISPLAY_NAME: &str = "MCP Auth Bridge";

/// Machine name used for MCP `serverInfo` and log file prefixes
pub const SERVER_NAME: &str = "authbridge";

/// Log file prefix for the rolling file appender
pub const LOG_PREFIX: &str = "authbridge";

/// Default HTTP port
pub const DEFAULT_PORT: u16 = 3000;

/// `realm` advertised in `WWW-Authenticate` challenges
pub const AUTH_REALM: &str = "mcp";

/// Lifetime of a bridge access envelope (1 hour)
pub const DEFAULT_ACCESS_TOKEN_TTL_SECS: i64 = 3600;

/// Lifetime of a bridge refresh envelope (30 days)
pub const DEFAULT_REFRESH_TOKEN_TTL_SECS: i64 = 30 * 24 * 60 * 60;

/// Lifetime of authorization state, pending grants and bridge codes (10 minutes)
pub const AUTHORIZATION_TTL_SECS: i64 = 600;

/// Clock skew buffer applied to provider token liveness checks
pub const DEFAULT_CLOCK_SKEW_SECS: i64 = 60;

/// Timeout for outbound calls to provider token endpoints
pub const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = 15;

/// Fallback lifetime when a provider omits `expires_in`
pub const DEFAULT_PROVIDER_TOKEN_TTL_SECS: i64 = 3600;

/// Response header carrying a re-issued bearer after a provider refresh
pub const REFRESHED_TOKEN_HEADER: &str = "x-refreshed-access-token";

/// `clientInfo.name` fragments that select the VS Code challenge variant
pub const VSCODE_CLIENT_MARKERS: &[&str] = &["Visual Studio Code"];

/// Scopes advertised by the bridge itself
pub const BRIDGE_SCOPES: &[&str] = &["mcp", "offline_access"];

/// RFC 9728 protected resource metadata URL for a base URL
pub fn resource_metadata_url(base_url: &str) -> String {
    format!(
        "{}/.well-known/oauth-protected-resource",
        base_url.trim_end_matches('/')
    )
}

/// Canonical resource identifier of the MCP endpoint
pub fn mcp_resource_url(base_url: &str) -> String {
    format!("{}/mcp", base_url.trim_end_matches('/'))
}

/// Provider redirect (callback) URL for a base URL
pub fn callback_url(base_url: &str) -> String {
    format!("{}/callback", base_url.trim_end_matches('/'))
}
