//! Bridge MCP handler
//!
//! Minimal tool surface on top of the auth core. Tools declare which
//! providers they need in [`ToolAuthRequirements`]; the handler checks them
//! before dispatch so tool bodies never see a missing or dead token.

use std::collections::HashMap;
use std::sync::Arc;

use authbridge_core::{branding, MissingTokenError, Provider};
use chrono::SecondsFormat;
use rmcp::{
    model::*,
    service::RequestContext,
    ErrorData as McpError, RoleServer, ServerHandler,
};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::session::{extract_auth_context, AuthContext, AuthContextAccessor, AuthInfo};

pub const AUTH_STATUS_TOOL: &str = "auth_status";

/// Tool name → providers whose tokens the tool needs
#[derive(Debug, Clone, Default)]
pub struct ToolAuthRequirements {
    tools: HashMap<String, Vec<Provider>>,
}

impl ToolAuthRequirements {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn require(mut self, tool: impl Into<String>, providers: &[Provider]) -> Self {
        self.tools.insert(tool.into(), providers.to_vec());
        self
    }

    pub fn required(&self, tool: &str) -> &[Provider] {
        self.tools.get(tool).map(Vec::as_slice).unwrap_or(&[])
    }

    /// First unmet requirement of `tool`, if any
    pub fn check(
        &self,
        tool: &str,
        info: &Result<AuthInfo, MissingTokenError>,
    ) -> Result<(), MissingTokenError> {
        for provider in self.required(tool) {
            match info {
                Ok(info) => {
                    info.require(*provider)?;
                }
                Err(e) if e.provider == *provider => return Err(e.clone()),
                Err(_) => return Err(MissingTokenError::not_connected(*provider)),
            }
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct BridgeMcpHandler {
    accessor: Arc<AuthContextAccessor>,
    requirements: Arc<ToolAuthRequirements>,
}

impl BridgeMcpHandler {
    pub fn new(accessor: Arc<AuthContextAccessor>, requirements: ToolAuthRequirements) -> Self {
        Self {
            accessor,
            requirements: Arc::new(requirements),
        }
    }

    fn auth_context(&self, context: &RequestContext<RoleServer>) -> Result<AuthContext, McpError> {
        extract_auth_context(&context.extensions).ok_or_else(|| {
            warn!("[Auth] MCP request reached the handler without an auth context");
            McpError::invalid_params("Authentication context missing", None)
        })
    }

    fn tools() -> Vec<Tool> {
        let definitions = [json!({
            "name": AUTH_STATUS_TOOL,
            "description": "List the providers connected to this session with their scopes and expiry",
            "inputSchema": { "type": "object", "properties": {} }
        })];
        definitions
            .into_iter()
            .filter_map(|definition| serde_json::from_value(definition).ok())
            .collect()
    }

    fn auth_status(ctx: &AuthContext, info: Result<AuthInfo, MissingTokenError>) -> CallToolResult {
        let mut providers = Vec::new();
        match &info {
            Ok(info) => {
                for token in info.tokens.values() {
                    providers.push(json!({
                        "provider": token.provider.as_str(),
                        "status": "connected",
                        "scope": token.scope,
                        "expires_at": token.expires_at.to_rfc3339_opts(SecondsFormat::Secs, true),
                        "expires_in": token.expires_in(),
                        "refreshable": token.can_refresh(),
                    }));
                }
                for (provider, err) in &info.failures {
                    providers.push(json!({
                        "provider": provider.as_str(),
                        "status": "unavailable",
                        "retryable": err.retryable,
                        "message": err.user_message(),
                    }));
                }
            }
            Err(err) => providers.push(json!({
                "provider": err.provider.as_str(),
                "status": "unavailable",
                "retryable": err.retryable,
                "message": err.user_message(),
            })),
        }

        let body = json!({
            "client_id": ctx.client_id,
            "scope": ctx.envelope.scope,
            "session_expires_at": ctx.envelope.expires_at_utc().to_rfc3339_opts(SecondsFormat::Secs, true),
            "providers": providers,
        });
        CallToolResult::success(vec![Content::text(body.to_string())])
    }
}

impl ServerHandler for BridgeMcpHandler {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: Default::default(),
            capabilities: ServerCapabilities::builder()
                .enable_tools_with(ToolsCapability {
                    list_changed: Some(false),
                })
                .build(),
            server_info: Implementation {
                name: branding::SERVER_NAME.to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                ..Default::default()
            },
            instructions: Some(format!(
                "{} holds this session's Atlassian, Figma and Google tokens. \
                 Call {} to see which providers are connected.",
                branding::DISPLAY_NAME,
                AUTH_STATUS_TOOL
            )),
        }
    }

    async fn list_tools(
        &self,
        _params: Option<PaginatedRequestParams>,
        context: RequestContext<RoleServer>,
    ) -> Result<ListToolsResult, McpError> {
        self.auth_context(&context)?;
        let tools = Self::tools();
        debug!(count = tools.len(), "list_tools");
        Ok(ListToolsResult::with_all_items(tools))
    }

    async fn call_tool(
        &self,
        params: CallToolRequestParams,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpError> {
        let ctx = self.auth_context(&context)?;
        let tool = params.name.as_ref();
        info!(
            tool = %tool,
            client = %&ctx.client_id[..ctx.client_id.len().min(12)],
            "call_tool"
        );

        let info = self.accessor.get_auth_info_safe(&ctx, tool).await;
        if let Err(missing) = self.requirements.check(tool, &info) {
            info!(tool = %tool, provider = %missing.provider, "call_tool blocked: missing provider token");
            return Ok(CallToolResult::error(vec![Content::text(missing.user_message())]));
        }

        match tool {
            AUTH_STATUS_TOOL => Ok(Self::auth_status(&ctx, info)),
            other => Err(McpError::invalid_params(format!("Unknown tool: {}", other), None)),
        }
    }
}
