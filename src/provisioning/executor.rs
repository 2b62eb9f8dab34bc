//! Tool executors: the systems that actually grant and revoke access.
//!
//! Supports:
//! - **Simulated**: records every call and reports success without touching anything
//! - **HTTP**: posts tool calls to a remote tool endpoint
//!
//! The executor is picked once at construction via [`create_executor`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::config::ProvisioningConfig;
use crate::error::ToolError;

/// What a tool reported back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub success: bool,
    #[serde(default)]
    pub details: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(details: serde_json::Value) -> Self {
        Self {
            success: true,
            details,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            details: serde_json::Value::Null,
            error: Some(error.into()),
        }
    }
}

/// Runs a named tool with JSON arguments.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    fn name(&self) -> &str;

    async fn execute(
        &self,
        tool_name: &str,
        args: &serde_json::Value,
    ) -> Result<ToolResult, ToolError>;
}

/// A recorded call made against the simulated executor.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub tool_name: String,
    pub arguments: serde_json::Value,
}

/// Executor that grants nothing and records every call.
pub struct SimulatedExecutor {
    calls: RwLock<Vec<ToolCall>>,
    failing_tools: Vec<String>,
}

impl SimulatedExecutor {
    pub fn new() -> Self {
        Self {
            calls: RwLock::new(Vec::new()),
            failing_tools: Vec::new(),
        }
    }

    /// Make calls to `tool_name` report a failed grant.
    pub fn failing_on(mut self, tool_name: impl Into<String>) -> Self {
        self.failing_tools.push(tool_name.into());
        self
    }

    /// Calls received so far, in order.
    pub async fn calls(&self) -> Vec<ToolCall> {
        self.calls.read().await.clone()
    }

    fn simulated_details(tool_name: &str, args: &serde_json::Value) -> serde_json::Value {
        let field = |key: &str| args.get(key).cloned().unwrap_or(serde_json::Value::Null);

        if tool_name.starts_with("revoke_") {
            return serde_json::json!({
                "tool_name": tool_name,
                "message": "Access revoked successfully (simulation)",
                "simulation": true,
            });
        }

        serde_json::json!({
            "tool_name": tool_name,
            "message": format!(
                "Successfully provisioned {} access to {} for user {}",
                args.get("access_type").and_then(|v| v.as_str()).unwrap_or("unknown"),
                args.get("resource").and_then(|v| v.as_str()).unwrap_or("unknown"),
                args.get("user_id").and_then(|v| v.as_str()).unwrap_or("unknown"),
            ),
            "simulation": true,
            "access_details": {
                "user_id": field("user_id"),
                "requester": field("requester"),
                "resource": field("resource"),
                "permissions": [field("access_type")],
                "specific_permissions": field("specific_permissions"),
                "granted_by": field("approved_by"),
            },
        })
    }
}

impl Default for SimulatedExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ToolExecutor for SimulatedExecutor {
    fn name(&self) -> &str {
        "simulated"
    }

    async fn execute(
        &self,
        tool_name: &str,
        args: &serde_json::Value,
    ) -> Result<ToolResult, ToolError> {
        info!(tool = %tool_name, "[SIMULATION] Tool call");
        debug!(tool = %tool_name, arguments = %args, "[SIMULATION] Arguments");

        self.calls.write().await.push(ToolCall {
            tool_name: tool_name.to_string(),
            arguments: args.clone(),
        });

        if self.failing_tools.iter().any(|t| t == tool_name) {
            return Ok(ToolResult::failed(format!(
                "simulated failure for {}",
                tool_name
            )));
        }

        Ok(ToolResult::ok(Self::simulated_details(tool_name, args)))
    }
}

/// Request body posted to the tool endpoint.
#[derive(Debug, Serialize)]
struct ToolCallBody<'a> {
    name: &'a str,
    arguments: &'a serde_json::Value,
}

/// Executor that calls a remote tool endpoint over HTTP.
pub struct HttpToolExecutor {
    client: reqwest::Client,
    endpoint: String,
    token: Option<SecretString>,
}

impl HttpToolExecutor {
    pub fn new(
        endpoint: impl Into<String>,
        token: Option<SecretString>,
        timeout: Duration,
    ) -> Result<Self, ToolError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ToolError::Http {
                name: "client".to_string(),
                reason: format!("Failed to build HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            endpoint: endpoint.into(),
            token,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ToolExecutor for HttpToolExecutor {
    fn name(&self) -> &str {
        "http"
    }

    async fn execute(
        &self,
        tool_name: &str,
        args: &serde_json::Value,
    ) -> Result<ToolResult, ToolError> {
        let body = ToolCallBody {
            name: tool_name,
            arguments: args,
        };

        let mut request = self.client.post(&self.endpoint).json(&body);
        if let Some(ref token) = self.token {
            request = request.bearer_auth(token.expose_secret());
        }

        let response = request.send().await.map_err(|e| ToolError::Http {
            name: tool_name.to_string(),
            reason: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ToolError::ExecutionFailed {
                name: tool_name.to_string(),
                reason: format!("HTTP {}: {}", status, text),
            });
        }

        response
            .json::<ToolResult>()
            .await
            .map_err(|e| ToolError::InvalidResponse {
                name: tool_name.to_string(),
                reason: e.to_string(),
            })
    }
}

/// Create the executor selected by configuration.
pub fn create_executor(config: &ProvisioningConfig) -> Result<Arc<dyn ToolExecutor>, ToolError> {
    match config.tool_endpoint {
        Some(ref endpoint) => {
            info!(endpoint = %endpoint, "Using HTTP tool executor");
            Ok(Arc::new(HttpToolExecutor::new(
                endpoint.clone(),
                config.tool_token.clone(),
                config.tool_timeout,
            )?))
        }
        None => {
            info!("No tool endpoint configured, using simulated executor");
            Ok(Arc::new(SimulatedExecutor::new()))
        }
    }
}
