//! Provisioning engine: grants access for approved requests and keeps the audit trail.
//!
//! **Core invariant: only an [`ApprovedRecord`] can be provisioned.**
//!
//! Every attempt is appended to the history before `provision` returns,
//! whether the grant succeeded, failed, or timed out. Downstream failures are
//! recorded as data; the approval stays valid and the grant can be retried
//! out-of-band.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{error, info, warn};
use uuid::Uuid;

use super::executor::{ToolExecutor, ToolResult};
use super::router::{Handler, ResourceRouter};
use crate::approval::model::{AccessRequest, AccessType, ApprovalRecord, ApprovedRecord};
use crate::error::{ProvisioningError, ToolError};

/// Default executor timeout.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// One provisioning attempt. Never modified after it is appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisioningOutcome {
    pub id: Uuid,
    /// The approval record this attempt belongs to.
    pub request_id: String,
    pub handler: Handler,
    pub tool_name: String,
    pub arguments: serde_json::Value,
    pub success: bool,
    #[serde(default)]
    pub details: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub executed_at: DateTime<Utc>,
}

/// One revocation attempt against an earlier outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevocationResult {
    pub id: Uuid,
    pub outcome_id: Uuid,
    pub request_id: String,
    pub tool_name: String,
    pub success: bool,
    #[serde(default)]
    pub details: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub executed_at: DateTime<Utc>,
}

/// Routes approved requests to handlers and runs them through the executor.
pub struct ProvisioningEngine {
    router: ResourceRouter,
    executor: Arc<dyn ToolExecutor>,
    timeout: Duration,
    history: RwLock<Vec<ProvisioningOutcome>>,
    revocations: RwLock<Vec<RevocationResult>>,
    /// Serializes retries so two of them cannot both grant.
    retry_lock: Mutex<()>,
}

impl ProvisioningEngine {
    pub fn new(router: ResourceRouter, executor: Arc<dyn ToolExecutor>) -> Self {
        Self {
            router,
            executor,
            timeout: DEFAULT_TOOL_TIMEOUT,
            history: RwLock::new(Vec::new()),
            revocations: RwLock::new(Vec::new()),
            retry_lock: Mutex::new(()),
        }
    }

    /// Bound every executor call by `timeout`.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn router(&self) -> &ResourceRouter {
        &self.router
    }

    /// Grant the access described by an approved record.
    pub async fn provision(&self, approved: &ApprovedRecord) -> ProvisioningOutcome {
        let handler = self.router.route(&approved.request.resource);
        let tool_name = handler.tool_name().to_string();
        let arguments = build_arguments(&handler, approved);

        info!(
            request_id = %approved.id,
            handler = %handler,
            tool = %tool_name,
            "Provisioning access"
        );

        let result = self.run_tool(&tool_name, &arguments).await;

        let outcome = ProvisioningOutcome {
            id: Uuid::new_v4(),
            request_id: approved.id.clone(),
            handler,
            tool_name,
            arguments,
            success: result.success,
            details: result.details,
            error: result.error,
            executed_at: Utc::now(),
        };

        if outcome.success {
            info!(
                request_id = %outcome.request_id,
                access_type = %approved.request.access_type,
                resource = %approved.request.resource,
                requester = %approved.request.requester,
                "Access provisioned"
            );
        } else {
            error!(
                request_id = %outcome.request_id,
                tool = %outcome.tool_name,
                error = outcome.error.as_deref().unwrap_or("unknown"),
                "Provisioning failed, approval stands and needs manual retry"
            );
        }

        self.history.write().await.push(outcome.clone());
        outcome
    }

    /// Provision a record read back from the ledger, checking that it was
    /// approved and has not been granted already.
    pub(crate) async fn provision_record(
        &self,
        record: &ApprovalRecord,
    ) -> Result<ProvisioningOutcome, ProvisioningError> {
        let approved = ApprovedRecord::from_ledger(record.clone())?;
        let _guard = self.retry_lock.lock().await;
        let granted = self
            .history
            .read()
            .await
            .iter()
            .any(|o| o.request_id == approved.id && o.success);
        if granted {
            return Err(ProvisioningError::AlreadyProvisioned {
                id: approved.id.clone(),
            });
        }
        Ok(self.provision(&approved).await)
    }

    /// Best-effort undo of a successful grant.
    ///
    /// Records a [`RevocationResult`]; the original outcome is left as is.
    pub async fn revoke(&self, outcome_id: Uuid) -> Result<RevocationResult, ProvisioningError> {
        let outcome = self
            .history
            .read()
            .await
            .iter()
            .find(|o| o.id == outcome_id)
            .cloned()
            .ok_or(ProvisioningError::OutcomeNotFound { id: outcome_id })?;

        if !outcome.success {
            return Err(ProvisioningError::NothingToRevoke { id: outcome_id });
        }

        let tool_name = outcome.handler.revoke_tool_name();
        let mut arguments = outcome.arguments.clone();
        if let Some(map) = arguments.as_object_mut() {
            map.insert(
                "outcome_id".to_string(),
                serde_json::Value::String(outcome_id.to_string()),
            );
        }

        info!(request_id = %outcome.request_id, tool = %tool_name, "Revoking access");
        let result = self.run_tool(&tool_name, &arguments).await;

        let revocation = RevocationResult {
            id: Uuid::new_v4(),
            outcome_id,
            request_id: outcome.request_id,
            tool_name,
            success: result.success,
            details: result.details,
            error: result.error,
            executed_at: Utc::now(),
        };

        if !revocation.success {
            warn!(
                request_id = %revocation.request_id,
                error = revocation.error.as_deref().unwrap_or("unknown"),
                "Revocation failed"
            );
        }

        self.revocations.write().await.push(revocation.clone());
        Ok(revocation)
    }

    /// Every attempt so far, in execution order.
    pub async fn history(&self) -> Vec<ProvisioningOutcome> {
        self.history.read().await.clone()
    }

    /// Attempts for one approval record.
    pub async fn history_for(&self, request_id: &str) -> Vec<ProvisioningOutcome> {
        self.history
            .read()
            .await
            .iter()
            .filter(|o| o.request_id == request_id)
            .cloned()
            .collect()
    }

    pub async fn revocations(&self) -> Vec<RevocationResult> {
        self.revocations.read().await.clone()
    }

    /// Run a tool, folding errors and timeouts into a failed result.
    async fn run_tool(&self, tool_name: &str, arguments: &serde_json::Value) -> ToolResult {
        let call = self.executor.execute(tool_name, arguments);
        let mut result = match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => ToolResult::failed(e.to_string()),
            Err(_) => ToolResult::failed(
                ToolError::Timeout {
                    name: tool_name.to_string(),
                    timeout: self.timeout,
                }
                .to_string(),
            ),
        };

        if !result.success && result.error.is_none() {
            result.error = Some(format!("Tool {} reported failure", tool_name));
        }
        result
    }
}

/// Arguments passed to a grant tool.
fn build_arguments(handler: &Handler, approved: &ApprovedRecord) -> serde_json::Value {
    let request = &approved.request;
    let user_id = if request.user_id.trim().is_empty() {
        &request.requester
    } else {
        &request.user_id
    };
    serde_json::json!({
        "user_id": user_id,
        "requester": request.requester,
        "resource": request.resource,
        "access_type": request.access_type,
        "specific_permissions": request.specific_permissions,
        "justification": request.justification,
        "approved_by": approved.approver().unwrap_or("unknown"),
        "approval_comments": approved.comments().unwrap_or(""),
        "urgency": request.urgency,
        "scope": handler_scope(handler, request),
    })
}

/// Handler-specific grant scope. Explicit permissions replace the derived scope.
fn handler_scope(handler: &Handler, request: &AccessRequest) -> serde_json::Value {
    if !request.specific_permissions.is_empty() {
        return serde_json::json!({ "permissions": request.specific_permissions });
    }

    let access = &request.access_type;
    match handler {
        Handler::Database => {
            let privileges: Vec<&str> = match access {
                AccessType::Read => vec!["SELECT"],
                AccessType::Write => vec!["SELECT", "INSERT", "UPDATE", "DELETE"],
                AccessType::Admin => vec!["ALL PRIVILEGES"],
                AccessType::Other(other) => vec![other.as_str()],
            };
            serde_json::json!({ "privileges": privileges })
        }
        Handler::CloudInfra => {
            let policy = match access {
                AccessType::Read => "ReadOnlyAccess",
                AccessType::Write => "PowerUserAccess",
                AccessType::Admin => "AdministratorAccess",
                AccessType::Other(other) => other.as_str(),
            };
            serde_json::json!({ "policy": policy })
        }
        Handler::SourceControl => {
            let permission = match access {
                AccessType::Read => "pull",
                AccessType::Write => "push",
                AccessType::Admin => "admin",
                AccessType::Other(other) => other.as_str(),
            };
            serde_json::json!({ "permission": permission })
        }
        _ => serde_json::json!({ "access_type": access }),
    }
}
