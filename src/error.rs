//! Error types for the access agent.

use std::time::Duration;

use uuid::Uuid;

/// Top-level error type for the agent.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Approval error: {0}")]
    Approval(#[from] ApprovalError),

    #[error("Provisioning error: {0}")]
    Provisioning(#[from] ProvisioningError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Notification error: {0}")]
    Notify(#[from] NotifyError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Ledger errors. These are caller bugs, not operational outcomes.
#[derive(Debug, thiserror::Error)]
pub enum ApprovalError {
    #[error("Approval request {id} already exists")]
    DuplicateId { id: String },

    /// Also returned for ids that were already resolved, so a decision
    /// can never be applied twice.
    #[error("Approval request {id} not found in pending requests")]
    NotFound { id: String },

    #[error("A decision on request {id} needs a named approver")]
    MissingApprover { id: String },

    #[error("Approval store failure: {0}")]
    Store(#[from] StoreError),
}

/// Approval store backend errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Record {id} already stored")]
    Duplicate { id: String },

    #[error("Store backend failure: {0}")]
    Backend(String),
}

/// Provisioning engine errors.
///
/// Downstream grant failures are not errors; they are recorded as failed
/// outcomes in the provisioning history.
#[derive(Debug, thiserror::Error)]
pub enum ProvisioningError {
    #[error("Request {id} is {status}, only approved requests can be provisioned")]
    InvalidState { id: String, status: String },

    #[error("Request {id} already has a successful grant")]
    AlreadyProvisioned { id: String },

    #[error("Provisioning outcome {id} not found")]
    OutcomeNotFound { id: Uuid },

    #[error("Provisioning outcome {id} did not grant access, nothing to revoke")]
    NothingToRevoke { id: Uuid },
}

/// Tool execution errors raised by an executor.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Tool {name} execution failed: {reason}")]
    ExecutionFailed { name: String, reason: String },

    #[error("Tool {name} timed out after {timeout:?}")]
    Timeout { name: String, timeout: Duration },

    #[error("HTTP error calling tool {name}: {reason}")]
    Http { name: String, reason: String },

    #[error("Invalid response from tool {name}: {reason}")]
    InvalidResponse { name: String, reason: String },
}

/// Notification delivery errors.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("Notifier {notifier} failed to deliver: {reason}")]
    DeliveryFailed { notifier: String, reason: String },
}

/// Result type alias for the agent.
pub type Result<T> = std::result::Result<T, Error>;
