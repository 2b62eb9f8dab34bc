//! Human notification for new approval requests.
//!
//! Notification is best-effort: the ledger logs a failed delivery and carries on.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use super::model::ApprovalRecord;
use crate::error::NotifyError;
use crate::events::{EventBus, LedgerEvent};

/// Tells a human that a request is waiting for a decision.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    async fn notify(&self, record: &ApprovalRecord) -> Result<(), NotifyError>;
}

/// Prints an approval banner to stderr.
pub struct ConsoleNotifier;

impl ConsoleNotifier {
    pub fn new() -> Self {
        Self
    }

    fn render(record: &ApprovalRecord) -> String {
        let rule = "=".repeat(80);
        let request = &record.request;
        let ctx = &record.source_context;
        let mut out = String::new();
        out.push_str(&format!("\n{rule}\n🔔 NEW ACCESS REQUEST REQUIRES APPROVAL\n{rule}\n"));
        out.push_str(&format!("Request ID: {}\n", record.id));
        out.push_str(&format!("Requester: {}\n", request.requester));
        out.push_str(&format!("Resource: {}\n", request.resource));
        out.push_str(&format!("Access Type: {}\n", request.access_type));
        out.push_str(&format!("Urgency: {}\n", request.urgency));
        if !request.specific_permissions.is_empty() {
            out.push_str(&format!(
                "Permissions: {}\n",
                request.specific_permissions.join(", ")
            ));
        }
        out.push_str(&format!("\nJustification:\n  {}\n", request.justification));
        out.push_str("\nOriginal Message:\n");
        out.push_str(&format!(
            "  From: {}\n",
            ctx.sender.as_deref().unwrap_or("Unknown")
        ));
        out.push_str(&format!(
            "  Subject: {}\n",
            ctx.subject.as_deref().unwrap_or("No subject")
        ));
        out.push_str(&format!(
            "  Date: {}\n",
            ctx.received_at.as_deref().unwrap_or("Unknown")
        ));
        out.push_str(&format!("{rule}\n"));
        out
    }
}

impl Default for ConsoleNotifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Notifier for ConsoleNotifier {
    fn name(&self) -> &str {
        "console"
    }

    async fn notify(&self, record: &ApprovalRecord) -> Result<(), NotifyError> {
        eprintln!("{}", Self::render(record));
        info!(request_id = %record.id, requester = %record.request.requester, "Approval requested");
        Ok(())
    }
}

/// Publishes a `new_request` event on the event bus.
pub struct BroadcastNotifier {
    bus: Arc<EventBus>,
}

impl BroadcastNotifier {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl Notifier for BroadcastNotifier {
    fn name(&self) -> &str {
        "broadcast"
    }

    async fn notify(&self, record: &ApprovalRecord) -> Result<(), NotifyError> {
        let delivered = self.bus.publish(LedgerEvent::NewRequest {
            record: record.clone(),
        });
        debug!(request_id = %record.id, subscribers = delivered, "Broadcast new request");
        Ok(())
    }
}

/// Delivers to several notifiers in order. Fails if any of them failed,
/// after trying all of them.
pub struct FanoutNotifier {
    notifiers: Vec<Arc<dyn Notifier>>,
}

impl FanoutNotifier {
    pub fn new(notifiers: Vec<Arc<dyn Notifier>>) -> Self {
        Self { notifiers }
    }
}

#[async_trait]
impl Notifier for FanoutNotifier {
    fn name(&self) -> &str {
        "fanout"
    }

    async fn notify(&self, record: &ApprovalRecord) -> Result<(), NotifyError> {
        let mut failures = Vec::new();
        for notifier in &self.notifiers {
            if let Err(e) = notifier.notify(record).await {
                failures.push(e.to_string());
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(NotifyError::DeliveryFailed {
                notifier: self.name().to_string(),
                reason: failures.join("; "),
            })
        }
    }
}

/// Drops every notification.
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    fn name(&self) -> &str {
        "none"
    }

    async fn notify(&self, _record: &ApprovalRecord) -> Result<(), NotifyError> {
        Ok(())
    }
}
