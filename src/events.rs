//! Lifecycle events, fanned out to live subscribers (WebSocket clients, tests).

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::approval::model::{ApprovalRecord, ApprovalStatus, RequestSummary};
use crate::provisioning::{ProvisioningOutcome, RevocationResult};

/// Default broadcast channel capacity.
const DEFAULT_BROADCAST_CAPACITY: usize = 256;

/// Events published as requests move through the workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerEvent {
    /// A request entered the ledger and awaits a decision.
    NewRequest { record: ApprovalRecord },
    /// A request left PENDING.
    RequestUpdate { id: String, status: ApprovalStatus },
    /// A provisioning attempt finished (successfully or not).
    Provisioned { outcome: ProvisioningOutcome },
    Revoked { revocation: RevocationResult },
    /// Full pending list (sent to a client on connect).
    RequestsSync { requests: Vec<RequestSummary> },
}

/// Broadcast bus for [`LedgerEvent`]s.
pub struct EventBus {
    tx: broadcast::Sender<LedgerEvent>,
}

impl EventBus {
    pub fn new() -> Arc<Self> {
        let (tx, _rx) = broadcast::channel(DEFAULT_BROADCAST_CAPACITY);
        Arc::new(Self { tx })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Returns the number of subscribers that received it.
    pub fn publish(&self, event: LedgerEvent) -> usize {
        // No subscribers is fine
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
