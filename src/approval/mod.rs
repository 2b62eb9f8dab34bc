//! Approval lifecycle: request model, store, ledger and notification.

pub mod ledger;
pub mod model;
pub mod notify;
pub mod store;

pub use ledger::ApprovalLedger;
pub use model::{
    AccessRequest, AccessType, ApprovalRecord, ApprovalStatus, ApprovedRecord, RequestSummary,
    SourceContext, Urgency,
};
pub use notify::{BroadcastNotifier, ConsoleNotifier, FanoutNotifier, NoopNotifier, Notifier};
pub use store::{ApprovalStore, InMemoryStore};
