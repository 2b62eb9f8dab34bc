//! Access Agent: governed approval and provisioning of access requests.

pub mod api;
pub mod approval;
pub mod config;
pub mod demo;
pub mod error;
pub mod events;
pub mod provisioning;
pub mod workflow;

use std::sync::Arc;

use approval::notify::{
    BroadcastNotifier, ConsoleNotifier, FanoutNotifier, NoopNotifier, Notifier,
};
use approval::{ApprovalLedger, InMemoryStore};
use config::{AgentConfig, NotificationMethod};
use events::EventBus;
use provisioning::{ProvisioningEngine, ResourceRouter, create_executor};
use workflow::WorkflowCoordinator;

/// Wire a coordinator from configuration: in-memory store, configured
/// notifier and executor, default routing table.
pub fn build_coordinator(config: &AgentConfig) -> Result<Arc<WorkflowCoordinator>, error::Error> {
    let events = EventBus::new();

    let notifier: Arc<dyn Notifier> = match config.notification {
        // Live API clients see new requests in console mode too
        NotificationMethod::Console => Arc::new(FanoutNotifier::new(vec![
            Arc::new(ConsoleNotifier::new()),
            Arc::new(BroadcastNotifier::new(Arc::clone(&events))),
        ])),
        NotificationMethod::Broadcast => Arc::new(BroadcastNotifier::new(Arc::clone(&events))),
        NotificationMethod::None => Arc::new(NoopNotifier),
    };
    let ledger = ApprovalLedger::new(Arc::new(InMemoryStore::new()), notifier);

    let executor = create_executor(&config.provisioning)?;
    let engine = ProvisioningEngine::new(ResourceRouter::default_rules(), executor)
        .with_timeout(config.provisioning.tool_timeout);

    Ok(Arc::new(WorkflowCoordinator::new(
        Arc::new(ledger),
        Arc::new(engine),
        events,
    )))
}
