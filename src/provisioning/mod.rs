//! Resource routing, tool execution and the provisioning history.

pub mod engine;
pub mod executor;
pub mod router;

pub use engine::{ProvisioningEngine, ProvisioningOutcome, RevocationResult};
pub use executor::{
    HttpToolExecutor, SimulatedExecutor, ToolCall, ToolExecutor, ToolResult, create_executor,
};
pub use router::{Handler, ResourceRouter, RoutePredicate, RouteRule};
