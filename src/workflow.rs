//! Workflow coordinator. The operations external callers use.
//!
//! Flow:
//! 1. Detector output is submitted → ledger entry (PENDING) + notification
//! 2. A human decides → ledger transition
//! 3. Approval only → provisioning engine → outcome in history
//!
//! **Rejection never reaches the provisioning engine.** The engine only
//! accepts the `ApprovedRecord` returned by a successful approval.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::approval::ledger::ApprovalLedger;
use crate::approval::model::{AccessRequest, ApprovalRecord, RequestSummary, SourceContext};
use crate::error::{ApprovalError, Error, ProvisioningError};
use crate::events::{EventBus, LedgerEvent};
use crate::provisioning::{ProvisioningEngine, ProvisioningOutcome, RevocationResult};

/// Attempts at finding an unused short id before giving up.
const MAX_ID_ATTEMPTS: usize = 5;

/// A human decision on a pending request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
}

/// Result of [`WorkflowCoordinator::decide`].
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum DecisionOutcome {
    /// Approved and handed to provisioning. The grant itself may have failed;
    /// check `provisioning.success`.
    Approved {
        record: ApprovalRecord,
        provisioning: ProvisioningOutcome,
    },
    Rejected { record: ApprovalRecord },
}

impl DecisionOutcome {
    pub fn record(&self) -> &ApprovalRecord {
        match self {
            Self::Approved { record, .. } | Self::Rejected { record } => record,
        }
    }

    pub fn provisioning(&self) -> Option<&ProvisioningOutcome> {
        match self {
            Self::Approved { provisioning, .. } => Some(provisioning),
            Self::Rejected { .. } => None,
        }
    }
}

/// Detector verdict for one inbound message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub source_context: SourceContext,
    /// `None` when the message did not contain an access request.
    pub request: Option<AccessRequest>,
}

/// Counts from a batch intake.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntakeSummary {
    pub messages_processed: usize,
    pub requests_found: usize,
    pub approvals_pending: usize,
    pub approval_ids: Vec<String>,
}

/// Composes ledger, provisioning engine and event bus.
pub struct WorkflowCoordinator {
    ledger: Arc<ApprovalLedger>,
    engine: Arc<ProvisioningEngine>,
    events: Arc<EventBus>,
}

impl WorkflowCoordinator {
    pub fn new(
        ledger: Arc<ApprovalLedger>,
        engine: Arc<ProvisioningEngine>,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            ledger,
            engine,
            events,
        }
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn ledger(&self) -> &Arc<ApprovalLedger> {
        &self.ledger
    }

    pub fn engine(&self) -> &Arc<ProvisioningEngine> {
        &self.engine
    }

    /// Submit a detected request under a generated short id.
    pub async fn submit_detected_request(
        &self,
        request: AccessRequest,
        source_context: SourceContext,
    ) -> Result<ApprovalRecord, Error> {
        let mut last_err = None;
        for _ in 0..MAX_ID_ATTEMPTS {
            match self
                .ledger
                .submit(short_id(), request.clone(), source_context.clone())
                .await
            {
                Ok(record) => return Ok(record),
                Err(ApprovalError::DuplicateId { id }) => {
                    warn!(request_id = %id, "Generated id collided, retrying");
                    last_err = Some(ApprovalError::DuplicateId { id });
                }
                Err(e) => return Err(e.into()),
            }
        }
        Err(last_err
            .unwrap_or(ApprovalError::DuplicateId { id: String::new() })
            .into())
    }

    /// Submit a request under a caller-chosen id.
    pub async fn submit_with_id(
        &self,
        id: &str,
        request: AccessRequest,
        source_context: SourceContext,
    ) -> Result<ApprovalRecord, Error> {
        Ok(self.ledger.submit(id, request, source_context).await?)
    }

    /// Submit every detected request in a batch of inbound messages.
    ///
    /// Failures on individual messages are logged but don't fail the batch.
    pub async fn submit_batch(&self, detections: Vec<Detection>) -> IntakeSummary {
        let mut summary = IntakeSummary {
            messages_processed: detections.len(),
            ..Default::default()
        };

        for detection in detections {
            let Some(request) = detection.request else {
                continue;
            };
            summary.requests_found += 1;
            match self
                .submit_detected_request(request, detection.source_context)
                .await
            {
                Ok(record) => summary.approval_ids.push(record.id),
                Err(e) => warn!(error = %e, "Failed to submit detected request"),
            }
        }
        summary.approvals_pending = summary.approval_ids.len();

        info!(
            messages = summary.messages_processed,
            found = summary.requests_found,
            pending = summary.approvals_pending,
            "Processed intake batch"
        );
        summary
    }

    /// Apply a human decision. Approval provisions access; rejection does not.
    pub async fn decide(
        &self,
        id: &str,
        decision: Decision,
        approver: &str,
        comments: Option<String>,
    ) -> Result<DecisionOutcome, Error> {
        match decision {
            Decision::Approve => {
                let approved = self.ledger.approve(id, approver, comments).await?;
                self.publish_update(&approved);

                let provisioning = self.engine.provision(&approved).await;
                self.events.publish(LedgerEvent::Provisioned {
                    outcome: provisioning.clone(),
                });

                Ok(DecisionOutcome::Approved {
                    record: approved.into_inner(),
                    provisioning,
                })
            }
            Decision::Reject => {
                let record = self.ledger.reject(id, approver, comments).await?;
                self.publish_update(&record);
                Ok(DecisionOutcome::Rejected { record })
            }
        }
    }

    /// Run provisioning again for an approved request whose grant failed.
    ///
    /// The record is read from the ledger, so only a request the ledger
    /// holds as APPROVED can be provisioned here.
    pub async fn retry_provisioning(&self, id: &str) -> Result<ProvisioningOutcome, Error> {
        let record = self
            .ledger
            .get(id)
            .await?
            .ok_or_else(|| ApprovalError::NotFound { id: id.to_string() })?;

        let outcome = self.engine.provision_record(&record).await?;
        info!(request_id = %id, success = outcome.success, "Provisioning retried");
        self.events.publish(LedgerEvent::Provisioned {
            outcome: outcome.clone(),
        });
        Ok(outcome)
    }

    /// Withdraw a pending request without a decision.
    pub async fn cancel(
        &self,
        id: &str,
        actor: &str,
        reason: Option<String>,
    ) -> Result<ApprovalRecord, Error> {
        let record = self.ledger.cancel(id, actor, reason).await?;
        self.publish_update(&record);
        Ok(record)
    }

    pub async fn get(&self, id: &str) -> Result<Option<ApprovalRecord>, Error> {
        Ok(self.ledger.get(id).await?)
    }

    pub async fn list_pending(&self) -> Result<Vec<ApprovalRecord>, Error> {
        Ok(self.ledger.list_pending().await?)
    }

    pub async fn pending_summaries(&self) -> Result<Vec<RequestSummary>, Error> {
        Ok(self
            .ledger
            .list_pending()
            .await?
            .iter()
            .map(ApprovalRecord::summary)
            .collect())
    }

    pub async fn history(&self) -> Vec<ProvisioningOutcome> {
        self.engine.history().await
    }

    pub async fn revocations(&self) -> Vec<RevocationResult> {
        self.engine.revocations().await
    }

    /// Revoke a previously provisioned grant.
    pub async fn revoke(&self, outcome_id: Uuid) -> Result<RevocationResult, ProvisioningError> {
        let revocation = self.engine.revoke(outcome_id).await?;
        self.events.publish(LedgerEvent::Revoked {
            revocation: revocation.clone(),
        });
        Ok(revocation)
    }

    fn publish_update(&self, record: &ApprovalRecord) {
        self.events.publish(LedgerEvent::RequestUpdate {
            id: record.id.clone(),
            status: record.status,
        });
    }
}

/// Short human-typable id: the first 8 hex chars of a v4 UUID.
fn short_id() -> String {
    let mut id = Uuid::new_v4().simple().to_string();
    id.truncate(8);
    id
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::model::ApprovalStatus;
    use crate::error::ToolError;
    use crate::provisioning::{Handler, ResourceRouter, SimulatedExecutor, ToolExecutor, ToolResult};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn coordinator() -> WorkflowCoordinator {
        coordinator_with(Arc::new(SimulatedExecutor::new()))
    }

    fn coordinator_with(executor: Arc<dyn ToolExecutor>) -> WorkflowCoordinator {
        let engine = ProvisioningEngine::new(ResourceRouter::default_rules(), executor);
        WorkflowCoordinator::new(
            Arc::new(ApprovalLedger::in_memory()),
            Arc::new(engine),
            EventBus::new(),
        )
    }

    /// Fails every call until `up` is set.
    struct FlakyExecutor {
        up: AtomicBool,
    }

    #[async_trait]
    impl ToolExecutor for FlakyExecutor {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn execute(
            &self,
            name: &str,
            _arguments: &serde_json::Value,
        ) -> Result<ToolResult, ToolError> {
            if self.up.load(Ordering::SeqCst) {
                Ok(ToolResult::ok(serde_json::json!({ "tool": name })))
            } else {
                Err(ToolError::ExecutionFailed {
                    name: name.to_string(),
                    reason: "connection refused".into(),
                })
            }
        }
    }

    fn request(resource: &str, access: &str) -> AccessRequest {
        AccessRequest::new("john.doe@company.com", resource, access, "needed for work")
    }

    #[test]
    fn short_ids_are_eight_hex_chars() {
        let id = short_id();
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn approve_provisions_through_router() {
        let wf = coordinator();
        wf.submit_with_id("r1", request("production database", "read"), SourceContext::default())
            .await
            .unwrap();

        let outcome = wf
            .decide("r1", Decision::Approve, "alice", None)
            .await
            .unwrap();
        assert_eq!(outcome.record().status, ApprovalStatus::Approved);
        let provisioning = outcome.provisioning().unwrap();
        assert_eq!(provisioning.handler, Handler::Database);
        assert!(provisioning.success);

        let history = wf.history().await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].request_id, "r1");
    }

    #[tokio::test]
    async fn reject_never_provisions() {
        let wf = coordinator();
        wf.submit_with_id("r2", request("weekly meeting", "read"), SourceContext::default())
            .await
            .unwrap();

        let outcome = wf
            .decide(
                "r2",
                Decision::Reject,
                "bob",
                Some("not an access request".into()),
            )
            .await
            .unwrap();
        assert!(outcome.provisioning().is_none());
        assert_eq!(
            wf.get("r2").await.unwrap().unwrap().status,
            ApprovalStatus::Rejected
        );
        assert!(wf.history().await.is_empty());

        let err = wf
            .decide("r2", Decision::Approve, "alice", None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Approval(ApprovalError::NotFound { .. })));
        assert!(wf.history().await.is_empty());
    }

    #[tokio::test]
    async fn decisions_publish_events() {
        let wf = coordinator();
        let mut rx = wf.events().subscribe();
        wf.submit_with_id("r1", request("jira", "read"), SourceContext::default())
            .await
            .unwrap();
        wf.decide("r1", Decision::Approve, "alice", None)
            .await
            .unwrap();

        match rx.recv().await.unwrap() {
            LedgerEvent::RequestUpdate { id, status } => {
                assert_eq!(id, "r1");
                assert_eq!(status, ApprovalStatus::Approved);
            }
            other => panic!("Expected RequestUpdate, got {:?}", other),
        }
        match rx.recv().await.unwrap() {
            LedgerEvent::Provisioned { outcome } => assert_eq!(outcome.request_id, "r1"),
            other => panic!("Expected Provisioned, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn batch_skips_non_requests() {
        let wf = coordinator();
        let detections = vec![
            Detection {
                source_context: SourceContext::email("demo-001", "john@company.com", "DB"),
                request: Some(request("production database", "read")),
            },
            Detection {
                source_context: SourceContext::email("demo-002", "bob@company.com", "Standup"),
                request: None,
            },
            Detection {
                source_context: SourceContext::email("demo-003", "jane@company.com", "S3"),
                request: Some(request("AWS S3 bucket", "write")),
            },
        ];

        let summary = wf.submit_batch(detections).await;
        assert_eq!(summary.messages_processed, 3);
        assert_eq!(summary.requests_found, 2);
        assert_eq!(summary.approvals_pending, 2);

        let pending = wf.pending_summaries().await.unwrap();
        let ids: Vec<String> = pending.iter().map(|s| s.request_id.clone()).collect();
        assert_eq!(ids, summary.approval_ids);
        assert_eq!(pending[1].message_subject, "S3");
    }

    #[tokio::test]
    async fn cancel_then_decide_fails() {
        let wf = coordinator();
        let record = wf
            .submit_detected_request(request("github repo", "write"), SourceContext::default())
            .await
            .unwrap();
        wf.cancel(&record.id, "detector", Some("duplicate".into()))
            .await
            .unwrap();

        assert!(wf
            .decide(&record.id, Decision::Approve, "alice", None)
            .await
            .is_err());
        assert!(wf.history().await.is_empty());
    }

    #[tokio::test]
    async fn revoke_via_coordinator() {
        let wf = coordinator();
        wf.submit_with_id("r1", request("slack workspace", "read"), SourceContext::default())
            .await
            .unwrap();
        let outcome = wf
            .decide("r1", Decision::Approve, "alice", None)
            .await
            .unwrap();
        let outcome_id = outcome.provisioning().unwrap().id;

        let revocation = wf.revoke(outcome_id).await.unwrap();
        assert_eq!(revocation.tool_name, "revoke_grant_slack_access");
        assert_eq!(wf.revocations().await.len(), 1);
        assert_eq!(wf.history().await.len(), 1);
    }

    #[tokio::test]
    async fn sequential_approvals_are_recorded_in_call_order() {
        let wf = coordinator();
        let ids = ["r1", "r2", "r3", "r4", "r5"];
        for id in ids {
            wf.submit_with_id(id, request("production database", "read"), SourceContext::default())
                .await
                .unwrap();
        }

        for id in ids {
            wf.decide(id, Decision::Approve, "alice", None)
                .await
                .unwrap();
        }

        let history = wf.history().await;
        let recorded: Vec<&str> = history.iter().map(|o| o.request_id.as_str()).collect();
        assert_eq!(recorded, ids);
    }

    #[tokio::test]
    async fn concurrent_approvals_provision_once() {
        let wf = Arc::new(coordinator());
        wf.submit_with_id("r1", request("production database", "read"), SourceContext::default())
            .await
            .unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let wf = Arc::clone(&wf);
                tokio::spawn(async move {
                    wf.decide("r1", Decision::Approve, &format!("approver-{i}"), None)
                        .await
                })
            })
            .collect();

        let results = futures::future::join_all(handles).await;
        let approved = results.iter().filter(|r| matches!(r, Ok(Ok(_)))).count();
        assert_eq!(approved, 1);
        assert_eq!(wf.history().await.len(), 1);
    }

    #[tokio::test]
    async fn retry_refuses_rejected_request() {
        let wf = coordinator();
        wf.submit_with_id("r2", request("production database", "write"), SourceContext::default())
            .await
            .unwrap();
        wf.decide("r2", Decision::Reject, "bob", None)
            .await
            .unwrap();

        // A copy edited to look approved changes nothing: the ledger's record is used.
        let mut copy = wf.get("r2").await.unwrap().unwrap();
        copy.status = ApprovalStatus::Approved;

        let err = wf.retry_provisioning(&copy.id).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Provisioning(ProvisioningError::InvalidState { .. })
        ));
        assert!(wf.history().await.is_empty());

        assert!(matches!(
            wf.retry_provisioning("missing").await,
            Err(Error::Approval(ApprovalError::NotFound { .. }))
        ));
    }

    #[tokio::test]
    async fn retry_after_failed_grant() {
        let executor = Arc::new(FlakyExecutor {
            up: AtomicBool::new(false),
        });
        let wf = coordinator_with(executor.clone());
        wf.submit_with_id("r1", request("jira project", "read"), SourceContext::default())
            .await
            .unwrap();

        let outcome = wf
            .decide("r1", Decision::Approve, "alice", None)
            .await
            .unwrap();
        assert!(!outcome.provisioning().unwrap().success);

        executor.up.store(true, Ordering::SeqCst);
        let retried = wf.retry_provisioning("r1").await.unwrap();
        assert!(retried.success);
        assert_eq!(retried.request_id, "r1");

        assert!(matches!(
            wf.retry_provisioning("r1").await,
            Err(Error::Provisioning(ProvisioningError::AlreadyProvisioned { .. }))
        ));
        assert_eq!(wf.history().await.len(), 2);
    }
}
