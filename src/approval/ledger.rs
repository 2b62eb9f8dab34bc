//! The authoritative state machine for approval records.
//!
//! Every read and mutation of the store runs under one mutex, so two
//! concurrent decisions on the same id cannot both succeed: the loser finds
//! the record gone from the pending partition. Notification runs after the
//! lock is released.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{error, info, warn};

use super::model::{AccessRequest, ApprovalRecord, ApprovalStatus, ApprovedRecord, SourceContext};
use super::notify::{NoopNotifier, Notifier};
use super::store::{ApprovalStore, InMemoryStore};
use crate::error::{ApprovalError, StoreError};

/// Owns every approval record for its full lifetime.
pub struct ApprovalLedger {
    store: Arc<dyn ApprovalStore>,
    notifier: Arc<dyn Notifier>,
    lock: Mutex<()>,
}

impl ApprovalLedger {
    pub fn new(store: Arc<dyn ApprovalStore>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            store,
            notifier,
            lock: Mutex::new(()),
        }
    }

    /// In-memory ledger that does not notify anyone.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryStore::new()), Arc::new(NoopNotifier))
    }

    /// Create a PENDING record and notify a human.
    ///
    /// Fails with [`ApprovalError::DuplicateId`] if `id` was ever used.
    pub async fn submit(
        &self,
        id: impl Into<String>,
        request: AccessRequest,
        source_context: SourceContext,
    ) -> Result<ApprovalRecord, ApprovalError> {
        let record = ApprovalRecord::new(id, request, source_context);

        {
            let _guard = self.lock.lock().await;
            if self.store.contains(&record.id).await? {
                warn!(request_id = %record.id, "Rejected duplicate approval request id");
                return Err(ApprovalError::DuplicateId { id: record.id });
            }
            self.store
                .insert_pending(record.clone())
                .await
                .map_err(|e| match e {
                    StoreError::Duplicate { id } => ApprovalError::DuplicateId { id },
                    other => ApprovalError::Store(other),
                })?;
        }

        info!(
            request_id = %record.id,
            requester = %record.request.requester,
            resource = %record.request.resource,
            access_type = %record.request.access_type,
            "Approval request created"
        );

        if let Err(e) = self.notifier.notify(&record).await {
            warn!(
                request_id = %record.id,
                notifier = self.notifier.name(),
                error = %e,
                "Notification failed"
            );
        }

        Ok(record)
    }

    /// Approve a pending request.
    pub async fn approve(
        &self,
        id: &str,
        approver: &str,
        comments: Option<String>,
    ) -> Result<ApprovedRecord, ApprovalError> {
        let record = self
            .resolve(id, ApprovalStatus::Approved, approver, comments)
            .await?;
        Ok(ApprovedRecord::new_unchecked(record))
    }

    /// Reject a pending request.
    pub async fn reject(
        &self,
        id: &str,
        approver: &str,
        comments: Option<String>,
    ) -> Result<ApprovalRecord, ApprovalError> {
        self.resolve(id, ApprovalStatus::Rejected, approver, comments)
            .await
    }

    /// Cancel a pending request that became moot before anyone decided.
    pub async fn cancel(
        &self,
        id: &str,
        actor: &str,
        reason: Option<String>,
    ) -> Result<ApprovalRecord, ApprovalError> {
        self.resolve(id, ApprovalStatus::Cancelled, actor, reason)
            .await
    }

    async fn resolve(
        &self,
        id: &str,
        status: ApprovalStatus,
        actor: &str,
        comments: Option<String>,
    ) -> Result<ApprovalRecord, ApprovalError> {
        if actor.trim().is_empty() {
            return Err(ApprovalError::MissingApprover { id: id.to_string() });
        }

        let _guard = self.lock.lock().await;

        let Some((position, original)) = self.store.take_pending(id).await? else {
            error!(request_id = %id, requested = %status, "Request not found in pending requests");
            return Err(ApprovalError::NotFound { id: id.to_string() });
        };

        let mut record = original.clone();
        record.resolve(status, actor, comments);

        if let Err(e) = self.store.insert_completed(record.clone()).await {
            // Put the untouched record back so it can still be decided.
            if let Err(restore) = self.store.restore_pending(position, original).await {
                error!(request_id = %id, error = %restore, "Failed to restore pending request");
            }
            return Err(e.into());
        }

        info!(request_id = %id, status = %status, actor = %actor, "Request resolved");
        Ok(record)
    }

    /// Look up a record in either partition.
    pub async fn get(&self, id: &str) -> Result<Option<ApprovalRecord>, ApprovalError> {
        let _guard = self.lock.lock().await;
        Ok(self.store.get(id).await?)
    }

    /// Pending records in submission order.
    pub async fn list_pending(&self) -> Result<Vec<ApprovalRecord>, ApprovalError> {
        let _guard = self.lock.lock().await;
        Ok(self.store.list_pending().await?)
    }

    /// Resolved records in resolution order.
    pub async fn list_completed(&self) -> Result<Vec<ApprovalRecord>, ApprovalError> {
        let _guard = self.lock.lock().await;
        Ok(self.store.list_completed().await?)
    }

    pub async fn pending_count(&self) -> Result<usize, ApprovalError> {
        Ok(self.list_pending().await?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NotifyError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn request(resource: &str) -> AccessRequest {
        AccessRequest::new("john.doe@company.com", resource, "read", "quarterly review")
    }

    /// In-memory store whose completed partition refuses every write.
    struct BrokenCompletedStore {
        inner: InMemoryStore,
    }

    #[async_trait]
    impl ApprovalStore for BrokenCompletedStore {
        async fn contains(&self, id: &str) -> Result<bool, StoreError> {
            self.inner.contains(id).await
        }

        async fn insert_pending(&self, record: ApprovalRecord) -> Result<(), StoreError> {
            self.inner.insert_pending(record).await
        }

        async fn take_pending(
            &self,
            id: &str,
        ) -> Result<Option<(usize, ApprovalRecord)>, StoreError> {
            self.inner.take_pending(id).await
        }

        async fn restore_pending(
            &self,
            position: usize,
            record: ApprovalRecord,
        ) -> Result<(), StoreError> {
            self.inner.restore_pending(position, record).await
        }

        async fn insert_completed(&self, _record: ApprovalRecord) -> Result<(), StoreError> {
            Err(StoreError::Backend("disk full".into()))
        }

        async fn get(&self, id: &str) -> Result<Option<ApprovalRecord>, StoreError> {
            self.inner.get(id).await
        }

        async fn list_pending(&self) -> Result<Vec<ApprovalRecord>, StoreError> {
            self.inner.list_pending().await
        }

        async fn list_completed(&self) -> Result<Vec<ApprovalRecord>, StoreError> {
            self.inner.list_completed().await
        }
    }

    struct FailingNotifier {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Notifier for FailingNotifier {
        fn name(&self) -> &str {
            "failing"
        }

        async fn notify(&self, _record: &ApprovalRecord) -> Result<(), NotifyError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(NotifyError::DeliveryFailed {
                notifier: "failing".into(),
                reason: "smtp down".into(),
            })
        }
    }

    #[tokio::test]
    async fn submit_then_get_is_pending() {
        let ledger = ApprovalLedger::in_memory();
        ledger
            .submit("r1", request("production database"), SourceContext::default())
            .await
            .unwrap();

        let record = ledger.get("r1").await.unwrap().unwrap();
        assert_eq!(record.status, ApprovalStatus::Pending);
        assert!(record.resolved_at.is_none());
        assert!(record.approver.is_none());
    }

    #[tokio::test]
    async fn request_is_stored_as_received() {
        let ledger = ApprovalLedger::in_memory();
        let mut req = request("jira project");
        req.user_id = String::new();

        ledger
            .submit("r1", req.clone(), SourceContext::default())
            .await
            .unwrap();
        let stored = ledger.get("r1").await.unwrap().unwrap();
        assert_eq!(stored.request, req);
        assert!(stored.request.user_id.is_empty());
    }

    #[tokio::test]
    async fn duplicate_submit_leaves_original_untouched() {
        let ledger = ApprovalLedger::in_memory();
        let original = ledger
            .submit("r1", request("production database"), SourceContext::default())
            .await
            .unwrap();

        let err = ledger
            .submit("r1", request("github repo"), SourceContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ApprovalError::DuplicateId { ref id } if id == "r1"));

        let stored = ledger.get("r1").await.unwrap().unwrap();
        assert_eq!(stored, original);
        assert_eq!(ledger.pending_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn duplicate_of_resolved_id_is_rejected() {
        let ledger = ApprovalLedger::in_memory();
        ledger
            .submit("r1", request("slack"), SourceContext::default())
            .await
            .unwrap();
        ledger.reject("r1", "bob", None).await.unwrap();

        assert!(matches!(
            ledger
                .submit("r1", request("slack"), SourceContext::default())
                .await,
            Err(ApprovalError::DuplicateId { .. })
        ));
    }

    #[tokio::test]
    async fn approve_moves_to_completed() {
        let ledger = ApprovalLedger::in_memory();
        ledger
            .submit("r1", request("production database"), SourceContext::default())
            .await
            .unwrap();

        let approved = ledger
            .approve("r1", "alice", Some("ok for Q3".into()))
            .await
            .unwrap();
        assert_eq!(approved.status, ApprovalStatus::Approved);
        assert_eq!(approved.approver.as_deref(), Some("alice"));
        assert_eq!(approved.comments.as_deref(), Some("ok for Q3"));
        assert!(approved.resolved_at.is_some());

        assert!(ledger.list_pending().await.unwrap().is_empty());
        let completed = ledger.list_completed().await.unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].id, "r1");
    }

    #[tokio::test]
    async fn second_decision_is_not_found() {
        let ledger = ApprovalLedger::in_memory();
        ledger
            .submit("r1", request("jira"), SourceContext::default())
            .await
            .unwrap();
        ledger.approve("r1", "alice", None).await.unwrap();

        assert!(matches!(
            ledger.approve("r1", "alice", None).await,
            Err(ApprovalError::NotFound { .. })
        ));
        assert!(matches!(
            ledger.reject("r1", "bob", None).await,
            Err(ApprovalError::NotFound { .. })
        ));
        assert!(matches!(
            ledger.cancel("r1", "system", None).await,
            Err(ApprovalError::NotFound { .. })
        ));

        // The first decision stands.
        let record = ledger.get("r1").await.unwrap().unwrap();
        assert_eq!(record.status, ApprovalStatus::Approved);
        assert_eq!(record.approver.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let ledger = ApprovalLedger::in_memory();
        assert!(matches!(
            ledger.reject("missing", "bob", None).await,
            Err(ApprovalError::NotFound { .. })
        ));
        assert!(ledger.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn cancel_is_terminal() {
        let ledger = ApprovalLedger::in_memory();
        ledger
            .submit("r1", request("github repo"), SourceContext::default())
            .await
            .unwrap();
        let cancelled = ledger
            .cancel("r1", "detector", Some("duplicate of r0".into()))
            .await
            .unwrap();
        assert_eq!(cancelled.status, ApprovalStatus::Cancelled);
        assert!(matches!(
            ledger.approve("r1", "alice", None).await,
            Err(ApprovalError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn list_pending_is_stable_insertion_order() {
        let ledger = ApprovalLedger::in_memory();
        for id in ["r3", "r1", "r2", "r4"] {
            ledger
                .submit(id, request("db"), SourceContext::default())
                .await
                .unwrap();
        }
        ledger.reject("r2", "bob", None).await.unwrap();

        let ids: Vec<String> = ledger
            .list_pending()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["r3", "r1", "r4"]);
    }

    #[tokio::test]
    async fn notification_failure_does_not_fail_submit() {
        let notifier = Arc::new(FailingNotifier {
            calls: AtomicUsize::new(0),
        });
        let ledger = ApprovalLedger::new(Arc::new(InMemoryStore::new()), notifier.clone());

        let record = ledger
            .submit("r1", request("db"), SourceContext::default())
            .await
            .unwrap();
        assert_eq!(record.status, ApprovalStatus::Pending);
        assert_eq!(notifier.calls.load(Ordering::SeqCst), 1);
        assert!(ledger.get("r1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn failed_completion_keeps_pending_order() {
        let store = Arc::new(BrokenCompletedStore {
            inner: InMemoryStore::new(),
        });
        let ledger = ApprovalLedger::new(store, Arc::new(NoopNotifier));
        for id in ["a", "b", "c"] {
            ledger
                .submit(id, request("production database"), SourceContext::default())
                .await
                .unwrap();
        }

        let err = ledger.approve("a", "alice", None).await.unwrap_err();
        assert!(matches!(err, ApprovalError::Store(StoreError::Backend(_))));

        let pending = ledger.list_pending().await.unwrap();
        let ids: Vec<&str> = pending.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(pending[0].status, ApprovalStatus::Pending);
        assert!(pending[0].approver.is_none());

        // Still decidable once restored.
        assert!(matches!(
            ledger.reject("b", "alice", None).await,
            Err(ApprovalError::Store(_))
        ));
        let ids: Vec<String> = ledger
            .list_pending()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn blank_approver_is_refused() {
        let ledger = ApprovalLedger::in_memory();
        ledger
            .submit("r1", request("production database"), SourceContext::default())
            .await
            .unwrap();

        for actor in ["", "   "] {
            let err = ledger.approve("r1", actor, None).await.unwrap_err();
            assert!(matches!(err, ApprovalError::MissingApprover { .. }));
        }
        assert!(matches!(
            ledger.cancel("r1", "", None).await,
            Err(ApprovalError::MissingApprover { .. })
        ));

        let record = ledger.get("r1").await.unwrap().unwrap();
        assert_eq!(record.status, ApprovalStatus::Pending);
    }

    #[tokio::test]
    async fn concurrent_approvals_have_one_winner() {
        let ledger = Arc::new(ApprovalLedger::in_memory());
        ledger
            .submit("r1", request("production database"), SourceContext::default())
            .await
            .unwrap();

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let ledger = Arc::clone(&ledger);
                tokio::spawn(async move {
                    if i % 2 == 0 {
                        ledger
                            .approve("r1", &format!("approver-{i}"), None)
                            .await
                            .map(|r| r.into_inner())
                    } else {
                        ledger.reject("r1", &format!("approver-{i}"), None).await
                    }
                })
            })
            .collect();

        let results = futures::future::join_all(handles).await;
        let winners = results
            .iter()
            .filter(|r| matches!(r, Ok(Ok(_))))
            .count();
        let not_found = results
            .iter()
            .filter(|r| matches!(r, Ok(Err(ApprovalError::NotFound { .. }))))
            .count();
        assert_eq!(winners, 1);
        assert_eq!(not_found, 15);
    }
}
