//! Approval data model: access requests, approval records and their states.

use std::ops::Deref;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProvisioningError;

/// Kind of access being requested.
///
/// Unknown values from the detector are preserved verbatim in `Other`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AccessType {
    Read,
    Write,
    Admin,
    Other(String),
}

impl AccessType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Admin => "admin",
            Self::Other(s) => s,
        }
    }
}

impl From<String> for AccessType {
    fn from(s: String) -> Self {
        match s.trim().to_lowercase().as_str() {
            "read" => Self::Read,
            "write" => Self::Write,
            "admin" => Self::Admin,
            _ => Self::Other(s),
        }
    }
}

impl From<&str> for AccessType {
    fn from(s: &str) -> Self {
        Self::from(s.to_string())
    }
}

impl From<AccessType> for String {
    fn from(access: AccessType) -> Self {
        access.as_str().to_string()
    }
}

impl std::fmt::Display for AccessType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How urgently the requester needs access.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Low,
    #[default]
    Medium,
    High,
}

impl std::fmt::Display for Urgency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

impl std::str::FromStr for Urgency {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            _ => Err(format!("Unknown urgency: {}", s)),
        }
    }
}

/// A structured access request produced by the upstream detector.
///
/// Immutable once built: the `with_*` methods consume and return the value
/// and are only meant for construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessRequest {
    /// Display identity of the person asking (name or email).
    pub requester: String,
    /// Free-form resource description, expected to contain a resource-class hint.
    pub resource: String,
    pub access_type: AccessType,
    pub justification: String,
    #[serde(default)]
    pub urgency: Urgency,
    /// Fine-grained permissions, in the order they were asked for.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub specific_permissions: Vec<String>,
    /// Identity used by the provisioning system. A blank value means the
    /// requester's own identity.
    #[serde(default)]
    pub user_id: String,
}

impl AccessRequest {
    /// Create a request with medium urgency and no specific permissions.
    pub fn new(
        requester: impl Into<String>,
        resource: impl Into<String>,
        access_type: impl Into<AccessType>,
        justification: impl Into<String>,
    ) -> Self {
        let requester = requester.into();
        Self {
            user_id: requester.clone(),
            requester,
            resource: resource.into(),
            access_type: access_type.into(),
            justification: justification.into(),
            urgency: Urgency::default(),
            specific_permissions: Vec::new(),
        }
    }

    pub fn with_urgency(mut self, urgency: Urgency) -> Self {
        self.urgency = urgency;
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }

    pub fn with_permissions<I, S>(mut self, permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.specific_permissions = permissions.into_iter().map(Into::into).collect();
        self
    }
}

/// Provenance of a request, e.g. the message it was extracted from.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Original date header or timestamp string, kept as received.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub received_at: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub extra: serde_json::Value,
}

impl SourceContext {
    /// Context for a request that arrived by email.
    pub fn email(
        message_id: impl Into<String>,
        sender: impl Into<String>,
        subject: impl Into<String>,
    ) -> Self {
        Self {
            channel: Some("email".to_string()),
            message_id: Some(message_id.into()),
            sender: Some(sender.into()),
            subject: Some(subject.into()),
            ..Default::default()
        }
    }

    pub fn with_received_at(mut self, received_at: impl Into<String>) -> Self {
        self.received_at = Some(received_at.into());
        self
    }
}

/// Lifecycle state of an approval record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    /// Waiting for a human decision.
    Pending,
    Approved,
    Rejected,
    /// Made moot before resolution (e.g. a duplicate upstream).
    Cancelled,
}

impl ApprovalStatus {
    /// Only PENDING has outgoing transitions.
    pub fn can_transition_to(&self, target: ApprovalStatus) -> bool {
        use ApprovalStatus::*;

        matches!(
            (self, target),
            (Pending, Approved) | (Pending, Rejected) | (Pending, Cancelled)
        )
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// One access request under adjudication.
///
/// `resolved_at` and `approver` are set iff `status` is not `Pending`.
/// Only the ledger moves a record out of PENDING, so the lifecycle fields
/// are read-only outside the crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub id: String,
    pub request: AccessRequest,
    #[serde(default)]
    pub source_context: SourceContext,
    pub(crate) status: ApprovalStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) resolved_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) approver: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(crate) comments: Option<String>,
}

impl ApprovalRecord {
    /// Create a new pending record.
    pub fn new(
        id: impl Into<String>,
        request: AccessRequest,
        source_context: SourceContext,
    ) -> Self {
        Self {
            id: id.into(),
            request,
            source_context,
            status: ApprovalStatus::Pending,
            created_at: Utc::now(),
            resolved_at: None,
            approver: None,
            comments: None,
        }
    }

    pub fn status(&self) -> ApprovalStatus {
        self.status
    }

    pub fn resolved_at(&self) -> Option<DateTime<Utc>> {
        self.resolved_at
    }

    /// Who decided (or cancelled) the request.
    pub fn approver(&self) -> Option<&str> {
        self.approver.as_deref()
    }

    pub fn comments(&self) -> Option<&str> {
        self.comments.as_deref()
    }

    pub fn is_pending(&self) -> bool {
        self.status == ApprovalStatus::Pending
    }

    /// Move out of PENDING. Callers must hold the record exclusively.
    pub(crate) fn resolve(
        &mut self,
        status: ApprovalStatus,
        approver: impl Into<String>,
        comments: Option<String>,
    ) {
        debug_assert!(self.status.can_transition_to(status));
        self.status = status;
        self.resolved_at = Some(Utc::now());
        self.approver = Some(approver.into());
        self.comments = comments;
    }

    /// Flattened view for listings.
    pub fn summary(&self) -> RequestSummary {
        RequestSummary {
            request_id: self.id.clone(),
            requester: self.request.requester.clone(),
            resource: self.request.resource.clone(),
            access_type: self.request.access_type.clone(),
            justification: self.request.justification.clone(),
            urgency: self.request.urgency,
            status: self.status,
            created_at: self.created_at,
            message_subject: self.source_context.subject.clone().unwrap_or_default(),
            message_from: self.source_context.sender.clone().unwrap_or_default(),
        }
    }
}

/// A record that is known to be APPROVED.
///
/// The ledger hands one out from a successful approval; the provisioning
/// engine accepts nothing else. There is no public conversion from a plain
/// [`ApprovalRecord`], and its status cannot be edited from outside:
///
/// ```compile_fail
/// use access_agent::approval::{AccessRequest, ApprovalRecord, ApprovalStatus, SourceContext};
///
/// let request = AccessRequest::new("jdoe", "production database", "read", "audit");
/// let mut record = ApprovalRecord::new("r1", request, SourceContext::default());
/// record.status = ApprovalStatus::Approved;
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ApprovedRecord(ApprovalRecord);

impl ApprovedRecord {
    pub(crate) fn new_unchecked(record: ApprovalRecord) -> Self {
        Self(record)
    }

    pub fn into_inner(self) -> ApprovalRecord {
        self.0
    }
}

impl Deref for ApprovedRecord {
    type Target = ApprovalRecord;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl ApprovedRecord {
    /// Check a record read back from the ledger.
    pub(crate) fn from_ledger(record: ApprovalRecord) -> Result<Self, ProvisioningError> {
        if record.status != ApprovalStatus::Approved || record.approver.is_none() {
            return Err(ProvisioningError::InvalidState {
                id: record.id,
                status: record.status.to_string(),
            });
        }
        Ok(Self(record))
    }
}

/// Display summary of a record, as shown in pending listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestSummary {
    pub request_id: String,
    pub requester: String,
    pub resource: String,
    pub access_type: AccessType,
    pub justification: String,
    pub urgency: Urgency,
    pub status: ApprovalStatus,
    pub created_at: DateTime<Utc>,
    pub message_subject: String,
    pub message_from: String,
}
