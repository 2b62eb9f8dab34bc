//! Sample detector output for running without a live mailbox.

use crate::approval::model::{AccessRequest, SourceContext, Urgency};
use crate::workflow::Detection;

/// Three inbound messages: two access requests and one meeting reminder.
pub fn sample_detections() -> Vec<Detection> {
    vec![
        Detection {
            source_context: SourceContext::email(
                "demo-001",
                "john.doe@company.com",
                "Access Request: Production Database",
            )
            .with_received_at("Mon, 6 Jan 2026 10:30:00 -0800"),
            request: Some(
                AccessRequest::new(
                    "John Doe",
                    "production database",
                    "read",
                    "Analytics queries for the customer support dashboard, needed for the quarterly review",
                )
                .with_user_id("john.doe@company.com")
                .with_urgency(Urgency::Medium),
            ),
        },
        Detection {
            source_context: SourceContext::email(
                "demo-002",
                "jane.smith@company.com",
                "Urgent: AWS S3 Access Needed",
            )
            .with_received_at("Mon, 6 Jan 2026 11:45:00 -0800"),
            request: Some(
                AccessRequest::new(
                    "Jane Smith",
                    "s3://company-data-backup bucket",
                    "write",
                    "Restore accidentally deleted campaign files blocking the marketing team",
                )
                .with_user_id("jane.smith@company.com")
                .with_urgency(Urgency::High),
            ),
        },
        Detection {
            source_context: SourceContext::email(
                "demo-003",
                "bob.wilson@company.com",
                "Meeting reminder for tomorrow",
            )
            .with_received_at("Mon, 6 Jan 2026 14:20:00 -0800"),
            request: None,
        },
    ]
}
