//! Best-effort event notification.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entities::{ListId, QuotaRuleId};
use crate::value_objects::Subject;

/// Events pushed to the notification collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum NotifierEvent {
    /// Quota usage crossed one of the 0.75 / 0.90 / 1.00 thresholds going
    /// up; emitted exactly once per threshold per window.
    QuotaThreshold {
        /// The quota rule
        rule_id: QuotaRuleId,
        /// Owning list
        list_id: ListId,
        /// The crossed threshold (0.75, 0.90 or 1.00)
        threshold: f64,
        /// Seconds used at crossing time
        used_seconds: u64,
        /// The rule's limit
        limit_seconds: u64,
        /// Active window start
        window_start: DateTime<Utc>,
    },
    /// A subject was blocked.
    SubjectBlocked {
        /// The blocked subject
        subject: Subject,
        /// The list the decision cited
        list_id: Option<ListId>,
    },
    /// Unrecoverable service-level fault (e.g. DNS listener could not be
    /// restarted within its window).
    ServiceFatal {
        /// Description of the fault
        message: String,
    },
}

/// Best-effort notification sink. No delivery guarantee; implementations
/// must return promptly and the core never blocks on them.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Emit an event.
    async fn emit(&self, event: NotifierEvent);
}
