//! Audit trail events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ListId, list::EntryType};
use crate::value_objects::decision::Action;

/// Kind of audited event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    /// A process matched a blocking rule and termination was requested
    ProcessBlocked,
    /// Termination retries exhausted; pid demoted to audit-only
    TerminateGiveup,
    /// A DNS query was answered with a sinkhole response
    DnsBlocked,
    /// A persisted record was dropped during rule compilation
    CompileError,
    /// An allowed subject was observed (emitted only when the
    /// log-all-activity mode is on)
    Activity,
    /// Quota usage crossed a notification threshold
    QuotaThreshold,
    /// A fresh rule set was compiled and published
    RulesRefreshed,
    /// Service-level lifecycle or fault event
    ServiceEvent,
}

impl AuditKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProcessBlocked => "process_blocked",
            Self::TerminateGiveup => "terminate_giveup",
            Self::DnsBlocked => "dns_blocked",
            Self::CompileError => "compile_error",
            Self::Activity => "activity",
            Self::QuotaThreshold => "quota_threshold",
            Self::RulesRefreshed => "rules_refreshed",
            Self::ServiceEvent => "service_event",
        }
    }
}

impl std::str::FromStr for AuditKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "process_blocked" => Ok(Self::ProcessBlocked),
            "terminate_giveup" => Ok(Self::TerminateGiveup),
            "dns_blocked" => Ok(Self::DnsBlocked),
            "compile_error" => Ok(Self::CompileError),
            "activity" => Ok(Self::Activity),
            "quota_threshold" => Ok(Self::QuotaThreshold),
            "rules_refreshed" => Ok(Self::RulesRefreshed),
            "service_event" => Ok(Self::ServiceEvent),
            _ => Err(format!("Unknown audit kind: {s}")),
        }
    }
}

/// Append-only audit record. No back-references are maintained from lists;
/// `list_id`/`rule_id` are informational snapshots at emission time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Emission timestamp
    pub timestamp: DateTime<Utc>,
    /// Event kind
    pub kind: AuditKind,
    /// Subject class, when the event concerns a subject
    pub subject_type: Option<EntryType>,
    /// Subject value (basename, path or hostname)
    pub subject_value: Option<String>,
    /// Decision taken, when the event concerns a decision
    pub action: Option<Action>,
    /// List cited by the decision or compile error
    pub list_id: Option<ListId>,
    /// Rule cited by the decision or compile error
    pub rule_id: Option<i64>,
    /// Free-text details
    pub details: String,
}

impl AuditEvent {
    /// Create a bare event of the given kind.
    #[must_use]
    pub fn new<S: Into<String>>(timestamp: DateTime<Utc>, kind: AuditKind, details: S) -> Self {
        Self {
            timestamp,
            kind,
            subject_type: None,
            subject_value: None,
            action: None,
            list_id: None,
            rule_id: None,
            details: details.into(),
        }
    }

    /// Attach the subject the event concerns.
    #[must_use]
    pub fn with_subject<S: Into<String>>(mut self, subject_type: EntryType, value: S) -> Self {
        self.subject_type = Some(subject_type);
        self.subject_value = Some(value.into());
        self
    }

    /// Attach the decision taken.
    #[must_use]
    pub fn with_action(mut self, action: Action) -> Self {
        self.action = Some(action);
        self
    }

    /// Attach the cited list and rule.
    #[must_use]
    pub fn with_rule_ref(mut self, list_id: Option<ListId>, rule_id: Option<i64>) -> Self {
        self.list_id = list_id;
        self.rule_id = rule_id;
        self
    }
}
