//! Point-in-time statistics snapshot exposed to administrative collaborators.
//!
//! The field set is stable; external consumers rely on the serialized names.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entities::QuotaRuleId;

/// Decisions taken, by action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionCounts {
    /// Subjects allowed
    pub allow: u64,
    /// Subjects blocked
    pub block: u64,
}

/// Termination outcomes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminationStats {
    /// Terminations that succeeded (or found the process already gone)
    pub ok: u64,
    /// Terminations denied by the host
    pub denied: u64,
    /// Terminations that faulted
    pub fault: u64,
}

/// DNS filter counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsStats {
    /// Queries received and parsed
    pub queries: u64,
    /// Queries answered from the decision cache
    pub cache_hits: u64,
    /// Queries that required a fresh decision
    pub cache_misses: u64,
    /// Queries answered with a sinkhole response
    pub blocks: u64,
    /// Upstream forwards that exhausted every server
    pub upstream_failures: u64,
}

/// One quota rule's active window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaWindowStat {
    /// The quota rule
    pub rule_id: QuotaRuleId,
    /// Seconds used in the current window
    pub used: u64,
    /// The rule's limit in seconds
    pub limit: u64,
    /// Canonical window start
    pub window_start: DateTime<Utc>,
}

/// Full statistics snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Generation of the currently published rule set
    pub generation: u64,
    /// When rules were last successfully refreshed
    pub last_refresh: Option<DateTime<Utc>>,
    /// Completed process enforcement passes
    pub process_ticks: u64,
    /// Skipped process enforcement passes
    pub process_overruns: u64,
    /// Decisions by action, across both enforcers
    pub decisions: DecisionCounts,
    /// Termination outcomes
    pub terminations: TerminationStats,
    /// DNS filter counters
    pub dns: DnsStats,
    /// Active quota windows
    pub quotas: Vec<QuotaWindowStat>,
}
