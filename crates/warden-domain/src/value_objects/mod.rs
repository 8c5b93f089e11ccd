//! Immutable values exchanged between components.

/// Allow/block decisions and their reasons
pub mod decision;
/// Point-in-time statistics snapshot
pub mod stats;
/// The thing being evaluated: a process or a DNS query target
pub mod subject;

pub use decision::{Action, Decision, DecisionReason};
pub use stats::{DecisionCounts, DnsStats, QuotaWindowStat, StatsSnapshot, TerminationStats};
pub use subject::Subject;
