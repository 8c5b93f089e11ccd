//! Persisted records with identity.
//!
//! These mirror the repository schema one-to-one. The compiled, in-memory
//! form lives in the application layer; entities here are plain data.

/// Audit trail events
pub mod audit;
/// Lists and their pattern entries
pub mod list;
/// Time-window quota rules and accumulated usage
pub mod quota;
/// Weekday/time-of-day access rules
pub mod time_rule;

pub use audit::{AuditEvent, AuditKind};
pub use list::{EntryType, List, ListEntry, ListType, PatternType};
pub use quota::{QuotaRule, QuotaType, QuotaUsage};
pub use time_rule::{TimeOfDay, TimeRule, TimeRuleType, WeekdaySet};

/// Identifier of a [`List`]
pub type ListId = i64;
/// Identifier of a [`ListEntry`]
pub type EntryId = i64;
/// Identifier of a [`TimeRule`]
pub type TimeRuleId = i64;
/// Identifier of a [`QuotaRule`]
pub type QuotaRuleId = i64;
