//! Persisted policy and audit storage.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::entities::{
    AuditEvent, EntryId, List, ListEntry, ListId, QuotaRule, QuotaRuleId, TimeRule, TimeRuleId,
};
use crate::error::Result;

/// Storage contract the enforcement core consumes.
///
/// The repository provides a consistent read per call; the core does not
/// assume serializable transactions across calls. Concurrency discipline
/// (connection pooling, single-writer backends) is the implementation's
/// concern.
#[async_trait]
pub trait PolicyRepository: Send + Sync {
    // ── Lists ──────────────────────────────────────────────────────

    /// Create a list; returns the assigned id.
    async fn create_list(&self, list: &List) -> Result<ListId>;
    /// Fetch one list by id.
    async fn get_list(&self, id: ListId) -> Result<List>;
    /// All enabled lists.
    async fn lists_enabled(&self) -> Result<Vec<List>>;
    /// All lists regardless of enabled state.
    async fn lists_all(&self) -> Result<Vec<List>>;
    /// Update name, description, type and enabled flag.
    async fn update_list(&self, list: &List) -> Result<()>;
    /// Delete a list; cascades to entries, time rules and quota rules.
    async fn delete_list(&self, id: ListId) -> Result<()>;

    // ── Entries ────────────────────────────────────────────────────

    /// Create an entry; returns the assigned id.
    async fn create_entry(&self, entry: &ListEntry) -> Result<EntryId>;
    /// Entries of a list; empty on unknown list.
    async fn entries_by_list(&self, list_id: ListId) -> Result<Vec<ListEntry>>;
    /// Update pattern, type and enabled flag.
    async fn update_entry(&self, entry: &ListEntry) -> Result<()>;
    /// Delete an entry.
    async fn delete_entry(&self, id: EntryId) -> Result<()>;

    // ── Time rules ─────────────────────────────────────────────────

    /// Create a time rule; returns the assigned id.
    async fn create_time_rule(&self, rule: &TimeRule) -> Result<TimeRuleId>;
    /// All enabled time rules (parent list may still be disabled).
    async fn time_rules_enabled(&self) -> Result<Vec<TimeRule>>;
    /// Update a time rule.
    async fn update_time_rule(&self, rule: &TimeRule) -> Result<()>;
    /// Delete a time rule.
    async fn delete_time_rule(&self, id: TimeRuleId) -> Result<()>;

    // ── Quota rules & usage ────────────────────────────────────────

    /// Create a quota rule; returns the assigned id.
    async fn create_quota_rule(&self, rule: &QuotaRule) -> Result<QuotaRuleId>;
    /// All enabled quota rules (parent list may still be disabled).
    async fn quota_rules_enabled(&self) -> Result<Vec<QuotaRule>>;
    /// Update a quota rule.
    async fn update_quota_rule(&self, rule: &QuotaRule) -> Result<()>;
    /// Delete a quota rule.
    async fn delete_quota_rule(&self, id: QuotaRuleId) -> Result<()>;

    /// Used seconds for a rule's window; 0 when no row exists.
    async fn quota_usage(
        &self,
        rule_id: QuotaRuleId,
        window_start: DateTime<Utc>,
    ) -> Result<u64>;
    /// Insert or replace the usage row for (rule, window).
    ///
    /// Callers retry on transient faults; the in-memory counter stays
    /// authoritative either way.
    async fn quota_usage_upsert(
        &self,
        rule_id: QuotaRuleId,
        window_start: DateTime<Utc>,
        used_seconds: u64,
    ) -> Result<()>;

    // ── Audit ──────────────────────────────────────────────────────

    /// Append an audit event. Failures are non-fatal for callers: log and
    /// drop.
    async fn audit_append(&self, event: &AuditEvent) -> Result<()>;
    /// Events at or after `since`, newest first, capped at `limit`.
    async fn audit_events_since(&self, since: DateTime<Utc>, limit: u32)
        -> Result<Vec<AuditEvent>>;
}
