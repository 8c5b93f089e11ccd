//! Repository state to compiled rule set.
//!
//! `compile` runs off the hot path: it reads the full policy state,
//! resolves quota windows, builds the pattern matchers and returns a
//! fresh immutable [`RuleSet`] with the next generation number. Invalid
//! records are dropped with `compile_error` audit records; only a
//! repository fault fails the pass.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, TimeZone, Utc};
use tracing::{debug, warn};
use warden_domain::entities::{AuditEvent, AuditKind, EntryType, ListId};
use warden_domain::error::Result;
use warden_domain::ports::PolicyRepository;

use crate::matcher::{PatternMatcher, PatternSpec, RejectedPattern};
use crate::quota::QuotaTracker;
use crate::ruleset::{CompiledList, CompiledQuotaRule, CompiledTimeRule, RuleSet};
use crate::windows;

/// Builds rule sets from persisted state.
pub struct RuleCompiler {
    repo: Arc<dyn PolicyRepository>,
    quota: Arc<QuotaTracker>,
    generation: AtomicU64,
}

impl RuleCompiler {
    /// Create a compiler starting at generation zero; the first compile
    /// publishes generation one.
    #[must_use]
    pub fn new(repo: Arc<dyn PolicyRepository>, quota: Arc<QuotaTracker>) -> Self {
        Self {
            repo,
            quota,
            generation: AtomicU64::new(0),
        }
    }

    /// The most recently assigned generation.
    #[must_use]
    pub fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Compile a fresh rule set as of the local instant `now`.
    ///
    /// # Errors
    ///
    /// Fails only on repository faults; callers keep the previously
    /// published rule set in that case.
    pub async fn compile<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Result<RuleSet> {
        let now_utc = now.with_timezone(&Utc);

        let mut lists = self.repo.lists_enabled().await?;
        lists.sort_by_key(|l| l.id);

        let index_of: HashMap<ListId, usize> =
            lists.iter().enumerate().map(|(i, l)| (l.id, i)).collect();

        // Entries, partitioned by subject class.
        let mut exec_specs = Vec::new();
        let mut url_specs = Vec::new();
        for (li, list) in lists.iter().enumerate() {
            for entry in self.repo.entries_by_list(list.id).await? {
                if !entry.enabled {
                    continue;
                }
                let spec = PatternSpec {
                    entry_id: entry.id,
                    list: li,
                    pattern_type: entry.pattern_type,
                    pattern: entry.pattern,
                };
                match entry.entry_type {
                    EntryType::Executable => exec_specs.push(spec),
                    EntryType::Url => url_specs.push(spec),
                }
            }
        }

        let exec_build = PatternMatcher::compile(EntryType::Executable, exec_specs);
        let url_build = PatternMatcher::compile(EntryType::Url, url_specs);
        for rejected in exec_build.rejected.iter().chain(&url_build.rejected) {
            self.audit_rejected_pattern(now_utc, rejected, &lists).await;
        }

        let mut compiled_lists: Vec<CompiledList> = lists
            .iter()
            .map(|l| CompiledList {
                id: l.id,
                name: l.name.clone(),
                list_type: l.list_type,
                time_rules: Vec::new(),
                quota_rules: Vec::new(),
            })
            .collect();

        // Time rules: skip orphans, drop malformed with audit.
        let mut time_rules = self.repo.time_rules_enabled().await?;
        time_rules.sort_by_key(|r| r.id);
        let mut compiled_time = Vec::new();
        for rule in time_rules {
            let Some(&li) = index_of.get(&rule.list_id) else {
                continue;
            };
            if !rule.is_well_formed() {
                let detail = if rule.days.is_empty() {
                    "time rule has an empty day set".to_owned()
                } else {
                    format!(
                        "time rule interval {}-{} crosses midnight; split it into two rules",
                        rule.start, rule.end
                    )
                };
                self.audit_compile_error(now_utc, detail, Some(rule.list_id), Some(rule.id))
                    .await;
                continue;
            }
            compiled_lists[li].time_rules.push(compiled_time.len());
            compiled_time.push(CompiledTimeRule {
                id: rule.id,
                list: li,
                rule_type: rule.rule_type,
                days: rule.days,
                start: rule.start,
                end: rule.end,
            });
        }

        // Quota rules: resolve the current window and seed live counters.
        let mut quota_rules = self.repo.quota_rules_enabled().await?;
        quota_rules.sort_by_key(|r| r.id);
        let mut compiled_quota = Vec::new();
        let mut active_quota_ids = Vec::new();
        for rule in quota_rules {
            let Some(&li) = index_of.get(&rule.list_id) else {
                continue;
            };
            if rule.limit_seconds == 0 {
                self.audit_compile_error(
                    now_utc,
                    "quota rule has a zero limit".to_owned(),
                    Some(rule.list_id),
                    Some(rule.id),
                )
                .await;
                continue;
            }
            let window_start = windows::window_start(rule.quota_type, now);
            let persisted = self.repo.quota_usage(rule.id, window_start).await?;
            let used = self.quota.register_window(&rule, window_start, persisted);
            active_quota_ids.push(rule.id);
            compiled_lists[li].quota_rules.push(compiled_quota.len());
            compiled_quota.push(CompiledQuotaRule {
                id: rule.id,
                list: li,
                limit_seconds: rule.limit_seconds,
                window_start,
                used,
            });
        }
        self.quota.retain_rules(&active_quota_ids);

        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(
            generation,
            lists = compiled_lists.len(),
            exec_patterns = exec_build.matcher.len(),
            url_patterns = url_build.matcher.len(),
            time_rules = compiled_time.len(),
            quota_rules = compiled_quota.len(),
            "rule set compiled"
        );

        Ok(RuleSet {
            generation,
            compiled_at: now_utc,
            lists: compiled_lists,
            time_rules: compiled_time,
            quota_rules: compiled_quota,
            exec_matcher: exec_build.matcher,
            url_matcher: url_build.matcher,
        })
    }

    async fn audit_rejected_pattern(
        &self,
        now: DateTime<Utc>,
        rejected: &RejectedPattern,
        lists: &[warden_domain::entities::List],
    ) {
        let list_id = lists.get(rejected.spec.list).map(|l| l.id);
        self.audit_compile_error(
            now,
            format!(
                "entry pattern '{}' dropped: {}",
                rejected.spec.pattern, rejected.reason
            ),
            list_id,
            Some(rejected.spec.entry_id),
        )
        .await;
    }

    /// Compile errors are audited and otherwise non-fatal; audit faults
    /// themselves are logged and dropped.
    async fn audit_compile_error(
        &self,
        now: DateTime<Utc>,
        details: String,
        list_id: Option<ListId>,
        rule_id: Option<i64>,
    ) {
        warn!(?list_id, ?rule_id, "{details}");
        let event =
            AuditEvent::new(now, AuditKind::CompileError, details).with_rule_ref(list_id, rule_id);
        if let Err(e) = self.repo.audit_append(&event).await {
            warn!(error = %e, "failed to append compile_error audit event");
        }
    }
}
