//! The immutable compiled rule snapshot.
//!
//! A `RuleSet` is built wholesale by the compiler and published through a
//! single atomically swapped slot; it is never mutated in place. Lists,
//! time rules and quota rules live in flat vectors cross-referenced by
//! index, so a snapshot holds no long-lived pointers into its predecessor.
//! The one deliberate exception to immutability is each quota rule's
//! `used` counter, which is shared with the quota tracker so over-limit
//! state reaches decisions without a recompile.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};
use warden_domain::entities::{
    ListId, ListType, QuotaRuleId, TimeOfDay, TimeRuleId, TimeRuleType, WeekdaySet,
};
use warden_domain::value_objects::Subject;

use crate::matcher::PatternMatcher;

/// A list with its compiled cross-references.
#[derive(Debug)]
pub struct CompiledList {
    /// Persisted list id
    pub id: ListId,
    /// List name, carried for decision citations
    pub name: String,
    /// Whitelist or blacklist semantics
    pub list_type: ListType,
    /// Indices into the rule set's time-rule arena, ascending by rule id
    pub time_rules: Vec<usize>,
    /// Indices into the rule set's quota-rule arena, ascending by rule id
    pub quota_rules: Vec<usize>,
}

/// A time rule with its parent-list back-reference.
#[derive(Debug)]
pub struct CompiledTimeRule {
    /// Persisted rule id
    pub id: TimeRuleId,
    /// Index of the owning list
    pub list: usize,
    /// Allow or block while active
    pub rule_type: TimeRuleType,
    /// Weekdays the rule applies to
    pub days: WeekdaySet,
    /// Interval start (inclusive)
    pub start: TimeOfDay,
    /// Interval end (inclusive)
    pub end: TimeOfDay,
}

impl CompiledTimeRule {
    /// Whether the rule is active at the given local instant. Both
    /// interval endpoints are inside.
    pub fn is_active_at<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> bool {
        let day = now.weekday().num_days_from_sunday() as u8;
        if !self.days.contains(day) {
            return false;
        }
        let minutes = (now.hour() * 60 + now.minute()) as u16;
        self.start.minutes() <= minutes && minutes <= self.end.minutes()
    }
}

/// A quota rule with its live usage counter.
#[derive(Debug)]
pub struct CompiledQuotaRule {
    /// Persisted rule id
    pub id: QuotaRuleId,
    /// Index of the owning list
    pub list: usize,
    /// Limit in seconds
    pub limit_seconds: u64,
    /// Canonical start of the window current at compile time
    pub window_start: DateTime<Utc>,
    /// Live usage counter shared with the quota tracker
    pub used: Arc<AtomicU64>,
}

impl CompiledQuotaRule {
    /// Seconds used in the current window.
    #[must_use]
    pub fn used_seconds(&self) -> u64 {
        self.used.load(Ordering::Relaxed)
    }

    /// Whether usage has reached the limit.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.used_seconds() >= self.limit_seconds
    }
}

/// One compiled snapshot of the full rule state.
#[derive(Debug)]
pub struct RuleSet {
    /// Strictly increasing snapshot generation
    pub generation: u64,
    /// When the snapshot was compiled
    pub compiled_at: DateTime<Utc>,
    pub(crate) lists: Vec<CompiledList>,
    pub(crate) time_rules: Vec<CompiledTimeRule>,
    pub(crate) quota_rules: Vec<CompiledQuotaRule>,
    pub(crate) exec_matcher: PatternMatcher,
    pub(crate) url_matcher: PatternMatcher,
}

impl RuleSet {
    /// A snapshot with no rules; every lookup returns the empty set.
    #[must_use]
    pub fn empty(generation: u64, compiled_at: DateTime<Utc>) -> Self {
        Self {
            generation,
            compiled_at,
            lists: Vec::new(),
            time_rules: Vec::new(),
            quota_rules: Vec::new(),
            exec_matcher: PatternMatcher::default(),
            url_matcher: PatternMatcher::default(),
        }
    }

    /// Indices of the lists the subject matches, ascending by list id.
    #[must_use]
    pub fn matched_lists(&self, subject: &Subject) -> Vec<usize> {
        match subject {
            Subject::Executable { .. } => self.exec_matcher.match_subject(subject),
            Subject::Host { .. } => self.url_matcher.match_subject(subject),
        }
    }

    /// The list at an arena index.
    #[must_use]
    pub fn list(&self, idx: usize) -> &CompiledList {
        &self.lists[idx]
    }

    /// The time rule at an arena index.
    #[must_use]
    pub fn time_rule(&self, idx: usize) -> &CompiledTimeRule {
        &self.time_rules[idx]
    }

    /// The quota rule at an arena index.
    #[must_use]
    pub fn quota_rule(&self, idx: usize) -> &CompiledQuotaRule {
        &self.quota_rules[idx]
    }

    /// All compiled lists.
    #[must_use]
    pub fn lists(&self) -> &[CompiledList] {
        &self.lists
    }

    /// All compiled quota rules.
    #[must_use]
    pub fn quota_rules(&self) -> &[CompiledQuotaRule] {
        &self.quota_rules
    }

    /// Quota rules attached to any list the subject matches.
    #[must_use]
    pub fn quota_rules_matching(&self, subject: &Subject) -> Vec<&CompiledQuotaRule> {
        self.matched_lists(subject)
            .iter()
            .flat_map(|&li| self.lists[li].quota_rules.iter())
            .map(|&qi| &self.quota_rules[qi])
            .collect()
    }
}
