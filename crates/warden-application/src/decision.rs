//! The pure decision function.
//!
//! Evaluation is a fixed precedence ladder; the order is the contract:
//!
//! 1. Active `block_during` time rules on any matched list.
//! 2. Exhausted quotas on any matched list.
//! 3. `allow_during` gating on matched whitelists: any active rule allows,
//!    a gated whitelist with no active rule blocks.
//! 4. Untimed list membership: blacklist blocks, whitelist allows.
//! 5. No match (or no clause applies): the caller's unknown-subject policy.
//!
//! Ties are broken by lowest list id, then lowest rule id. The function
//! never suspends, never locks and is deterministic for a fixed rule-set
//! generation.

use chrono::{DateTime, TimeZone};
use warden_domain::entities::{ListType, TimeRuleType};
use warden_domain::value_objects::{Decision, DecisionReason, Subject};

use crate::ruleset::RuleSet;

/// Stateless evaluator over a compiled rule set.
#[derive(Debug, Clone, Copy)]
pub struct DecisionEngine;

impl DecisionEngine {
    /// Evaluate a subject against a rule set at a local instant.
    ///
    /// `block_unknown` is the policy for subjects matching no list; it is
    /// configured independently for process and DNS subjects.
    pub fn decide<Tz: TimeZone>(
        subject: &Subject,
        rules: &RuleSet,
        now: &DateTime<Tz>,
        block_unknown: bool,
    ) -> Decision {
        let matched = rules.matched_lists(subject);

        if !matched.is_empty() {
            if let Some(d) = Self::active_block_rule(rules, &matched, now) {
                return d;
            }
            if let Some(d) = Self::exhausted_quota(rules, &matched) {
                return d;
            }
            if let Some(d) = Self::whitelist_gate(rules, &matched, now) {
                return d;
            }
            if let Some(d) = Self::untimed_membership(rules, &matched) {
                return d;
            }
        }

        if block_unknown {
            Decision::block(DecisionReason::UnknownBlocked)
        } else {
            Decision::allow(DecisionReason::NoMatch)
        }
    }

    /// Block-during time rules win first.
    fn active_block_rule<Tz: TimeZone>(
        rules: &RuleSet,
        matched: &[usize],
        now: &DateTime<Tz>,
    ) -> Option<Decision> {
        for &li in matched {
            let list = rules.list(li);
            for &ri in &list.time_rules {
                let tr = rules.time_rule(ri);
                if tr.rule_type == TimeRuleType::BlockDuring && tr.is_active_at(now) {
                    return Some(
                        Decision::block(DecisionReason::BlockedDuring)
                            .citing_list(list.id, list.name.as_str())
                            .citing_rule(tr.id),
                    );
                }
            }
        }
        None
    }

    /// Quota over-limit blocks with higher specificity than
    /// default membership.
    fn exhausted_quota(rules: &RuleSet, matched: &[usize]) -> Option<Decision> {
        for &li in matched {
            let list = rules.list(li);
            for &qi in &list.quota_rules {
                let qr = rules.quota_rule(qi);
                if qr.is_exhausted() {
                    return Some(
                        Decision::block(DecisionReason::QuotaExceeded)
                            .citing_list(list.id, list.name.as_str())
                            .citing_rule(qr.id),
                    );
                }
            }
        }
        None
    }

    /// A whitelist carrying `allow_during` rules encodes "only
    /// during these hours". An active rule on any matched whitelist
    /// allows; otherwise the presence of a gated whitelist blocks.
    fn whitelist_gate<Tz: TimeZone>(
        rules: &RuleSet,
        matched: &[usize],
        now: &DateTime<Tz>,
    ) -> Option<Decision> {
        let mut gated: Option<usize> = None;
        for &li in matched {
            let list = rules.list(li);
            if list.list_type != ListType::Whitelist {
                continue;
            }
            let mut has_allow_rule = false;
            for &ri in &list.time_rules {
                let tr = rules.time_rule(ri);
                if tr.rule_type != TimeRuleType::AllowDuring {
                    continue;
                }
                has_allow_rule = true;
                if tr.is_active_at(now) {
                    return Some(
                        Decision::allow(DecisionReason::AllowedDuring)
                            .citing_list(list.id, list.name.as_str())
                            .citing_rule(tr.id),
                    );
                }
            }
            if has_allow_rule && gated.is_none() {
                gated = Some(li);
            }
        }
        gated.map(|li| {
            let list = rules.list(li);
            Decision::block(DecisionReason::OutsideAllowedHours).citing_list(list.id, list.name.as_str())
        })
    }

    /// Membership in a list with no time rules decides by list
    /// type; blacklists dominate.
    fn untimed_membership(rules: &RuleSet, matched: &[usize]) -> Option<Decision> {
        for &li in matched {
            let list = rules.list(li);
            if list.list_type == ListType::Blacklist && list.time_rules.is_empty() {
                return Some(
                    Decision::block(DecisionReason::BlacklistMember)
                        .citing_list(list.id, list.name.as_str()),
                );
            }
        }
        for &li in matched {
            let list = rules.list(li);
            if list.list_type == ListType::Whitelist && list.time_rules.is_empty() {
                return Some(
                    Decision::allow(DecisionReason::WhitelistMember)
                        .citing_list(list.id, list.name.as_str()),
                );
            }
        }
        None
    }
}
