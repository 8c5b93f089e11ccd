//! Allow/block decisions and their reasons.

use serde::{Deserialize, Serialize};

use crate::entities::ListId;

/// The outcome of evaluating a subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Allow,
    Block,
}

impl Action {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Block => "block",
        }
    }
}

impl std::str::FromStr for Action {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "allow" => Ok(Self::Allow),
            "block" => Ok(Self::Block),
            _ => Err(format!("Unknown action: {s}")),
        }
    }
}

/// Why a decision came out the way it did, in precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    /// An active `block_during` time rule matched
    BlockedDuring,
    /// A quota rule's usage reached its limit
    QuotaExceeded,
    /// An active `allow_during` time rule on a whitelist matched
    AllowedDuring,
    /// The subject matched a time-gated whitelist outside its hours
    OutsideAllowedHours,
    /// The subject is a member of an untimed blacklist
    BlacklistMember,
    /// The subject is a member of an untimed whitelist
    WhitelistMember,
    /// No list matched and the default policy allows
    NoMatch,
    /// No list matched and the unknown-subject policy blocks
    UnknownBlocked,
}

impl DecisionReason {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BlockedDuring => "blocked_during",
            Self::QuotaExceeded => "quota_exceeded",
            Self::AllowedDuring => "allowed_during",
            Self::OutsideAllowedHours => "outside_allowed_hours",
            Self::BlacklistMember => "blacklist_member",
            Self::WhitelistMember => "whitelist_member",
            Self::NoMatch => "no_match",
            Self::UnknownBlocked => "unknown_blocked",
        }
    }
}

/// A decision plus the list/rule citation that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    /// Allow or block
    pub action: Action,
    /// Machine-readable reason
    pub reason: DecisionReason,
    /// The list the decision cites, when one matched
    pub list_id: Option<ListId>,
    /// Name of the cited list
    pub list_name: Option<String>,
    /// The time or quota rule the decision cites
    pub rule_id: Option<i64>,
}

impl Decision {
    /// An allow decision without citation.
    #[must_use]
    pub fn allow(reason: DecisionReason) -> Self {
        Self {
            action: Action::Allow,
            reason,
            list_id: None,
            list_name: None,
            rule_id: None,
        }
    }

    /// A block decision without citation.
    #[must_use]
    pub fn block(reason: DecisionReason) -> Self {
        Self {
            action: Action::Block,
            reason,
            list_id: None,
            list_name: None,
            rule_id: None,
        }
    }

    /// Attach the cited list.
    #[must_use]
    pub fn citing_list<S: Into<String>>(mut self, list_id: ListId, list_name: S) -> Self {
        self.list_id = Some(list_id);
        self.list_name = Some(list_name.into());
        self
    }

    /// Attach the cited rule.
    #[must_use]
    pub fn citing_rule(mut self, rule_id: i64) -> Self {
        self.rule_id = Some(rule_id);
        self
    }

    /// Whether the decision blocks the subject.
    #[must_use]
    pub fn is_block(&self) -> bool {
        self.action == Action::Block
    }
}
