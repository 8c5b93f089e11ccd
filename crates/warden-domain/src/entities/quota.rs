//! Time-window quota rules and accumulated usage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ListId, QuotaRuleId};

/// Accumulation window of a quota rule.
///
/// Daily windows roll at local midnight, weekly at Monday 00:00 local,
/// monthly at the calendar month start local.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaType {
    Daily,
    Weekly,
    Monthly,
}

impl QuotaType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }
}

impl std::str::FromStr for QuotaType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            _ => Err(format!("Unknown quota type: {s}")),
        }
    }
}

/// Usage limit owned by one list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaRule {
    /// Unique identifier
    pub id: QuotaRuleId,
    /// Owning list
    pub list_id: ListId,
    /// Human-readable name
    pub name: String,
    /// Accumulation window
    pub quota_type: QuotaType,
    /// Limit in seconds; must be positive
    pub limit_seconds: u64,
    /// Disabled rules are skipped during rule compilation
    pub enabled: bool,
}

/// Accumulated usage for one quota rule in one window.
///
/// At most one row exists per (rule, window); `window_start` is the
/// canonical start of the window per [`QuotaType`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaUsage {
    /// The quota rule this row belongs to
    pub rule_id: QuotaRuleId,
    /// Canonical start of the accumulation window
    pub window_start: DateTime<Utc>,
    /// Seconds of observed activity within the window
    pub used_seconds: u64,
}
