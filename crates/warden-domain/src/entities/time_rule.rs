//! Weekday/time-of-day access rules.

use serde::{Deserialize, Serialize};

use super::{ListId, TimeRuleId};

/// Whether the rule grants or denies access while active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeRuleType {
    AllowDuring,
    BlockDuring,
}

impl TimeRuleType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AllowDuring => "allow_during",
            Self::BlockDuring => "block_during",
        }
    }
}

impl std::str::FromStr for TimeRuleType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "allow_during" => Ok(Self::AllowDuring),
            "block_during" => Ok(Self::BlockDuring),
            _ => Err(format!("Unknown time rule type: {s}")),
        }
    }
}

/// Minute-precision time of day (minutes since local midnight).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeOfDay(u16);

impl TimeOfDay {
    /// Maximum valid value, 23:59.
    pub const MAX: Self = Self(23 * 60 + 59);

    /// Build from an hour and minute.
    ///
    /// # Errors
    ///
    /// Returns an error when hour > 23 or minute > 59.
    pub fn new(hour: u8, minute: u8) -> Result<Self, String> {
        if hour > 23 || minute > 59 {
            return Err(format!("time of day out of range: {hour:02}:{minute:02}"));
        }
        Ok(Self(u16::from(hour) * 60 + u16::from(minute)))
    }

    /// Parse from `HH:MM`.
    ///
    /// # Errors
    ///
    /// Returns an error on any other shape.
    pub fn parse(s: &str) -> Result<Self, String> {
        let (h, m) = s
            .split_once(':')
            .ok_or_else(|| format!("expected HH:MM, got '{s}'"))?;
        let hour: u8 = h.parse().map_err(|_| format!("invalid hour in '{s}'"))?;
        let minute: u8 = m.parse().map_err(|_| format!("invalid minute in '{s}'"))?;
        Self::new(hour, minute)
    }

    /// Minutes since local midnight.
    #[must_use]
    pub fn minutes(&self) -> u16 {
        self.0
    }

    /// Hour component (0–23).
    #[must_use]
    pub fn hour(&self) -> u8 {
        (self.0 / 60) as u8
    }

    /// Minute component (0–59).
    #[must_use]
    pub fn minute(&self) -> u8 {
        (self.0 % 60) as u8
    }
}

impl std::fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

impl TryFrom<String> for TimeOfDay {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<TimeOfDay> for String {
    fn from(t: TimeOfDay) -> Self {
        t.to_string()
    }
}

/// Set of weekdays, numbered 0–6 with 0 = Sunday.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "Vec<u8>", into = "Vec<u8>")]
pub struct WeekdaySet(u8);

impl WeekdaySet {
    /// Every day of the week.
    pub const ALL: Self = Self(0x7f);

    /// Build from day numbers; values above 6 are ignored.
    #[must_use]
    pub fn from_days(days: &[u8]) -> Self {
        let mut bits = 0u8;
        for &d in days {
            if d <= 6 {
                bits |= 1 << d;
            }
        }
        Self(bits)
    }

    /// Whether the given day (0 = Sunday) is in the set.
    #[must_use]
    pub fn contains(&self, day: u8) -> bool {
        day <= 6 && self.0 & (1 << day) != 0
    }

    /// Whether the set contains no days.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Day numbers in ascending order.
    #[must_use]
    pub fn days(&self) -> Vec<u8> {
        (0u8..7).filter(|d| self.contains(*d)).collect()
    }
}

impl From<Vec<u8>> for WeekdaySet {
    fn from(days: Vec<u8>) -> Self {
        Self::from_days(&days)
    }
}

impl From<WeekdaySet> for Vec<u8> {
    fn from(set: WeekdaySet) -> Self {
        set.days()
    }
}

/// Time-window rule owned by one list.
///
/// A rule is active at instant T when the local weekday of T is in `days`
/// and the local time of day is within `[start, end]` (closed interval).
/// Intervals crossing midnight are rejected at compile time; administrators
/// express "22:00–02:00" as two rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRule {
    /// Unique identifier
    pub id: TimeRuleId,
    /// Owning list
    pub list_id: ListId,
    /// Human-readable name
    pub name: String,
    /// Allow or block while active
    pub rule_type: TimeRuleType,
    /// Weekdays the rule applies to
    pub days: WeekdaySet,
    /// Start of the active interval (inclusive)
    pub start: TimeOfDay,
    /// End of the active interval (inclusive)
    pub end: TimeOfDay,
    /// Disabled rules are skipped during rule compilation
    pub enabled: bool,
}

impl TimeRule {
    /// Whether the interval is expressible without crossing midnight.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        self.start <= self.end && !self.days.is_empty()
    }
}
