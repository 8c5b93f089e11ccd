//! Lists and their pattern entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{EntryId, ListId};

/// List semantics: whitelist members are allowed and non-members denied
/// within the list's scope; blacklist members are denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListType {
    Whitelist,
    Blacklist,
}

impl ListType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Whitelist => "whitelist",
            Self::Blacklist => "blacklist",
        }
    }
}

impl std::str::FromStr for ListType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "whitelist" => Ok(Self::Whitelist),
            "blacklist" => Ok(Self::Blacklist),
            _ => Err(format!("Unknown list type: {s}")),
        }
    }
}

/// Subject class an entry applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    Executable,
    Url,
}

impl EntryType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Executable => "executable",
            Self::Url => "url",
        }
    }
}

impl std::str::FromStr for EntryType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "executable" => Ok(Self::Executable),
            "url" => Ok(Self::Url),
            _ => Err(format!("Unknown entry type: {s}")),
        }
    }
}

/// Match semantics of an entry pattern.
///
/// - `Exact`: case-insensitive full-string equality of the normalized subject.
/// - `Wildcard`: shell glob with `*` (0+ chars) and `?` (1 char); path
///   separators are not special.
/// - `Domain`: matches the hostname and every descendant label
///   (`example.com` matches `example.com` and `a.b.example.com`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternType {
    Exact,
    Wildcard,
    Domain,
}

impl PatternType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Exact => "exact",
            Self::Wildcard => "wildcard",
            Self::Domain => "domain",
        }
    }
}

impl std::str::FromStr for PatternType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "exact" => Ok(Self::Exact),
            "wildcard" => Ok(Self::Wildcard),
            "domain" => Ok(Self::Domain),
            _ => Err(format!("Unknown pattern type: {s}")),
        }
    }
}

/// A named collection of entries sharing allow/deny semantics.
///
/// Deleting a list cascades to its entries, time rules and quota rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct List {
    /// Unique identifier
    pub id: ListId,
    /// Unique human-readable name
    pub name: String,
    /// Free-text description
    pub description: String,
    /// Whitelist or blacklist semantics
    pub list_type: ListType,
    /// Disabled lists are skipped during rule compilation
    pub enabled: bool,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last modification timestamp
    pub updated_at: DateTime<Utc>,
}

impl List {
    /// Create a new enabled list (id assigned by the repository on insert).
    #[must_use]
    pub fn new<S: Into<String>>(name: S, list_type: ListType, now: DateTime<Utc>) -> Self {
        Self {
            id: 0,
            name: name.into(),
            description: String::new(),
            list_type,
            enabled: true,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A single pattern owned by exactly one list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListEntry {
    /// Unique identifier
    pub id: EntryId,
    /// Owning list
    pub list_id: ListId,
    /// Subject class this entry applies to
    pub entry_type: EntryType,
    /// Match semantics
    pub pattern_type: PatternType,
    /// The pattern text
    pub pattern: String,
    /// Disabled entries are skipped during rule compilation
    pub enabled: bool,
}

impl ListEntry {
    /// Create a new enabled entry (id assigned by the repository on insert).
    #[must_use]
    pub fn new<S: Into<String>>(
        list_id: ListId,
        entry_type: EntryType,
        pattern_type: PatternType,
        pattern: S,
    ) -> Self {
        Self {
            id: 0,
            list_id,
            entry_type,
            pattern_type,
            pattern: pattern.into(),
            enabled: true,
        }
    }
}
