//! The thing being evaluated: a live process or a DNS query target.

use serde::{Deserialize, Serialize};

use crate::entities::list::EntryType;

/// Enforcement subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Subject {
    /// A locally executing process
    Executable {
        /// Basename of the executable (e.g. `game.exe`)
        basename: String,
        /// Full filesystem path, empty when the sampler could not resolve it
        full_path: String,
    },
    /// A DNS query target or URL host
    Host {
        /// Normalized hostname (lowercase, no trailing dot)
        hostname: String,
        /// Full URL when the subject originated from one
        full_url: Option<String>,
    },
}

impl Subject {
    /// Build an executable subject.
    #[must_use]
    pub fn executable<B: Into<String>, P: Into<String>>(basename: B, full_path: P) -> Self {
        Self::Executable {
            basename: basename.into(),
            full_path: full_path.into(),
        }
    }

    /// Build a host subject from a bare hostname.
    #[must_use]
    pub fn host<H: Into<String>>(hostname: H) -> Self {
        Self::Host {
            hostname: hostname.into(),
            full_url: None,
        }
    }

    /// Build a host subject carrying the originating URL.
    #[must_use]
    pub fn url<H: Into<String>, U: Into<String>>(hostname: H, full_url: U) -> Self {
        Self::Host {
            hostname: hostname.into(),
            full_url: Some(full_url.into()),
        }
    }

    /// The entry class patterns for this subject are drawn from.
    #[must_use]
    pub fn entry_type(&self) -> EntryType {
        match self {
            Self::Executable { .. } => EntryType::Executable,
            Self::Host { .. } => EntryType::Url,
        }
    }

    /// Primary display value (basename or hostname).
    #[must_use]
    pub fn value(&self) -> &str {
        match self {
            Self::Executable { basename, .. } => basename,
            Self::Host { hostname, .. } => hostname,
        }
    }
}

impl std::fmt::Display for Subject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Executable {
                basename,
                full_path,
            } if !full_path.is_empty() => write!(f, "{basename} ({full_path})"),
            Self::Executable { basename, .. } => f.write_str(basename),
            Self::Host { hostname, .. } => f.write_str(hostname),
        }
    }
}
