//! Application configuration: types, loader, validation.
//!
//! Configuration is a single YAML document deserialized into [`AppConfig`]
//! and validated on load. Every field has a default so a minimal file (or
//! none at all) yields a runnable daemon.

mod loader;
mod validation;

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use loader::ConfigLoader;

/// Root configuration document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct AppConfig {
    /// Database location
    pub database: DatabaseConfig,
    /// Structured logging
    pub logging: LoggingConfig,
    /// Process enforcement
    pub process: ProcessConfig,
    /// DNS filtering
    pub dns: DnsConfig,
    /// Quota persistence
    pub quota: QuotaConfig,
    /// Service lifecycle
    pub service: ServiceConfig,
}

/// Database location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct DatabaseConfig {
    /// SQLite database file path
    pub path: PathBuf,
    /// Maximum pool connections
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("warden.db"),
            max_connections: 5,
        }
    }
}

/// Structured logging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct LoggingConfig {
    /// Log level filter (`error`, `warn`, `info`, `debug`, `trace`)
    pub level: String,
    /// Emit JSON lines instead of the human-readable format
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            json: false,
        }
    }
}

/// Process enforcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ProcessConfig {
    /// Sampling cadence in seconds
    pub poll_interval_secs: u64,
    /// Worker-pool ceiling for per-process decision pipelines
    pub max_concurrent_checks: usize,
    /// Block processes matching no list
    pub block_unknown: bool,
    /// Termination attempts per (pid, start time) before demoting to
    /// audit-only
    pub max_termination_attempts: u32,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            max_concurrent_checks: 8,
            block_unknown: false,
            max_termination_attempts: 3,
        }
    }
}

/// DNS filtering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct DnsConfig {
    /// UDP/TCP listen address (IPv4)
    pub listen_addr: SocketAddr,
    /// Optional additional IPv6 listener
    pub listen_addr_v6: Option<SocketAddr>,
    /// Serve TCP on the same addresses
    pub listen_tcp: bool,
    /// Sinkhole answer for blocked A queries
    pub block_ipv4: Ipv4Addr,
    /// Sinkhole answer for blocked AAAA queries
    pub block_ipv6: Ipv6Addr,
    /// Ordered upstream forwarders
    pub upstream_servers: Vec<SocketAddr>,
    /// Per-upstream forward timeout in milliseconds
    pub upstream_timeout_ms: u64,
    /// Cap on cached upstream answers, in seconds
    pub cache_ttl_secs: u64,
    /// How long cached block decisions are served before re-evaluation,
    /// in seconds
    pub decision_cache_ttl_secs: u64,
    /// Hard entry cap for the decision cache
    pub cache_max_entries: usize,
    /// Deadline for answering any query, in seconds
    pub response_deadline_secs: u64,
    /// Block names matching no list
    pub block_unknown: bool,
    /// Quota seconds charged per allowed query (0 disables DNS charging)
    pub quota_charge_per_query_secs: u64,
    /// Client IPs that bypass filtering entirely
    pub emergency_whitelist: Vec<IpAddr>,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 53)),
            listen_addr_v6: None,
            listen_tcp: true,
            block_ipv4: Ipv4Addr::LOCALHOST,
            block_ipv6: Ipv6Addr::LOCALHOST,
            upstream_servers: vec![
                SocketAddr::from(([1, 1, 1, 1], 53)),
                SocketAddr::from(([8, 8, 8, 8], 53)),
            ],
            upstream_timeout_ms: 1500,
            cache_ttl_secs: 300,
            decision_cache_ttl_secs: 60,
            cache_max_entries: 4096,
            response_deadline_secs: 2,
            block_unknown: false,
            quota_charge_per_query_secs: 0,
            emergency_whitelist: Vec::new(),
        }
    }
}

/// Quota persistence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct QuotaConfig {
    /// Write-back flush interval in seconds; bounds loss on crash
    pub flush_interval_secs: u64,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            flush_interval_secs: 5,
        }
    }
}

/// Service lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ServiceConfig {
    /// Bound on `stop`, in seconds
    pub shutdown_timeout_secs: u64,
    /// Administrative override: whitelisted DNS clients bypass filtering
    pub emergency_mode: bool,
    /// Audit every decision, not only blocks
    pub log_all_activity: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout_secs: 10,
            emergency_mode: false,
            log_all_activity: false,
        }
    }
}

impl AppConfig {
    /// Validate cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the first violated constraint.
    pub fn validate(&self) -> warden_domain::error::Result<()> {
        validation::validate(self)
    }
}

impl ProcessConfig {
    /// Sampling cadence.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl DnsConfig {
    /// Per-upstream forward timeout.
    #[must_use]
    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_millis(self.upstream_timeout_ms)
    }

    /// Cached-answer TTL cap.
    #[must_use]
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Cached block-decision retention.
    #[must_use]
    pub fn decision_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.decision_cache_ttl_secs)
    }

    /// Per-query response deadline.
    #[must_use]
    pub fn response_deadline(&self) -> Duration {
        Duration::from_secs(self.response_deadline_secs)
    }
}

impl QuotaConfig {
    /// Write-back flush interval.
    #[must_use]
    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs)
    }
}

impl ServiceConfig {
    /// Bound on `stop`.
    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}
