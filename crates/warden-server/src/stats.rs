//! Shared atomic counters.
//!
//! Both enforcers increment these lock-free; the service folds them into
//! the stable stats snapshot on demand.

use std::sync::atomic::{AtomicU64, Ordering};

use warden_domain::ports::TerminateOutcome;
use warden_domain::value_objects::decision::Action;
use warden_domain::value_objects::stats::{DecisionCounts, DnsStats, TerminationStats};

/// Counter block shared by the enforcers and the service.
#[derive(Debug, Default)]
pub struct CoreCounters {
    /// Completed process enforcement passes
    pub process_ticks: AtomicU64,
    /// Skipped process enforcement passes
    pub process_overruns: AtomicU64,
    decisions_allow: AtomicU64,
    decisions_block: AtomicU64,
    term_ok: AtomicU64,
    term_denied: AtomicU64,
    term_fault: AtomicU64,
    /// DNS queries received and parsed
    pub dns_queries: AtomicU64,
    /// DNS queries answered from the decision cache
    pub dns_cache_hits: AtomicU64,
    /// DNS queries that required a fresh decision
    pub dns_cache_misses: AtomicU64,
    /// DNS queries answered with a sinkhole response
    pub dns_blocks: AtomicU64,
    /// Upstream forwards that exhausted every server
    pub dns_upstream_failures: AtomicU64,
}

impl CoreCounters {
    /// Create a zeroed counter block.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a decision by action.
    pub fn record_decision(&self, action: Action) {
        match action {
            Action::Allow => self.decisions_allow.fetch_add(1, Ordering::Relaxed),
            Action::Block => self.decisions_block.fetch_add(1, Ordering::Relaxed),
        };
    }

    /// Record a termination outcome. An already-exited target counts as
    /// ok: the block took effect.
    pub fn record_termination(&self, outcome: TerminateOutcome) {
        match outcome {
            TerminateOutcome::Terminated | TerminateOutcome::AlreadyExited => {
                self.term_ok.fetch_add(1, Ordering::Relaxed)
            }
            TerminateOutcome::Denied => self.term_denied.fetch_add(1, Ordering::Relaxed),
            TerminateOutcome::Fault => self.term_fault.fetch_add(1, Ordering::Relaxed),
        };
    }

    /// Decisions taken so far.
    #[must_use]
    pub fn decisions(&self) -> DecisionCounts {
        DecisionCounts {
            allow: self.decisions_allow.load(Ordering::Relaxed),
            block: self.decisions_block.load(Ordering::Relaxed),
        }
    }

    /// Termination outcomes so far.
    #[must_use]
    pub fn terminations(&self) -> TerminationStats {
        TerminationStats {
            ok: self.term_ok.load(Ordering::Relaxed),
            denied: self.term_denied.load(Ordering::Relaxed),
            fault: self.term_fault.load(Ordering::Relaxed),
        }
    }

    /// DNS counters so far.
    #[must_use]
    pub fn dns(&self) -> DnsStats {
        DnsStats {
            queries: self.dns_queries.load(Ordering::Relaxed),
            cache_hits: self.dns_cache_hits.load(Ordering::Relaxed),
            cache_misses: self.dns_cache_misses.load(Ordering::Relaxed),
            blocks: self.dns_blocks.load(Ordering::Relaxed),
            upstream_failures: self.dns_upstream_failures.load(Ordering::Relaxed),
        }
    }
}
