//! # Server Layer
//!
//! The enforcement daemon's long-running tasks: the DNS filter, the
//! process enforcer and the service that owns their lifecycle and the
//! published rule snapshot.
//!
//! ## Architecture
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`dns`] | Recursive DNS responder with sinkhole answers and a single-flight decision cache |
//! | [`process`] | Periodic process sampling, decisions and termination |
//! | [`service`] | Lifecycle owner, rule-refresh orchestrator, stats aggregator |
//! | [`stats`] | Shared atomic counters |
//!
//! Rule snapshots flow in one direction: the service compiles and stores
//! into an `ArcSwap` slot; both enforcers load the pointer once per
//! decision and never write it.

/// DNS filtering
pub mod dns;
/// Process enforcement
pub mod process;
/// Service lifecycle and rule refresh
pub mod service;
/// Shared atomic counters
pub mod stats;

pub use service::EnforcementService;
pub use stats::CoreCounters;
