//! Recursive DNS responder with sinkhole answers.
//!
//! One receive loop per listening socket; every query is answered or
//! fails to SERVFAIL within the configured deadline. Decisions and
//! upstream answers are cached per (qname, qtype) with single-flight
//! population.

/// Decision cache with single-flight population
pub mod cache;
/// DNS wire format
pub mod codec;
/// The filter itself: listeners and the query pipeline
pub mod filter;
/// Upstream forwarding
pub mod upstream;

pub use cache::{DecisionCache, Lookup, Verdict};
pub use filter::DnsFilter;
pub use upstream::{DnsUpstream, UdpUpstreamPool};
