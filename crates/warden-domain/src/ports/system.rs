//! Host system surfaces: clock, process sampler, terminator.

use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

/// Wall and monotonic time source.
///
/// Enforcement components take time through this trait so tests can pin
/// the clock; `monotonic` backs interval measurement and never goes
/// backwards.
pub trait Clock: Send + Sync {
    /// Current wall time, UTC.
    fn now_utc(&self) -> DateTime<Utc>;
    /// Current wall time in the host's local timezone. Time rules and
    /// quota windows are defined in local time.
    fn now_local(&self) -> DateTime<Local>;
    /// Monotonic instant for interval measurement.
    fn monotonic(&self) -> Instant;
}

/// One live process as observed by the sampler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInfo {
    /// Process id
    pub pid: u32,
    /// Executable basename
    pub basename: String,
    /// Full executable path, empty when unresolvable
    pub full_path: String,
    /// Process start time, Unix epoch seconds. Paired with `pid` to guard
    /// against pid reuse.
    pub start_time: u64,
    /// Marked by the sampler as belonging to the operating system
    pub is_system: bool,
}

/// Best-effort enumeration of live processes.
///
/// Completeness is best-effort; the core tolerates processes appearing and
/// disappearing between sampling passes.
#[async_trait]
pub trait ProcessSampler: Send + Sync {
    /// Enumerate live processes.
    ///
    /// # Errors
    ///
    /// Fails on host faults; the enforcement pass is aborted.
    async fn processes(&self) -> crate::error::Result<Vec<ProcessInfo>>;
}

/// Outcome of a termination request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminateOutcome {
    /// The process was terminated
    Terminated,
    /// The process was already gone (or the pid was reused)
    AlreadyExited,
    /// The host denied the termination
    Denied,
    /// The termination faulted for another reason
    Fault,
}

/// Process termination collaborator.
#[async_trait]
pub trait ProcessTerminator: Send + Sync {
    /// Request termination of `(pid, start_time)`. The start time guards
    /// against pid reuse: implementations must not kill a process whose
    /// start time differs.
    async fn terminate(&self, pid: u32, start_time: u64) -> TerminateOutcome;
}
