//! Signal-based process termination.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use sysinfo::{ProcessesToUpdate, System};
use tracing::{debug, warn};
use warden_domain::ports::{ProcessTerminator, TerminateOutcome};

/// How long a process gets to exit on SIGTERM before escalation.
const GRACE_PERIOD: Duration = Duration::from_millis(300);

/// [`ProcessTerminator`] that sends SIGTERM and escalates to SIGKILL.
///
/// The recorded start time is compared against the live process table
/// before any signal is sent; a mismatch means the pid was reused and the
/// target is reported as already exited.
pub struct NixProcessTerminator {
    system: Arc<Mutex<System>>,
}

impl Default for NixProcessTerminator {
    fn default() -> Self {
        Self::new()
    }
}

impl NixProcessTerminator {
    /// Create a terminator.
    #[must_use]
    pub fn new() -> Self {
        Self {
            system: Arc::new(Mutex::new(System::new())),
        }
    }

    /// Refresh one pid and report its start time, if it is still running.
    fn live_start_time(system: &Arc<Mutex<System>>, pid: u32) -> Option<u64> {
        let mut guard = system
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let sys_pid = sysinfo::Pid::from_u32(pid);
        guard.refresh_processes(ProcessesToUpdate::Some(&[sys_pid]), true);
        guard.process(sys_pid).map(sysinfo::Process::start_time)
    }

    fn send_signal(pid: u32, sig: Signal) -> Result<(), Errno> {
        signal::kill(Pid::from_raw(pid as i32), sig)
    }
}

#[async_trait]
impl ProcessTerminator for NixProcessTerminator {
    async fn terminate(&self, pid: u32, start_time: u64) -> TerminateOutcome {
        let system = Arc::clone(&self.system);
        let guard_check = {
            let system = Arc::clone(&system);
            tokio::task::spawn_blocking(move || Self::live_start_time(&system, pid)).await
        };
        match guard_check {
            Ok(Some(live)) if live == start_time => {}
            Ok(_) => return TerminateOutcome::AlreadyExited,
            Err(e) => {
                warn!(pid, error = %e, "start-time check failed");
                return TerminateOutcome::Fault;
            }
        }

        match Self::send_signal(pid, Signal::SIGTERM) {
            Ok(()) => {}
            Err(Errno::ESRCH) => return TerminateOutcome::AlreadyExited,
            Err(Errno::EPERM) => return TerminateOutcome::Denied,
            Err(e) => {
                warn!(pid, error = %e, "SIGTERM failed");
                return TerminateOutcome::Fault;
            }
        }

        tokio::time::sleep(GRACE_PERIOD).await;

        let still_alive = {
            let system = Arc::clone(&system);
            tokio::task::spawn_blocking(move || Self::live_start_time(&system, pid))
                .await
                .ok()
                .flatten()
                .is_some_and(|live| live == start_time)
        };
        if !still_alive {
            debug!(pid, "process exited on SIGTERM");
            return TerminateOutcome::Terminated;
        }

        match Self::send_signal(pid, Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => TerminateOutcome::Terminated,
            Err(Errno::EPERM) => TerminateOutcome::Denied,
            Err(e) => {
                warn!(pid, error = %e, "SIGKILL failed");
                TerminateOutcome::Fault
            }
        }
    }
}
