//! Process table sampling via sysinfo.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sysinfo::{ProcessesToUpdate, System};
use warden_domain::error::{Error, Result};
use warden_domain::ports::{ProcessInfo, ProcessSampler};

/// sysinfo-backed [`ProcessSampler`].
///
/// Refreshing the process table is a blocking syscall sweep, so it runs
/// on the blocking pool. Kernel threads and root-owned processes are
/// marked as system processes.
pub struct SysinfoProcessSampler {
    system: Arc<Mutex<System>>,
}

impl Default for SysinfoProcessSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl SysinfoProcessSampler {
    /// Create a sampler with an empty process table; the first call to
    /// `processes` populates it.
    #[must_use]
    pub fn new() -> Self {
        Self {
            system: Arc::new(Mutex::new(System::new())),
        }
    }

    fn sample(system: &mut System) -> Vec<ProcessInfo> {
        system.refresh_processes(ProcessesToUpdate::All, true);
        system
            .processes()
            .iter()
            .map(|(pid, process)| {
                let full_path = process
                    .exe()
                    .map(|p| p.to_string_lossy().into_owned())
                    .unwrap_or_default();
                // Kernel threads expose no executable path; treat root-owned
                // processes as system processes as well.
                let is_root = process.user_id().is_some_and(|uid| uid.to_string() == "0");
                ProcessInfo {
                    pid: pid.as_u32(),
                    basename: process.name().to_string_lossy().into_owned(),
                    is_system: full_path.is_empty() || is_root,
                    full_path,
                    start_time: process.start_time(),
                }
            })
            .collect()
    }
}

#[async_trait]
impl ProcessSampler for SysinfoProcessSampler {
    async fn processes(&self) -> Result<Vec<ProcessInfo>> {
        let system = Arc::clone(&self.system);
        tokio::task::spawn_blocking(move || {
            let mut guard = system
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            Self::sample(&mut guard)
        })
        .await
        .map_err(|e| Error::sampler(format!("sampling task failed: {e}")))
    }
}
