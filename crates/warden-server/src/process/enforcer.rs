//! The process enforcer's tick loop.
//!
//! Each pass samples the process table, classifies every non-system
//! process against the current rule snapshot and terminates blocked ones.
//! Decision+termination pipelines run concurrently under a semaphore
//! bound; audit emission and bookkeeping happen afterwards in
//! subject-iteration order so the audit stream stays deterministic.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use warden_application::{DecisionEngine, QuotaTracker, RuleSet};
use warden_domain::entities::{AuditEvent, AuditKind, EntryType, QuotaRuleId};
use warden_domain::ports::{
    Clock, Notifier, NotifierEvent, PolicyRepository, ProcessInfo, ProcessSampler,
    ProcessTerminator, TerminateOutcome,
};
use warden_domain::value_objects::{Action, Decision, Subject};
use warden_infrastructure::config::ProcessConfig;

use crate::stats::CoreCounters;

/// Basenames never terminated regardless of rules. Not user-configurable.
const ESSENTIAL_BINARIES: &[&str] = &[
    "init",
    "systemd",
    "kthreadd",
    "dbus-daemon",
    "sshd",
    "login",
    "launchd",
    "kernel_task",
    "windowserver",
    "smss.exe",
    "csrss.exe",
    "wininit.exe",
    "winlogon.exe",
    "services.exe",
    "lsass.exe",
    "svchost.exe",
    "explorer.exe",
];

/// Enforcer lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnforcerState {
    Stopped,
    Starting,
    Running,
    Draining,
}

/// Per-(pid, start-time) bookkeeping across ticks.
struct SeenProcess {
    /// Instant up to which activity has been charged
    charged_until: Instant,
    /// Failed termination attempts
    attempts: u32,
    /// Past the attempt bound; audit-only from here on
    gave_up: bool,
}

/// What one pipeline concluded about one process.
struct PipelineOutcome {
    process: ProcessInfo,
    decision: Decision,
    /// Termination result, when one was attempted
    terminated: Option<TerminateOutcome>,
    /// Quota rules whose lists matched, for usage attribution
    quota_rules: Vec<QuotaRuleId>,
}

/// Samples, decides and terminates on a fixed cadence.
pub struct ProcessEnforcer {
    config: ProcessConfig,
    log_all_activity: bool,
    rules: Arc<ArcSwap<RuleSet>>,
    sampler: Arc<dyn ProcessSampler>,
    terminator: Arc<dyn ProcessTerminator>,
    quota: Arc<QuotaTracker>,
    repo: Arc<dyn PolicyRepository>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    counters: Arc<CoreCounters>,
    state: Mutex<EnforcerState>,
    seen: Mutex<HashMap<(u32, u64), SeenProcess>>,
}

impl ProcessEnforcer {
    /// Assemble an enforcer from its collaborators.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        config: ProcessConfig,
        log_all_activity: bool,
        rules: Arc<ArcSwap<RuleSet>>,
        sampler: Arc<dyn ProcessSampler>,
        terminator: Arc<dyn ProcessTerminator>,
        quota: Arc<QuotaTracker>,
        repo: Arc<dyn PolicyRepository>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        counters: Arc<CoreCounters>,
    ) -> Self {
        Self {
            config,
            log_all_activity,
            rules,
            sampler,
            terminator,
            quota,
            repo,
            notifier,
            clock,
            counters,
            state: Mutex::new(EnforcerState::Stopped),
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> EnforcerState {
        *self.lock_state()
    }

    /// Run the tick loop until cancellation. Idempotent: a second caller
    /// while running returns immediately.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        {
            let mut state = self.lock_state();
            if *state != EnforcerState::Stopped {
                debug!("process enforcer already running");
                return;
            }
            *state = EnforcerState::Starting;
        }

        let interval = self.config.poll_interval();
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        *self.lock_state() = EnforcerState::Running;

        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let started = self.clock.monotonic();
                    tokio::select! {
                        () = cancel.cancelled() => break,
                        () = self.run_tick() => {}
                    }
                    // An overrun means the next scheduled tick already
                    // passed; the Skip behavior drops it, we count it.
                    if started.elapsed() > interval {
                        self.counters
                            .process_overruns
                            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                        warn!("sampling pass overran the poll interval; skipping a tick");
                    }
                }
            }
        }

        *self.lock_state() = EnforcerState::Draining;
        // Dropping the tick future aborted any in-flight pipelines; only
        // bookkeeping remains.
        *self.lock_state() = EnforcerState::Stopped;
    }

    /// One sampling pass. Public so the service and tests can drive a
    /// pass without the loop.
    pub async fn run_tick(self: &Arc<Self>) {
        self.counters
            .process_ticks
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        let processes = match self.sampler.processes().await {
            Ok(processes) => processes,
            Err(e) => {
                // Aborted pass: no decisions, no quota charges.
                warn!(error = %e, "process sampling failed; tick aborted");
                return;
            }
        };

        let rules = self.rules.load_full();
        let mut candidates = Vec::new();
        let mut observed = HashSet::new();
        for process in processes {
            if process.is_system || Self::is_essential(&process.basename) {
                continue;
            }
            // A duplicate (pid, start-time) must not be evaluated (or
            // terminated) twice in one pass.
            if observed.insert((process.pid, process.start_time)) {
                candidates.push(process);
            }
        }

        // Each pipeline runs as its own task: a panic in one decision is
        // contained to that process and surfaces as a join error.
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_checks.max(1)));
        let now_local = self.clock.now_local();
        let mut pipelines: JoinSet<(usize, PipelineOutcome)> = JoinSet::new();
        for (index, process) in candidates.into_iter().enumerate() {
            let this = Arc::clone(self);
            let semaphore = Arc::clone(&semaphore);
            let rules = Arc::clone(&rules);
            pipelines.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                (index, this.evaluate(process, &rules, &now_local).await)
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = pipelines.join_next().await {
            match joined {
                Ok(indexed) => outcomes.push(indexed),
                Err(e) => warn!(error = %e, "decision pipeline failed; process skipped"),
            }
        }
        // Audit emission follows subject-iteration order.
        outcomes.sort_by_key(|(index, _)| *index);

        let now = self.clock.monotonic();
        for (_, outcome) in &outcomes {
            self.settle(outcome, now, &now_local).await;
        }
        self.forget_exited(&observed);
    }

    fn is_essential(basename: &str) -> bool {
        let folded = basename.to_lowercase();
        ESSENTIAL_BINARIES.contains(&folded.as_str())
    }

    /// Decide and, for blocked processes, attempt termination. Runs
    /// concurrently with other pipelines.
    async fn evaluate(
        &self,
        process: ProcessInfo,
        rules: &RuleSet,
        now_local: &chrono::DateTime<chrono::Local>,
    ) -> PipelineOutcome {
        let subject = Subject::executable(process.basename.as_str(), process.full_path.as_str());
        let decision =
            DecisionEngine::decide(&subject, rules, now_local, self.config.block_unknown);
        self.counters.record_decision(decision.action);

        let mut terminated = None;
        let mut quota_rules = Vec::new();
        if decision.is_block() {
            let may_attempt = {
                let seen = self.lock_seen();
                seen.get(&(process.pid, process.start_time))
                    .is_none_or(|s| !s.gave_up)
            };
            if may_attempt {
                terminated = Some(
                    self.terminator
                        .terminate(process.pid, process.start_time)
                        .await,
                );
            }
        } else {
            quota_rules = rules
                .quota_rules_matching(&subject)
                .iter()
                .map(|r| r.id)
                .collect();
        }

        PipelineOutcome {
            process,
            decision,
            terminated,
            quota_rules,
        }
    }

    /// Bookkeeping for one outcome, in subject-iteration order: counters,
    /// audit, retry accounting and quota attribution.
    async fn settle(
        &self,
        outcome: &PipelineOutcome,
        now: Instant,
        now_local: &chrono::DateTime<chrono::Local>,
    ) {
        let key = (outcome.process.pid, outcome.process.start_time);
        match outcome.decision.action {
            Action::Block => {
                self.audit_decision(AuditKind::ProcessBlocked, outcome).await;
                if let Some(result) = outcome.terminated {
                    self.counters.record_termination(result);
                    self.track_termination(key, result, outcome).await;
                }
            }
            Action::Allow => {
                if self.log_all_activity && outcome.decision.list_id.is_some() {
                    self.audit_decision(AuditKind::Activity, outcome).await;
                }
                let delta = self.charge_delta(key, now);
                if delta > 0 {
                    for rule_id in &outcome.quota_rules {
                        self.quota.add(*rule_id, delta, now_local);
                    }
                }
            }
        }
    }

    /// Elapsed whole seconds since this (pid, start-time) was last
    /// charged; zero for a newly seen process. The fractional remainder
    /// carries over so long-running processes are charged accurately.
    fn charge_delta(&self, key: (u32, u64), now: Instant) -> u64 {
        let mut seen = self.lock_seen();
        match seen.get_mut(&key) {
            Some(entry) => {
                let elapsed = now.saturating_duration_since(entry.charged_until);
                let whole = elapsed.as_secs();
                entry.charged_until += Duration::from_secs(whole);
                whole
            }
            None => {
                // First observation: the process may predate the service;
                // charging starts now.
                seen.insert(
                    key,
                    SeenProcess {
                        charged_until: now,
                        attempts: 0,
                        gave_up: false,
                    },
                );
                0
            }
        }
    }

    async fn track_termination(
        &self,
        key: (u32, u64),
        result: TerminateOutcome,
        outcome: &PipelineOutcome,
    ) {
        match result {
            TerminateOutcome::Terminated | TerminateOutcome::AlreadyExited => {
                self.lock_seen().remove(&key);
                self.notifier
                    .emit(NotifierEvent::SubjectBlocked {
                        subject: Subject::executable(
                            outcome.process.basename.as_str(),
                            outcome.process.full_path.as_str(),
                        ),
                        list_id: outcome.decision.list_id,
                    })
                    .await;
            }
            TerminateOutcome::Denied | TerminateOutcome::Fault => {
                // No retry within this tick; the next pass reattempts
                // until the bound is hit.
                let newly_gave_up = {
                    let mut seen = self.lock_seen();
                    let entry = seen.entry(key).or_insert(SeenProcess {
                        charged_until: self.clock.monotonic(),
                        attempts: 0,
                        gave_up: false,
                    });
                    entry.attempts += 1;
                    if entry.attempts >= self.config.max_termination_attempts && !entry.gave_up {
                        entry.gave_up = true;
                        true
                    } else {
                        false
                    }
                };
                if newly_gave_up {
                    warn!(
                        pid = outcome.process.pid,
                        basename = %outcome.process.basename,
                        "termination repeatedly failed; demoting to audit-only"
                    );
                    self.audit_decision(AuditKind::TerminateGiveup, outcome).await;
                }
            }
        }
    }

    async fn audit_decision(&self, kind: AuditKind, outcome: &PipelineOutcome) {
        let event = AuditEvent::new(
            self.clock.now_utc(),
            kind,
            format!(
                "pid {} ({})",
                outcome.process.pid,
                outcome.decision.reason.as_str()
            ),
        )
        .with_subject(EntryType::Executable, outcome.process.basename.as_str())
        .with_action(outcome.decision.action)
        .with_rule_ref(outcome.decision.list_id, outcome.decision.rule_id);
        if let Err(e) = self.repo.audit_append(&event).await {
            warn!(error = %e, "failed to append audit event");
        }
    }

    /// Drop bookkeeping for processes no longer in the table.
    fn forget_exited(&self, observed: &HashSet<(u32, u64)>) {
        self.lock_seen().retain(|key, _| observed.contains(key));
    }

    fn lock_state(&self) -> MutexGuard<'_, EnforcerState> {
        self.state
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn lock_seen(&self) -> MutexGuard<'_, HashMap<(u32, u64), SeenProcess>> {
        self.seen
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
