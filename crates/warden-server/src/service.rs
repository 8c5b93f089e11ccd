//! Service lifecycle, rule refresh and stats aggregation.
//!
//! The service owns the single publish slot both enforcers read. Rule
//! snapshots flow strictly through `refresh_rules`, which serializes
//! compilation and coalesces bursts: a refresh arriving while one is in
//! flight waits and triggers exactly one more compile, and any further
//! arrivals share that one.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use warden_application::{QuotaTracker, RuleCompiler, RuleSet};
use warden_domain::entities::{AuditEvent, AuditKind};
use warden_domain::error::{Error, Result};
use warden_domain::ports::{
    Clock, Notifier, PolicyRepository, ProcessSampler, ProcessTerminator,
};
use warden_domain::value_objects::StatsSnapshot;
use warden_infrastructure::config::AppConfig;

use crate::dns::{DnsFilter, DnsUpstream, UdpUpstreamPool};
use crate::process::ProcessEnforcer;
use crate::stats::CoreCounters;

/// Lifecycle owner of the enforcement core.
pub struct EnforcementService {
    rules: Arc<ArcSwap<RuleSet>>,
    compiler: RuleCompiler,
    quota: Arc<QuotaTracker>,
    repo: Arc<dyn PolicyRepository>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    counters: Arc<CoreCounters>,
    dns: Arc<DnsFilter>,
    enforcer: Arc<ProcessEnforcer>,
    shutdown_timeout: std::time::Duration,
    refresh_lock: tokio::sync::Mutex<()>,
    refresh_requested: AtomicBool,
    last_refresh: Mutex<Option<DateTime<Utc>>>,
    cancel: Mutex<Option<CancellationToken>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl EnforcementService {
    /// Assemble the service with the standard UDP upstream pool.
    #[must_use]
    pub fn new(
        config: AppConfig,
        repo: Arc<dyn PolicyRepository>,
        sampler: Arc<dyn ProcessSampler>,
        terminator: Arc<dyn ProcessTerminator>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let upstream: Arc<dyn DnsUpstream> = Arc::new(UdpUpstreamPool::new(
            config.dns.upstream_servers.clone(),
            config.dns.upstream_timeout(),
        ));
        Self::with_upstream(config, repo, sampler, terminator, notifier, clock, upstream)
    }

    /// Assemble the service with a caller-provided upstream resolver.
    #[must_use]
    pub fn with_upstream(
        config: AppConfig,
        repo: Arc<dyn PolicyRepository>,
        sampler: Arc<dyn ProcessSampler>,
        terminator: Arc<dyn ProcessTerminator>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        upstream: Arc<dyn DnsUpstream>,
    ) -> Self {
        let counters = Arc::new(CoreCounters::new());
        let quota = Arc::new(QuotaTracker::new(config.quota.flush_interval()));
        let compiler = RuleCompiler::new(Arc::clone(&repo), Arc::clone(&quota));
        let rules = Arc::new(ArcSwap::from_pointee(RuleSet::empty(0, clock.now_utc())));

        let dns = Arc::new(DnsFilter::new(
            config.dns.clone(),
            Arc::clone(&rules),
            upstream,
            Arc::clone(&quota),
            Arc::clone(&repo),
            Arc::clone(&notifier),
            Arc::clone(&clock),
            Arc::clone(&counters),
        ));
        let enforcer = Arc::new(ProcessEnforcer::new(
            config.process.clone(),
            config.service.log_all_activity,
            Arc::clone(&rules),
            sampler,
            terminator,
            Arc::clone(&quota),
            Arc::clone(&repo),
            Arc::clone(&notifier),
            Arc::clone(&clock),
            Arc::clone(&counters),
        ));

        Self {
            rules,
            compiler,
            quota,
            repo,
            notifier,
            clock,
            counters,
            dns,
            enforcer,
            shutdown_timeout: config.service.shutdown_timeout(),
            refresh_lock: tokio::sync::Mutex::new(()),
            refresh_requested: AtomicBool::new(false),
            last_refresh: Mutex::new(None),
            cancel: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Compile the initial rule set and start every enforcement task.
    ///
    /// # Errors
    ///
    /// Fails when the initial compile hits a repository fault; nothing is
    /// started in that case.
    pub async fn start(&self) -> Result<()> {
        if self.lock_cancel().is_some() {
            return Ok(());
        }

        let initial = self.compiler.compile(&self.clock.now_local()).await?;
        self.publish(initial).await;

        let cancel = CancellationToken::new();
        let mut tasks = Vec::new();
        tasks.push(self.quota.spawn_worker(
            Arc::clone(&self.repo),
            Arc::clone(&self.notifier),
            cancel.clone(),
        ));
        tasks.push(tokio::spawn({
            let dns = Arc::clone(&self.dns);
            let token = cancel.clone();
            async move { dns.run(token).await }
        }));
        tasks.push(tokio::spawn({
            let enforcer = Arc::clone(&self.enforcer);
            let token = cancel.clone();
            async move { enforcer.run(token).await }
        }));

        *self.lock_cancel() = Some(cancel);
        *self
            .tasks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = tasks;

        self.audit_service_event("enforcement service started").await;
        info!("enforcement service started");
        Ok(())
    }

    /// Cancel the enforcement tasks, wait for drain up to the shutdown
    /// timeout and final-flush quota usage.
    ///
    /// # Errors
    ///
    /// Returns a shutdown-timeout error when tasks failed to drain in
    /// time; the service still counts as stopped.
    pub async fn stop(&self) -> Result<()> {
        let Some(cancel) = self.lock_cancel().take() else {
            return Ok(());
        };
        cancel.cancel();

        let tasks: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .drain(..)
            .collect();
        let drain = async {
            for task in tasks {
                let _ = task.await;
            }
        };
        let drained = tokio::time::timeout(self.shutdown_timeout, drain).await;

        self.audit_service_event("enforcement service stopped").await;
        info!("enforcement service stopped");
        drained.map_err(|_| Error::shutdown_timeout("enforcement tasks did not drain in time"))
    }

    /// Recompile and atomically republish the rule set.
    ///
    /// Calls serialize; requests arriving during a compile coalesce into
    /// at most one follow-up compile.
    ///
    /// # Errors
    ///
    /// Fails on repository faults; the previously published rule set
    /// stays in place.
    pub async fn refresh_rules(&self) -> Result<()> {
        self.refresh_requested.store(true, Ordering::SeqCst);
        let _serial = self.refresh_lock.lock().await;
        // A compile that started after our request already covered it.
        if !self.refresh_requested.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        match self.compiler.compile(&self.clock.now_local()).await {
            Ok(ruleset) => {
                self.publish(ruleset).await;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "rule refresh failed; keeping the previous rule set");
                Err(e)
            }
        }
    }

    /// Point-in-time statistics snapshot.
    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        StatsSnapshot {
            generation: self.rules.load().generation,
            last_refresh: *self
                .last_refresh
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner),
            process_ticks: self
                .counters
                .process_ticks
                .load(Ordering::Relaxed),
            process_overruns: self
                .counters
                .process_overruns
                .load(Ordering::Relaxed),
            decisions: self.counters.decisions(),
            terminations: self.counters.terminations(),
            dns: self.counters.dns(),
            quotas: self.quota.active_windows(),
        }
    }

    /// The published rule slot, for collaborators that evaluate ad hoc.
    #[must_use]
    pub fn rules(&self) -> Arc<ArcSwap<RuleSet>> {
        Arc::clone(&self.rules)
    }

    /// The process enforcer, for driving a manual pass.
    #[must_use]
    pub fn process_enforcer(&self) -> Arc<ProcessEnforcer> {
        Arc::clone(&self.enforcer)
    }

    /// The DNS filter.
    #[must_use]
    pub fn dns_filter(&self) -> Arc<DnsFilter> {
        Arc::clone(&self.dns)
    }

    async fn publish(&self, ruleset: RuleSet) {
        let generation = ruleset.generation;
        self.rules.store(Arc::new(ruleset));
        let now = self.clock.now_utc();
        *self
            .last_refresh
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner) = Some(now);

        let event = AuditEvent::new(
            now,
            AuditKind::RulesRefreshed,
            format!("rule set generation {generation} published"),
        );
        if let Err(e) = self.repo.audit_append(&event).await {
            warn!(error = %e, "failed to append rules_refreshed audit event");
        }
        info!(generation, "rule set published");
    }

    async fn audit_service_event(&self, details: &str) {
        let event = AuditEvent::new(self.clock.now_utc(), AuditKind::ServiceEvent, details);
        if let Err(e) = self.repo.audit_append(&event).await {
            warn!(error = %e, "failed to append service audit event");
        }
    }

    fn lock_cancel(&self) -> std::sync::MutexGuard<'_, Option<CancellationToken>> {
        self.cancel
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
