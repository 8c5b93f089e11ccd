//! Process enforcer passes: termination, retry bounds, quota attribution.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use warden_application::{QuotaTracker, RuleCompiler, RuleSet};
use warden_domain::entities::{
    AuditKind, EntryType, ListType, PatternType, QuotaRule, QuotaType,
};
use warden_domain::ports::{PolicyRepository, TerminateOutcome};
use warden_infrastructure::config::ProcessConfig;
use warden_server::CoreCounters;
use warden_server::process::ProcessEnforcer;

use crate::test_utils::{
    FakeRepository, FakeSampler, FakeTerminator, ManualClock, RecordingNotifier, as_clock,
    as_notifier, as_repo, as_sampler, as_terminator, entry, list, process, seed_blacklist,
};

struct Fixture {
    repo: Arc<FakeRepository>,
    sampler: Arc<FakeSampler>,
    terminator: Arc<FakeTerminator>,
    clock: Arc<ManualClock>,
    quota: Arc<QuotaTracker>,
    rules: Arc<ArcSwap<RuleSet>>,
    compiler: RuleCompiler,
    counters: Arc<CoreCounters>,
    enforcer: Arc<ProcessEnforcer>,
}

impl Fixture {
    fn new(mutate: impl FnOnce(&mut ProcessConfig)) -> Self {
        let repo = Arc::new(FakeRepository::new());
        let sampler = Arc::new(FakeSampler::new());
        let terminator = Arc::new(FakeTerminator::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let clock = Arc::new(ManualClock::new());
        let quota = Arc::new(QuotaTracker::new(Duration::from_secs(3600)));
        let compiler = RuleCompiler::new(as_repo(&repo), Arc::clone(&quota));
        let rules = Arc::new(ArcSwap::from_pointee(RuleSet::empty(
            0,
            chrono::Utc::now(),
        )));
        let counters = Arc::new(CoreCounters::new());

        let mut config = ProcessConfig::default();
        mutate(&mut config);
        let enforcer = Arc::new(ProcessEnforcer::new(
            config,
            false,
            Arc::clone(&rules),
            as_sampler(&sampler),
            as_terminator(&terminator),
            Arc::clone(&quota),
            as_repo(&repo),
            as_notifier(&notifier),
            as_clock(&clock),
            Arc::clone(&counters),
        ));

        Self {
            repo,
            sampler,
            terminator,
            clock,
            quota,
            rules,
            compiler,
            counters,
            enforcer,
        }
    }

    async fn refresh(&self) {
        let ruleset = self
            .compiler
            .compile(&chrono::Local::now())
            .await
            .unwrap();
        self.rules.store(Arc::new(ruleset));
    }
}

#[tokio::test]
async fn blocked_process_is_terminated_and_audited() {
    let fx = Fixture::new(|_| {});
    let list_id = seed_blacklist(&fx.repo, "game.exe", "example.net").await;
    fx.refresh().await;
    fx.sampler
        .set_processes(vec![process(100, "game.exe", 5000), process(101, "editor", 5001)]);

    fx.enforcer.run_tick().await;

    assert_eq!(fx.terminator.calls(), vec![(100, 5000)]);
    assert_eq!(fx.counters.terminations().ok, 1);
    assert_eq!(fx.counters.decisions().block, 1);
    assert_eq!(fx.counters.decisions().allow, 1);

    let audits = fx.repo.audit_events();
    assert_eq!(audits.len(), 1);
    assert_eq!(audits[0].kind, AuditKind::ProcessBlocked);
    assert_eq!(audits[0].subject_value.as_deref(), Some("game.exe"));
    assert_eq!(audits[0].list_id, Some(list_id));
}

#[tokio::test]
async fn system_and_essential_processes_are_never_evaluated() {
    let fx = Fixture::new(|_| {});
    seed_blacklist(&fx.repo, "systemd", "example.net").await;
    fx.refresh().await;

    let mut kernel = process(1, "systemd", 1);
    kernel.is_system = false; // essential by name even when not marked
    let mut marked = process(2, "game.exe", 2);
    marked.is_system = true;
    fx.sampler.set_processes(vec![kernel, marked]);

    fx.enforcer.run_tick().await;

    assert!(fx.terminator.calls().is_empty());
    assert_eq!(fx.counters.decisions().block, 0);
}

#[tokio::test]
async fn duplicate_pids_in_one_sample_terminate_once() {
    let fx = Fixture::new(|_| {});
    seed_blacklist(&fx.repo, "game.exe", "example.net").await;
    fx.refresh().await;
    fx.sampler.set_processes(vec![
        process(100, "game.exe", 5000),
        process(100, "game.exe", 5000),
    ]);

    fx.enforcer.run_tick().await;

    assert_eq!(fx.terminator.calls().len(), 1);
}

#[tokio::test]
async fn termination_failures_demote_to_audit_only_after_the_bound() {
    let fx = Fixture::new(|config| config.max_termination_attempts = 2);
    seed_blacklist(&fx.repo, "game.exe", "example.net").await;
    fx.refresh().await;
    fx.sampler.set_processes(vec![process(100, "game.exe", 5000)]);
    fx.terminator.set_outcome(TerminateOutcome::Denied);

    // Two failing passes reach the bound.
    fx.enforcer.run_tick().await;
    fx.enforcer.run_tick().await;
    assert_eq!(fx.terminator.calls().len(), 2);

    let giveups: Vec<_> = fx
        .repo
        .audit_events()
        .into_iter()
        .filter(|e| e.kind == AuditKind::TerminateGiveup)
        .collect();
    assert_eq!(giveups.len(), 1);

    // Further passes stay audit-only: no more termination attempts and no
    // repeated giveup event.
    fx.enforcer.run_tick().await;
    assert_eq!(fx.terminator.calls().len(), 2);
    let giveups = fx
        .repo
        .audit_events()
        .into_iter()
        .filter(|e| e.kind == AuditKind::TerminateGiveup)
        .count();
    assert_eq!(giveups, 1);
    assert_eq!(fx.counters.terminations().denied, 2);
}

#[tokio::test]
async fn quota_is_charged_for_elapsed_time_between_observations() {
    let fx = Fixture::new(|_| {});
    let social = fx
        .repo
        .create_list(&list("Social", ListType::Whitelist))
        .await
        .unwrap();
    fx.repo
        .create_entry(&entry(
            social,
            EntryType::Executable,
            PatternType::Exact,
            "chat.exe",
        ))
        .await
        .unwrap();
    let rule_id = fx
        .repo
        .create_quota_rule(&QuotaRule {
            id: 0,
            list_id: social,
            name: "daily".to_owned(),
            quota_type: QuotaType::Daily,
            limit_seconds: 3600,
            enabled: true,
        })
        .await
        .unwrap();
    fx.refresh().await;
    fx.sampler.set_processes(vec![process(200, "chat.exe", 9000)]);

    // First observation charges nothing: the process may predate us.
    fx.enforcer.run_tick().await;
    assert_eq!(fx.quota.get(rule_id, &chrono::Local::now()), 0);

    // Five seconds later the elapsed interval is attributed.
    fx.clock.advance(Duration::from_secs(5));
    fx.enforcer.run_tick().await;
    assert_eq!(fx.quota.get(rule_id, &chrono::Local::now()), 5);

    fx.clock.advance(Duration::from_secs(2));
    fx.enforcer.run_tick().await;
    assert_eq!(fx.quota.get(rule_id, &chrono::Local::now()), 7);
}

#[tokio::test]
async fn restarted_process_charges_from_zero_again() {
    let fx = Fixture::new(|_| {});
    let social = fx
        .repo
        .create_list(&list("Social", ListType::Whitelist))
        .await
        .unwrap();
    fx.repo
        .create_entry(&entry(
            social,
            EntryType::Executable,
            PatternType::Exact,
            "chat.exe",
        ))
        .await
        .unwrap();
    let rule_id = fx
        .repo
        .create_quota_rule(&QuotaRule {
            id: 0,
            list_id: social,
            name: "daily".to_owned(),
            quota_type: QuotaType::Daily,
            limit_seconds: 3600,
            enabled: true,
        })
        .await
        .unwrap();
    fx.refresh().await;

    fx.sampler.set_processes(vec![process(200, "chat.exe", 9000)]);
    fx.enforcer.run_tick().await;
    fx.clock.advance(Duration::from_secs(5));

    // Same pid, new start time: a different process instance.
    fx.sampler.set_processes(vec![process(200, "chat.exe", 9100)]);
    fx.enforcer.run_tick().await;
    assert_eq!(fx.quota.get(rule_id, &chrono::Local::now()), 0);
}

#[tokio::test]
async fn sampler_fault_aborts_the_pass_without_charges() {
    let fx = Fixture::new(|_| {});
    seed_blacklist(&fx.repo, "game.exe", "example.net").await;
    fx.refresh().await;
    fx.sampler.set_fail(true);

    fx.enforcer.run_tick().await;

    assert!(fx.terminator.calls().is_empty());
    assert!(fx.repo.audit_events().is_empty());
    assert_eq!(fx.counters.process_ticks.load(std::sync::atomic::Ordering::Relaxed), 1);
}

#[tokio::test]
async fn successful_termination_clears_retry_state() {
    let fx = Fixture::new(|config| config.max_termination_attempts = 3);
    seed_blacklist(&fx.repo, "game.exe", "example.net").await;
    fx.refresh().await;
    fx.sampler.set_processes(vec![process(100, "game.exe", 5000)]);

    fx.terminator.set_outcome(TerminateOutcome::Fault);
    fx.enforcer.run_tick().await;
    assert_eq!(fx.counters.terminations().fault, 1);

    fx.terminator.set_outcome(TerminateOutcome::Terminated);
    fx.enforcer.run_tick().await;
    assert_eq!(fx.counters.terminations().ok, 1);

    // The same (pid, start-time) reappearing is treated afresh.
    fx.terminator.set_outcome(TerminateOutcome::Denied);
    fx.enforcer.run_tick().await;
    fx.enforcer.run_tick().await;
    fx.enforcer.run_tick().await;
    let giveups = fx
        .repo
        .audit_events()
        .into_iter()
        .filter(|e| e.kind == AuditKind::TerminateGiveup)
        .count();
    assert_eq!(giveups, 1, "three fresh failures reach the bound once");
}
