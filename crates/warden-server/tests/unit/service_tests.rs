//! Service lifecycle, refresh serialization and stats.

use std::sync::Arc;

use warden_domain::entities::{AuditKind, EntryType, ListType, PatternType, QuotaRule, QuotaType};
use warden_domain::ports::PolicyRepository;
use warden_infrastructure::config::AppConfig;
use warden_server::EnforcementService;
use warden_server::dns::DnsUpstream;

use crate::test_utils::{
    FakeRepository, FakeSampler, FakeTerminator, ManualClock, RecordingNotifier, StubUpstream,
    as_clock, as_notifier, as_repo, entry, list, seed_blacklist,
};

fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    // Ephemeral loopback ports so start() can bind anywhere.
    config.dns.listen_addr = "127.0.0.1:0".parse().unwrap();
    config.dns.listen_tcp = false;
    config.process.poll_interval_secs = 3600;
    config.service.shutdown_timeout_secs = 5;
    config
}

struct Fixture {
    repo: Arc<FakeRepository>,
    service: EnforcementService,
}

impl Fixture {
    fn new() -> Self {
        let repo = Arc::new(FakeRepository::new());
        let service = EnforcementService::with_upstream(
            test_config(),
            as_repo(&repo),
            Arc::new(FakeSampler::new()),
            Arc::new(FakeTerminator::new()),
            as_notifier(&Arc::new(RecordingNotifier::new())),
            as_clock(&Arc::new(ManualClock::new())),
            Arc::new(StubUpstream::new()) as Arc<dyn DnsUpstream>,
        );
        Self { repo, service }
    }
}

#[tokio::test]
async fn start_publishes_generation_one_and_stop_drains() {
    let fx = Fixture::new();
    fx.service.start().await.unwrap();

    let stats = fx.service.stats();
    assert_eq!(stats.generation, 1);
    assert!(stats.last_refresh.is_some());

    // Idempotent start.
    fx.service.start().await.unwrap();
    assert_eq!(fx.service.stats().generation, 1);

    fx.service.stop().await.unwrap();
    // Idempotent stop.
    fx.service.stop().await.unwrap();

    let kinds: Vec<AuditKind> = fx
        .repo
        .audit_events()
        .into_iter()
        .map(|e| e.kind)
        .collect();
    assert!(kinds.contains(&AuditKind::RulesRefreshed));
    assert!(kinds.contains(&AuditKind::ServiceEvent));
}

#[tokio::test]
async fn refresh_rules_advances_the_generation() {
    let fx = Fixture::new();
    fx.service.start().await.unwrap();

    seed_blacklist(&fx.repo, "game.exe", "example.net").await;
    fx.service.refresh_rules().await.unwrap();
    assert_eq!(fx.service.stats().generation, 2);

    fx.service.refresh_rules().await.unwrap();
    assert_eq!(fx.service.stats().generation, 3);

    fx.service.stop().await.unwrap();
}

#[tokio::test]
async fn concurrent_refreshes_coalesce() {
    let fx = Fixture::new();
    fx.service.start().await.unwrap();
    let service = Arc::new(fx.service);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let service = Arc::clone(&service);
        handles.push(tokio::spawn(async move { service.refresh_rules().await }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    // Eight callers compile at most a handful of times, and every caller
    // observed a rule set at least as fresh as its request.
    let generation = service.stats().generation;
    assert!(generation >= 2, "at least one refresh ran");
    assert!(generation <= 9, "bursts must coalesce, got {generation}");

    service.stop().await.unwrap();
}

#[tokio::test]
async fn stats_expose_quota_windows() {
    let fx = Fixture::new();
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

    fx.service.start().await.unwrap();

    let stats = fx.service.stats();
    assert_eq!(stats.quotas.len(), 1);
    assert_eq!(stats.quotas[0].rule_id, rule_id);
    assert_eq!(stats.quotas[0].limit, 3600);
    assert_eq!(stats.quotas[0].used, 0);
    assert_eq!(stats.decisions.allow, 0);
    assert_eq!(stats.dns.queries, 0);

    fx.service.stop().await.unwrap();
}

#[tokio::test]
async fn refresh_failure_keeps_the_published_rule_set() {
    let fx = Fixture::new();
    fx.service.start().await.unwrap();
    seed_blacklist(&fx.repo, "game.exe", "example.net").await;
    fx.service.refresh_rules().await.unwrap();
    let generation = fx.service.stats().generation;

    // A repository fault fails the refresh; the last good snapshot stays
    // published.
    fx.repo.set_fail_reads(true);
    assert!(fx.service.refresh_rules().await.is_err());
    assert_eq!(fx.service.stats().generation, generation);

    // Recovery resumes the monotonic generation sequence.
    fx.repo.set_fail_reads(false);
    fx.service.refresh_rules().await.unwrap();
    assert!(fx.service.stats().generation > generation);

    fx.service.stop().await.unwrap();
}
