//! SQLite repository round-trips against an in-memory database.

use chrono::{TimeZone, Utc};
use warden_domain::entities::{
    AuditEvent, AuditKind, EntryType, List, ListEntry, ListType, PatternType, QuotaRule, QuotaType,
    TimeOfDay, TimeRule, TimeRuleType, WeekdaySet,
};
use warden_domain::ports::PolicyRepository;
use warden_domain::value_objects::Action;
use warden_infrastructure::SqlitePolicyRepository;

async fn repo() -> SqlitePolicyRepository {
    SqlitePolicyRepository::in_memory().await.unwrap()
}

fn sample_list(name: &str) -> List {
    List::new(name, ListType::Blacklist, Utc::now())
}

#[tokio::test]
async fn list_crud_round_trip() {
    let repo = repo().await;
    let id = repo.create_list(&sample_list("Games")).await.unwrap();

    let mut fetched = repo.get_list(id).await.unwrap();
    assert_eq!(fetched.name, "Games");
    assert_eq!(fetched.list_type, ListType::Blacklist);
    assert!(fetched.enabled);

    fetched.name = "Video Games".to_owned();
    fetched.enabled = false;
    repo.update_list(&fetched).await.unwrap();

    assert!(repo.lists_enabled().await.unwrap().is_empty());
    assert_eq!(repo.lists_all().await.unwrap().len(), 1);

    repo.delete_list(id).await.unwrap();
    assert!(repo.get_list(id).await.is_err());
}

#[tokio::test]
async fn duplicate_list_names_are_rejected() {
    let repo = repo().await;
    repo.create_list(&sample_list("Games")).await.unwrap();
    assert!(repo.create_list(&sample_list("Games")).await.is_err());
}

#[tokio::test]
async fn entry_round_trip_preserves_types() {
    let repo = repo().await;
    let list_id = repo.create_list(&sample_list("Games")).await.unwrap();
    let entry = ListEntry::new(list_id, EntryType::Url, PatternType::Domain, "example.com");
    let entry_id = repo.create_entry(&entry).await.unwrap();

    let entries = repo.entries_by_list(list_id).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].id, entry_id);
    assert_eq!(entries[0].entry_type, EntryType::Url);
    assert_eq!(entries[0].pattern_type, PatternType::Domain);
    assert_eq!(entries[0].pattern, "example.com");

    // Unknown list yields an empty set, not an error.
    assert!(repo.entries_by_list(9999).await.unwrap().is_empty());
}

#[tokio::test]
async fn deleting_a_list_cascades_to_owned_records() {
    let repo = repo().await;
    let list_id = repo.create_list(&sample_list("Games")).await.unwrap();
    repo.create_entry(&ListEntry::new(
        list_id,
        EntryType::Executable,
        PatternType::Exact,
        "game.exe",
    ))
    .await
    .unwrap();
    let rule_id = repo
        .create_quota_rule(&QuotaRule {
            id: 0,
            list_id,
            name: "daily".to_owned(),
            quota_type: QuotaType::Daily,
            limit_seconds: 3600,
            enabled: true,
        })
        .await
        .unwrap();
    let window = Utc.with_ymd_and_hms(2026, 3, 11, 0, 0, 0).unwrap();
    repo.quota_usage_upsert(rule_id, window, 10).await.unwrap();

    repo.delete_list(list_id).await.unwrap();

    assert!(repo.entries_by_list(list_id).await.unwrap().is_empty());
    assert!(repo.quota_rules_enabled().await.unwrap().is_empty());
    assert_eq!(repo.quota_usage(rule_id, window).await.unwrap(), 0);
}

#[tokio::test]
async fn time_rule_round_trip_preserves_days_and_times() {
    let repo = repo().await;
    let list_id = repo.create_list(&sample_list("School")).await.unwrap();
    let rule = TimeRule {
        id: 0,
        list_id,
        name: "school hours".to_owned(),
        rule_type: TimeRuleType::AllowDuring,
        days: WeekdaySet::from_days(&[1, 2, 3, 4, 5]),
        start: TimeOfDay::parse("09:00").unwrap(),
        end: TimeOfDay::parse("15:00").unwrap(),
        enabled: true,
    };
    let rule_id = repo.create_time_rule(&rule).await.unwrap();

    let rules = repo.time_rules_enabled().await.unwrap();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].id, rule_id);
    assert_eq!(rules[0].days.days(), vec![1, 2, 3, 4, 5]);
    assert_eq!(rules[0].start.to_string(), "09:00");
    assert_eq!(rules[0].end.to_string(), "15:00");

    let mut disabled = rules[0].clone();
    disabled.enabled = false;
    repo.update_time_rule(&disabled).await.unwrap();
    assert!(repo.time_rules_enabled().await.unwrap().is_empty());
}

#[tokio::test]
async fn quota_usage_upsert_replaces_the_window_row() {
    let repo = repo().await;
    let list_id = repo.create_list(&sample_list("Social")).await.unwrap();
    let rule_id = repo
        .create_quota_rule(&QuotaRule {
            id: 0,
            list_id,
            name: "daily".to_owned(),
            quota_type: QuotaType::Daily,
            limit_seconds: 3600,
            enabled: true,
        })
        .await
        .unwrap();

    let window = Utc.with_ymd_and_hms(2026, 3, 11, 0, 0, 0).unwrap();
    assert_eq!(repo.quota_usage(rule_id, window).await.unwrap(), 0);

    repo.quota_usage_upsert(rule_id, window, 100).await.unwrap();
    repo.quota_usage_upsert(rule_id, window, 250).await.unwrap();
    assert_eq!(repo.quota_usage(rule_id, window).await.unwrap(), 250);

    // A different window is a separate row.
    let next = Utc.with_ymd_and_hms(2026, 3, 12, 0, 0, 0).unwrap();
    repo.quota_usage_upsert(rule_id, next, 5).await.unwrap();
    assert_eq!(repo.quota_usage(rule_id, window).await.unwrap(), 250);
    assert_eq!(repo.quota_usage(rule_id, next).await.unwrap(), 5);
}

#[tokio::test]
async fn audit_events_round_trip_newest_first() {
    let repo = repo().await;
    let base = Utc.with_ymd_and_hms(2026, 3, 11, 10, 0, 0).unwrap();

    for (i, kind) in [
        AuditKind::ProcessBlocked,
        AuditKind::DnsBlocked,
        AuditKind::CompileError,
    ]
    .into_iter()
    .enumerate()
    {
        let event = AuditEvent::new(base + chrono::Duration::seconds(i as i64), kind, "details")
            .with_subject(EntryType::Executable, "game.exe")
            .with_action(Action::Block)
            .with_rule_ref(Some(1), Some(2));
        repo.audit_append(&event).await.unwrap();
    }

    let events = repo.audit_events_since(base, 10).await.unwrap();
    assert_eq!(events.len(), 3);
    assert_eq!(events[0].kind, AuditKind::CompileError);
    assert_eq!(events[2].kind, AuditKind::ProcessBlocked);
    assert_eq!(events[2].subject_value.as_deref(), Some("game.exe"));
    assert_eq!(events[2].action, Some(Action::Block));
    assert_eq!(events[2].list_id, Some(1));

    // Limit caps the result set.
    let events = repo.audit_events_since(base, 2).await.unwrap();
    assert_eq!(events.len(), 2);

    // Cutoff excludes older events.
    let events = repo
        .audit_events_since(base + chrono::Duration::seconds(2), 10)
        .await
        .unwrap();
    assert_eq!(events.len(), 1);
}
