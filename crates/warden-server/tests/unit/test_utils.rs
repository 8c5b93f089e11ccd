//! Shared fakes for warden-server tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Local, Utc};
use warden_domain::entities::{
    AuditEvent, EntryId, EntryType, List, ListEntry, ListId, ListType, PatternType, QuotaRule,
    QuotaRuleId, TimeRule, TimeRuleId,
};
use warden_domain::error::{Error, Result};
use warden_domain::ports::{
    Clock, Notifier, NotifierEvent, PolicyRepository, ProcessInfo, ProcessSampler,
    ProcessTerminator, TerminateOutcome,
};
use warden_server::dns::DnsUpstream;

// ── Repository ─────────────────────────────────────────────────────

/// In-memory policy repository fake.
#[derive(Default)]
pub struct FakeRepository {
    state: Mutex<RepoState>,
    fail_reads: Mutex<bool>,
}

#[derive(Default)]
struct RepoState {
    lists: Vec<List>,
    entries: Vec<ListEntry>,
    time_rules: Vec<TimeRule>,
    quota_rules: Vec<QuotaRule>,
    usage: HashMap<(QuotaRuleId, DateTime<Utc>), u64>,
    audit: Vec<AuditEvent>,
    next_id: i64,
}

impl FakeRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn audit_events(&self) -> Vec<AuditEvent> {
        self.state.lock().unwrap().audit.clone()
    }

    pub fn set_fail_reads(&self, fail: bool) {
        *self.fail_reads.lock().unwrap() = fail;
    }

    fn check_fail(&self) -> Result<()> {
        if *self.fail_reads.lock().unwrap() {
            return Err(Error::database("injected fault"));
        }
        Ok(())
    }
}

#[async_trait]
impl PolicyRepository for FakeRepository {
    async fn create_list(&self, list: &List) -> Result<ListId> {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = state.next_id;
        let mut list = list.clone();
        list.id = id;
        state.lists.push(list);
        Ok(id)
    }

    async fn get_list(&self, id: ListId) -> Result<List> {
        self.state
            .lock()
            .unwrap()
            .lists
            .iter()
            .find(|l| l.id == id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("list {id}")))
    }

    async fn lists_enabled(&self) -> Result<Vec<List>> {
        self.check_fail()?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .lists
            .iter()
            .filter(|l| l.enabled)
            .cloned()
            .collect())
    }

    async fn lists_all(&self) -> Result<Vec<List>> {
        Ok(self.state.lock().unwrap().lists.clone())
    }

    async fn update_list(&self, list: &List) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        match state.lists.iter_mut().find(|l| l.id == list.id) {
            Some(slot) => {
                *slot = list.clone();
                Ok(())
            }
            None => Err(Error::not_found(format!("list {}", list.id))),
        }
    }

    async fn delete_list(&self, id: ListId) -> Result<()> {
        self.state.lock().unwrap().lists.retain(|l| l.id != id);
        Ok(())
    }

    async fn create_entry(&self, entry: &ListEntry) -> Result<EntryId> {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = state.next_id;
        let mut entry = entry.clone();
        entry.id = id;
        state.entries.push(entry);
        Ok(id)
    }

    async fn entries_by_list(&self, list_id: ListId) -> Result<Vec<ListEntry>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .entries
            .iter()
            .filter(|e| e.list_id == list_id)
            .cloned()
            .collect())
    }

    async fn update_entry(&self, _entry: &ListEntry) -> Result<()> {
        Ok(())
    }

    async fn delete_entry(&self, id: EntryId) -> Result<()> {
        self.state.lock().unwrap().entries.retain(|e| e.id != id);
        Ok(())
    }

    async fn create_time_rule(&self, rule: &TimeRule) -> Result<TimeRuleId> {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = state.next_id;
        let mut rule = rule.clone();
        rule.id = id;
        state.time_rules.push(rule);
        Ok(id)
    }

    async fn time_rules_enabled(&self) -> Result<Vec<TimeRule>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .time_rules
            .iter()
            .filter(|r| r.enabled)
            .cloned()
            .collect())
    }

    async fn update_time_rule(&self, _rule: &TimeRule) -> Result<()> {
        Ok(())
    }

    async fn delete_time_rule(&self, id: TimeRuleId) -> Result<()> {
        self.state.lock().unwrap().time_rules.retain(|r| r.id != id);
        Ok(())
    }

    async fn create_quota_rule(&self, rule: &QuotaRule) -> Result<QuotaRuleId> {
        let mut state = self.state.lock().unwrap();
        state.next_id += 1;
        let id = state.next_id;
        let mut rule = rule.clone();
        rule.id = id;
        state.quota_rules.push(rule);
        Ok(id)
    }

    async fn quota_rules_enabled(&self) -> Result<Vec<QuotaRule>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .quota_rules
            .iter()
            .filter(|r| r.enabled)
            .cloned()
            .collect())
    }

    async fn update_quota_rule(&self, _rule: &QuotaRule) -> Result<()> {
        Ok(())
    }

    async fn delete_quota_rule(&self, id: QuotaRuleId) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .quota_rules
            .retain(|r| r.id != id);
        Ok(())
    }

    async fn quota_usage(&self, rule_id: QuotaRuleId, window_start: DateTime<Utc>) -> Result<u64> {
        Ok(*self
            .state
            .lock()
            .unwrap()
            .usage
            .get(&(rule_id, window_start))
            .unwrap_or(&0))
    }

    async fn quota_usage_upsert(
        &self,
        rule_id: QuotaRuleId,
        window_start: DateTime<Utc>,
        used_seconds: u64,
    ) -> Result<()> {
        self.state
            .lock()
            .unwrap()
            .usage
            .insert((rule_id, window_start), used_seconds);
        Ok(())
    }

    async fn audit_append(&self, event: &AuditEvent) -> Result<()> {
        self.state.lock().unwrap().audit.push(event.clone());
        Ok(())
    }

    async fn audit_events_since(
        &self,
        since: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<AuditEvent>> {
        let mut events: Vec<AuditEvent> = self
            .state
            .lock()
            .unwrap()
            .audit
            .iter()
            .filter(|e| e.timestamp >= since)
            .cloned()
            .collect();
        events.sort_by_key(|e| std::cmp::Reverse(e.timestamp));
        events.truncate(limit as usize);
        Ok(events)
    }
}

// ── Notifier ───────────────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<NotifierEvent>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<NotifierEvent> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn emit(&self, event: NotifierEvent) {
        self.events.lock().unwrap().push(event);
    }
}

// ── Clock ──────────────────────────────────────────────────────────

/// Clock whose monotonic component can be advanced manually; wall time
/// follows the host.
pub struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.offset.lock().unwrap() += by;
    }
}

impl Clock for ManualClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn now_local(&self) -> DateTime<Local> {
        Local::now()
    }

    fn monotonic(&self) -> Instant {
        self.base + *self.offset.lock().unwrap()
    }
}

// ── Sampler & terminator ───────────────────────────────────────────

/// Sampler serving a scripted process table.
#[derive(Default)]
pub struct FakeSampler {
    processes: Mutex<Vec<ProcessInfo>>,
    fail: Mutex<bool>,
}

impl FakeSampler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_processes(&self, processes: Vec<ProcessInfo>) {
        *self.processes.lock().unwrap() = processes;
    }

    pub fn set_fail(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }
}

#[async_trait]
impl ProcessSampler for FakeSampler {
    async fn processes(&self) -> Result<Vec<ProcessInfo>> {
        if *self.fail.lock().unwrap() {
            return Err(Error::sampler("injected sampler fault"));
        }
        Ok(self.processes.lock().unwrap().clone())
    }
}

/// Terminator with a scripted outcome, recording every call.
pub struct FakeTerminator {
    outcome: Mutex<TerminateOutcome>,
    calls: Mutex<Vec<(u32, u64)>>,
}

impl Default for FakeTerminator {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeTerminator {
    pub fn new() -> Self {
        Self {
            outcome: Mutex::new(TerminateOutcome::Terminated),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn set_outcome(&self, outcome: TerminateOutcome) {
        *self.outcome.lock().unwrap() = outcome;
    }

    pub fn calls(&self) -> Vec<(u32, u64)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProcessTerminator for FakeTerminator {
    async fn terminate(&self, pid: u32, start_time: u64) -> TerminateOutcome {
        self.calls.lock().unwrap().push((pid, start_time));
        *self.outcome.lock().unwrap()
    }
}

// ── Upstream ───────────────────────────────────────────────────────

/// Upstream stub: echoes a canned response, optionally failing, with an
/// optional gate so tests can hold a forward in flight.
pub struct StubUpstream {
    response: Mutex<Option<Vec<u8>>>,
    calls: AtomicU32,
    gate: Mutex<Option<tokio::sync::watch::Receiver<bool>>>,
}

impl Default for StubUpstream {
    fn default() -> Self {
        Self::new()
    }
}

impl StubUpstream {
    pub fn new() -> Self {
        Self {
            response: Mutex::new(None),
            calls: AtomicU32::new(0),
            gate: Mutex::new(None),
        }
    }

    /// Serve this raw response to every forward.
    pub fn set_response(&self, response: Vec<u8>) {
        *self.response.lock().unwrap() = Some(response);
    }

    /// Fail every forward.
    pub fn set_failing(&self) {
        *self.response.lock().unwrap() = None;
    }

    /// Block forwards until the sender flips to true.
    pub fn set_gate(&self) -> tokio::sync::watch::Sender<bool> {
        let (tx, rx) = tokio::sync::watch::channel(false);
        *self.gate.lock().unwrap() = Some(rx);
        tx
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DnsUpstream for StubUpstream {
    async fn forward(&self, query: &[u8]) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.gate.lock().unwrap().clone();
        if let Some(mut rx) = gate {
            while !*rx.borrow() {
                if rx.changed().await.is_err() {
                    break;
                }
            }
        }
        match self.response.lock().unwrap().clone() {
            Some(mut response) => {
                // Keep the transaction id consistent with the query.
                if response.len() >= 2 && query.len() >= 2 {
                    response[0..2].copy_from_slice(&query[0..2]);
                }
                Ok(response)
            }
            None => Err(Error::dns("injected upstream failure")),
        }
    }
}

// ── Builders ───────────────────────────────────────────────────────

pub fn list(name: &str, list_type: ListType) -> List {
    List::new(name, list_type, Utc::now())
}

pub fn entry(
    list_id: ListId,
    entry_type: EntryType,
    pattern_type: PatternType,
    pattern: &str,
) -> ListEntry {
    ListEntry::new(list_id, entry_type, pattern_type, pattern)
}

pub fn process(pid: u32, basename: &str, start_time: u64) -> ProcessInfo {
    ProcessInfo {
        pid,
        basename: basename.to_owned(),
        full_path: format!("/usr/bin/{basename}"),
        start_time,
        is_system: false,
    }
}

/// Seed a repository with a blacklist matching one executable and one
/// domain, returning the list id.
pub async fn seed_blacklist(repo: &FakeRepository, exe: &str, domain: &str) -> ListId {
    let id = repo
        .create_list(&list("Blocked", ListType::Blacklist))
        .await
        .unwrap();
    repo.create_entry(&entry(id, EntryType::Executable, PatternType::Exact, exe))
        .await
        .unwrap();
    repo.create_entry(&entry(id, EntryType::Url, PatternType::Domain, domain))
        .await
        .unwrap();
    id
}

// Arc aliases the tests cast through.
pub fn as_repo(repo: &Arc<FakeRepository>) -> Arc<dyn PolicyRepository> {
    Arc::clone(repo) as Arc<dyn PolicyRepository>
}

pub fn as_notifier(notifier: &Arc<RecordingNotifier>) -> Arc<dyn Notifier> {
    Arc::clone(notifier) as Arc<dyn Notifier>
}

pub fn as_clock(clock: &Arc<ManualClock>) -> Arc<dyn Clock> {
    Arc::clone(clock) as Arc<dyn Clock>
}

pub fn as_sampler(sampler: &Arc<FakeSampler>) -> Arc<dyn ProcessSampler> {
    Arc::clone(sampler) as Arc<dyn ProcessSampler>
}

pub fn as_terminator(terminator: &Arc<FakeTerminator>) -> Arc<dyn ProcessTerminator> {
    Arc::clone(terminator) as Arc<dyn ProcessTerminator>
}
