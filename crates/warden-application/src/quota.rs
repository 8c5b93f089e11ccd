//! Usage accumulation with write-back persistence.
//!
//! The in-memory counter is authoritative for decisions; persistence
//! trails it through a coalescing write-back queue drained by one
//! background worker. Loss on crash is bounded by the flush interval.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use warden_domain::entities::{ListId, QuotaRule, QuotaRuleId, QuotaType};
use warden_domain::ports::{Notifier, NotifierEvent, PolicyRepository};
use warden_domain::value_objects::QuotaWindowStat;

use crate::windows;

/// Notification thresholds, as fractions of the limit.
const THRESHOLDS: [f64; 3] = [0.75, 0.90, 1.00];

/// One rule's active window state.
struct RuleWindow {
    list_id: ListId,
    quota_type: QuotaType,
    limit_seconds: u64,
    window_start: DateTime<Utc>,
    used: Arc<AtomicU64>,
    /// Bitmask over [`THRESHOLDS`]; a set bit has fired this window.
    fired: u8,
}

enum WriteBack {
    Usage {
        rule_id: QuotaRuleId,
        window_start: DateTime<Utc>,
        used_seconds: u64,
    },
    Threshold(NotifierEvent),
}

/// Per-rule usage accounting for the current quota windows.
///
/// `add` operations for a single rule are serialized by the interior
/// mutex; observers see increments in program order. Critical sections
/// are O(1).
pub struct QuotaTracker {
    table: Mutex<HashMap<QuotaRuleId, RuleWindow>>,
    tx: mpsc::UnboundedSender<WriteBack>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<WriteBack>>>,
    flush_interval: Duration,
}

impl QuotaTracker {
    /// Create a tracker whose write-back worker flushes at least every
    /// `flush_interval`.
    #[must_use]
    pub fn new(flush_interval: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            table: Mutex::new(HashMap::new()),
            tx,
            rx: Mutex::new(Some(rx)),
            flush_interval,
        }
    }

    /// Register (or re-register) a rule's current window, seeding the
    /// counter from persistence when the window is new. When the tracker
    /// already holds the same window, the in-memory value wins: it is at
    /// least as fresh as anything persisted. Returns the live counter for
    /// embedding in a compiled rule set.
    pub fn register_window(
        &self,
        rule: &QuotaRule,
        window_start: DateTime<Utc>,
        persisted_used: u64,
    ) -> Arc<AtomicU64> {
        let mut table = self.lock_table();
        match table.get_mut(&rule.id) {
            Some(entry) if entry.window_start == window_start => {
                entry.limit_seconds = rule.limit_seconds;
                entry.list_id = rule.list_id;
                entry.quota_type = rule.quota_type;
                Arc::clone(&entry.used)
            }
            _ => {
                let used = Arc::new(AtomicU64::new(persisted_used));
                table.insert(
                    rule.id,
                    RuleWindow {
                        list_id: rule.list_id,
                        quota_type: rule.quota_type,
                        limit_seconds: rule.limit_seconds,
                        window_start,
                        used: Arc::clone(&used),
                        fired: 0,
                    },
                );
                used
            }
        }
    }

    /// Drop state for rules no longer present in the compiled set.
    pub fn retain_rules(&self, keep: &[QuotaRuleId]) {
        self.lock_table().retain(|id, _| keep.contains(id));
    }

    /// Attribute `delta_seconds` of observed activity to a rule.
    ///
    /// A zero delta is a no-op: nothing changes and nothing is enqueued.
    /// When `now` falls outside the stored window the counter rolls: it
    /// resets to zero, threshold state clears and a row for the new window
    /// is created on the next flush; the prior row is left intact.
    pub fn add<Tz: TimeZone>(&self, rule_id: QuotaRuleId, delta_seconds: u64, now: &DateTime<Tz>) {
        if delta_seconds == 0 {
            return;
        }

        let mut table = self.lock_table();
        let Some(entry) = table.get_mut(&rule_id) else {
            debug!(rule_id, "usage delta for untracked quota rule dropped");
            return;
        };

        let current_window = windows::window_start(entry.quota_type, now);
        if current_window != entry.window_start {
            entry.window_start = current_window;
            entry.used.store(0, Ordering::Relaxed);
            entry.fired = 0;
        }

        let before = entry.used.fetch_add(delta_seconds, Ordering::Relaxed);
        let after = before + delta_seconds;

        let _ = self.tx.send(WriteBack::Usage {
            rule_id,
            window_start: entry.window_start,
            used_seconds: after,
        });

        for (i, threshold) in THRESHOLDS.iter().enumerate() {
            let bit = 1u8 << i;
            if entry.fired & bit != 0 {
                continue;
            }
            let mark = entry.limit_seconds as f64 * threshold;
            if (before as f64) < mark && (after as f64) >= mark {
                entry.fired |= bit;
                let _ = self.tx.send(WriteBack::Threshold(
                    NotifierEvent::QuotaThreshold {
                        rule_id,
                        list_id: entry.list_id,
                        threshold: *threshold,
                        used_seconds: after,
                        limit_seconds: entry.limit_seconds,
                        window_start: entry.window_start,
                    },
                ));
            }
        }
    }

    /// Current-window usage for a rule; zero for an untracked rule or
    /// when `now` has moved past the stored window. Never blocks beyond
    /// the O(1) table lock.
    pub fn get<Tz: TimeZone>(&self, rule_id: QuotaRuleId, now: &DateTime<Tz>) -> u64 {
        let table = self.lock_table();
        let Some(entry) = table.get(&rule_id) else {
            return 0;
        };
        if windows::window_start(entry.quota_type, now) != entry.window_start {
            return 0;
        }
        entry.used.load(Ordering::Relaxed)
    }

    /// Snapshot of every tracked window, ascending by rule id.
    #[must_use]
    pub fn active_windows(&self) -> Vec<QuotaWindowStat> {
        let table = self.lock_table();
        let mut stats: Vec<QuotaWindowStat> = table
            .iter()
            .map(|(id, entry)| QuotaWindowStat {
                rule_id: *id,
                used: entry.used.load(Ordering::Relaxed),
                limit: entry.limit_seconds,
                window_start: entry.window_start,
            })
            .collect();
        stats.sort_by_key(|s| s.rule_id);
        stats
    }

    /// Spawn the write-back worker. Drains the queue, coalescing usage
    /// rows per (rule, window), and flushes at least every flush interval
    /// and once more on cancellation. May be spawned at most once.
    pub fn spawn_worker(
        &self,
        repo: Arc<dyn PolicyRepository>,
        notifier: Arc<dyn Notifier>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let rx = self
            .rx
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .take();
        let flush_interval = self.flush_interval;
        tokio::spawn(async move {
            let Some(rx) = rx else {
                warn!("quota write-back worker already running");
                return;
            };
            write_back_loop(rx, repo, notifier, flush_interval, cancel).await;
        })
    }

    fn lock_table(&self) -> std::sync::MutexGuard<'_, HashMap<QuotaRuleId, RuleWindow>> {
        self.table
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

async fn write_back_loop(
    mut rx: mpsc::UnboundedReceiver<WriteBack>,
    repo: Arc<dyn PolicyRepository>,
    notifier: Arc<dyn Notifier>,
    flush_interval: Duration,
    cancel: CancellationToken,
) {
    let mut pending: HashMap<(QuotaRuleId, DateTime<Utc>), u64> = HashMap::new();
    let mut ticker = tokio::time::interval(flush_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            msg = rx.recv() => match msg {
                Some(WriteBack::Usage { rule_id, window_start, used_seconds }) => {
                    pending.insert((rule_id, window_start), used_seconds);
                }
                Some(WriteBack::Threshold(event)) => notifier.emit(event).await,
                None => break,
            },
            _ = ticker.tick() => flush(&repo, &mut pending).await,
            () = cancel.cancelled() => break,
        }
    }

    // Final drain: coalesce whatever is still queued, then flush once.
    while let Ok(msg) = rx.try_recv() {
        match msg {
            WriteBack::Usage {
                rule_id,
                window_start,
                used_seconds,
            } => {
                pending.insert((rule_id, window_start), used_seconds);
            }
            WriteBack::Threshold(event) => notifier.emit(event).await,
        }
    }
    flush(&repo, &mut pending).await;
    debug!("quota write-back worker stopped");
}

/// Apply pending rows. Failed rows stay pending for the next flush.
async fn flush(
    repo: &Arc<dyn PolicyRepository>,
    pending: &mut HashMap<(QuotaRuleId, DateTime<Utc>), u64>,
) {
    let rows: Vec<_> = pending.drain().collect();
    for ((rule_id, window_start), used) in rows {
        if let Err(e) = repo.quota_usage_upsert(rule_id, window_start, used).await {
            warn!(rule_id, %window_start, error = %e, "quota write-back failed; retrying next flush");
            pending.entry((rule_id, window_start)).or_insert(used);
        }
    }
}
