//! Per-qname decision cache with single-flight population.
//!
//! Allowed (upstream) answers and blocked verdicts are stored separately:
//! blocked entries are tagged with the rule-set generation that produced
//! them, so a generation bump invalidates every block lazily on lookup
//! without purging legitimate upstream answers. Eviction is LRU over both
//! stores under a hard entry cap.
//!
//! Concurrent misses for one key coalesce: the first requester becomes
//! the leader and resolves upstream; followers await the leader's verdict
//! on a broadcast channel. A leader that fails (or is dropped mid-flight)
//! fails its followers to SERVFAIL rather than leaving them hanging.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio::sync::broadcast;
use warden_domain::value_objects::Decision;

/// Cache key: normalized qname plus query type.
pub type CacheKey = (String, u16);

/// The resolution of one (qname, qtype).
#[derive(Debug, Clone)]
pub enum Verdict {
    /// Serve this upstream response (transaction id patched per client)
    Upstream(Arc<Vec<u8>>),
    /// Build a sinkhole response citing this decision
    Blocked(Arc<Decision>),
    /// Resolution failed; respond SERVFAIL
    Failed,
}

/// Outcome of a cache lookup.
pub enum Lookup {
    /// Cached verdict, serve immediately
    Hit(Verdict),
    /// Caller is the single-flight leader and must resolve, then call one
    /// of the guard's completion methods
    Miss(SingleflightGuard),
    /// Another task is resolving this key; await its verdict
    Wait(broadcast::Receiver<Verdict>),
}

struct AllowedEntry {
    response: Arc<Vec<u8>>,
    expires_at: Instant,
    stamp: u64,
}

struct BlockedEntry {
    decision: Arc<Decision>,
    generation: u64,
    expires_at: Instant,
    stamp: u64,
}

#[derive(Default)]
struct Inner {
    allowed: HashMap<CacheKey, AllowedEntry>,
    blocked: HashMap<CacheKey, BlockedEntry>,
    /// Recency index over both stores; lowest stamp is evicted first.
    order: BTreeMap<u64, CacheKey>,
    next_stamp: u64,
    inflight: HashMap<CacheKey, broadcast::Sender<Verdict>>,
}

impl Inner {
    /// Move a key to the most-recent end of the order index.
    fn bump(&mut self, old_stamp: u64, key: &CacheKey) -> u64 {
        self.order.remove(&old_stamp);
        self.next_stamp += 1;
        self.order.insert(self.next_stamp, key.clone());
        self.next_stamp
    }

    fn remove(&mut self, key: &CacheKey) {
        if let Some(e) = self.allowed.remove(key) {
            self.order.remove(&e.stamp);
        }
        if let Some(e) = self.blocked.remove(key) {
            self.order.remove(&e.stamp);
        }
    }

    fn evict_to_cap(&mut self, cap: usize) {
        while self.allowed.len() + self.blocked.len() >= cap.max(1) {
            let Some((&stamp, _)) = self.order.iter().next() else {
                break;
            };
            let Some(key) = self.order.remove(&stamp) else {
                break;
            };
            self.allowed.remove(&key);
            self.blocked.remove(&key);
        }
    }

    fn insert_order(&mut self, key: CacheKey) -> u64 {
        self.next_stamp += 1;
        self.order.insert(self.next_stamp, key);
        self.next_stamp
    }
}

/// Mutex-guarded LRU decision cache with single-flight population.
pub struct DecisionCache {
    inner: Arc<Mutex<Inner>>,
    cap: usize,
}

impl DecisionCache {
    /// Create a cache holding at most `cap` entries.
    #[must_use]
    pub fn new(cap: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            cap,
        }
    }

    /// Look a key up, becoming the single-flight leader on a miss.
    ///
    /// A blocked entry whose generation differs from `current_generation`
    /// is treated as a miss and dropped; allowed entries survive
    /// generation changes until their TTL expires.
    pub fn lookup(&self, key: &CacheKey, now: Instant, current_generation: u64) -> Lookup {
        let mut inner = self.lock();

        let blocked_state = inner.blocked.get(key).map(|e| {
            (
                e.generation == current_generation && e.expires_at > now,
                e.stamp,
                Arc::clone(&e.decision),
            )
        });
        match blocked_state {
            Some((true, old_stamp, decision)) => {
                let stamp = inner.bump(old_stamp, key);
                if let Some(e) = inner.blocked.get_mut(key) {
                    e.stamp = stamp;
                }
                return Lookup::Hit(Verdict::Blocked(decision));
            }
            Some((false, ..)) => inner.remove(key),
            None => {}
        }

        let allowed_state = inner
            .allowed
            .get(key)
            .map(|e| (e.expires_at > now, e.stamp, Arc::clone(&e.response)));
        match allowed_state {
            Some((true, old_stamp, response)) => {
                let stamp = inner.bump(old_stamp, key);
                if let Some(e) = inner.allowed.get_mut(key) {
                    e.stamp = stamp;
                }
                return Lookup::Hit(Verdict::Upstream(response));
            }
            Some((false, ..)) => inner.remove(key),
            None => {}
        }

        if let Some(sender) = inner.inflight.get(key) {
            return Lookup::Wait(sender.subscribe());
        }

        let (tx, _rx) = broadcast::channel(1);
        inner.inflight.insert(key.clone(), tx.clone());
        Lookup::Miss(SingleflightGuard {
            inner: Arc::clone(&self.inner),
            key: key.clone(),
            tx,
            cap: self.cap,
            completed: false,
        })
    }

    /// Entries currently cached (both stores).
    #[must_use]
    pub fn len(&self) -> usize {
        let inner = self.lock();
        inner.allowed.len() + inner.blocked.len()
    }

    /// Whether the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Leader handle for one in-flight key. Exactly one completion method
/// should be called; dropping the guard uncompleted fails the followers.
pub struct SingleflightGuard {
    inner: Arc<Mutex<Inner>>,
    key: CacheKey,
    tx: broadcast::Sender<Verdict>,
    cap: usize,
    completed: bool,
}

impl SingleflightGuard {
    /// Publish an upstream response and cache it until `ttl` elapses.
    pub fn complete_upstream(mut self, response: Vec<u8>, ttl: Duration, now: Instant) -> Verdict {
        let response = Arc::new(response);
        let mut inner = self.lock();
        inner.inflight.remove(&self.key);
        inner.remove(&self.key);
        inner.evict_to_cap(self.cap);
        let stamp = inner.insert_order(self.key.clone());
        inner.allowed.insert(
            self.key.clone(),
            AllowedEntry {
                response: Arc::clone(&response),
                expires_at: now + ttl,
                stamp,
            },
        );
        drop(inner);
        self.completed = true;
        let verdict = Verdict::Upstream(response);
        let _ = self.tx.send(verdict.clone());
        verdict
    }

    /// Publish a block verdict tagged with the generation that produced
    /// it and cache it until `ttl` elapses.
    pub fn complete_blocked(
        mut self,
        decision: Decision,
        generation: u64,
        ttl: Duration,
        now: Instant,
    ) -> Verdict {
        let decision = Arc::new(decision);
        let mut inner = self.lock();
        inner.inflight.remove(&self.key);
        inner.remove(&self.key);
        inner.evict_to_cap(self.cap);
        let stamp = inner.insert_order(self.key.clone());
        inner.blocked.insert(
            self.key.clone(),
            BlockedEntry {
                decision: Arc::clone(&decision),
                generation,
                expires_at: now + ttl,
                stamp,
            },
        );
        drop(inner);
        self.completed = true;
        let verdict = Verdict::Blocked(decision);
        let _ = self.tx.send(verdict.clone());
        verdict
    }

    /// Publish failure to the followers without caching anything.
    pub fn fail(mut self) -> Verdict {
        self.complete_with_failure();
        Verdict::Failed
    }

    fn complete_with_failure(&mut self) {
        let mut inner = self.lock();
        inner.inflight.remove(&self.key);
        drop(inner);
        self.completed = true;
        let _ = self.tx.send(Verdict::Failed);
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Drop for SingleflightGuard {
    fn drop(&mut self) {
        if !self.completed {
            self.complete_with_failure();
        }
    }
}
