//! Decision cache: LRU, generation invalidation, single-flight.

use std::sync::Arc;
use std::time::{Duration, Instant};

use warden_domain::value_objects::{Decision, DecisionReason};
use warden_server::dns::{DecisionCache, Lookup, Verdict};

const TTL: Duration = Duration::from_secs(60);

fn key(name: &str) -> (String, u16) {
    (name.to_owned(), 1)
}

fn block_decision() -> Decision {
    Decision::block(DecisionReason::BlacklistMember).citing_list(1, "Blocked")
}

/// Resolve a miss as the leader with an upstream answer.
fn prime_upstream(cache: &DecisionCache, name: &str, payload: &[u8], now: Instant, generation: u64) {
    match cache.lookup(&key(name), now, generation) {
        Lookup::Miss(guard) => {
            guard.complete_upstream(payload.to_vec(), TTL, now);
        }
        _ => panic!("expected a miss for {name}"),
    }
}

fn prime_blocked(cache: &DecisionCache, name: &str, now: Instant, generation: u64) {
    match cache.lookup(&key(name), now, generation) {
        Lookup::Miss(guard) => {
            guard.complete_blocked(block_decision(), generation, TTL, now);
        }
        _ => panic!("expected a miss for {name}"),
    }
}

#[test]
fn upstream_entries_hit_until_expiry() {
    let cache = DecisionCache::new(16);
    let now = Instant::now();
    prime_upstream(&cache, "a.example", b"answer", now, 1);

    match cache.lookup(&key("a.example"), now + Duration::from_secs(59), 1) {
        Lookup::Hit(Verdict::Upstream(bytes)) => assert_eq!(bytes.as_slice(), b"answer"),
        _ => panic!("expected a hit"),
    }

    // Past the TTL the entry is a miss again.
    match cache.lookup(&key("a.example"), now + Duration::from_secs(61), 1) {
        Lookup::Miss(guard) => drop(guard),
        _ => panic!("expected a miss after expiry"),
    }
}

#[test]
fn blocked_entries_die_with_their_generation() {
    let cache = DecisionCache::new(16);
    let now = Instant::now();
    prime_blocked(&cache, "ads.example", now, 3);
    prime_upstream(&cache, "ok.example", b"answer", now, 3);

    // Same generation: the block is served from cache.
    assert!(matches!(
        cache.lookup(&key("ads.example"), now, 3),
        Lookup::Hit(Verdict::Blocked(_))
    ));

    // Generation bump: the block entry is a miss, the upstream answer
    // survives.
    match cache.lookup(&key("ads.example"), now, 4) {
        Lookup::Miss(guard) => drop(guard),
        _ => panic!("stale-generation block must read as a miss"),
    }
    assert!(matches!(
        cache.lookup(&key("ok.example"), now, 4),
        Lookup::Hit(Verdict::Upstream(_))
    ));
}

#[test]
fn lru_evicts_the_least_recently_used_entry() {
    let cache = DecisionCache::new(2);
    let now = Instant::now();
    prime_upstream(&cache, "a", b"a", now, 1);
    prime_upstream(&cache, "b", b"b", now, 1);

    // Touch "a" so "b" is the coldest.
    assert!(matches!(
        cache.lookup(&key("a"), now, 1),
        Lookup::Hit(Verdict::Upstream(_))
    ));

    prime_upstream(&cache, "c", b"c", now, 1);

    assert!(matches!(
        cache.lookup(&key("a"), now, 1),
        Lookup::Hit(Verdict::Upstream(_))
    ));
    match cache.lookup(&key("b"), now, 1) {
        Lookup::Miss(guard) => drop(guard),
        _ => panic!("coldest entry should have been evicted"),
    }
    assert!(matches!(
        cache.lookup(&key("c"), now, 1),
        Lookup::Hit(Verdict::Upstream(_))
    ));
}

#[tokio::test]
async fn concurrent_misses_coalesce_behind_one_leader() {
    let cache = Arc::new(DecisionCache::new(16));
    let now = Instant::now();

    let leader = match cache.lookup(&key("x.example"), now, 1) {
        Lookup::Miss(guard) => guard,
        _ => panic!("expected a miss"),
    };

    // Followers arriving while the leader is out get a wait handle.
    let mut waiters = Vec::new();
    for _ in 0..3 {
        match cache.lookup(&key("x.example"), now, 1) {
            Lookup::Wait(rx) => waiters.push(rx),
            _ => panic!("expected to wait on the leader"),
        }
    }

    leader.complete_upstream(b"shared".to_vec(), TTL, now);

    for mut rx in waiters {
        match rx.recv().await {
            Ok(Verdict::Upstream(bytes)) => assert_eq!(bytes.as_slice(), b"shared"),
            other => panic!("expected the leader's answer, got {other:?}"),
        }
    }
}

#[tokio::test]
async fn dropped_leader_fails_its_followers() {
    let cache = Arc::new(DecisionCache::new(16));
    let now = Instant::now();

    let leader = match cache.lookup(&key("y.example"), now, 1) {
        Lookup::Miss(guard) => guard,
        _ => panic!("expected a miss"),
    };
    let mut rx = match cache.lookup(&key("y.example"), now, 1) {
        Lookup::Wait(rx) => rx,
        _ => panic!("expected to wait"),
    };

    drop(leader);

    assert!(matches!(rx.recv().await, Ok(Verdict::Failed)));
    // Nothing was cached; the next lookup is a fresh miss.
    match cache.lookup(&key("y.example"), now, 1) {
        Lookup::Miss(guard) => drop(guard),
        _ => panic!("failure must not be cached"),
    }
}

#[test]
fn failed_leader_does_not_pollute_the_cache() {
    let cache = DecisionCache::new(16);
    let now = Instant::now();
    match cache.lookup(&key("z.example"), now, 1) {
        Lookup::Miss(guard) => {
            guard.fail();
        }
        _ => panic!("expected a miss"),
    }
    assert!(cache.is_empty());
}
