//! The DNS filter: listener loops and the per-query pipeline.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use warden_application::{DecisionEngine, QuotaTracker, RuleSet};
use warden_domain::entities::{AuditEvent, AuditKind, EntryType};
use warden_domain::error::Result;
use warden_domain::ports::{Clock, Notifier, NotifierEvent, PolicyRepository};
use warden_domain::value_objects::Subject;
use warden_infrastructure::config::DnsConfig;

use super::cache::{DecisionCache, Lookup, Verdict};
use super::codec::{self, ParsedQuery, SinkholeAddrs};
use super::upstream::DnsUpstream;
use crate::stats::CoreCounters;

/// TTL on sinkhole answers, independent of the decision cache's retention.
const SINKHOLE_TTL: u32 = 60;
/// Largest UDP query the filter accepts.
const MAX_QUERY_LEN: usize = 4096;
/// Listener restart backoff bounds.
const BACKOFF_INITIAL: Duration = Duration::from_millis(100);
const BACKOFF_CAP: Duration = Duration::from_secs(30);
/// Continuous listener failure longer than this is fatal.
const MAX_LISTENER_RESTART_WINDOW: Duration = Duration::from_secs(300);

/// Exponential backoff with a failure window.
struct Backoff {
    delay: Duration,
    failing_since: Option<Instant>,
}

impl Backoff {
    fn new() -> Self {
        Self {
            delay: BACKOFF_INITIAL,
            failing_since: None,
        }
    }

    fn on_success(&mut self) {
        self.delay = BACKOFF_INITIAL;
        self.failing_since = None;
    }

    /// The delay before the next attempt, or `None` once the failure
    /// window is exhausted.
    fn on_failure(&mut self, now: Instant) -> Option<Duration> {
        let since = *self.failing_since.get_or_insert(now);
        if now.duration_since(since) > MAX_LISTENER_RESTART_WINDOW {
            return None;
        }
        let delay = self.delay;
        self.delay = (self.delay * 2).min(BACKOFF_CAP);
        Some(delay)
    }
}

/// The DNS filter. Cheap to share; all state is internally synchronized.
pub struct DnsFilter {
    config: DnsConfig,
    rules: Arc<ArcSwap<RuleSet>>,
    cache: DecisionCache,
    upstream: Arc<dyn DnsUpstream>,
    quota: Arc<QuotaTracker>,
    repo: Arc<dyn PolicyRepository>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    counters: Arc<CoreCounters>,
}

impl DnsFilter {
    /// Assemble a filter from its collaborators.
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        config: DnsConfig,
        rules: Arc<ArcSwap<RuleSet>>,
        upstream: Arc<dyn DnsUpstream>,
        quota: Arc<QuotaTracker>,
        repo: Arc<dyn PolicyRepository>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        counters: Arc<CoreCounters>,
    ) -> Self {
        Self {
            cache: DecisionCache::new(config.cache_max_entries),
            config,
            rules,
            upstream,
            quota,
            repo,
            notifier,
            clock,
            counters,
        }
    }

    /// Run every configured listener until cancellation.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut tasks = Vec::new();

        let addrs: Vec<SocketAddr> = std::iter::once(self.config.listen_addr)
            .chain(self.config.listen_addr_v6)
            .collect();
        for addr in &addrs {
            let filter = Arc::clone(&self);
            let token = cancel.clone();
            let addr = *addr;
            tasks.push(tokio::spawn(async move {
                filter.supervise_udp(addr, token).await;
            }));
        }
        if self.config.listen_tcp {
            for addr in addrs {
                let filter = Arc::clone(&self);
                let token = cancel.clone();
                tasks.push(tokio::spawn(async move {
                    filter.supervise_tcp(addr, token).await;
                }));
            }
        }

        cancel.cancelled().await;
        for task in tasks {
            let _ = task.await;
        }
    }

    async fn supervise_udp(self: Arc<Self>, addr: SocketAddr, cancel: CancellationToken) {
        let mut backoff = Backoff::new();
        while !cancel.is_cancelled() {
            match self.run_udp(addr, &cancel, &mut backoff).await {
                Ok(()) => return,
                Err(e) => {
                    warn!(%addr, error = %e, "udp listener failed");
                    if !self.backoff_or_die(&mut backoff, "udp", addr, &cancel).await {
                        return;
                    }
                }
            }
        }
    }

    async fn supervise_tcp(self: Arc<Self>, addr: SocketAddr, cancel: CancellationToken) {
        let mut backoff = Backoff::new();
        while !cancel.is_cancelled() {
            match self.run_tcp(addr, &cancel, &mut backoff).await {
                Ok(()) => return,
                Err(e) => {
                    warn!(%addr, error = %e, "tcp listener failed");
                    if !self.backoff_or_die(&mut backoff, "tcp", addr, &cancel).await {
                        return;
                    }
                }
            }
        }
    }

    /// Sleep out the backoff delay; false once the window is exhausted,
    /// after raising the fatal service event.
    async fn backoff_or_die(
        &self,
        backoff: &mut Backoff,
        proto: &str,
        addr: SocketAddr,
        cancel: &CancellationToken,
    ) -> bool {
        match backoff.on_failure(self.clock.monotonic()) {
            Some(delay) => {
                tokio::select! {
                    () = tokio::time::sleep(delay) => true,
                    () = cancel.cancelled() => false,
                }
            }
            None => {
                self.notifier
                    .emit(NotifierEvent::ServiceFatal {
                        message: format!("{proto} listener on {addr} could not be restarted"),
                    })
                    .await;
                false
            }
        }
    }

    async fn run_udp(
        self: &Arc<Self>,
        addr: SocketAddr,
        cancel: &CancellationToken,
        backoff: &mut Backoff,
    ) -> Result<()> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        backoff.on_success();
        info!(%addr, "dns filter listening (udp)");
        let mut buf = vec![0u8; MAX_QUERY_LEN];
        loop {
            tokio::select! {
                () = cancel.cancelled() => return Ok(()),
                received = socket.recv_from(&mut buf) => {
                    let (len, peer) = received?;
                    let raw = buf[..len].to_vec();
                    let filter = Arc::clone(self);
                    let socket = Arc::clone(&socket);
                    tokio::spawn(async move {
                        if let Some(response) = filter.handle_query(raw, peer.ip()).await {
                            if let Err(e) = socket.send_to(&response, peer).await {
                                debug!(%peer, error = %e, "udp send failed");
                            }
                        }
                    });
                }
            }
        }
    }

    async fn run_tcp(
        self: &Arc<Self>,
        addr: SocketAddr,
        cancel: &CancellationToken,
        backoff: &mut Backoff,
    ) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        backoff.on_success();
        info!(%addr, "dns filter listening (tcp)");
        loop {
            tokio::select! {
                () = cancel.cancelled() => return Ok(()),
                accepted = listener.accept() => {
                    let (stream, peer) = accepted?;
                    let filter = Arc::clone(self);
                    let token = cancel.clone();
                    tokio::spawn(async move {
                        if let Err(e) = filter.serve_tcp_connection(stream, peer.ip(), token).await {
                            debug!(%peer, error = %e, "tcp connection closed");
                        }
                    });
                }
            }
        }
    }

    /// Serve length-framed queries on one connection until the peer goes
    /// quiet or cancellation.
    async fn serve_tcp_connection(
        &self,
        mut stream: TcpStream,
        client: IpAddr,
        cancel: CancellationToken,
    ) -> Result<()> {
        let idle = self.config.response_deadline() * 2;
        loop {
            let mut len_buf = [0u8; 2];
            tokio::select! {
                () = cancel.cancelled() => return Ok(()),
                read = tokio::time::timeout(idle, stream.read_exact(&mut len_buf)) => {
                    match read {
                        Ok(Ok(_)) => {}
                        // Quiet or closed peer ends the connection.
                        Ok(Err(_)) | Err(_) => return Ok(()),
                    }
                    let len = u16::from_be_bytes(len_buf) as usize;
                    if len == 0 || len > MAX_QUERY_LEN {
                        return Ok(());
                    }
                    let mut raw = vec![0u8; len];
                    stream.read_exact(&mut raw).await?;
                    if let Some(response) = self.handle_query(raw, client).await {
                        stream.write_all(&(response.len() as u16).to_be_bytes()).await?;
                        stream.write_all(&response).await?;
                    }
                }
            }
        }
    }

    /// The full pipeline for one raw query. `None` means drop (the
    /// message was too mangled to even extract a transaction id).
    pub async fn handle_query(&self, raw: Vec<u8>, client: IpAddr) -> Option<Vec<u8>> {
        let query = match codec::parse_query(&raw) {
            Ok(query) => query,
            Err(e) => {
                debug!(error = %e, "unparseable query");
                return e
                    .id
                    .map(|id| codec::build_error_response(id, None, codec::RCODE_FORMERR));
            }
        };
        self.counters
            .dns_queries
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        // Whitelisted clients bypass filtering entirely.
        if self.config.emergency_whitelist.contains(&client) {
            return Some(self.forward_unfiltered(&query, &raw).await);
        }

        let deadline = self.config.response_deadline();
        let verdict = match tokio::time::timeout(deadline, self.resolve(&query, &raw)).await {
            Ok(verdict) => verdict,
            Err(_) => {
                debug!(qname = %query.qname, "query deadline exceeded");
                Verdict::Failed
            }
        };
        Some(self.render(&query, &verdict))
    }

    async fn forward_unfiltered(&self, query: &ParsedQuery, raw: &[u8]) -> Vec<u8> {
        match self.upstream.forward(raw).await {
            Ok(response) => response,
            Err(e) => {
                debug!(qname = %query.qname, error = %e, "unfiltered forward failed");
                self.counters
                    .dns_upstream_failures
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                codec::build_error_response(query.id, Some(query), codec::RCODE_SERVFAIL)
            }
        }
    }

    /// Resolve through the cache, becoming the single-flight leader on a
    /// miss. The rule snapshot is loaded once; an in-flight query keeps
    /// deciding against the snapshot it started with.
    async fn resolve(&self, query: &ParsedQuery, raw: &[u8]) -> Verdict {
        use std::sync::atomic::Ordering;

        let rules = self.rules.load_full();
        let key = (query.qname.clone(), query.qtype);
        let now = self.clock.monotonic();

        let guard = match self.cache.lookup(&key, now, rules.generation) {
            Lookup::Hit(verdict) => {
                self.counters.dns_cache_hits.fetch_add(1, Ordering::Relaxed);
                return verdict;
            }
            Lookup::Wait(mut rx) => {
                self.counters.dns_cache_misses.fetch_add(1, Ordering::Relaxed);
                return rx.recv().await.unwrap_or(Verdict::Failed);
            }
            Lookup::Miss(guard) => {
                self.counters.dns_cache_misses.fetch_add(1, Ordering::Relaxed);
                guard
            }
        };

        let subject = Subject::host(query.qname.as_str());
        let decision = DecisionEngine::decide(
            &subject,
            &rules,
            &self.clock.now_local(),
            self.config.block_unknown,
        );
        self.counters.record_decision(decision.action);

        if decision.is_block() {
            self.audit_block(query, &decision).await;
            self.notifier
                .emit(NotifierEvent::SubjectBlocked {
                    subject,
                    list_id: decision.list_id,
                })
                .await;
            return guard.complete_blocked(
                decision,
                rules.generation,
                self.config.decision_cache_ttl(),
                now,
            );
        }

        // Allowed: charge quota if configured, then forward.
        let charge = self.config.quota_charge_per_query_secs;
        if charge > 0 {
            let now_local = self.clock.now_local();
            for rule in rules.quota_rules_matching(&subject) {
                self.quota.add(rule.id, charge, &now_local);
            }
        }

        match self.upstream.forward(raw).await {
            Ok(response) => {
                let ttl_secs =
                    u64::from(codec::response_min_ttl(&response).unwrap_or(0))
                        .min(self.config.cache_ttl_secs);
                guard.complete_upstream(response, Duration::from_secs(ttl_secs), now)
            }
            Err(e) => {
                debug!(qname = %query.qname, error = %e, "all upstreams failed");
                self.counters
                    .dns_upstream_failures
                    .fetch_add(1, Ordering::Relaxed);
                guard.fail()
            }
        }
    }

    fn render(&self, query: &ParsedQuery, verdict: &Verdict) -> Vec<u8> {
        match verdict {
            Verdict::Upstream(response) => {
                let mut bytes = response.as_ref().clone();
                codec::patch_id(&mut bytes, query.id);
                bytes
            }
            Verdict::Blocked(_) => {
                self.counters
                    .dns_blocks
                    .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                let addrs = SinkholeAddrs {
                    ipv4: self.config.block_ipv4,
                    ipv6: self.config.block_ipv6,
                };
                codec::build_sinkhole_response(query, addrs, SINKHOLE_TTL)
            }
            Verdict::Failed => {
                codec::build_error_response(query.id, Some(query), codec::RCODE_SERVFAIL)
            }
        }
    }

    async fn audit_block(&self, query: &ParsedQuery, decision: &warden_domain::value_objects::Decision) {
        let event = AuditEvent::new(
            self.clock.now_utc(),
            AuditKind::DnsBlocked,
            format!("dns query blocked ({})", decision.reason.as_str()),
        )
        .with_subject(EntryType::Url, query.qname.as_str())
        .with_action(decision.action)
        .with_rule_ref(decision.list_id, decision.rule_id);
        if let Err(e) = self.repo.audit_append(&event).await {
            warn!(error = %e, "failed to append dns_blocked audit event");
        }
    }

    /// Cached entries currently held; exposed for stats and tests.
    #[must_use]
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }
}
