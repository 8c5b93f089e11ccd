//! Upstream forwarding with round-robin failover.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tracing::debug;
use warden_domain::error::{Error, Result};

/// Maximum upstream response the pool will accept.
const MAX_RESPONSE_LEN: usize = 4096;

/// Resolver the filter forwards allowed queries through. Abstracted so
/// tests can stub the network.
#[async_trait]
pub trait DnsUpstream: Send + Sync {
    /// Forward a raw query message; returns the raw response.
    ///
    /// # Errors
    ///
    /// Fails when every configured server times out or faults.
    async fn forward(&self, query: &[u8]) -> Result<Vec<u8>>;
}

/// UDP forwarder over an ordered server list, rotated round-robin so load
/// spreads and a dead first server does not penalize every query.
pub struct UdpUpstreamPool {
    servers: Vec<SocketAddr>,
    timeout: Duration,
    next: AtomicUsize,
}

impl UdpUpstreamPool {
    /// Create a pool over the configured servers.
    #[must_use]
    pub fn new(servers: Vec<SocketAddr>, timeout: Duration) -> Self {
        Self {
            servers,
            timeout,
            next: AtomicUsize::new(0),
        }
    }

    async fn try_server(&self, server: SocketAddr, query: &[u8]) -> Result<Vec<u8>> {
        let bind_addr: SocketAddr = if server.is_ipv4() {
            "0.0.0.0:0".parse().map_err(|_| Error::internal("bad bind addr"))?
        } else {
            "[::]:0".parse().map_err(|_| Error::internal("bad bind addr"))?
        };
        let socket = UdpSocket::bind(bind_addr).await?;
        socket.send_to(query, server).await?;

        let mut buf = vec![0u8; MAX_RESPONSE_LEN];
        let recv = tokio::time::timeout(self.timeout, socket.recv_from(&mut buf));
        let (len, from) = recv
            .await
            .map_err(|_| Error::dns(format!("upstream {server} timed out")))??;
        if from.ip() != server.ip() {
            return Err(Error::dns(format!("response from unexpected peer {from}")));
        }
        if len < 2 || buf[..2] != query[..2] {
            return Err(Error::dns("transaction id mismatch".to_owned()));
        }
        buf.truncate(len);
        Ok(buf)
    }
}

#[async_trait]
impl DnsUpstream for UdpUpstreamPool {
    async fn forward(&self, query: &[u8]) -> Result<Vec<u8>> {
        if query.len() < 2 {
            return Err(Error::dns("query too short to forward"));
        }
        let start = self.next.fetch_add(1, Ordering::Relaxed);
        let mut last_err = Error::dns("no upstream servers configured");
        for i in 0..self.servers.len() {
            let server = self.servers[(start + i) % self.servers.len()];
            match self.try_server(server, query).await {
                Ok(response) => return Ok(response),
                Err(e) => {
                    debug!(%server, error = %e, "upstream attempt failed");
                    last_err = e;
                }
            }
        }
        Err(last_err)
    }
}
