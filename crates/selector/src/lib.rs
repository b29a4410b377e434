//! Latency-based relay server selection.
//!
//! The public relay network runs a fixed pool of hosts behind a numbered
//! naming convention. When no explicit server is configured, the bridge
//! probes every candidate in parallel, times repeated raw TCP connects, and
//! settles on the fastest host that responded. If nothing responds, it
//! cools down and probes the whole pool again, forever; the pool is small
//! and a slot is expected to free up eventually. The caller can abort the
//! wait through a cancellation token.

use async_trait::async_trait;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{lookup_host, TcpStream};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Sentinel latency for hosts that never responded.
pub const UNREACHABLE: Duration = Duration::MAX;

/// Pool naming and probing parameters.
#[derive(Debug, Clone)]
pub struct SelectorConfig {
    /// Hostname pattern; `{}` is replaced with the zero-padded candidate index.
    pub host_pattern: String,
    /// Number of candidate hosts in the pool.
    pub pool_size: usize,
    /// Port the relay servers listen on.
    pub port: u16,
    /// Connect+close cycles timed per candidate.
    pub connect_rounds: u32,
    /// Pause between full-pool retries when nothing responded.
    pub retry_cooldown: Duration,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            host_pattern: "public.{}.relay.mattcorallo.com".to_string(),
            pool_size: 20,
            port: 8336,
            connect_rounds: 20,
            retry_cooldown: Duration::from_secs(10),
        }
    }
}

impl SelectorConfig {
    /// The hostname of candidate `index`.
    pub fn host(&self, index: usize) -> String {
        self.host_pattern.replace("{}", &format!("{:02}", index))
    }
}

/// Measures how quickly one candidate host accepts connections.
#[async_trait]
pub trait Prober: Send + Sync {
    /// Total wall-clock time for the configured connect cycles, or
    /// [`UNREACHABLE`] when the host does not resolve to a usable address.
    async fn probe(&self, host: &str) -> Duration;
}

/// Probes with raw TCP connect/close cycles; no payload is exchanged.
#[derive(Debug, Clone)]
pub struct TcpProber {
    pub port: u16,
    pub rounds: u32,
}

#[async_trait]
impl Prober for TcpProber {
    async fn probe(&self, host: &str) -> Duration {
        let resolved = match lookup_host((host, self.port)).await {
            Ok(mut addrs) => addrs.next(),
            Err(_) => None,
        };
        let addr = match resolved {
            Some(addr) if !is_placeholder(addr.ip()) => addr,
            // Resolution failure folds into the unreachable sentinel; it is
            // never an error at this layer.
            _ => return UNREACHABLE,
        };

        let start = Instant::now();
        for _ in 0..self.rounds {
            // A refused connect still counts against the candidate's clock.
            if let Ok(stream) = TcpStream::connect(addr).await {
                drop(stream);
            }
        }
        start.elapsed()
    }
}

/// Addresses some resolvers hand back for parked pool slots.
fn is_placeholder(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_unspecified(),
        IpAddr::V6(v6) => {
            v6.is_unspecified() || v6.to_ipv4_mapped().is_some_and(|v4| v4.is_unspecified())
        }
    }
}

/// Probes the pool until a host responds, returning its hostname.
///
/// One task per candidate, a barrier on the whole round, then the minimum
/// finite latency with ties broken by the lowest index. Returns `None` only
/// when `cancel` fires; there is no retry limit.
pub async fn select_server(
    config: SelectorConfig,
    prober: Arc<dyn Prober>,
    cancel: CancellationToken,
) -> Option<String> {
    loop {
        let mut probes = JoinSet::new();
        for index in 0..config.pool_size {
            let host = config.host(index);
            let prober = prober.clone();
            probes.spawn(async move {
                let latency = prober.probe(&host).await;
                (index, host, latency)
            });
        }

        let collected = tokio::select! {
            results = collect(&mut probes) => Some(results),
            _ = cancel.cancelled() => None,
        };
        let results = match collected {
            Some(results) => results,
            None => {
                probes.shutdown().await;
                return None;
            }
        };

        for (index, host, latency) in &results {
            if *latency != UNREACHABLE {
                info!(
                    "server {} ({}) took {} ms to respond {} times",
                    index,
                    host,
                    latency.as_millis(),
                    config.connect_rounds
                );
            }
        }

        if let Some((_, host, _)) = best_candidate(&results) {
            return Some(host.clone());
        }

        warn!(
            "no relay servers responded, retrying in {} s",
            config.retry_cooldown.as_secs()
        );
        tokio::select! {
            _ = tokio::time::sleep(config.retry_cooldown) => {}
            _ = cancel.cancelled() => return None,
        }
    }
}

async fn collect(probes: &mut JoinSet<(usize, String, Duration)>) -> Vec<(usize, String, Duration)> {
    let mut results = Vec::new();
    while let Some(joined) = probes.join_next().await {
        if let Ok(result) = joined {
            results.push(result);
        }
    }
    results
}

/// Minimum finite latency; ties go to the lowest candidate index.
fn best_candidate(results: &[(usize, String, Duration)]) -> Option<&(usize, String, Duration)> {
    results
        .iter()
        .filter(|(_, _, latency)| *latency != UNREACHABLE)
        .min_by_key(|(index, _, latency)| (*latency, *index))
}
