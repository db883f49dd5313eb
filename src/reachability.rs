//! The reachability-probe collaborator (§1, §4.4 `CHECK_REACHABLE`).

use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::time::timeout;

const PROBE_TIMEOUT: Duration = Duration::from_secs(3);

#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    /// Attempt a TCP connect to `host:port`; true if it succeeds within a
    /// short timeout.
    async fn probe(&self, host: &str, port: u16) -> bool;
}

/// Default probe backed by a real TCP connect attempt.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpReachabilityProbe;

#[async_trait]
impl ReachabilityProbe for TcpReachabilityProbe {
    async fn probe(&self, host: &str, port: u16) -> bool {
        matches!(
            timeout(PROBE_TIMEOUT, TcpStream::connect((host, port))).await,
            Ok(Ok(_))
        )
    }
}
