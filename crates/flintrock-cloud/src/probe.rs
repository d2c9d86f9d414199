//! TCP reachability probe
//!
//! Freshly launched instances report "running" well before sshd accepts
//! connections, so the orchestrator polls plain TCP connect against every
//! node until the whole set answers or the deadline passes.

use crate::error::{CloudError, Result};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Instant};

/// Per-attempt connect timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Delay between polling rounds.
const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Wait until every address accepts TCP connections on `port`.
pub async fn wait_port_open(addrs: &[String], port: u16, deadline: Duration) -> Result<()> {
    let started = Instant::now();
    let mut pending: Vec<&String> = addrs.iter().collect();

    while !pending.is_empty() {
        let mut still_pending = Vec::new();
        for addr in pending {
            if probe_once(addr, port).await {
                tracing::debug!(host = %addr, port, "port open");
            } else {
                still_pending.push(addr);
            }
        }
        pending = still_pending;

        if pending.is_empty() {
            break;
        }
        if started.elapsed() >= deadline {
            return Err(CloudError::Timeout {
                what: format!(
                    "port {} on {} node(s), first unreachable: {}",
                    port,
                    pending.len(),
                    pending[0]
                ),
                seconds: deadline.as_secs(),
            });
        }
        sleep(POLL_INTERVAL).await;
    }

    Ok(())
}

async fn probe_once(addr: &str, port: u16) -> bool {
    matches!(
        timeout(CONNECT_TIMEOUT, TcpStream::connect((addr, port))).await,
        Ok(Ok(_))
    )
}
