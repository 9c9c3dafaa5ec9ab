use serde::Serialize;
use std::fmt;
use std::net::IpAddr;
use surge_ping::{SurgeError, ping};
use tokio::time::{Duration, timeout};
use tracing::{info, instrument, warn};

use crate::util::resolve_host_to_ip;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PingOutcome {
    Reachable { ip: IpAddr, rtt_ms: f64 },
    Unreachable { reason: String },
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PingReport {
    pub host: String,
    pub outcome: PingOutcome,
}

impl fmt::Display for PingReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            PingOutcome::Reachable { .. } => {
                write!(f, "Ping successful: {} is reachable.", self.host)
            }
            PingOutcome::Unreachable { reason } => write!(f, "Ping failed: {reason}"),
            PingOutcome::TimedOut => write!(f, "Ping failed: {} is unreachable.", self.host),
        }
    }
}

/// One ICMP echo to `host`. Needs raw socket rights (root or CAP_NET_RAW).
///
/// `limit` covers name resolution and the echo together.
#[instrument]
pub async fn probe_icmp(host: &str, limit: Duration) -> PingReport {
    let outcome = match timeout(limit, resolve_and_echo(host)).await {
        Ok(outcome) => outcome,
        Err(_) => PingOutcome::TimedOut,
    };
    let report = PingReport {
        host: host.to_string(),
        outcome,
    };
    match report.outcome {
        PingOutcome::Reachable { .. } => info!("{}", report),
        _ => warn!("{}", report),
    }
    report
}

async fn resolve_and_echo(host: &str) -> PingOutcome {
    let ip_addr = match resolve_host_to_ip(host).await {
        Ok(ip_addr) => ip_addr,
        Err(e) => {
            return PingOutcome::Unreachable {
                reason: e.to_string(),
            };
        }
    };
    // Process id in the payload tells our replies apart from other pingers.
    let payload = (std::process::id() as u16).to_be_bytes();
    let reply = ping(ip_addr, &payload).await.map(|(_packet, rtt)| rtt);
    classify(ip_addr, reply)
}

fn classify(ip_addr: IpAddr, reply: Result<Duration, SurgeError>) -> PingOutcome {
    match reply {
        Ok(rtt) => PingOutcome::Reachable {
            ip: ip_addr,
            rtt_ms: rtt.as_secs_f64() * 1000.0,
        },
        Err(SurgeError::Timeout { .. }) => PingOutcome::TimedOut,
        Err(e) => PingOutcome::Unreachable {
            reason: e.to_string(),
        },
    }
}
