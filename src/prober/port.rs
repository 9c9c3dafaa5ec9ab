use serde::Serialize;
use std::fmt;
use tokio::time::{Duration, Instant};
use tracing::{info, instrument};

use super::connect::{self, Attempt, ConnectionEvent, Connector, Lifecycle};
use crate::target::{PortEntry, Target};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum ProbeOutcome {
    Success,
    Failed(String),
    TimedOut,
    InvalidPort,
}

impl ProbeOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ProbeOutcome::Success => "success",
            ProbeOutcome::Failed(_) => "failed",
            ProbeOutcome::TimedOut => "timed_out",
            ProbeOutcome::InvalidPort => "invalid_port",
        }
    }
}

impl fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeOutcome::Success => f.write_str("Connection successful!"),
            ProbeOutcome::Failed(reason) => write!(f, "Connection failed: {reason}"),
            ProbeOutcome::TimedOut => f.write_str("Connection timed out."),
            ProbeOutcome::InvalidPort => f.write_str("Invalid port number."),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeResult {
    pub entry: PortEntry,
    pub outcome: ProbeOutcome,
    pub elapsed_ms: u64,
}

impl fmt::Display for ProbeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Port {}: {}", self.entry.port_label(), self.outcome)
    }
}

/// Reachability check for one target: connect, then close straight away.
#[instrument(skip(connector, target), fields(addr = %target))]
pub async fn probe_target<C: Connector>(
    connector: &C,
    target: &Target,
    limit: Duration,
) -> ProbeOutcome {
    let mut lifecycle = Lifecycle::new(target);
    match connect::open(connector, target, Some(limit), &mut lifecycle).await {
        Attempt::Connected(stream) => {
            drop(stream);
            lifecycle.step(ConnectionEvent::Close);
            ProbeOutcome::Success
        }
        Attempt::Errored(reason) => ProbeOutcome::Failed(reason),
        Attempt::TimedOut => ProbeOutcome::TimedOut,
    }
}

/// Probes every entry one after another, in input order.
///
/// `on_result` sees each result as soon as it is known, before the next
/// target is attempted. Invalid entries never reach the connector.
pub async fn probe_entries<C, F>(
    connector: &C,
    entries: Vec<PortEntry>,
    limit: Duration,
    mut on_result: F,
) -> Vec<ProbeResult>
where
    C: Connector,
    F: FnMut(&ProbeResult),
{
    let mut results = Vec::with_capacity(entries.len());
    for entry in entries {
        let start = Instant::now();
        let outcome = match &entry {
            PortEntry::Valid(target) => probe_target(connector, target, limit).await,
            PortEntry::Invalid(_) => ProbeOutcome::InvalidPort,
        };
        let result = ProbeResult {
            entry,
            outcome,
            elapsed_ms: start.elapsed().as_millis() as u64,
        };
        info!("{}", result);
        on_result(&result);
        results.push(result);
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::resolve_targets;
    use std::io;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Port 1 connects, port 2 is refused, anything else never answers.
    #[derive(Default)]
    struct ScriptedConnector {
        attempts: AtomicUsize,
        seen: Mutex<Vec<u16>>,
    }

    impl Connector for ScriptedConnector {
        type Stream = tokio::io::Sink;

        async fn connect(&self, target: &Target) -> io::Result<Self::Stream> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(target.port);
            match target.port {
                1 => Ok(tokio::io::sink()),
                2 => Err(io::Error::new(
                    io::ErrorKind::ConnectionRefused,
                    "Connection refused",
                )),
                _ => std::future::pending::<io::Result<Self::Stream>>().await,
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn outcomes_are_classified_in_input_order() {
        let connector = ScriptedConnector::default();
        let entries = resolve_targets("10.0.0.5", "1, abc, 2, 3").unwrap();

        let results =
            probe_entries(&connector, entries, Duration::from_millis(5000), |_| {}).await;

        let outcomes: Vec<ProbeOutcome> = results.iter().map(|r| r.outcome.clone()).collect();
        assert_eq!(
            outcomes,
            vec![
                ProbeOutcome::Success,
                ProbeOutcome::InvalidPort,
                ProbeOutcome::Failed("Connection refused".to_string()),
                ProbeOutcome::TimedOut,
            ]
        );
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(*connector.seen.lock().unwrap(), vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_fires_at_the_limit() {
        let connector = ScriptedConnector::default();
        let entries = resolve_targets("10.0.0.5", "9100").unwrap();

        let results =
            probe_entries(&connector, entries, Duration::from_millis(5000), |_| {}).await;

        assert_eq!(results[0].outcome, ProbeOutcome::TimedOut);
        assert!((5000..5100).contains(&results[0].elapsed_ms));
    }

    #[tokio::test]
    async fn invalid_segments_make_no_attempts() {
        let connector = ScriptedConnector::default();
        let entries = resolve_targets("10.0.0.5", "abc, x1, 99999").unwrap();

        let results =
            probe_entries(&connector, entries, Duration::from_millis(5000), |_| {}).await;

        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| r.outcome == ProbeOutcome::InvalidPort));
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn observer_sees_each_result_as_it_completes() {
        let connector = ScriptedConnector::default();
        let entries = resolve_targets("10.0.0.5", "1, 2").unwrap();
        let mut lines = Vec::new();

        let results = probe_entries(&connector, entries, Duration::from_millis(5000), |r| {
            lines.push(r.to_string())
        })
        .await;

        assert_eq!(results.len(), 2);
        assert_eq!(
            lines,
            vec![
                "Port 1: Connection successful!".to_string(),
                "Port 2: Connection failed: Connection refused".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn real_listener_and_closed_port() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let open_port = listener.local_addr().unwrap().port();
        let closed = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let closed_port = closed.local_addr().unwrap().port();
        drop(closed);

        let connector = crate::prober::TcpConnector;
        let limit = Duration::from_millis(5000);
        let ok = probe_target(&connector, &Target::new("127.0.0.1", open_port), limit).await;
        let refused = probe_target(&connector, &Target::new("127.0.0.1", closed_port), limit).await;

        assert_eq!(ok, ProbeOutcome::Success);
        assert!(matches!(refused, ProbeOutcome::Failed(_)));
    }
}
