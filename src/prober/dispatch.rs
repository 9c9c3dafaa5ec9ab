use serde::Serialize;
use std::fmt;
use tokio::io::AsyncWriteExt;
use tokio::time::{Duration, timeout};
use tracing::{info, instrument, warn};

use super::connect::{self, Attempt, ConnectionEvent, Connector, Lifecycle};
use crate::target::Target;

/// Plain text followed by enough line feeds to push it past the tear bar.
pub const QUICK_TEST_PAYLOAD: &[u8] = b"Hello, this is a test print job!\n\n\n\n\n\n\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrintJob {
    /// Fixed text test page.
    Quick,
    /// Bytes sent verbatim, e.g. a hand-written ESC/POS or ZPL sequence.
    Raw(Vec<u8>),
}

impl PrintJob {
    pub fn payload(&self) -> &[u8] {
        match self {
            PrintJob::Quick => QUICK_TEST_PAYLOAD,
            PrintJob::Raw(bytes) => bytes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "snake_case")]
pub enum PrintOutcome {
    Sent,
    ConnectFailed(String),
    TimedOut,
}

impl fmt::Display for PrintOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrintOutcome::Sent => f.write_str("Print job sent successfully!"),
            PrintOutcome::ConnectFailed(reason) => write!(f, "Print job failed: {reason}"),
            PrintOutcome::TimedOut => f.write_str("Connection timed out."),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PrintJobResult {
    pub target: Target,
    pub outcome: PrintOutcome,
    /// Bytes handed to the transport; zero unless the job was sent.
    pub bytes: usize,
}

impl fmt::Display for PrintJobResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.target, self.outcome)
    }
}

/// Sends `payload` over one fresh connection. Single attempt, no retry.
///
/// `limit` bounds the connect phase and, separately, the write phase;
/// `None` leaves both to the transport.
#[instrument(skip(connector, target, payload), fields(addr = %target, payload_len = payload.len()))]
pub async fn dispatch<C: Connector>(
    connector: &C,
    target: &Target,
    payload: &[u8],
    limit: Option<Duration>,
) -> PrintJobResult {
    let mut lifecycle = Lifecycle::new(target);
    let outcome = match connect::open(connector, target, limit, &mut lifecycle).await {
        Attempt::Connected(mut stream) => {
            info!("Connected. Sending print job...");
            let written = match limit {
                Some(limit) => timeout(limit, write_payload(&mut stream, payload)).await,
                None => Ok(write_payload(&mut stream, payload).await),
            };
            match written {
                Ok(Ok(())) => {
                    lifecycle.step(ConnectionEvent::Close);
                    PrintOutcome::Sent
                }
                Ok(Err(e)) => {
                    lifecycle.step(ConnectionEvent::Error);
                    PrintOutcome::ConnectFailed(e.to_string())
                }
                Err(_) => {
                    lifecycle.step(ConnectionEvent::Timeout);
                    PrintOutcome::TimedOut
                }
            }
        }
        Attempt::Errored(reason) => PrintOutcome::ConnectFailed(reason),
        Attempt::TimedOut => PrintOutcome::TimedOut,
    };

    match &outcome {
        PrintOutcome::Sent => info!("{}", outcome),
        _ => warn!("{}", outcome),
    }

    let bytes = match outcome {
        PrintOutcome::Sent => payload.len(),
        _ => 0,
    };
    PrintJobResult {
        target: target.clone(),
        outcome,
        bytes,
    }
}

async fn write_payload<S>(stream: &mut S, payload: &[u8]) -> std::io::Result<()>
where
    S: tokio::io::AsyncWrite + Unpin,
{
    stream.write_all(payload).await?;
    stream.flush().await?;
    stream.shutdown().await
}
