use std::io;
use tokio::io::AsyncWrite;
use tokio::net::TcpStream;
use tokio::time::{Duration, timeout};
use tracing::{debug, warn};

use crate::target::Target;

/// Opens a byte stream to a target. The transport behind probes and print jobs.
#[allow(async_fn_in_trait)]
pub trait Connector {
    type Stream: AsyncWrite + Unpin;

    async fn connect(&self, target: &Target) -> io::Result<Self::Stream>;
}

/// Plain TCP, the raw printing transport (port 9100 and friends).
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&self, target: &Target) -> io::Result<TcpStream> {
        let stream = TcpStream::connect((target.host.as_str(), target.port)).await?;
        stream.set_nodelay(true)?;
        Ok(stream)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    Connecting,
    Connected,
    Closed,
    Errored,
    TimedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    Start,
    Established,
    Error,
    Timeout,
    Close,
}

impl ConnectionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ConnectionState::Closed | ConnectionState::Errored | ConnectionState::TimedOut
        )
    }

    /// Next state for `event`, or `None` when the event is not valid here.
    pub fn on(self, event: ConnectionEvent) -> Option<ConnectionState> {
        use ConnectionEvent as E;
        use ConnectionState as S;
        match (self, event) {
            (S::Idle, E::Start) => Some(S::Connecting),
            (S::Connecting, E::Established) => Some(S::Connected),
            (S::Connecting, E::Error) => Some(S::Errored),
            (S::Connecting, E::Timeout) => Some(S::TimedOut),
            (S::Connected, E::Close) => Some(S::Closed),
            (S::Connected, E::Error) => Some(S::Errored),
            (S::Connected, E::Timeout) => Some(S::TimedOut),
            _ => None,
        }
    }
}

/// Tracks one connection attempt through its states and logs each step.
#[derive(Debug)]
pub struct Lifecycle {
    target: String,
    state: ConnectionState,
}

impl Lifecycle {
    pub fn new(target: &Target) -> Self {
        Self {
            target: target.to_string(),
            state: ConnectionState::Idle,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn step(&mut self, event: ConnectionEvent) {
        match self.state.on(event) {
            Some(next) => {
                debug!(target_addr = %self.target, from = ?self.state, to = ?next, "connection state");
                self.state = next;
            }
            None => {
                warn!(target_addr = %self.target, state = ?self.state, ?event, "ignored connection event");
            }
        }
    }
}

/// How a single connect attempt ended.
#[derive(Debug)]
pub enum Attempt<S> {
    Connected(S),
    Errored(String),
    TimedOut,
}

/// Connects to `target`, bounded by `limit` when given.
///
/// Resolves exactly once: the stream, the transport's error message, or a
/// timeout. The lifecycle is left in `Connected` or a terminal state.
pub async fn open<C: Connector>(
    connector: &C,
    target: &Target,
    limit: Option<Duration>,
    lifecycle: &mut Lifecycle,
) -> Attempt<C::Stream> {
    lifecycle.step(ConnectionEvent::Start);

    let result = match limit {
        Some(limit) => match timeout(limit, connector.connect(target)).await {
            Ok(result) => result,
            Err(_) => {
                lifecycle.step(ConnectionEvent::Timeout);
                return Attempt::TimedOut;
            }
        },
        None => connector.connect(target).await,
    };

    match result {
        Ok(stream) => {
            lifecycle.step(ConnectionEvent::Established);
            Attempt::Connected(stream)
        }
        Err(e) => {
            lifecycle.step(ConnectionEvent::Error);
            Attempt::Errored(e.to_string())
        }
    }
}
