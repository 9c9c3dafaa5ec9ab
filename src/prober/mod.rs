pub mod connect;
pub mod dispatch;
pub mod icmp;
pub mod port;

pub use connect::{Connector, TcpConnector};
pub use dispatch::{PrintJob, PrintJobResult};
pub use icmp::PingReport;
pub use port::{ProbeOutcome, ProbeResult};
