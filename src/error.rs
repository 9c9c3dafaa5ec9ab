use std::fmt;
use thiserror::Error;

/// Operations a `PrinterTester` guards against re-entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    PortTest,
    PrintJob,
    Ping,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::PortTest => "port test",
            Operation::PrintJob => "print job",
            Operation::Ping => "ping",
        };
        f.write_str(name)
    }
}

/// Operation-level failures. Per-target outcomes are values, not errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TesterError {
    #[error("Please enter both IP address and port(s).")]
    MissingProbeInput,

    #[error("Please enter a valid IP address and port.")]
    InvalidPrintTarget,

    #[error("Please enter an IP address.")]
    MissingHost,

    #[error("A {0} is already in progress.")]
    Busy(Operation),
}
