use serde::Serialize;
use std::fmt;

use crate::error::TesterError;

/// A (host, port) pair to probe or print to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Target {
    pub host: String,
    pub port: u16,
}

impl Target {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// One non-empty segment of the ports field, resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PortEntry {
    Valid(Target),
    /// Segment that is not a base-10 port number, kept verbatim.
    Invalid(String),
}

impl PortEntry {
    /// The text shown after `Port ` in result lines.
    pub fn port_label(&self) -> String {
        match self {
            PortEntry::Valid(target) => target.port.to_string(),
            PortEntry::Invalid(segment) => segment.clone(),
        }
    }
}

fn parse_port(segment: &str) -> Option<u16> {
    segment.parse::<u16>().ok()
}

/// Splits `ports` on commas and resolves every non-empty segment against `host`.
///
/// Segments keep their input order. A segment that fails to parse becomes
/// `PortEntry::Invalid` rather than being dropped or coerced. The host is
/// not validated beyond being non-empty.
pub fn resolve_targets(host: &str, ports: &str) -> Result<Vec<PortEntry>, TesterError> {
    let host = host.trim();
    if host.is_empty() || ports.trim().is_empty() {
        return Err(TesterError::MissingProbeInput);
    }

    let entries = ports
        .split(',')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(|segment| match parse_port(segment) {
            Some(port) => PortEntry::Valid(Target::new(host, port)),
            None => PortEntry::Invalid(segment.to_string()),
        })
        .collect();

    Ok(entries)
}

/// Resolves the print target: the host plus the first segment of `ports`.
pub fn print_target(host: &str, ports: &str) -> Result<Target, TesterError> {
    let host = host.trim();
    let first = ports.split(',').next().unwrap_or_default().trim();
    match parse_port(first) {
        Some(port) if !host.is_empty() => Ok(Target::new(host, port)),
        _ => Err(TesterError::InvalidPrintTarget),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mixed_port_list_keeps_order_and_invalid_segments() {
        let entries = resolve_targets("192.168.1.100", "9100, abc, 80").unwrap();
        assert_eq!(
            entries,
            vec![
                PortEntry::Valid(Target::new("192.168.1.100", 9100)),
                PortEntry::Invalid("abc".to_string()),
                PortEntry::Valid(Target::new("192.168.1.100", 80)),
            ]
        );
    }

    #[test]
    fn empty_segments_are_discarded() {
        let entries = resolve_targets("printer.local", " 9100,, ,443 ,").unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].port_label(), "443");
    }

    #[test]
    fn out_of_range_and_partial_numbers_are_invalid() {
        let entries = resolve_targets("10.0.0.5", "70000, 91x0, -1, 0, 65535").unwrap();
        let labels: Vec<bool> = entries
            .iter()
            .map(|e| matches!(e, PortEntry::Valid(_)))
            .collect();
        assert_eq!(labels, vec![false, false, false, true, true]);
    }

    #[test]
    fn missing_host_or_ports_is_rejected() {
        assert_eq!(
            resolve_targets("", "9100"),
            Err(TesterError::MissingProbeInput)
        );
        assert_eq!(
            resolve_targets("   ", "9100"),
            Err(TesterError::MissingProbeInput)
        );
        assert_eq!(
            resolve_targets("10.0.0.5", ""),
            Err(TesterError::MissingProbeInput)
        );
    }

    #[test]
    fn host_is_trimmed() {
        let entries = resolve_targets("  10.0.0.5 ", "9100").unwrap();
        assert_eq!(entries[0], PortEntry::Valid(Target::new("10.0.0.5", 9100)));
    }

    #[test]
    fn print_target_uses_first_port_only() {
        let target = print_target("10.0.0.5", " 9100 , abc, 80").unwrap();
        assert_eq!(target, Target::new("10.0.0.5", 9100));
    }

    #[test]
    fn print_target_rejects_bad_first_port_or_host() {
        assert_eq!(
            print_target("10.0.0.5", "abc, 9100"),
            Err(TesterError::InvalidPrintTarget)
        );
        assert_eq!(
            print_target("", "9100"),
            Err(TesterError::InvalidPrintTarget)
        );
        assert_eq!(
            print_target("10.0.0.5", ""),
            Err(TesterError::InvalidPrintTarget)
        );
    }
}
