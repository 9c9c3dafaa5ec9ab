use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info};

use crate::config::{PrinterProfile, Timeouts};
use crate::error::{Operation, TesterError};
use crate::prober::{self, Connector, PingReport, PrintJob, PrintJobResult, ProbeResult, TcpConnector};
use crate::target::{print_target, resolve_targets};

/// At most one outstanding call per operation.
#[derive(Debug, Default)]
struct InFlight(AtomicBool);

impl InFlight {
    fn acquire(&self, op: Operation) -> Result<InFlightGuard<'_>, TesterError> {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| InFlightGuard(&self.0))
            .map_err(|_| TesterError::Busy(op))
    }
}

struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Entry point for the connectivity checks on one printer.
///
/// Each operation rejects a second call with `TesterError::Busy` while the
/// first is still running; different operations may overlap.
#[derive(Debug)]
pub struct PrinterTester<C = TcpConnector> {
    connector: C,
    timeouts: RwLock<Timeouts>,
    port_test: InFlight,
    print_job: InFlight,
    ping: InFlight,
}

impl PrinterTester<TcpConnector> {
    pub fn tcp(timeouts: Timeouts) -> Self {
        Self::new(TcpConnector, timeouts)
    }
}

impl<C: Connector> PrinterTester<C> {
    pub fn new(connector: C, timeouts: Timeouts) -> Self {
        Self {
            connector,
            timeouts: RwLock::new(timeouts),
            port_test: InFlight::default(),
            print_job: InFlight::default(),
            ping: InFlight::default(),
        }
    }

    /// Limits picked up by the next call; calls already running keep theirs.
    pub fn timeouts(&self) -> Timeouts {
        *self.timeouts.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_timeouts(&self, timeouts: Timeouts) {
        *self.timeouts.write().unwrap_or_else(PoisonError::into_inner) = timeouts;
    }

    /// Probes every port in `ports` on `host`, one at a time.
    pub async fn test_ports<F>(
        &self,
        host: &str,
        ports: &str,
        on_result: F,
    ) -> Result<Vec<ProbeResult>, TesterError>
    where
        F: FnMut(&ProbeResult),
    {
        let _guard = self.port_test.acquire(Operation::PortTest)?;
        let entries = resolve_targets(host, ports)?;
        debug!(host, count = entries.len(), "starting port test");
        Ok(prober::port::probe_entries(&self.connector, entries, self.timeouts().probe, on_result).await)
    }

    /// Sends `job` to the first port in `ports`.
    pub async fn send_print_job(
        &self,
        host: &str,
        ports: &str,
        job: &PrintJob,
    ) -> Result<PrintJobResult, TesterError> {
        let _guard = self.print_job.acquire(Operation::PrintJob)?;
        let target = print_target(host, ports)?;
        Ok(prober::dispatch::dispatch(&self.connector, &target, job.payload(), self.timeouts().print).await)
    }

    pub async fn ping(&self, host: &str) -> Result<PingReport, TesterError> {
        let _guard = self.ping.acquire(Operation::Ping)?;
        let host = host.trim();
        if host.is_empty() {
            return Err(TesterError::MissingHost);
        }
        Ok(prober::icmp::probe_icmp(host, self.timeouts().ping).await)
    }
}

/// One long-lived tester per network profile, keyed by lowercased name.
///
/// A tester is kept across config reloads so its in-flight guards stay in
/// force; only its timeouts are updated.
#[derive(Debug)]
pub struct TesterPool<C = TcpConnector> {
    testers: HashMap<String, Arc<PrinterTester<C>>>,
}

impl<C> Default for TesterPool<C> {
    fn default() -> Self {
        Self {
            testers: HashMap::new(),
        }
    }
}

impl<C: Connector + Default> TesterPool<C> {
    /// Brings the pool in line with `profiles` and returns the tester for
    /// each network profile, in profile order. Testers whose profile is gone
    /// are dropped.
    pub fn sync(
        &mut self,
        profiles: &[PrinterProfile],
        timeouts: Timeouts,
    ) -> Vec<(Arc<PrinterTester<C>>, PrinterProfile)> {
        let network: Vec<&PrinterProfile> = profiles
            .iter()
            .filter(|p| {
                let keep = p.connection.is_network();
                if !keep {
                    debug!(printer = %p.name, connection = %p.connection, "skipping non-network profile");
                }
                keep
            })
            .collect();

        self.testers.retain(|key, _| {
            let present = network.iter().any(|p| p.name.to_lowercase() == *key);
            if !present {
                info!(printer = %key, "Profile removed, dropping its tester");
            }
            present
        });

        network
            .into_iter()
            .map(|profile| {
                let tester = self
                    .testers
                    .entry(profile.name.to_lowercase())
                    .or_insert_with(|| Arc::new(PrinterTester::new(C::default(), timeouts)));
                if tester.timeouts() != timeouts {
                    info!(printer = %profile.name, "Timeouts changed, applying to next sweep");
                    tester.set_timeouts(timeouts);
                }
                (tester.clone(), profile.clone())
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.testers.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CommandLanguage, ConnectionType};
    use crate::prober::ProbeOutcome;
    use crate::prober::dispatch::PrintOutcome;
    use crate::target::Target;
    use std::io;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::Duration;

    /// Never answers; counts attempts.
    #[derive(Debug, Default)]
    struct HangingConnector {
        attempts: AtomicUsize,
    }

    impl Connector for HangingConnector {
        type Stream = tokio::io::Sink;

        async fn connect(&self, _target: &Target) -> io::Result<Self::Stream> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            std::future::pending().await
        }
    }

    fn timeouts() -> Timeouts {
        Timeouts {
            probe: Duration::from_millis(5000),
            print: Some(Duration::from_millis(10_000)),
            ping: Duration::from_millis(1000),
        }
    }

    #[tokio::test]
    async fn empty_host_reports_validation_without_connecting() {
        let tester = PrinterTester::new(HangingConnector::default(), timeouts());

        let result = tester.test_ports("", "9100, 80", |_| {}).await;

        assert_eq!(result, Err(TesterError::MissingProbeInput));
        assert_eq!(tester.connector.attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn n_targets_give_n_results_in_order() {
        let tester = PrinterTester::new(HangingConnector::default(), timeouts());

        let results = tester
            .test_ports("192.168.1.100", "9100, abc, 80", |_| {})
            .await
            .unwrap();

        let lines: Vec<String> = results.iter().map(|r| r.to_string()).collect();
        assert_eq!(
            lines,
            vec![
                "Port 9100: Connection timed out.",
                "Port abc: Invalid port number.",
                "Port 80: Connection timed out.",
            ]
        );
        assert_eq!(results[1].outcome, ProbeOutcome::InvalidPort);
        assert_eq!(tester.connector.attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn second_port_test_while_running_is_rejected() {
        let tester = Arc::new(PrinterTester::new(HangingConnector::default(), timeouts()));

        let running = {
            let tester = tester.clone();
            tokio::spawn(async move { tester.test_ports("10.0.0.5", "9100", |_| {}).await })
        };
        tokio::task::yield_now().await;

        let second = tester.test_ports("10.0.0.5", "9100", |_| {}).await;
        assert_eq!(second, Err(TesterError::Busy(Operation::PortTest)));

        // A different operation is not blocked by the running port test.
        let print = tester
            .send_print_job("10.0.0.5", "9100", &PrintJob::Quick)
            .await
            .unwrap();
        assert_eq!(print.outcome, PrintOutcome::TimedOut);

        let first = running.await.unwrap().unwrap();
        assert_eq!(first[0].outcome, ProbeOutcome::TimedOut);

        // Released once the first call resolved.
        let again = tester.test_ports("10.0.0.5", "9100", |_| {}).await;
        assert!(again.is_ok());
    }

    #[tokio::test]
    async fn dropped_call_releases_the_guard() {
        let tester = PrinterTester::new(HangingConnector::default(), timeouts());

        {
            let pending = tester.send_print_job("10.0.0.5", "9100", &PrintJob::Quick);
            tokio::pin!(pending);
            let polled = tokio::time::timeout(Duration::from_millis(10), &mut pending).await;
            assert!(polled.is_err());
        }

        let guard = tester.print_job.acquire(Operation::PrintJob);
        assert!(guard.is_ok());
    }

    #[tokio::test]
    async fn print_validation_uses_first_port() {
        let tester = PrinterTester::new(HangingConnector::default(), timeouts());
        let result = tester
            .send_print_job("10.0.0.5", "abc, 9100", &PrintJob::Quick)
            .await;
        assert_eq!(result, Err(TesterError::InvalidPrintTarget));
        assert_eq!(tester.connector.attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn ping_requires_a_host() {
        let tester = PrinterTester::new(HangingConnector::default(), timeouts());
        assert_eq!(tester.ping("  ").await, Err(TesterError::MissingHost));
    }

    #[tokio::test]
    async fn unreachable_printer_fails_within_the_window() {
        let closed = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = closed.local_addr().unwrap().port();
        drop(closed);

        let tester = PrinterTester::tcp(timeouts());
        let result = tokio::time::timeout(
            Duration::from_millis(10_500),
            tester.send_print_job("127.0.0.1", &port.to_string(), &PrintJob::Quick),
        )
        .await
        .expect("dispatch must resolve before its timeout")
        .unwrap();

        assert!(matches!(result.outcome, PrintOutcome::ConnectFailed(_)));
    }

    fn profile(name: &str, connection: ConnectionType) -> PrinterProfile {
        PrinterProfile {
            name: name.to_string(),
            connection,
            host: "10.0.0.5".to_string(),
            ports: "9100".to_string(),
            command_language: CommandLanguage::default(),
            paper_width: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn running_sweep_keeps_blocking_after_timeouts_change() {
        let mut pool = TesterPool::<HangingConnector>::default();
        let profiles = vec![profile("Kitchen", ConnectionType::Wifi)];

        let (tester, _) = pool.sync(&profiles, timeouts()).remove(0);
        let running = {
            let tester = tester.clone();
            tokio::spawn(async move { tester.test_ports("10.0.0.5", "9100", |_| {}).await })
        };
        tokio::task::yield_now().await;

        let longer = Timeouts {
            probe: Duration::from_millis(8000),
            ..timeouts()
        };
        let (same, _) = pool.sync(&profiles, longer).remove(0);
        assert!(Arc::ptr_eq(&tester, &same));
        assert_eq!(same.timeouts(), longer);

        let overlapping = same.test_ports("10.0.0.5", "9100", |_| {}).await;
        assert_eq!(overlapping, Err(TesterError::Busy(Operation::PortTest)));

        // The sweep that was already running keeps its original limit.
        let first = running.await.unwrap().unwrap();
        assert!((5000..5100).contains(&first[0].elapsed_ms));
    }

    #[test]
    fn pool_skips_non_network_and_prunes_removed_profiles() {
        let mut pool = TesterPool::<HangingConnector>::default();
        let profiles = vec![
            profile("Kitchen", ConnectionType::Wifi),
            profile("Handheld", ConnectionType::Bluetooth),
            profile("Bar", ConnectionType::Wifi),
        ];

        let picked = pool.sync(&profiles, timeouts());
        let names: Vec<&str> = picked.iter().map(|(_, p)| p.name.as_str()).collect();
        assert_eq!(names, vec!["Kitchen", "Bar"]);
        assert_eq!(pool.len(), 2);

        let picked = pool.sync(&profiles[..1], timeouts());
        assert_eq!(picked.len(), 1);
        assert_eq!(pool.len(), 1);
    }
}
