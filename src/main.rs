mod cli;
mod config;
mod error;
mod metrics;
mod prober;
mod scheduler;
mod target;
mod tester;
mod util;

use cli::{Args, Cmd, TargetArgs};
use config::{parse_tracing_level, ConfigManager, PrinterProfile, ProbeConfig};
use error::TesterError;
use prober::{PrintJob, ProbeOutcome};
use scheduler::Scheduler;
use tester::{PrinterTester, TesterPool};

use anyhow::{anyhow, bail, Result};
use clap::Parser;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load config first to get log level
    let config = ProbeConfig::load_or_default(&args.config).await?;
    let log_level = match &args.log_level {
        Some(level) => parse_tracing_level(level)?,
        None => config.get_tracing_level()?,
    };
    init_tracing(log_level, args.log_json)?;

    match args.cmd {
        Cmd::Ports { target, timeout_ms } => {
            let (host, ports) = resolve_target_args(&config, target)?;
            let mut timeouts = config.timeouts();
            if let Some(ms) = timeout_ms {
                if ms == 0 {
                    bail!("--timeout-ms must be greater than zero");
                }
                timeouts.probe = Duration::from_millis(ms);
            }
            run_ports(PrinterTester::tcp(timeouts), &host, &ports, args.json).await
        }
        Cmd::Print { target, raw, file } => {
            let (host, ports) = resolve_target_args(&config, target)?;
            let job = match (raw, file) {
                (Some(text), _) => PrintJob::Raw(text.into_bytes()),
                (None, Some(path)) => PrintJob::Raw(tokio::fs::read(&path).await?),
                (None, None) => PrintJob::Quick,
            };
            let tester = PrinterTester::tcp(config.timeouts());
            match tester.send_print_job(&host, &ports, &job).await {
                Ok(result) if args.json => emit_json(&result),
                Ok(result) => {
                    println!("{}", result.outcome);
                    Ok(())
                }
                Err(e) => report_rejection(&e, None, args.json),
            }
        }
        Cmd::Ping { target } => {
            let (host, _) = resolve_target_args(&config, target)?;
            let tester = PrinterTester::tcp(config.timeouts());
            if !args.json && !host.trim().is_empty() {
                println!("Pinging {}...", host.trim());
            }
            match tester.ping(&host).await {
                Ok(report) if args.json => emit_json(&report),
                Ok(report) => {
                    println!("{}", report);
                    Ok(())
                }
                Err(e) => report_rejection(&e, None, args.json),
            }
        }
        Cmd::Watch => run_watch(&args.config).await,
        Cmd::Profiles => {
            if args.json {
                return emit_json(&config.profiles);
            }
            if config.profiles.is_empty() {
                println!("No printer profiles configured in {}", args.config);
            }
            for profile in &config.profiles {
                println!("{}", profile);
            }
            Ok(())
        }
    }
}

fn init_tracing(level: tracing::Level, json: bool) -> Result<()> {
    // Logs go to stderr so stdout carries only results
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(format!("printer_probe={}", level.as_str().to_lowercase()).parse()?);
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

/// Explicit `--host`/`--ports` win over the named profile's values.
fn resolve_target_args(config: &ProbeConfig, target: TargetArgs) -> Result<(String, String)> {
    let profile = match &target.profile {
        Some(name) => {
            let profile = config
                .profile(name)
                .ok_or_else(|| anyhow!("Unknown printer profile: {}", name))?;
            if !profile.connection.is_network() {
                bail!(
                    "Profile {} is a {} printer; only network printers can be tested",
                    profile.name,
                    profile.connection
                );
            }
            Some(profile)
        }
        None => None,
    };

    let host = target
        .host
        .or_else(|| profile.map(|p| p.host.clone()))
        .unwrap_or_default();
    let ports = target
        .ports
        .or_else(|| profile.map(|p| p.ports.clone()))
        .unwrap_or_default();
    Ok((host, ports))
}

async fn run_ports(tester: PrinterTester, host: &str, ports: &str, json: bool) -> Result<()> {
    let outcome = tester
        .test_ports(host, ports, |result| {
            if !json {
                println!("{}", result);
            }
        })
        .await;

    match outcome {
        Ok(results) if json => emit_json(&results),
        Ok(_) => Ok(()),
        Err(e) => report_rejection(&e, Some("N/A"), json),
    }
}

fn report_rejection(e: &TesterError, port_label: Option<&str>, json: bool) -> Result<()> {
    if json {
        return emit_json(&serde_json::json!({ "error": e.to_string() }));
    }
    match port_label {
        Some(label) => println!("Port {}: {}", label, e),
        None => println!("{}", e),
    }
    Ok(())
}

fn emit_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Settings read once when `watch` starts; a reload cannot change them.
#[derive(Debug, Clone, Copy, PartialEq)]
struct WatchSettings {
    probe_interval_ms: u64,
    enable_latency_history: bool,
    metrics_addr: SocketAddr,
}

impl WatchSettings {
    fn from_config(config: &ProbeConfig) -> Self {
        Self {
            probe_interval_ms: config.probe_interval_ms,
            enable_latency_history: config.enable_latency_history,
            metrics_addr: config.metrics_addr,
        }
    }

    fn changed_fields(&self, other: &WatchSettings) -> Vec<&'static str> {
        let mut changed = Vec::new();
        if self.probe_interval_ms != other.probe_interval_ms {
            changed.push("probe_interval_ms");
        }
        if self.enable_latency_history != other.enable_latency_history {
            changed.push("enable_latency_history");
        }
        if self.metrics_addr != other.metrics_addr {
            changed.push("metrics_addr");
        }
        changed
    }
}

async fn run_watch(config_file: &str) -> Result<()> {
    let config_mgr = Arc::new(ConfigManager::start(config_file).await?);

    let startup = WatchSettings::from_config(&*config_mgr.config.read().await);

    if startup.enable_latency_history {
        info!("Latency history tracking enabled");
    } else {
        info!("Latency history tracking disabled - showing current latency only");
    }
    metrics::initialize_metrics(startup.enable_latency_history)?;

    tokio::spawn(metrics::serve_metrics(startup.metrics_addr));
    info!("Serving metrics on http://{}/metrics", startup.metrics_addr);

    let scheduler = Scheduler::new(startup.probe_interval_ms)?;

    // One tester per profile so a slow printer only blocks its own next sweep
    let pool: Arc<Mutex<TesterPool>> = Arc::default();
    let last_seen = Arc::new(Mutex::new(startup));

    scheduler
        .run(
            move || {
                let config_mgr = config_mgr.clone();
                let pool = pool.clone();
                let last_seen = last_seen.clone();
                async move {
                    let profiles_snapshot = { config_mgr.profiles.read().await.clone() };
                    let (timeouts, current) = {
                        let config = config_mgr.config.read().await;
                        (config.timeouts(), WatchSettings::from_config(&config))
                    };

                    {
                        let mut last_seen = last_seen.lock().await;
                        let changed = last_seen.changed_fields(&current);
                        if !changed.is_empty() {
                            warn!(?changed, "Reloaded settings only apply after restarting watch");
                            *last_seen = current;
                        }
                    }

                    let sweeps = {
                        let mut pool = pool.lock().await;
                        let sweeps = pool.sync(&profiles_snapshot, timeouts);
                        debug!(testers = pool.len(), "tester pool synced");
                        sweeps
                    };
                    for (tester, profile) in sweeps {
                        tokio::spawn(sweep_profile(tester, profile));
                    }
                }
            },
            shutdown_signal(),
        )
        .await
}

async fn sweep_profile(tester: Arc<PrinterTester>, profile: PrinterProfile) {
    let name = profile.name.as_str();
    let outcome = tester
        .test_ports(&profile.host, &profile.ports, |result| {
            metrics::record_probe(name, result)
        })
        .await;

    match outcome {
        Ok(results) => {
            let reachable = results
                .iter()
                .filter(|r| r.outcome == ProbeOutcome::Success)
                .count();
            info!(printer = name, reachable, total = results.len(), "Port sweep complete");
        }
        Err(TesterError::Busy(op)) => {
            warn!(printer = name, "Previous {} still running, skipping this tick", op);
        }
        Err(e) => {
            error!(printer = name, "Port sweep rejected: {}", e);
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for ctrl-c: {:?}", e);
    }
}
