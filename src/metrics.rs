use prometheus::{Encoder, TextEncoder, HistogramOpts, HistogramVec, IntCounterVec, GaugeVec, Opts, Registry};
use warp::Filter;
use std::net::SocketAddr;
use std::sync::Mutex;
use once_cell::sync::Lazy;
use anyhow::Result;

use crate::prober::{ProbeOutcome, ProbeResult};
use crate::target::PortEntry;

static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

static LATENCY_GAUGE: Lazy<GaugeVec> = Lazy::new(|| {
    let opts = Opts::new("printer_probe_latency_milliseconds_current", "Latest successful connect latency in milliseconds");
    let gauge = GaugeVec::new(opts, &["printer", "port"]).expect("valid gauge definition");
    REGISTRY.register(Box::new(gauge.clone())).expect("gauge registered once");
    gauge
});

static OUTCOME_COUNTER: Lazy<IntCounterVec> = Lazy::new(|| {
    let opts = Opts::new("printer_probe_outcomes_total", "Probe results by outcome");
    let ctr = IntCounterVec::new(opts, &["printer", "port", "outcome"]).expect("valid counter definition");
    REGISTRY.register(Box::new(ctr.clone())).expect("counter registered once");
    ctr
});

// Only populated when latency history is enabled in the config
static LATENCY_HIST: Lazy<Mutex<Option<HistogramVec>>> = Lazy::new(|| Mutex::new(None));

pub fn initialize_metrics(enable_latency_history: bool) -> Result<()> {
    Lazy::force(&LATENCY_GAUGE);
    Lazy::force(&OUTCOME_COUNTER);

    if !enable_latency_history {
        return Ok(());
    }

    let mut guard = LATENCY_HIST
        .lock()
        .map_err(|_| anyhow::anyhow!("latency histogram lock poisoned"))?;
    if guard.is_some() {
        return Ok(());
    }

    let hist = HistogramVec::new(
        HistogramOpts::new("printer_probe_latency_milliseconds", "Connect latency in milliseconds")
            .buckets(vec![
                0.5, 1.0, 2.0, 5.0, 10.0, 20.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0,
            ]),
        &["printer", "port"],
    )?;
    REGISTRY.register(Box::new(hist.clone()))?;
    *guard = Some(hist);
    Ok(())
}

pub async fn serve_metrics(addr: SocketAddr) {
    let metrics_route = warp::path!("metrics").map(move || {
        let body = match gather_text() {
            Ok(text) => text,
            Err(e) => {
                tracing::error!("Failed to encode metrics: {:?}", e);
                String::new()
            }
        };
        warp::http::Response::builder()
            .header("Content-Type", TextEncoder::new().format_type())
            .body(body.into_bytes())
    });

    warp::serve(metrics_route).run(addr).await;
}

pub fn gather_text() -> Result<String> {
    let encoder = TextEncoder::new();
    let mut buf = Vec::new();
    encoder.encode(&REGISTRY.gather(), &mut buf)?;
    Ok(String::from_utf8(buf)?)
}

/// Record one port sweep result for `printer`.
pub fn record_probe(printer: &str, result: &ProbeResult) {
    let port = result.entry.port_label();
    OUTCOME_COUNTER
        .with_label_values(&[printer, port.as_str(), result.outcome.label()])
        .inc();

    match (&result.outcome, &result.entry) {
        (ProbeOutcome::Success, PortEntry::Valid(_)) => {
            observe_latency(printer, &port, result.elapsed_ms as f64);
        }
        (_, PortEntry::Valid(_)) => {
            // A port that stopped answering has no current latency.
            // Errs when the series was never set, which is fine.
            let _ = LATENCY_GAUGE.remove_label_values(&[printer, port.as_str()]);
        }
        _ => {}
    }
}

pub fn observe_latency(printer: &str, port: &str, latency_ms: f64) {
    // Always observe current latency in gauge
    LATENCY_GAUGE
        .with_label_values(&[printer, port])
        .set(latency_ms);

    if let Ok(guard) = LATENCY_HIST.lock() {
        if let Some(hist) = guard.as_ref() {
            hist.with_label_values(&[printer, port])
                .observe(latency_ms);
        }
    }
}
