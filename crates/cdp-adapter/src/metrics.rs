use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use lazy_static::lazy_static;
use prometheus::{
    core::Collector, histogram_opts, Encoder, HistogramVec, IntCounter, IntCounterVec, Registry,
    TextEncoder,
};
use serde::{Deserialize, Serialize};
use tracing::error;

#[derive(Default, Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterMetricsSnapshot {
    pub commands: u64,
    pub command_success: u64,
    pub command_failures: u64,
    pub command_latency_total_us: u64,
    pub events: u64,
    pub network_responses: u64,
    pub body_fetches: u64,
    pub body_fetch_failures: u64,
}

static COMMANDS: AtomicU64 = AtomicU64::new(0);
static COMMAND_SUCCESS: AtomicU64 = AtomicU64::new(0);
static COMMAND_FAILURES: AtomicU64 = AtomicU64::new(0);
static COMMAND_LATENCY_TOTAL_US: AtomicU64 = AtomicU64::new(0);
static EVENTS: AtomicU64 = AtomicU64::new(0);
static NETWORK_RESPONSES: AtomicU64 = AtomicU64::new(0);
static BODY_FETCHES: AtomicU64 = AtomicU64::new(0);
static BODY_FETCH_FAILURES: AtomicU64 = AtomicU64::new(0);

lazy_static! {
    static ref ADAPTER_REGISTRY: Registry = {
        let registry = Registry::new();
        register_metrics(&registry);
        registry
    };
    static ref CDP_COMMANDS_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new("mediflow_cdp_commands_total", "Total CDP commands executed"),
        &["method"]
    )
    .unwrap();
    static ref CDP_COMMAND_FAILURES_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new(
            "mediflow_cdp_command_failures_total",
            "Total CDP command failures"
        ),
        &["method"]
    )
    .unwrap();
    static ref CDP_COMMAND_DURATION: HistogramVec = HistogramVec::new(
        histogram_opts!(
            "mediflow_cdp_command_duration_seconds",
            "CDP command latency",
            vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0]
        ),
        &["method"]
    )
    .unwrap();
    static ref CDP_EVENTS_TOTAL: IntCounter =
        IntCounter::new("mediflow_cdp_events_total", "Total CDP events processed").unwrap();
    static ref NETWORK_RESPONSES_TOTAL: IntCounter = IntCounter::new(
        "mediflow_network_responses_total",
        "Completed network responses published to subscribers",
    )
    .unwrap();
    static ref BODY_FETCHES_TOTAL: IntCounterVec = IntCounterVec::new(
        prometheus::Opts::new(
            "mediflow_response_body_fetches_total",
            "Response body fetches by outcome"
        ),
        &["outcome"]
    )
    .unwrap();
}

fn register<C>(registry: &Registry, collector: C)
where
    C: Collector + Clone + Send + Sync + 'static,
{
    if let Err(err) = registry.register(Box::new(collector.clone())) {
        if !matches!(err, prometheus::Error::AlreadyReg) {
            error!(?err, "failed to register cdp metric");
        }
    }
}

pub fn register_metrics(registry: &Registry) {
    register(registry, CDP_COMMANDS_TOTAL.clone());
    register(registry, CDP_COMMAND_FAILURES_TOTAL.clone());
    register(registry, CDP_COMMAND_DURATION.clone());
    register(registry, CDP_EVENTS_TOTAL.clone());
    register(registry, NETWORK_RESPONSES_TOTAL.clone());
    register(registry, BODY_FETCHES_TOTAL.clone());
}

/// Registry holding every adapter collector.
pub fn registry() -> &'static Registry {
    &ADAPTER_REGISTRY
}

/// Prometheus text exposition of the adapter metrics.
pub fn render_text() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&registry().gather(), &mut buffer)?;
    String::from_utf8(buffer).map_err(|err| prometheus::Error::Msg(err.to_string()))
}

pub fn record_command(method: &str) {
    COMMANDS.fetch_add(1, Ordering::Relaxed);
    CDP_COMMANDS_TOTAL.with_label_values(&[method]).inc();
}

pub fn record_command_success(method: &str, duration: Duration) {
    COMMAND_SUCCESS.fetch_add(1, Ordering::Relaxed);
    let micros = duration.as_micros().min(u64::MAX as u128) as u64;
    COMMAND_LATENCY_TOTAL_US.fetch_add(micros, Ordering::Relaxed);
    CDP_COMMAND_DURATION
        .with_label_values(&[method])
        .observe(duration.as_secs_f64());
}

pub fn record_command_failure(method: &str) {
    COMMAND_FAILURES.fetch_add(1, Ordering::Relaxed);
    CDP_COMMAND_FAILURES_TOTAL
        .with_label_values(&[method])
        .inc();
}

pub fn record_event() {
    EVENTS.fetch_add(1, Ordering::Relaxed);
    CDP_EVENTS_TOTAL.inc();
}

pub fn record_network_response() {
    NETWORK_RESPONSES.fetch_add(1, Ordering::Relaxed);
    NETWORK_RESPONSES_TOTAL.inc();
}

pub fn record_body_fetch(ok: bool) {
    BODY_FETCHES.fetch_add(1, Ordering::Relaxed);
    let outcome = if ok {
        "ok"
    } else {
        BODY_FETCH_FAILURES.fetch_add(1, Ordering::Relaxed);
        "error"
    };
    BODY_FETCHES_TOTAL.with_label_values(&[outcome]).inc();
}

pub fn snapshot() -> AdapterMetricsSnapshot {
    AdapterMetricsSnapshot {
        commands: COMMANDS.load(Ordering::Relaxed),
        command_success: COMMAND_SUCCESS.load(Ordering::Relaxed),
        command_failures: COMMAND_FAILURES.load(Ordering::Relaxed),
        command_latency_total_us: COMMAND_LATENCY_TOTAL_US.load(Ordering::Relaxed),
        events: EVENTS.load(Ordering::Relaxed),
        network_responses: NETWORK_RESPONSES.load(Ordering::Relaxed),
        body_fetches: BODY_FETCHES.load(Ordering::Relaxed),
        body_fetch_failures: BODY_FETCH_FAILURES.load(Ordering::Relaxed),
    }
}

pub fn reset() {
    for counter in [
        &COMMANDS,
        &COMMAND_SUCCESS,
        &COMMAND_FAILURES,
        &COMMAND_LATENCY_TOTAL_US,
        &EVENTS,
        &NETWORK_RESPONSES,
        &BODY_FETCHES,
        &BODY_FETCH_FAILURES,
    ] {
        counter.store(0, Ordering::Relaxed);
    }
}
