//! Prometheus metrics for the live-update channel.
//!
//! # Panics
//!
//! Metric registration uses `unwrap()`. A registration failure means a
//! duplicate metric name, which is a programming error caught at first use.

use crate::error::TelemetryResult;
use once_cell::sync::Lazy;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_gauge_vec,
    register_histogram_vec, Counter, CounterVec, Encoder, Gauge, GaugeVec, HistogramVec,
    TextEncoder,
};

/// Presentation states exported on `taskwatch_ws_state`.
const WS_STATES: [&str; 3] = ["connected", "reconnecting", "offline"];

/// WebSocket connection state (1 = connected, 0 = not connected).
pub static WS_CONNECTED: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "taskwatch_ws_connected",
        "WebSocket connection state (1=connected)"
    )
    .unwrap()
});

/// Presentation state currently shown.
/// Labels: state (connected/reconnecting/offline)
pub static WS_STATE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "taskwatch_ws_state",
        "Presentation state of the live channel (1=active, 0=inactive)",
        &["state"]
    )
    .unwrap()
});

/// Reconnection attempts scheduled by the connection manager.
pub static WS_RECONNECT_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "taskwatch_ws_reconnect_total",
        "Reconnection attempts scheduled after an unexpected close"
    )
    .unwrap()
});

/// Presentation state changes.
pub static PRESENTATION_CHANGES_TOTAL: Lazy<Counter> = Lazy::new(|| {
    register_counter!(
        "taskwatch_presentation_changes_total",
        "Number of presentation state changes"
    )
    .unwrap()
});

/// Task events received.
/// Labels: kind (task_status_update/task_progress_update/...)
pub static EVENTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "taskwatch_events_total",
        "Task events received by kind",
        &["kind"]
    )
    .unwrap()
});

/// Delay between the server timestamp of an event and its arrival.
pub static EVENT_DELAY_MS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "taskwatch_event_delay_ms",
        "Delay from server event timestamp to client arrival in milliseconds",
        &["kind"],
        vec![5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0]
    )
    .unwrap()
});

/// Metrics facade for easy access.
pub struct Metrics;

impl Metrics {
    /// Set the presentation state. Only the active state is 1.
    pub fn ws_state_set(state: &str) {
        for s in WS_STATES {
            WS_STATE.with_label_values(&[s]).set(0.0);
        }
        WS_STATE.with_label_values(&[state]).set(1.0);
        WS_CONNECTED.set(if state == "connected" { 1.0 } else { 0.0 });
        PRESENTATION_CHANGES_TOTAL.inc();
    }

    /// Record a scheduled reconnection attempt.
    pub fn ws_reconnect() {
        WS_RECONNECT_TOTAL.inc();
    }

    /// Record an incoming task event.
    pub fn event_received(kind: &str, delay_ms: Option<f64>) {
        EVENTS_TOTAL.with_label_values(&[kind]).inc();
        if let Some(delay) = delay_ms {
            EVENT_DELAY_MS.with_label_values(&[kind]).observe(delay.max(0.0));
        }
    }

    /// Render all registered metrics in Prometheus text format.
    pub fn encode_text() -> TelemetryResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
