//! Prometheus metrics
//!
//! Counters and histograms for session lifecycle, utterance handling, and
//! reply latency.

use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

static HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Install the Prometheus recorder. Safe to call more than once; later
/// calls return the handle installed first.
pub fn init_metrics() -> PrometheusHandle {
    HANDLE
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .unwrap_or_else(|e| {
                    // A second recorder (e.g. in tests) is not fatal.
                    tracing::warn!(error = %e, "prometheus recorder already installed");
                    PrometheusBuilder::new().build_recorder().handle()
                });

            describe_counter!("relay_sessions_opened_total", "Sessions opened");
            describe_counter!("relay_sessions_closed_total", "Sessions closed");
            describe_gauge!("relay_sessions_live", "Currently live sessions");
            describe_counter!(
                "relay_utterances_total",
                "Utterance-final transcripts, by turn decision"
            );
            describe_counter!("relay_errors_total", "Errors sent to clients, by code");
            describe_histogram!(
                "relay_reply_latency_seconds",
                "Utterance-final to response-complete latency"
            );

            handle
        })
        .clone()
}

pub fn record_session_opened(live: usize) {
    counter!("relay_sessions_opened_total").increment(1);
    gauge!("relay_sessions_live").set(live as f64);
}

pub fn record_session_closed(live: usize) {
    counter!("relay_sessions_closed_total").increment(1);
    gauge!("relay_sessions_live").set(live as f64);
}

/// `decision` is one of genuine/echo/no_speech/rejected.
pub fn record_utterance(decision: &'static str) {
    counter!("relay_utterances_total", "decision" => decision).increment(1);
}

pub fn record_error(code: &str) {
    counter!("relay_errors_total", "code" => code.to_string()).increment(1);
}

pub fn record_reply_latency(elapsed: Duration) {
    histogram!("relay_reply_latency_seconds").record(elapsed.as_secs_f64());
}

/// `/metrics` endpoint.
pub async fn metrics_handler() -> String {
    match HANDLE.get() {
        Some(handle) => handle.render(),
        None => String::new(),
    }
}
