//! Metrics collection and exposition.
//!
//! # Metrics
//! - `esi_pages_total` (counter): client requests by outcome
//! - `esi_page_render_seconds` (histogram): end-to-end page latency
//! - `esi_fetches_total` (counter): backend fetches by status
//! - `esi_fetch_duration_seconds` (histogram): backend fetch latency
//! - `esi_fragment_cache_lookups_total` (counter): fragment cache hits/misses
//! - `esi_http_cache_lookups_total` (counter): HTTP cache hit/miss/bypass
//! - `esi_pool_wait_seconds` (histogram): time spent waiting for a connection slot
//!
//! Recording is a no-op until a recorder is installed with [`init_metrics`].

use std::net::SocketAddr;
use std::sync::Once;
use std::time::Instant;

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::cache::http::Lookup;

static DESCRIPTIONS: Once = Once::new();

/// Outcome of serving one client request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageOutcome {
    /// Body went through ESI processing.
    Rendered,
    /// Forwarded untouched (non-parseable or non-2xx).
    Passthrough,
    /// Processing failed and an error page was returned.
    Failed,
}

impl PageOutcome {
    fn as_str(self) -> &'static str {
        match self {
            PageOutcome::Rendered => "rendered",
            PageOutcome::Passthrough => "passthrough",
            PageOutcome::Failed => "failed",
        }
    }
}

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    describe_metrics();
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

fn describe_metrics() {
    DESCRIPTIONS.call_once(|| {
        describe_counter!("esi_pages_total", Unit::Count, "Client requests served, by outcome.");
        describe_histogram!("esi_page_render_seconds", Unit::Seconds, "End-to-end page latency.");
        describe_counter!("esi_fetches_total", Unit::Count, "Backend fetches, by status.");
        describe_histogram!("esi_fetch_duration_seconds", Unit::Seconds, "Backend fetch latency.");
        describe_counter!(
            "esi_fragment_cache_lookups_total",
            Unit::Count,
            "Fragment cache lookups, by result."
        );
        describe_counter!(
            "esi_http_cache_lookups_total",
            Unit::Count,
            "HTTP response cache lookups, by result."
        );
        describe_histogram!(
            "esi_pool_wait_seconds",
            Unit::Seconds,
            "Time spent waiting for a backend connection slot."
        );
    });
}

pub fn record_page(outcome: PageOutcome, status: u16, start: Instant) {
    counter!(
        "esi_pages_total",
        "outcome" => outcome.as_str(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("esi_page_render_seconds", "outcome" => outcome.as_str())
        .record(start.elapsed().as_secs_f64());
}

pub fn record_fetch(status: u16, start: Instant) {
    counter!("esi_fetches_total", "status" => status.to_string()).increment(1);
    histogram!("esi_fetch_duration_seconds").record(start.elapsed().as_secs_f64());
}

pub fn record_fragment_cache(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    counter!("esi_fragment_cache_lookups_total", "result" => result).increment(1);
}

pub fn record_http_cache(lookup: Lookup) {
    let result = match lookup {
        Lookup::Hit => "hit",
        Lookup::Miss => "miss",
        Lookup::Bypass => "bypass",
    };
    counter!("esi_http_cache_lookups_total", "result" => result).increment(1);
}

pub fn record_pool_wait(start: Instant) {
    histogram!("esi_pool_wait_seconds").record(start.elapsed().as_secs_f64());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        let start = Instant::now();
        record_page(PageOutcome::Rendered, 200, start);
        record_fetch(502, start);
        record_fragment_cache(true);
        record_http_cache(Lookup::Bypass);
        record_pool_wait(start);
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(PageOutcome::Rendered.as_str(), "rendered");
        assert_eq!(PageOutcome::Passthrough.as_str(), "passthrough");
        assert_eq!(PageOutcome::Failed.as_str(), "failed");
    }
}
