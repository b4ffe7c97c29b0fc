//! Metric name catalog and the Prometheus exporter.
//!
//! Call sites use the `metrics` macros directly with these names. Values go
//! nowhere until `init_metrics` installs the recorder.

use crate::config::MetricsConfig;
use crate::pipeline::orchestrator::{CycleResult, CycleState};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::{info, warn};

pub const FETCH_ATTEMPTS_TOTAL: &str = "bikes_fetch_attempts_total";
pub const RECORDS_FETCHED_TOTAL: &str = "bikes_records_fetched_total";
pub const RECORDS_ACCEPTED_TOTAL: &str = "bikes_records_accepted_total";
pub const RECORDS_REJECTED_TOTAL: &str = "bikes_records_rejected_total";
pub const RECORDS_PUBLISHED_TOTAL: &str = "bikes_records_published_total";
pub const PUBLISH_FAILURES_TOTAL: &str = "bikes_publish_failures_total";
pub const CYCLES_TOTAL: &str = "bikes_cycles_total";
pub const CYCLE_FAILURES_TOTAL: &str = "bikes_cycle_failures_total";
pub const CYCLE_DURATION_SECONDS: &str = "bikes_cycle_duration_seconds";
pub const MESSAGES_CONSUMED_TOTAL: &str = "bikes_messages_consumed_total";

/// Install the global Prometheus recorder with an HTTP scrape listener.
/// Returns the bound address, or `None` when disabled or when the exporter
/// could not start. A failed exporter never stops the pipeline.
pub fn init_metrics(config: &MetricsConfig) -> Option<SocketAddr> {
    if !config.enabled {
        return None;
    }
    let addr: SocketAddr = match config.listen_addr.parse() {
        Ok(addr) => addr,
        Err(e) => {
            warn!("Invalid metrics address '{}': {}", config.listen_addr, e);
            return None;
        }
    };
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => {
            info!("Prometheus metrics available at http://{}/metrics", addr);
            Some(addr)
        }
        Err(e) => {
            warn!("Failed to start Prometheus exporter: {}", e);
            None
        }
    }
}

/// Record the counters for one finished cycle.
pub fn record_cycle(result: &CycleResult) {
    let feed = result.feed.as_str();
    let rejected = result.rejected_count() as u64;
    let publish_failures = result.publish_failure_count() as u64;

    metrics::counter!(CYCLES_TOTAL, "feed" => feed).increment(1);
    metrics::counter!(RECORDS_FETCHED_TOTAL, "feed" => feed).increment(result.fetched as u64);
    metrics::counter!(RECORDS_ACCEPTED_TOTAL, "feed" => feed).increment(result.accepted as u64);
    metrics::counter!(RECORDS_REJECTED_TOTAL, "feed" => feed).increment(rejected);
    metrics::counter!(RECORDS_PUBLISHED_TOTAL, "feed" => feed).increment(result.published as u64);
    metrics::counter!(PUBLISH_FAILURES_TOTAL, "feed" => feed).increment(publish_failures);
    if result.state == CycleState::Failed {
        metrics::counter!(CYCLE_FAILURES_TOTAL, "feed" => feed).increment(1);
    }
    metrics::histogram!(CYCLE_DURATION_SECONDS, "feed" => feed).record(result.duration.as_secs_f64());
}
