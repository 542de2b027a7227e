//! Prometheus metrics for the fetch engine
//!
//! Recording is a no-op until a recorder is installed, e.g. with
//! [`init_prometheus_recorder`].

use metrics::{counter, gauge, histogram};
use std::time::Duration;

pub const HIT_PREFETCH: &str = "prefetch";
pub const HIT_LRU: &str = "lru";

pub fn record_cache_hit(kind: &str) {
    counter!("dap_cache_hits_total", "kind" => kind.to_string()).increment(1);
}

pub fn record_cache_miss() {
    counter!("dap_cache_misses_total").increment(1);
}

pub fn record_fetch(state: &str, bytes: usize, duration: Duration) {
    counter!("dap_fetches_total", "state" => state.to_string()).increment(1);
    counter!("dap_fetched_bytes_total", "state" => state.to_string()).increment(bytes as u64);
    histogram!("dap_fetch_duration_seconds", "state" => state.to_string()).record(duration.as_secs_f64());
}

pub fn record_fetch_error(state: &str) {
    counter!("dap_fetch_errors_total", "state" => state.to_string()).increment(1);
}

pub fn record_eviction(bytes: usize) {
    counter!("dap_cache_evictions_total").increment(1);
    counter!("dap_cache_evicted_bytes_total").increment(bytes as u64);
}

pub fn set_cache_size(bytes: usize, nodes: usize) {
    gauge!("dap_cache_bytes").set(bytes as f64);
    gauge!("dap_cache_nodes").set(nodes as f64);
}

pub fn init_prometheus_recorder() -> anyhow::Result<metrics_exporter_prometheus::PrometheusHandle> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    let handle = builder.install_recorder()?;
    Ok(handle)
}
