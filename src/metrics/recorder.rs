//! Metrics recorder for filter events

use metrics::{counter, describe_counter, describe_histogram, histogram};
use std::sync::atomic::{AtomicBool, Ordering};

static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Initialize metric descriptions (call once at startup)
pub fn init_metrics() {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        return; // Already initialized
    }

    describe_counter!(
        "netsim_buffers_received_total",
        "Total number of buffers arriving at the filter"
    );
    describe_counter!(
        "netsim_bytes_received_total",
        "Total bytes arriving at the filter"
    );
    describe_counter!(
        "netsim_buffers_rejected_total",
        "Buffers refused by the token bucket"
    );
    describe_counter!(
        "netsim_buffers_dropped_total",
        "Buffers dropped by the drop countdown or drop probability"
    );
    describe_counter!(
        "netsim_buffers_duplicated_total",
        "Buffers forwarded twice"
    );
    describe_counter!(
        "netsim_buffers_delayed_total",
        "Buffers handed to the delivery loop"
    );
    describe_counter!(
        "netsim_buffers_forwarded_total",
        "Buffers pushed downstream"
    );
    describe_counter!("netsim_bytes_forwarded_total", "Bytes pushed downstream");

    describe_histogram!("netsim_delay_ms", "Simulated delay applied to buffers");
}

/// Record a buffer arriving on the input
pub fn record_buffer_received(size: usize) {
    counter!("netsim_buffers_received_total").increment(1);
    counter!("netsim_bytes_received_total").increment(size as u64);
}

/// Record a token bucket rejection
pub fn record_buffer_rejected() {
    counter!("netsim_buffers_rejected_total").increment(1);
}

/// Record a drop; `reason` is "countdown" or "probability"
pub fn record_buffer_dropped(reason: &'static str) {
    counter!("netsim_buffers_dropped_total", "reason" => reason).increment(1);
}

pub fn record_buffer_duplicated() {
    counter!("netsim_buffers_duplicated_total").increment(1);
}

pub fn record_buffer_delayed(delay_ms: u64) {
    counter!("netsim_buffers_delayed_total").increment(1);
    histogram!("netsim_delay_ms").record(delay_ms as f64);
}

/// Record a downstream push; `path` is "immediate" or "delayed"
pub fn record_buffer_forwarded(path: &'static str, size: usize) {
    counter!("netsim_buffers_forwarded_total", "path" => path).increment(1);
    counter!("netsim_bytes_forwarded_total").increment(size as u64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_metrics() {
        // Should not panic when called multiple times
        init_metrics();
        init_metrics();
    }

    #[test]
    fn test_record_without_recorder() {
        record_buffer_received(1200);
        record_buffer_rejected();
        record_buffer_dropped("countdown");
        record_buffer_duplicated();
        record_buffer_delayed(250);
        record_buffer_forwarded("immediate", 1200);
    }
}
