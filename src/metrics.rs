use std::time::Duration;

/// Emit the per-request timing event. One per dispatched request.
pub fn server_request(request_kind: &str, duration: Duration) {
    tracing::info!(
        target: "pyty::metrics",
        event = "server_request",
        request_kind,
        duration_us = duration.as_micros() as u64,
    );
}

/// Emit the heap size gauge. One per recheck, after repopulation.
pub fn shared_memory_size(bytes: usize) {
    tracing::info!(
        target: "pyty::metrics",
        event = "shared memory size",
        bytes,
    );
}
