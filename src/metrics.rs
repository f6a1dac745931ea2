use tracing::trace;

// Trace-based counters; the Prometheus recorder in main covers the rest.

pub fn inc_requests(route: &'static str) {
    trace!(
        target = "crosslist.metrics",
        route = route,
        "requests_total_inc"
    );
}

pub fn dispatch_elapsed(operation: &'static str, marketplace: &str, elapsed_ms: u128) {
    trace!(
        target = "crosslist.metrics",
        operation = operation,
        marketplace = marketplace,
        elapsed_ms = elapsed_ms as u64,
        "dispatch_elapsed"
    );
}
