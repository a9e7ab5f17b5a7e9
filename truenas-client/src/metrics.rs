//! Metrics for calls made against the appliance API
//!
//! Only records through the `metrics` facade; installing an exporter is up to
//! the binary.

use std::time::Instant;

use metrics::{counter, histogram};

/// Metric names
pub mod names {
    /// Counter: Total API requests by operation and status
    pub const API_REQUESTS_TOTAL: &str = "truenas_api_requests_total";
    /// Histogram: Duration of API requests in seconds
    pub const API_REQUEST_DURATION_SECONDS: &str = "truenas_api_request_duration_seconds";
    /// Counter: Number of retried requests
    pub const API_RETRIES_TOTAL: &str = "truenas_api_retries_total";
}

/// Record an API request with its result
pub fn record_request(operation: &str, status: &str, duration_secs: f64) {
    counter!(names::API_REQUESTS_TOTAL, "operation" => operation.to_string(), "status" => status.to_string())
        .increment(1);
    histogram!(names::API_REQUEST_DURATION_SECONDS, "operation" => operation.to_string())
        .record(duration_secs);
}

/// Record a retry attempt
pub fn record_retry(operation: &str) {
    counter!(names::API_RETRIES_TOTAL, "operation" => operation.to_string()).increment(1);
}

/// Helper for timing requests
pub struct RequestTimer {
    operation: &'static str,
    start: Instant,
}

impl RequestTimer {
    /// Start timing a request
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            start: Instant::now(),
        }
    }

    /// Complete the request with success
    pub fn success(self) {
        let duration = self.start.elapsed().as_secs_f64();
        record_request(self.operation, "success", duration);
    }

    /// Complete the request with failure
    pub fn failure(self, error_code: &str) {
        let duration = self.start.elapsed().as_secs_f64();
        record_request(self.operation, error_code, duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_timer_without_recorder() {
        // No recorder installed: recording is a no-op and must not panic
        RequestTimer::new("list_targets").success();
        RequestTimer::new("list_targets").failure("timeout");
        record_retry("list_targets");
    }
}
