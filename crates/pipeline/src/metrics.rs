//! Request counters
//!
//! - `pipeline_requests_total` (counter): labels `status`, `method`
//! - `pipeline_request_duration_seconds` (histogram): label `status`
//! - `pipeline_retries_total` (counter): label `method`
//! - `pipeline_errors_total` (counter): label `error_type`
//!
//! Without an installed recorder these are no-ops.

pub fn record_request(status: u16, method: &str, duration_secs: f64) {
    let status_str = status.to_string();
    metrics::counter!(
        "pipeline_requests_total",
        "status" => status_str.clone(),
        "method" => method.to_string()
    )
    .increment(1);
    metrics::histogram!("pipeline_request_duration_seconds", "status" => status_str)
        .record(duration_secs);
}

pub fn record_retry(method: &str) {
    metrics::counter!("pipeline_retries_total", "method" => method.to_string()).increment(1);
}

pub fn record_error(error_type: &str) {
    metrics::counter!("pipeline_errors_total", "error_type" => error_type.to_string())
        .increment(1);
}
