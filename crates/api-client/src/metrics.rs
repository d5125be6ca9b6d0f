//! Client metrics
//!
//! Recorded through the `metrics` facade; nothing is exported unless the
//! host installs a recorder (the CLI installs the Prometheus one).
//!
//! - `api_client_requests_total` (counter): labels `method`, `outcome`
//! - `api_client_request_duration_seconds` (histogram): label `method`
//! - `api_client_retries_total` (counter)
//! - `api_client_token_refresh_total` (counter): label `result`
//! - `api_client_stream_sessions_total` (counter): label `outcome`

pub const REQUEST_DURATION_METRIC: &str = "api_client_request_duration_seconds";

/// Record a finished logical call. `outcome` is `success` or an error kind label.
pub fn record_request(method: &str, outcome: &'static str, duration_secs: f64) {
    metrics::counter!("api_client_requests_total", "method" => method.to_string(), "outcome" => outcome)
        .increment(1);
    metrics::histogram!(REQUEST_DURATION_METRIC, "method" => method.to_string()).record(duration_secs);
}

pub fn record_retry() {
    metrics::counter!("api_client_retries_total").increment(1);
}

/// `result` is one of `success`, `failure`, `exhausted`, `no_token`.
pub fn record_refresh(result: &'static str) {
    metrics::counter!("api_client_token_refresh_total", "result" => result).increment(1);
}

/// `outcome` is `done`, `closed`, `canceled`, or an error kind label.
pub fn record_stream(outcome: &'static str) {
    metrics::counter!("api_client_stream_sessions_total", "outcome" => outcome).increment(1);
}
