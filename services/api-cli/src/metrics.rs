//! Prometheus recorder for the client's metrics
//!
//! The client records through the `metrics` facade; this installs the
//! recorder that collects them. With `--metrics` the rendered exposition
//! text is printed to stderr when the command finishes.

use anyhow::{Context, Result};
use api_client::metrics::REQUEST_DURATION_METRIC;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

/// 5ms to 60s, spanning the configurable request timeout.
const DURATION_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

fn builder() -> Result<PrometheusBuilder> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(REQUEST_DURATION_METRIC.to_string()),
            DURATION_BUCKETS,
        )
        .context("failed to set histogram buckets")
}

/// Install the global recorder and return the handle used for rendering.
pub fn install_recorder() -> Result<PrometheusHandle> {
    builder()?
        .install_recorder()
        .context("failed to install Prometheus recorder")
}
