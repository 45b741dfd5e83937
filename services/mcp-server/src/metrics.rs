//! Prometheus metrics exposition
//!
//! - `mcp_auth_requests_total` (counter): labels `mode`, `outcome`
//! - `oauth_codes_issued_total` (counter)
//! - `oauth_tokens_issued_total` (counter)
//! - `oauth_errors_total` (counter): labels `endpoint`, `error`
//! - `upstream_requests_total` (counter): label `status`
//! - `upstream_request_duration_seconds` (histogram): label `status`

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::time::Instant;

use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

const UPSTREAM_DURATION: &str = "upstream_request_duration_seconds";
const UPSTREAM_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

/// Process-local counters reported by the health endpoint.
#[derive(Debug, Clone)]
pub struct ServiceMetrics {
    pub requests_total: Arc<AtomicU64>,
    pub started_at: Instant,
}

impl ServiceMetrics {
    pub fn new() -> Self {
        Self {
            requests_total: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }
}

fn builder() -> PrometheusBuilder {
    PrometheusBuilder::new()
        .set_buckets_for_metric(Matcher::Full(UPSTREAM_DURATION.to_string()), UPSTREAM_BUCKETS)
        .expect("failed to set histogram buckets")
}

/// Install the Prometheus recorder and return a handle for rendering metrics.
///
/// Upstream latency is recorded with explicit buckets so it renders as a
/// histogram (with `_bucket` lines) rather than a summary.
pub fn install_recorder() -> PrometheusHandle {
    builder()
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Record a gateway decision for a protected-resource request.
pub fn record_auth(mode: &'static str, outcome: &'static str) {
    metrics::counter!("mcp_auth_requests_total", "mode" => mode, "outcome" => outcome)
        .increment(1);
}

pub fn record_code_issued() {
    metrics::counter!("oauth_codes_issued_total").increment(1);
}

pub fn record_token_issued() {
    metrics::counter!("oauth_tokens_issued_total").increment(1);
}

/// Record a failed authorize or token request by its OAuth error code.
pub fn record_oauth_error(endpoint: &'static str, error: &'static str) {
    metrics::counter!("oauth_errors_total", "endpoint" => endpoint, "error" => error)
        .increment(1);
}

/// Record a forwarded request with the upstream (or synthesized) status.
pub fn record_upstream(status: u16, duration_secs: f64) {
    let status = status.to_string();
    metrics::counter!("upstream_requests_total", "status" => status.clone()).increment(1);
    metrics::histogram!(UPSTREAM_DURATION, "status" => status).record(duration_secs);
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::PrometheusRecorder;

    #[test]
    fn record_functions_do_not_panic_without_recorder() {
        record_auth("oauth", "authorized");
        record_code_issued();
        record_token_issued();
        record_oauth_error("token", "invalid_grant");
        record_upstream(200, 0.05);
    }

    /// Isolated recorder/handle pair; install_recorder() can only run once
    /// per process.
    fn isolated_recorder() -> (PrometheusRecorder, PrometheusHandle) {
        let recorder = builder().build_recorder();
        let handle = recorder.handle();
        (recorder, handle)
    }

    #[test]
    fn oauth_counters_render_with_labels() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_code_issued();
        record_token_issued();
        record_oauth_error("token", "invalid_grant");
        record_oauth_error("authorize", "unauthorized_client");

        let output = handle.render();
        assert!(output.contains("oauth_codes_issued_total"), "got: {output}");
        assert!(output.contains("oauth_tokens_issued_total"), "got: {output}");
        assert!(output.contains("endpoint=\"token\""));
        assert!(output.contains("error=\"invalid_grant\""));
        assert!(output.contains("error=\"unauthorized_client\""));
    }

    #[test]
    fn auth_decisions_carry_mode_and_outcome() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_auth("oauth", "authorized");
        record_auth("oauth", "invalid_token");

        let output = handle.render();
        assert!(output.contains("mcp_auth_requests_total"));
        assert!(output.contains("mode=\"oauth\""));
        assert!(output.contains("outcome=\"invalid_token\""));
    }

    #[test]
    fn upstream_duration_renders_as_histogram() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_upstream(200, 0.042);
        record_upstream(504, 60.0);

        let output = handle.render();
        assert!(
            output.contains("upstream_request_duration_seconds_bucket"),
            "histogram must render _bucket lines, got: {output}"
        );
        assert!(output.contains("le=\"0.005\""), "5ms bucket must exist");
        assert!(output.contains("le=\"60\""), "60s bucket must exist");
        assert!(output.contains("status=\"504\""));
    }
}
