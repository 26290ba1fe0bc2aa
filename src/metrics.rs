//! Performance metrics collection and outcome reporting
//!
//! Metric handles are plain injected objects: they are constructed once
//! during process wiring and passed by reference into the admission gate and
//! the reporter, instead of being registered implicitly from inside the core.

use crate::{BrowserVariant, RenderError, RenderOutcome};
use dashmap::DashMap;
use metrics::{register_counter, register_gauge, register_histogram, Counter, Gauge, Histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use tracing::{info, warn};

/// Histogram buckets for render durations, in seconds.
const DURATION_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0];

/// Coarse status classification of a finished request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    ClientError,
    ServerError,
}

impl StatusClass {
    pub fn as_label(&self) -> &'static str {
        match self {
            StatusClass::Success => "2xx",
            StatusClass::ClientError => "4xx",
            StatusClass::ServerError => "5xx",
        }
    }
}

pub struct Metrics {
    requests_success: Counter,
    requests_client_error: Counter,
    requests_server_error: Counter,
    active_workers: Gauge,
    render_durations: DashMap<BrowserVariant, Histogram>,
    prometheus: Option<PrometheusHandle>,
}

impl Metrics {
    /// Install the Prometheus recorder and register the service's handles.
    ///
    /// Must be called at most once per process; the returned instance renders
    /// the exposition text for `GET /metrics`.
    pub fn install() -> Result<Self, RenderError> {
        let handle = PrometheusBuilder::new()
            .set_buckets(DURATION_BUCKETS)
            .map_err(|e| RenderError::Configuration(format!("metrics buckets: {e}")))?
            .install_recorder()
            .map_err(|e| RenderError::Configuration(format!("metrics recorder: {e}")))?;
        Ok(Self::register(Some(handle)))
    }

    /// Handles without a backing recorder; every operation is a no-op.
    /// Used by tests.
    pub fn unregistered() -> Self {
        Self::register(None)
    }

    fn register(prometheus: Option<PrometheusHandle>) -> Self {
        Self {
            requests_success: register_counter!("screenshot_requests_total", "class" => "2xx"),
            requests_client_error: register_counter!("screenshot_requests_total", "class" => "4xx"),
            requests_server_error: register_counter!("screenshot_requests_total", "class" => "5xx"),
            active_workers: register_gauge!("screenshot_active_workers"),
            render_durations: DashMap::new(),
            prometheus,
        }
    }

    pub fn worker_started(&self) {
        self.active_workers.increment(1.0);
    }

    pub fn worker_finished(&self) {
        self.active_workers.decrement(1.0);
    }

    pub fn record_request(&self, class: StatusClass, variant: BrowserVariant, duration: Duration) {
        match class {
            StatusClass::Success => self.requests_success.increment(1),
            StatusClass::ClientError => self.requests_client_error.increment(1),
            StatusClass::ServerError => self.requests_server_error.increment(1),
        }
        self.render_durations
            .entry(variant)
            .or_insert_with(|| {
                register_histogram!(
                    "screenshot_render_duration_seconds",
                    "browser" => variant.as_str()
                )
            })
            .record(duration.as_secs_f64());
    }

    /// Prometheus exposition text, or empty when no recorder is installed.
    pub fn render_prometheus(&self) -> String {
        self.prometheus
            .as_ref()
            .map(PrometheusHandle::render)
            .unwrap_or_default()
    }
}

/// Maps render outcomes onto the observable signals the metrics and log
/// collaborators consume.
pub struct OutcomeReporter {
    metrics: std::sync::Arc<Metrics>,
}

impl OutcomeReporter {
    pub fn new(metrics: std::sync::Arc<Metrics>) -> Self {
        Self { metrics }
    }

    pub fn report(
        &self,
        request_id: &str,
        variant: BrowserVariant,
        outcome: &RenderOutcome,
        elapsed: Duration,
    ) {
        let class = outcome.status_class();
        self.metrics.record_request(class, variant, elapsed);

        match outcome {
            RenderOutcome::Success { bytes, .. } => {
                info!(
                    request_id,
                    browser = variant.as_str(),
                    bytes = bytes.len(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "render succeeded"
                );
            }
            RenderOutcome::Rejected { reason } => {
                warn!(
                    request_id,
                    browser = variant.as_str(),
                    reason = %reason,
                    "render rejected at admission"
                );
            }
            RenderOutcome::Timeout => {
                warn!(
                    request_id,
                    browser = variant.as_str(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "render exceeded capture deadline"
                );
            }
            RenderOutcome::Cancelled => {
                info!(
                    request_id,
                    browser = variant.as_str(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "render cancelled by caller"
                );
            }
            RenderOutcome::BackendError { cause } => {
                warn!(
                    request_id,
                    browser = variant.as_str(),
                    error = %cause,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "render failed in backend"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_class_labels() {
        assert_eq!(StatusClass::Success.as_label(), "2xx");
        assert_eq!(StatusClass::ClientError.as_label(), "4xx");
        assert_eq!(StatusClass::ServerError.as_label(), "5xx");
    }

    #[test]
    fn unregistered_metrics_are_inert() {
        let metrics = Metrics::unregistered();
        metrics.worker_started();
        metrics.record_request(
            StatusClass::Success,
            BrowserVariant::Chromium,
            Duration::from_millis(10),
        );
        metrics.worker_finished();
        assert_eq!(metrics.render_prometheus(), "");
    }
}
