//! Prometheus scrape endpoint
//!
//! Installs the Prometheus recorder as the global `metrics` recorder and
//! serves it over HTTP on the ambient tokio runtime. Every path except
//! `/health` returns the rendered counters.

use crate::metrics::recorder::init_metrics;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::OnceLock;

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Address the scrape endpoint listens on
    pub listen_addr: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 9090)),
        }
    }
}

impl MetricsConfig {
    pub fn with_addr(addr: SocketAddr) -> Self {
        Self { listen_addr: addr }
    }
}

/// Bind the scrape endpoint and install the recorder.
///
/// Must be called from within a tokio runtime, which keeps serving the
/// endpoint for as long as it runs. A second call returns the handle of the
/// first without binding again.
pub fn start_metrics_server(
    config: MetricsConfig,
) -> Result<&'static PrometheusHandle, MetricsError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle);
    }

    let runtime = tokio::runtime::Handle::try_current().map_err(|_| MetricsError::NoRuntime)?;
    let _guard = runtime.enter();

    let (recorder, exporter) = PrometheusBuilder::new()
        .with_http_listener(config.listen_addr)
        .build()
        .map_err(|e| MetricsError::SetupFailed(e.to_string()))?;
    let handle = recorder.handle();
    metrics::set_global_recorder(recorder).map_err(|_| MetricsError::AlreadyInitialized)?;

    runtime.spawn(async move {
        if let Err(e) = exporter.await {
            tracing::error!("Metrics endpoint stopped: {:?}", e);
        }
    });
    tracing::info!(addr = %config.listen_addr, "Serving metrics");

    // Descriptions only reach a recorder that is already installed
    init_metrics();

    let _ = PROMETHEUS_HANDLE.set(handle);
    PROMETHEUS_HANDLE
        .get()
        .ok_or(MetricsError::AlreadyInitialized)
}

/// Counters in Prometheus text format, if the endpoint was started
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|h| h.render())
}

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Failed to setup metrics: {0}")]
    SetupFailed(String),

    #[error("Metrics endpoint needs a tokio runtime")]
    NoRuntime,

    #[error("Metrics already initialized")]
    AlreadyInitialized,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_config_default() {
        let config = MetricsConfig::default();
        assert_eq!(config.listen_addr.port(), 9090);
    }

    #[test]
    fn test_render_before_start() {
        // Nothing installed in unit tests
        assert!(render_metrics().is_none());
    }

    #[test]
    fn test_start_outside_runtime_fails() {
        let result = start_metrics_server(MetricsConfig::with_addr(
            "127.0.0.1:0".parse().unwrap(),
        ));
        assert!(matches!(result, Err(MetricsError::NoRuntime)));
    }
}
