// src/telemetry.rs

//! Prometheus exposition of the `metrics` counters and gauges.

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the global recorder and serve `/metrics` on `addr`.
///
/// Must be called before any tokio runtime is entered on this thread; the
/// exporter then runs its own on a background thread.
pub fn install_prometheus(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    metrics::describe_counter!("vmiids_collection_iterations_total", "Collection loop iterations started");
    metrics::describe_counter!("vmiids_module_faults_total", "Detection module runs that failed or panicked");
    metrics::describe_counter!("vmiids_protocol_aborts_total", "Monitor sessions declared dead");
    metrics::describe_gauge!("vmiids_registered_modules", "Active modules per kind");
    Ok(())
}
