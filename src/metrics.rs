//! Thin Prometheus exposition wrapper (`spec.md` §1 calls metrics ancillary;
//! `SPEC_FULL.md` §6 still wants the surface present). All counters/gauges/
//! histograms are recorded inline at their call sites via the `metrics`
//! crate's facade macros — this module only owns the exporter and renders
//! `/metrics`.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Installs the global recorder once at startup and returns a handle that
/// can render the current snapshot on demand.
pub fn install() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install Prometheus metrics recorder")
}
