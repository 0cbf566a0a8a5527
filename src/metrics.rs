use metrics::{Unit, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::buildinfo;

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Installs the Prometheus recorder once per process and returns its handle.
pub fn setup_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            describe_counter!(
                "cachet_bridge_http_requests_total",
                Unit::Count,
                "HTTP requests received, by endpoint"
            );
            describe_counter!(
                "cachet_bridge_alerts_total",
                Unit::Count,
                "Alerts processed, by result"
            );
            describe_counter!(
                "cachet_bridge_incidents_total",
                Unit::Count,
                "Incidents written to CachetHQ, by action"
            );
            describe_counter!(
                "cachet_bridge_sync_errors_total",
                Unit::Count,
                "Deliveries rejected, by error kind"
            );
            describe_gauge!(
                "cachet_bridge_start_time_seconds",
                Unit::Seconds,
                "Start time of the process since unix epoch"
            );
            describe_gauge!("cachet_bridge_version_info", "Build information");

            handle
        })
        .clone()
}

pub fn record_start() {
    let start_timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64();
    gauge!("cachet_bridge_start_time_seconds").set(start_timestamp);
    gauge!(
        "cachet_bridge_version_info",
        "version" => buildinfo::version(),
        "git_hash" => buildinfo::git_hash()
    )
    .set(1.0);
}
