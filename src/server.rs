use crate::alertmanager::{self, IngestError};
use crate::buildinfo;
use crate::metrics::record_start;
use crate::sync::{IncidentSynchronizer, SyncError};
use axum::body::Bytes;
use axum::http::header::AUTHORIZATION;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use axum_server::Handle;
use axum_server::tls_rustls::RustlsConfig;
use metrics::counter;
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub struct ServerConfig {
    pub synchronizer: Arc<IncidentSynchronizer>,
    /// Shared secret Alertmanager sends as `Authorization: Bearer <token>`.
    pub prometheus_token: Option<String>,
    pub prometheus_handle: PrometheusHandle,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
}

#[derive(Clone)]
struct AppState {
    synchronizer: Arc<IncidentSynchronizer>,
    prometheus_token: Option<Arc<str>>,
    prometheus_handle: PrometheusHandle,
}

/// Everything that turns a delivery into a 400.
#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Ingest(#[from] IngestError),
    #[error(transparent)]
    Sync(#[from] SyncError),
}

impl BridgeError {
    fn kind(&self) -> &'static str {
        match self {
            BridgeError::Ingest(IngestError::Unauthorized) => "unauthorized",
            BridgeError::Ingest(IngestError::Payload(_)) => "payload",
            BridgeError::Sync(e) => e.kind(),
        }
    }
}

impl IntoResponse for BridgeError {
    fn into_response(self) -> Response {
        counter!("cachet_bridge_sync_errors_total", "kind" => self.kind()).increment(1);
        (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": self.to_string()})),
        )
            .into_response()
    }
}

pub fn router(
    synchronizer: Arc<IncidentSynchronizer>,
    prometheus_token: Option<String>,
    prometheus_handle: PrometheusHandle,
) -> Router {
    let app_state = AppState {
        synchronizer,
        prometheus_token: prometheus_token
            .filter(|t| !t.is_empty())
            .map(Arc::from),
        prometheus_handle,
    };

    Router::new()
        .route("/health", get(health_handler))
        .route("/alert", post(alert_handler))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

pub async fn start_server(
    listener: TcpListener,
    shutdown_signal: oneshot::Receiver<()>,
    config: ServerConfig,
) -> std::io::Result<()> {
    // Install default crypto provider for rustls 0.23+
    rustls::crypto::ring::default_provider()
        .install_default()
        .ok();

    record_start();

    if config.prometheus_token.as_deref().unwrap_or_default().is_empty() {
        warn!("no Prometheus token configured, /alert accepts unauthenticated deliveries");
    }

    let app = router(
        config.synchronizer,
        config.prometheus_token,
        config.prometheus_handle,
    );

    let addr = listener.local_addr()?;
    info!("{} listening on {}", buildinfo::version_full(), addr);

    if let (Some(cert), Some(key)) = (config.tls_cert, config.tls_key) {
        let tls_config = RustlsConfig::from_pem_file(cert, key).await?;

        let handle = Handle::new();
        let handle_clone = handle.clone();
        tokio::spawn(async move {
            shutdown_signal.await.ok();
            handle_clone.graceful_shutdown(Some(Duration::from_secs(10)));
        });

        axum_server::from_tcp_rustls(listener.into_std()?, tls_config)
            .handle(handle)
            .serve(app.into_make_service())
            .await
    } else {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                shutdown_signal.await.ok();
            })
            .await
    }
}

async fn health_handler() -> Json<serde_json::Value> {
    counter!("cachet_bridge_http_requests_total", "endpoint" => "/health").increment(1);
    Json(json!({"status": "OK"}))
}

async fn metrics_handler(State(state): State<AppState>) -> String {
    counter!("cachet_bridge_http_requests_total", "endpoint" => "/metrics").increment(1);
    state.prometheus_handle.render()
}

async fn alert_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, BridgeError> {
    counter!("cachet_bridge_http_requests_total", "endpoint" => "/alert").increment(1);

    let authorization = headers.get(AUTHORIZATION).map(|v| v.as_bytes());
    if let Err(e) = alertmanager::authorize(authorization, state.prometheus_token.as_deref()) {
        warn!("rejected alert delivery: {}", e);
        return Err(e.into());
    }

    let webhook = alertmanager::parse_webhook(&body).inspect_err(|e| {
        warn!("rejected alert delivery: {}", e);
    })?;

    info!(
        "received {} alert(s) from Alertmanager: status={} receiver={}",
        webhook.alerts.len(),
        webhook.status,
        webhook.receiver
    );

    let report = state
        .synchronizer
        .process(&webhook)
        .await
        .inspect_err(|e| warn!("alert delivery failed: {}", e))?;

    info!(
        "delivery done: outcome={} created={} updated={} unknown={} duplicate={}",
        report.outcome,
        report.created,
        report.updated,
        report.skipped_unknown,
        report.skipped_duplicate
    );

    Ok(Json(json!({"status": "OK"})))
}
