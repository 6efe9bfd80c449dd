//! HTTP surface: `GET /health` and `GET /metrics`.

use crate::metrics::Metrics;
use crate::source::MessageSource;
use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;
use vitalflow_db::DedupGate;
use vitalflow_sinks::ObjectStore;

/// Handles the probes read from.
#[derive(Clone)]
pub struct HealthState {
    pub gate: DedupGate,
    pub payload_store: Arc<dyn ObjectStore>,
    pub source: Arc<dyn MessageSource>,
    pub metrics: Arc<Metrics>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyStatus {
    pub backend: String,
    pub reachable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DependencyStatus {
    fn probe<E: Display>(backend: &str, result: std::result::Result<(), E>) -> Self {
        match result {
            Ok(()) => Self {
                backend: backend.to_string(),
                reachable: true,
                error: None,
            },
            Err(e) => Self {
                backend: backend.to_string(),
                reachable: false,
                error: Some(e.to_string()),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    /// `ok` or `degraded`
    pub status: String,
    pub dedup_store: DependencyStatus,
    pub payload_store: DependencyStatus,
    pub message_source: DependencyStatus,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.dedup_store.reachable && self.payload_store.reachable && self.message_source.reachable
    }
}

pub async fn check(state: &HealthState) -> HealthReport {
    let (dedup, payload, source) = tokio::join!(
        state.gate.ping(),
        state.payload_store.ping(),
        state.source.ping()
    );
    let mut report = HealthReport {
        status: String::new(),
        dedup_store: DependencyStatus::probe(state.gate.backend_name(), dedup),
        payload_store: DependencyStatus::probe(state.payload_store.backend_name(), payload),
        message_source: DependencyStatus::probe(state.source.name(), source),
    };
    report.status = if report.is_healthy() { "ok" } else { "degraded" }.to_string();
    report
}

pub async fn health_handler(State(state): State<HealthState>) -> (StatusCode, Json<HealthReport>) {
    let report = check(&state).await;
    let status = if report.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}

pub async fn metrics_handler(State(state): State<HealthState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.prometheus_format(),
    )
}

pub fn router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Bind `addr` and serve until `cancel` fires.
pub async fn serve(addr: &str, state: HealthState, cancel: CancellationToken) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind health endpoint on {}", addr))?;
    serve_on(listener, state, cancel).await
}

pub async fn serve_on(
    listener: TcpListener,
    state: HealthState,
    cancel: CancellationToken,
) -> Result<()> {
    let local = listener.local_addr().context("Health listener has no address")?;
    info!(addr = %local, "Health endpoint listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .context("Health server error")
}
