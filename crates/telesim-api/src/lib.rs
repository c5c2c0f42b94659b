//! ---
//! tsim_section: "05-networking-external-interfaces"
//! tsim_subsection: "module"
//! tsim_type: "source"
//! tsim_scope: "code"
//! tsim_description: "HTTP control surface for scenario lifecycle requests."
//! tsim_version: "v0.0.0-prealpha"
//! tsim_owner: "tbd"
//! ---

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use telesim_catalog::{CatalogStore, Container, ContainerId, ContainerStatus};
use telesim_core::{ScenarioEngine, ScenarioError};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Shared API state exposed to handlers.
pub struct ApiState {
    engine: ScenarioEngine,
    version: String,
    start: Instant,
}

impl ApiState {
    pub fn new(engine: ScenarioEngine, version: impl Into<String>) -> Self {
        Self {
            engine,
            version: version.into(),
            start: Instant::now(),
        }
    }

    fn status(&self) -> Result<StatusResponse, ApiError> {
        let containers = self.engine.catalog().list_containers().map_err(|err| {
            ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        })?;
        let count = |status: ContainerStatus| {
            containers
                .iter()
                .filter(|container| container.status == status)
                .count()
        };
        Ok(StatusResponse {
            version: self.version.clone(),
            ready: self.engine.is_ready(),
            uptime_seconds: self.start.elapsed().as_secs(),
            container_count: containers.len(),
            running: count(ContainerStatus::Running),
            errored: count(ContainerStatus::Error),
        })
    }
}

impl fmt::Debug for ApiState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiState")
            .field("version", &self.version)
            .finish_non_exhaustive()
    }
}

/// Handle to the running API server.
#[derive(Debug)]
pub struct ApiServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl ApiServer {
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(result) => result,
            Err(err) => Err(err.into()),
        }
    }
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/status", get(get_status))
        .route("/api/containers", get(list_containers))
        .route("/api/containers/:id/status", get(container_status))
        .route("/api/containers/:id/start", post(start_container))
        .route("/api/containers/:id/stop", post(stop_container))
        .route("/api/containers/:id/recover", post(recover_container))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `addr` and serve the control API until shut down.
pub async fn spawn_api_server(state: Arc<ApiState>, addr: SocketAddr) -> Result<ApiServer> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind API listener {addr}"))?;
    let bound = listener
        .local_addr()
        .context("failed to read API listener address")?;
    let app = router(state);

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        info!(address = %bound, "api server listening");
        if let Err(err) = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
        {
            error!(address = %bound, error = %err, "api server exited with error");
            return Err(err.into());
        }
        Ok(())
    });

    Ok(ApiServer {
        addr: bound,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

#[derive(Debug, Serialize)]
struct StatusResponse {
    version: String,
    ready: bool,
    uptime_seconds: u64,
    container_count: usize,
    running: usize,
    errored: usize,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    kind: &'static str,
    message: String,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    kind: &'static str,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            kind: "internal",
            message: message.into(),
        }
    }
}

impl From<ScenarioError> for ApiError {
    fn from(err: ScenarioError) -> Self {
        let (status, kind) = match &err {
            ScenarioError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            ScenarioError::InvalidState { .. } => (StatusCode::CONFLICT, "invalid_state"),
            ScenarioError::NotReady => (StatusCode::SERVICE_UNAVAILABLE, "not_ready"),
            ScenarioError::TransientSendFailure(_) | ScenarioError::FatalSendFailure(_) => {
                (StatusCode::BAD_GATEWAY, "send_failure")
            }
            ScenarioError::StorageFailure(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "storage_failure")
            }
        };
        if status.is_server_error() {
            warn!(error = %err, "control request failed");
        }
        Self {
            status,
            kind,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            kind: self.kind,
            message: self.message,
        });
        (self.status, body).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

async fn get_status(State(state): State<Arc<ApiState>>) -> ApiResult<StatusResponse> {
    state.status().map(Json)
}

async fn list_containers(State(state): State<Arc<ApiState>>) -> ApiResult<Vec<Container>> {
    let containers = state
        .engine
        .catalog()
        .list_containers()
        .map_err(|err| ApiError::from(ScenarioError::from(err)))?;
    Ok(Json(containers))
}

async fn container_status(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<ContainerId>,
) -> ApiResult<Container> {
    Ok(Json(state.engine.status(id)?))
}

async fn start_container(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<ContainerId>,
) -> ApiResult<Container> {
    Ok(Json(state.engine.start(id).await?))
}

async fn stop_container(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<ContainerId>,
) -> ApiResult<Container> {
    Ok(Json(state.engine.stop(id).await?))
}

async fn recover_container(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<ContainerId>,
) -> ApiResult<Container> {
    Ok(Json(state.engine.recover(id).await?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_errors_map_to_http_statuses() {
        let cases = [
            (ScenarioError::NotFound(4), StatusCode::NOT_FOUND),
            (
                ScenarioError::InvalidState {
                    id: 4,
                    current: ContainerStatus::Running,
                    requested: ContainerStatus::Starting,
                },
                StatusCode::CONFLICT,
            ),
            (ScenarioError::NotReady, StatusCode::SERVICE_UNAVAILABLE),
            (
                ScenarioError::FatalSendFailure("gateway".into()),
                StatusCode::BAD_GATEWAY,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).status, expected);
        }
    }
}
