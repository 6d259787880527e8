//! HTTP handlers. Bodies are the bare JSON documents, with no envelope.

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::{error, info, warn};

use hydra_cluster::ClusterError;
use hydra_core::DeployRequest;
use hydra_runtime::ContainerRuntime;

use crate::ApiState;

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// A controller error rendered as `{error}` with a 400 or 500 status.
pub struct ApiError(ClusterError);

impl From<ClusterError> for ApiError {
    fn from(e: ClusterError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = if self.0.is_client_error() {
            warn!(error = %self.0, "request rejected");
            StatusCode::BAD_REQUEST
        } else {
            error!(error = %self.0, "request failed");
            StatusCode::INTERNAL_SERVER_ERROR
        };
        error_response(status, self.0.to_string())
    }
}

fn error_response(status: StatusCode, error: String) -> Response {
    (status, Json(ErrorBody { error })).into_response()
}

#[derive(Serialize)]
struct NodeCreated {
    name: String,
    image: String,
    state: String,
}

/// POST /node
pub async fn create_node<R: ContainerRuntime>(
    State(state): State<ApiState<R>>,
) -> Result<Response, ApiError> {
    let info = state.controller.create_node().await?;
    info!(node = %info.name, "node created via API");
    Ok(Json(NodeCreated {
        name: info.name,
        image: info.image,
        state: info.state,
    })
    .into_response())
}

/// GET /state
pub async fn cluster_state<R: ContainerRuntime>(
    State(state): State<ApiState<R>>,
) -> Result<Response, ApiError> {
    let snapshot = state.controller.state().await?;
    Ok(Json(snapshot).into_response())
}

/// POST /service
pub async fn deploy_service<R: ContainerRuntime>(
    State(state): State<ApiState<R>>,
    body: Result<Json<DeployRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => {
            warn!(error = %rejection.body_text(), "malformed deploy request");
            return Ok(error_response(StatusCode::BAD_REQUEST, rejection.body_text()));
        }
    };
    let config = state.controller.deploy_service(request).await?;
    Ok(Json(config).into_response())
}
