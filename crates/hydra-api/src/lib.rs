//! hydra-api — HTTP control API for one cluster.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/node` | Create a node |
//! | GET | `/state` | Cluster name, live nodes, service documents |
//! | POST | `/service` | Deploy a service |
//!
//! Validation and capacity errors answer `400 {"error": ...}`; anything
//! else answers `500 {"error": ...}`.

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};

use hydra_cluster::Controller;
use hydra_runtime::ContainerRuntime;

/// Shared state for API handlers.
pub struct ApiState<R> {
    pub controller: Arc<Controller<R>>,
}

impl<R> Clone for ApiState<R> {
    fn clone(&self) -> Self {
        Self {
            controller: self.controller.clone(),
        }
    }
}

pub fn build_router<R: ContainerRuntime>(controller: Arc<Controller<R>>) -> Router {
    Router::new()
        .route("/node", post(handlers::create_node::<R>))
        .route("/state", get(handlers::cluster_state::<R>))
        .route("/service", post(handlers::deploy_service::<R>))
        .with_state(ApiState { controller })
}
