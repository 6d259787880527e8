//! Router tests: every route driven through `oneshot` against a controller
//! backed by the in-memory runtime and a stub HAProxy admin socket.

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::ServiceExt;

use hydra_api::build_router;
use hydra_cluster::{Controller, ControllerSettings, NodeDirectory};
use hydra_core::HydraConfig;
use hydra_lb::HaproxyClient;
use hydra_lb::testing::StubHaproxy;
use hydra_registry::{EmbeddedStore, ServiceRegistry};
use hydra_runtime::memory::MemoryRuntime;

struct TestApi {
    router: Router,
    runtime: MemoryRuntime,
    _haproxy: StubHaproxy,
}

fn test_api(backends: &[(&str, u32)]) -> TestApi {
    let runtime = MemoryRuntime::new();
    runtime.add_container("haproxy.test", "haproxy:2.8", &["test"]);
    runtime.publish_port("haproxy.test", 8888, "127.0.0.1", 32768);

    let haproxy = StubHaproxy::start().unwrap();
    for (alias, slots) in backends {
        haproxy.add_backend(alias, *slots);
    }

    let controller = Arc::new(Controller::new(
        NodeDirectory::new(Arc::new(runtime.clone()), "test"),
        HaproxyClient::new(haproxy.socket_path()),
        ServiceRegistry::new(EmbeddedStore::open_in_memory().unwrap()),
        ControllerSettings::from_config(&HydraConfig::default(), "test"),
    ));

    TestApi {
        router: build_router(controller),
        runtime,
        _haproxy: haproxy,
    }
}

async fn body_json(resp: axum::response::Response) -> Value {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

#[tokio::test]
async fn post_node_returns_container_summary() {
    let api = test_api(&[]);

    let req = Request::builder()
        .method("POST")
        .uri("/node")
        .body(Body::empty())
        .unwrap();
    let resp = api.router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body = body_json(resp).await;
    assert_eq!(body, json!({"name": "node-1.test", "image": "docker:dind", "state": "running"}));
    assert!(api.runtime.container_names().contains(&"node-1.test".to_string()));
}

#[tokio::test]
async fn get_state_lists_nodes_and_services() {
    let api = test_api(&[("web", 1)]);
    api.runtime.add_container("node-1.test", "docker:dind", &["test"]);

    let resp = api
        .router
        .clone()
        .oneshot(post_json(
            "/service",
            json!({"alias": "web", "image": "img", "node_port": 8080, "service_port": 80}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let req = Request::builder().uri("/state").body(Body::empty()).unwrap();
    let resp = api.router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body = body_json(resp).await;
    assert_eq!(body["name"], "test");
    assert_eq!(body["nodes"][0]["name"], "node-1.test");
    assert!(body["nodes"][0]["ip"].is_string());
    assert_eq!(body["services"][0]["name"], "web");
}

#[tokio::test]
async fn post_service_returns_config() {
    let api = test_api(&[("web", 2)]);
    api.runtime.add_container("node-1.test", "docker:dind", &["test"]);
    api.runtime.add_container("node-2.test", "docker:dind", &["test"]);

    let resp = api
        .router
        .oneshot(post_json(
            "/service",
            json!({"alias": "web", "image": "img", "node_port": 8080, "service_port": 80, "replicas": 2}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body = body_json(resp).await;
    assert_eq!(body["name"], "web");
    assert_eq!(body["nodes"].as_array().unwrap().len(), 2);
    assert_eq!(body["nodes"][0]["service_image"], "img");
    assert_eq!(body["endpoints"], json!(["http://127.0.0.1:32768/web"]));
}

#[tokio::test]
async fn post_service_validation_error_is_400() {
    let api = test_api(&[("web", 1)]);

    let resp = api
        .router
        .oneshot(post_json(
            "/service",
            json!({"alias": "web!", "image": "img", "node_port": 8080, "service_port": 80}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body = body_json(resp).await;
    assert!(body["error"].as_str().unwrap().contains("alias"));
}

#[tokio::test]
async fn post_service_capacity_error_is_400() {
    let api = test_api(&[("web", 1)]);
    api.runtime.add_container("node-1.test", "docker:dind", &["test"]);

    let resp = api
        .router
        .oneshot(post_json(
            "/service",
            json!({"alias": "web", "image": "img", "node_port": 8080, "service_port": 80, "replicas": 3}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body = body_json(resp).await;
    assert!(body["error"].as_str().unwrap().contains("available 1"));
}

#[tokio::test]
async fn post_service_malformed_body_is_400() {
    let api = test_api(&[]);

    let req = Request::builder()
        .method("POST")
        .uri("/service")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let resp = api.router.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert!(body_json(resp).await["error"].is_string());
}

#[tokio::test]
async fn execution_failure_is_500() {
    let api = test_api(&[("web", 1)]);
    api.runtime.add_container("node-1.test", "docker:dind", &["test"]);
    api.runtime.fail_exec_on("node-1.test");

    let resp = api
        .router
        .oneshot(post_json(
            "/service",
            json!({"alias": "web", "image": "img", "node_port": 8080, "service_port": 80}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body_json(resp).await["error"].as_str().unwrap().contains("node-1.test"));
}
