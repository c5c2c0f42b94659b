//! ---
//! tsim_section: "12-testing"
//! tsim_subsection: "test"
//! tsim_type: "test"
//! tsim_scope: "code"
//! tsim_description: "Control API round trips against a live engine."
//! tsim_version: "v0.0.0-prealpha"
//! tsim_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::sync::Arc;

use reqwest::StatusCode;
use serde_json::Value;
use telesim_api::{spawn_api_server, ApiServer, ApiState};
use telesim_catalog::{CatalogStore, ContainerId, MemoryCatalog, NewContainer, NewDevice, NewSensor};
use telesim_core::{EngineSettings, ScenarioEngine};
use telesim_metrics::{new_registry, EngineMetrics};
use telesim_sink::MemorySink;

async fn serve(recovered: bool) -> (ApiServer, String, ContainerId) {
    let catalog = Arc::new(MemoryCatalog::new());
    let container = catalog.create_container(NewContainer::named("line-1")).unwrap();
    let device = catalog
        .create_device(NewDevice::named("press").in_container(container.id))
        .unwrap();
    catalog
        .create_sensor(NewSensor::ranged(device.id, "temperature", 10.0, 80.0))
        .unwrap();

    let registry = new_registry();
    let engine = ScenarioEngine::new(
        catalog,
        Arc::new(MemorySink::new()),
        EngineSettings::default(),
        EngineMetrics::new(&registry).unwrap(),
    );
    if recovered {
        engine.recover_on_startup().unwrap();
    }
    let state = Arc::new(ApiState::new(engine, "test"));
    let server = spawn_api_server(state, SocketAddr::from(([127, 0, 0, 1], 0)))
        .await
        .unwrap();
    let base = format!("http://{}", server.addr());
    (server, base, container.id)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn start_status_stop_round_trip() {
    let (server, base, id) = serve(true).await;
    let client = reqwest::Client::new();

    let started: Value = client
        .post(format!("{base}/api/containers/{id}/start"))
        .send()
        .await
        .unwrap()
        .error_for_status()
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(started["status"], "running");
    assert_eq!(started["is_active"], true);

    let conflict = client
        .post(format!("{base}/api/containers/{id}/start"))
        .send()
        .await
        .unwrap();
    assert_eq!(conflict.status(), StatusCode::CONFLICT);
    let body: Value = conflict.json().await.unwrap();
    assert_eq!(body["kind"], "invalid_state");

    let summary: Value = client
        .get(format!("{base}/api/status"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(summary["ready"], true);
    assert_eq!(summary["running"], 1);

    let stopped: Value = client
        .post(format!("{base}/api/containers/{id}/stop"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stopped["status"], "stopped");

    let listed: Value = client
        .get(format!("{base}/api/containers"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed.as_array().map(Vec::len), Some(1));
    assert_eq!(listed[0]["name"], "line-1");

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn unknown_container_is_404_and_bad_recover_is_409() {
    let (server, base, id) = serve(true).await;
    let client = reqwest::Client::new();

    let missing = client
        .get(format!("{base}/api/containers/999/status"))
        .send()
        .await
        .unwrap();
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    let recover = client
        .post(format!("{base}/api/containers/{id}/recover"))
        .send()
        .await
        .unwrap();
    assert_eq!(recover.status(), StatusCode::CONFLICT);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn control_requests_wait_for_startup_recovery() {
    let (server, base, id) = serve(false).await;
    let response = reqwest::Client::new()
        .post(format!("{base}/api/containers/{id}/start"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    server.shutdown().await.unwrap();
}
