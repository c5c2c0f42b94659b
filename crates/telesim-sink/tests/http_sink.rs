//! ---
//! tsim_section: "12-testing"
//! tsim_subsection: "test"
//! tsim_type: "test"
//! tsim_scope: "code"
//! tsim_description: "HTTP sink against a local gateway stub."
//! tsim_version: "v0.0.0-prealpha"
//! tsim_owner: "tbd"
//! ---
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use serde_json::Value;
use telesim_sim::TelemetryMessage;
use telesim_sink::{HttpSink, SinkError, TelemetrySink};
use tokio::net::TcpListener;

#[derive(Clone, Default)]
struct Gateway {
    received: Arc<Mutex<Vec<(Option<String>, Value)>>>,
    status: Arc<Mutex<Option<StatusCode>>>,
}

async fn ingest(
    State(gateway): State<Gateway>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> StatusCode {
    let auth = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);
    gateway.received.lock().unwrap().push((auth, body));
    gateway.status.lock().unwrap().unwrap_or(StatusCode::ACCEPTED)
}

async fn spawn_gateway(gateway: Gateway) -> url::Url {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = Router::new()
        .route("/ingest", post(ingest))
        .with_state(gateway);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/ingest").parse().unwrap()
}

fn message(sequence: u64) -> TelemetryMessage {
    TelemetryMessage {
        timestamp: Utc::now(),
        sensor_id: 1,
        sensor_name: "temp".into(),
        device_id: 2,
        device_name: "boiler".into(),
        container_id: 3,
        value: Some(21.5),
        unit: "°C".into(),
        sequence,
    }
}

#[tokio::test]
async fn posts_batch_as_json_array_with_bearer_token() {
    let gateway = Gateway::default();
    let endpoint = spawn_gateway(gateway.clone()).await;
    let sink = HttpSink::new(endpoint, Some("s3cret".into()), Duration::from_secs(5)).unwrap();

    let receipt = sink.send_batch(&[message(1), message(2)]).await.unwrap();
    assert_eq!(receipt.accepted, 2);

    let received = gateway.received.lock().unwrap().clone();
    assert_eq!(received.len(), 1);
    let (auth, body) = &received[0];
    assert_eq!(auth.as_deref(), Some("Bearer s3cret"));
    let records = body.as_array().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[1]["sequence"], 2);
    assert_eq!(records[0]["deviceName"], "boiler");
}

#[tokio::test]
async fn server_errors_map_to_transient_failures() {
    let gateway = Gateway::default();
    *gateway.status.lock().unwrap() = Some(StatusCode::SERVICE_UNAVAILABLE);
    let endpoint = spawn_gateway(gateway.clone()).await;
    let sink = HttpSink::new(endpoint, None, Duration::from_secs(5)).unwrap();

    let err = sink.send_batch(&[message(1)]).await.unwrap_err();
    assert!(matches!(err, SinkError::Transient(_)), "{err:?}");
}

#[tokio::test]
async fn client_errors_map_to_rejections() {
    let gateway = Gateway::default();
    *gateway.status.lock().unwrap() = Some(StatusCode::BAD_REQUEST);
    let endpoint = spawn_gateway(gateway.clone()).await;
    let sink = HttpSink::new(endpoint, None, Duration::from_secs(5)).unwrap();

    let err = sink.send_batch(&[message(1)]).await.unwrap_err();
    assert!(matches!(err, SinkError::Rejected(_)), "{err:?}");
}

#[tokio::test]
async fn unreachable_gateway_is_transient() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let endpoint = format!("http://{addr}/ingest").parse().unwrap();
    let sink = HttpSink::new(endpoint, None, Duration::from_millis(500)).unwrap();

    let err = sink.send_batch(&[message(1)]).await.unwrap_err();
    assert!(err.is_retryable());
}
