//! ---
//! tsim_section: "12-testing"
//! tsim_subsection: "test"
//! tsim_type: "test"
//! tsim_scope: "code"
//! tsim_description: "MQTT sink against a minimal local broker."
//! tsim_version: "v0.0.0-prealpha"
//! tsim_owner: "tbd"
//! ---
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use telesim_common::MqttConfig;
use telesim_sim::TelemetryMessage;
use telesim_sink::{MqttSink, SinkError, TelemetrySink};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;

const CONNECT: u8 = 1;
const PUBLISH: u8 = 3;
const PINGREQ: u8 = 12;
const DISCONNECT: u8 = 14;

async fn read_packet(stream: &mut TcpStream) -> Option<(u8, Vec<u8>)> {
    let header = stream.read_u8().await.ok()?;
    let mut length = 0usize;
    let mut shift = 0;
    loop {
        let byte = stream.read_u8().await.ok()?;
        length |= ((byte & 0x7f) as usize) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }
    let mut body = vec![0; length];
    stream.read_exact(&mut body).await.ok()?;
    Some((header, body))
}

/// Accepts MQTT 3.1.1 clients, acknowledges connects and QoS 1 publishes,
/// and forwards every published `(topic, payload)`.
async fn serve_client(mut stream: TcpStream, published: mpsc::UnboundedSender<(String, Value)>) {
    while let Some((header, body)) = read_packet(&mut stream).await {
        match header >> 4 {
            CONNECT => stream.write_all(&[0x20, 0x02, 0x00, 0x00]).await.unwrap(),
            PUBLISH => {
                let qos = (header >> 1) & 0x03;
                let topic_len = u16::from_be_bytes([body[0], body[1]]) as usize;
                let topic = String::from_utf8(body[2..2 + topic_len].to_vec()).unwrap();
                let mut offset = 2 + topic_len;
                if qos > 0 {
                    let id = [body[offset], body[offset + 1]];
                    stream.write_all(&[0x40, 0x02, id[0], id[1]]).await.unwrap();
                    offset += 2;
                }
                let payload = serde_json::from_slice(&body[offset..]).unwrap();
                let _ = published.send((topic, payload));
            }
            PINGREQ => stream.write_all(&[0xD0, 0x00]).await.unwrap(),
            DISCONNECT => break,
            _ => {}
        }
    }
}

async fn spawn_broker() -> (u16, mpsc::UnboundedReceiver<(String, Value)>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            tokio::spawn(serve_client(stream, tx.clone()));
        }
    });
    (port, rx)
}

fn broker_config(port: u16) -> MqttConfig {
    MqttConfig {
        host: "127.0.0.1".into(),
        port,
        client_id: "telesim-test".into(),
        topic_prefix: "plant/".into(),
        ..MqttConfig::default()
    }
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
async fn publishes_each_record_on_its_sensor_topic() {
    let (port, mut published) = spawn_broker().await;
    let sink = MqttSink::connect(&broker_config(port), Duration::from_secs(5)).unwrap();

    let receipt = sink.send_batch(&[message(1), message(2)]).await.unwrap();
    assert_eq!(receipt.accepted, 2);

    for expected in [1, 2] {
        let (topic, payload) = timeout(Duration::from_secs(5), published.recv())
            .await
            .expect("broker receives the record")
            .unwrap();
        assert_eq!(topic, "plant/3/2/1");
        assert_eq!(payload["sequence"], expected);
        assert_eq!(payload["deviceName"], "boiler");
    }
}

#[tokio::test]
async fn unreachable_broker_is_transient() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    let sink = MqttSink::connect(&broker_config(port), Duration::from_millis(300)).unwrap();

    let err = sink.send_batch(&[message(1)]).await.unwrap_err();
    assert!(matches!(err, SinkError::Transient(_)), "{err:?}");
    assert!(err.is_retryable());
}
