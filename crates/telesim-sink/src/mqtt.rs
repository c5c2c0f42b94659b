//! ---
//! tsim_section: "05-networking-external-interfaces"
//! tsim_subsection: "module"
//! tsim_type: "source"
//! tsim_scope: "code"
//! tsim_description: "MQTT broker sink publishing one message per record."
//! tsim_version: "v0.0.0-prealpha"
//! tsim_owner: "tbd"
//! ---
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use telesim_common::MqttConfig;
use telesim_sim::TelemetryMessage;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{SendReceipt, SinkError, TelemetrySink};

const REQUEST_CAPACITY: usize = 256;
const RECONNECT_DELAY: Duration = Duration::from_secs(1);
const MIN_KEEP_ALIVE: Duration = Duration::from_secs(5);

/// Publishes every record as JSON to `<prefix>/<container>/<device>/<sensor>`.
///
/// The broker connection is driven by a background task that reconnects on
/// its own; sends made while it is down fail as transient.
pub struct MqttSink {
    client: AsyncClient,
    connected: watch::Receiver<bool>,
    driver: JoinHandle<()>,
    broker: String,
    topic_prefix: String,
    timeout: Duration,
}

impl MqttSink {
    /// Start the broker connection. Must be called inside a tokio runtime.
    pub fn connect(config: &MqttConfig, timeout: Duration) -> Result<Self, SinkError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| SinkError::Config("mqtt sink needs a tokio runtime".into()))?;
        if config.host.trim().is_empty() {
            return Err(SinkError::Config("mqtt sink requires a broker host".into()));
        }

        let mut options = MqttOptions::new(config.client_id.clone(), config.host.clone(), config.port);
        options.set_keep_alive(config.keep_alive.max(MIN_KEEP_ALIVE));
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            options.set_credentials(username.clone(), password.clone());
        }
        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);

        let broker = format!("{}:{}", config.host, config.port);
        let (state, connected) = watch::channel(false);
        let driver = runtime.spawn(drive(eventloop, state, broker.clone()));
        Ok(Self {
            client,
            connected,
            driver,
            broker,
            topic_prefix: config.topic_prefix.trim_end_matches('/').to_string(),
            timeout,
        })
    }

    pub fn topic_for(&self, message: &TelemetryMessage) -> String {
        format!(
            "{}/{}/{}/{}",
            self.topic_prefix, message.container_id, message.device_id, message.sensor_id
        )
    }

    async fn await_connection(&self) -> Result<(), SinkError> {
        let mut connected = self.connected.clone();
        let result = match tokio::time::timeout(self.timeout, connected.wait_for(|up| *up)).await {
            Ok(Ok(_)) => Ok(()),
            _ => Err(SinkError::Transient(format!(
                "mqtt broker {} not connected",
                self.broker
            ))),
        };
        result
    }
}

async fn drive(mut eventloop: EventLoop, state: watch::Sender<bool>, broker: String) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                info!(broker = %broker, "mqtt broker connected");
                state.send_replace(true);
            }
            Ok(_) => {}
            Err(err) => {
                if state.send_replace(false) {
                    warn!(broker = %broker, error = %err, "mqtt broker connection lost");
                } else {
                    debug!(broker = %broker, error = %err, "mqtt broker unreachable");
                }
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
}

#[async_trait]
impl TelemetrySink for MqttSink {
    async fn send_batch(&self, batch: &[TelemetryMessage]) -> Result<SendReceipt, SinkError> {
        self.await_connection().await?;
        for message in batch {
            let payload = serde_json::to_vec(message)
                .map_err(|err| SinkError::Rejected(format!("unencodable record: {err}")))?;
            let publish =
                self.client
                    .publish(self.topic_for(message), QoS::AtLeastOnce, false, payload);
            match tokio::time::timeout(self.timeout, publish).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => return Err(SinkError::Transient(err.to_string())),
                Err(_) => {
                    return Err(SinkError::Transient(format!(
                        "publish to {} timed out",
                        self.broker
                    )))
                }
            }
        }
        debug!(broker = %self.broker, records = batch.len(), "batch published");
        Ok(SendReceipt {
            accepted: batch.len(),
        })
    }

    fn name(&self) -> &'static str {
        "mqtt"
    }
}

impl Drop for MqttSink {
    fn drop(&mut self) {
        self.driver.abort();
    }
}
