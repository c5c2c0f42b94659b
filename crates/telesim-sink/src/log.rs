//! ---
//! tsim_section: "02-messaging-ipc-data-model"
//! tsim_subsection: "module"
//! tsim_type: "source"
//! tsim_scope: "code"
//! tsim_description: "Sink writing telemetry as JSON lines through tracing."
//! tsim_version: "v0.0.0-prealpha"
//! tsim_owner: "tbd"
//! ---
use async_trait::async_trait;
use telesim_sim::TelemetryMessage;
use tracing::info;

use crate::{SendReceipt, SinkError, TelemetrySink};

/// Emits each record on the `telesim::telemetry` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl LogSink {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TelemetrySink for LogSink {
    async fn send_batch(&self, batch: &[TelemetryMessage]) -> Result<SendReceipt, SinkError> {
        for message in batch {
            let payload = serde_json::to_string(message)
                .map_err(|err| SinkError::Rejected(format!("unserialisable record: {err}")))?;
            info!(target: "telesim::telemetry", container_id = message.container_id, %payload);
        }
        Ok(SendReceipt {
            accepted: batch.len(),
        })
    }

    fn name(&self) -> &'static str {
        "log"
    }
}
