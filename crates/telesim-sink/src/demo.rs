//! ---
//! tsim_section: "02-messaging-ipc-data-model"
//! tsim_subsection: "module"
//! tsim_type: "source"
//! tsim_scope: "code"
//! tsim_description: "Demo-mode wrapper that keeps telemetry in-process."
//! tsim_version: "v0.0.0-prealpha"
//! tsim_owner: "tbd"
//! ---
use async_trait::async_trait;
use telesim_sim::TelemetryMessage;
use tracing::debug;

use crate::{SendReceipt, SharedSink, SinkError, TelemetrySink};

/// Acknowledges batches locally instead of forwarding them.
pub struct DemoModeSink {
    inner: SharedSink,
}

impl DemoModeSink {
    pub fn wrap(inner: SharedSink) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl TelemetrySink for DemoModeSink {
    async fn send_batch(&self, batch: &[TelemetryMessage]) -> Result<SendReceipt, SinkError> {
        debug!(
            wrapped = self.inner.name(),
            records = batch.len(),
            "demo mode: batch acknowledged without delivery"
        );
        Ok(SendReceipt {
            accepted: batch.len(),
        })
    }

    fn name(&self) -> &'static str {
        "demo"
    }
}
