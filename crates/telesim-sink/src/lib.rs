//! ---
//! tsim_section: "02-messaging-ipc-data-model"
//! tsim_subsection: "module"
//! tsim_type: "source"
//! tsim_scope: "code"
//! tsim_description: "Telemetry sink trait and adapter wiring."
//! tsim_version: "v0.0.0-prealpha"
//! tsim_owner: "tbd"
//! ---
//! Delivery side of telesim.
//!
//! The engine only sees [`TelemetrySink`]. Adapters decide whether a failure
//! is worth retrying by returning [`SinkError::Transient`] or a terminal
//! variant.

use std::sync::Arc;

use async_trait::async_trait;
use telesim_catalog::CatalogStore;
use telesim_common::{SinkConfig, SinkKind};
use telesim_sim::TelemetryMessage;
use thiserror::Error;

mod demo;
mod http;
mod log;
mod memory;
mod mqtt;

pub use demo::DemoModeSink;
pub use http::HttpSink;
pub use log::LogSink;
pub use memory::MemorySink;
pub use mqtt::MqttSink;

/// Catalog option naming the gateway when `[sink].endpoint` is unset.
pub const GATEWAY_ENDPOINT_OPTION: &str = "gateway_endpoint";

/// Shared sink handle injected into the engine.
pub type SharedSink = Arc<dyn TelemetrySink>;

/// Acknowledgement for a delivered batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendReceipt {
    pub accepted: usize,
}

/// Delivery failures reported by sinks.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SinkError {
    /// The gateway could not be reached or asked us to come back later.
    #[error("transient delivery failure: {0}")]
    Transient(String),
    /// The gateway refused the batch; resending it will not help.
    #[error("gateway rejected batch: {0}")]
    Rejected(String),
    #[error("sink misconfigured: {0}")]
    Config(String),
}

impl SinkError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SinkError::Transient(_))
    }
}

/// At-least-once publisher of telemetry batches.
///
/// A batch may be delivered more than once when a send is retried after an
/// ambiguous failure; receivers deduplicate on `(sensorId, sequence)`.
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn send_batch(&self, batch: &[TelemetryMessage]) -> Result<SendReceipt, SinkError>;

    /// Human-readable sink name for logging/metrics.
    fn name(&self) -> &'static str;
}

/// Build the sink selected in configuration.
///
/// The mqtt sink spawns its connection task, so it has to be built inside a
/// tokio runtime.
pub fn build_sink(config: &SinkConfig) -> Result<SharedSink, SinkError> {
    match config.kind {
        SinkKind::Log => Ok(Arc::new(LogSink::new())),
        SinkKind::Memory => Ok(Arc::new(MemorySink::new())),
        SinkKind::Http => {
            let endpoint = config
                .endpoint
                .clone()
                .ok_or_else(|| SinkError::Config("http sink requires an endpoint".into()))?;
            Ok(Arc::new(HttpSink::new(
                endpoint,
                config.token.clone(),
                config.timeout,
            )?))
        }
        SinkKind::Mqtt => Ok(Arc::new(MqttSink::connect(&config.mqtt, config.timeout)?)),
    }
}

/// Fill a missing http endpoint from the catalog's `gateway_endpoint` option.
///
/// An explicit `[sink].endpoint` always wins; an empty option leaves the
/// endpoint unset.
pub fn resolve_gateway_endpoint(
    config: &SinkConfig,
    catalog: &dyn CatalogStore,
) -> Result<SinkConfig, SinkError> {
    let mut resolved = config.clone();
    if resolved.kind != SinkKind::Http || resolved.endpoint.is_some() {
        return Ok(resolved);
    }
    let option = catalog
        .option(GATEWAY_ENDPOINT_OPTION)
        .map_err(|err| SinkError::Config(format!("unable to read {GATEWAY_ENDPOINT_OPTION}: {err}")))?;
    if let Some(value) = option.filter(|value| !value.trim().is_empty()) {
        let endpoint = value.trim().parse().map_err(|err| {
            SinkError::Config(format!("{GATEWAY_ENDPOINT_OPTION} {value:?} is not a URL: {err}"))
        })?;
        resolved.endpoint = Some(endpoint);
    }
    Ok(resolved)
}
