//! ---
//! tsim_section: "10-observability"
//! tsim_subsection: "module"
//! tsim_type: "source"
//! tsim_scope: "code"
//! tsim_description: "Prometheus metrics for the scenario engine and daemon."
//! tsim_version: "v0.0.0-prealpha"
//! tsim_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, StatusCode};
use axum::routing::get;
use axum::{response::IntoResponse, Router};
use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Shared registry type used across services.
pub type SharedRegistry = Arc<Registry>;

pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Spawn an HTTP server that exposes the registry at `/metrics`.
pub async fn spawn_http_server(registry: SharedRegistry, addr: SocketAddr) -> Result<MetricsServer> {
    let app = Router::new().route(
        "/metrics",
        get({
            let registry = registry.clone();
            move || metrics_handler(registry.clone())
        }),
    );

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind metrics listener {addr}"))?;
    let bound = listener
        .local_addr()
        .context("failed to read metrics listener address")?;

    info!(address = %bound, "metrics server starting");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("metrics server encountered an error")?;
        Ok(())
    });

    Ok(MetricsServer {
        addr: bound,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

async fn metrics_handler(registry: SharedRegistry) -> impl IntoResponse {
    let families = registry.gather();
    let encoder = TextEncoder::new();
    match encoder.encode_to_string(&families) {
        Ok(body) => (
            StatusCode::OK,
            [(
                header::CONTENT_TYPE,
                HeaderValue::from_static(prometheus::TEXT_FORMAT),
            )],
            body,
        ),
        Err(err) => {
            error!(error = %err, "failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("text/plain; charset=utf-8"),
                )],
                String::from("metrics encoding error"),
            )
        }
    }
}

/// Handle to the running HTTP exporter.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    /// Bound address; differs from the requested one when port 0 was used.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal shutdown and await task completion.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(join_err) => Err(anyhow::Error::new(join_err)),
        }
    }
}

/// Metrics recorded by the daemon process itself.
#[derive(Clone)]
pub struct DaemonMetrics {
    starts_total: IntCounter,
    startup_recovered: IntCounter,
    config_load_seconds: Histogram,
}

impl DaemonMetrics {
    pub fn new(registry: &Registry) -> Result<Self> {
        let starts_total = IntCounter::with_opts(Opts::new(
            "telesimd_starts_total",
            "Total number of times the telesim daemon has initialised",
        ))?;
        registry.register(Box::new(starts_total.clone()))?;

        let startup_recovered = IntCounter::with_opts(Opts::new(
            "telesimd_startup_recovered_total",
            "Containers forced back to stopped by startup recovery",
        ))?;
        registry.register(Box::new(startup_recovered.clone()))?;

        let buckets = prometheus::exponential_buckets(0.001, 2.0, 16)
            .context("failed to construct histogram buckets")?;
        let config_load_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "telesimd_config_load_seconds",
                "Time spent loading and validating configuration",
            )
            .buckets(buckets),
        )?;
        registry.register(Box::new(config_load_seconds.clone()))?;

        Ok(Self {
            starts_total,
            startup_recovered,
            config_load_seconds,
        })
    }

    pub fn inc_start(&self) {
        self.starts_total.inc();
    }

    pub fn record_recovered(&self, count: usize) {
        self.startup_recovered.inc_by(count as u64);
    }

    pub fn observe_config_load(&self, seconds: f64) {
        self.config_load_seconds.observe(seconds);
    }
}

/// Scenario engine instrumentation, labelled by container id.
#[derive(Clone, Debug)]
pub struct EngineMetrics {
    scenarios_running: IntGauge,
    batches_sent: IntCounterVec,
    send_failures: IntCounterVec,
    messages_generated: IntCounterVec,
    scenario_errors: IntCounterVec,
}

impl EngineMetrics {
    pub fn new(registry: &Registry) -> Result<Self> {
        let scenarios_running = IntGauge::with_opts(Opts::new(
            "telesim_scenarios_running",
            "Number of containers currently in the running state",
        ))?;
        registry.register(Box::new(scenarios_running.clone()))?;

        let batches_sent = IntCounterVec::new(
            Opts::new(
                "telesim_batches_sent_total",
                "Telemetry batches acknowledged by the sink",
            ),
            &["container"],
        )?;
        registry.register(Box::new(batches_sent.clone()))?;

        let send_failures = IntCounterVec::new(
            Opts::new(
                "telesim_send_failures_total",
                "Failed batch send attempts by container and failure kind",
            ),
            &["container", "kind"],
        )?;
        registry.register(Box::new(send_failures.clone()))?;

        let messages_generated = IntCounterVec::new(
            Opts::new(
                "telesim_messages_generated_total",
                "Telemetry records produced by sensor simulators",
            ),
            &["container"],
        )?;
        registry.register(Box::new(messages_generated.clone()))?;

        let scenario_errors = IntCounterVec::new(
            Opts::new(
                "telesim_scenario_errors_total",
                "Scenarios that transitioned into the error state",
            ),
            &["container"],
        )?;
        registry.register(Box::new(scenario_errors.clone()))?;

        Ok(Self {
            scenarios_running,
            batches_sent,
            send_failures,
            messages_generated,
            scenario_errors,
        })
    }

    pub fn set_running(&self, count: usize) {
        self.scenarios_running.set(count as i64);
    }

    pub fn record_batch(&self, container: i64) {
        self.batches_sent
            .with_label_values(&[&container.to_string()])
            .inc();
    }

    pub fn record_send_failure(&self, container: i64, kind: &str) {
        self.send_failures
            .with_label_values(&[&container.to_string(), kind])
            .inc();
    }

    pub fn record_generated(&self, container: i64, count: usize) {
        self.messages_generated
            .with_label_values(&[&container.to_string()])
            .inc_by(count as u64);
    }

    pub fn record_scenario_error(&self, container: i64) {
        self.scenario_errors
            .with_label_values(&[&container.to_string()])
            .inc();
    }
}

pub use prometheus;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_metrics_register_once_per_registry() {
        let registry = new_registry();
        let metrics = EngineMetrics::new(&registry).unwrap();
        metrics.record_batch(1);
        metrics.record_generated(1, 5);
        metrics.set_running(2);
        assert!(EngineMetrics::new(&registry).is_err());

        let names: Vec<String> = registry
            .gather()
            .iter()
            .map(|family| family.get_name().to_owned())
            .collect();
        assert!(names.contains(&"telesim_batches_sent_total".to_owned()));
        assert!(names.contains(&"telesim_scenarios_running".to_owned()));
    }

    #[tokio::test]
    async fn scrape_endpoint_serves_text_format() {
        let registry = new_registry();
        let daemon = DaemonMetrics::new(&registry).unwrap();
        daemon.inc_start();

        let server = spawn_http_server(registry, "127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let body = reqwest::get(format!("http://{}/metrics", server.addr()))
            .await
            .unwrap()
            .text()
            .await
            .unwrap();
        assert!(body.contains("telesimd_starts_total 1"));
        server.shutdown().await.unwrap();
    }
}
