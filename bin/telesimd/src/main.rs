//! ---
//! tsim_section: "01-core-functionality"
//! tsim_subsection: "binary"
//! tsim_type: "source"
//! tsim_scope: "code"
//! tsim_description: "Binary entrypoint for the telesim daemon."
//! tsim_version: "v0.0.0-prealpha"
//! tsim_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use telesim_api::{spawn_api_server, ApiServer, ApiState};
use telesim_catalog::{CatalogStore, MemoryCatalog, SharedCatalog, SqliteCatalog};
use telesim_common::{init_tracing, AppConfig, CatalogBackend, CatalogConfig};
use telesim_core::{EngineSettings, ScenarioEngine};
use telesim_metrics::{new_registry, spawn_http_server, DaemonMetrics, EngineMetrics};
use telesim_sink::{build_sink, resolve_gateway_endpoint};
use tokio::signal;
use tracing::{info, warn};

const DEFAULT_CONFIG: &str = "configs/telesim.toml";

#[derive(Debug, Parser)]
#[command(
    author,
    version = concat!("telesim ", env!("CARGO_PKG_VERSION")),
    about = "telesim telemetry scenario daemon",
    long_about = None
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Run the scenario engine and control API")]
    Run,
    #[command(about = "Validate the configuration and exit")]
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from(DEFAULT_CONFIG));

    let load_started = Instant::now();
    let loaded = AppConfig::load_with_source(&candidates)?;
    let load_duration = load_started.elapsed();
    init_tracing("telesimd", &loaded.config.logging)?;
    info!(config_path = %loaded.source.display(), "configuration loaded");

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_daemon(loaded.config, load_duration.as_secs_f64()).await,
        Commands::CheckConfig => {
            println!("{}: ok", loaded.source.display());
            Ok(())
        }
    }
}

fn open_catalog(config: &CatalogConfig) -> Result<SharedCatalog> {
    let catalog: SharedCatalog = match config.backend {
        CatalogBackend::Memory => Arc::new(MemoryCatalog::new()),
        CatalogBackend::Sqlite => Arc::new(
            SqliteCatalog::open(&config.path)
                .with_context(|| format!("failed to open catalog {}", config.path.display()))?,
        ),
    };
    if config.seed_options {
        let seeded = catalog
            .seed_default_options()
            .context("failed to seed default options")?;
        if seeded > 0 {
            info!(seeded, "default options written");
        }
    }
    Ok(catalog)
}

async fn run_daemon(config: AppConfig, config_load_seconds: f64) -> Result<()> {
    let registry = new_registry();
    let daemon_metrics = DaemonMetrics::new(&registry)?;
    daemon_metrics.observe_config_load(config_load_seconds);
    daemon_metrics.inc_start();

    let catalog = open_catalog(&config.catalog)?;
    let sink_config = resolve_gateway_endpoint(&config.sink, catalog.as_ref())
        .context("failed to resolve gateway endpoint")?;
    let sink = build_sink(&sink_config).context("failed to build telemetry sink")?;
    info!(sink = sink.name(), backend = ?config.catalog.backend, "adapters ready");

    let engine = ScenarioEngine::new(
        catalog,
        sink,
        EngineSettings::from_config(&config.engine),
        EngineMetrics::new(&registry)?,
    );
    let recovered = engine
        .recover_on_startup()
        .context("startup recovery failed")?;
    daemon_metrics.record_recovered(recovered.len());
    if !recovered.is_empty() {
        warn!(containers = ?recovered, "containers reset to stopped after restart");
    }

    let metrics_server = if config.metrics.enabled {
        Some(spawn_http_server(registry.clone(), config.metrics.listen).await?)
    } else {
        info!("metrics exporter disabled by configuration");
        None
    };

    let mut api_server: Option<ApiServer> = None;
    if config.api.enabled {
        let state = Arc::new(ApiState::new(engine.clone(), env!("CARGO_PKG_VERSION")));
        match spawn_api_server(state, config.api.listen).await {
            Ok(server) => {
                info!(address = %server.addr(), "control api enabled");
                api_server = Some(server);
            }
            Err(err) => {
                warn!(error = %err, "failed to start api server");
            }
        }
    } else {
        info!("api server disabled by configuration");
    }

    info!("daemon running; waiting for termination signal");
    signal::ctrl_c().await?;
    info!("ctrl-c received; shutting down");

    if let Some(server) = api_server {
        server.shutdown().await?;
    }
    engine.shutdown().await;
    if let Some(server) = metrics_server {
        server.shutdown().await?;
    }
    Ok(())
}
