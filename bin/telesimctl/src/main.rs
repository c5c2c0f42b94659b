//! ---
//! tsim_section: "05-networking-external-interfaces"
//! tsim_subsection: "binary"
//! tsim_type: "source"
//! tsim_scope: "code"
//! tsim_description: "Control CLI for administrators interacting with telesim."
//! tsim_version: "v0.0.0-prealpha"
//! tsim_owner: "tbd"
//! ---
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use telesim_catalog::{SharedCatalog, SqliteCatalog};
use telesim_common::{init_cli_logging, AppConfig};
use telesim_core::ScenarioStateMachine;
use tracing::info;
use url::Url;

mod catalog;
mod scenario;

const DEFAULT_CONFIG: &str = "configs/telesim.toml";

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "telesim administrative control utility",
    long_about = None
)]
struct Cli {
    /// Configuration file used to locate the catalog and the daemon API.
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Catalog database path; overrides `catalog.path`.
    #[arg(long, value_name = "FILE", env = "TELESIM_CATALOG", global = true)]
    catalog: Option<PathBuf>,

    /// Base URL of the daemon control API; overrides `api.listen`.
    #[arg(long, value_name = "URL", env = "TELESIM_API", global = true)]
    api: Option<Url>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(subcommand, about = "Container administration")]
    Container(catalog::ContainerCommand),
    #[command(subcommand, about = "Device administration")]
    Device(catalog::DeviceCommand),
    #[command(subcommand, about = "Sensor administration")]
    Sensor(catalog::SensorCommand),
    #[command(name = "option", subcommand, about = "Global option administration")]
    Opt(catalog::OptionCommand),
    #[command(subcommand, about = "Scenario control through the running daemon")]
    Scenario(scenario::ScenarioCommand),
    #[command(about = "Reset containers left mid-run while no daemon is running")]
    RecoverStartup,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_cli_logging();
    let Cli {
        config,
        catalog: catalog_path,
        api,
        command,
    } = Cli::parse();
    let config = load_config(config.as_ref())?;
    let open = || open_catalog(catalog_path.as_deref(), &config);

    match command {
        Commands::Container(cmd) => catalog::run_container(open()?, cmd),
        Commands::Device(cmd) => catalog::run_device(open()?, cmd),
        Commands::Sensor(cmd) => catalog::run_sensor(open()?, cmd),
        Commands::Opt(cmd) => catalog::run_option(open()?, cmd),
        Commands::Scenario(cmd) => {
            let base = match api {
                Some(url) => url,
                None => Url::parse(&format!("http://{}/", config.api.listen))
                    .context("api.listen does not form a valid URL")?,
            };
            scenario::run(base, cmd).await
        }
        Commands::RecoverStartup => {
            let machine = ScenarioStateMachine::new(open()?);
            let recovered = machine.recover_on_startup()?;
            info!(count = recovered.len(), "startup sweep finished");
            for id in recovered {
                println!("reset container {id} to stopped");
            }
            Ok(())
        }
    }
}

/// An explicit `--config` must exist; the default location is optional.
fn load_config(explicit: Option<&PathBuf>) -> Result<AppConfig> {
    match explicit {
        Some(path) => AppConfig::load(&[path]),
        None => {
            let default = PathBuf::from(DEFAULT_CONFIG);
            if default.exists() {
                AppConfig::load(&[default])
            } else {
                Ok(AppConfig::default())
            }
        }
    }
}

fn open_catalog(path: Option<&Path>, config: &AppConfig) -> Result<SharedCatalog> {
    let path = path.unwrap_or(config.catalog.path.as_path());
    let catalog = SqliteCatalog::open(path)
        .with_context(|| format!("failed to open catalog {}", path.display()))?;
    Ok(Arc::new(catalog))
}
