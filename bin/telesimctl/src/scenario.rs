//! ---
//! tsim_section: "05-networking-external-interfaces"
//! tsim_subsection: "binary"
//! tsim_type: "source"
//! tsim_scope: "code"
//! tsim_description: "Scenario control subcommands backed by the daemon API."
//! tsim_version: "v0.0.0-prealpha"
//! tsim_owner: "tbd"
//! ---
use anyhow::{anyhow, Context, Result};
use clap::Subcommand;
use serde_json::Value;
use telesim_catalog::ContainerId;
use tracing::debug;
use url::Url;

#[derive(Debug, Subcommand)]
pub enum ScenarioCommand {
    /// Start generating telemetry for a container.
    Start { id: ContainerId },
    /// Stop a running container after flushing buffered records.
    Stop { id: ContainerId },
    /// Move an errored container back to stopped.
    Recover { id: ContainerId },
    /// Show a container's run state, or the daemon summary without an id.
    Status { id: Option<ContainerId> },
}

pub async fn run(base: Url, command: ScenarioCommand) -> Result<()> {
    let client = reqwest::Client::new();
    let (method, path) = match command {
        ScenarioCommand::Start { id } => (reqwest::Method::POST, format!("api/containers/{id}/start")),
        ScenarioCommand::Stop { id } => (reqwest::Method::POST, format!("api/containers/{id}/stop")),
        ScenarioCommand::Recover { id } => {
            (reqwest::Method::POST, format!("api/containers/{id}/recover"))
        }
        ScenarioCommand::Status { id: Some(id) } => {
            (reqwest::Method::GET, format!("api/containers/{id}/status"))
        }
        ScenarioCommand::Status { id: None } => (reqwest::Method::GET, "api/status".to_owned()),
    };
    let url = base
        .join(&path)
        .with_context(|| format!("invalid api path {path}"))?;
    debug!(%url, %method, "calling daemon");

    let response = client
        .request(method, url.clone())
        .send()
        .await
        .with_context(|| format!("daemon unreachable at {url}"))?;
    let status = response.status();
    let body: Value = response
        .json()
        .await
        .with_context(|| format!("daemon returned a non-JSON body ({status})"))?;
    if !status.is_success() {
        let message = body
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("request failed");
        return Err(anyhow!("{status}: {message}"));
    }
    println!(
        "{}",
        serde_json::to_string_pretty(&body).context("failed to render response")?
    );
    Ok(())
}
