//! ---
//! tsim_section: "01-core-functionality"
//! tsim_subsection: "module"
//! tsim_type: "source"
//! tsim_scope: "code"
//! tsim_description: "Scenario error taxonomy."
//! tsim_version: "v0.0.0-prealpha"
//! tsim_owner: "tbd"
//! ---
use telesim_catalog::{CatalogError, ContainerId, ContainerStatus};
use telesim_sink::SinkError;
use thiserror::Error;

/// Errors surfaced by the state machine and the engine.
#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("container {0} not found")]
    NotFound(ContainerId),
    #[error("container {id} is {current}; cannot move to {requested}")]
    InvalidState {
        id: ContainerId,
        current: ContainerStatus,
        requested: ContainerStatus,
    },
    #[error("transient send failure: {0}")]
    TransientSendFailure(String),
    #[error("telemetry delivery failed: {0}")]
    FatalSendFailure(String),
    #[error("catalog storage failure: {0}")]
    StorageFailure(#[source] CatalogError),
    #[error("startup recovery has not completed")]
    NotReady,
}

impl ScenarioError {
    /// Split sink failures into retryable and terminal scenario errors.
    pub fn from_sink(err: SinkError) -> Self {
        if err.is_retryable() {
            ScenarioError::TransientSendFailure(err.to_string())
        } else {
            ScenarioError::FatalSendFailure(err.to_string())
        }
    }
}

impl From<CatalogError> for ScenarioError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::NotFound {
                kind: "container",
                id,
            } => ScenarioError::NotFound(id),
            other => ScenarioError::StorageFailure(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, ScenarioError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_container_maps_to_not_found() {
        let err: ScenarioError = CatalogError::not_found("container", 4).into();
        assert!(matches!(err, ScenarioError::NotFound(4)));
        let err: ScenarioError = CatalogError::not_found("device", 4).into();
        assert!(matches!(err, ScenarioError::StorageFailure(_)));
    }

    #[test]
    fn sink_errors_keep_their_retry_class() {
        assert!(matches!(
            ScenarioError::from_sink(SinkError::Transient("503".into())),
            ScenarioError::TransientSendFailure(_)
        ));
        assert!(matches!(
            ScenarioError::from_sink(SinkError::Rejected("400".into())),
            ScenarioError::FatalSendFailure(_)
        ));
    }
}
