//! ---
//! tsim_section: "01-core-functionality"
//! tsim_subsection: "module"
//! tsim_type: "source"
//! tsim_scope: "code"
//! tsim_description: "Durable container lifecycle state machine."
//! tsim_version: "v0.0.0-prealpha"
//! tsim_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use telesim_catalog::{Container, ContainerId, ContainerStatus, SharedCatalog};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, info, warn};

use crate::error::{Result, ScenarioError};

/// Whether `from -> to` is a legal lifecycle edge.
pub fn can_transition(from: ContainerStatus, to: ContainerStatus) -> bool {
    use ContainerStatus::*;
    matches!(
        (from, to),
        (Stopped, Starting)
            | (Starting, Running)
            | (Running, Stopping)
            | (Stopping, Stopped)
            | (Starting, Error)
            | (Running, Error)
            | (Error, Stopped)
    )
}

/// Tracks each container's run state and persists every transition.
///
/// Callers serialise work on one container through [`lock`](Self::lock);
/// different containers never contend.
pub struct ScenarioStateMachine {
    catalog: SharedCatalog,
    locks: Mutex<HashMap<ContainerId, Arc<AsyncMutex<()>>>>,
    ready: AtomicBool,
}

impl ScenarioStateMachine {
    pub fn new(catalog: SharedCatalog) -> Self {
        Self {
            catalog,
            locks: Mutex::new(HashMap::new()),
            ready: AtomicBool::new(false),
        }
    }

    pub fn catalog(&self) -> &SharedCatalog {
        &self.catalog
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub fn ensure_ready(&self) -> Result<()> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(ScenarioError::NotReady)
        }
    }

    /// Force every container that is not `stopped` back to `stopped`.
    ///
    /// Must run once at process start; control requests are refused until it
    /// has completed successfully. Returns the ids that were reset.
    pub fn recover_on_startup(&self) -> Result<Vec<ContainerId>> {
        const LEFTOVER: [ContainerStatus; 4] = [
            ContainerStatus::Starting,
            ContainerStatus::Running,
            ContainerStatus::Stopping,
            ContainerStatus::Error,
        ];
        let mut recovered = Vec::new();
        for status in LEFTOVER {
            for container in self.catalog.containers_by_state(status)? {
                warn!(
                    container_id = container.id,
                    status = %container.status,
                    "container left in non-stopped state; forcing stopped"
                );
                self.catalog
                    .set_container_state(container.id, ContainerStatus::Stopped, None)?;
                recovered.push(container.id);
            }
        }
        recovered.sort_unstable();
        self.ready.store(true, Ordering::Release);
        info!(recovered = recovered.len(), "startup recovery complete");
        Ok(recovered)
    }

    /// Acquire the per-container lock.
    pub async fn lock(&self, id: ContainerId) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock();
            locks
                .entry(id)
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Last committed state of a container.
    pub fn current(&self, id: ContainerId) -> Result<Container> {
        Ok(self.catalog.container(id)?)
    }

    /// Validate and persist a transition. The caller must hold the container lock.
    pub fn transition(
        &self,
        id: ContainerId,
        to: ContainerStatus,
        error_detail: Option<&str>,
    ) -> Result<Container> {
        let current = self.catalog.container(id)?;
        if !can_transition(current.status, to) {
            return Err(ScenarioError::InvalidState {
                id,
                current: current.status,
                requested: to,
            });
        }
        let updated = self.catalog.set_container_state(id, to, error_detail)?;
        debug!(container_id = id, from = %current.status, to = %updated.status, "container transition");
        Ok(updated)
    }
}
