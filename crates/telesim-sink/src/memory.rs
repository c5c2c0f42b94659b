//! ---
//! tsim_section: "02-messaging-ipc-data-model"
//! tsim_subsection: "module"
//! tsim_type: "source"
//! tsim_scope: "code"
//! tsim_description: "In-memory sink with scripted failures for tests and dry runs."
//! tsim_version: "v0.0.0-prealpha"
//! tsim_owner: "tbd"
//! ---
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use telesim_catalog::ContainerId;
use telesim_sim::TelemetryMessage;

use crate::{SendReceipt, SinkError, TelemetrySink};

/// Records every accepted batch in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    batches: Mutex<Vec<Vec<TelemetryMessage>>>,
    attempts: AtomicUsize,
    fail_next: AtomicUsize,
    fail_always: AtomicBool,
    failing_containers: Mutex<HashSet<ContainerId>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink that rejects every send with a transient error.
    pub fn failing() -> Self {
        let sink = Self::default();
        sink.set_failing(true);
        sink
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_always.store(failing, Ordering::SeqCst);
    }

    /// Fail the next `count` sends, then recover.
    pub fn fail_next(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Fail every batch carrying records from `container`.
    pub fn fail_container(&self, container: ContainerId) {
        self.failing_containers.lock().insert(container);
    }

    pub fn batches(&self) -> Vec<Vec<TelemetryMessage>> {
        self.batches.lock().clone()
    }

    pub fn batches_for(&self, container: ContainerId) -> Vec<Vec<TelemetryMessage>> {
        self.batches
            .lock()
            .iter()
            .filter(|batch| batch.iter().any(|m| m.container_id == container))
            .cloned()
            .collect()
    }

    pub fn batch_count(&self) -> usize {
        self.batches.lock().len()
    }

    pub fn message_count(&self) -> usize {
        self.batches.lock().iter().map(Vec::len).sum()
    }

    /// Number of `send_batch` calls, failed ones included.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn should_fail(&self, batch: &[TelemetryMessage]) -> bool {
        if self.fail_always.load(Ordering::SeqCst) {
            return true;
        }
        let scripted = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if scripted {
            return true;
        }
        let failing = self.failing_containers.lock();
        !failing.is_empty() && batch.iter().any(|m| failing.contains(&m.container_id))
    }
}

#[async_trait]
impl TelemetrySink for MemorySink {
    async fn send_batch(&self, batch: &[TelemetryMessage]) -> Result<SendReceipt, SinkError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.should_fail(batch) {
            return Err(SinkError::Transient("scripted memory sink failure".into()));
        }
        self.batches.lock().push(batch.to_vec());
        Ok(SendReceipt {
            accepted: batch.len(),
        })
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
