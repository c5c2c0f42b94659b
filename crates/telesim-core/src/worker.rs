//! ---
//! tsim_section: "01-core-functionality"
//! tsim_subsection: "module"
//! tsim_type: "source"
//! tsim_scope: "code"
//! tsim_description: "Per-device telemetry generation task."
//! tsim_version: "v0.0.0-prealpha"
//! tsim_owner: "tbd"
//! ---
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use telesim_catalog::{ContainerId, Device, SharedCatalog};
use telesim_common::MonotonicClock;
use telesim_metrics::EngineMetrics;
use telesim_sim::{SensorSimulator, TelemetryMessage};
use telesim_sink::SharedSink;
use tokio::sync::{oneshot, watch};
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, info, warn};

use crate::error::{Result, ScenarioError};
use crate::retry::RetryPolicy;

/// Control value broadcast to every device task of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunSignal {
    Run,
    /// Flush buffered records, then exit.
    Stop,
    /// Exit immediately, dropping buffered records.
    Abort,
}

/// How a device task ended when it did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskExit {
    Stopped,
    Aborted,
}

enum Delivery {
    Delivered,
    Abandoned,
}

pub(crate) struct DeviceTask {
    pub container_id: ContainerId,
    pub device: Device,
    pub simulators: Vec<SensorSimulator>,
    pub sink: SharedSink,
    pub catalog: SharedCatalog,
    pub metrics: EngineMetrics,
    pub policy: RetryPolicy,
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub clock: MonotonicClock,
    pub seed: u64,
}

impl DeviceTask {
    /// Generate and deliver telemetry until signalled or a batch fails for good.
    pub(crate) async fn run(
        mut self,
        mut signal: watch::Receiver<RunSignal>,
        live: oneshot::Sender<()>,
    ) -> Result<TaskExit> {
        let mut rng = StdRng::seed_from_u64(self.seed ^ self.device.id as u64);
        let started = Instant::now();
        let mut due: Vec<Instant> = vec![started; self.simulators.len()];
        let mut buffer: Vec<TelemetryMessage> = Vec::with_capacity(self.batch_size);
        let mut flush_at = started + self.flush_interval;
        let mut sequence: u64 = 0;

        let _ = live.send(());
        debug!(
            container_id = self.container_id,
            device_id = self.device.id,
            sensors = self.simulators.len(),
            "device task live"
        );

        loop {
            let next_tick = due.iter().min().copied();
            let wake = match next_tick {
                Some(tick) if buffer.is_empty() => tick,
                Some(tick) => tick.min(flush_at),
                None => flush_at,
            };

            // A stop observed while a retry was backing off has already been
            // marked seen, so the current value is checked before waiting.
            let observed = *signal.borrow_and_update();
            let control = match observed {
                RunSignal::Run => tokio::select! {
                    biased;
                    changed = signal.changed() => {
                        Some(if changed.is_ok() { *signal.borrow_and_update() } else { RunSignal::Abort })
                    }
                    _ = sleep_until(wake) => None,
                },
                other => Some(other),
            };
            match control {
                None => {}
                Some(RunSignal::Run) => continue,
                Some(RunSignal::Abort) => {
                    debug!(container_id = self.container_id, device_id = self.device.id, dropped = buffer.len(), "device task aborted");
                    return Ok(TaskExit::Aborted);
                }
                Some(RunSignal::Stop) => {
                    if !buffer.is_empty() {
                        let batch = std::mem::take(&mut buffer);
                        if let Delivery::Abandoned = self.deliver(batch, &mut signal, &mut rng).await? {
                            return Ok(TaskExit::Aborted);
                        }
                    }
                    debug!(container_id = self.container_id, device_id = self.device.id, "device task stopped");
                    return Ok(TaskExit::Stopped);
                }
            }

            let now = Instant::now();
            let mut generated = 0usize;
            for (slot, simulator) in due.iter_mut().zip(self.simulators.iter_mut()) {
                if *slot > now {
                    continue;
                }
                let interval = simulator.sensor().interval();
                *slot += interval;
                if *slot <= now {
                    *slot = now + interval;
                }
                let sample = simulator.next_sample();
                sequence += 1;
                let message = TelemetryMessage::reading(
                    simulator.sensor(),
                    &self.device.name,
                    self.container_id,
                    self.clock.now(),
                    sample.value,
                    sequence,
                );
                if sample.duplicate {
                    buffer.push(message.clone());
                    generated += 1;
                }
                buffer.push(message);
                generated += 1;
            }
            if generated > 0 {
                self.metrics.record_generated(self.container_id, generated);
            }

            let flush_due = now >= flush_at;
            if buffer.len() >= self.batch_size || (flush_due && !buffer.is_empty()) {
                let batch = std::mem::take(&mut buffer);
                if let Delivery::Abandoned = self.deliver(batch, &mut signal, &mut rng).await? {
                    return Ok(TaskExit::Aborted);
                }
                flush_at = Instant::now() + self.flush_interval;
            } else if flush_due {
                flush_at = now + self.flush_interval;
            }
        }
    }

    /// Send one batch, retrying transient failures with backoff.
    ///
    /// Backoff sleeps end early only on `Abort`; a `Stop` lets the retries run
    /// to completion and is picked up by the main loop afterwards.
    async fn deliver(
        &mut self,
        batch: Vec<TelemetryMessage>,
        signal: &mut watch::Receiver<RunSignal>,
        rng: &mut StdRng,
    ) -> Result<Delivery> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match self.sink.send_batch(&batch).await {
                Ok(receipt) => {
                    self.metrics.record_batch(self.container_id);
                    if let Err(err) = self
                        .catalog
                        .increment_message_count(self.container_id, batch.len() as u64)
                    {
                        warn!(container_id = self.container_id, error = %err, "failed to record message count");
                    }
                    debug!(
                        container_id = self.container_id,
                        device_id = self.device.id,
                        accepted = receipt.accepted,
                        attempt,
                        "batch delivered"
                    );
                    return Ok(Delivery::Delivered);
                }
                Err(err) => ScenarioError::from_sink(err),
            };

            let kind = match err {
                ScenarioError::TransientSendFailure(_) => "transient",
                _ => "fatal",
            };
            self.metrics.record_send_failure(self.container_id, kind);

            let retryable = matches!(err, ScenarioError::TransientSendFailure(_));
            if !retryable || !self.policy.has_attempts_left(attempt) {
                info!(
                    container_id = self.container_id,
                    device_id = self.device.id,
                    attempt,
                    error = %err,
                    "giving up on batch"
                );
                return Err(ScenarioError::FatalSendFailure(format!(
                    "device {} ({}) batch of {} records failed after {attempt} attempt(s): {err}",
                    self.device.id,
                    self.device.name,
                    batch.len()
                )));
            }

            let delay = self.policy.backoff_delay(attempt, rng);
            warn!(
                container_id = self.container_id,
                device_id = self.device.id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "batch send failed; backing off"
            );
            tokio::select! {
                _ = sleep(delay) => {}
                _ = abort_requested(signal) => {
                    return Ok(Delivery::Abandoned);
                }
            }
        }
    }
}

/// Resolves once the run is aborted or its controller is gone.
///
/// Other values are consumed without being acted on; the main loop re-reads
/// the current value after every delivery.
async fn abort_requested(signal: &mut watch::Receiver<RunSignal>) {
    loop {
        if *signal.borrow_and_update() == RunSignal::Abort {
            return;
        }
        if signal.changed().await.is_err() {
            return;
        }
    }
}
