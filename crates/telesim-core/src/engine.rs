//! ---
//! tsim_section: "01-core-functionality"
//! tsim_subsection: "module"
//! tsim_type: "source"
//! tsim_scope: "code"
//! tsim_description: "Scenario execution engine and per-container supervision."
//! tsim_version: "v0.0.0-prealpha"
//! tsim_owner: "tbd"
//! ---
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use telesim_catalog::{Container, ContainerId, ContainerStatus, Device, Sensor, SharedCatalog};
use telesim_common::{EngineConfig, MonotonicClock};
use telesim_metrics::EngineMetrics;
use telesim_sim::SensorSimulator;
use telesim_sink::{DemoModeSink, SharedSink};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::{Result, ScenarioError};
use crate::retry::RetryPolicy;
use crate::state::ScenarioStateMachine;
use crate::worker::{DeviceTask, RunSignal, TaskExit};

const DEMO_MODE_OPTION: &str = "demo_mode";

/// Tunables for batching and delivery.
#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub retry: RetryPolicy,
    pub seed: u64,
}

impl EngineSettings {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            flush_interval: config.flush_interval,
            retry: RetryPolicy::from_config(config),
            seed: config.random_seed,
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

#[derive(Debug, Clone, Default)]
struct RunOutcome {
    fault: Option<String>,
}

/// Live handle of one running container.
struct ScenarioRun {
    generation: u64,
    signal: Arc<watch::Sender<RunSignal>>,
    finished: watch::Receiver<Option<RunOutcome>>,
}

struct EngineInner {
    state: ScenarioStateMachine,
    catalog: SharedCatalog,
    sink: SharedSink,
    settings: EngineSettings,
    metrics: EngineMetrics,
    runs: Mutex<HashMap<ContainerId, ScenarioRun>>,
    generation: AtomicU64,
}

/// Drives running scenarios concurrently.
///
/// Cloning is cheap; clones share the same runs.
#[derive(Clone)]
pub struct ScenarioEngine {
    inner: Arc<EngineInner>,
}

impl ScenarioEngine {
    pub fn new(
        catalog: SharedCatalog,
        sink: SharedSink,
        settings: EngineSettings,
        metrics: EngineMetrics,
    ) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                state: ScenarioStateMachine::new(catalog.clone()),
                catalog,
                sink,
                settings,
                metrics,
                runs: Mutex::new(HashMap::new()),
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn state_machine(&self) -> &ScenarioStateMachine {
        &self.inner.state
    }

    pub fn catalog(&self) -> &SharedCatalog {
        &self.inner.catalog
    }

    pub fn is_ready(&self) -> bool {
        self.inner.state.is_ready()
    }

    /// Reset containers left mid-run by a previous process and open the engine
    /// for control requests.
    pub fn recover_on_startup(&self) -> Result<Vec<ContainerId>> {
        self.inner.state.recover_on_startup()
    }

    /// Containers with a live run in this process.
    pub fn running_containers(&self) -> Vec<ContainerId> {
        let mut ids: Vec<ContainerId> = self.inner.runs.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub async fn start(&self, id: ContainerId) -> Result<Container> {
        let inner = &self.inner;
        inner.state.ensure_ready()?;
        let _guard = inner.state.lock(id).await;

        let current = inner.state.current(id)?;
        if current.status != ContainerStatus::Stopped {
            return Err(ScenarioError::InvalidState {
                id,
                current: current.status,
                requested: ContainerStatus::Starting,
            });
        }
        inner.state.transition(id, ContainerStatus::Starting, None)?;
        info!(container_id = id, name = %current.name, "starting scenario");

        let plan = match inner.load_plan(id) {
            Ok(plan) => plan,
            Err(err) => {
                inner.fail_start(id, &err);
                return Err(err);
            }
        };
        let sink = inner.resolve_sink();
        let generation = inner.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let (signal_tx, signal_rx) = watch::channel(RunSignal::Run);
        let signal_tx = Arc::new(signal_tx);
        let clock = MonotonicClock::new();

        let mut tasks = JoinSet::new();
        let mut live = Vec::with_capacity(plan.len());
        let device_count = plan.len();
        for (device, sensors) in plan {
            let simulators = sensors
                .into_iter()
                .map(|sensor| SensorSimulator::new(sensor, inner.settings.seed))
                .collect();
            let task = DeviceTask {
                container_id: id,
                device,
                simulators,
                sink: sink.clone(),
                catalog: inner.catalog.clone(),
                metrics: inner.metrics.clone(),
                policy: inner.settings.retry,
                batch_size: inner.settings.batch_size,
                flush_interval: inner.settings.flush_interval,
                clock,
                seed: inner.settings.seed,
            };
            let (live_tx, live_rx) = oneshot::channel();
            tasks.spawn(task.run(signal_rx.clone(), live_tx));
            live.push(live_rx);
        }
        // A task that dies before going live surfaces through the supervisor.
        for ready in live {
            let _ = ready.await;
        }

        let running = match inner.state.transition(id, ContainerStatus::Running, None) {
            Ok(container) => container,
            Err(err) => {
                signal_tx.send_replace(RunSignal::Abort);
                tasks.shutdown().await;
                inner.fail_start(id, &err);
                return Err(err);
            }
        };

        let (finished_tx, finished_rx) = watch::channel(None);
        inner.runs.lock().insert(
            id,
            ScenarioRun {
                generation,
                signal: signal_tx.clone(),
                finished: finished_rx,
            },
        );
        inner.refresh_running_gauge();
        tokio::spawn(supervise(
            self.inner.clone(),
            id,
            generation,
            tasks,
            signal_tx,
            finished_tx,
        ));
        info!(
            container_id = id,
            devices = device_count,
            sink = sink.name(),
            "scenario running"
        );
        Ok(running)
    }

    /// Stop a running container. Stopped and errored containers are returned unchanged.
    pub async fn stop(&self, id: ContainerId) -> Result<Container> {
        let inner = &self.inner;
        inner.state.ensure_ready()?;
        let _guard = inner.state.lock(id).await;

        let current = inner.state.current(id)?;
        match current.status {
            ContainerStatus::Stopped | ContainerStatus::Error => {
                debug!(container_id = id, status = %current.status, "stop is a no-op");
                return Ok(current);
            }
            ContainerStatus::Running => {}
            other => {
                return Err(ScenarioError::InvalidState {
                    id,
                    current: other,
                    requested: ContainerStatus::Stopping,
                })
            }
        }
        inner.state.transition(id, ContainerStatus::Stopping, None)?;

        let run = inner.runs.lock().remove(&id);
        match run {
            Some(run) => {
                run.signal.send_replace(RunSignal::Stop);
                let mut finished = run.finished;
                let outcome = match finished.wait_for(Option::is_some).await {
                    Ok(outcome) => outcome.clone(),
                    Err(_) => None,
                };
                if let Some(RunOutcome {
                    fault: Some(detail),
                }) = outcome
                {
                    warn!(container_id = id, error = %detail, "scenario failed while stopping");
                }
            }
            None => {
                warn!(container_id = id, "no live run for running container; marking stopped");
            }
        }

        let stopped = inner.state.transition(id, ContainerStatus::Stopped, None)?;
        inner.refresh_running_gauge();
        info!(container_id = id, messages = stopped.message_count, "scenario stopped");
        Ok(stopped)
    }

    /// Move an errored container back to `stopped`, clearing its error detail.
    pub async fn recover(&self, id: ContainerId) -> Result<Container> {
        let inner = &self.inner;
        inner.state.ensure_ready()?;
        let _guard = inner.state.lock(id).await;

        let current = inner.state.current(id)?;
        if current.status != ContainerStatus::Error {
            return Err(ScenarioError::InvalidState {
                id,
                current: current.status,
                requested: ContainerStatus::Stopped,
            });
        }
        let recovered = inner.state.transition(id, ContainerStatus::Stopped, None)?;
        info!(container_id = id, "scenario recovered from error");
        Ok(recovered)
    }

    /// Last committed state of a container.
    pub fn status(&self, id: ContainerId) -> Result<Container> {
        self.inner.state.current(id)
    }

    /// Stop every container this engine is running.
    pub async fn shutdown(&self) {
        let ids = self.running_containers();
        let results = join_all(ids.iter().map(|id| self.stop(*id))).await;
        for (id, result) in ids.into_iter().zip(results) {
            if let Err(err) = result {
                warn!(container_id = id, error = %err, "failed to stop scenario during shutdown");
            }
        }
        info!("scenario engine shut down");
    }
}

impl EngineInner {
    fn load_plan(&self, id: ContainerId) -> Result<Vec<(Device, Vec<Sensor>)>> {
        let devices = self.catalog.devices_by_container(id)?;
        let mut plan = Vec::with_capacity(devices.len());
        for device in devices {
            let sensors = self.catalog.sensors_by_device(device.id)?;
            plan.push((device, sensors));
        }
        Ok(plan)
    }

    fn resolve_sink(&self) -> SharedSink {
        match self.catalog.option_bool(DEMO_MODE_OPTION) {
            Ok(true) => Arc::new(DemoModeSink::wrap(self.sink.clone())) as SharedSink,
            Ok(false) => self.sink.clone(),
            Err(err) => {
                warn!(error = %err, "unable to read demo_mode option; delivering normally");
                self.sink.clone()
            }
        }
    }

    fn fail_start(&self, id: ContainerId, cause: &ScenarioError) {
        let detail = cause.to_string();
        match self
            .state
            .transition(id, ContainerStatus::Error, Some(&detail))
        {
            Ok(_) => self.metrics.record_scenario_error(id),
            Err(err) => {
                error!(container_id = id, error = %err, cause = %detail, "unable to record failed start")
            }
        }
    }

    fn refresh_running_gauge(&self) {
        self.metrics.set_running(self.runs.lock().len());
    }
}

/// Wait for every device task of a run and turn the first failure into an
/// `error` transition.
async fn supervise(
    inner: Arc<EngineInner>,
    id: ContainerId,
    generation: u64,
    mut tasks: JoinSet<Result<TaskExit>>,
    signal: Arc<watch::Sender<RunSignal>>,
    finished: watch::Sender<Option<RunOutcome>>,
) {
    let mut fault: Option<String> = None;
    while let Some(joined) = tasks.join_next().await {
        let failure = match joined {
            Ok(Ok(exit)) => {
                debug!(container_id = id, ?exit, "device task finished");
                None
            }
            Ok(Err(err)) => Some(err.to_string()),
            Err(join_err) => Some(format!("device task crashed: {join_err}")),
        };
        if let Some(detail) = failure {
            if fault.is_none() {
                error!(container_id = id, error = %detail, "device task failed; aborting scenario");
                signal.send_replace(RunSignal::Abort);
                fault = Some(detail);
            }
        }
    }

    let _ = finished.send(Some(RunOutcome {
        fault: fault.clone(),
    }));
    let Some(detail) = fault else {
        return;
    };

    let _guard = inner.state.lock(id).await;
    let owned = {
        let mut runs = inner.runs.lock();
        match runs.get(&id) {
            Some(run) if run.generation == generation => {
                runs.remove(&id);
                true
            }
            _ => false,
        }
    };
    if !owned {
        debug!(container_id = id, "run already stopped; fault not recorded");
        return;
    }
    match inner
        .state
        .transition(id, ContainerStatus::Error, Some(&detail))
    {
        Ok(_) => {
            inner.metrics.record_scenario_error(id);
            warn!(container_id = id, error = %detail, "scenario moved to error");
        }
        Err(err) => error!(container_id = id, error = %err, "unable to record scenario failure"),
    }
    inner.refresh_running_gauge();
}
