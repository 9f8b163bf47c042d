//! Fetch task executor
//!
//! Owns the task table and drives pipeline runs. Each run is dispatched onto
//! its own Tokio task that waits for a worker permit, executes the pipeline
//! and then records the result.

use chrono::Utc;
use remotefetch_core::domain::configuration::FetchConfiguration;
use remotefetch_core::domain::report::{FailureKind, FetchRunReport, RunReportBuilder};
use remotefetch_core::domain::task::FetchTaskSnapshot;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{Notify, Semaphore};
use tokio::time::{self, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::task::FetchTask;
use crate::service::{CapabilityRegistry, PipelineService, ReportSink};

/// Result of an operator-requested run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TriggerOutcome {
    /// A new run was dispatched
    Started { run_number: u64 },

    /// A run was already in flight; no second run was started
    Coalesced { running_run: u64 },
}

/// Schedules and executes fetch tasks
///
/// Cloning is cheap; clones share the same task table.
#[derive(Clone)]
pub struct FetchTaskExecutor {
    inner: Arc<ExecutorInner>,
}

struct ExecutorInner {
    tasks: Mutex<HashMap<Uuid, FetchTask>>,
    registry: Arc<CapabilityRegistry>,
    pipeline: Arc<dyn PipelineService>,
    sink: Arc<dyn ReportSink>,
    workers: Semaphore,
    tick_interval: Duration,
    /// Runs dispatched whose report has not been delivered yet
    in_flight: AtomicUsize,
    /// Signalled when `in_flight` drops to zero
    idle: Notify,
}

impl FetchTaskExecutor {
    /// Creates a new executor
    ///
    /// # Arguments
    /// * `registry` - Used to warn about unresolvable identifiers at registration
    /// * `pipeline` - Executes the runs
    /// * `sink` - Receives one report per run
    /// * `max_parallel_runs` - Number of runs allowed to execute at once
    /// * `tick_interval` - Period of the scheduling loop started by [`run`](Self::run)
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        pipeline: Arc<dyn PipelineService>,
        sink: Arc<dyn ReportSink>,
        max_parallel_runs: usize,
        tick_interval: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(ExecutorInner {
                tasks: Mutex::new(HashMap::new()),
                registry,
                pipeline,
                sink,
                workers: Semaphore::new(max_parallel_runs),
                tick_interval,
                in_flight: AtomicUsize::new(0),
                idle: Notify::new(),
            }),
        }
    }

    /// Creates or replaces the task of a configuration
    ///
    /// Unknown plugin identifiers are only logged; every run of such a
    /// configuration fails with a configuration error until it is fixed.
    pub fn register_or_update(&self, configuration: FetchConfiguration) -> FetchTaskSnapshot {
        self.warn_missing_components(&configuration);

        let id = configuration.id;
        let mut tasks = self.inner.lock_tasks();
        let task = match tasks.entry(id) {
            Entry::Occupied(entry) => {
                let task = entry.into_mut();
                task.update(configuration);
                debug!("Updated fetch task {}", id);
                task
            }
            Entry::Vacant(entry) => {
                info!(
                    "Registered fetch task {} ('{}', every {:?})",
                    id,
                    configuration.name,
                    configuration.interval()
                );
                entry.insert(FetchTask::new(configuration))
            }
        };
        task.snapshot()
    }

    /// Stops scheduling a configuration
    ///
    /// A run in flight is not cancelled; it completes and its report is
    /// delivered.
    pub fn unregister(&self, configuration_id: Uuid) -> Option<FetchTaskSnapshot> {
        let mut tasks = self.inner.lock_tasks();
        let task = tasks.get_mut(&configuration_id)?;
        task.disable();
        info!("Unregistered fetch task {}", configuration_id);
        Some(task.snapshot())
    }

    /// Runs a configuration now, outside of its schedule
    ///
    /// The given configuration replaces the stored one, as with
    /// [`register_or_update`](Self::register_or_update); unknown
    /// configurations are registered first. A run already in flight keeps
    /// the configuration it started with. Must be called from within a
    /// Tokio runtime.
    pub fn trigger_now(&self, configuration: &FetchConfiguration) -> TriggerOutcome {
        let id = configuration.id;
        self.warn_missing_components(configuration);
        let mut tasks = self.inner.lock_tasks();

        let task = match tasks.entry(id) {
            Entry::Occupied(entry) => {
                let task = entry.into_mut();
                task.update(configuration.clone());
                task
            }
            Entry::Vacant(entry) => entry.insert(FetchTask::new(configuration.clone())),
        };

        match task.try_begin() {
            Ok(run_number) => {
                if task.enabled {
                    task.next_run_at = Some(task.configuration.next_run_after(Utc::now()));
                }
                let configuration = task.configuration.clone();
                drop(tasks);

                info!("Triggered run #{} of fetch task {}", run_number, id);
                self.dispatch(configuration, run_number);
                TriggerOutcome::Started { run_number }
            }
            Err(running_run) => {
                debug!(
                    "Fetch task {} is already running run #{}, trigger coalesced",
                    id, running_run
                );
                TriggerOutcome::Coalesced { running_run }
            }
        }
    }

    /// Dispatches every enabled, idle task whose next run is due
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Returns
    /// The number of runs dispatched
    pub fn tick(&self) -> usize {
        let now = Utc::now();
        let due: Vec<(FetchConfiguration, u64)> = {
            let mut tasks = self.inner.lock_tasks();
            tasks
                .values_mut()
                .filter(|task| task.is_due(now))
                .filter_map(|task| {
                    task.try_begin()
                        .ok()
                        .map(|run_number| (task.configuration.clone(), run_number))
                })
                .collect()
        };

        let dispatched = due.len();
        for (configuration, run_number) in due {
            self.dispatch(configuration, run_number);
        }
        dispatched
    }

    pub fn status(&self, configuration_id: Uuid) -> Option<FetchTaskSnapshot> {
        self.inner
            .lock_tasks()
            .get(&configuration_id)
            .map(FetchTask::snapshot)
    }

    /// Snapshots of every task, ordered by configuration id
    pub fn statuses(&self) -> Vec<FetchTaskSnapshot> {
        let mut snapshots: Vec<FetchTaskSnapshot> = self
            .inner
            .lock_tasks()
            .values()
            .map(FetchTask::snapshot)
            .collect();
        snapshots.sort_by_key(|snapshot| snapshot.configuration_id);
        snapshots
    }

    /// Drives the scheduling loop until `shutdown` resolves
    ///
    /// Runs already dispatched keep going; use
    /// [`wait_for_idle`](Self::wait_for_idle) to drain them.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        info!(
            "Starting fetch task executor (tick interval: {:?})",
            self.inner.tick_interval
        );

        let mut interval = time::interval(self.inner.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, no further runs will be scheduled");
                    break;
                }
                _ = interval.tick() => {
                    let dispatched = self.tick();
                    if dispatched > 0 {
                        info!("Dispatched {} fetch run(s) this tick", dispatched);
                    } else {
                        debug!("No fetch tasks due");
                    }
                }
            }
        }
    }

    /// Waits until every dispatched run has delivered its report
    pub async fn wait_for_idle(&self) {
        loop {
            let idle = self.inner.idle.notified();
            tokio::pin!(idle);
            // Registered before the check so a run finishing in between still wakes us
            idle.as_mut().enable();

            if self.inner.in_flight.load(Ordering::SeqCst) == 0 {
                return;
            }
            idle.await;
        }
    }

    fn warn_missing_components(&self, configuration: &FetchConfiguration) {
        for (kind, identifier) in self.inner.registry.missing_components(configuration) {
            warn!(
                "Configuration {} references unknown {} '{}'; its runs will fail",
                configuration.id, kind, identifier
            );
        }
    }

    fn dispatch(&self, configuration: FetchConfiguration, run_number: u64) {
        self.inner.in_flight.fetch_add(1, Ordering::SeqCst);
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            inner.execute(configuration, run_number).await;
        });
    }
}

impl ExecutorInner {
    fn lock_tasks(&self) -> MutexGuard<'_, HashMap<Uuid, FetchTask>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Executes one run on a worker and records its outcome
    async fn execute(self: Arc<Self>, configuration: FetchConfiguration, run_number: u64) {
        let id = configuration.id;

        let report = {
            // The semaphore is never closed
            let _permit = self.workers.acquire().await.ok();

            let pipeline = Arc::clone(&self.pipeline);
            let handle =
                tokio::spawn(async move { pipeline.execute(&configuration, run_number).await });

            match handle.await {
                Ok(report) => report,
                Err(e) => {
                    error!("Run #{} of fetch task {} crashed: {}", run_number, id, e);
                    RunReportBuilder::start(id, run_number)
                        .abort(FailureKind::Internal, format!("pipeline crashed: {}", e))
                }
            }
        };

        self.complete(report).await;
        if self.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    async fn complete(&self, report: FetchRunReport) {
        {
            let mut tasks = self.lock_tasks();
            if let Some(task) = tasks.get_mut(&report.configuration_id) {
                task.finish(&report);
            }
        }

        let id = report.configuration_id;
        let run_number = report.run_number;
        if let Err(e) = self.sink.deliver(report).await {
            warn!(
                "Failed to deliver report of run #{} of fetch task {}: {:#}",
                run_number, id, e
            );
        }
    }
}
