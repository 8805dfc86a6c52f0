//! Model labeling pipeline and the background autonomous-labeling worker
//!
//! The worker is a single tokio task. Stop is an mpsc shutdown signal plus a
//! bounded join; pause is a watch flag checked at the top of every iteration.
//! Labeling calls always run outside the engine lock.

use std::sync::Arc;

use handoff_shared::{Component, ModelPrediction, component_debug, component_error, component_info, component_warn, logging};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

use crate::config::EngineConfig;
use crate::core::EngineState;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::traits::{ItemStore, LabelingService, SnapshotStore};

/// Shared handles needed to label instances and persist the result
pub struct EngineContext<L, I, S> {
    pub(crate) config: Arc<EngineConfig>,
    pub(crate) state: Arc<Mutex<EngineState>>,
    pub(crate) labeler: Arc<L>,
    pub(crate) items: Arc<I>,
    pub(crate) snapshots: Arc<S>,
    /// Serializes snapshot-then-save so an older snapshot never lands last
    pub(crate) persist_lock: Arc<Mutex<()>>,
}

impl<L, I, S> EngineContext<L, I, S> {
    pub(crate) fn new(config: EngineConfig, state: EngineState, labeler: L, items: I, snapshots: S) -> Self {
        Self {
            config: Arc::new(config),
            state: Arc::new(Mutex::new(state)),
            labeler: Arc::new(labeler),
            items: Arc::new(items),
            snapshots: Arc::new(snapshots),
            persist_lock: Arc::new(Mutex::new(())),
        }
    }
}

impl<L, I, S> Clone for EngineContext<L, I, S> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            state: Arc::clone(&self.state),
            labeler: Arc::clone(&self.labeler),
            items: Arc::clone(&self.items),
            snapshots: Arc::clone(&self.snapshots),
            persist_lock: Arc::clone(&self.persist_lock),
        }
    }
}

/// Result of one labeling round
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelingOutcome {
    /// Instances that received at least one prediction
    pub labeled: usize,
    /// Instances for which every request failed
    pub failed: usize,
}

impl<L, I, S> EngineContext<L, I, S>
where
    L: LabelingService + 'static,
    I: ItemStore + 'static,
    S: SnapshotStore + 'static,
{
    /// Label `ids` for every configured schema and store the predictions.
    ///
    /// Ids already being labeled elsewhere are skipped. Failures are logged,
    /// counted against the instance and never propagated.
    pub async fn label_instances(&self, ids: &[String]) -> OrchestratorResult<LabelingOutcome> {
        if self.config.schemas.is_empty() {
            return Err(OrchestratorError::config("schemas", "no schemas configured for model labeling"));
        }

        let claimed: Vec<String> = {
            let mut state = self.state.lock().await;
            ids.iter().filter(|id| state.in_flight.insert((*id).clone())).cloned().collect()
        };

        let mut outcome = LabelingOutcome::default();
        let mut predictions = Vec::new();
        let mut failed_ids = Vec::new();
        for id in &claimed {
            let Some(text) = self.items.get_text(id).await else {
                let e = OrchestratorError::ItemNotFound { instance_id: id.clone() };
                logging::log_error(Component::Worker, "loading instance text", &e);
                outcome.failed += 1;
                failed_ids.push(id.clone());
                continue;
            };

            let mut any = false;
            for schema in &self.config.schemas {
                match self.labeler.label(&text, schema).await {
                    Ok(response) => {
                        let mut prediction =
                            ModelPrediction::new(id.clone(), schema.name.clone(), response.label, response.confidence)
                                .with_model(self.labeler.model_name());
                        if let Some(reasoning) = response.reasoning {
                            prediction = prediction.with_reasoning(reasoning);
                        }
                        predictions.push(prediction);
                        any = true;
                    }
                    Err(e) => {
                        logging::log_error(Component::Worker, &format!("labeling {id} [{}]", schema.name), &e);
                    }
                }
            }
            if any {
                outcome.labeled += 1;
            } else {
                outcome.failed += 1;
                failed_ids.push(id.clone());
            }
        }

        {
            let mut state = self.state.lock().await;
            for prediction in predictions {
                state.label_failures.remove(&prediction.instance_id);
                store_prediction(&mut state, prediction);
            }
            for id in &failed_ids {
                let attempts = state.record_label_failure(id);
                if attempts == self.config.worker.max_label_attempts {
                    component_warn!(
                        Component::Worker,
                        "⚠️ Giving up on instance {} after {} failed attempts",
                        id,
                        attempts
                    );
                }
            }
            for id in &claimed {
                state.in_flight.remove(id);
            }
        }

        if outcome.labeled > 0 {
            self.persist().await;
        }
        component_debug!(
            Component::Worker,
            "🏷️ Labeled {} instances ({} failed)",
            outcome.labeled,
            outcome.failed
        );
        Ok(outcome)
    }

    /// Best-effort snapshot write; failures are logged and swallowed.
    ///
    /// The persist lock is held from snapshot to save, so concurrent
    /// callers write in the order they observed the state.
    pub async fn persist(&self) {
        let _guard = self.persist_lock.lock().await;
        let snapshot = self.state.lock().await.snapshot();
        if let Err(e) = self.snapshots.save(&snapshot).await {
            component_warn!(Component::Store, "⚠️ Failed to persist snapshot: {}", e);
        }
    }
}

/// Insert or overwrite a prediction and mark its instance model-labeled
pub(crate) fn store_prediction(state: &mut EngineState, prediction: ModelPrediction) {
    state.model_labeled.insert(prediction.instance_id.clone());
    state
        .predictions
        .entry(prediction.instance_id.clone())
        .or_default()
        .insert(prediction.schema_name.clone(), prediction);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Stopped,
    Running,
    Paused,
}

/// Totals reported by the worker when it exits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerReport {
    pub iterations: u64,
    pub labeled: u64,
    pub failures: u64,
    pub throttled: u64,
}

enum Iteration {
    Labeled(LabelingOutcome),
    /// In-flight unvalidated labels reached the cap
    Throttled(usize),
    /// Nothing left to label
    Idle,
}

/// Control handle for a running worker
pub struct WorkerHandle {
    join: JoinHandle<WorkerReport>,
    shutdown_tx: mpsc::Sender<()>,
    pause_tx: watch::Sender<bool>,
}

impl WorkerHandle {
    pub fn spawn<L, I, S>(ctx: EngineContext<L, I, S>) -> Self
    where
        L: LabelingService + 'static,
        I: ItemStore + 'static,
        S: SnapshotStore + 'static,
    {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let (pause_tx, pause_rx) = watch::channel(false);
        let join = tokio::spawn(run_worker(ctx, shutdown_rx, pause_rx));
        Self {
            join,
            shutdown_tx,
            pause_tx,
        }
    }

    pub fn state(&self) -> WorkerState {
        if self.join.is_finished() {
            WorkerState::Stopped
        } else if *self.pause_tx.borrow() {
            WorkerState::Paused
        } else {
            WorkerState::Running
        }
    }

    pub fn set_paused(&self, paused: bool) {
        self.pause_tx.send_replace(paused);
    }

    /// Signal shutdown and wait up to `wait` for the current iteration to finish
    pub async fn stop(mut self, wait: std::time::Duration) -> Option<WorkerReport> {
        let _ = self.shutdown_tx.try_send(());
        match timeout(wait, &mut self.join).await {
            Ok(Ok(report)) => Some(report),
            Ok(Err(e)) => {
                component_error!(Component::Worker, "❌ Worker task failed: {}", e);
                None
            }
            Err(_) => {
                component_warn!(Component::Worker, "⏱️ Worker did not stop within {:?}, aborting", wait);
                self.join.abort();
                None
            }
        }
    }
}

async fn run_worker<L, I, S>(
    ctx: EngineContext<L, I, S>,
    mut shutdown_rx: mpsc::Receiver<()>,
    pause_rx: watch::Receiver<bool>,
) -> WorkerReport
where
    L: LabelingService + 'static,
    I: ItemStore + 'static,
    S: SnapshotStore + 'static,
{
    let worker = &ctx.config.worker;
    let mut report = WorkerReport::default();
    logging::log_startup(
        Component::Worker,
        &format!("batch_size={}, max_unvalidated={}", worker.batch_size, worker.max_unvalidated),
    );

    loop {
        if !matches!(shutdown_rx.try_recv(), Err(mpsc::error::TryRecvError::Empty)) {
            break;
        }

        if *pause_rx.borrow() {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = sleep(worker.pause_poll()) => continue,
            }
        }

        report.iterations += 1;
        let wait = match run_iteration(&ctx).await {
            Ok(Iteration::Labeled(outcome)) => {
                report.labeled += outcome.labeled as u64;
                report.failures += outcome.failed as u64;
                tokio::task::yield_now().await;
                None
            }
            Ok(Iteration::Throttled(unvalidated)) => {
                report.throttled += 1;
                component_debug!(
                    Component::Worker,
                    "⏸️ {} unvalidated labels in flight (cap {}), waiting",
                    unvalidated,
                    worker.max_unvalidated
                );
                Some(worker.poll_interval())
            }
            Ok(Iteration::Idle) => Some(worker.poll_interval()),
            Err(e) => {
                report.failures += 1;
                logging::log_error(Component::Worker, "autonomous labeling iteration", &e);
                Some(worker.error_backoff())
            }
        };

        if let Some(wait) = wait {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = sleep(wait) => {}
            }
        }
    }

    logging::log_shutdown(
        Component::Worker,
        &format!("{} iterations, {} labeled, {} failures", report.iterations, report.labeled, report.failures),
    );
    report
}

async fn run_iteration<L, I, S>(ctx: &EngineContext<L, I, S>) -> OrchestratorResult<Iteration>
where
    L: LabelingService + 'static,
    I: ItemStore + 'static,
    S: SnapshotStore + 'static,
{
    let all_ids = ctx.items.instance_ids().await;
    let batch = {
        let state = ctx.state.lock().await;
        let unvalidated = state.unvalidated_count();
        if unvalidated >= ctx.config.worker.max_unvalidated {
            return Ok(Iteration::Throttled(unvalidated));
        }
        let room = ctx.config.worker.max_unvalidated - unvalidated;
        state.next_unlabeled(
            &all_ids,
            ctx.config.worker.batch_size.min(room),
            ctx.config.worker.max_label_attempts,
        )
    };

    if batch.is_empty() {
        return Ok(Iteration::Idle);
    }

    let outcome = ctx.label_instances(&batch).await?;
    if outcome.labeled == 0 && outcome.failed > 0 {
        return Err(OrchestratorError::labeling(
            batch[0].clone(),
            format!("all {} instances in batch failed", outcome.failed),
        ));
    }
    component_info!(
        Component::Worker,
        "🤖 Autonomous batch labeled {} of {} instances",
        outcome.labeled,
        batch.len()
    );
    Ok(Iteration::Labeled(outcome))
}
