//! Main orchestrator implementation
//!
//! Composes the phase controller, agreement evaluator, validation tracker and
//! instance selector behind one lock, with injected services for everything
//! outside the engine's memory.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use handoff_shared::{
    AgreementMetrics, AnnotationType, Component, Disagreement, LabelValue, ModelPrediction, Phase, PhaseTransition,
    ResolutionSource, SchemaInfo, component_debug, component_info, component_warn, logging,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::core::{
    AgreementEvaluator, ConfusionAnalysis, EngineState, InstanceSelector, PhaseController, SNAPSHOT_VERSION,
    SelectionStats, SelectionWeights, ValidationCandidate, ValidationProgress, ValidationTracker,
};
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::traits::{DiversityService, ItemStore, LabelingService, SnapshotStore};
use crate::worker::{EngineContext, LabelingOutcome, WorkerHandle, WorkerReport, WorkerState, store_prediction};

/// Already-constructed core components, injected at build time
pub struct Components {
    pub phase: PhaseController,
    pub evaluator: AgreementEvaluator,
    pub tracker: ValidationTracker,
    pub selector: InstanceSelector,
}

impl Components {
    pub fn from_config(config: &EngineConfig) -> OrchestratorResult<Self> {
        let weights = SelectionWeights::from_config(&config.selection.weights)?;
        Ok(Self {
            phase: PhaseController::new(),
            evaluator: AgreementEvaluator::new(config.evaluator.clone()),
            tracker: ValidationTracker::new(config.agreement.clone(), config.rng_seed),
            selector: InstanceSelector::new(weights, config.rng_seed.map(|seed| seed.wrapping_add(1))),
        })
    }
}

/// Serializable view of the engine for a presentation layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorStatus {
    pub session_id: Uuid,
    pub phase: Phase,
    pub allowed_next_phases: Vec<Phase>,
    pub seconds_in_phase: i64,
    pub total_instances: usize,
    pub model_labeled: usize,
    pub human_labeled: usize,
    pub unvalidated: usize,
    pub metrics: AgreementMetrics,
    pub pending_disagreements: usize,
    pub validation: ValidationProgress,
    pub worker: WorkerState,
}

/// Main orchestrator that coordinates human and model labeling
pub struct Orchestrator<L, D, I, S>
where
    L: LabelingService + 'static,
    D: DiversityService + 'static,
    I: ItemStore + 'static,
    S: SnapshotStore + 'static,
{
    /// Labeling pipeline shared with the background worker
    ctx: EngineContext<L, I, S>,

    /// Pure, so it lives outside the lock
    evaluator: AgreementEvaluator,

    diversity: Arc<D>,

    worker: Mutex<Option<WorkerHandle>>,
}

impl<L, D, I, S> Orchestrator<L, D, I, S>
where
    L: LabelingService + 'static,
    D: DiversityService + 'static,
    I: ItemStore + 'static,
    S: SnapshotStore + 'static,
{
    /// Create new orchestrator with injected components and services
    pub fn new(config: EngineConfig, components: Components, labeler: L, diversity: D, items: I, snapshots: S) -> Self {
        let Components {
            phase,
            evaluator,
            tracker,
            selector,
        } = components;
        let state = EngineState::new(phase, tracker, selector);

        Self {
            ctx: EngineContext::new(config, state, labeler, items, snapshots),
            evaluator,
            diversity: Arc::new(diversity),
            worker: Mutex::new(None),
        }
    }

    /// Build every core component from `config`
    pub fn from_config(config: EngineConfig, labeler: L, diversity: D, items: I, snapshots: S) -> OrchestratorResult<Self> {
        config.validate()?;
        let components = Components::from_config(&config)?;
        Ok(Self::new(config, components, labeler, diversity, items, snapshots))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.ctx.config
    }

    pub fn evaluator(&self) -> &AgreementEvaluator {
        &self.evaluator
    }

    pub async fn session_id(&self) -> Uuid {
        self.ctx.state.lock().await.session_id
    }

    /// Load the persisted snapshot, if any. Returns whether state was restored.
    pub async fn restore_state(&self) -> bool {
        let snapshot = match self.ctx.snapshots.load().await {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return false,
            Err(e) => {
                component_warn!(Component::Store, "⚠️ Could not load snapshot: {}", e);
                return false;
            }
        };
        if snapshot.version != SNAPSHOT_VERSION {
            let e = OrchestratorError::SnapshotVersion {
                found: snapshot.version,
                expected: SNAPSHOT_VERSION,
            };
            component_warn!(Component::Store, "⚠️ Ignoring persisted snapshot: {}", e);
            return false;
        }

        let mut state = self.ctx.state.lock().await;
        state.restore(snapshot);
        component_info!(
            Component::Orchestrator,
            "📂 Restored session {} in phase {} ({} predictions)",
            state.session_id,
            state.phase.current_phase(),
            state.predictions.len()
        );
        true
    }

    fn schema_info(&self, schema_name: &str) -> SchemaInfo {
        self.ctx
            .config
            .schema(schema_name)
            .cloned()
            .unwrap_or_else(|| SchemaInfo::new(schema_name, AnnotationType::Unknown))
    }

    /// Store or overwrite the model prediction for (instance, schema)
    pub async fn set_model_prediction(&self, instance_id: &str, schema_name: &str, mut prediction: ModelPrediction) {
        prediction.instance_id = instance_id.to_string();
        prediction.schema_name = schema_name.to_string();
        {
            let mut state = self.ctx.state.lock().await;
            store_prediction(&mut state, prediction);
        }
        self.ctx.persist().await;
    }

    /// Record a human label and compare it with the model prediction.
    ///
    /// Returns `None` when no prediction exists yet for (instance, schema).
    pub async fn record_human_label(&self, instance_id: &str, schema_name: &str, label: LabelValue) -> Option<bool> {
        let schema = self.schema_info(schema_name);
        let agrees = {
            let mut state = self.ctx.state.lock().await;
            let state = &mut *state;
            state
                .human_labels
                .entry(instance_id.to_string())
                .or_default()
                .insert(schema_name.to_string(), label.clone());
            state.human_labeled.insert(instance_id.to_string());
            state.assignments.remove(instance_id);

            match state.predictions.get_mut(instance_id).and_then(|p| p.get_mut(schema_name)) {
                None => None,
                Some(prediction) => {
                    let verdict = self.evaluator.detect_for_schema(&schema, &label, &prediction.predicted_label);
                    prediction.human_label = Some(label.clone());
                    prediction.agrees = Some(verdict.agrees());
                    let model_label = prediction.predicted_label.clone();
                    let confidence = prediction.confidence;

                    state
                        .tracker
                        .record_comparison(instance_id, &label, &model_label, &schema, verdict.agrees());

                    if let Some(category) = verdict.category {
                        component_debug!(
                            Component::Orchestrator,
                            "⚡ Disagreement on {} [{}]: human={} model={} ({})",
                            instance_id,
                            schema_name,
                            label,
                            model_label,
                            category
                        );
                        state.disagreements.entry(instance_id.to_string()).or_default().insert(
                            schema_name.to_string(),
                            Disagreement {
                                instance_id: instance_id.to_string(),
                                schema_name: schema_name.to_string(),
                                human_label: label.clone(),
                                model_label,
                                confidence,
                                category,
                                detected_at: Utc::now(),
                                resolved: false,
                                resolution_label: None,
                                resolution_source: None,
                                resolved_at: None,
                            },
                        );
                        state.pending_disagreements.insert(instance_id.to_string());
                    }
                    Some(verdict.agrees())
                }
            }
        };
        self.ctx.persist().await;
        agrees
    }

    /// Settle a recorded disagreement; false if there is none for (instance, schema)
    pub async fn resolve_disagreement(
        &self,
        instance_id: &str,
        schema_name: &str,
        resolution: LabelValue,
        source: ResolutionSource,
    ) -> bool {
        {
            let mut state = self.ctx.state.lock().await;
            let state = &mut *state;
            let Some(by_schema) = state.disagreements.get_mut(instance_id) else {
                component_warn!(Component::Orchestrator, "⚠️ No disagreement recorded for {}", instance_id);
                return false;
            };
            let Some(disagreement) = by_schema.get_mut(schema_name) else {
                component_warn!(
                    Component::Orchestrator,
                    "⚠️ No disagreement recorded for {} [{}]",
                    instance_id,
                    schema_name
                );
                return false;
            };

            disagreement.resolved = true;
            disagreement.resolution_label = Some(resolution.clone());
            disagreement.resolution_source = Some(source);
            disagreement.resolved_at = Some(Utc::now());
            if by_schema.values().all(|d| d.resolved) {
                state.pending_disagreements.remove(instance_id);
            }

            if let Some(prediction) = state.predictions.get_mut(instance_id).and_then(|p| p.get_mut(schema_name)) {
                prediction.disagreement_resolved = true;
                prediction.resolution_label = Some(resolution);
            }
        }
        self.ctx.persist().await;
        true
    }

    pub async fn pending_disagreements(&self) -> Vec<Disagreement> {
        self.ctx.state.lock().await.unresolved_disagreements()
    }

    /// Label `ids` through the labeling service outside the lock
    pub async fn request_model_labels(&self, ids: &[String]) -> OrchestratorResult<LabelingOutcome> {
        self.ctx.label_instances(ids).await
    }

    pub async fn prediction(&self, instance_id: &str, schema_name: &str) -> Option<ModelPrediction> {
        self.ctx.state.lock().await.prediction(instance_id, schema_name).cloned()
    }

    pub async fn current_phase(&self) -> Phase {
        self.ctx.state.lock().await.phase.current_phase()
    }

    pub async fn transition_to(&self, target: Phase, reason: &str, force: bool) -> OrchestratorResult<PhaseTransition> {
        let transition = self.ctx.state.lock().await.phase.transition_to(target, reason, force)?;
        self.ctx.persist().await;
        Ok(transition)
    }

    pub async fn advance_phase(&self, reason: &str) -> OrchestratorResult<PhaseTransition> {
        let transition = self.ctx.state.lock().await.phase.advance_to_next_phase(reason)?;
        self.ctx.persist().await;
        Ok(transition)
    }

    pub async fn phase_history(&self) -> Vec<PhaseTransition> {
        self.ctx.state.lock().await.phase.history().to_vec()
    }

    /// Hand off to autonomous labeling once the exit criteria hold.
    ///
    /// The criteria check and the transition happen in one critical section,
    /// so concurrent callers produce at most one transition.
    pub async fn check_and_advance_to_autonomous(&self) -> bool {
        let transitioned = {
            let mut state = self.ctx.state.lock().await;
            if !state.tracker.should_end_human_annotation()
                || state.phase.has_reached(Phase::AutonomousLabeling)
                || !state.phase.can_transition(Phase::AutonomousLabeling)
            {
                return false;
            }

            let metrics = state.tracker.metrics();
            let metadata = BTreeMap::from([
                ("agreement_rate".to_string(), serde_json::json!(metrics.agreement_rate)),
                ("total_compared".to_string(), serde_json::json!(metrics.total_compared)),
            ]);
            let reason = format!(
                "agreement {:.3} over {} comparisons meets exit criteria",
                metrics.agreement_rate, metrics.total_compared
            );
            state
                .phase
                .transition_with_metadata(Phase::AutonomousLabeling, &reason, metadata, false)
                .is_ok()
        };
        if transitioned {
            self.ctx.persist().await;
        }
        transitioned
    }

    /// Pick and assign the next instance for `user`.
    ///
    /// A user with an outstanding assignment gets it back until they label it.
    pub async fn get_next_instance_for_human(&self, user: &str) -> Option<String> {
        self.get_next_instance_excluding(user, &HashSet::new()).await
    }

    /// Like `get_next_instance_for_human`, never returning an id in `exclude`.
    ///
    /// Assignments `user` holds on excluded ids are released first, so a user
    /// never holds more than one assignment.
    pub async fn get_next_instance_excluding(&self, user: &str, exclude: &HashSet<String>) -> Option<String> {
        let all_ids = self.ctx.items.instance_ids().await;
        let available = {
            let mut state = self.ctx.state.lock().await;
            state
                .assignments
                .retain(|id, owner| owner.as_str() != user || !exclude.contains(id));
            let assigned = state
                .assignments
                .iter()
                .filter(|(_, owner)| owner.as_str() == user)
                .map(|(id, _)| id)
                .min();
            if let Some(id) = assigned {
                return Some(id.clone());
            }
            state.available_for(&all_ids, user)
        };
        if available.iter().all(|id| exclude.contains(id)) {
            return None;
        }

        let order = self.diversity.order(available).await;

        let mut state = self.ctx.state.lock().await;
        let state = &mut *state;
        // Recompute: the state may have moved while the diversity call ran
        let available = state.available_for(&all_ids, user);
        let disagreement_ids: HashSet<String> = state.pending_disagreements.iter().cloned().collect();
        state.selector.set_diversity_order(order);
        state.selector.refresh_pools(
            &available,
            &state.predictions,
            &disagreement_ids,
            self.ctx.config.selection.confidence_threshold,
        );
        let id = state.selector.select_next(&available, exclude)?;
        state.assignments.insert(id.clone(), user.to_string());
        component_debug!(Component::Orchestrator, "👤 Assigned {} to {}", id, user);
        Some(id)
    }

    pub async fn release_assignment(&self, instance_id: &str) -> bool {
        self.ctx.state.lock().await.assignments.remove(instance_id).is_some()
    }

    pub async fn selection_stats(&self) -> SelectionStats {
        self.ctx.state.lock().await.selector.get_selection_stats()
    }

    /// Stratified sample of model-only labeled instances for spot validation.
    ///
    /// Candidates carry the prediction of the first configured schema that has
    /// one, and the lowest confidence across their schemas.
    pub async fn select_validation_sample(&self, n: Option<usize>) -> Vec<String> {
        let n = n.unwrap_or(self.ctx.config.validation.sample_size);
        let selected = {
            let mut state = self.ctx.state.lock().await;
            let candidates: HashMap<String, ValidationCandidate> = state
                .predictions
                .iter()
                .filter(|(id, _)| !state.human_labeled.contains(*id))
                .filter_map(|(id, by_schema)| {
                    let primary = self.primary_prediction(by_schema)?;
                    let confidence = by_schema.values().map(|p| p.confidence).fold(f64::INFINITY, f64::min);
                    Some((
                        id.clone(),
                        ValidationCandidate {
                            label: primary.predicted_label.clone(),
                            confidence,
                        },
                    ))
                })
                .collect();
            state.tracker.select_validation_sample(&candidates, n)
        };
        self.ctx.persist().await;
        selected
    }

    fn primary_prediction<'a>(&self, by_schema: &'a BTreeMap<String, ModelPrediction>) -> Option<&'a ModelPrediction> {
        self.ctx
            .config
            .schemas
            .iter()
            .find_map(|schema| by_schema.get(&schema.name))
            .or_else(|| by_schema.values().next())
    }

    /// Record a human verdict on a validation sample; false if it was never selected
    pub async fn record_validation_result(&self, instance_id: &str, human_label: LabelValue) -> bool {
        let recorded = self.ctx.state.lock().await.tracker.record_validation_result(instance_id, human_label);
        if recorded {
            self.ctx.persist().await;
        } else {
            component_warn!(Component::Tracker, "⚠️ {} is not a validation sample", instance_id);
        }
        recorded
    }

    pub async fn validation_progress(&self) -> ValidationProgress {
        self.ctx.state.lock().await.tracker.validation_progress()
    }

    pub async fn metrics(&self) -> AgreementMetrics {
        self.ctx.state.lock().await.tracker.metrics().clone()
    }

    pub async fn confusion_analysis(&self) -> ConfusionAnalysis {
        let state = self.ctx.state.lock().await;
        state.tracker.get_confusion_analysis(&self.evaluator, &self.ctx.config.schemas)
    }

    pub async fn label_accuracy(&self) -> BTreeMap<String, f64> {
        self.ctx.state.lock().await.tracker.get_label_accuracy()
    }

    pub async fn status(&self) -> OrchestratorStatus {
        let all_ids = self.ctx.items.instance_ids().await;
        let worker = self.worker_state().await;
        let state = self.ctx.state.lock().await;
        OrchestratorStatus {
            session_id: state.session_id,
            phase: state.phase.current_phase(),
            allowed_next_phases: state.phase.allowed_transitions().to_vec(),
            seconds_in_phase: state.phase.time_in_phase().num_seconds(),
            total_instances: all_ids.len(),
            model_labeled: state.model_labeled.len(),
            human_labeled: state.human_labeled.len(),
            unvalidated: state.unvalidated_count(),
            metrics: state.tracker.metrics().clone(),
            pending_disagreements: state.pending_disagreements.len(),
            validation: state.tracker.validation_progress(),
            worker,
        }
    }

    /// Instances the worker has not labeled yet, excluding those it gave up on
    pub async fn unlabeled_count(&self) -> usize {
        let all_ids = self.ctx.items.instance_ids().await;
        self.ctx
            .state
            .lock()
            .await
            .unlabeled_count(&all_ids, self.ctx.config.worker.max_label_attempts)
    }

    pub async fn start_autonomous_labeling(&self) -> OrchestratorResult<()> {
        let mut worker = self.worker.lock().await;
        if worker.as_ref().is_some_and(|w| w.state() != WorkerState::Stopped) {
            return Err(OrchestratorError::WorkerAlreadyRunning);
        }
        *worker = Some(WorkerHandle::spawn(self.ctx.clone()));
        component_info!(Component::Orchestrator, "🚀 Autonomous labeling started");
        Ok(())
    }

    /// Returns false if no worker is running
    pub async fn pause_autonomous_labeling(&self) -> bool {
        self.set_worker_paused(true).await
    }

    pub async fn resume_autonomous_labeling(&self) -> bool {
        self.set_worker_paused(false).await
    }

    async fn set_worker_paused(&self, paused: bool) -> bool {
        match self.worker.lock().await.as_ref() {
            Some(handle) if handle.state() != WorkerState::Stopped => {
                handle.set_paused(paused);
                component_info!(
                    Component::Orchestrator,
                    "{} Autonomous labeling {}",
                    if paused { "⏸️" } else { "▶️" },
                    if paused { "paused" } else { "resumed" }
                );
                true
            }
            _ => false,
        }
    }

    /// Stop the worker, waiting at most the configured stop timeout
    pub async fn stop_autonomous_labeling(&self) -> Option<WorkerReport> {
        let handle = self.worker.lock().await.take()?;
        let report = handle.stop(self.ctx.config.worker.stop_timeout()).await;
        // An aborted iteration may have left claims behind
        self.ctx.state.lock().await.in_flight.clear();
        if let Some(report) = &report {
            logging::log_success(
                Component::Orchestrator,
                &format!("Autonomous labeling stopped after labeling {} instances", report.labeled),
            );
        }
        report
    }

    pub async fn worker_state(&self) -> WorkerState {
        self.worker
            .lock()
            .await
            .as_ref()
            .map(WorkerHandle::state)
            .unwrap_or(WorkerState::Stopped)
    }
}
