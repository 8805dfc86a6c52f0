//! Mutable engine state guarded by the orchestrator lock
//!
//! Everything in here is plain in-memory data. The orchestrator holds one
//! `Arc<Mutex<EngineState>>` and never performs I/O while the lock is held.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use handoff_shared::{Disagreement, LabelValue, ModelPrediction};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::phase::{PhaseController, PhaseSnapshot};
use super::selection::InstanceSelector;
use super::validation::{TrackerSnapshot, ValidationTracker};

/// instance_id -> schema_name -> prediction
pub type PredictionTable = BTreeMap<String, BTreeMap<String, ModelPrediction>>;

/// instance_id -> schema_name -> disagreement
pub type DisagreementTable = BTreeMap<String, BTreeMap<String, Disagreement>>;

/// instance_id -> schema_name -> human label
pub type HumanLabelTable = BTreeMap<String, BTreeMap<String, LabelValue>>;

pub const SNAPSHOT_VERSION: u32 = 1;

/// Versioned persisted form of the durable parts of `EngineState`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub version: u32,
    pub session_id: Uuid,
    pub saved_at: DateTime<Utc>,
    pub phase: PhaseSnapshot,
    pub predictions: PredictionTable,
    pub human_labels: HumanLabelTable,
    pub model_labeled: BTreeSet<String>,
    pub human_labeled: BTreeSet<String>,
    pub disagreements: DisagreementTable,
    pub pending_disagreements: BTreeSet<String>,
    pub tracker: TrackerSnapshot,
}

/// All mutable orchestrator state
pub struct EngineState {
    pub session_id: Uuid,
    pub phase: PhaseController,
    pub tracker: ValidationTracker,
    pub selector: InstanceSelector,
    pub predictions: PredictionTable,
    pub human_labels: HumanLabelTable,
    pub model_labeled: BTreeSet<String>,
    pub human_labeled: BTreeSet<String>,
    pub disagreements: DisagreementTable,
    /// Instances with at least one unresolved disagreement
    pub pending_disagreements: BTreeSet<String>,
    /// instance_id -> user currently annotating it
    pub assignments: HashMap<String, String>,
    /// Instances handed to the labeling service and not yet stored
    pub in_flight: BTreeSet<String>,
    /// Consecutive failed labeling attempts; cleared once a label is stored
    pub label_failures: HashMap<String, u32>,
}

impl EngineState {
    pub fn new(phase: PhaseController, tracker: ValidationTracker, selector: InstanceSelector) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            phase,
            tracker,
            selector,
            predictions: PredictionTable::new(),
            human_labels: HumanLabelTable::new(),
            model_labeled: BTreeSet::new(),
            human_labeled: BTreeSet::new(),
            disagreements: DisagreementTable::new(),
            pending_disagreements: BTreeSet::new(),
            assignments: HashMap::new(),
            in_flight: BTreeSet::new(),
            label_failures: HashMap::new(),
        }
    }

    pub fn prediction(&self, instance_id: &str, schema_name: &str) -> Option<&ModelPrediction> {
        self.predictions.get(instance_id)?.get(schema_name)
    }

    /// Model-labeled instances that no human has looked at yet
    pub fn unvalidated_count(&self) -> usize {
        self.model_labeled
            .iter()
            .filter(|id| !self.human_labeled.contains(*id))
            .filter(|id| {
                !self
                    .tracker
                    .samples()
                    .iter()
                    .any(|s| &s.instance_id == *id && s.validated_at.is_some())
            })
            .count()
    }

    fn failures(&self, instance_id: &str) -> u32 {
        self.label_failures.get(instance_id).copied().unwrap_or(0)
    }

    /// No model label yet and fewer than `max_attempts` failed tries
    fn is_labelable(&self, instance_id: &str, max_attempts: u32) -> bool {
        !self.model_labeled.contains(instance_id) && self.failures(instance_id) < max_attempts
    }

    /// Up to `limit` labelable ids with no request in flight.
    ///
    /// Ids that never failed come first, so a handful of bad items at the
    /// front of the store cannot starve the rest.
    pub fn next_unlabeled(&self, all_ids: &[String], limit: usize, max_attempts: u32) -> Vec<String> {
        let mut candidates: Vec<&String> = all_ids
            .iter()
            .filter(|id| self.is_labelable(id, max_attempts) && !self.in_flight.contains(*id))
            .collect();
        candidates.sort_by_key(|id| self.failures(id));
        candidates.into_iter().take(limit).cloned().collect()
    }

    /// Ids still eligible for model labeling; exhausted ids are not counted
    pub fn unlabeled_count(&self, all_ids: &[String], max_attempts: u32) -> usize {
        all_ids.iter().filter(|id| self.is_labelable(id, max_attempts)).count()
    }

    pub fn record_label_failure(&mut self, instance_id: &str) -> u32 {
        let count = self.label_failures.entry(instance_id.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    /// Ids a human could be given: unlabeled or awaiting disagreement review,
    /// and not assigned to someone else
    pub fn available_for(&self, all_ids: &[String], user: &str) -> Vec<String> {
        all_ids
            .iter()
            .filter(|id| !self.human_labeled.contains(*id) || self.pending_disagreements.contains(*id))
            .filter(|id| self.assignments.get(*id).is_none_or(|owner| owner == user))
            .cloned()
            .collect()
    }

    pub fn unresolved_disagreements(&self) -> Vec<Disagreement> {
        self.disagreements
            .values()
            .flat_map(|by_schema| by_schema.values())
            .filter(|d| !d.resolved)
            .cloned()
            .collect()
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            version: SNAPSHOT_VERSION,
            session_id: self.session_id,
            saved_at: Utc::now(),
            phase: self.phase.snapshot(),
            predictions: self.predictions.clone(),
            human_labels: self.human_labels.clone(),
            model_labeled: self.model_labeled.clone(),
            human_labeled: self.human_labeled.clone(),
            disagreements: self.disagreements.clone(),
            pending_disagreements: self.pending_disagreements.clone(),
            tracker: self.tracker.snapshot(),
        }
    }

    /// Replace durable state with `snapshot`; assignments and in-flight requests are cleared
    pub fn restore(&mut self, snapshot: EngineSnapshot) {
        self.session_id = snapshot.session_id;
        self.phase = PhaseController::from_snapshot(snapshot.phase);
        self.tracker.restore(snapshot.tracker);
        self.predictions = snapshot.predictions;
        self.human_labels = snapshot.human_labels;
        self.model_labeled = snapshot.model_labeled;
        self.human_labeled = snapshot.human_labeled;
        self.disagreements = snapshot.disagreements;
        self.pending_disagreements = snapshot.pending_disagreements;
        self.assignments.clear();
        self.in_flight.clear();
        self.label_failures.clear();
    }
}
