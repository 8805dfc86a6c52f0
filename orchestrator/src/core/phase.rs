//! Workflow phase state machine
//!
//! Legal moves live in a static adjacency table so the whole lifecycle can be
//! audited in one place. Every committed transition is appended to an
//! append-only history; durations are derived from that history.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use handoff_shared::{Component, Phase, PhaseTransition, component_info, component_warn};
use serde::{Deserialize, Serialize};

use crate::error::{OrchestratorError, OrchestratorResult};

/// Phase -> phases reachable in one step, listed in ordinal order.
///
/// Two pairs are bidirectional to model review loops:
/// PARALLEL_ANNOTATION <-> DISAGREEMENT_RESOLUTION and
/// ACTIVE_ANNOTATION <-> PERIODIC_REVIEW.
const TRANSITIONS: &[(Phase, &[Phase])] = &[
    (Phase::Setup, &[Phase::PromptReview, Phase::ParallelAnnotation]),
    (Phase::PromptReview, &[Phase::EdgeCaseSynthesis, Phase::ParallelAnnotation]),
    (Phase::EdgeCaseSynthesis, &[Phase::EdgeCaseLabeling]),
    (Phase::EdgeCaseLabeling, &[Phase::PromptValidation]),
    (Phase::PromptValidation, &[Phase::ParallelAnnotation]),
    (
        Phase::ParallelAnnotation,
        &[Phase::DisagreementResolution, Phase::ActiveAnnotation, Phase::AutonomousLabeling],
    ),
    (Phase::DisagreementResolution, &[Phase::ParallelAnnotation, Phase::ActiveAnnotation]),
    (Phase::ActiveAnnotation, &[Phase::PeriodicReview, Phase::AutonomousLabeling]),
    (Phase::PeriodicReview, &[Phase::ActiveAnnotation, Phase::AutonomousLabeling]),
    (Phase::AutonomousLabeling, &[Phase::FinalValidation]),
    (Phase::FinalValidation, &[Phase::Completed]),
    (Phase::Completed, &[]),
];

/// Phases legally reachable from `phase` in one step
pub fn allowed_from(phase: Phase) -> &'static [Phase] {
    TRANSITIONS
        .iter()
        .find(|(from, _)| *from == phase)
        .map(|(_, to)| *to)
        .unwrap_or(&[])
}

/// Serializable state of a phase controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseSnapshot {
    pub current: Phase,
    pub started_at: DateTime<Utc>,
    pub history: Vec<PhaseTransition>,
}

/// Finite state machine over the workflow lifecycle
#[derive(Debug, Clone)]
pub struct PhaseController {
    current: Phase,
    started_at: DateTime<Utc>,
    history: Vec<PhaseTransition>,
}

impl PhaseController {
    /// Create a controller in `SETUP`
    pub fn new() -> Self {
        Self {
            current: Phase::Setup,
            started_at: Utc::now(),
            history: Vec::new(),
        }
    }

    pub fn from_snapshot(snapshot: PhaseSnapshot) -> Self {
        Self {
            current: snapshot.current,
            started_at: snapshot.started_at,
            history: snapshot.history,
        }
    }

    pub fn snapshot(&self) -> PhaseSnapshot {
        PhaseSnapshot {
            current: self.current,
            started_at: self.started_at,
            history: self.history.clone(),
        }
    }

    pub fn current_phase(&self) -> Phase {
        self.current
    }

    pub fn allowed_transitions(&self) -> &'static [Phase] {
        allowed_from(self.current)
    }

    pub fn can_transition(&self, target: Phase) -> bool {
        self.allowed_transitions().contains(&target)
    }

    pub fn is_terminal(&self) -> bool {
        self.current.is_terminal()
    }

    /// Whether the current phase is `phase` or later in the lifecycle
    pub fn has_reached(&self, phase: Phase) -> bool {
        self.current >= phase
    }

    /// Move to `target`; rejected unless legal from the current phase or forced
    pub fn transition_to(&mut self, target: Phase, reason: &str, force: bool) -> OrchestratorResult<PhaseTransition> {
        self.transition_with_metadata(target, reason, BTreeMap::new(), force)
    }

    pub fn transition_with_metadata(
        &mut self,
        target: Phase,
        reason: &str,
        metadata: BTreeMap<String, serde_json::Value>,
        force: bool,
    ) -> OrchestratorResult<PhaseTransition> {
        let legal = self.can_transition(target);
        if !legal && !force {
            return Err(OrchestratorError::InvalidTransition {
                from: self.current,
                to: target,
            });
        }

        let transition = PhaseTransition {
            from: self.current,
            to: target,
            timestamp: Utc::now(),
            reason: reason.to_string(),
            metadata,
            forced: !legal,
        };

        if transition.forced {
            component_warn!(
                Component::PhaseController,
                "⚠️ Forced phase transition {} -> {}: {}",
                transition.from,
                transition.to,
                reason
            );
        } else {
            component_info!(
                Component::PhaseController,
                "🔀 Phase transition {} -> {}: {}",
                transition.from,
                transition.to,
                reason
            );
        }

        self.current = target;
        self.history.push(transition.clone());
        Ok(transition)
    }

    /// Take the primary path: the legal phase with the lowest ordinal
    pub fn advance_to_next_phase(&mut self, reason: &str) -> OrchestratorResult<PhaseTransition> {
        let next = self
            .allowed_transitions()
            .iter()
            .copied()
            .min_by_key(|phase| phase.ordinal())
            .ok_or(OrchestratorError::NoTransitionAvailable { phase: self.current })?;
        self.transition_to(next, reason, false)
    }

    pub fn history(&self) -> &[PhaseTransition] {
        &self.history
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// When the current phase was entered
    pub fn entered_at(&self) -> DateTime<Utc> {
        self.history.last().map(|t| t.timestamp).unwrap_or(self.started_at)
    }

    pub fn time_in_phase(&self) -> Duration {
        Utc::now() - self.entered_at()
    }

    pub fn total_duration(&self) -> Duration {
        Utc::now() - self.started_at
    }

    /// How long each past phase lasted, in history order
    pub fn phase_durations(&self) -> Vec<(Phase, Duration)> {
        let mut entered = self.started_at;
        self.history
            .iter()
            .map(|t| {
                let spent = t.timestamp - entered;
                entered = t.timestamp;
                (t.from, spent)
            })
            .collect()
    }
}

impl Default for PhaseController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller_at(phase: Phase) -> PhaseController {
        let mut controller = PhaseController::new();
        if phase != Phase::Setup {
            controller.transition_to(phase, "test setup", true).unwrap();
        }
        controller
    }

    #[test]
    fn test_transition_succeeds_iff_adjacent() {
        for from in Phase::ALL {
            for to in Phase::ALL {
                let mut controller = controller_at(from);
                let result = controller.transition_to(to, "property", false);
                let expected = allowed_from(from).contains(&to);
                assert_eq!(result.is_ok(), expected, "{from} -> {to}");
                if !expected {
                    assert!(matches!(result, Err(OrchestratorError::InvalidTransition { .. })));
                    assert_eq!(controller.current_phase(), from);
                }
            }
        }
    }

    #[test]
    fn test_force_bypasses_table() {
        let mut controller = PhaseController::new();
        let transition = controller.transition_to(Phase::FinalValidation, "manual recovery", true).unwrap();
        assert!(transition.forced);
        assert_eq!(controller.current_phase(), Phase::FinalValidation);

        let legal = controller.transition_to(Phase::Completed, "done", true).unwrap();
        assert!(!legal.forced);
    }

    #[test]
    fn test_completed_is_terminal() {
        let mut controller = controller_at(Phase::Completed);
        assert!(controller.is_terminal());
        assert!(controller.allowed_transitions().is_empty());
        let result = controller.advance_to_next_phase("nothing left");
        assert!(matches!(
            result,
            Err(OrchestratorError::NoTransitionAvailable { phase: Phase::Completed })
        ));
    }

    #[test]
    fn test_advance_prefers_lowest_ordinal() {
        let mut controller = controller_at(Phase::ParallelAnnotation);
        let transition = controller.advance_to_next_phase("auto").unwrap();
        assert_eq!(transition.to, Phase::DisagreementResolution);

        let mut controller = PhaseController::new();
        controller.advance_to_next_phase("auto").unwrap();
        assert_eq!(controller.current_phase(), Phase::PromptReview);
    }

    #[test]
    fn test_review_loops_are_bidirectional() {
        assert!(allowed_from(Phase::ParallelAnnotation).contains(&Phase::DisagreementResolution));
        assert!(allowed_from(Phase::DisagreementResolution).contains(&Phase::ParallelAnnotation));
        assert!(allowed_from(Phase::ActiveAnnotation).contains(&Phase::PeriodicReview));
        assert!(allowed_from(Phase::PeriodicReview).contains(&Phase::ActiveAnnotation));
    }

    #[test]
    fn test_table_lists_targets_in_ordinal_order() {
        for (_, targets) in TRANSITIONS {
            assert!(targets.windows(2).all(|pair| pair[0] < pair[1]));
        }
        assert_eq!(TRANSITIONS.len(), Phase::ALL.len());
    }

    #[test]
    fn test_history_is_append_only_and_drives_durations() {
        let mut controller = PhaseController::new();
        controller.transition_to(Phase::ParallelAnnotation, "skip prompt work", false).unwrap();
        controller.transition_to(Phase::DisagreementResolution, "review", false).unwrap();
        controller.transition_to(Phase::ParallelAnnotation, "resume", false).unwrap();

        let history = controller.history();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].from, Phase::Setup);
        assert_eq!(history[2].to, Phase::ParallelAnnotation);
        assert_eq!(controller.entered_at(), history[2].timestamp);
        assert!(controller.time_in_phase() >= Duration::zero());
        assert!(controller.total_duration() >= controller.time_in_phase());
        assert_eq!(controller.phase_durations().len(), 3);
    }

    #[test]
    fn test_metadata_is_recorded() {
        let mut controller = PhaseController::new();
        let mut metadata = BTreeMap::new();
        metadata.insert("agreement_rate".to_string(), serde_json::json!(0.95));
        let transition = controller
            .transition_with_metadata(Phase::PromptReview, "prompt drafted", metadata, false)
            .unwrap();
        assert_eq!(transition.metadata["agreement_rate"], serde_json::json!(0.95));
    }

    #[test]
    fn test_snapshot_restores_state() {
        let mut controller = PhaseController::new();
        controller.transition_to(Phase::ParallelAnnotation, "start", false).unwrap();

        let restored = PhaseController::from_snapshot(controller.snapshot());
        assert_eq!(restored.current_phase(), Phase::ParallelAnnotation);
        assert_eq!(restored.history(), controller.history());
        assert_eq!(restored.started_at(), controller.started_at());
        assert!(restored.has_reached(Phase::PromptValidation));
        assert!(!restored.has_reached(Phase::AutonomousLabeling));
    }
}
