//! Unit tests for individual orchestrator operations
//!
//! Every collaborator is a mockall mock except the item store, which is an
//! in-memory `JsonlItemStore`.

use std::collections::HashSet;

use handoff_shared::{DisagreementCategory, LabelValue, Phase, ResolutionSource};
use orchestrator::config::AgreementConfig;
use orchestrator::core::{EngineState, InstanceSelector, PhaseController, SelectionWeights, ValidationTracker};
use orchestrator::traits::MockSnapshotStore;
use orchestrator::{OrchestratorError, WorkerState};

mod common;
use common::{OrchestratorBuilder, TestFixtures, TestHelpers};

fn fresh_state() -> EngineState {
    EngineState::new(
        PhaseController::new(),
        ValidationTracker::new(AgreementConfig::default(), Some(1)),
        InstanceSelector::new(SelectionWeights::default(), Some(1)),
    )
}

/// A human label with no model prediction is stored but not compared
#[tokio::test]
async fn test_human_label_without_prediction() {
    // Arrange
    let orchestrator = TestHelpers::parallel_orchestrator(OrchestratorBuilder::new()).await;

    // Act
    let agrees = orchestrator
        .record_human_label("item-0", TestFixtures::SENTIMENT, LabelValue::text("positive"))
        .await;

    // Assert
    assert_eq!(agrees, None);
    assert_eq!(orchestrator.metrics().await.total_compared, 0);
    assert_eq!(orchestrator.status().await.human_labeled, 1);
}

#[tokio::test]
async fn test_agreeing_label_updates_metrics_and_prediction() {
    let orchestrator = TestHelpers::parallel_orchestrator(OrchestratorBuilder::new()).await;
    TestHelpers::seed_prediction(&orchestrator, "item-0", TestFixtures::SENTIMENT, LabelValue::text("positive"), 0.9)
        .await;

    let agrees = orchestrator
        .record_human_label("item-0", TestFixtures::SENTIMENT, LabelValue::text("positive"))
        .await;

    assert_eq!(agrees, Some(true));
    let metrics = orchestrator.metrics().await;
    assert_eq!(metrics.total_compared, 1);
    assert_eq!(metrics.agreements, 1);
    assert_eq!(metrics.agreement_rate, 1.0);

    let prediction = orchestrator.prediction("item-0", TestFixtures::SENTIMENT).await.unwrap();
    assert_eq!(prediction.agrees, Some(true));
    assert_eq!(prediction.human_label, Some(LabelValue::text("positive")));
    assert!(orchestrator.pending_disagreements().await.is_empty());
}

/// Disagreements are recorded, surfaced, and cleared on resolution
#[tokio::test]
async fn test_disagreement_lifecycle() {
    // Arrange
    let orchestrator = TestHelpers::parallel_orchestrator(OrchestratorBuilder::new()).await;
    TestHelpers::seed_prediction(&orchestrator, "item-0", TestFixtures::SENTIMENT, LabelValue::text("positive"), 0.6)
        .await;

    // Act
    let agrees = orchestrator
        .record_human_label("item-0", TestFixtures::SENTIMENT, LabelValue::text("negative"))
        .await;

    // Assert - disagreement is pending
    assert_eq!(agrees, Some(false));
    let pending = orchestrator.pending_disagreements().await;
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].category, DisagreementCategory::LabelMismatch);
    assert_eq!(pending[0].human_label, LabelValue::text("negative"));
    assert_eq!(pending[0].model_label, LabelValue::text("positive"));
    assert_eq!(orchestrator.status().await.pending_disagreements, 1);

    // Act - resolve in favour of the human
    let resolved = orchestrator
        .resolve_disagreement("item-0", TestFixtures::SENTIMENT, LabelValue::text("negative"), ResolutionSource::Human)
        .await;

    // Assert
    assert!(resolved);
    assert!(orchestrator.pending_disagreements().await.is_empty());
    assert_eq!(orchestrator.status().await.pending_disagreements, 0);
    let prediction = orchestrator.prediction("item-0", TestFixtures::SENTIMENT).await.unwrap();
    assert!(prediction.disagreement_resolved);
    assert_eq!(prediction.resolution_label, Some(LabelValue::text("negative")));
}

#[tokio::test]
async fn test_resolve_unknown_disagreement() {
    let orchestrator = TestHelpers::parallel_orchestrator(OrchestratorBuilder::new()).await;

    let resolved = orchestrator
        .resolve_disagreement("item-0", TestFixtures::SENTIMENT, LabelValue::text("positive"), ResolutionSource::Adjudicated)
        .await;

    assert!(!resolved);
}

/// Labels for a schema the config does not know fall back to exact matching
#[tokio::test]
async fn test_unknown_schema_uses_exact_match() {
    let orchestrator = TestHelpers::parallel_orchestrator(OrchestratorBuilder::new()).await;
    TestHelpers::seed_prediction(&orchestrator, "item-0", "topic", LabelValue::text("Sports"), 0.9).await;
    TestHelpers::seed_prediction(&orchestrator, "item-1", "topic", LabelValue::text("sports"), 0.9).await;

    let same = orchestrator.record_human_label("item-0", "topic", LabelValue::text("Sports")).await;
    let case_differs = orchestrator.record_human_label("item-1", "topic", LabelValue::text("SPORTS")).await;

    assert_eq!(same, Some(true));
    assert_eq!(case_differs, Some(false));
}

/// A user keeps getting the same instance until they label it
#[tokio::test]
async fn test_assignment_is_sticky_until_labeled() {
    // Arrange
    let orchestrator = TestHelpers::parallel_orchestrator(OrchestratorBuilder::new()).await;

    // Act
    let first = orchestrator.get_next_instance_for_human(TestFixtures::ANNOTATOR).await.unwrap();
    let again = orchestrator.get_next_instance_for_human(TestFixtures::ANNOTATOR).await.unwrap();
    let other = orchestrator
        .get_next_instance_for_human(TestFixtures::OTHER_ANNOTATOR)
        .await
        .unwrap();

    // Assert
    assert_eq!(first, again);
    assert_ne!(first, other);

    // Act - label it, then ask again
    orchestrator
        .record_human_label(&first, TestFixtures::SENTIMENT, LabelValue::text("neutral"))
        .await;
    let next = orchestrator.get_next_instance_for_human(TestFixtures::ANNOTATOR).await.unwrap();

    // Assert - neither the labeled one nor bob's
    assert_ne!(next, first);
    assert_ne!(next, other);
    assert_eq!(orchestrator.selection_stats().await.total_selections, 3);
}

#[tokio::test]
async fn test_release_assignment() {
    let orchestrator = TestHelpers::parallel_orchestrator(OrchestratorBuilder::new()).await;
    let id = orchestrator.get_next_instance_for_human(TestFixtures::ANNOTATOR).await.unwrap();

    assert!(orchestrator.release_assignment(&id).await);
    assert!(!orchestrator.release_assignment(&id).await);
}

#[tokio::test]
async fn test_excluded_instances_are_never_returned() {
    let orchestrator = TestHelpers::parallel_orchestrator(OrchestratorBuilder::new()).await;
    let mut exclude: HashSet<String> = (0..4).map(TestFixtures::instance_id).collect();

    let id = orchestrator
        .get_next_instance_excluding(TestFixtures::ANNOTATOR, &exclude)
        .await;
    assert_eq!(id.as_deref(), Some("item-4"));

    // The outstanding assignment is excluded too, so nothing is left
    exclude.insert("item-4".to_string());
    let none = orchestrator
        .get_next_instance_excluding(TestFixtures::ANNOTATOR, &exclude)
        .await;
    assert_eq!(none, None);
    assert!(!orchestrator.release_assignment("item-4").await);
}

/// Skipping an assigned instance moves the user to a new one instead of
/// leaving them holding two
#[tokio::test]
async fn test_excluding_current_assignment_releases_it() {
    // Arrange
    let orchestrator = TestHelpers::parallel_orchestrator(OrchestratorBuilder::new()).await;
    let first = orchestrator.get_next_instance_for_human(TestFixtures::ANNOTATOR).await.unwrap();

    // Act
    let exclude = HashSet::from([first.clone()]);
    let second = orchestrator
        .get_next_instance_excluding(TestFixtures::ANNOTATOR, &exclude)
        .await
        .unwrap();

    // Assert
    assert_ne!(first, second);
    assert!(!orchestrator.release_assignment(&first).await);
    for _ in 0..5 {
        let current = orchestrator.get_next_instance_for_human(TestFixtures::ANNOTATOR).await;
        assert_eq!(current.as_deref(), Some(second.as_str()));
    }
    // The skipped instance is free for someone else
    let others: HashSet<String> = (0..5).map(TestFixtures::instance_id).filter(|id| *id != first).collect();
    let for_bob = orchestrator
        .get_next_instance_excluding(TestFixtures::OTHER_ANNOTATOR, &others)
        .await;
    assert_eq!(for_bob, Some(first));
}

#[tokio::test]
async fn test_no_instances_once_everything_is_labeled() {
    let orchestrator = TestHelpers::parallel_orchestrator(OrchestratorBuilder::new().with_items(TestFixtures::items(3)))
        .await;
    for i in 0..3 {
        orchestrator
            .record_human_label(&TestFixtures::instance_id(i), TestFixtures::SENTIMENT, LabelValue::text("neutral"))
            .await;
    }

    assert_eq!(orchestrator.get_next_instance_for_human(TestFixtures::ANNOTATOR).await, None);
}

/// Instances with an unresolved disagreement stay available for review
#[tokio::test]
async fn test_pending_disagreement_is_offered_again() {
    let orchestrator = TestHelpers::parallel_orchestrator(OrchestratorBuilder::new().with_items(TestFixtures::items(1)))
        .await;
    TestHelpers::seed_prediction(&orchestrator, "item-0", TestFixtures::SENTIMENT, LabelValue::text("positive"), 0.9)
        .await;
    orchestrator
        .record_human_label("item-0", TestFixtures::SENTIMENT, LabelValue::text("negative"))
        .await;

    let next = orchestrator.get_next_instance_for_human(TestFixtures::ANNOTATOR).await;
    assert_eq!(next.as_deref(), Some("item-0"));

    orchestrator
        .resolve_disagreement("item-0", TestFixtures::SENTIMENT, LabelValue::text("negative"), ResolutionSource::Human)
        .await;
    orchestrator.release_assignment("item-0").await;
    assert_eq!(orchestrator.get_next_instance_for_human(TestFixtures::ANNOTATOR).await, None);
}

#[tokio::test]
async fn test_check_and_advance_requires_criteria() {
    let orchestrator = TestHelpers::parallel_orchestrator(OrchestratorBuilder::new()).await;
    TestHelpers::seed_prediction(&orchestrator, "item-0", TestFixtures::SENTIMENT, LabelValue::text("positive"), 0.9)
        .await;
    orchestrator
        .record_human_label("item-0", TestFixtures::SENTIMENT, LabelValue::text("positive"))
        .await;

    // Perfect agreement, but far below the minimum sample
    assert!(!orchestrator.check_and_advance_to_autonomous().await);
    assert_eq!(orchestrator.current_phase().await, Phase::ParallelAnnotation);
}

/// Criteria met in a phase with no edge to AUTONOMOUS_LABELING: no transition
#[tokio::test]
async fn test_check_and_advance_needs_legal_edge() {
    let mut config = TestFixtures::config();
    config.agreement.minimum_sample = 1;
    let orchestrator = OrchestratorBuilder::new().with_config(config).build();
    TestHelpers::seed_prediction(&orchestrator, "item-0", TestFixtures::SENTIMENT, LabelValue::text("positive"), 0.9)
        .await;
    orchestrator
        .record_human_label("item-0", TestFixtures::SENTIMENT, LabelValue::text("positive"))
        .await;

    assert!(!orchestrator.check_and_advance_to_autonomous().await);
    assert_eq!(orchestrator.current_phase().await, Phase::Setup);
}

#[tokio::test]
async fn test_illegal_transition_is_rejected_unless_forced() {
    let orchestrator = OrchestratorBuilder::new().build();

    let result = orchestrator.transition_to(Phase::Completed, "skip ahead", false).await;
    assert!(matches!(
        result,
        Err(OrchestratorError::InvalidTransition {
            from: Phase::Setup,
            to: Phase::Completed
        })
    ));
    assert_eq!(orchestrator.current_phase().await, Phase::Setup);

    let forced = orchestrator.transition_to(Phase::Completed, "manual recovery", true).await.unwrap();
    assert!(forced.forced);
    assert_eq!(orchestrator.current_phase().await, Phase::Completed);
    assert_eq!(orchestrator.phase_history().await.len(), 1);
}

#[tokio::test]
async fn test_advance_phase_follows_primary_path() {
    let orchestrator = OrchestratorBuilder::new().build();

    let transition = orchestrator.advance_phase("next").await.unwrap();

    assert_eq!(transition.from, Phase::Setup);
    assert_eq!(transition.to, Phase::PromptReview);
}

#[tokio::test]
async fn test_request_model_labels_stores_predictions() {
    // Arrange
    let orchestrator = OrchestratorBuilder::new().build();
    let ids = vec!["item-0".to_string(), "item-1".to_string()];

    // Act
    let outcome = orchestrator.request_model_labels(&ids).await.unwrap();

    // Assert
    assert_eq!(outcome.labeled, 2);
    assert_eq!(outcome.failed, 0);
    let prediction = orchestrator.prediction("item-1", TestFixtures::SENTIMENT).await.unwrap();
    assert_eq!(prediction.predicted_label, LabelValue::text("positive"));
    assert_eq!(prediction.model_name, TestFixtures::MODEL_NAME);
    assert_eq!(prediction.reasoning.as_deref(), Some("mocked"));
    assert_eq!(orchestrator.unlabeled_count().await, 3);
}

/// Labeling failures are counted, never propagated
#[tokio::test]
async fn test_request_model_labels_counts_failures() {
    let orchestrator = OrchestratorBuilder::new()
        .with_labeler(TestHelpers::failing_labeler())
        .build();
    let ids = vec!["item-0".to_string(), "missing".to_string()];

    let outcome = orchestrator.request_model_labels(&ids).await.unwrap();

    assert_eq!(outcome.labeled, 0);
    assert_eq!(outcome.failed, 2);
    assert!(orchestrator.prediction("item-0", TestFixtures::SENTIMENT).await.is_none());
}

#[tokio::test]
async fn test_request_model_labels_without_schemas() {
    let mut config = TestFixtures::config();
    config.schemas.clear();
    let orchestrator = OrchestratorBuilder::new().with_config(config).build();

    let result = orchestrator.request_model_labels(&["item-0".to_string()]).await;

    assert!(matches!(result, Err(OrchestratorError::ConfigurationError { .. })));
}

/// A failing snapshot store never breaks the operation that triggered the save
#[tokio::test]
async fn test_persistence_failure_is_not_fatal() {
    let mut snapshots = MockSnapshotStore::new();
    snapshots
        .expect_save()
        .times(1..)
        .returning(|_| Err(std::io::Error::other("disk full").into()));
    let orchestrator = TestHelpers::parallel_orchestrator(OrchestratorBuilder::new().with_snapshots(snapshots)).await;

    TestHelpers::seed_prediction(&orchestrator, "item-0", TestFixtures::SENTIMENT, LabelValue::text("positive"), 0.9)
        .await;
    let agrees = orchestrator
        .record_human_label("item-0", TestFixtures::SENTIMENT, LabelValue::text("positive"))
        .await;

    assert_eq!(agrees, Some(true));
}

#[tokio::test]
async fn test_restore_state_applies_snapshot() {
    // Arrange
    let mut state = fresh_state();
    state.phase.transition_to(Phase::ParallelAnnotation, "saved", false).unwrap();
    state.model_labeled.insert("item-0".to_string());
    let snapshot = state.snapshot();
    let session_id = snapshot.session_id;

    let mut snapshots = MockSnapshotStore::new();
    snapshots
        .expect_load()
        .times(1)
        .returning(move || Ok(Some(snapshot.clone())));
    let orchestrator = OrchestratorBuilder::new().with_snapshots(snapshots).build();

    // Act & Assert
    assert!(orchestrator.restore_state().await);
    assert_eq!(orchestrator.session_id().await, session_id);
    assert_eq!(orchestrator.current_phase().await, Phase::ParallelAnnotation);
    assert_eq!(orchestrator.status().await.model_labeled, 1);
}

#[tokio::test]
async fn test_restore_state_rejects_other_versions() {
    let mut snapshot = fresh_state().snapshot();
    snapshot.version = 99;
    let mut snapshots = MockSnapshotStore::new();
    snapshots.expect_load().returning(move || Ok(Some(snapshot.clone())));
    let orchestrator = OrchestratorBuilder::new().with_snapshots(snapshots).build();
    let session_id = orchestrator.session_id().await;

    assert!(!orchestrator.restore_state().await);
    assert_eq!(orchestrator.session_id().await, session_id);
    assert_eq!(orchestrator.current_phase().await, Phase::Setup);
}

#[tokio::test]
async fn test_restore_state_tolerates_load_errors() {
    let mut snapshots = MockSnapshotStore::new();
    snapshots
        .expect_load()
        .returning(|| Err(OrchestratorError::config("state", "corrupt")));
    let orchestrator = OrchestratorBuilder::new().with_snapshots(snapshots).build();

    assert!(!orchestrator.restore_state().await);
}

#[tokio::test]
async fn test_nothing_to_restore() {
    let orchestrator = OrchestratorBuilder::new().build();
    assert!(!orchestrator.restore_state().await);
}

#[tokio::test]
async fn test_validation_sample_flow() {
    // Arrange - six predictions across the confidence strata, one human-labeled
    let orchestrator = OrchestratorBuilder::new().with_items(TestFixtures::items(6)).build();
    for (i, confidence) in [0.2, 0.4, 0.6, 0.7, 0.85, 0.95].into_iter().enumerate() {
        TestHelpers::seed_prediction(
            &orchestrator,
            &TestFixtures::instance_id(i),
            TestFixtures::SENTIMENT,
            LabelValue::text("positive"),
            confidence,
        )
        .await;
    }
    orchestrator
        .record_human_label("item-0", TestFixtures::SENTIMENT, LabelValue::text("positive"))
        .await;

    // Act
    let sample = orchestrator.select_validation_sample(Some(10)).await;

    // Assert - every model-only instance, no duplicates
    let unique: HashSet<&String> = sample.iter().collect();
    assert_eq!(sample.len(), 5);
    assert_eq!(unique.len(), 5);
    assert!(!sample.contains(&"item-0".to_string()));

    // Act - validate, disagreeing on one
    for id in &sample {
        let label = if id == "item-5" { "negative" } else { "positive" };
        assert!(orchestrator.record_validation_result(id, LabelValue::text(label)).await);
    }

    // Assert
    let progress = orchestrator.validation_progress().await;
    assert_eq!(progress.selected, 5);
    assert_eq!(progress.validated, 5);
    assert_eq!(progress.agreements, 4);
    assert!((progress.accuracy - 0.8).abs() < 1e-9);
    assert!(!orchestrator.record_validation_result("item-0", LabelValue::text("positive")).await);
    assert!(orchestrator.select_validation_sample(Some(10)).await.is_empty());
}

#[tokio::test]
async fn test_status_serializes_for_presentation() {
    let orchestrator = TestHelpers::parallel_orchestrator(OrchestratorBuilder::new()).await;

    let status = orchestrator.status().await;
    let json = serde_json::to_value(&status).unwrap();

    assert_eq!(status.total_instances, 5);
    assert_eq!(status.worker, WorkerState::Stopped);
    assert_eq!(json["phase"], "PARALLEL_ANNOTATION");
    assert_eq!(json["worker"], "stopped");
    assert_eq!(json["allowed_next_phases"].as_array().unwrap().len(), 3);
}

#[test]
fn test_invalid_weights_fail_component_construction() {
    let mut config = TestFixtures::config();
    config.selection.weights.low_confidence = -1.0;

    assert!(orchestrator::Components::from_config(&config).is_err());
}
