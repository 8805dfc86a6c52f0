//! Service-specific tests
//!
//! Each service has its own test file; shared helpers live in `common`.


// Common test utilities for services
pub mod common {
    use std::time::Duration;
    use tokio::time::timeout;

    use handoff_shared::{LabelValue, ModelPrediction, Phase};

    use crate::config::AgreementConfig;
    use crate::core::{EngineSnapshot, EngineState, InstanceSelector, PhaseController, SelectionWeights, ValidationTracker};

    /// Standard timeout for async operations in tests
    pub const TEST_TIMEOUT: Duration = Duration::from_millis(500);

    /// Helper to run async operations with timeout
    pub async fn with_timeout<T, F>(future: F) -> Result<T, tokio::time::error::Elapsed>
    where
        F: std::future::Future<Output = T>,
    {
        timeout(TEST_TIMEOUT, future).await
    }

    /// Snapshot of a small session in PARALLEL_ANNOTATION with one prediction
    pub fn sample_snapshot() -> EngineSnapshot {
        let mut state = EngineState::new(
            PhaseController::new(),
            ValidationTracker::new(AgreementConfig::default(), Some(3)),
            InstanceSelector::new(SelectionWeights::default(), Some(3)),
        );
        state
            .phase
            .transition_to(Phase::ParallelAnnotation, "fixture", false)
            .expect("legal fixture transition");
        state.predictions.entry("item-1".to_string()).or_default().insert(
            "sentiment".to_string(),
            ModelPrediction::new("item-1", "sentiment", LabelValue::text("positive"), 0.82).with_model("fixture-model"),
        );
        state.model_labeled.insert("item-1".to_string());
        state.snapshot()
    }
}
