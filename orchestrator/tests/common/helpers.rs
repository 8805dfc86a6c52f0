//! Test helpers and builder patterns for orchestrator tests

use std::time::Duration;

use handoff_shared::{LabelValue, ModelPrediction, Phase};
use orchestrator::services::{Item, JsonlItemStore};
use orchestrator::traits::{MockDiversityService, MockLabelingService, MockSnapshotStore};
use orchestrator::{Components, EngineConfig, LabelResponse, Orchestrator, OrchestratorError};

use super::fixtures::TestFixtures;

pub type TestOrchestrator = Orchestrator<MockLabelingService, MockDiversityService, JsonlItemStore, MockSnapshotStore>;

/// Builder for test orchestrators with permissive default mocks
pub struct OrchestratorBuilder {
    config: EngineConfig,
    items: Vec<Item>,
    labeler: MockLabelingService,
    diversity: MockDiversityService,
    snapshots: MockSnapshotStore,
}

impl OrchestratorBuilder {
    /// Labeler answers "positive" at 0.9, diversity keeps input order,
    /// snapshots save fine and load nothing
    pub fn new() -> Self {
        Self {
            config: TestFixtures::config(),
            items: TestFixtures::items(5),
            labeler: TestHelpers::labeler_returning(LabelValue::text("positive"), 0.9),
            diversity: TestHelpers::passthrough_diversity(),
            snapshots: TestHelpers::accepting_snapshots(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_items(mut self, items: Vec<Item>) -> Self {
        self.items = items;
        self
    }

    pub fn with_labeler(mut self, labeler: MockLabelingService) -> Self {
        self.labeler = labeler;
        self
    }

    pub fn with_diversity(mut self, diversity: MockDiversityService) -> Self {
        self.diversity = diversity;
        self
    }

    pub fn with_snapshots(mut self, snapshots: MockSnapshotStore) -> Self {
        self.snapshots = snapshots;
        self
    }

    /// Configure the worker timings through a setup function
    pub fn with_worker<F>(mut self, setup: F) -> Self
    where
        F: FnOnce(&mut orchestrator::config::WorkerConfig),
    {
        setup(&mut self.config.worker);
        self
    }

    pub fn build(self) -> TestOrchestrator {
        let components = Components::from_config(&self.config).expect("valid test config");
        Orchestrator::new(
            self.config,
            components,
            self.labeler,
            self.diversity,
            JsonlItemStore::from_items(self.items),
            self.snapshots,
        )
    }
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Common test helper functions
pub struct TestHelpers;

impl TestHelpers {
    pub fn labeler_returning(label: LabelValue, confidence: f64) -> MockLabelingService {
        let mut labeler = MockLabelingService::new();
        labeler.expect_label().returning(move |_, _| {
            Ok(LabelResponse {
                label: label.clone(),
                confidence,
                reasoning: Some("mocked".to_string()),
            })
        });
        labeler
            .expect_model_name()
            .returning(|| TestFixtures::MODEL_NAME.to_string());
        labeler
    }

    pub fn failing_labeler() -> MockLabelingService {
        let mut labeler = MockLabelingService::new();
        labeler
            .expect_label()
            .returning(|_, _| Err(OrchestratorError::labeling("mock", "service unavailable")));
        labeler
            .expect_model_name()
            .returning(|| TestFixtures::MODEL_NAME.to_string());
        labeler
    }

    pub fn passthrough_diversity() -> MockDiversityService {
        let mut diversity = MockDiversityService::new();
        diversity.expect_order().returning(|ids| ids);
        diversity
    }

    pub fn accepting_snapshots() -> MockSnapshotStore {
        let mut snapshots = MockSnapshotStore::new();
        snapshots.expect_save().returning(|_| Ok(()));
        snapshots.expect_load().returning(|| Ok(None));
        snapshots
    }

    /// Orchestrator already moved into PARALLEL_ANNOTATION
    pub async fn parallel_orchestrator(builder: OrchestratorBuilder) -> TestOrchestrator {
        let orchestrator = builder.build();
        orchestrator
            .transition_to(Phase::ParallelAnnotation, "test setup", false)
            .await
            .expect("SETUP -> PARALLEL_ANNOTATION is legal");
        orchestrator
    }

    pub async fn seed_prediction(
        orchestrator: &TestOrchestrator,
        instance_id: &str,
        schema_name: &str,
        label: LabelValue,
        confidence: f64,
    ) {
        let prediction = ModelPrediction::new(instance_id, schema_name, label, confidence)
            .with_model(TestFixtures::MODEL_NAME);
        orchestrator.set_model_prediction(instance_id, schema_name, prediction).await;
    }

    /// Seed `count` likert predictions of 3 and answer them with human labels;
    /// the first `disagreeing` humans answer 5, the rest 4
    pub async fn run_likert_comparisons(orchestrator: &TestOrchestrator, count: usize, disagreeing: usize) {
        for i in 0..count {
            let id = TestFixtures::instance_id(i);
            Self::seed_prediction(orchestrator, &id, TestFixtures::QUALITY, LabelValue::number(3.0), 0.8).await;
            let human = if i < disagreeing { 5.0 } else { 4.0 };
            let agrees = orchestrator
                .record_human_label(&id, TestFixtures::QUALITY, LabelValue::number(human))
                .await;
            assert_eq!(agrees, Some(i >= disagreeing));
        }
    }

    /// Poll `condition` every 10ms until it holds or `limit` elapses
    pub async fn wait_for<F, Fut>(limit: Duration, mut condition: F) -> bool
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        let deadline = tokio::time::Instant::now() + limit;
        while tokio::time::Instant::now() < deadline {
            if condition().await {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        condition().await
    }
}
